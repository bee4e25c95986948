use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use actix_cors::Cors;
use actix_web::{get, post, put, web, App, HttpResponse, HttpServer, Responder};
use log::info;
use serde::{Deserialize, Serialize};

use proverbs_core::config::CONFIG_FILE;
use proverbs_core::{AppConfig, Error, GenerationConfig, Generator, LanguageModel, MultiGramModel, ProverbCollection, Selection};

/// Query parameters for `/v1/load_database`
#[derive(Deserialize)]
struct LoadQuery {
	path: Option<String>,
}

/// Query parameters for `/v1/search`
#[derive(Deserialize)]
struct SearchQuery {
	query: Option<String>,
}

/// Body of `/v1/generate`; unset fields keep the configured values.
#[derive(Deserialize)]
struct GenerateBody {
	proverbs: Vec<String>,
	max_length: Option<usize>,
	do_sample: Option<bool>,
	seed: Option<u64>,
}

impl GenerateBody {
	fn config(&self, base: &GenerationConfig) -> GenerationConfig {
		let mut config = base.clone();
		if let Some(max_length) = self.max_length {
			config.max_length = max_length;
		}
		if let Some(do_sample) = self.do_sample {
			config.do_sample = do_sample;
		}
		if self.seed.is_some() {
			config.seed = self.seed;
		}
		config
	}
}

#[derive(Serialize)]
struct DatabaseInfo {
	path: PathBuf,
	proverbs: usize,
}

struct SharedData {
	config: AppConfig,
	collection: Option<ProverbCollection>,
	model: Option<Arc<dyn LanguageModel>>,
}

type Shared = web::Data<Mutex<SharedData>>;

/// Corpus the model has to come from: the configured one, else the loaded database.
fn model_corpus(shared_data: &SharedData) -> Option<PathBuf> {
	shared_data
		.config
		.model
		.corpus
		.clone()
		.or_else(|| shared_data.collection.as_ref().map(|c| c.source().to_owned()))
}

/// Keeps `model` for later requests, unless the database changed while it was loading.
fn keep_model(shared_data: &mut SharedData, corpus: &Path, model: &Arc<dyn LanguageModel>) -> bool {
	if model_corpus(shared_data).as_deref() != Some(corpus) {
		info!("database changed while loading the model of {}, not keeping it", corpus.display());
		return false;
	}
	shared_data.model = Some(Arc::clone(model));
	true
}

/// Maps an error category to its HTTP status.
fn error_response(e: &Error) -> HttpResponse {
	let body = format!("{}: {e}", e.kind());
	match e {
		Error::Io { .. } | Error::Decode { .. } => HttpResponse::UnprocessableEntity().body(body),
		Error::NoDatabase => HttpResponse::Conflict().body(body),
		Error::EmptySelection | Error::PromptTooLong { .. } | Error::InvalidConfig(_) => HttpResponse::BadRequest().body(body),
		_ => HttpResponse::InternalServerError().body(body),
	}
}

/// HTTP PUT endpoint `/v1/load_database`
///
/// Loads a proverb file; the model is reloaded lazily on the next generation.
#[put("/v1/load_database")]
async fn put_database(data: Shared, query: web::Query<LoadQuery>) -> impl Responder {
	let path = match &query.path {
		Some(s) if !s.trim().is_empty() => PathBuf::from(s.trim()),
		_ => return HttpResponse::BadRequest().body("Missing or empty path"),
	};

	let collection = match web::block(move || ProverbCollection::load(path)).await {
		Ok(Ok(collection)) => collection,
		Ok(Err(e)) => return error_response(&e),
		Err(_) => return HttpResponse::InternalServerError().body("Loading task failed"),
	};

	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("State lock failed"),
	};
	let body = format!("Database selected: {}", collection.source().display());
	if shared_data.config.model.corpus.is_none() {
		shared_data.model = None;
	}
	shared_data.collection = Some(collection);
	HttpResponse::Ok().body(body)
}

#[get("/v1/database")]
async fn get_database(data: Shared) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("State lock failed"),
	};
	match &shared_data.collection {
		Some(c) => HttpResponse::Ok().json(DatabaseInfo { path: c.source().to_owned(), proverbs: c.len() }),
		None => error_response(&Error::NoDatabase),
	}
}

/// HTTP GET endpoint `/v1/search`
///
/// Returns the matching proverbs, one per line.
#[get("/v1/search")]
async fn get_search(data: Shared, query: web::Query<SearchQuery>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("State lock failed"),
	};
	match shared_data.collection.as_ref().filter(|c| !c.is_empty()) {
		Some(collection) => {
			let results = collection.search(query.query.as_deref().unwrap_or_default());
			HttpResponse::Ok().body(results.join("\n"))
		}
		None => error_response(&Error::NoDatabase),
	}
}

/// HTTP POST endpoint `/v1/generate`
///
/// Generates a proverb from the given ones. Model loading and decoding run
/// on the blocking thread pool.
#[post("/v1/generate")]
async fn post_generate(data: Shared, body: web::Json<GenerateBody>) -> impl Responder {
	let prompt = match body.proverbs.iter().collect::<Selection>().prompt() {
		Ok(prompt) => prompt,
		Err(e) => return error_response(&e),
	};

	let (model, corpus, max_order, config) = {
		let shared_data = match data.lock() {
			Ok(m) => m,
			Err(_) => return HttpResponse::InternalServerError().body("State lock failed"),
		};
		let corpus = model_corpus(&shared_data);
		(
			shared_data.model.clone(),
			corpus,
			shared_data.config.model.max_order,
			body.config(&shared_data.config.generation),
		)
	};

	let model = match (model, corpus) {
		(Some(model), _) => model,
		(None, Some(corpus)) => match web::block({
			let corpus = corpus.clone();
			move || MultiGramModel::new(corpus, max_order)
		})
		.await
		{
			Ok(Ok(model)) => {
				let model: Arc<dyn LanguageModel> = Arc::new(model);
				if let Ok(mut shared_data) = data.lock() {
					keep_model(&mut shared_data, &corpus, &model);
				}
				model
			}
			Ok(Err(e)) => return error_response(&e),
			Err(_) => return HttpResponse::InternalServerError().body("Model loading task failed"),
		},
		(None, None) => return error_response(&Error::NoDatabase),
	};

	match web::block(move || Generator::new(model.as_ref(), config).generate(&prompt)).await {
		Ok(Ok(generation)) => HttpResponse::Ok().body(generation.text),
		Ok(Err(e)) => error_response(&e),
		Err(_) => HttpResponse::InternalServerError().body("Generation task failed"),
	}
}

fn routes(cfg: &mut web::ServiceConfig) {
	cfg.service(put_database)
		.service(get_database)
		.service(get_search)
		.service(post_generate);
}

/// Main entry point for the server.
///
/// Reads `proverbs.toml` (or the path in `PROVERBS_CONFIG`), then serves the
/// HTTP API on the configured address.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::init();

	let config_path = std::env::var("PROVERBS_CONFIG").unwrap_or_else(|_| CONFIG_FILE.to_owned());
	let config = AppConfig::load_or_default(&config_path).map_err(std::io::Error::other)?;
	let address = (config.server.host.clone(), config.server.port);
	info!("listening on {}:{}", address.0, address.1);

	let shared_data = SharedData { config, collection: None, model: None };
	let shared = web::Data::new(Mutex::new(shared_data));

	HttpServer::new(move || {
		App::new()
			.wrap(Cors::permissive())
			.app_data(shared.clone())
			.configure(routes)
	})
		.bind(address)?
		.run()
		.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use actix_web::http::StatusCode;
	use actix_web::test;

	fn shared(config: AppConfig) -> Shared {
		web::Data::new(Mutex::new(SharedData { config, collection: None, model: None }))
	}

	fn corpus(dir: &tempfile::TempDir) -> String {
		let path = dir.path().join("proverbs.txt");
		std::fs::write(&path, "Practice makes perfect.\nPractice what you preach.\nBetter late than never.\n").unwrap();
		path.to_string_lossy().to_string()
	}

	#[actix_web::test]
	async fn search_before_load_is_conflict() {
		let app = test::init_service(App::new().app_data(shared(AppConfig::default())).configure(routes)).await;
		let req = test::TestRequest::get().uri("/v1/search?query=x").to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::CONFLICT);
	}

	#[actix_web::test]
	async fn load_then_search() {
		let dir = tempfile::tempdir().unwrap();
		let path = corpus(&dir);
		let app = test::init_service(App::new().app_data(shared(AppConfig::default())).configure(routes)).await;

		let req = test::TestRequest::put()
			.uri(&format!("/v1/load_database?path={}", path))
			.to_request();
		assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

		let req = test::TestRequest::get().uri("/v1/search?query=PRACTICE").to_request();
		let body = test::call_and_read_body(&app, req).await;
		assert_eq!(body, "practice makes perfect.\npractice what you preach.");
	}

	#[actix_web::test]
	async fn missing_file_is_unprocessable() {
		let app = test::init_service(App::new().app_data(shared(AppConfig::default())).configure(routes)).await;
		let req = test::TestRequest::put().uri("/v1/load_database?path=/nonexistent/p.txt").to_request();
		assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNPROCESSABLE_ENTITY);
	}

	#[actix_web::test]
	async fn generate_from_selected_proverbs() {
		let dir = tempfile::tempdir().unwrap();
		let path = corpus(&dir);
		let mut config = AppConfig::default();
		config.model.corpus = Some(PathBuf::from(&path));
		config.model.max_order = 3;
		let app = test::init_service(App::new().app_data(shared(config)).configure(routes)).await;

		let req = test::TestRequest::post()
			.uri("/v1/generate")
			.set_json(generate_body(&["practice makes perfect."]))
			.to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::OK);

		let req = test::TestRequest::post().uri("/v1/generate").set_json(generate_body(&[])).to_request();
		assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
	}

	#[::core::prelude::v1::test]
	fn model_of_a_replaced_database_is_not_kept() {
		let dir = tempfile::tempdir().unwrap();
		let old = PathBuf::from(corpus(&dir));
		let model: Arc<dyn LanguageModel> = Arc::new(MultiGramModel::new(&old, 3).unwrap());

		let mut shared_data = SharedData {
			config: AppConfig::default(),
			collection: Some(ProverbCollection::from_lines("other.txt", ["inny plik\n"])),
			model: None,
		};
		assert!(!keep_model(&mut shared_data, &old, &model));
		assert!(shared_data.model.is_none());

		shared_data.collection = Some(ProverbCollection::load(&old).unwrap());
		assert!(keep_model(&mut shared_data, &old, &model));
		assert!(shared_data.model.is_some());
	}

	#[derive(Serialize)]
	struct Body<'a> {
		proverbs: &'a [&'a str],
		seed: u64,
	}

	fn generate_body<'a>(proverbs: &'a [&'a str]) -> Body<'a> {
		Body { proverbs, seed: 1 }
	}
}
