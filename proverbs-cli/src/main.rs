use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;

use proverbs_core::config::CONFIG_FILE;
use proverbs_core::io::write_text;
use proverbs_core::{AppConfig, Error, Generator, MultiGramModel, ProverbCollection, Result, Selection};

/// Search a proverb file and generate new proverbs from the matches.
#[derive(Parser, Debug)]
#[command(name = "proverbs", version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the proverbs containing QUERY (at most 10)
    Search { file: PathBuf, query: String },

    /// Generate a proverb from some of the proverbs matching QUERY
    Generate {
        file: PathBuf,
        query: String,
        /// 1-based indices of the results to use, all results when omitted
        #[arg(long, value_delimiter = ',')]
        pick: Vec<usize>,
        /// Write the generated proverb to this file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Fixed RNG seed
        #[arg(long)]
        seed: Option<u64>,
        /// Plain beam search instead of beam sampling
        #[arg(long)]
        no_sample: bool,
    },

    /// Build the model cache of a corpus
    Train {
        corpus: PathBuf,
        /// Retrain even if a cache exists
        #[arg(long)]
        force: bool,
    },
}

fn search(file: &Path, query: &str) -> Result<Vec<String>> {
    let collection = ProverbCollection::load(file)?;
    if collection.is_empty() {
        return Err(Error::NoDatabase);
    }
    Ok(collection.search(query))
}

/// Keeps the picked results (1-based); no pick means every result.
fn pick(results: Vec<String>, picks: &[usize]) -> Selection {
    if picks.is_empty() {
        return results.iter().collect();
    }
    picks
        .iter()
        .filter_map(|i| i.checked_sub(1).and_then(|i| results.get(i)))
        .collect()
}

/// Loads the cached model of `corpus`, or rebuilds it and its cache with `force`.
fn train(corpus: &Path, max_order: usize, force: bool) -> Result<MultiGramModel> {
    if force {
        MultiGramModel::retrain(corpus, max_order)
    } else {
        MultiGramModel::new(corpus, max_order)
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Command::Search { file, query } => {
            let results = search(&file, &query)?;
            if results.is_empty() {
                println!("No matching proverbs found.");
            }
            for (i, proverb) in results.iter().enumerate() {
                println!("{}. {}", i + 1, proverb);
            }
        }
        Command::Generate { file, query, pick: picks, output, seed, no_sample } => {
            let prompt = pick(search(&file, &query)?, &picks).prompt()?;

            let corpus = config.model.corpus.clone().unwrap_or_else(|| file.clone());
            let model = MultiGramModel::new(&corpus, config.model.max_order)?;

            let mut generation_config = config.generation.clone();
            if seed.is_some() {
                generation_config.seed = seed;
            }
            if no_sample {
                generation_config.do_sample = false;
            }

            let generation = Generator::new(&model, generation_config).generate_with(&prompt, |progress| {
                eprint!("\rgenerating... {:>3.0}%", progress.fraction() * 100.0);
                std::ops::ControlFlow::Continue(())
            })?;
            eprintln!();

            let generation = generation.ok_or_else(|| Error::Model("generation stopped".to_owned()))?;
            println!("Generated Proverb: {}", generation.text);
            if let Some(output) = output {
                write_text(&output, &generation.text)?;
                println!("Saved to {}", output.display());
            }
        }
        Command::Train { corpus, force } => {
            let model = train(&corpus, config.model.max_order, force)?;
            println!("Model {} ready: {} proverbs", model.name(), model.sentence_count());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
