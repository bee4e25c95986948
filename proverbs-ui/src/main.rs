use std::sync::Arc;

use eframe::{egui, Frame};
use egui::Context;
use log::{info, warn};
use rfd::FileDialog;

use proverbs_core::config::CONFIG_FILE;
use proverbs_core::{
    AppConfig, GenerationEvent, GenerationHandle, GenerationWorker, LanguageModel, ModelSource, Progress, Session,
    Status,
};

/// Global UI state (MUST persist between frames in egui).
struct ProverbsUI {
    ctx: Context,
    config: AppConfig,
    session: Session,
    query: String,

    /// Model kept between generations; dropped when it no longer matches the database.
    model: Option<Arc<dyn LanguageModel>>,
    task: Option<GenerationHandle>,
    progress: f32,
}

impl ProverbsUI {
    fn new(ctx: Context, config: AppConfig) -> Self {
        Self {
            ctx,
            config,
            session: Session::new(),
            query: String::new(),
            model: None,
            task: None,
            progress: 0.0,
        }
    }

    /// Opens the file dialog and loads the chosen database.
    fn browse_database(&mut self) {
        let Some(path) = FileDialog::new()
            .set_title("Select Database File")
            .add_filter("Text Files", &["txt"])
            .add_filter("All Files", &["*"])
            .pick_file()
        else {
            return;
        };

        if self.session.load_database(&path).is_ok() && self.config.model.corpus.is_none() {
            // The database is the corpus: its model has to be rebuilt
            self.model = None;
        }
    }

    fn search(&mut self) {
        self.session.search(&self.query);
    }

    /// Starts a background generation from the checked proverbs.
    fn start_generation(&mut self) {
        if self.task.is_some() {
            return;
        }
        // The session reports why there is no prompt
        let Ok(prompt) = self.session.prompt() else { return };

        let source = match &self.model {
            Some(model) => ModelSource::Loaded(Arc::clone(model)),
            None => {
                let database = self.session.collection().map(|c| c.source());
                match self.config.model.source(database) {
                    Some(source) => source,
                    None => {
                        self.session.set_status(Status::NoDatabase);
                        return;
                    }
                }
            }
        };

        info!("generating from {} proverb(s)", self.session.selection().len());
        let ctx = self.ctx.clone();
        let handle = GenerationWorker::new(source, self.config.generation.clone())
            .on_event(move || ctx.request_repaint())
            .spawn(prompt);

        self.task = Some(handle);
        self.progress = 0.0;
        self.session.set_status(Status::Generating(Progress { step: 0, total: 1 }));
    }

    /// Drains worker events without blocking.
    fn poll_generation(&mut self) {
        let Some(handle) = &mut self.task else { return };
        let mut finished = false;

        while let Some(event) = handle.try_recv() {
            match event {
                GenerationEvent::ModelLoaded(model) => self.model = Some(model),
                GenerationEvent::Progress(progress) => {
                    self.progress = progress.fraction();
                    self.session.set_status(Status::Generating(progress));
                }
                GenerationEvent::Finished(generation) => {
                    self.progress = 1.0;
                    self.session.set_generated(generation.text);
                    finished = true;
                }
                GenerationEvent::Failed(e) => {
                    warn!("generation failed: {e}");
                    self.session.set_status(Status::GenerationFailed(e.to_string()));
                    finished = true;
                }
                GenerationEvent::Cancelled => {
                    self.progress = 0.0;
                    self.session.set_status(Status::Cancelled);
                    finished = true;
                }
            }
        }

        if finished {
            self.task = None;
        }
    }

    fn cancel_generation(&self) {
        if let Some(handle) = &self.task {
            handle.cancel();
        }
    }

    /// Opens the save dialog and writes the generated proverb.
    fn save_generated(&mut self) {
        let Some(path) = FileDialog::new()
            .set_title("Save Generated Proverb")
            .add_filter("Text Files", &["txt"])
            .set_file_name("proverb.txt")
            .save_file()
        else {
            return;
        };
        if let Err(e) = self.session.save_generated(&path) {
            warn!("save failed: {e}");
        }
    }
}

impl eframe::App for ProverbsUI {
    /// UI update loop (called every frame).
    fn update(&mut self, ctx: &Context, _: &mut Frame) {
        self.poll_generation();
        let running = self.task.is_some();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add(egui::ProgressBar::new(self.progress).show_percentage());

            ui.label("Enter your question:");
            let entry = ui.text_edit_singleline(&mut self.query);
            let submitted = entry.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));

            ui.horizontal(|ui| {
                if ui.button("Search").clicked() || submitted {
                    self.search();
                }
                if ui.add_enabled(!running, egui::Button::new("Browse Database")).clicked() {
                    self.browse_database();
                }
            });

            ui.separator();
            ui.label(self.session.status().to_string());

            egui::ScrollArea::vertical()
                .max_height(180.0)
                .show(ui, |ui| {
                    for index in 0..self.session.results().len() {
                        let mut checked = self.session.is_checked(index);
                        let label = self.session.results()[index].clone();
                        if ui.checkbox(&mut checked, label).changed() {
                            self.session.set_checked(index, checked);
                        }
                    }
                });

            ui.separator();
            ui.horizontal(|ui| {
                let can_generate = !running && self.session.can_generate();
                if ui.add_enabled(can_generate, egui::Button::new("Generate Proverb")).clicked() {
                    self.start_generation();
                }
                if ui.add_enabled(running, egui::Button::new("Cancel")).clicked() {
                    self.cancel_generation();
                }
                let can_save = !running && self.session.generated().is_some();
                if ui.add_enabled(can_save, egui::Button::new("Save")).clicked() {
                    self.save_generated();
                }
            });

            // Text area to display generated proverb
            let mut shown = self
                .session
                .generated()
                .map(|text| format!("Generated Proverb: {text}"))
                .unwrap_or_default();
            ui.add(
                egui::TextEdit::multiline(&mut shown)
                    .interactive(false)
                    .desired_width(f32::INFINITY),
            );
        });
    }
}

/// Application entry point.
fn main() -> eframe::Result {
    env_logger::init();

    let config = match AppConfig::load_or_default(CONFIG_FILE) {
        Ok(config) => config,
        Err(e) => {
            warn!("{e}, using default configuration");
            AppConfig::default()
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([440.0, 520.0])
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        "Search Proverbs",
        options,
        Box::new(|cc| Ok(Box::new(ProverbsUI::new(cc.egui_ctx.clone(), config)))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ui_with_database(contents: &str) -> (tempfile::TempDir, ProverbsUI) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.txt");
        fs::write(&path, contents).unwrap();
        let mut ui = ProverbsUI::new(Context::default(), AppConfig::default());
        ui.session.load_database(&path).unwrap();
        (dir, ui)
    }

    #[test]
    fn generation_runs_off_thread_and_lands_in_session() {
        let (_dir, mut ui) = ui_with_database("Still waters run deep.\nStill tongue makes a wise head.\n");
        ui.config.generation.seed = Some(2);
        ui.query = "still".into();
        ui.search();
        ui.session.set_checked(0, true);

        ui.start_generation();
        assert!(ui.task.is_some());

        while ui.task.is_some() {
            ui.poll_generation();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(ui.session.status(), &Status::Generated);
        assert!(ui.session.generated().is_some());
        assert!(ui.model.is_some());
    }

    #[test]
    fn nothing_checked_does_not_start() {
        let (_dir, mut ui) = ui_with_database("Still waters run deep.\n");
        ui.query = "still".into();
        ui.search();
        ui.start_generation();
        assert!(ui.task.is_none());
        assert_eq!(ui.session.status(), &Status::NothingSelected);
    }
}
