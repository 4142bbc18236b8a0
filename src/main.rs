#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use colorseq::{
    ColumnHighlight, EventRenderer, MidiOutputDevice, PaletteEntry, PlaybackEngine, Sequencer,
    SequencerConfig, StartOutcome, SynthOutput, ToolState,
};
#[cfg(feature = "gui")]
use std::error::Error;
#[cfg(feature = "gui")]
use std::path::Path;
#[cfg(feature = "gui")]
use tracing::{error, info};
#[cfg(feature = "gui")]
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("colorseq=info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => match SequencerConfig::load(Path::new(&path)) {
            Ok(config) => {
                info!(path = %path, "loaded config");
                config
            }
            Err(e) => {
                error!(path = %path, error = %e, "could not load config");
                std::process::exit(2);
            }
        },
        None => SequencerConfig::canonical(),
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 520.0])
            .with_title("colorseq - Color Grid Sequencer"),
        ..Default::default()
    };

    let app = match SequencerApp::new(&config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "could not start sequencer");
            std::process::exit(2);
        }
    };

    eframe::run_native(
        "colorseq",
        options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    eprintln!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
struct SequencerApp {
    engine: PlaybackEngine,
    // Keeps the cpal stream alive on the UI thread
    synth: SynthOutput,

    // UI state
    melodic: Vec<PaletteEntry>,
    percussion: Vec<PaletteEntry>,
    rows: usize,
    cols: usize,
    available_midi_ports: Vec<String>,
    selected_port: Option<usize>,
    highlight: ColumnHighlight,
    status: Option<String>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new(config: &SequencerConfig) -> Result<Self, Box<dyn Error>> {
        let synth = SynthOutput::default();
        let (renderer, events) = EventRenderer::new();
        let sequencer = Sequencer::new(config, Box::new(synth.backend()), Box::new(renderer))?;
        let melodic = sequencer.palette().melodic().cloned().collect();
        let percussion = sequencer.palette().percussion().cloned().collect();

        Ok(Self {
            engine: PlaybackEngine::new(sequencer)?.with_events(events),
            synth,
            melodic,
            percussion,
            rows: config.rows,
            cols: config.cols,
            available_midi_ports: MidiOutputDevice::available_ports(),
            selected_port: None,
            highlight: ColumnHighlight::default(),
            status: None,
        })
    }

    fn handle_playback_events(&mut self) -> Option<usize> {
        self.highlight.advance(self.engine.poll_events())
    }

    fn start_playback(&mut self) {
        match self.engine.start() {
            StartOutcome::VisualOnly(e) => {
                self.status = Some(format!("Audio unavailable ({}) - visual playback only", e))
            }
            StartOutcome::Started | StartOutcome::AlreadyRunning => self.status = None,
        }
    }

    fn connect_midi(&mut self, port_index: usize) {
        let mut device = MidiOutputDevice::new();
        match device.connect(port_index) {
            Ok(()) => {
                self.engine.lock().set_audio_backend(Box::new(device));
                self.selected_port = Some(port_index);
                self.status = None;
            }
            Err(e) => self.status = Some(e.to_string()),
        }
    }

    fn use_synth(&mut self) {
        self.engine
            .lock()
            .set_audio_backend(Box::new(self.synth.backend()));
        self.selected_port = None;
    }

    fn palette_row(&mut self, ui: &mut egui::Ui, percussion: bool) {
        let tool = self.engine.lock().tool().clone();
        let mut picked = None;

        let entries = if percussion {
            &self.percussion
        } else {
            &self.melodic
        };
        ui.horizontal_wrapped(|ui| {
            for entry in entries {
                let selected = tool == ToolState::Paint(entry.key.clone());
                let c = entry.display_color;
                let button = egui::Button::new(if selected { "●" } else { "" })
                    .min_size(egui::vec2(36.0, 36.0))
                    .fill(egui::Color32::from_rgb(c.0, c.1, c.2));
                if ui.add(button).on_hover_text(entry.key.as_str()).clicked() {
                    picked = Some(entry.key.clone());
                }
            }
        });

        if let Some(key) = picked {
            if let Err(e) = self.engine.lock().select_color(key.as_str()) {
                self.status = Some(e.to_string());
            }
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        let current_column = self.handle_playback_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("colorseq - Color Grid Sequencer");
            ui.add_space(10.0);

            // Output selection
            let mut selected_port_changed = None;
            let mut synth_selected = false;
            ui.horizontal(|ui| {
                ui.label("Output:");
                egui::ComboBox::from_label("")
                    .selected_text(
                        self.selected_port
                            .map(|i| self.available_midi_ports[i].as_str())
                            .unwrap_or("Built-in synth"),
                    )
                    .show_ui(ui, |ui| {
                        if ui
                            .selectable_label(self.selected_port.is_none(), "Built-in synth")
                            .clicked()
                        {
                            synth_selected = true;
                        }
                        for (i, port_name) in self.available_midi_ports.iter().enumerate() {
                            if ui
                                .selectable_label(self.selected_port == Some(i), port_name)
                                .clicked()
                            {
                                selected_port_changed = Some(i);
                            }
                        }
                    });
            });

            if let Some(port_idx) = selected_port_changed {
                self.connect_midi(port_idx);
            } else if synth_selected && self.selected_port.is_some() {
                self.use_synth();
            }

            ui.add_space(10.0);

            // Transport and tools
            ui.horizontal(|ui| {
                if self.engine.is_running() {
                    if ui.button("⏹ Stop").clicked() {
                        self.engine.stop();
                    }
                } else if ui.button("▶ Play").clicked() {
                    self.start_playback();
                }

                ui.add_space(20.0);

                let erasing = self.engine.lock().tool() == &ToolState::Erase;
                if ui.selectable_label(erasing, "Eraser").clicked() {
                    self.engine.lock().activate_eraser();
                }
                if ui.button("Clear").clicked() {
                    self.engine.lock().clear();
                }
            });

            ui.add_space(10.0);
            self.palette_row(ui, false);
            self.palette_row(ui, true);
            ui.add_space(20.0);

            // Grid
            let mut clicked = None;
            {
                let sequencer = self.engine.lock();
                let grid = sequencer.grid();
                for row in 0..self.rows {
                    ui.horizontal(|ui| {
                        for col in 0..self.cols {
                            let fill = grid
                                .get(row, col)
                                .and_then(|cell| sequencer.palette().resolve(cell.palette_key.as_str()).ok())
                                .map(|entry| {
                                    let c = entry.display_color;
                                    egui::Color32::from_rgb(c.0, c.1, c.2)
                                })
                                .unwrap_or(egui::Color32::from_rgb(40, 40, 40));

                            let mut button =
                                egui::Button::new("").min_size(egui::vec2(44.0, 60.0)).fill(fill);
                            if current_column == Some(col) {
                                button = button.stroke(egui::Stroke::new(3.0, egui::Color32::YELLOW));
                            }
                            if ui.add(button).clicked() {
                                clicked = Some((row, col));
                            }
                        }
                    });
                }
            }

            if let Some((row, col)) = clicked {
                if let Err(e) = self.engine.lock().apply_tool(row, col) {
                    self.status = Some(e.to_string());
                }
            }

            // Info
            ui.separator();
            ui.label("Pick a color and click cells to paint them");
            if !self.synth.is_available() && self.selected_port.is_none() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "⚠ No audio device - visual playback only",
                );
            }
            if let Some(status) = &self.status {
                ui.colored_label(egui::Color32::LIGHT_RED, status);
            }
        });
    }
}
