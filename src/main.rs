use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gui")]
use eframe::egui;

use mtrnm::{
    AudioClock, AudioOutput, BeatFollower, BeatScheduler, MetronomeError, MidiClock, Settings,
    TempoConfig,
};

fn main() -> mtrnm::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if cli.list_midi {
        let ports = MidiClock::available_ports();
        if ports.is_empty() {
            println!("No MIDI output ports available");
        }
        for (i, name) in ports.iter().enumerate() {
            println!("{}: {}", i, name);
        }
        return Ok(());
    }

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let tempo = TempoConfig::new(cli.bpm, cli.beats)?
        .with_accent(!cli.no_accent)
        .with_volume(cli.volume)?;

    let backend = Backend::open(cli.midi_port, &settings)?;

    if cli.headless {
        run_headless(&backend, tempo, cli.duration)
    } else {
        run_gui(backend, tempo)
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drift-free metronome", long_about = None)]
struct Cli {
    /// Tempo in beats per minute (40-240).
    #[arg(long, default_value_t = 120.0)]
    bpm: f64,

    /// Beats per measure.
    #[arg(long, default_value_t = 4)]
    beats: u32,

    /// Click volume in [0, 1].
    #[arg(long, default_value_t = 0.8)]
    volume: f32,

    /// Do not accent the first beat of each measure.
    #[arg(long)]
    no_accent: bool,

    /// TOML file with scheduler settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Send clicks to this MIDI output port instead of the audio device.
    #[arg(long)]
    midi_port: Option<usize>,

    /// List MIDI output ports and exit.
    #[arg(long)]
    list_midi: bool,

    /// Run in the terminal without a window.
    #[arg(long)]
    headless: bool,

    /// Headless run time in seconds; runs until interrupted when absent.
    #[arg(long, value_parser = parse_duration)]
    duration: Option<f64>,
}

fn parse_duration(value: &str) -> Result<f64, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("`{}` is not a number: {}", value, e))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("duration must be a non-negative number of seconds, got {}", value));
    }
    Ok(seconds)
}

/// The scheduler and whatever output its clock belongs to.
struct Backend {
    // Declared first so the scheduler stops before the output goes away.
    scheduler: BeatScheduler,
    _audio: Option<AudioOutput>,
    description: String,
}

impl Backend {
    fn open(midi_port: Option<usize>, settings: &Settings) -> mtrnm::Result<Self> {
        if let Some(port) = midi_port {
            let scheduler = BeatScheduler::acquire(settings.clone(), || {
                let clock: Arc<dyn AudioClock> = Arc::new(MidiClock::connect(port)?);
                Ok(clock)
            })?;
            return Ok(Self {
                scheduler,
                _audio: None,
                description: format!("MIDI port {}", port),
            });
        }

        match AudioOutput::open(settings) {
            Ok(audio) => Ok(Self {
                scheduler: BeatScheduler::with_settings(audio.clock(), settings.clone())?,
                description: format!("audio device ({} Hz)", audio.sample_rate()),
                _audio: Some(audio),
            }),
            Err(e) => {
                warn!(error = %e, "audio output unavailable");
                Ok(Self {
                    scheduler: BeatScheduler::detached(settings.clone())?,
                    _audio: None,
                    description: "none".to_string(),
                })
            }
        }
    }

    fn clock_ready(&self) -> bool {
        self.scheduler
            .clock()
            .is_some_and(|clock| clock.is_ready())
    }
}

fn run_headless(backend: &Backend, tempo: TempoConfig, duration: Option<f64>) -> mtrnm::Result<()> {
    let scheduler = &backend.scheduler;
    scheduler.start(tempo)?;
    let clock = scheduler
        .clock()
        .ok_or_else(|| MetronomeError::audio_unavailable("no audio output was acquired"))?;
    info!(output = %backend.description, "running headless");

    let started = Instant::now();
    let mut follower = BeatFollower::new();

    loop {
        if duration.is_some_and(|limit| started.elapsed().as_secs_f64() >= limit) {
            break;
        }
        if !backend.clock_ready() {
            scheduler.stop();
            return Err(MetronomeError::audio_unavailable("output stopped while running"));
        }

        follower.push(scheduler.poll_events());
        let beats = scheduler.config().beats_per_measure();
        for beat in follower.advance(clock.now()) {
            println!(
                "{} {}/{}  #{}",
                if beat.accent { "TICK" } else { "tock" },
                beat.beat_in_measure + 1,
                beats,
                beat.index
            );
        }

        thread::sleep(Duration::from_millis(5));
    }

    scheduler.stop();
    Ok(())
}

#[cfg(not(feature = "gui"))]
fn run_gui(backend: Backend, tempo: TempoConfig) -> mtrnm::Result<()> {
    warn!("built without the 'gui' feature, running headless");
    run_headless(&backend, tempo, None)
}

#[cfg(feature = "gui")]
fn run_gui(backend: Backend, tempo: TempoConfig) -> mtrnm::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([460.0, 340.0])
            .with_title("MTRNM - Metronome"),
        ..Default::default()
    };

    eframe::run_native(
        "MTRNM",
        options,
        Box::new(move |_cc| Ok(Box::new(MetronomeApp::new(backend, tempo)))),
    )
    .map_err(|e| MetronomeError::Gui(e.to_string()))
}

#[cfg(feature = "gui")]
struct MetronomeApp {
    backend: Backend,
    tempo: TempoConfig,
    follower: BeatFollower,
    last_error: Option<String>,
}

#[cfg(feature = "gui")]
enum Action {
    Start,
    Stop,
}

#[cfg(feature = "gui")]
impl MetronomeApp {
    fn new(backend: Backend, tempo: TempoConfig) -> Self {
        Self {
            backend,
            tempo,
            follower: BeatFollower::new(),
            last_error: None,
        }
    }

    fn handle_beats(&mut self) {
        let scheduler = &self.backend.scheduler;
        self.follower.push(scheduler.poll_events());
        if let Some(clock) = scheduler.clock() {
            self.follower.advance(clock.now());
        }
    }

    fn apply(&mut self, action: Action) {
        self.follower.clear();
        match action {
            Action::Start => {
                if let Err(e) = self.backend.scheduler.start(self.tempo) {
                    self.last_error = Some(e.to_string());
                } else {
                    self.last_error = None;
                }
            }
            Action::Stop => self.backend.scheduler.stop(),
        }
    }

    fn report(&mut self, result: mtrnm::Result<()>) {
        if let Err(e) = result {
            self.last_error = Some(e.to_string());
        }
    }
}

#[cfg(feature = "gui")]
#[derive(Debug, PartialEq)]
enum Lamp {
    Accent,
    Beat,
    Off,
}

/// Lamp for `position`, coloured by the click that actually sounded there.
#[cfg(feature = "gui")]
fn lamp(sounded: Option<mtrnm::BeatEvent>, position: u32) -> Lamp {
    match sounded {
        Some(beat) if beat.beat_in_measure == position && beat.accent => Lamp::Accent,
        Some(beat) if beat.beat_in_measure == position => Lamp::Beat,
        _ => Lamp::Off,
    }
}

#[cfg(feature = "gui")]
impl eframe::App for MetronomeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_beats();

        let is_running = self.backend.scheduler.is_running();
        let mut action = None;
        let mut bpm = self.tempo.bpm();
        let mut beats = self.tempo.beats_per_measure();
        let mut accent = self.tempo.accent_first_beat();
        let mut volume = self.tempo.volume();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("MTRNM - Metronome");
            ui.label(format!("Output: {}", self.backend.description));
            ui.add_space(10.0);

            // Transport controls
            ui.horizontal(|ui| {
                if is_running {
                    if ui.button("⏸ Stop").clicked() {
                        action = Some(Action::Stop);
                    }
                } else if ui.button("▶ Start").clicked() {
                    action = Some(Action::Start);
                }

                ui.add_space(20.0);
                ui.label("BPM:");
                ui.add(egui::Slider::new(&mut bpm, mtrnm::MIN_BPM..=mtrnm::MAX_BPM).step_by(1.0));
            });

            ui.add_space(10.0);

            ui.horizontal(|ui| {
                ui.label("Time signature:");
                egui::ComboBox::from_id_source("time_signature")
                    .selected_text(format!("{}/4", beats))
                    .show_ui(ui, |ui| {
                        for option in mtrnm::COMMON_TIME_SIGNATURES {
                            ui.selectable_value(&mut beats, option, format!("{}/4", option));
                        }
                    });

                ui.add_space(20.0);
                ui.checkbox(&mut accent, "Accent first beat");
            });

            ui.add_space(10.0);

            ui.horizontal(|ui| {
                ui.label("Volume:");
                ui.add(egui::Slider::new(&mut volume, 0.0..=1.0));
            });

            ui.add_space(20.0);

            // Beat lamps, lit when the audio clock reaches each click
            let sounded = self.follower.current().filter(|_| is_running);
            ui.horizontal(|ui| {
                for beat in 0..beats {
                    let (rect, _) =
                        ui.allocate_exact_size(egui::vec2(40.0, 40.0), egui::Sense::hover());
                    let color = match lamp(sounded, beat) {
                        Lamp::Accent => egui::Color32::from_rgb(220, 90, 60),
                        Lamp::Beat => egui::Color32::from_rgb(100, 200, 100),
                        Lamp::Off => egui::Color32::from_rgb(40, 40, 40),
                    };
                    ui.painter().circle_filled(rect.center(), 16.0, color);
                }
            });

            // Info
            ui.separator();
            if !self.backend.clock_ready() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "⚠ No audio output available - metronome is silent",
                );
            }
            if let Some(error) = &self.last_error {
                ui.colored_label(egui::Color32::LIGHT_RED, error.as_str());
            }
        });

        if bpm != self.tempo.bpm() {
            let result = self
                .tempo
                .set_bpm(bpm)
                .and_then(|()| self.backend.scheduler.update_tempo(bpm));
            self.report(result);
        }
        if beats != self.tempo.beats_per_measure() {
            let result = self
                .tempo
                .set_beats_per_measure(beats)
                .and_then(|()| self.backend.scheduler.update_time_signature(beats));
            self.report(result);
        }
        if accent != self.tempo.accent_first_beat() {
            self.tempo.set_accent_first_beat(accent);
            self.backend.scheduler.update_accent(accent);
        }
        if volume != self.tempo.volume() {
            let result = self
                .tempo
                .set_volume(volume)
                .and_then(|()| self.backend.scheduler.update_volume(volume));
            self.report(result);
        }

        if let Some(action) = action {
            self.apply(action);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_accepts_seconds() {
        assert_eq!(parse_duration("2.5"), Ok(2.5));
        assert_eq!(parse_duration("0"), Ok(0.0));
    }

    #[test]
    fn test_duration_rejects_unbounded_values() {
        for value in ["NaN", "inf", "-1", "soon"] {
            assert!(parse_duration(value).is_err(), "{} was accepted", value);
        }
    }

    #[test]
    fn test_cli_rejects_nan_duration() {
        let result = Cli::try_parse_from(["mtrnm", "--headless", "--duration", "NaN"]);
        assert!(result.is_err());
        let cli = Cli::try_parse_from(["mtrnm", "--headless", "--duration", "3"]).unwrap();
        assert_eq!(cli.duration, Some(3.0));
    }

    #[cfg(feature = "gui")]
    #[test]
    fn test_lamp_follows_the_sounded_click() {
        let downbeat = mtrnm::BeatEvent {
            time: 0.0,
            index: 4,
            beat_in_measure: 0,
            accent: false,
        };
        // Accent was switched off before this downbeat was scheduled.
        assert_eq!(lamp(Some(downbeat), 0), Lamp::Beat);
        assert_eq!(lamp(Some(downbeat), 1), Lamp::Off);

        let accented = mtrnm::BeatEvent {
            accent: true,
            ..downbeat
        };
        assert_eq!(lamp(Some(accented), 0), Lamp::Accent);
        assert_eq!(lamp(None, 0), Lamp::Off);
    }
}
