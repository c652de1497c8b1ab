//! Sonar Sensor Agent CLI
//!
//! Ultrasonic hand movement sensor.

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::unbounded;
use std::path::{Path, PathBuf};
use sonar_sensor_agent::{
    collector::{ReplayConfig, WavCollector},
    config::{BandConfig, Config},
    core::{CalibrationError, CancellationToken, EpisodeEvent, SessionReport, SonarSession},
    transmitter::NullSink,
    VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sonar-sensor")]
#[command(version = VERSION)]
#[command(about = "Ultrasonic hand movement sensor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate, then emit the tone and report movement until Ctrl+C
    Start {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Measure the received tone level and print the derived threshold
    Calibrate {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run calibration and detection over a recorded mono WAV file
    Replay {
        /// Recording to analyse
        path: PathBuf,

        /// Feed the recording at its own pace instead of as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Do not write a session report
        #[arg(long)]
        no_export: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Emit a constant tone (until Ctrl+C) or a single linear sweep
    Tone {
        /// Tone frequency in Hz (defaults to the configured tone)
        #[arg(long)]
        freq: Option<f32>,

        /// Sweep from LOW to HIGH Hz instead of a constant tone
        #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
        sweep: Option<Vec<f32>>,

        /// Sweep duration in seconds
        #[arg(long, default_value = "2")]
        duration: f32,
    },

    /// Play a mono WAV file through the speaker
    Play {
        path: PathBuf,
    },

    /// Record the microphone to a mono WAV file (until Ctrl+C)
    Record {
        /// Output file (defaults to a timestamped file in the recordings directory)
        path: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<f32>,
    },

    /// Show configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Per-run overrides of the configuration file.
#[derive(Args, Clone, Default)]
struct Overrides {
    /// Frequency of the emitted tone in Hz
    #[arg(long)]
    tone_freq: Option<f32>,

    /// Frequency of the calibration tone in Hz
    #[arg(long)]
    calibration_freq: Option<f32>,

    /// Lower edge of the analysed band in Hz
    #[arg(long)]
    band_low: Option<f32>,

    /// Upper edge of the analysed band in Hz
    #[arg(long)]
    band_high: Option<f32>,

    /// Output amplitude (0-1)
    #[arg(long)]
    amplitude: Option<f32>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(freq) = self.tone_freq {
            config.tone_freq = freq;
        }
        if let Some(freq) = self.calibration_freq {
            config.calibration_freq = freq;
        }
        config.band = BandConfig {
            low_hz: self.band_low.unwrap_or(config.band.low_hz),
            high_hz: self.band_high.unwrap_or(config.band.high_hz),
        };
        if let Some(amp) = self.amplitude {
            config.amplitude = amp;
        }
    }
}

/// Exit code when calibration finds the tone too quiet.
const EXIT_CALIBRATION_FAILED: i32 = 2;

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { overrides } => cmd_start(&overrides),
        Commands::Calibrate { overrides } => cmd_calibrate(&overrides),
        Commands::Replay {
            path,
            realtime,
            no_export,
            overrides,
        } => cmd_replay(&path, realtime, !no_export, &overrides),
        Commands::Tone {
            freq,
            sweep,
            duration,
        } => cmd_tone(freq, sweep, duration),
        Commands::Play { path } => cmd_play(&path),
        Commands::Record { path, seconds } => cmd_record(path, seconds),
        Commands::Config { save } => cmd_config(save),
    };

    if let Err(e) = result {
        if let Some(CalibrationError::AmplitudeTooLow { .. }) = e.downcast_ref::<CalibrationError>() {
            eprintln!("Error: {e}");
            eprintln!("Please increase your output volume and try again.");
            std::process::exit(EXIT_CALIBRATION_FAILED);
        }
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(overrides: &Overrides) -> anyhow::Result<Config> {
    let mut config = Config::load().context("loading configuration")?;
    overrides.apply(&mut config);
    Ok(config)
}

fn cmd_replay(
    path: &Path,
    realtime: bool,
    export: bool,
    overrides: &Overrides,
) -> anyhow::Result<()> {
    let mut config = load_config(overrides)?;

    let mut collector = WavCollector::open(
        path,
        ReplayConfig {
            realtime,
            ..ReplayConfig::default()
        },
    )
    .with_context(|| format!("opening {path:?}"))?;

    if collector.sample_rate() != config.sample_rate {
        tracing::info!(
            file_rate = collector.sample_rate(),
            "Using the recording's sample rate"
        );
        config.sample_rate = collector.sample_rate();
    }

    let token = CancellationToken::new();
    ctrlc_handler(token.clone());
    let session = SonarSession::with_token(config.clone(), token)?;

    println!("Sonar Sensor Agent v{VERSION}");
    println!("Replaying {path:?}");
    print_band(&session);
    println!();

    collector.start()?;
    let input = collector.receiver().clone();

    let threshold = session.calibrate(
        &input,
        NullSink::paced(config.sample_rate),
        config.calibration_freq,
    )?;
    println!(
        "Calibration complete: threshold {:.3}",
        threshold.detection()
    );

    let (events_tx, events_rx) = unbounded();
    let summary = session.run_detection(&input, threshold, &events_tx);
    drop(events_tx);
    collector.stop();

    let episodes: Vec<EpisodeEvent> = events_rx.try_iter().collect();
    for episode in &episodes {
        print_episode(episode);
    }
    println!();
    println!(
        "Detection stopped ({:?}) after {} windows",
        summary.stop_reason, summary.windows
    );

    if export {
        export_report(&config, &session.report(Some(threshold), episodes));
    }

    println!();
    println!("{}", session.stats().summary());
    Ok(())
}

fn cmd_config(save: bool) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );

    match config.validate() {
        Ok(band) => println!(
            "\nAnalysis band: bins {}..{}",
            band.low_ind(),
            band.high_ind()
        ),
        Err(e) => eprintln!("\nWarning: {e}"),
    }

    if save {
        config.save()?;
        println!("Saved to {:?}", Config::config_path());
    }
    Ok(())
}

fn print_band(session: &SonarSession) {
    let band = session.band();
    let config = session.config();
    println!(
        "  Band: {:.0}-{:.0} Hz (bins {}..{})",
        config.band.low_hz,
        config.band.high_hz,
        band.low_ind(),
        band.high_ind()
    );
    println!("  Window: {} samples @ {} Hz", config.window_size, config.sample_rate);
}

fn print_episode(episode: &EpisodeEvent) {
    println!(
        "[{}] Movement: {} windows ({} ms)",
        episode.ended_at.format("%H:%M:%S"),
        episode.length,
        episode.duration_ms
    );
}

fn export_report(config: &Config, report: &SessionReport) {
    let export_path = config.export_path.join(format!(
        "session_{}.json",
        Utc::now().format("%Y%m%d_%H%M%S")
    ));

    if let Some(parent) = export_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match serde_json::to_string_pretty(report) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&export_path, json) {
                eprintln!("Error writing session report: {e}");
            } else {
                println!(
                    "Exported {} episodes to {:?}",
                    report.episodes.len(),
                    export_path
                );
            }
        }
        Err(e) => {
            eprintln!("Error serializing session report: {e}");
        }
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(token: CancellationToken) {
    if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
        tracing::warn!("Could not install Ctrl+C handler: {e}");
    }
}

#[cfg(feature = "device")]
mod live {
    use super::*;
    use crossbeam_channel::RecvTimeoutError;
    use sonar_sensor_agent::collector::{CollectorConfig, DeviceCollector};
    use sonar_sensor_agent::collector::record_to_wav;
    use sonar_sensor_agent::transmitter::{play_wav, DeviceOutput, SinkError, Transmitter};
    use std::time::Duration;

    /// Blocks buffered between the transmitter and the output callback.
    const OUTPUT_BLOCKS: usize = 8;

    fn open_input(config: &Config) -> anyhow::Result<DeviceCollector> {
        let mut collector = DeviceCollector::new(CollectorConfig {
            sample_rate: config.sample_rate,
            ..CollectorConfig::default()
        });
        collector.start()?;
        Ok(collector)
    }

    pub fn start(overrides: &Overrides) -> anyhow::Result<()> {
        let config = load_config(overrides)?;
        if let Err(e) = config.ensure_directories() {
            eprintln!("Warning: Could not create directories: {e}");
        }

        let token = CancellationToken::new();
        ctrlc_handler(token.clone());
        let session = SonarSession::with_token(config.clone(), token.clone())?;

        println!("Sonar Sensor Agent v{VERSION}");
        print_band(&session);
        println!("  Tone: {:.0} Hz", config.tone_freq);
        println!();

        let mut collector = open_input(&config)?;
        let output = DeviceOutput::open(config.sample_rate, OUTPUT_BLOCKS)?;
        let input = collector.receiver().clone();

        println!("Calibrating at {:.0} Hz...", config.calibration_freq);
        let (calibration, thresholds, tone) =
            session.spawn_calibration_with_tone(input.clone(), output.sink());
        let (detection, events) = session.spawn_detector(input, thresholds);

        let calibrated = match calibration.join() {
            Ok(result) => result,
            Err(_) => Err(CalibrationError::Cancelled),
        };

        let mut episodes = Vec::new();
        let threshold = match calibrated {
            Ok(threshold) => {
                println!("Calibration complete: threshold {:.3}", threshold.detection());
                println!("Press Ctrl+C to stop");
                println!();

                while !token.is_cancelled() {
                    match events.recv_timeout(config.batch_timeout) {
                        Ok(episode) => {
                            print_episode(&episode);
                            episodes.push(episode);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                session.stop();
                join_tone(tone);
                Some(threshold)
            }
            Err(e) => {
                session.stop();
                join_tone(tone);
                if detection.join().is_err() {
                    tracing::warn!("Detection worker panicked");
                }
                collector.stop();
                return Err(e.into());
            }
        };

        if let Ok(summary) = detection.join() {
            println!();
            println!(
                "Detection stopped ({:?}) after {} windows",
                summary.stop_reason, summary.windows
            );
        }
        episodes.extend(events.try_iter());

        println!();
        println!("Stopping...");
        collector.stop();
        session.stats().record_input_overflows(collector.overflows());
        drop(output);

        export_report(&config, &session.report(threshold, episodes));
        println!();
        println!("{}", session.stats().summary());
        Ok(())
    }

    fn join_tone(tone: std::thread::JoinHandle<Result<u64, SinkError>>) {
        match tone.join() {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Tone output stopped: {e}"),
            Err(_) => tracing::warn!("Tone worker panicked"),
        }
    }

    pub fn calibrate(overrides: &Overrides) -> anyhow::Result<()> {
        let config = load_config(overrides)?;
        let token = CancellationToken::new();
        ctrlc_handler(token.clone());
        let session = SonarSession::with_token(config.clone(), token)?;

        let mut collector = open_input(&config)?;
        let output = DeviceOutput::open(config.sample_rate, OUTPUT_BLOCKS)?;

        println!("Calibrating at {:.0} Hz...", config.calibration_freq);
        let result = session.calibrate(collector.receiver(), output.sink(), config.calibration_freq);
        collector.stop();
        drop(output);

        let threshold = result?;
        println!(
            "Reference amplitude: {:.2}",
            threshold.reference_amplitude().unwrap_or(0.0)
        );
        println!("Detection threshold: {:.3}", threshold.detection());
        println!("Difference threshold: {:.3}", threshold.difference());
        Ok(())
    }

    pub fn tone(freq: Option<f32>, sweep: Option<Vec<f32>>, duration: f32) -> anyhow::Result<()> {
        let config = Config::load().unwrap_or_default();
        let token = CancellationToken::new();
        ctrlc_handler(token.clone());

        let output = DeviceOutput::open(config.sample_rate, OUTPUT_BLOCKS)?;
        let mut transmitter = Transmitter::new(
            output.sink(),
            config.sample_rate,
            config.amplitude,
            config.window_size,
        );

        let written = match sweep.as_deref() {
            Some([low, high]) => {
                println!("Sweeping {low:.0}-{high:.0} Hz over {duration}s");
                transmitter.emit_sweep(*low, *high, Duration::from_secs_f32(duration.max(0.0)), &token)?
            }
            _ => {
                let freq = freq.unwrap_or(config.tone_freq);
                println!("Playing {freq:.0} Hz, press Ctrl+C to stop");
                transmitter.emit_constant(freq, &token)?
            }
        };
        drain(written.min(OUTPUT_BLOCKS as u64 * config.window_size as u64), config.sample_rate);
        Ok(())
    }

    pub fn play(path: &Path) -> anyhow::Result<()> {
        let config = Config::load().unwrap_or_default();
        let token = CancellationToken::new();
        ctrlc_handler(token.clone());

        let output = DeviceOutput::open(config.sample_rate, OUTPUT_BLOCKS)?;
        let mut sink = output.sink();
        let written = play_wav(path, &mut sink, config.window_size, config.sample_rate, &token)?;
        drain(written.min(OUTPUT_BLOCKS as u64 * config.window_size as u64), config.sample_rate);
        println!("Played {written} samples");
        Ok(())
    }

    pub fn record(path: Option<PathBuf>, seconds: Option<f32>) -> anyhow::Result<()> {
        let config = Config::load().unwrap_or_default();
        let path = match path {
            Some(path) => path,
            None => {
                config.ensure_directories()?;
                config.recording_path.join(format!(
                    "recording_{}.wav",
                    Utc::now().format("%Y%m%d_%H%M%S")
                ))
            }
        };

        let token = CancellationToken::new();
        ctrlc_handler(token.clone());
        let mut collector = open_input(&config)?;

        match seconds {
            Some(secs) => println!("Recording {secs}s to {path:?}"),
            None => println!("Recording to {path:?}, press Ctrl+C to stop"),
        }
        let max_samples = seconds.map(|secs| (secs.max(0.0) as f64 * config.sample_rate as f64) as usize);
        let result = record_to_wav(
            collector.receiver(),
            &path,
            config.sample_rate,
            max_samples,
            config.batch_timeout,
            &token,
        );
        collector.stop();

        let written = result.with_context(|| format!("writing {path:?}"))?;
        println!("Recorded {written} samples");
        if collector.overflows() > 0 {
            eprintln!(
                "Warning: {} input batches were lost",
                collector.overflows()
            );
        }
        Ok(())
    }

    /// Give the output callback time to play what is still queued.
    fn drain(queued_samples: u64, sample_rate: u32) {
        if sample_rate > 0 {
            std::thread::sleep(Duration::from_secs_f64(
                queued_samples as f64 / sample_rate as f64,
            ));
        }
    }
}

#[cfg(feature = "device")]
fn cmd_start(overrides: &Overrides) -> anyhow::Result<()> {
    live::start(overrides)
}

#[cfg(feature = "device")]
fn cmd_calibrate(overrides: &Overrides) -> anyhow::Result<()> {
    live::calibrate(overrides)
}

#[cfg(feature = "device")]
fn cmd_tone(freq: Option<f32>, sweep: Option<Vec<f32>>, duration: f32) -> anyhow::Result<()> {
    live::tone(freq, sweep, duration)
}

#[cfg(feature = "device")]
fn cmd_play(path: &Path) -> anyhow::Result<()> {
    live::play(path)
}

#[cfg(feature = "device")]
fn cmd_record(path: Option<PathBuf>, seconds: Option<f32>) -> anyhow::Result<()> {
    live::record(path, seconds)
}

#[cfg(not(feature = "device"))]
fn device_disabled() -> anyhow::Error {
    anyhow::anyhow!("audio devices unavailable (built without the `device` feature)")
}

#[cfg(not(feature = "device"))]
fn cmd_start(_overrides: &Overrides) -> anyhow::Result<()> {
    Err(device_disabled())
}

#[cfg(not(feature = "device"))]
fn cmd_calibrate(_overrides: &Overrides) -> anyhow::Result<()> {
    Err(device_disabled())
}

#[cfg(not(feature = "device"))]
fn cmd_tone(_freq: Option<f32>, _sweep: Option<Vec<f32>>, _duration: f32) -> anyhow::Result<()> {
    Err(device_disabled())
}

#[cfg(not(feature = "device"))]
fn cmd_play(_path: &Path) -> anyhow::Result<()> {
    Err(device_disabled())
}

#[cfg(not(feature = "device"))]
fn cmd_record(_path: Option<PathBuf>, _seconds: Option<f32>) -> anyhow::Result<()> {
    Err(device_disabled())
}
