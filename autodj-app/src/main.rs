//! autodj - plays a music folder back to back with automated DJ transitions
//!
//! Reads line commands from stdin while the pipeline runs; see `commands`.

mod commands;

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Receiver;
use tracing_subscriber::EnvFilter;

use autodj_analysis::HeuristicAdvisor;
use autodj_audio::{
    AudioEngineHandle, NativeEngine, PipelineEvent, PlaybackPipeline, SharedEngine,
    SimulatedEngine, TrackId, TrackUpdate,
};
use autodj_library::{Config, LearningStore, LibraryScanner, ScanConfig, ScanEvent, TrackLoader};

use commands::{Command, HELP};

/// Control loop period
const TICK: Duration = Duration::from_millis(50);

/// Virtual seconds per tick in simulation
const SIMULATED_STEP_SECS: f64 = 1.0;

/// Length assumed for simulated tracks until metadata reports one
const SIMULATED_TRACK_SECS: f64 = 90.0;

#[derive(Parser)]
#[command(name = "autodj")]
#[command(about = "Autonomous DJ: back-to-back playback with automated transitions", long_about = None)]
struct Cli {
    /// Music folder (defaults to the configured one)
    folder: Option<PathBuf>,

    /// Run against a simulated engine on a fast virtual clock
    #[arg(long)]
    simulate: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autodj=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load();

    let folder = cli
        .folder
        .clone()
        .or_else(|| config.music_folder.clone())
        .context("no music folder given and none configured")?;

    let scanner = LibraryScanner::new(ScanConfig {
        directory: folder.clone(),
        detect_bpm: !cli.simulate,
        ..ScanConfig::default()
    });
    let playlist = scanner.playlist();
    if playlist.is_empty() {
        bail!("no audio files found in {}", folder.display());
    }
    // Resolution keeps running in the background; its results are applied as they arrive
    let (scan_rx, _scan_handle) = scanner.resolve_async(&playlist);

    if config.music_folder.as_ref() != Some(&folder) {
        config.music_folder = Some(folder);
        if let Err(e) = config.save() {
            tracing::warn!(error = %e, "could not save config");
        }
    }

    let mut store = open_store(&config);
    let advisor = match store.as_ref().map(LearningStore::load) {
        Some(Ok(snapshot)) => {
            tracing::info!(entries = snapshot.entries.len(), "advisor learning restored");
            HeuristicAdvisor::with_learning(snapshot)
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "stored learning unreadable, starting fresh");
            HeuristicAdvisor::new()
        }
        None => HeuristicAdvisor::new(),
    };

    let locators: HashMap<TrackId, String> = playlist
        .iter()
        .map(|t| (t.id, t.locator.clone()))
        .collect();
    let commands = spawn_stdin_reader();
    let session = Session {
        scan_rx: &scan_rx,
        commands: &commands,
        locators: &locators,
    };
    println!("{HELP}");

    let pipeline_config = config.pipeline_config();
    if cli.simulate {
        let mut engine = SimulatedEngine::new();
        engine.set_default_duration(Some(SIMULATED_TRACK_SECS));
        let mut pipeline = PlaybackPipeline::new(engine, pipeline_config, playlist).with_advisor(advisor);
        session.run(
            &mut pipeline,
            |engine, locator, update| {
                if let Some(secs) = update.duration_secs {
                    engine.set_duration(locator, secs);
                }
            },
            |engine| engine.advance(SIMULATED_STEP_SECS),
        );
        save_learning(store.as_mut(), pipeline.advisor());
    } else {
        let (stream, engine) = open_output()?;
        let mut pipeline = PlaybackPipeline::new(engine, pipeline_config, playlist).with_advisor(advisor);
        session.run(&mut pipeline, |_, _, _| {}, |_| {});
        drop(stream);
        save_learning(store.as_mut(), pipeline.advisor());
    }

    Ok(())
}

/// Channels the control loop listens on
struct Session<'a> {
    scan_rx: &'a Receiver<ScanEvent>,
    commands: &'a Receiver<Command>,
    locators: &'a HashMap<TrackId, String>,
}

impl Session<'_> {
    /// Drive the pipeline until quit or until the music stops
    fn run<E: AudioEngineHandle>(
        &self,
        pipeline: &mut PlaybackPipeline<E>,
        mut on_update: impl FnMut(&mut E, &str, &TrackUpdate),
        mut step: impl FnMut(&mut E),
    ) {
        pipeline.start();

        loop {
            for command in self.commands.try_iter() {
                if !apply_command(pipeline, command) {
                    return;
                }
            }

            for event in self.scan_rx.try_iter() {
                match event {
                    ScanEvent::Update(id, update) => {
                        if let Some(locator) = self.locators.get(&id) {
                            on_update(pipeline.engine_mut(), locator, &update);
                        }
                        pipeline.update_track(id, &update);
                    }
                    ScanEvent::Failed { id, message } => {
                        tracing::debug!(id = id.0, %message, "track keeps default tempo");
                    }
                    ScanEvent::Complete { resolved, failed } => {
                        tracing::info!(resolved, failed, "library resolved");
                    }
                }
            }

            step(pipeline.engine_mut());
            pipeline.tick();

            for event in pipeline.take_events() {
                log_event(&event);
                if event == PipelineEvent::Stopped {
                    return;
                }
            }

            thread::sleep(TICK);
        }
    }
}

/// Returns false on quit
fn apply_command<E: AudioEngineHandle>(pipeline: &mut PlaybackPipeline<E>, command: Command) -> bool {
    match command {
        Command::TogglePlayPause => pipeline.toggle_play_pause(),
        Command::TransitionNow => {
            if let Err(reason) = transition_now(pipeline) {
                println!("{reason}");
            }
        }
        Command::ShowSongs => {
            for (i, song) in pipeline.display_songs().iter().enumerate() {
                let marker = match i {
                    0 => ">",
                    1 => "+",
                    _ => " ",
                };
                println!(
                    "{marker} {} - {} [{}/{}] {:.0}%",
                    song.title, song.artists, song.current_time, song.duration, song.progress
                );
            }
        }
        Command::Rate(rating) => {
            if !pipeline.provide_feedback(rating, None) {
                println!("nothing to rate yet");
            }
        }
        Command::React(reaction) => {
            if !pipeline.react_to_transition(reaction) {
                println!("no transition to react to yet");
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn transition_now<E: AudioEngineHandle>(pipeline: &mut PlaybackPipeline<E>) -> Result<(), &'static str> {
    if pipeline.transition().is_some_and(|s| !s.completed) {
        return Err("a transition is already running");
    }
    if pipeline.trigger_transition() {
        Ok(())
    } else {
        Err("cannot start a transition right now")
    }
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::TrackStarted { id, title } => {
            tracing::info!(id = id.0, %title, "now playing");
        }
        PipelineEvent::TransitionTriggered {
            remaining_secs,
            duration_secs,
        } => tracing::info!(remaining_secs, duration_secs, "transition triggered"),
        PipelineEvent::TransitionCompleted { forced } => {
            tracing::info!(forced, "transition completed");
        }
        PipelineEvent::DropDetected { at_secs } => tracing::info!(at_secs, "drop"),
        PipelineEvent::LoadFailed { id, reason } => {
            tracing::warn!(id = id.0, %reason, "track failed to load");
        }
        PipelineEvent::PlaybackFailed { id, reason } => {
            tracing::warn!(id = id.0, %reason, "track failed to play");
        }
        PipelineEvent::Stopped => tracing::info!("queue exhausted, stopping"),
        other => tracing::debug!(event = ?other, "pipeline"),
    }
}

/// Default output device driving a shared native engine
fn open_output() -> anyhow::Result<(cpal::Stream, SharedEngine)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("no audio output device found")?;
    let config = device
        .default_output_config()
        .context("failed to get audio config")?;

    let sample_rate = config.sample_rate().0;
    let channels = (config.channels() as usize).max(1);
    let engine = SharedEngine::new(NativeEngine::new(sample_rate, TrackLoader::new()));
    let callback_engine = engine.clone();

    // Stereo scratch for non-stereo devices, grown only if a callback asks for more
    let mut stereo = vec![0.0f32; 16384];

    let stream = device
        .build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if channels == 2 {
                    callback_engine.render(data);
                    return;
                }
                let needed = data.len() / channels * 2;
                if stereo.len() < needed {
                    stereo.resize(needed, 0.0);
                }
                let stereo = &mut stereo[..needed];
                callback_engine.render(stereo);
                for (frame, pair) in data.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                    if channels == 1 {
                        frame[0] = (pair[0] + pair[1]) * 0.5;
                    } else {
                        frame[..2].copy_from_slice(pair);
                        frame[2..].fill(0.0);
                    }
                }
            },
            |err| tracing::error!(error = %err, "audio stream error"),
            None,
        )
        .context("failed to create audio stream")?;
    stream.play().context("failed to start audio")?;

    tracing::info!(sample_rate, channels, "audio output running");
    Ok((stream, engine))
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match Command::parse(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("{HELP}"),
            }
        }
    });
    rx
}

fn open_store(config: &Config) -> Option<LearningStore> {
    if !config.learning_enabled {
        return None;
    }
    let path = Config::learning_db_path()?;
    match LearningStore::open(&path) {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "learning store unavailable");
            None
        }
    }
}

fn save_learning(store: Option<&mut LearningStore>, advisor: &HeuristicAdvisor) {
    let Some(store) = store else {
        return;
    };
    match store.save(&advisor.learning_snapshot()) {
        Ok(()) => tracing::info!(entries = advisor.learning_len(), "advisor learning saved"),
        Err(e) => tracing::warn!(error = %e, "could not save advisor learning"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autodj_audio::{PipelineConfig, Track};

    fn pipeline(locators: &[&str]) -> PlaybackPipeline<SimulatedEngine> {
        let mut engine = SimulatedEngine::new();
        engine.set_default_duration(Some(120.0));
        let playlist = locators
            .iter()
            .enumerate()
            .map(|(i, l)| Track::new(TrackId(i as u64), *l))
            .collect();
        let config = PipelineConfig {
            seed: Some(3),
            ..PipelineConfig::default()
        };
        PlaybackPipeline::new(engine, config, playlist)
    }

    #[test]
    fn test_transition_now() {
        let mut p = pipeline(&["a.mp3", "b.mp3"]);
        p.start();
        assert_eq!(transition_now(&mut p), Ok(()));
        assert_eq!(transition_now(&mut p), Err("a transition is already running"));
    }

    #[test]
    fn test_transition_now_while_paused() {
        let mut p = pipeline(&["a.mp3", "b.mp3"]);
        p.start();
        p.toggle_play_pause();
        assert_eq!(transition_now(&mut p), Err("cannot start a transition right now"));
    }
}
