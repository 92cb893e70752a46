//! mixdown-play - headless session player
//!
//! Loads a session file, waits for its stems to load, plays the track once
//! through the default output device and exits when playback stops.
//!
//! ```text
//! mixdown-play <session.yaml> [--config <config.yaml>]
//! ```
//!
//! Relative stem paths resolve against `stems.base_dir` from the config, or
//! the session file's directory when that is unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mixdown_core::audio::start_output;
use mixdown_core::config::{default_config_path, load_config, EngineConfig};
use mixdown_core::engine::Mixer;
use mixdown_core::events::EngineEvent;
use mixdown_core::session::Session;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Args {
    session: PathBuf,
    config: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut session = None;
    let mut config = None;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(
                    args.next().context("--config needs a path")?,
                ))
            }
            _ if session.is_none() => session = Some(PathBuf::from(arg)),
            other => bail!("Unexpected argument {:?}", other),
        }
    }

    Ok(Args {
        session: session.context("Usage: mixdown-play <session.yaml> [--config <config.yaml>]")?,
        config: config.unwrap_or_else(default_config_path),
    })
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let mut config: EngineConfig = load_config(&args.config);
    if config.stems.base_dir.is_none() {
        config.stems.base_dir = args.session.parent().map(Path::to_path_buf);
    }

    let session = Session::load(&args.session)?;
    let mixer = Mixer::new(&config);
    session.apply(&mixer)?;

    log::info!("Loading {} stem(s)", session.stems.len());
    let pending = |mixer: &Mixer| {
        session
            .stems
            .iter()
            .filter(|s| !mixer.stem_ready(s.id) && !mixer.stem_error(s.id))
            .count()
    };
    while pending(&mixer) > 0 {
        std::thread::sleep(POLL_INTERVAL);
    }

    let failed = session.stems.iter().filter(|s| mixer.stem_error(s.id)).count();
    if failed > 0 {
        log::warn!("{} stem(s) failed to load and will be silent", failed);
    }

    let _output = start_output(mixer.buffer())?;
    mixer.play();
    log::info!(
        "Playing {:.1}s at {} BPM",
        session.track_length as f64 / mixer.sample_rate() as f64,
        mixer.track_bpm()
    );

    let mut last_bar = 0;
    loop {
        for event in mixer.events().try_iter() {
            match event {
                EngineEvent::PlaybackStopped => {
                    log::info!("Playback finished");
                    // Let the queued tail reach the device
                    let queued = config.buffer_samples as f64 / mixer.sample_rate() as f64;
                    std::thread::sleep(Duration::from_secs_f64(queued) + POLL_INTERVAL);
                    return Ok(());
                }
                EngineEvent::StemFailed { id, error } => log::warn!("Stem {}: {}", id, error),
                _ => {}
            }
        }

        let position = mixer.playback_position_bst();
        if position.bar != last_bar {
            last_bar = position.bar;
            log::info!(
                "Bar {} | L {:.1} dB R {:.1} dB | limiter {:.1} dB",
                position.bar,
                mixer.left_channel_out_db(),
                mixer.right_channel_out_db(),
                mixer.limiter_reduction_db()
            );
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
