use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use sysinfo::System;
use vocab_audio::error::AppResult;
use vocab_audio::{AudioEngine, EngineConfig, Event, HostServices};

const LOG_TARGET_STARTUP: &str = "vocab_audio::startup";

/// Longest time the CLI waits for a sound to finish
const MAX_WAIT: Duration = Duration::from_secs(30);

/// Initialize tracing with file rotation
///
/// Logs are written to:
/// - macOS: ~/Library/Application Support/VocabAudio/logs/
/// - Windows: %APPDATA%/VocabAudio/logs/
/// - Linux: ~/.config/VocabAudio/logs/
///
/// Log output:
/// - Debug builds: Console + File
/// - Release builds: File only
fn initialize_tracing() {
    use tracing_appender::rolling;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = dirs::config_dir()
        .map(|dir| dir.join("VocabAudio").join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("logs"));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory: {}", e);
    }

    let file_appender = rolling::daily(&log_dir, "vocab-audio.log");

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true);

    #[cfg(debug_assertions)]
    {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(console_layer)
            .init();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();
    }

    tracing::info!("Log directory: {}", log_dir.display());
}

fn log_runtime_environment() {
    let version = env!("CARGO_PKG_VERSION");
    let os_name = System::long_os_version()
        .or_else(System::name)
        .unwrap_or_else(|| "Unknown OS".to_string());
    let kernel = System::kernel_version().unwrap_or_else(|| "Unknown Kernel".to_string());
    let architecture = std::env::consts::ARCH;

    tracing::info!(target: LOG_TARGET_STARTUP, "Starting vocab-audio v{} on ({})", version, architecture);
    tracing::info!(target: LOG_TARGET_STARTUP, "Operating System: {} (kernel {})", os_name, kernel);
}

struct Args {
    sound: bool,
    language: Option<String>,
    debug: bool,
    phrase: String,
}

fn parse_args() -> Option<Args> {
    let mut args = Args {
        sound: false,
        language: None,
        debug: false,
        phrase: String::new(),
    };
    let mut words = Vec::new();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--sound" => args.sound = true,
            "--debug" => args.debug = true,
            "--lang" => args.language = Some(iter.next()?),
            "-h" | "--help" => return None,
            _ => words.push(arg),
        }
    }
    args.phrase = words.join(" ");
    if args.phrase.trim().is_empty() {
        return None;
    }
    Some(args)
}

fn print_usage() {
    println!("Usage: vocab-audio [--sound] [--lang <code>] [--debug] <phrase...>");
    println!();
    println!("  --sound        play as a gameplay sound instead of a vocabulary word");
    println!("  --lang <code>  spoken language (en, tr, es, fr, de, it, pt)");
    println!("  --debug        print the engine state as JSON afterwards");
    println!();
    println!("Config: {}", EngineConfig::config_dir_display());
}

/// Block until no voice is registered, or `MAX_WAIT` passes
fn wait_for_silence(engine: &AudioEngine) {
    let started = Instant::now();
    while started.elapsed() < MAX_WAIT {
        if engine.debug_info().active_voices.is_empty() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    tracing::warn!("Still playing after {:?}, stopping", MAX_WAIT);
    engine.stop_all_audio();
}

fn main() -> AppResult<()> {
    initialize_tracing();
    log_runtime_environment();

    let Some(args) = parse_args() else {
        print_usage();
        return Ok(());
    };

    let config = EngineConfig::load().context("Failed to load configuration")?;
    let host = HostServices::native(&config);
    let engine = AudioEngine::new(config, host).context("Failed to start audio engine")?;

    let (events, _) = engine.subscribe();
    engine.initialize();
    // A terminal invocation is itself the user gesture
    engine.notify_user_interaction();

    if let Some(code) = &args.language {
        if !engine.set_language(code) {
            eprintln!("Unknown language code: {}", code);
        }
    }

    if args.sound {
        if !engine.play_sound(&args.phrase, None, None) {
            eprintln!("Could not play sound: {}", args.phrase);
        }
    } else {
        match engine.play_word(&args.phrase, None) {
            Some(method) => tracing::info!("Played {:?} via {}", args.phrase, method.as_str()),
            None => eprintln!("No audio available for: {}", args.phrase),
        }
    }
    wait_for_silence(&engine);

    for event in events.try_iter() {
        if let Event::Announcement { text } = &event {
            println!("{}", text);
        }
        tracing::debug!("{}", event.description());
    }

    if args.debug {
        let info = serde_json::to_string_pretty(&engine.debug_info())
            .context("Failed to serialize debug info")?;
        println!("{}", info);
    }

    engine.dispose();
    Ok(())
}
