mod device;
mod display;

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use clap::{Parser, Subcommand};
use metronome_core::{
    catalog, encode_wav, synth, AssetCache, AudioOutput, CacheLocation, ClickKind,
    EngineBuilder, EngineConfig, EngineEvent, FixedCacheLocation, ManualTimer, MetronomeEngine,
    SystemCacheLocation, TimeSignature,
};
use tracing_subscriber::EnvFilter;

use crate::{
    device::DeviceOutput,
    display::{describe, TerminalOutput},
};

fn main() -> metronome_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run {
            bpm,
            signature,
            seconds,
            json,
        } => run_live(
            builder(config, cli.cache_dir.as_deref()),
            bpm,
            signature,
            seconds,
            json,
        ),
        Commands::Simulate {
            bpm,
            signature,
            beats,
        } => run_simulation(builder(config, cli.cache_dir.as_deref()), bpm, signature, beats),
        Commands::Signatures => {
            for signature in catalog() {
                println!("{:<5} {}", signature.to_string(), signature.name());
            }
            Ok(())
        }
        Commands::Cache { action } => {
            let cache = AssetCache::at_location(
                location(cli.cache_dir.as_deref()).as_ref(),
                &config.cache.subdirectory,
            )?;
            match action {
                CacheAction::Size => {
                    println!("{} bytes in {}", cache.size(), cache.root().display());
                    Ok(())
                }
                CacheAction::Clear => {
                    cache.clear()?;
                    println!("cleared {}", cache.root().display());
                    Ok(())
                }
            }
        }
        Commands::Render { accent, output } => render(&config, accent, &output),
    }
}

fn run_live(
    builder: EngineBuilder,
    bpm: i32,
    signature: TimeSignature,
    seconds: f64,
    json: bool,
) -> metronome_core::Result<()> {
    let device = DeviceOutput::new();
    let engine = match device.activate() {
        Ok(()) => builder.output(device),
        Err(err) => {
            tracing::warn!(%err, "no usable audio device, drawing beats only");
            builder.output(TerminalOutput)
        }
    }
    .build()?;
    engine.set_bpm(bpm);
    engine.set_time_signature(signature);
    if i64::from(engine.bpm()) != i64::from(bpm) {
        tracing::warn!(requested = bpm, using = engine.bpm(), "tempo clamped");
    }
    tracing::info!(bpm = engine.bpm(), signature = %engine.time_signature(), seconds, "starting");

    let beats = engine.time_signature().beats();
    engine.subscribe(move |event| {
        if json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::warn!(%err, "could not serialise event"),
            }
        } else if let Some(line) = describe(event, beats) {
            println!("{line}");
        }
    });

    engine.start();
    std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
    engine.stop();
    Ok(())
}

fn run_simulation(
    builder: EngineBuilder,
    bpm: i32,
    signature: TimeSignature,
    beats: usize,
) -> metronome_core::Result<()> {
    let timers = ManualTimer::new();
    let engine = builder.timers(timers.clone()).build()?;
    engine.set_bpm(bpm);
    engine.set_time_signature(signature);

    let clicks = Arc::new(Mutex::new(Vec::new()));
    {
        let clicks = Arc::clone(&clicks);
        let timers = timers.clone();
        engine.subscribe(move |event| {
            if let EngineEvent::Click { beat, accent } = event {
                if let Ok(mut clicks) = clicks.lock() {
                    clicks.push((timers.now(), *beat, *accent));
                }
            }
        });
    }

    engine.start();
    let period = engine.tick_period();
    for _ in 1..beats {
        timers.advance(period);
    }
    engine.stop();

    let measure = engine.time_signature().beats();
    let clicks = clicks.lock().map(|c| c.clone()).unwrap_or_default();
    for (at, beat, accent) in clicks.into_iter().take(beats) {
        let line = describe(&EngineEvent::Click { beat, accent }, measure).unwrap_or_default();
        println!("{:>9.3}s {line}", at.as_secs_f64());
    }
    Ok(())
}

fn render(config: &EngineConfig, accent: bool, output: &Path) -> metronome_core::Result<()> {
    let kind = ClickKind::for_accent(accent);
    let samples = synth::synthesize(kind, &config.sound);
    let bytes = encode_wav(&samples, config.sound.sample_rate)?;
    std::fs::write(output, &bytes)?;
    tracing::info!(?kind, bytes = bytes.len(), output = %output.display(), "click rendered");
    Ok(())
}

fn location(cache_dir: Option<&Path>) -> Box<dyn CacheLocation> {
    match cache_dir {
        Some(dir) => Box::new(FixedCacheLocation(dir.to_path_buf())),
        None => Box::new(SystemCacheLocation),
    }
}

fn builder(config: EngineConfig, cache_dir: Option<&Path>) -> EngineBuilder {
    let builder = MetronomeEngine::builder().config(config);
    match cache_dir {
        Some(dir) => builder.cache_location(FixedCacheLocation(dir.to_path_buf())),
        None => builder,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Metronome with synthesized, cached clicks", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Keep cached sounds below this directory instead of the user cache.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play in real time on the default audio device, drawing every beat.
    Run {
        /// Tempo in beats per minute; clamped to the configured range.
        #[arg(short, long, default_value_t = 120, allow_negative_numbers = true)]
        bpm: i32,
        /// Time signature as `beats/note`, e.g. `3/4`.
        #[arg(short, long, default_value = "4/4")]
        signature: TimeSignature,
        /// How long to play.
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Print engine events as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Print the click timeline instantly using virtual time.
    Simulate {
        #[arg(short, long, default_value_t = 120, allow_negative_numbers = true)]
        bpm: i32,
        #[arg(short, long, default_value = "4/4")]
        signature: TimeSignature,
        /// Number of clicks to print.
        #[arg(long, default_value_t = 8)]
        beats: usize,
    },
    /// List the predefined time signatures.
    Signatures,
    /// Inspect or clear the sound cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Write one synthesized click as a WAVE file.
    Render {
        /// Render the accented (downbeat) click.
        #[arg(long)]
        accent: bool,
        /// Destination file.
        output: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Print the bytes used by cached sounds.
    Size,
    /// Delete every cached sound.
    Clear,
}
