//! CLI entry point for the SPIM live console.
//!
//! Runs the console headless against the simulated instrument described in the
//! `[simulated]` configuration section.
//!
//! # Usage
//!
//! Stream one camera for five seconds:
//! ```bash
//! spim_live live --camera cam0 --seconds 5
//! ```
//!
//! Take a snapshot and save it:
//! ```bash
//! spim_live snapshot --camera cam0 --save-to /tmp/snapshots
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spim_live::config::ConsoleConfig;
use spim_live::console::{LiveConsole, PointerButton};
use spim_live::hardware::instrument::Acquisition;
use spim_live::hardware::mock::simulated_instrument;
use spim_live::logging::{self, OutputFormat, TracingConfig};
use spim_live::sink::DisplayKey;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "spim_live")]
#[command(about = "Live operator console for a light-sheet microscope", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "config/console.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a camera live, then stop
    Live {
        /// Camera name
        #[arg(long, default_value = "cam0")]
        camera: String,

        /// How long to stream
        #[arg(long, default_value = "5")]
        seconds: u64,

        /// Live wavelength, overriding the configuration
        #[arg(long)]
        wavelength: Option<String>,
    },

    /// Take one frame
    Snapshot {
        /// Camera name
        #[arg(long, default_value = "cam0")]
        camera: String,

        /// Folder to save the frame to as TIFF
        #[arg(long)]
        save_to: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConsoleConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let level = logging::parse_log_level(&config.application.log_level)?;
    logging::init(TracingConfig::new(level).with_format(cli.log_format))?;

    let instrument = Arc::new(simulated_instrument(&config.simulated));
    let acquisition = Arc::new(Acquisition::from_config(&config)?);
    let mut console = LiveConsole::start(&config, instrument, acquisition)?;

    match cli.command {
        Commands::Live {
            camera,
            seconds,
            wavelength,
        } => {
            if let Some(wavelength) = wavelength {
                console.set_wavelength(wavelength);
            }
            run_live(&mut console, &camera, Duration::from_secs(seconds)).await?;
        }
        Commands::Snapshot { camera, save_to } => {
            run_snapshot(&mut console, &camera, save_to).await?;
        }
    }

    for report in console.shutdown().await? {
        tracing::info!(camera = %report.camera, outcome = ?report.outcome, "session closed at shutdown");
    }
    Ok(())
}

async fn run_live(console: &mut LiveConsole, camera: &str, duration: Duration) -> Result<()> {
    console.press_live(camera).await?;
    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::timeout_at(deadline, console.next_event())
        .await
        .unwrap_or(false)
    {}

    // The toggle stays disabled for its cooldown after the first press.
    while console
        .live_toggle(camera)
        .is_some_and(|toggle| !toggle.is_enabled(tokio::time::Instant::now()))
    {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    console.press_live(camera).await?;
    console.pump();

    let key = DisplayKey::new(camera, console.controller().wavelength());
    if let Some(entry) = console.sink().entry(&key) {
        println!(
            "{}: {} frames displayed, last frame #{}",
            key.layer_name(),
            entry.updates,
            entry.image.frame_number
        );
    }
    for (stage, readout) in console.sink().stages() {
        println!("{stage}: {readout:?}");
    }
    Ok(())
}

async fn run_snapshot(
    console: &mut LiveConsole,
    camera: &str,
    save_to: Option<PathBuf>,
) -> Result<()> {
    console.press_snapshot(camera).await?;
    console.controller().wait_until_idle(camera).await?;
    console.pump();

    let key = DisplayKey::new(camera, console.controller().wavelength());
    match console.on_layer_clicked(&key, PointerButton::Secondary, |_| save_to)? {
        Some(path) => println!("Saved {}", path.display()),
        None => println!("Snapshot displayed as '{}', not saved", key.layer_name()),
    }
    Ok(())
}
