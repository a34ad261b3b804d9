#![forbid(unsafe_code)]

//! Halo CLI tools: runtime probing, headset sessions, scripted simulation.

mod app;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use halo_xr::{DummyRuntime, XrConfig, XrContext, XrRuntime};
use halo_xr_openxr::OpenXrRuntime;

#[derive(Parser, Debug)]
#[command(name = "halo")]
#[command(about = "Halo XR session tools")]
struct Args {
    /// JSON configuration file (defaults apply to omitted fields)
    #[arg(short, long, global = true, env = "HALO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the runtime's api layers and extensions and resolve the system
    Probe,

    /// Run a session on the installed OpenXR runtime
    Run {
        /// Frames to render before requesting exit
        #[arg(short, long, default_value_t = 300)]
        frames: u64,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a session against the in-process dummy runtime
    Simulate {
        /// Frames to render before requesting exit
        #[arg(short, long, default_value_t = 90)]
        frames: u64,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,

    /// Show version information
    Version,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<XrConfig> {
    match path {
        Some(path) => XrConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(XrConfig::default()),
    }
}

fn probe(config: XrConfig) -> Result<()> {
    let runtime = OpenXrRuntime::load()?;

    println!("API layers:");
    for layer in runtime.enumerate_api_layers().map_err(anyhow::Error::msg)? {
        println!("  {layer}");
    }
    println!("Extensions:");
    for extension in runtime.enumerate_extensions().map_err(anyhow::Error::msg)? {
        println!("  {extension}");
    }

    let mut ctx = XrContext::new(runtime, config)?;
    ctx.setup().context("XR setup failed")?;
    if let Some(caps) = ctx.capabilities() {
        println!("Negotiated: {:?}", caps.extension_names());
    }
    if let Some(system) = ctx.system() {
        println!("Form factor:        {:?}", system.form_factor);
        println!("View configuration: {:?}", system.view_configuration.kind());
        for (index, view) in system.view_configuration.views().iter().enumerate() {
            println!(
                "  view {index}: {}x{} (max {}x{}), {} samples",
                view.recommended_width,
                view.recommended_height,
                view.max_width,
                view.max_height,
                view.recommended_sample_count
            );
        }
        println!("Blend mode:         {:?}", system.blend_mode);
    }
    ctx.shutdown();
    Ok(())
}

fn report(summary: &app::RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!(
            "Frames: {} rendered, {} begun, {} ended",
            summary.frames_rendered, summary.frames_begun, summary.frames_ended
        );
        println!("Events: {}", summary.events);
        println!("Swapchains created: {}", summary.swapchains_created);
        if summary.instance_lost {
            println!("Instance was lost");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Probe => probe(config)?,
        Command::Run { frames, json } => {
            let runtime = OpenXrRuntime::load()?;
            let mut ctx = XrContext::new(runtime, config)?;
            let summary = app::drive(&mut ctx, frames)?;
            report(&summary, json)?;
        }
        Command::Simulate { frames, json } => {
            let mut ctx = XrContext::new(DummyRuntime::new(), config)?;
            let summary = app::drive(&mut ctx, frames)?;
            report(&summary, json)?;
        }
        Command::Config => {
            println!("{}", config.to_json_string()?);
        }
        Command::Version => {
            println!("halo {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
