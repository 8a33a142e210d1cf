//! Cutroom CLI: inspect, plan, and render timeline projects.
//!
//! Usage:
//!   cutroom render <PROJECT>    Render a project file to MP4 or WebM
//!   cutroom plan <PROJECT>      Print the transcoder filter graph for a project
//!   cutroom info <PROJECT>      Show clip timing and project features
//!   cutroom check               Report which render strategies this host supports

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cutroom_project_model::{ContainerFormat, EngineChoice};

mod commands;

#[derive(Parser)]
#[command(
    name = "cutroom",
    about = "Render multi-track timeline projects to a single video file",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a project to a video file
    Render {
        /// Path to the project JSON file
        project: PathBuf,

        /// Output file (defaults to <name>-<timestamp>.<ext> in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Output height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Output framerate (defaults to the project framerate)
        #[arg(long)]
        fps: Option<f64>,

        /// Video bitrate in kbps
        #[arg(long, default_value = "8000")]
        bitrate: u32,

        /// Container: mp4, webm
        #[arg(short, long, default_value = "mp4")]
        format: ContainerFormat,

        /// Engine: auto, python, gpu, compatibility
        #[arg(short, long, default_value = "auto")]
        engine: EngineChoice,
    },

    /// Print the filter graph and transcoder arguments without running them
    Plan {
        /// Path to the project JSON file
        project: PathBuf,

        /// Output width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Output height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Container: mp4, webm
        #[arg(short, long, default_value = "mp4")]
        format: ContainerFormat,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show project information
    Info {
        /// Path to the project JSON file
        project: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check render capabilities of this host
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cutroom_common::config::AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    cutroom_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Render {
            project,
            output,
            width,
            height,
            fps,
            bitrate,
            format,
            engine,
        } => {
            commands::render::run(
                &config,
                commands::render::RenderArgs {
                    project,
                    output,
                    width,
                    height,
                    fps,
                    bitrate,
                    format,
                    engine,
                },
            )
            .await
        }
        Commands::Plan {
            project,
            width,
            height,
            format,
            json,
        } => commands::plan::run(&config, project, width, height, format, json),
        Commands::Info { project, json } => commands::info::run(project, json),
        Commands::Check => commands::check::run(&config).await,
    }
}
