//! Render a project to a video file.

use std::path::PathBuf;

use cutroom_common::config::AppConfig;
use cutroom_common::error::CutroomError;
use cutroom_project_model::{ContainerFormat, EngineChoice, Project, RenderSettings};
use cutroom_render_engine::{
    progress_channel, render_project, CancelFlag, RenderContext, RenderStage,
};

pub struct RenderArgs {
    pub project: PathBuf,
    pub output: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub bitrate: u32,
    pub format: ContainerFormat,
    pub engine: EngineChoice,
}

pub async fn run(config: &AppConfig, args: RenderArgs) -> anyhow::Result<()> {
    let project = Project::load(&args.project)
        .map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;

    let settings = RenderSettings {
        width: args.width,
        height: args.height,
        bitrate: args.bitrate,
        framerate: args.fps.unwrap_or(project.framerate),
        format: args.format,
        engine: args.engine,
    };
    let output_path = args
        .output
        .unwrap_or_else(|| default_output(&project.name, settings.format));

    println!("Rendering project: {}", project.name);
    println!("  Output: {}", output_path.display());
    println!(
        "  Settings: {}x{} @ {}fps, {} kbps, {}",
        settings.width,
        settings.height,
        settings.framerate,
        settings.bitrate,
        settings.format.extension()
    );
    println!("  Engine: {}", settings.engine.as_str());

    tracing::info!(
        project = %project.name,
        output = %output_path.display(),
        engine = settings.engine.as_str(),
        "Render requested"
    );
    let ctx = RenderContext::from_config(config);
    tracing::debug!(context = ?ctx, capabilities = ?ctx.capabilities(), "Render context ready");
    let (sink, mut rx) = progress_channel();
    let cancel = CancelFlag::new();

    let watcher = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling render");
            println!("\n  Cancelling...");
            watcher.cancel();
        }
    });

    let printer = async {
        let mut last_stage = None;
        while let Some(p) = rx.recv().await {
            if last_stage.is_some() && last_stage != Some(p.stage) {
                println!();
            }
            last_stage = Some(p.stage);
            match p.stage {
                RenderStage::Complete => println!("  {}", p.message),
                RenderStage::Failed => println!("  Failed: {}", p.message),
                stage => print!("\r  {stage:?}: {:>3}% {}          ", p.progress, p.message),
            }
        }
    };

    let render = async {
        let result = render_project(&ctx, &project, &settings, &sink, &cancel).await;
        // Close the channel so the printer finishes.
        drop(sink);
        result
    };

    let (result, ()) = tokio::join!(render, printer);
    ctrl_c.abort();

    match result {
        Ok(out) => {
            std::fs::write(&output_path, &out.bytes)?;
            println!(
                "\nRender complete: {} ({} bytes, {}, via {})",
                output_path.display(),
                out.bytes.len(),
                out.mime,
                out.strategy
            );
            Ok(())
        }
        Err(CutroomError::Cancelled) => {
            println!("\nRender cancelled.");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("Render failed: {e}")),
    }
}

fn default_output(name: &str, format: ContainerFormat) -> PathBuf {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = if stem.is_empty() { "render".to_string() } else { stem };
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    PathBuf::from(format!("{stem}-{stamp}.{}", format.extension()))
}
