//! Render entry point and the strategy fallback chain.

use cutroom_common::error::{CutroomError, CutroomResult, ErrorClass};
use cutroom_project_model::{EngineChoice, Project, ProjectFeatures, RenderSettings};

use crate::cancel::CancelFlag;
use crate::context::RenderContext;
use crate::filter_graph::render_filter_graph;
use crate::progress::{ProgressSink, RenderStage};
use crate::selector::{plan, Strategy};
use crate::streaming::render_streaming;

/// A finished render.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub bytes: Vec<u8>,

    /// `video/mp4` or `video/webm`.
    pub mime: &'static str,

    /// Strategy that produced the bytes.
    pub strategy: Strategy,
}

/// Render `project` with `settings`.
///
/// Walks the strategies the selector returns. Configuration errors and
/// cancellation stop the walk immediately; any other error moves on to the
/// next strategy unless the engine was pinned. On failure the progress
/// sink's last message carries the error text; cancellation reports nothing.
pub async fn render_project(
    ctx: &RenderContext,
    project: &Project,
    settings: &RenderSettings,
    progress: &ProgressSink,
    cancel: &CancelFlag,
) -> CutroomResult<RenderOutput> {
    let result = run_chain(ctx, project, settings, progress, cancel).await;
    match &result {
        Ok(output) => {
            tracing::info!(
                strategy = %output.strategy,
                bytes = output.bytes.len(),
                mime = output.mime,
                "Render complete"
            );
            progress.complete(format!("Rendered with {}", output.strategy));
        }
        Err(CutroomError::Cancelled) => {
            tracing::info!("Render cancelled");
        }
        Err(err) => {
            tracing::error!(error = %err, "Render failed");
            progress.fail(err.to_string());
        }
    }
    result
}

async fn run_chain(
    ctx: &RenderContext,
    project: &Project,
    settings: &RenderSettings,
    progress: &ProgressSink,
    cancel: &CancelFlag,
) -> CutroomResult<RenderOutput> {
    progress.report(RenderStage::Preparing, 0, "Validating project");
    cancel.check()?;

    settings.validate().map_err(CutroomError::config)?;
    project
        .ensure_valid()
        .map_err(|e| CutroomError::project(e.to_string()))?;
    let duration = project.duration();
    if duration <= 0.0 {
        return Err(CutroomError::project("Project has no clips to render"));
    }

    let features = ProjectFeatures::detect(project);
    let caps = ctx.capabilities();
    let strategies = plan(settings.engine, features, caps, settings.format)?;
    let pinned = settings.engine != EngineChoice::Auto;

    tracing::info!(
        project = %project.name,
        duration,
        engine = settings.engine.as_str(),
        strategies = ?strategies,
        has_audio = features.has_audio,
        has_text = features.has_text_overlay,
        has_framing = features.has_transform_or_crop,
        "Starting render"
    );
    progress.report(RenderStage::Preparing, 100, "Render planned");

    let mut last_error = None;
    for strategy in strategies {
        cancel.check()?;
        tracing::info!(strategy = %strategy, "Trying render strategy");
        progress.restart();

        match run_strategy(strategy, ctx, project, settings, progress, cancel).await {
            Ok(bytes) => {
                if bytes.is_empty() {
                    last_error = Some(CutroomError::render(format!(
                        "{strategy} produced an empty output"
                    )));
                    if pinned {
                        break;
                    }
                    continue;
                }
                return Ok(RenderOutput {
                    bytes,
                    mime: settings.format.mime(),
                    strategy,
                });
            }
            Err(err) => match err.class() {
                ErrorClass::Cancelled | ErrorClass::Configuration => return Err(err),
                _ if pinned => return Err(err),
                class => {
                    tracing::warn!(
                        strategy = %strategy,
                        error = %err,
                        class = ?class,
                        "Render strategy failed; falling back"
                    );
                    last_error = Some(err);
                }
            },
        }
    }

    Err(last_error.unwrap_or_else(|| CutroomError::unavailable("No render strategy available")))
}

async fn run_strategy(
    strategy: Strategy,
    ctx: &RenderContext,
    project: &Project,
    settings: &RenderSettings,
    progress: &ProgressSink,
    cancel: &CancelFlag,
) -> CutroomResult<Vec<u8>> {
    match strategy {
        Strategy::NativeService => {
            let service = ctx.native_service();
            progress.report(RenderStage::Preparing, 0, "Checking native render service");
            service.ensure_compatible().await?;
            progress.report(RenderStage::Rendering, 0, "Rendering on native service");
            let bytes = service.render(project, settings, cancel).await?;
            progress.report(RenderStage::Finalizing, 100, "Received rendered file");
            Ok(bytes)
        }
        Strategy::Streaming => render_streaming(ctx, project, settings, progress, cancel).await,
        Strategy::FilterGraph => {
            render_filter_graph(ctx, project, settings, progress, cancel).await
        }
    }
}
