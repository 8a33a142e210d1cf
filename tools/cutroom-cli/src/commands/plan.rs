//! Print the compatibility-path filter graph for a project.

use std::path::PathBuf;

use serde::Serialize;

use cutroom_common::config::AppConfig;
use cutroom_project_model::{ContainerFormat, EngineChoice, Project, RenderSettings};
use cutroom_render_engine::filter_graph::{
    compile, transcoder_args, CompileOptions, Segment, SegmentSource,
};
use cutroom_render_engine::fonts::load_font;

/// A segment as printed by `--json`.
#[derive(Debug, Serialize)]
struct SegmentRow {
    start: f64,
    duration: f64,
    /// Clip id, or `None` for filler.
    clip: Option<String>,
    input: Option<usize>,
}

impl From<&Segment> for SegmentRow {
    fn from(seg: &Segment) -> Self {
        let (clip, input) = match &seg.source {
            SegmentSource::Filler => (None, None),
            SegmentSource::Clip { clip_id, input } => (Some(clip_id.clone()), Some(*input)),
        };
        Self {
            start: seg.start,
            duration: seg.duration,
            clip,
            input,
        }
    }
}

#[derive(Debug, Serialize)]
struct PlanReport<'a> {
    duration: f64,
    inputs: &'a [PathBuf],
    video_segments: Vec<SegmentRow>,
    audio_tracks: Vec<Vec<SegmentRow>>,
    filter: &'a str,
    program: &'a str,
    args: &'a [String],
}

pub fn run(
    config: &AppConfig,
    path: PathBuf,
    width: u32,
    height: u32,
    format: ContainerFormat,
    json: bool,
) -> anyhow::Result<()> {
    let project =
        Project::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;

    let settings = RenderSettings {
        width,
        height,
        framerate: project.framerate,
        format,
        engine: EngineChoice::Compatibility,
        ..RenderSettings::default()
    };
    settings.validate().map_err(|e| anyhow::anyhow!(e))?;

    let engine = &config.render;
    let options = CompileOptions {
        scratch_dir: std::env::temp_dir().join("cutroom-plan"),
        font_path: load_font(engine.font_path.as_deref()).map(|f| f.path),
        keyframe_interval: engine.keyframe_interval_frames(settings.framerate),
        audio_sample_rate: engine.audio_sample_rate,
        audio_channels: engine.audio_channels,
        audio_bitrate_kbps: engine.audio_bitrate_kbps,
    };
    let graph = compile(&project, &settings, &options)?;
    let output = PathBuf::from(format!("output.{}", settings.format.extension()));
    let args = transcoder_args(&graph, &settings, &options, &output);
    tracing::debug!(
        inputs = graph.inputs.len(),
        segments = graph.video_segments.len(),
        audio_tracks = graph.audio_tracks.len(),
        "Compiled filter graph"
    );

    if json {
        let report = PlanReport {
            duration: graph.duration,
            inputs: &graph.inputs,
            video_segments: graph.video_segments.iter().map(SegmentRow::from).collect(),
            audio_tracks: graph
                .audio_tracks
                .iter()
                .map(|track| track.iter().map(SegmentRow::from).collect())
                .collect(),
            filter: &graph.filter,
            program: &engine.ffmpeg_path,
            args: &args,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Project: {} ({:.3}s)", project.name, graph.duration);
    println!();

    println!("Inputs:");
    for (i, input) in graph.inputs.iter().enumerate() {
        println!("  [{i}] {}", input.display());
    }
    println!();

    println!("Video segments:");
    for seg in &graph.video_segments {
        let source = match &seg.source {
            SegmentSource::Filler => "black".to_string(),
            SegmentSource::Clip { clip_id, input } => format!("{clip_id} (input {input})"),
        };
        println!("  {:>9.3}s +{:>8.3}s  {source}", seg.start, seg.duration);
    }
    println!("Audio tracks: {}", graph.audio_tracks.len());
    println!();

    println!("Filter graph:");
    for chain in graph.filter.split(';') {
        println!("  {chain}");
    }
    println!();

    println!("Command:");
    println!("  {} {}", engine.ffmpeg_path, args.join(" "));

    Ok(())
}
