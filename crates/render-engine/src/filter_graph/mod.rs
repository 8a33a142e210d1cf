//! Filter-graph compiler for the external transcoder.
//!
//! The whole timeline becomes one `-filter_complex` graph. Video is
//! flattened into non-overlapping spans that are concatenated together with
//! black fillers for gaps; audio is concatenated per track with silence
//! fillers and the tracks are summed with `amix`. Text overlays are a final
//! `drawtext` pass keyed by `enable` windows.
//!
//! ```text
//! [0:v] trim ▸ speed ▸ framing ─┐
//! color (gap) ──────────────────┼─ concat ─ drawtext ─▶ [vout]
//! [1:v] trim ▸ speed ▸ framing ─┘
//! [2:a] atrim ▸ atempo ─ concat ─┐
//! [3:a] atrim ▸ atempo ─ concat ─┴─ amix ─────────────▶ [aout]
//! ```

pub mod spans;
pub mod transcoder;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use cutroom_common::error::{CutroomError, CutroomResult};
use cutroom_project_model::timing::{resolve_clip, ClipTiming};
use cutroom_project_model::{
    Clip, ContainerFormat, Effect, MediaFile, Project, RenderSettings, TextOverlay, Transition,
};

use crate::cancel::CancelFlag;
use crate::context::RenderContext;
use crate::progress::{ProgressSink, RenderStage};
use spans::{flatten, Candidate, Span};
use transcoder::Transcoder;

/// Grid step for audio boundaries.
const AUDIO_STEP_SECS: f64 = 0.001;

/// Options that do not come from the project or settings.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Where text files for `drawtext` are placed.
    pub scratch_dir: PathBuf,
    pub font_path: Option<PathBuf>,
    /// Forced keyframe spacing in frames.
    pub keyframe_interval: u64,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_bitrate_kbps: u32,
}

/// What fills a segment of the output.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentSource {
    Filler,
    Clip { clip_id: String, input: usize },
}

/// One concatenated piece of a timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub duration: f64,
    pub source: SegmentSource,
}

/// A compiled render, ready to become transcoder arguments.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    /// One entry per distinct source path, in `-i` order.
    pub inputs: Vec<PathBuf>,
    pub filter: String,
    pub video_segments: Vec<Segment>,
    /// Segments per unmuted audio track that has clips.
    pub audio_tracks: Vec<Vec<Segment>>,
    /// Text files `drawtext` reads; written before the transcoder runs.
    pub text_files: Vec<(PathBuf, String)>,
    pub duration: f64,
}

impl CompiledGraph {
    pub fn has_audio(&self) -> bool {
        !self.audio_tracks.is_empty()
    }

    pub fn write_text_files(&self) -> CutroomResult<()> {
        for (path, text) in &self.text_files {
            std::fs::write(path, text)?;
        }
        Ok(())
    }
}

struct Placed<'p> {
    track_index: usize,
    clip: &'p Clip,
    media: &'p MediaFile,
    timing: ClipTiming,
    transitions: Vec<&'p Transition>,
}

/// Distinct input paths and their `-i` indices.
#[derive(Default)]
struct Inputs {
    paths: Vec<PathBuf>,
    index: HashMap<PathBuf, usize>,
}

impl Inputs {
    fn index_of(&mut self, path: &str) -> usize {
        let path = PathBuf::from(path);
        if let Some(&i) = self.index.get(&path) {
            return i;
        }
        let i = self.paths.len();
        self.paths.push(path.clone());
        self.index.insert(path, i);
        i
    }
}

/// Fixed-point seconds the way the transcoder expects them.
fn fmt(v: f64) -> String {
    format!("{:.6}", if v.abs() < 5e-7 { 0.0 } else { v })
}

/// `atempo` stages, each within `[0.5, 2.0]`, whose product is `speed`.
pub fn atempo_chain(speed: f64) -> Vec<f64> {
    let mut stages = vec![];
    if !(speed.is_finite() && speed > 0.0) {
        return stages;
    }
    let mut rest = speed;
    while rest > 2.0 {
        stages.push(2.0);
        rest /= 2.0;
    }
    while rest < 0.5 {
        stages.push(0.5);
        rest /= 0.5;
    }
    if (rest - 1.0).abs() > 1e-9 {
        stages.push(rest);
    }
    stages
}

fn channel_layout(channels: u16) -> &'static str {
    if channels == 1 {
        "mono"
    } else {
        "stereo"
    }
}

/// Quote a path for use as a filter option value.
fn quote_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// `0xRRGGBB@alpha` for drawtext.
fn drawtext_color(overlay: &TextOverlay) -> String {
    let [r, g, b, a] = overlay.rgba();
    format!("0x{r:02x}{g:02x}{b:02x}@{:.3}", a as f64 / 255.0)
}

/// Source window played between timeline `from` and `to`: start and length.
fn source_window(timing: &ClipTiming, from: f64, to: f64) -> (f64, f64) {
    let a = timing.source_time(from);
    let b = timing.source_time(to);
    (a.min(b), (a - b).abs())
}

/// Compile `project` into a filter graph.
pub fn compile(
    project: &Project,
    settings: &RenderSettings,
    options: &CompileOptions,
) -> CutroomResult<CompiledGraph> {
    let duration = project.duration();
    if duration <= 0.0 {
        return Err(CutroomError::project("Project has no clips to render"));
    }
    let fps = settings.framerate;
    let frame_step = 1.0 / fps;

    let mut video: Vec<Placed<'_>> = vec![];
    let mut audio_by_track: Vec<(usize, Vec<Placed<'_>>)> = vec![];
    for (track_index, track, clip, media) in project.placed_clips() {
        if track.muted {
            continue;
        }
        let placed = Placed {
            track_index,
            clip,
            media,
            timing: resolve_clip(clip, media),
            transitions: project.transitions_for(&clip.id).collect(),
        };
        if placed.timing.timeline_duration() <= 0.0 {
            continue;
        }
        if track.is_video() {
            video.push(placed);
        } else {
            match audio_by_track.iter_mut().find(|(i, _)| *i == track_index) {
                Some((_, clips)) => clips.push(placed),
                None => audio_by_track.push((track_index, vec![placed])),
            }
        }
    }
    // Sorting by start keeps segment order readable; priority is in `flatten`.
    video.sort_by(|a, b| {
        a.timing
            .start
            .total_cmp(&b.timing.start)
            .then(a.track_index.cmp(&b.track_index))
    });

    let mut inputs = Inputs::default();
    let mut parts: Vec<String> = vec![];
    let mut label = 0usize;
    let mut next_label = |prefix: &str| {
        let l = format!("{prefix}{label}");
        label += 1;
        l
    };

    // Video timeline.
    let candidates: Vec<Candidate> = video
        .iter()
        .map(|p| Candidate {
            track_index: p.track_index,
            timing: p.timing,
        })
        .collect();
    let video_spans = flatten(&candidates, duration, frame_step);
    let mut video_segments = vec![];
    let mut video_labels = vec![];
    for span in &video_spans {
        let out = next_label("v");
        match span.winner {
            None => {
                parts.push(format!(
                    "color=c=black:s={w}x{h}:r={fps}:d={d},format=yuv420p,setsar=1[{out}]",
                    w = settings.width,
                    h = settings.height,
                    d = fmt(span.duration()),
                ));
                video_segments.push(Segment {
                    start: span.start,
                    duration: span.duration(),
                    source: SegmentSource::Filler,
                });
            }
            Some(i) => {
                let placed = &video[i];
                let input = inputs.index_of(&placed.media.path);
                let base = next_label("b");
                parts.extend(video_clip_chain(placed, span, input, settings, &base, &out));
                video_segments.push(Segment {
                    start: span.start,
                    duration: span.duration(),
                    source: SegmentSource::Clip {
                        clip_id: placed.clip.id.clone(),
                        input,
                    },
                });
            }
        }
        video_labels.push(format!("[{out}]"));
    }

    // Text overlays.
    let mut text_files = vec![];
    let mut drawtexts = vec![];
    for placed in &video {
        let Some(overlay) = &placed.clip.text_overlay else {
            continue;
        };
        if overlay.text.is_empty() {
            continue;
        }
        let from = placed.timing.start + overlay.start.max(0.0);
        let to = match overlay.duration {
            Some(d) => (from + d.max(0.0)).min(placed.timing.end),
            None => placed.timing.end,
        };
        if to <= from {
            continue;
        }
        let path = options
            .scratch_dir
            .join(format!("text_{}.txt", text_files.len()));
        let mut filter = String::from("drawtext=");
        if let Some(font) = &options.font_path {
            let _ = write!(filter, "fontfile={}:", quote_path(font));
        }
        let _ = write!(
            filter,
            "textfile={file}:fontcolor={color}:fontsize={size}:x={x}*w-text_w/2:y={y}*h-text_h/2:enable='between(t,{from},{to})'",
            file = quote_path(&path),
            color = drawtext_color(overlay),
            size = overlay.font_size.round().max(1.0),
            x = fmt(overlay.x),
            y = fmt(overlay.y),
            from = fmt(from),
            to = fmt(to),
        );
        drawtexts.push(filter);
        text_files.push((path, overlay.text.clone()));
    }

    let concat_out = if drawtexts.is_empty() { "vout" } else { "vcat" };
    parts.push(format!(
        "{}concat=n={}:v=1:a=0[{concat_out}]",
        video_labels.concat(),
        video_labels.len()
    ));
    if !drawtexts.is_empty() {
        parts.push(format!("[vcat]{}[vout]", drawtexts.join(",")));
    }

    // Audio timelines, one concat per track.
    let sample_rate = options.audio_sample_rate;
    let layout = channel_layout(options.audio_channels);
    let aformat = format!(
        "aformat=sample_fmts=fltp:sample_rates={sample_rate}:channel_layouts={layout}"
    );
    let mut audio_tracks = vec![];
    let mut track_outputs = vec![];
    for (_, clips) in &audio_by_track {
        let candidates: Vec<Candidate> = clips
            .iter()
            .map(|p| Candidate {
                track_index: 0,
                timing: p.timing,
            })
            .collect();
        let spans = flatten(&candidates, duration, AUDIO_STEP_SECS);
        let mut segments = vec![];
        let mut labels = vec![];
        for span in &spans {
            let out = next_label("a");
            match span.winner {
                None => {
                    parts.push(format!(
                        "anullsrc=r={sample_rate}:cl={layout}:d={d},{aformat}[{out}]",
                        d = fmt(span.duration()),
                    ));
                    segments.push(Segment {
                        start: span.start,
                        duration: span.duration(),
                        source: SegmentSource::Filler,
                    });
                }
                Some(i) => {
                    let placed = &clips[i];
                    let input = inputs.index_of(&placed.media.path);
                    parts.push(audio_clip_chain(placed, span, input, &aformat, &out));
                    segments.push(Segment {
                        start: span.start,
                        duration: span.duration(),
                        source: SegmentSource::Clip {
                            clip_id: placed.clip.id.clone(),
                            input,
                        },
                    });
                }
            }
            labels.push(format!("[{out}]"));
        }
        let track_out = next_label("t");
        parts.push(format!(
            "{}concat=n={}:v=0:a=1[{track_out}]",
            labels.concat(),
            labels.len()
        ));
        track_outputs.push(format!("[{track_out}]"));
        audio_tracks.push(segments);
    }
    match track_outputs.len() {
        0 => {}
        1 => parts.push(format!("{}anull[aout]", track_outputs[0])),
        n => parts.push(format!(
            "{}amix=inputs={n}:duration=longest:normalize=0[aout]",
            track_outputs.concat()
        )),
    }

    tracing::debug!(
        inputs = inputs.paths.len(),
        video_segments = video_segments.len(),
        audio_tracks = audio_tracks.len(),
        texts = text_files.len(),
        "Compiled filter graph"
    );

    Ok(CompiledGraph {
        inputs: inputs.paths,
        filter: parts.join(";"),
        video_segments,
        audio_tracks,
        text_files,
        duration,
    })
}

fn video_clip_chain(
    placed: &Placed<'_>,
    span: &Span,
    input: usize,
    settings: &RenderSettings,
    base: &str,
    out: &str,
) -> Vec<String> {
    let (w, h, fps) = (settings.width, settings.height, settings.framerate);
    let seg = span.duration();
    let timing = &placed.timing;
    let (window_start, window_len) = source_window(timing, span.start, span.end);

    let mut chain = format!(
        "[{input}:v]trim=start={}:duration={},setpts=PTS-STARTPTS",
        fmt(window_start),
        fmt(window_len)
    );
    if timing.reverse {
        chain.push_str(",reverse");
    }
    if (timing.speed - 1.0).abs() > 1e-9 {
        let _ = write!(chain, ",setpts=PTS/{}", fmt(timing.speed));
    }
    let _ = write!(chain, ",fps={fps}");

    for effect in &placed.clip.effects {
        let _ = match *effect {
            Effect::Brightness { value } => write!(chain, ",eq=brightness={}", fmt(value)),
            Effect::Contrast { value } => write!(chain, ",eq=contrast={}", fmt(value)),
            Effect::Saturation { value } => write!(chain, ",eq=saturation={}", fmt(value)),
            Effect::Grayscale => write!(chain, ",hue=s=0"),
        };
    }

    // Fades apply where the span touches the clip's own edges.
    let clip_len = timing.timeline_duration();
    let offset = span.start - timing.start;
    for transition in &placed.transitions {
        let ramp = transition.duration.min(clip_len).max(0.0);
        if ramp <= 0.0 {
            continue;
        }
        if transition.fades_in() && offset.abs() < 1e-6 {
            let _ = write!(chain, ",fade=t=in:st=0:d={}", fmt(ramp.min(seg)));
        }
        if transition.fades_out() && (span.end - timing.end).abs() < 1e-6 {
            let d = ramp.min(seg);
            let _ = write!(chain, ",fade=t=out:st={}:d={}", fmt(seg - d), fmt(d));
        }
    }

    let opacity = placed.clip.effective_opacity();
    let pad_tail = format!(
        "tpad=stop_mode=clone:stop_duration={d},trim=duration={d},setpts=PTS-STARTPTS",
        d = fmt(seg)
    );

    if !placed.clip.has_framing() {
        if opacity < 1.0 {
            let _ = write!(
                chain,
                ",format=gbrp,colorchannelmixer=rr={a}:gg={a}:bb={a}",
                a = fmt(opacity)
            );
        }
        let _ = write!(
            chain,
            ",scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,format=yuv420p,setsar=1,{pad_tail}[{out}]"
        );
        return vec![chain];
    }

    let crop = placed.clip.crop.unwrap_or_default().clamped();
    let transform = placed.clip.transform.unwrap_or_default();
    if !crop.is_identity() {
        let _ = write!(
            chain,
            ",crop=w=iw*{cw}:h=ih*{ch}:x=iw*{cx}:y=ih*{cy}",
            cw = fmt(1.0 - crop.left - crop.right),
            ch = fmt(1.0 - crop.top - crop.bottom),
            cx = fmt(crop.left),
            cy = fmt(crop.top),
        );
    }
    let _ = write!(chain, ",scale={w}:{h}:force_original_aspect_ratio=decrease");
    let (sx, sy) = (transform.scale_x, transform.scale_y);
    if (sx - 1.0).abs() > 1e-9 || (sy - 1.0).abs() > 1e-9 {
        let _ = write!(
            chain,
            ",scale=w='max(2,trunc(iw*{}/2)*2)':h='max(2,trunc(ih*{}/2)*2)'",
            fmt(sx.abs()),
            fmt(sy.abs())
        );
    }
    if sx < 0.0 {
        chain.push_str(",hflip");
    }
    if sy < 0.0 {
        chain.push_str(",vflip");
    }
    chain.push_str(",format=rgba");
    if opacity < 1.0 {
        let _ = write!(chain, ",colorchannelmixer=aa={}", fmt(opacity));
    }
    if transform.rotation.abs() > 1e-9 {
        let _ = write!(
            chain,
            ",rotate=a={r}:ow=rotw({r}):oh=roth({r}):c=black@0",
            r = fmt(transform.rotation.to_radians())
        );
    }
    let fg = format!("{base}fg");
    let _ = write!(chain, "[{fg}]");

    let canvas = format!(
        "color=c=black:s={w}x{h}:r={fps}:d={d}[{base}]",
        d = fmt(seg)
    );
    let overlay = format!(
        "[{base}][{fg}]overlay=x=(W-w)/2+{tx}:y=(H-h)/2+{ty},format=yuv420p,setsar=1,{pad_tail}[{out}]",
        tx = fmt(transform.x * w as f64),
        ty = fmt(transform.y * h as f64),
    );
    vec![chain, canvas, overlay]
}

fn audio_clip_chain(
    placed: &Placed<'_>,
    span: &Span,
    input: usize,
    aformat: &str,
    out: &str,
) -> String {
    let timing = &placed.timing;
    let seg = span.duration();
    let (window_start, window_len) = source_window(timing, span.start, span.end);

    let mut chain = format!(
        "[{input}:a]atrim=start={}:duration={},asetpts=PTS-STARTPTS",
        fmt(window_start),
        fmt(window_len)
    );
    if timing.reverse {
        chain.push_str(",areverse");
    }
    for stage in atempo_chain(timing.speed) {
        let _ = write!(chain, ",atempo={}", fmt(stage));
    }
    let _ = write!(chain, ",{aformat}");

    // Gain ramps use clip-relative time so split spans stay continuous.
    let clip_len = timing.timeline_duration();
    let offset = span.start - timing.start;
    let mut ramps = vec![];
    for transition in &placed.transitions {
        let ramp = transition.duration.min(clip_len).max(0.0);
        if ramp <= 0.0 {
            continue;
        }
        if transition.fades_in() {
            ramps.push(format!(
                "min(1,max(0,(t+{o})/{r}))",
                o = fmt(offset),
                r = fmt(ramp)
            ));
        }
        if transition.fades_out() {
            ramps.push(format!(
                "min(1,max(0,({c}-t-{o})/{r}))",
                c = fmt(clip_len),
                o = fmt(offset),
                r = fmt(ramp)
            ));
        }
    }
    if !ramps.is_empty() {
        let expr = ramps
            .into_iter()
            .reduce(|acc, next| format!("min({acc},{next})"))
            .unwrap_or_default();
        let _ = write!(chain, ",volume='{expr}':eval=frame");
    }
    let _ = write!(
        chain,
        ",apad=whole_dur={d},atrim=duration={d},asetpts=PTS-STARTPTS[{out}]",
        d = fmt(seg)
    );
    chain
}

/// Per-container codec arguments.
pub fn codec_args(
    format: ContainerFormat,
    settings: &RenderSettings,
    keyframe_interval: u64,
    audio_bitrate_kbps: Option<u32>,
) -> Vec<String> {
    let mut args: Vec<String> = match format {
        ContainerFormat::Mp4 => vec![
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "ultrafast".into(),
            "-tune".into(),
            "fastdecode".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-movflags".into(),
            "+faststart".into(),
        ],
        ContainerFormat::Webm => vec![
            "-c:v".into(),
            "libvpx-vp9".into(),
            "-speed".into(),
            "4".into(),
            "-row-mt".into(),
            "1".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ],
    };
    args.extend([
        "-b:v".into(),
        format!("{}k", settings.bitrate),
        "-r".into(),
        format!("{}", settings.framerate),
        "-g".into(),
        keyframe_interval.max(1).to_string(),
    ]);
    if let Some(kbps) = audio_bitrate_kbps {
        let codec = match format {
            ContainerFormat::Mp4 => "aac",
            ContainerFormat::Webm => "libopus",
        };
        args.extend(["-c:a".into(), codec.into(), "-b:a".into(), format!("{kbps}k")]);
    }
    args
}

/// Full transcoder argument list for a compiled graph.
pub fn transcoder_args(
    graph: &CompiledGraph,
    settings: &RenderSettings,
    options: &CompileOptions,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostats".into(),
        "-progress".into(),
        "pipe:1".into(),
    ];
    for input in &graph.inputs {
        args.push("-i".into());
        args.push(input.to_string_lossy().into_owned());
    }
    args.extend([
        "-filter_complex".into(),
        graph.filter.clone(),
        "-map".into(),
        "[vout]".into(),
    ]);
    if graph.has_audio() {
        args.extend(["-map".into(), "[aout]".into()]);
    }
    args.extend(codec_args(
        settings.format,
        settings,
        options.keyframe_interval,
        graph.has_audio().then_some(options.audio_bitrate_kbps),
    ));
    args.extend([
        "-t".into(),
        fmt(graph.duration),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

/// Render `project` by running the compiled graph through the transcoder.
pub async fn render_filter_graph(
    ctx: &RenderContext,
    project: &Project,
    settings: &RenderSettings,
    progress: &ProgressSink,
    cancel: &CancelFlag,
) -> CutroomResult<Vec<u8>> {
    let engine = &ctx.config().render;
    let transcoder = Transcoder::new(&engine.ffmpeg_path);
    if !transcoder.is_available() {
        return Err(CutroomError::unavailable(format!(
            "Transcoder '{}' not found",
            engine.ffmpeg_path
        )));
    }

    let scratch = tempfile::Builder::new().prefix("cutroom-render-").tempdir()?;
    let options = CompileOptions {
        scratch_dir: scratch.path().to_path_buf(),
        font_path: ctx
            .font()
            .map(|f| f.path.clone())
            .or_else(|| engine.font_path.clone()),
        keyframe_interval: engine.keyframe_interval_frames(settings.framerate),
        audio_sample_rate: engine.audio_sample_rate,
        audio_channels: engine.audio_channels,
        audio_bitrate_kbps: engine.audio_bitrate_kbps,
    };
    let graph = compile(project, settings, &options)?;
    graph.write_text_files()?;
    for path in &graph.inputs {
        if !path.exists() {
            return Err(CutroomError::FileNotFound { path: path.clone() });
        }
    }

    let output = scratch
        .path()
        .join(format!("output.{}", settings.format.extension()));
    let args = transcoder_args(&graph, settings, &options, &output);
    tracing::info!(
        inputs = graph.inputs.len(),
        segments = graph.video_segments.len(),
        audio_tracks = graph.audio_tracks.len(),
        duration = graph.duration,
        "Running filter-graph render"
    );
    tracing::debug!(filter = %graph.filter, "Filter graph");

    transcoder.run(&args, graph.duration, progress, cancel).await?;

    progress.report(RenderStage::Finalizing, 0, "Reading rendered output");
    let bytes = tokio::fs::read(&output).await.map_err(|e| {
        CutroomError::render(format!(
            "Transcoder produced no output at {}: {e}",
            output.display()
        ))
    })?;
    progress.report(RenderStage::Finalizing, 100, "Output ready");
    Ok(bytes)
}
