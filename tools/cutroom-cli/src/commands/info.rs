//! Show project information.

use std::path::PathBuf;

use serde::Serialize;

use cutroom_project_model::timing::resolve_clip;
use cutroom_project_model::{Project, ProjectFeatures};

/// One row of the clip timing table.
#[derive(Debug, Serialize)]
struct ClipRow {
    id: String,
    track: usize,
    start: f64,
    end: f64,
    source_in: f64,
    source_out: f64,
    speed: f64,
    flags: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct FeatureReport {
    audio: bool,
    text_overlays: bool,
    transform_or_crop: bool,
}

#[derive(Debug, Serialize)]
struct ProjectReport {
    id: String,
    name: String,
    framerate: f64,
    duration: f64,
    clips: Vec<ClipRow>,
    features: FeatureReport,
    issues: Vec<String>,
}

fn report(project: &Project) -> ProjectReport {
    let clips = project
        .placed_clips()
        .map(|(index, _track, clip, media)| {
            let t = resolve_clip(clip, media);
            let mut flags = vec![];
            if t.reverse {
                flags.push("reverse");
            }
            if clip.has_framing() {
                flags.push("framing");
            }
            if clip.text_overlay.is_some() {
                flags.push("text");
            }
            if project.transitions_for(&clip.id).next().is_some() {
                flags.push("transition");
            }
            ClipRow {
                id: clip.id.clone(),
                track: index,
                start: t.start,
                end: t.end,
                source_in: t.source_start,
                source_out: t.source_end,
                speed: t.speed,
                flags,
            }
        })
        .collect();

    let features = ProjectFeatures::detect(project);
    let mut issues = project.validate();
    issues.extend(
        project
            .missing_sources()
            .into_iter()
            .map(|p| format!("Source not found: {}", p.display())),
    );

    ProjectReport {
        id: project.id.clone(),
        name: project.name.clone(),
        framerate: project.framerate,
        duration: project.duration(),
        clips,
        features: FeatureReport {
            audio: features.has_audio,
            text_overlays: features.has_text_overlay,
            transform_or_crop: features.has_transform_or_crop,
        },
        issues,
    }
}

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let project =
        Project::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let report = report(&project);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Project: {}", report.name);
    println!("  ID: {}", report.id);
    println!("  Framerate: {}fps", report.framerate);
    println!("  Duration: {:.3}s", report.duration);
    println!();

    println!("Media:");
    for m in &project.media_files {
        let size = match (m.width, m.height) {
            (Some(w), Some(h)) => format!(" {w}x{h}"),
            _ => String::new(),
        };
        println!("  {} {:?} {:.3}s{size} ({})", m.id, m.kind, m.duration, m.path);
    }
    println!();

    println!("Tracks:");
    for track in &project.tracks {
        println!(
            "  {} {:?}: {} clip(s){}",
            track.id,
            track.kind,
            track.clips.len(),
            if track.muted { " (muted)" } else { "" }
        );
    }
    println!();

    println!("Clips:");
    println!(
        "  {:<12} {:>5} {:>9} {:>9} {:>9} {:>9} {:>6}  flags",
        "id", "track", "start", "end", "src-in", "src-out", "speed"
    );
    for row in &report.clips {
        println!(
            "  {:<12} {:>5} {:>9.3} {:>9.3} {:>9.3} {:>9.3} {:>6.2}  {}",
            row.id,
            row.track,
            row.start,
            row.end,
            row.source_in,
            row.source_out,
            row.speed,
            row.flags.join(",")
        );
    }
    println!();

    println!("Features:");
    println!("  Audio: {}", report.features.audio);
    println!("  Text overlays: {}", report.features.text_overlays);
    println!("  Transform/crop: {}", report.features.transform_or_crop);
    println!();

    if report.issues.is_empty() {
        println!("Project is valid.");
    } else {
        println!("Validation issues:");
        for issue in &report.issues {
            println!("  - {issue}");
        }
        println!("\n{} issue(s) found.", report.issues.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutroom_project_model::{Clip, MediaFile, MediaKind, Track};

    #[test]
    fn test_report_rows_and_json() {
        let mut project = Project::new("demo", 30.0);
        project
            .media_files
            .push(MediaFile::video("m", "/nonexistent/a.mp4", 10.0, 64, 36, 30.0));
        let clip = Clip::new("c", "m", 1.0)
            .with_trim(1.0, 1.0)
            .with_speed(2.0)
            .reversed();
        project
            .tracks
            .push(Track::new("v", MediaKind::Video).with_clip(clip));

        let report = report(&project);
        assert_eq!(report.clips.len(), 1);
        let row = &report.clips[0];
        assert!((row.end - 5.0).abs() < 1e-9);
        assert_eq!(row.flags, ["reverse"]);
        assert!((report.duration - 5.0).abs() < 1e-9);
        assert_eq!(report.issues.len(), 1);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["clips"][0]["source_out"], 9.0);
        assert_eq!(value["features"]["audio"], false);
    }
}
