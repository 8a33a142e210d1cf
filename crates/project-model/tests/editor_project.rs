//! A project file as the editor writes it.

use cutroom_project_model::timing::{clip_timeline_duration, resolve_clip};
use cutroom_project_model::{EngineChoice, Project, ProjectFeatures, RenderSettings};

const EDITOR_PROJECT: &str = r##"{
  "id": "p-1",
  "name": "Demo cut",
  "framerate": 30,
  "mediaFiles": [
    { "id": "m-video", "name": "intro.mp4", "type": "video", "url": "/media/intro.mp4",
      "duration": 10.0, "framerate": 30, "width": 1920, "height": 1080,
      "thumbnail": "data:image/png;base64,AAAA" },
    { "id": "m-music", "name": "music.mp3", "type": "audio", "url": "/media/music.mp3",
      "duration": 6.0, "waveform": [0.1, 0.4, 0.2] }
  ],
  "tracks": [
    { "id": "t-video", "type": "video", "clips": [
      { "id": "c-1", "mediaId": "m-video", "startTime": 0, "trimStart": 1, "trimEnd": 1,
        "speed": 2, "opacity": 0.8,
        "crop": { "left": 0.1, "right": 0, "top": 0, "bottom": 0 },
        "textOverlay": { "text": "Hello", "fontSize": 64, "color": "#ff0000" },
        "effects": [{ "type": "brightness", "value": 0.1 }, { "type": "grayscale" }] },
      { "id": "c-2", "mediaId": "m-video", "startTime": 4, "reverse": true,
        "transform": { "x": 0.1, "scaleX": 0.5, "scaleY": 0.5, "rotation": 90 } }
    ] },
    { "id": "t-audio", "type": "audio", "muted": false, "clips": [
      { "id": "a-1", "mediaId": "m-music", "startTime": 0, "linkedClipId": "c-1" },
      { "id": "a-2", "mediaId": "m-music", "startTime": 14, "trimEnd": 3 }
    ] }
  ],
  "transitions": [
    { "id": "tr-1", "clipId": "c-2", "kind": "crossfade", "duration": 0.5 }
  ]
}"##;

fn load() -> Project {
    serde_json::from_str(EDITOR_PROJECT).expect("editor project parses")
}

#[test]
fn test_editor_fields_map_onto_the_model() {
    let project = load();
    assert_eq!(project.media_files[0].path, "/media/intro.mp4");
    assert_eq!(project.tracks[0].clips.len(), 2);

    let c1 = &project.tracks[0].clips[0];
    assert_eq!(c1.speed, 2.0);
    assert!(c1.has_framing());
    assert_eq!(c1.text_overlay.as_ref().unwrap().rgba(), [255, 0, 0, 255]);
    assert_eq!(c1.effects.len(), 2);

    let c2 = &project.tracks[0].clips[1];
    assert!(c2.reverse);
    assert_eq!(c2.opacity, 1.0);
    let transform = c2.transform.unwrap();
    assert_eq!(transform.scale_x, 0.5);
    assert_eq!(transform.y, 0.0);

    assert_eq!(
        project.tracks[1].clips[0].linked_clip_id.as_deref(),
        Some("c-1")
    );
    assert!(project.validate().is_empty());
}

#[test]
fn test_timing_of_the_editor_project() {
    let project = load();
    let video = &project.media_files[0];

    // 10 s source, 1 s trimmed from each end, at double speed.
    let c1 = &project.tracks[0].clips[0];
    assert!((clip_timeline_duration(c1, video) - 4.0).abs() < 1e-9);

    // The reversed clip starts playing from the end of its source.
    let c2 = resolve_clip(&project.tracks[0].clips[1], video);
    assert!((c2.source_time(4.0) - 10.0).abs() < 1e-9);
    assert!((c2.source_time(13.0) - 1.0).abs() < 1e-9);

    // The last audio clip ends at 14 + (6 - 3) = 17 s.
    assert!((project.duration() - 17.0).abs() < 1e-9);
}

#[test]
fn test_features_follow_mute() {
    let mut project = load();
    let features = ProjectFeatures::detect(&project);
    assert!(features.has_audio);
    assert!(features.has_text_overlay);
    assert!(features.has_transform_or_crop);

    project.tracks[1].muted = true;
    assert!(!ProjectFeatures::detect(&project).has_audio);
}

#[test]
fn test_save_and_reload_keeps_wire_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.json");
    load().save(&path).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"mediaFiles\""));
    assert!(raw.contains("\"url\""));
    assert!(raw.contains("\"trimStart\""));

    let reloaded = Project::load(&path).unwrap();
    assert!((reloaded.duration() - 17.0).abs() < 1e-9);
}

#[test]
fn test_broken_references_are_reported() {
    let mut project = load();
    project.tracks[0].clips[0].media_id = "gone".into();
    project.transitions[0].clip_id = "nope".into();
    let errors = project.validate();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("gone"));
    assert!(errors[1].contains("nope"));
    assert!(project.ensure_valid().is_err());
}

#[test]
fn test_settings_from_editor_json() {
    let settings: RenderSettings = serde_json::from_str(
        r#"{"width": 1280, "height": 720, "bitrate": 5000, "framerate": 25, "format": "webm"}"#,
    )
    .unwrap();
    assert_eq!(settings.engine, EngineChoice::Auto);
    assert_eq!(settings.format.mime(), "video/webm");
    assert!(settings.validate().is_ok());
}
