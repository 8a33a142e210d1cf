//! Client for the local native render service.
//!
//! The service exposes `GET /health` reporting `{status, version}` and
//! `POST /render` taking a multipart form with the project, the settings,
//! and one `media_<id>` part per media file. A successful render answers
//! with the container bytes; failures answer with `{"error"}` or
//! `{"detail"}` JSON.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use cutroom_common::config::NativeServiceConfig;
use cutroom_common::error::{CutroomError, CutroomResult};
use cutroom_project_model::{Project, RenderSettings};

use crate::cancel::CancelFlag;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

/// Project as the service expects it: the model plus its total duration.
#[derive(Debug, Serialize)]
struct WireProject<'a> {
    #[serde(flatten)]
    project: &'a Project,
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<String>,
    detail: Option<serde_json::Value>,
}

impl ErrorPayload {
    fn message(self) -> Option<String> {
        self.error.or_else(|| {
            self.detail.map(|d| match d {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct NativeServiceClient {
    http: reqwest::Client,
    config: NativeServiceConfig,
}

impl NativeServiceClient {
    pub fn new(config: NativeServiceConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Probe `/health`. Any transport failure means the service is unavailable.
    pub async fn health(&self) -> CutroomResult<HealthStatus> {
        let response = self
            .http
            .get(self.url("/health"))
            .timeout(Duration::from_millis(self.config.health_timeout_ms))
            .send()
            .await
            .map_err(|e| {
                CutroomError::unavailable(format!(
                    "Native render service unreachable at {}: {e}",
                    self.base_url()
                ))
            })?;
        if !response.status().is_success() {
            return Err(CutroomError::unavailable(format!(
                "Native render service health check returned {}",
                response.status()
            )));
        }
        response.json::<HealthStatus>().await.map_err(|e| {
            CutroomError::unavailable(format!("Malformed health response: {e}"))
        })
    }

    /// Require a healthy service speaking exactly the configured version.
    pub async fn ensure_compatible(&self) -> CutroomResult<HealthStatus> {
        let health = self.health().await?;
        if health.version != self.config.required_version {
            return Err(CutroomError::VersionMismatch {
                expected: self.config.required_version.clone(),
                found: health.version,
            });
        }
        tracing::debug!(
            version = %health.version,
            status = %health.status,
            "Native render service is compatible"
        );
        Ok(health)
    }

    /// Upload the project and its media, and return the rendered bytes.
    pub async fn render(
        &self,
        project: &Project,
        settings: &RenderSettings,
        cancel: &CancelFlag,
    ) -> CutroomResult<Vec<u8>> {
        let form = build_form(project, settings).await?;
        cancel.check()?;

        tracing::info!(
            url = %self.url("/render"),
            media = project.media_files.len(),
            "Sending render request to native service"
        );
        let request = self
            .http
            .post(self.url("/render"))
            .timeout(Duration::from_secs(self.config.render_timeout_secs))
            .multipart(form)
            .send();

        let response = tokio::select! {
            response = request => response.map_err(|e| {
                CutroomError::network(format!("Render request failed: {e}"))
            })?,
            _ = cancel.cancelled() => return Err(CutroomError::Cancelled),
        };

        let status = response.status();
        let body = tokio::select! {
            body = response.bytes() => body.map_err(|e| {
                CutroomError::network(format!("Failed reading render response: {e}"))
            })?,
            _ = cancel.cancelled() => return Err(CutroomError::Cancelled),
        };

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorPayload>(&body)
                .ok()
                .and_then(ErrorPayload::message)
                .unwrap_or_else(|| String::from_utf8_lossy(&body).trim().to_string());
            return Err(CutroomError::render(format!(
                "Native render service failed ({status}): {message}"
            )));
        }
        if body.is_empty() {
            return Err(CutroomError::render("Native render service returned no data"));
        }
        Ok(body.to_vec())
    }
}

async fn build_form(project: &Project, settings: &RenderSettings) -> CutroomResult<Form> {
    let wire = WireProject {
        project,
        duration: project.duration(),
    };
    let mut form = Form::new()
        .text("project", serde_json::to_string(&wire)?)
        .text("settings", serde_json::to_string(settings)?);

    for media in &project.media_files {
        let bytes = tokio::fs::read(&media.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CutroomError::FileNotFound {
                    path: media.path.clone().into(),
                }
            } else {
                CutroomError::Io(e)
            }
        })?;
        let file_name = std::path::Path::new(&media.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", media.id));
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| CutroomError::render(format!("Invalid media part: {e}")))?;
        form = form.part(format!("media_{}", media.id), part);
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutroom_common::error::ErrorClass;
    use cutroom_project_model::{Clip, MediaFile, MediaKind, Track};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct Canned {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    }

    fn json(status: u16, body: &str) -> Canned {
        Canned {
            status,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = find(&buf, b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body = &buf[end + 4..];
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());
            match length {
                Some(len) if body.len() >= len => break,
                Some(_) => continue,
                None if head.contains("transfer-encoding: chunked") => {
                    if body.ends_with(b"0\r\n\r\n") {
                        break;
                    }
                }
                None => break,
            }
        }
        buf
    }

    /// Answer one connection per canned response, in order.
    async fn serve(responses: Vec<Canned>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = vec![];
            for canned in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                seen.push(String::from_utf8_lossy(&request).into_owned());
                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    canned.status,
                    canned.content_type,
                    canned.body.len()
                );
                stream.write_all(head.as_bytes()).await.unwrap();
                stream.write_all(&canned.body).await.unwrap();
                stream.shutdown().await.ok();
            }
            seen
        });
        (format!("http://{addr}"), handle)
    }

    fn client(base_url: String) -> NativeServiceClient {
        NativeServiceClient::new(NativeServiceConfig {
            base_url,
            ..NativeServiceConfig::default()
        })
    }

    fn project_with_media(dir: &std::path::Path) -> Project {
        let path = dir.join("clip.mp4");
        std::fs::write(&path, b"source-bytes").unwrap();
        let mut project = Project::new("wire", 30.0);
        project.media_files.push(MediaFile::video(
            "m1",
            path.to_string_lossy(),
            2.0,
            640,
            360,
            30.0,
        ));
        project
            .tracks
            .push(Track::new("v1", MediaKind::Video).with_clip(Clip::new("c1", "m1", 0.0)));
        project
    }

    #[tokio::test]
    async fn test_health_version_match() {
        let (url, server) = serve(vec![json(
            200,
            r#"{"status":"ok","version":"2026-02-19-concat-v1"}"#,
        )])
        .await;
        let health = client(url).ensure_compatible().await.unwrap();
        assert_eq!(health.status, "ok");
        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("GET /health"));
    }

    #[tokio::test]
    async fn test_health_version_mismatch() {
        let (url, _server) = serve(vec![json(200, r#"{"status":"ok","version":"old"}"#)]).await;
        let err = client(url).ensure_compatible().await.unwrap_err();
        assert!(matches!(err, CutroomError::VersionMismatch { .. }));
        assert_eq!(err.class(), ErrorClass::Unavailable);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(format!("http://{addr}")).health().await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unavailable);
    }

    #[tokio::test]
    async fn test_render_uploads_multipart_form() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_media(dir.path());
        let (url, server) = serve(vec![Canned {
            status: 200,
            content_type: "video/mp4",
            body: b"rendered-container".to_vec(),
        }])
        .await;

        let bytes = client(url)
            .render(&project, &RenderSettings::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(bytes, b"rendered-container");

        let seen = server.await.unwrap();
        let request = &seen[0];
        assert!(request.starts_with("POST /render"));
        assert!(request.contains(r#"name="project""#));
        assert!(request.contains(r#"name="settings""#));
        assert!(request.contains(r#"name="media_m1""#));
        assert!(request.contains(r#""mediaFiles""#));
        assert!(request.contains(r#""duration":2.0"#));
        assert!(request.contains("source-bytes"));
    }

    #[tokio::test]
    async fn test_render_error_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_media(dir.path());
        let (url, _server) = serve(vec![
            json(400, r#"{"detail":"No clips to render"}"#),
            json(500, r#"{"error":"ffmpeg exploded"}"#),
        ])
        .await;
        let client = client(url);
        let settings = RenderSettings::default();

        let err = client
            .render(&project, &settings, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CutroomError::Render { .. }));
        assert!(err.to_string().contains("No clips to render"));

        let err = client
            .render(&project, &settings, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ffmpeg exploded"));
    }

    #[tokio::test]
    async fn test_render_missing_media_file() {
        let mut project = Project::new("wire", 30.0);
        project.media_files.push(MediaFile::video(
            "m1",
            "/definitely/not/here.mp4",
            1.0,
            2,
            2,
            30.0,
        ));
        let err = client("http://127.0.0.1:9".into())
            .render(&project, &RenderSettings::default(), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CutroomError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let dir = tempfile::tempdir().unwrap();
        let project = project_with_media(dir.path());
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = client("http://127.0.0.1:9".into())
            .render(&project, &RenderSettings::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
