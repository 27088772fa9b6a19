//! **Camera frames and perception backends.**
//!
//! The monitors never decode images themselves. A [`FrameSource`] yields encoded
//! frames; an [`ObjectDetector`] or [`LandmarkExtractor`] turns one frame into
//! detections or face landmarks. The HTTP implementations talk to a local
//! inference sidecar (JSON in/out) so model weights stay out of this process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use vigil_core::{ProctorError, ProctorResult};

/// One encoded camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub captured_at: Instant,
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquire the camera. Called once while arming; an error disables the monitor.
    async fn acquire(&self) -> ProctorResult<()> {
        Ok(())
    }

    async fn grab(&self) -> ProctorResult<Frame>;
}

/// One detected object, COCO-style class names (`person`, `cell phone`, `book`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub score: f32,
    /// `[x, y, width, height]` in pixels, when the detector supplies it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f32; 4]>,
}

impl Detection {
    pub fn new(class: impl Into<String>, score: f32) -> Self {
        Self {
            class: class.into(),
            score,
            bbox: None,
        }
    }
}

#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Load the model. Called once while arming.
    async fn load(&self) -> ProctorResult<()> {
        Ok(())
    }

    async fn detect(&self, frame: &Frame) -> ProctorResult<Vec<Detection>>;
}

/// Normalized face-mesh point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// Landmarks of a single face (refined mesh, so iris points are present).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<Point>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }
}

#[async_trait]
pub trait LandmarkExtractor: Send + Sync {
    async fn load(&self) -> ProctorResult<()> {
        Ok(())
    }

    /// Landmarks of the most prominent face, or `None` when no face is visible.
    async fn landmarks(&self, frame: &Frame) -> ProctorResult<Option<FaceLandmarks>>;
}

// -----------------------------------------------------------------------------
// HTTP backends
// -----------------------------------------------------------------------------

fn http_client(timeout: Duration) -> ProctorResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProctorError::Config(format!("http client: {}", e)))
}

/// Pulls JPEG snapshots from a camera endpoint (`GET` returns the current frame).
#[derive(Debug, Clone)]
pub struct HttpFrameSource {
    url: Option<String>,
    client: reqwest::Client,
}

impl HttpFrameSource {
    pub fn new(url: Option<String>, timeout: Duration) -> ProctorResult<Self> {
        Ok(Self {
            url,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn acquire(&self) -> ProctorResult<()> {
        if self.url.is_none() {
            return Err(ProctorError::acquisition("camera", "no camera endpoint configured"));
        }
        self.grab()
            .await
            .map(|_| ())
            .map_err(|e| ProctorError::acquisition("camera", e.to_string()))
    }

    async fn grab(&self) -> ProctorResult<Frame> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| ProctorError::acquisition("camera", "no camera endpoint configured"))?;
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProctorError::Inference(format!("camera GET: {}", e)))?;
        if !res.status().is_success() {
            return Err(ProctorError::Inference(format!(
                "camera returned {}",
                res.status()
            )));
        }
        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| ProctorError::Inference(format!("camera body: {}", e)))?;
        Ok(Frame {
            bytes: bytes.to_vec(),
            content_type,
            captured_at: Instant::now(),
        })
    }
}

async fn post_frame<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    frame: &Frame,
) -> ProctorResult<T> {
    let res = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, frame.content_type.as_str())
        .body(frame.bytes.clone())
        .send()
        .await
        .map_err(|e| ProctorError::Inference(e.to_string()))?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(ProctorError::Inference(format!(
            "inference error {}: {}",
            status, body
        )));
    }
    res.json::<T>()
        .await
        .map_err(|e| ProctorError::Inference(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Object detector served over HTTP: `POST` frame bytes, receive
/// `{"detections":[{"class":"person","score":0.93}, ...]}`.
#[derive(Debug, Clone)]
pub struct HttpObjectDetector {
    url: Option<String>,
    client: reqwest::Client,
}

impl HttpObjectDetector {
    pub fn new(url: Option<String>, timeout: Duration) -> ProctorResult<Self> {
        Ok(Self {
            url,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl ObjectDetector for HttpObjectDetector {
    async fn load(&self) -> ProctorResult<()> {
        match self.url {
            Some(ref url) => {
                debug!(url = %url, "Object detector endpoint configured");
                Ok(())
            }
            None => Err(ProctorError::model_load(
                "vision",
                "no object detector endpoint configured",
            )),
        }
    }

    async fn detect(&self, frame: &Frame) -> ProctorResult<Vec<Detection>> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| ProctorError::Inference("detector not loaded".to_string()))?;
        let response: DetectResponse = post_frame(&self.client, url, frame).await?;
        Ok(response.detections)
    }
}

#[derive(Debug, Deserialize)]
struct FaceEntry {
    landmarks: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct LandmarkResponse {
    #[serde(default)]
    faces: Vec<FaceEntry>,
}

/// Face-mesh extractor served over HTTP: `POST` frame bytes, receive
/// `{"faces":[{"landmarks":[{"x":..,"y":..,"z":..}, ...]}]}`. Only the first face is used.
#[derive(Debug, Clone)]
pub struct HttpLandmarkExtractor {
    url: Option<String>,
    client: reqwest::Client,
}

impl HttpLandmarkExtractor {
    pub fn new(url: Option<String>, timeout: Duration) -> ProctorResult<Self> {
        Ok(Self {
            url,
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl LandmarkExtractor for HttpLandmarkExtractor {
    async fn load(&self) -> ProctorResult<()> {
        if self.url.is_none() {
            return Err(ProctorError::model_load(
                "gaze",
                "no landmark endpoint configured",
            ));
        }
        Ok(())
    }

    async fn landmarks(&self, frame: &Frame) -> ProctorResult<Option<FaceLandmarks>> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| ProctorError::Inference("landmark model not loaded".to_string()))?;
        let response: LandmarkResponse = post_frame(&self.client, url, frame).await?;
        Ok(response
            .faces
            .into_iter()
            .next()
            .map(|face| FaceLandmarks::new(face.landmarks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_response_parses_without_bbox() {
        let json = r#"{"detections":[{"class":"cell phone","score":0.81}]}"#;
        let parsed: DetectResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.detections, vec![Detection::new("cell phone", 0.81)]);
    }

    #[test]
    fn landmark_response_without_faces_is_empty() {
        let parsed: LandmarkResponse = serde_json::from_str(r#"{"faces":[]}"#).unwrap();
        assert!(parsed.faces.is_empty());
        let parsed: LandmarkResponse =
            serde_json::from_str(r#"{"faces":[{"landmarks":[{"x":0.1,"y":0.2}]}]}"#).unwrap();
        assert_eq!(parsed.faces[0].landmarks[0], Point::new(0.1, 0.2));
    }
}
