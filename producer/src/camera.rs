use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use image::RgbImage;
use tracing::{debug, info};

/// Device URLs currently held by an open [`HttpCamera`] in this process.
static ACQUIRED: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());

/// One raster sample pulled from the live source. Lives for a single tick.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pixels: RgbImage,
    pub captured_at_ms: i64,
}

impl VideoFrame {
    pub fn new(pixels: RgbImage) -> Self {
        Self {
            pixels,
            captured_at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Read the current frame of the active source.
    async fn capture(&self) -> Result<VideoFrame, CaptureError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture device {url} unavailable: {reason}")]
    DeviceUnavailable { url: String, reason: String },
    #[error("capture device {0} is already acquired")]
    DeviceBusy(String),
    #[error("no frame: {0}")]
    NoFrame(String),
}

/// A camera exposing its current picture as a still image over HTTP.
///
/// The device is acquired by [`HttpCamera::open`] and released by
/// [`HttpCamera::close`] or on drop. Only one handle per URL may be open
/// at a time.
pub struct HttpCamera {
    url: String,
    client: reqwest::Client,
    active: AtomicBool,
}

impl HttpCamera {
    pub async fn open(url: &str, connect_timeout: Duration) -> Result<Self, CaptureError> {
        claim(url)?;

        let camera = match probe(url, connect_timeout).await {
            Ok(client) => Self {
                url: url.to_string(),
                client,
                active: AtomicBool::new(true),
            },
            Err(reason) => {
                release(url);
                return Err(CaptureError::DeviceUnavailable {
                    url: url.to_string(),
                    reason,
                });
            }
        };

        info!(url, "camera acquired");
        Ok(camera)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop the stream and release the device. Idempotent.
    pub fn close(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            release(&self.url);
            info!(url = self.url, "camera released");
        }
    }
}

impl Drop for HttpCamera {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl FrameSource for HttpCamera {
    async fn capture(&self) -> Result<VideoFrame, CaptureError> {
        if !self.is_active() {
            return Err(CaptureError::NoFrame("camera is not active".into()));
        }

        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CaptureError::NoFrame(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CaptureError::NoFrame(format!(
                "camera returned HTTP {}",
                resp.status()
            )));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| CaptureError::NoFrame(e.to_string()))?;

        let pixels = image::load_from_memory(&body)
            .map_err(|e| CaptureError::NoFrame(format!("undecodable frame: {e}")))?
            .to_rgb8();

        let frame = VideoFrame::new(pixels);
        debug!(
            width = frame.width(),
            height = frame.height(),
            bytes = body.len(),
            "captured frame"
        );
        Ok(frame)
    }
}

async fn probe(url: &str, connect_timeout: Duration) -> Result<reqwest::Client, String> {
    let client = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(connect_timeout * 2)
        .build()
        .map_err(|e| e.to_string())?;
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("HTTP {}", resp.status()));
    }
    Ok(client)
}

fn claim(url: &str) -> Result<(), CaptureError> {
    let mut acquired = ACQUIRED.lock().unwrap_or_else(|e| e.into_inner());
    if !acquired.insert(url.to_string()) {
        return Err(CaptureError::DeviceBusy(url.to_string()));
    }
    Ok(())
}

fn release(url: &str) {
    ACQUIRED
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(url);
}
