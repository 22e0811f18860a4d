use std::path::{Path, PathBuf};

use frame_describe_common::config::{SlotBackendKind, SlotConfig};
use frame_describe_common::snapshot::{EncodedSnapshot, JPEG_MIME};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Holds the last successfully analyzed snapshot, if any.
///
/// All access goes through [`FrameSlot::lock`], so a caller can read the
/// slot, do its work, and replace it without another request interleaving.
/// With a file backing, the image bytes are mirrored to disk on every
/// replace and reloaded on open.
pub struct FrameSlot {
    state: Mutex<SlotState>,
}

struct SlotState {
    current: Option<EncodedSnapshot>,
    path: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("failed to read slot file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write slot file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

impl FrameSlot {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(SlotState {
                current: None,
                path: None,
            }),
        }
    }

    /// Open a file-backed slot, loading the previous frame if the file exists.
    pub async fn file(path: impl Into<PathBuf>) -> Result<Self, SlotError> {
        let path = path.into();
        let current = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                let mime = sniff_mime(&bytes);
                info!(
                    path = path.display().to_string(),
                    bytes = bytes.len(),
                    mime,
                    "restored previous frame"
                );
                Some(EncodedSnapshot::new(bytes, mime))
            }
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => {
                return Err(SlotError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        Ok(Self {
            state: Mutex::new(SlotState {
                current,
                path: Some(path),
            }),
        })
    }

    pub async fn from_config(config: &SlotConfig) -> Result<Self, SlotError> {
        match config.backend {
            SlotBackendKind::Memory => Ok(Self::in_memory()),
            SlotBackendKind::File => Self::file(&config.path).await,
        }
    }

    /// Take exclusive access to the slot. Held across a whole describe cycle.
    pub async fn lock(&self) -> SlotGuard<'_> {
        SlotGuard {
            state: self.state.lock().await,
        }
    }
}

pub struct SlotGuard<'a> {
    state: MutexGuard<'a, SlotState>,
}

impl SlotGuard<'_> {
    pub fn current(&self) -> Option<&EncodedSnapshot> {
        self.state.current.as_ref()
    }

    /// Replace the slot content wholesale.
    ///
    /// The in-memory value is always updated. With a file backing, an error
    /// means the on-disk copy still holds the previous frame.
    pub async fn replace(&mut self, snapshot: EncodedSnapshot) -> Result<(), SlotError> {
        let persisted = match &self.state.path {
            Some(path) => write_atomically(path, snapshot.bytes()).await,
            None => Ok(()),
        };
        debug!(
            size_kb = format!("{:.1}", snapshot.approximate_size_kb()),
            "slot replaced"
        );
        self.state.current = Some(snapshot);
        persisted
    }
}

/// Overwrite `path` via a sibling temp file and rename, so readers never see
/// a half-written image.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), SlotError> {
    let tmp = tmp_path(path);
    let write_err = |source| SlotError::Write {
        path: path.display().to_string(),
        source,
    };
    tokio::fs::write(&tmp, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "slot".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// MIME type of an image payload, defaulting to JPEG when unrecognized.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or(JPEG_MIME)
}
