use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const JPEG_MIME: &str = "image/jpeg";

/// A compressed still image derived from one captured frame.
///
/// `approximate_size_kb` is the payload size as it travels on the wire:
/// the base64 length scaled back by 3/4, in KiB. It is computed once at
/// construction and is what [`SizeGuard`] checks against the ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSnapshot {
    bytes: Vec<u8>,
    mime_type: String,
    approximate_size_kb: f64,
}

impl EncodedSnapshot {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let approximate_size_kb = approximate_size_kb(base64_len(bytes.len()));
        Self {
            bytes,
            mime_type: mime_type.into(),
            approximate_size_kb,
        }
    }

    /// Decode a base64 payload (no Data-URI prefix) into a snapshot.
    pub fn from_base64(encoded: &str, mime_type: impl Into<String>) -> Result<Self, SnapshotError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        if bytes.is_empty() {
            return Err(SnapshotError::Empty);
        }
        Ok(Self::new(bytes, mime_type))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn approximate_size_kb(&self) -> f64 {
        self.approximate_size_kb
    }

    /// Standard base64 of the compressed bytes, without a Data-URI prefix.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Self-contained `data:` reference, as multimodal APIs expect for inline images.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// Length of the padded standard base64 encoding of `n` bytes.
fn base64_len(n: usize) -> usize {
    n.div_ceil(3) * 4
}

fn approximate_size_kb(encoded_len: usize) -> f64 {
    (encoded_len as f64 * 3.0 / 4.0) / 1024.0
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("snapshot payload is empty")]
    Empty,
}

/// Rejects snapshots above a byte ceiling before they are transmitted.
#[derive(Debug, Clone, Copy)]
pub struct SizeGuard {
    max_kb: f64,
}

impl SizeGuard {
    pub fn new(max_kb: f64) -> Self {
        Self { max_kb }
    }

    pub fn max_kb(&self) -> f64 {
        self.max_kb
    }

    pub fn check(&self, snapshot: EncodedSnapshot) -> Result<EncodedSnapshot, PayloadTooLarge> {
        let size_kb = snapshot.approximate_size_kb();
        if size_kb > self.max_kb {
            return Err(PayloadTooLarge {
                size_kb,
                max_kb: self.max_kb,
            });
        }
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("snapshot is {size_kb:.1} KB, ceiling is {max_kb:.1} KB")]
pub struct PayloadTooLarge {
    pub size_kb: f64,
    pub max_kb: f64,
}
