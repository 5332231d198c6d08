//! Opaque binary attachments carried by user turns.
//!
//! An attachment is an immutable `{bytes, media_type}` pair. Bytes are held
//! behind an `Arc` so that buffer snapshots and pending requests share them
//! instead of copying.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(with = "base64_bytes")]
    bytes: Arc<[u8]>,
    media_type: String,
}

impl Attachment {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    /// Parse a `data:<media type>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> anyhow::Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| anyhow::anyhow!("not a data URL"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("data URL has no payload"))?;
        let media_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| anyhow::anyhow!("data URL is not base64 encoded"))?;
        if media_type.is_empty() {
            anyhow::bail!("data URL has no media type");
        }

        let bytes = STANDARD.decode(payload.trim())?;
        Ok(Self::new(bytes, media_type))
    }

    /// Read a file and infer its media type from the extension.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let media_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(media_type_for_extension)
            .ok_or_else(|| {
                anyhow::anyhow!("Unsupported attachment type: {}", path.display())
            })?;
        let bytes = std::fs::read(path)?;
        Ok(Self::new(bytes, media_type))
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.to_base64())
    }

    /// Hex SHA-256 over the media type and the bytes.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.media_type.as_bytes());
        hasher.update(b":");
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

fn media_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

mod base64_bytes {
    use std::sync::Arc;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Arc<[u8]>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Arc::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_round_trip() {
        let original = Attachment::new(b"\x89PNG fake".to_vec(), "image/png");
        let parsed = Attachment::from_data_url(&original.to_data_url()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn rejects_non_base64_data_url() {
        assert!(Attachment::from_data_url("data:text/plain,hello").is_err());
        assert!(Attachment::from_data_url("https://example.com/a.png").is_err());
        assert!(Attachment::from_data_url("data:;base64,aGk=").is_err());
    }

    #[test]
    fn digest_is_deterministic_and_type_sensitive() {
        let a = Attachment::new(vec![1_u8, 2, 3], "image/png");
        let b = Attachment::new(vec![1_u8, 2, 3], "image/png");
        let c = Attachment::new(vec![1_u8, 2, 3], "image/jpeg");
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn clones_share_bytes() {
        let a = Attachment::new(vec![7_u8; 1024], "image/png");
        let b = a.clone();
        assert!(std::ptr::eq(a.bytes().as_ptr(), b.bytes().as_ptr()));
    }

    #[test]
    fn serializes_bytes_as_base64() {
        let a = Attachment::new(b"hi".to_vec(), "text/plain");
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["bytes"], "aGk=");
        assert_eq!(json["media_type"], "text/plain");

        let back: Attachment = serde_json::from_value(json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn infers_media_type_from_extension() {
        assert_eq!(media_type_for_extension("JPG"), Some("image/jpeg"));
        assert_eq!(media_type_for_extension("exe"), None);
    }
}
