use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::crypto::{self, META_KEY, META_MASK};

/// Length of the `163 key(Don't modify):` prefix on the masked blob.
const META_PREFIX_LEN: usize = 22;

/// Length of the `music:` prefix on the decrypted JSON text.
const JSON_PREFIX_LEN: usize = 6;

/// Track id, written by some encoder versions as a JSON number and by
/// others as a string.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TrackId {
    Integer(u64),
    String(String),
}

/// Structured record recovered from the metadata blob. Every field is
/// optional; a missing field never fails the pipeline.
#[derive(Debug, Deserialize, Default)]
pub struct MetaRecord {
    /// Container format hint, e.g. "mp3" or "flac".
    pub format: Option<String>,

    #[serde(rename = "musicId")]
    pub music_id: Option<TrackId>,

    #[serde(rename = "musicName")]
    pub music_name: Option<String>,

    pub bitrate: Option<i64>,
}

impl MetaRecord {
    /// Format hint, with empty strings treated as absent.
    pub fn format_hint(&self) -> Option<&str> {
        self.format.as_deref().filter(|f| !f.is_empty())
    }
}

/// Best-effort unwrap of the metadata blob: XOR mask, strip the textual
/// prefix, base64, AES-ECB under [`META_KEY`], padding removal, strip
/// the `music:` prefix, parse JSON. Any failure means "no metadata" —
/// the format hint is then left to magic-byte detection.
pub fn unwrap_meta(blob: &[u8]) -> Option<MetaRecord> {
    if blob.is_empty() {
        return None;
    }

    let masked: Vec<u8> = blob.iter().map(|b| b ^ META_MASK).collect();
    let encoded = masked.get(META_PREFIX_LEN..)?;
    let wrapped = BASE64_STANDARD.decode(encoded).ok()?;
    let plain = crypto::unpad(crypto::aes_ecb_decrypt(&wrapped, &META_KEY).ok()?);
    let text = String::from_utf8(plain).ok()?;
    let json = text.get(JSON_PREFIX_LEN..)?;
    serde_json::from_str(json).ok()
}
