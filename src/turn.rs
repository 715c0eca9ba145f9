//! Conversation turns and the records they are published as.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A synthesized image attached to a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selfie {
    /// Encoded JPEG bytes.
    pub bytes: Vec<u8>,
    pub alt: String,
    /// Seed the image was synthesized from.
    pub seed: u64,
}

impl Selfie {
    pub fn new(sender: &str, bytes: Vec<u8>, seed: u64) -> Self {
        Self {
            bytes,
            alt: alt_text(sender),
            seed,
        }
    }
}

pub fn alt_text(sender: &str) -> String {
    format!("selfie of {}", sender)
}

/// One participant's contribution to the conversation.
///
/// A turn is pending for exactly one scheduler iteration and published at the
/// end of the next one. It is never modified after publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub sender: String,
    pub text: String,
    pub image: Option<Selfie>,
    pub sound: Vec<u8>,
    pub starts_new_run: bool,
    /// Where the selfie was written when the conversation is recorded.
    pub image_path: Option<PathBuf>,
}

impl Turn {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            image: None,
            sound: Vec::new(),
            starts_new_run: false,
            image_path: None,
        }
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub fn to_record(&self) -> TurnRecord {
        TurnRecord {
            sender: self.sender.clone(),
            text: self.text.clone(),
            image_bytes: self
                .image
                .as_ref()
                .map(|i| i.bytes.clone())
                .unwrap_or_default(),
            alt: self
                .image
                .as_ref()
                .map(|i| i.alt.clone())
                .unwrap_or_default(),
            sound_bytes: self.sound.clone(),
        }
    }
}

/// A published turn as written to the shared store.
///
/// Byte fields are base64 in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub sender: String,
    pub text: String,
    #[serde(with = "base64_bytes")]
    pub image_bytes: Vec<u8>,
    pub alt: String,
    #[serde(with = "base64_bytes")]
    pub sound_bytes: Vec<u8>,
}

/// Per-participant "currently composing" flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritingState {
    pub writer: String,
    /// 1 while writing, 0 otherwise.
    pub state: u8,
}

impl WritingState {
    pub fn new(writer: &str, writing: bool) -> Self {
        Self {
            writer: writer.to_string(),
            state: u8::from(writing),
        }
    }

    pub fn is_writing(&self) -> bool {
        self.state == 1
    }

    /// Stable store key for this participant's flag.
    pub fn key(&self) -> String {
        writing_key(&self.writer)
    }
}

pub fn writing_key(participant: &str) -> String {
    format!("writing:{}", participant)
}

pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
