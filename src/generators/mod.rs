//! Text and image generators the conversation is synthesized with.
//!
//! Both are blocking calls; the scheduler and the image producers run them on
//! the blocking thread pool.

pub mod command;
pub mod procedural;
pub mod scripted;

use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use command::{CommandImageGenerator, CommandTextGenerator};
pub use procedural::ProceduralSelfies;
pub use scripted::ScriptedTextGenerator;

/// Quality selfies are encoded at before publication.
pub const JPEG_QUALITY: u8 = 70;

/// Default timeout for one text generation (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Sampling parameters passed to the text generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Maximum continuation length in tokens.
    pub max_length: usize,
    /// Controls the "craziness" of the text.
    pub temperature: f64,
    /// If nonzero, limits sampling to the top k tokens.
    pub top_k: u32,
    /// If nonzero, limits sampling to the cumulative probability.
    pub top_p: f64,
    /// Continuations requested per call. One is picked at random.
    pub candidates: usize,
    pub timeout_secs: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 128,
            temperature: 0.7,
            top_k: 0,
            top_p: 0.7,
            candidates: 1,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl GenerationParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Produces raw continuations of a prompt.
pub trait TextGenerator: Send + Sync {
    /// Return up to `params.candidates` continuations of `prompt`.
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Vec<String>>;
}

/// Produces one participant's selfies. The same seed always yields the same image.
pub trait ImageGenerator: Send + Sync {
    fn generate(&self, seed: u64) -> Result<RgbImage>;
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode_image(image)?;
    Ok(bytes)
}
