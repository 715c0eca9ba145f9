//! Persisted conversations.
//!
//! A recording directory holds `conversation.jsonl`, one published turn per
//! line, and a side-car JPEG per selfie named `NNNN_<sender>.jpg`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::turn::{Selfie, Turn};
use crate::{mlog_debug, mlog_warn, Error, Result};

pub const CONVERSATION_FILE: &str = "conversation.jsonl";

/// One line of `conversation.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTurn {
    pub sender: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alt: String,
    /// Side-car file name, relative to the recording directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub starts_new_run: bool,
    pub published_at: DateTime<Utc>,
}

/// Appends published turns to a recording directory.
#[derive(Debug)]
pub struct ConversationRecorder {
    dir: PathBuf,
    file: File,
    images: usize,
}

impl ConversationRecorder {
    /// Open `dir` for recording, continuing an existing conversation.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let images = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("jpg"))
            .count();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(CONVERSATION_FILE))?;
        mlog_debug!("ConversationRecorder::create dir={} images={}", dir.display(), images);
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            images,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a selfie next to the conversation and return its path.
    pub fn save_image(&mut self, sender: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(format!("{:04}_{}.jpg", self.images, sender));
        fs::write(&path, bytes)?;
        self.images += 1;
        Ok(path)
    }

    pub fn append(&mut self, turn: &Turn) -> Result<()> {
        let image = turn
            .image_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned());
        let line = RecordedTurn {
            sender: turn.sender.clone(),
            text: turn.text.clone(),
            alt: turn.image.as_ref().map(|i| i.alt.clone()).unwrap_or_default(),
            image,
            starts_new_run: turn.starts_new_run,
            published_at: Utc::now(),
        };
        serde_json::to_writer(&mut self.file, &line)?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        Ok(())
    }
}

/// A recorded conversation loaded for replay.
#[derive(Debug, Clone)]
pub struct Recording {
    pub dir: PathBuf,
    pub turns: Vec<RecordedTurn>,
}

impl Recording {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONVERSATION_FILE);
        let reader = BufReader::new(File::open(&path)?);
        let mut turns = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let turn = serde_json::from_str(&line).map_err(|e| {
                Error::Config(format!("{} line {}: {}", path.display(), index + 1, e))
            })?;
            turns.push(turn);
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            turns,
        })
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns ready to publish again, selfies read back from disk.
    pub fn into_turns(self) -> Result<Vec<Turn>> {
        let mut out = Vec::with_capacity(self.turns.len());
        for recorded in self.turns {
            let mut turn = Turn::new(recorded.sender.clone(), recorded.text);
            turn.starts_new_run = recorded.starts_new_run;
            if let Some(name) = recorded.image {
                let path = self.dir.join(&name);
                match fs::read(&path) {
                    Ok(bytes) => {
                        let mut selfie = Selfie::new(&recorded.sender, bytes, 0);
                        if !recorded.alt.is_empty() {
                            selfie.alt = recorded.alt;
                        }
                        turn.image = Some(selfie);
                        turn.image_path = Some(path);
                    }
                    Err(e) => mlog_warn!("replay: missing selfie {}: {}", path.display(), e),
                }
            }
            out.push(turn);
        }
        Ok(out)
    }
}
