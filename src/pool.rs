//! Shuffle-without-replacement pickers for conversation seeds and
//! notification sounds.
//!
//! A pool hands out every source item exactly once per cycle. When the
//! working copy runs dry it is refilled from the source and reshuffled, so
//! cycle boundaries are randomized independently each time.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{mlog_debug, Error, Result};

#[derive(Debug, Clone)]
pub struct RotatingPool<T: Clone> {
    source: Vec<T>,
    working: Vec<T>,
    rng: StdRng,
}

/// Conversation seeds, each a pre-delimited utterance.
pub type PromptPool = RotatingPool<String>;

/// Encoded notification sounds.
pub type SoundPool = RotatingPool<Vec<u8>>;

impl<T: Clone> RotatingPool<T> {
    pub fn new(source: Vec<T>, what: &'static str) -> Result<Self> {
        Self::with_rng(source, what, StdRng::from_entropy())
    }

    pub fn with_rng(source: Vec<T>, what: &'static str, rng: StdRng) -> Result<Self> {
        if source.is_empty() {
            return Err(Error::EmptyPool(what));
        }
        Ok(Self {
            source,
            working: Vec::new(),
            rng,
        })
    }

    /// Draw the next item, starting a fresh shuffled cycle when exhausted.
    pub fn get(&mut self) -> T {
        if self.working.is_empty() {
            self.working = self.source.clone();
            self.working.shuffle(&mut self.rng);
        }
        match self.working.pop() {
            Some(item) => item,
            // working was refilled from a non-empty source above
            None => self.source[0].clone(),
        }
    }

    /// Number of distinct items in one cycle.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Items left before the next reshuffle.
    pub fn remaining(&self) -> usize {
        self.working.len()
    }

    pub fn items(&self) -> &[T] {
        &self.source
    }
}

/// Load conversation seeds from a JSON array of strings.
pub fn load_prompts(path: &Path) -> Result<Vec<String>> {
    mlog_debug!("load_prompts path={}", path.display());
    let prompts: Vec<String> = serde_json::from_str(&fs::read_to_string(path)?)?;
    if prompts.is_empty() {
        return Err(Error::EmptyPool("prompts"));
    }
    Ok(prompts)
}

/// Load every regular file in `dir` as a sound blob, in file-name order.
pub fn load_sounds(dir: &Path) -> Result<Vec<Vec<u8>>> {
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let sounds = paths
        .iter()
        .map(fs::read)
        .collect::<std::io::Result<Vec<_>>>()?;
    mlog_debug!("load_sounds dir={} count={}", dir.display(), sounds.len());
    if sounds.is_empty() {
        return Err(Error::EmptyPool("sounds"));
    }
    Ok(sounds)
}
