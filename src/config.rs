use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::generators::GenerationParams;
use crate::parser::RoleFormat;
use crate::timing::{Deviation, TimingModel};
use crate::{mlog_debug, Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "murmur.toml";

/// Pacing constants, all in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Minimum time for writing any message.
    pub base_time: f64,
    /// Time it takes to write one letter.
    pub letter_time: f64,
    /// Time it takes to take a selfie.
    pub image_time: f64,
    /// Pause before the first turn of a new run is published.
    pub run_time: f64,
    pub write_deviation: Deviation,
    pub read_deviation: Deviation,
    /// Read pause when the same participant keeps talking.
    pub same_sender_pause: Deviation,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            base_time: 3.0,
            letter_time: 0.2,
            image_time: 6.0,
            run_time: 10.0,
            write_deviation: Deviation::new(0.8, 1.2),
            read_deviation: Deviation::new(0.6, 1.4),
            same_sender_pause: Deviation::new(1.0, 2.5),
        }
    }
}

impl TimingConfig {
    pub fn model(&self) -> TimingModel {
        TimingModel::new(self.base_time, self.letter_time, self.image_time)
    }

    pub fn run_pause(&self) -> Duration {
        Duration::from_secs_f64(self.run_time.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Average number of generated turns per run. 0 disables runs.
    pub run_length: u32,
    pub run_deviation: Deviation,
    /// Number of recent utterances fed back to the text generator.
    pub memory: usize,
    /// Stop after this many runs.
    pub max_runs: Option<u32>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_length: 50,
            run_deviation: Deviation::new(0.75, 1.25),
            memory: 1,
            max_runs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Prefetched selfies kept ready per participant.
    pub buffer: usize,
    /// Seconds between checks while waiting for a selfie.
    pub retry_interval: f64,
    /// Give up and publish without a selfie after this many empty checks.
    pub max_wait_attempts: Option<u32>,
    /// Seconds a producer sleeps while its buffer is full.
    pub poll_interval: f64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            buffer: 3,
            retry_interval: 1.0,
            max_wait_attempts: None,
            poll_interval: 0.25,
        }
    }
}

impl ImageConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.retry_interval.max(0.0))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the file store. In-memory when unset.
    pub dir: Option<PathBuf>,
    pub expiry_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            expiry_secs: 120,
        }
    }
}

impl StoreConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lower-case participant identifiers.
    pub participants: Vec<String>,
    /// Terminal colors, one per participant.
    pub colors: Vec<String>,
    /// How a participant is announced in text, e.g. `"[{name}] "`.
    pub role_format: String,
    /// How a selfie is announced in text.
    pub image_token: String,
    /// JSON array of conversation seeds.
    pub prompts_file: PathBuf,
    /// Directory of notification sounds.
    pub sound_dir: Option<PathBuf>,
    /// Text generator command.
    pub text_command: Option<String>,
    /// Image generator command. `{participant}` is substituted, the seed is
    /// appended. The built-in procedural selfies are used when unset.
    pub image_command: Option<String>,
    /// Persist published turns and selfies here for later replay.
    pub record_dir: Option<PathBuf>,
    /// Skip all pacing sleeps.
    pub rapid: bool,
    /// Seconds to wait before the first turn.
    pub delay: f64,
    pub generation: GenerationParams,
    pub timing: TimingConfig,
    pub runs: RunConfig,
    pub images: ImageConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            participants: Vec::new(),
            colors: Vec::new(),
            role_format: "[{name}] ".to_string(),
            image_token: "[image]".to_string(),
            prompts_file: PathBuf::from("prompts.json"),
            sound_dir: None,
            text_command: None,
            image_command: None,
            record_dir: None,
            rapid: false,
            delay: 0.0,
            generation: GenerationParams::default(),
            timing: TimingConfig::default(),
            runs: RunConfig::default(),
            images: ImageConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Starting point written by `murmur init`.
    pub fn example() -> Self {
        Self {
            participants: vec!["artist".to_string(), "scientist".to_string()],
            colors: vec!["magenta".to_string(), "cyan".to_string()],
            text_command: Some("python3 generate_text.py".to_string()),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        mlog_debug!("Config::load path={}", path.display());
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        mlog_debug!(
            "Config loaded: participants={:?}, role_format={:?}, run_length={}, rapid={}",
            config.participants,
            config.role_format,
            config.runs.run_length,
            config.rapid
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn role_format(&self) -> Result<RoleFormat> {
        RoleFormat::parse(&self.role_format)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay.max(0.0))
    }

    pub fn validate(&self) -> Result<()> {
        if self.participants.is_empty() {
            return Err(Error::Config("at least one participant is required".into()));
        }
        let mut seen = HashSet::new();
        for name in &self.participants {
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(Error::Config(format!(
                    "participant {:?} must be a single word",
                    name
                )));
            }
            if name.to_lowercase() != *name {
                return Err(Error::Config(format!(
                    "participant {:?} must be lower case",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(Error::Config(format!("participant {:?} listed twice", name)));
            }
        }
        if !self.colors.is_empty() && self.colors.len() != self.participants.len() {
            return Err(Error::Config(format!(
                "{} colors for {} participants",
                self.colors.len(),
                self.participants.len()
            )));
        }

        self.role_format()?;
        if self.image_token.is_empty() {
            return Err(Error::Config("image_token must not be empty".into()));
        }

        for (name, secs) in [
            ("delay", self.delay),
            ("timing.base_time", self.timing.base_time),
            ("timing.letter_time", self.timing.letter_time),
            ("timing.image_time", self.timing.image_time),
            ("timing.run_time", self.timing.run_time),
            ("images.retry_interval", self.images.retry_interval),
            ("images.poll_interval", self.images.poll_interval),
        ] {
            check_seconds(name, secs)?;
        }
        if self.images.poll_interval == 0.0 {
            return Err(Error::Config("images.poll_interval must be positive".into()));
        }

        self.timing.write_deviation.validate("write_deviation")?;
        self.timing.read_deviation.validate("read_deviation")?;
        self.timing.same_sender_pause.validate("same_sender_pause")?;
        self.runs.run_deviation.validate("run_deviation")?;

        if self.runs.memory == 0 {
            return Err(Error::Config("memory must be at least 1".into()));
        }
        if self.images.buffer == 0 {
            return Err(Error::Config("image buffer must be at least 1".into()));
        }
        if self.generation.candidates == 0 {
            return Err(Error::Config("candidates must be at least 1".into()));
        }
        Ok(())
    }
}

fn check_seconds(name: &str, secs: f64) -> Result<()> {
    if !secs.is_finite() {
        return Err(Error::Config(format!("{name} must be finite")));
    }
    if secs < 0.0 {
        return Err(Error::Config(format!("{name} must not be negative")));
    }
    Ok(())
}
