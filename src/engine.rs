//! Builds a conversation from configuration and runs it to completion.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::display::Transcript;
use crate::generators::{
    CommandImageGenerator, CommandTextGenerator, ImageGenerator, ProceduralSelfies,
    ScriptedTextGenerator, TextGenerator,
};
use crate::parser::ResponseParser;
use crate::pool::{load_prompts, load_sounds, PromptPool, RotatingPool, SoundPool};
use crate::producer::{ImagePipeline, ProducerSet};
use crate::recording::{ConversationRecorder, Recording};
use crate::scheduler::{LiveSource, Scheduler, SchedulerEvent, StopReason, TurnSource};
use crate::store::{FileStore, MemoryStore, MessageStore};
use crate::util::{pause, Pause};
use crate::{mlog, mlog_debug, mlog_error, Error, Result};

/// What the conversation is made of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Generate live. `script` replaces the text command with canned continuations.
    Live { script: Option<PathBuf> },
    /// Publish a recorded conversation again.
    Replay(PathBuf),
}

/// Startup summary printed by `murmur check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub participants: Vec<String>,
    pub seeds: usize,
    pub sounds: usize,
    pub text_command: Option<PathBuf>,
    pub image_source: String,
    pub store: String,
}

pub struct Engine {
    config: Config,
    base_dir: PathBuf,
    cancel: CancellationToken,
    verbose: bool,
}

impl Engine {
    /// Relative paths in `config` resolve against `base_dir`.
    pub fn new(config: Config, base_dir: &Path) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            base_dir: base_dir.to_path_buf(),
            cancel: CancellationToken::new(),
            verbose: false,
        })
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cancelling this token stops the conversation after the current turn.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn parser(&self) -> Result<ResponseParser> {
        ResponseParser::new(
            self.config.role_format()?,
            &self.config.image_token,
            &self.config.participants,
        )
    }

    pub fn open_store(&self) -> Result<Arc<dyn MessageStore>> {
        Ok(match &self.config.store.dir {
            Some(dir) => Arc::new(FileStore::open(&self.resolve(dir))?),
            None => Arc::new(MemoryStore::new()),
        })
    }

    /// Load the seeds, rejecting any that is not a valid utterance.
    pub fn load_prompts(&self) -> Result<PromptPool> {
        let seeds = load_prompts(&self.resolve(&self.config.prompts_file))?;
        let parser = self.parser()?;
        for seed in &seeds {
            if parser.first_utterance(seed).is_none() {
                return Err(Error::InvalidSeed(seed.clone()));
            }
        }
        RotatingPool::new(seeds, "prompts")
    }

    pub fn load_sounds(&self) -> Result<Option<SoundPool>> {
        match &self.config.sound_dir {
            Some(dir) => Ok(Some(RotatingPool::new(
                load_sounds(&self.resolve(dir))?,
                "sounds",
            )?)),
            None => Ok(None),
        }
    }

    pub fn text_generator(&self, script: Option<&Path>) -> Result<Arc<dyn TextGenerator>> {
        if let Some(script) = script {
            return Ok(Arc::new(ScriptedTextGenerator::load(&self.resolve(script))?));
        }
        let command = self
            .config
            .text_command
            .as_deref()
            .ok_or_else(|| Error::Config("text_command is not set".to_string()))?;
        Ok(Arc::new(CommandTextGenerator::from_command_line(command)?))
    }

    pub fn image_generators(&self) -> Result<Vec<(String, Arc<dyn ImageGenerator>)>> {
        self.config
            .participants
            .iter()
            .map(|participant| {
                let generator: Arc<dyn ImageGenerator> = match &self.config.image_command {
                    Some(command) => {
                        Arc::new(CommandImageGenerator::from_command_line(command, participant)?)
                    }
                    None => Arc::new(ProceduralSelfies::new(participant)),
                };
                Ok((participant.clone(), generator))
            })
            .collect()
    }

    /// Validate everything a live run needs without starting it.
    pub fn check(&self) -> Result<CheckReport> {
        let prompts = self.load_prompts()?;
        let sounds = self.load_sounds()?;
        let text_command = match &self.config.text_command {
            Some(command) => Some(
                CommandTextGenerator::from_command_line(command)?
                    .program()
                    .to_path_buf(),
            ),
            None => None,
        };
        self.image_generators()?;

        Ok(CheckReport {
            participants: self.config.participants.clone(),
            seeds: prompts.len(),
            sounds: sounds.map_or(0, |s| s.len()),
            text_command,
            image_source: self
                .config
                .image_command
                .clone()
                .unwrap_or_else(|| "built-in procedural selfies".to_string()),
            store: self
                .config
                .store
                .dir
                .as_ref()
                .map(|d| self.resolve(d).display().to_string())
                .unwrap_or_else(|| "in-memory".to_string()),
        })
    }

    /// Run the conversation until it stops, is cancelled or fails.
    ///
    /// Producers are always stopped and their channels drained before this
    /// returns, whatever the outcome.
    pub async fn run(&self, mode: Mode) -> Result<StopReason> {
        let store = self.open_store()?;
        let sounds = self.load_sounds()?;
        let recorder = match &self.config.record_dir {
            Some(dir) => Some(ConversationRecorder::create(&self.resolve(dir))?),
            None => None,
        };

        let (source, producers) = match &mode {
            Mode::Live { script } => {
                let text = self.text_generator(script.as_deref())?;
                let prompts = self.load_prompts()?;
                let (images, producers) = ImagePipeline::spawn(
                    self.image_generators()?,
                    self.config.images.buffer,
                    self.config.images.poll_interval(),
                    &self.cancel,
                    &mut rand::thread_rng(),
                );
                let source = TurnSource::Live(LiveSource {
                    text,
                    prompts,
                    images,
                });
                (source, Some(producers))
            }
            Mode::Replay(dir) => {
                let turns = Recording::load(&self.resolve(dir))?.into_turns()?;
                mlog!("replaying {} turns from {}", turns.len(), dir.display());
                (TurnSource::Replay(VecDeque::from(turns)), None)
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let transcript = Transcript::new(&self.config.participants, &self.config.colors)
            .verbose(self.verbose)
            .spawn(rx);

        let interrupt = self.listen_for_interrupt();
        let result = self.drive(store, source, sounds, recorder, tx).await;
        interrupt.abort();

        let teardown = shutdown(producers).await;
        let _ = transcript.await;

        match &result {
            Ok(reason) => mlog!("conversation stopped: {:?}", reason),
            Err(e) => mlog_error!("conversation failed: {}", e),
        }
        let reason = result?;
        teardown?;
        Ok(reason)
    }

    async fn drive(
        &self,
        store: Arc<dyn MessageStore>,
        source: TurnSource,
        sounds: Option<SoundPool>,
        recorder: Option<ConversationRecorder>,
        events: mpsc::UnboundedSender<SchedulerEvent>,
    ) -> Result<StopReason> {
        let mut scheduler =
            Scheduler::new(&self.config, store, source, self.cancel.clone())?.with_events(events);
        if let Some(sounds) = sounds {
            scheduler = scheduler.with_sounds(sounds);
        }
        if let Some(recorder) = recorder {
            scheduler = scheduler.with_recorder(recorder);
        }

        let delay = self.config.delay();
        if !delay.is_zero() {
            mlog!("starting in {:.1}s", delay.as_secs_f64());
            if pause(delay, &self.cancel).await == Pause::Cancelled {
                return Ok(StopReason::Cancelled);
            }
        }

        let result = scheduler.run().await;
        let drained = scheduler.close_images();
        mlog_debug!("discarded {} buffered selfies", drained);
        result
    }

    fn listen_for_interrupt(&self) -> tokio::task::JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                mlog!("interrupted, finishing the current turn");
                cancel.cancel();
            }
        })
    }
}

async fn shutdown(producers: Option<ProducerSet>) -> Result<()> {
    match producers {
        Some(producers) => {
            mlog_debug!("stopping {} image producers", producers.len());
            producers.shutdown().await
        }
        None => Ok(()),
    }
}
