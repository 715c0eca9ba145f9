//! Turn scheduler.
//!
//! Every iteration walks the same states: wait for the pending turn to be
//! "read", mark its sender as writing, produce the next turn, wait for a selfie
//! if it asks for one, wait out the remaining writing time and finally publish
//! the pending turn. The turn produced in an iteration is published at the end
//! of the following one, so a sender's writing flag is always visible before
//! their message.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::generators::{GenerationParams, TextGenerator};
use crate::parser::{ResponseParser, Utterance};
use crate::pool::{PromptPool, SoundPool};
use crate::producer::{ImageChannels, ImageTake, SynthesizedImage};
use crate::recording::ConversationRecorder;
use crate::store::MessageStore;
use crate::timing::{Deviation, TimingModel};
use crate::turn::{Selfie, Turn, WritingState};
use crate::util::{blocking_with_timeout, pause, secs, Pause};
use crate::{mlog, mlog_debug, mlog_trace, mlog_warn, Error, Result};

/// Why the scheduler stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    RunBudgetExhausted,
    ReplayFinished,
}

/// Events emitted while the conversation unfolds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    WritingChanged { participant: String, writing: bool },
    TurnPublished { key: String, turn: Turn },
    RunStarted { seed: String, length: u32 },
    /// A continuation had no valid utterance and was replaced by a new run.
    InvalidGeneration { raw: String },
    ImageStarved { participant: String, attempt: u32 },
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop(StopReason),
}

/// Progress through the current run.
#[derive(Debug, Clone)]
pub struct RunState {
    configured: u32,
    deviation: Deviation,
    remaining: i64,
    completed: u32,
    budget: Option<u32>,
}

impl RunState {
    pub fn new(configured: u32, deviation: Deviation, budget: Option<u32>) -> Self {
        Self {
            configured,
            deviation,
            remaining: 0,
            completed: 0,
            budget,
        }
    }

    /// Runs never end when the configured length is zero.
    pub fn is_enabled(&self) -> bool {
        self.configured > 0
    }

    /// Whether the next turn is generated within the current run.
    pub fn continues(&self) -> bool {
        !self.is_enabled() || self.remaining > 0
    }

    /// Start a run of `configured × uniform(deviation)` generated turns.
    pub fn restart<R: Rng + ?Sized>(&mut self, rng: &mut R) -> u32 {
        let length = (f64::from(self.configured) * self.deviation.sample(rng)).max(0.0) as u32;
        self.remaining = i64::from(length);
        length
    }

    /// Count one generated turn against the run.
    pub fn consume(&mut self) {
        if self.is_enabled() {
            self.remaining -= 1;
        }
    }

    /// Mark the current run as finished. False once the run budget is spent.
    pub fn finish(&mut self) -> bool {
        self.completed += 1;
        self.budget.map_or(true, |budget| self.completed < budget)
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }
}

/// The pending turn and the one about to be published.
#[derive(Debug)]
pub struct TurnBuffer {
    pending: Turn,
    outgoing: Option<Turn>,
}

impl TurnBuffer {
    pub fn new(first: Turn) -> Self {
        Self {
            pending: first,
            outgoing: None,
        }
    }

    pub fn pending(&self) -> &Turn {
        &self.pending
    }

    pub fn outgoing(&self) -> Option<&Turn> {
        self.outgoing.as_ref()
    }

    /// Hold `next` as pending and move the previous pending turn out for publication.
    pub fn stage(&mut self, next: Turn) {
        self.outgoing = Some(mem::replace(&mut self.pending, next));
    }

    pub fn take_outgoing(&mut self) -> Option<Turn> {
        self.outgoing.take()
    }

    pub fn into_pending(self) -> Turn {
        self.pending
    }
}

/// Live generation inputs.
pub struct LiveSource {
    pub text: Arc<dyn TextGenerator>,
    pub prompts: PromptPool,
    pub images: ImageChannels,
}

/// Where new turns come from.
pub enum TurnSource {
    Live(LiveSource),
    /// A recorded conversation, replayed in order.
    Replay(VecDeque<Turn>),
}

#[derive(Debug, Clone)]
struct Pacing {
    model: TimingModel,
    write: Deviation,
    read: Deviation,
    same_sender: Deviation,
    run_pause: Duration,
    retry: Duration,
    max_wait_attempts: Option<u32>,
    expiry: Duration,
    rapid: bool,
}

impl Pacing {
    fn from_config(config: &Config) -> Self {
        Self {
            model: config.timing.model(),
            write: config.timing.write_deviation,
            read: config.timing.read_deviation,
            same_sender: config.timing.same_sender_pause,
            run_pause: config.timing.run_pause(),
            retry: config.images.retry_interval(),
            max_wait_attempts: config.images.max_wait_attempts,
            expiry: config.store.expiry(),
            rapid: config.rapid,
        }
    }
}

/// What is known about the pending turn while the next one is produced.
struct PendingInfo {
    sender: String,
    text: String,
    has_image: bool,
    starts_new_run: bool,
}

impl PendingInfo {
    fn of(turn: &Turn) -> Self {
        Self {
            sender: turn.sender.clone(),
            text: turn.text.clone(),
            has_image: turn.has_image(),
            starts_new_run: turn.starts_new_run,
        }
    }
}

enum Next {
    Turn { turn: Turn, generated: bool },
    Stop(StopReason),
}

/// Remove every echo of the prompt from a continuation.
pub fn remove_prompt(raw: &str, prompt: &str) -> String {
    if prompt.is_empty() {
        raw.to_string()
    } else {
        raw.replace(prompt, "")
    }
}

/// Drop recorded turns whose sender is not in the cast.
fn known_senders(turns: VecDeque<Turn>, participants: &[String]) -> VecDeque<Turn> {
    turns
        .into_iter()
        .filter(|turn| {
            let known = participants.contains(&turn.sender);
            if !known {
                mlog_warn!("replay: skipping turn from unknown sender {:?}", turn.sender);
            }
            known
        })
        .collect()
}

pub struct Scheduler {
    store: Arc<dyn MessageStore>,
    source: TurnSource,
    parser: ResponseParser,
    params: GenerationParams,
    pacing: Pacing,
    runs: RunState,
    memory: usize,
    history: VecDeque<String>,
    buffer: Option<TurnBuffer>,
    sounds: Option<SoundPool>,
    recorder: Option<ConversationRecorder>,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
    rng: StdRng,
    cancel: CancellationToken,
    last_sender: String,
    generation_started: Option<Instant>,
    finished: Option<StopReason>,
    iterations: u64,
    published: u64,
}

impl Scheduler {
    /// Build a scheduler and reset every participant's writing flag.
    pub fn new(
        config: &Config,
        store: Arc<dyn MessageStore>,
        source: TurnSource,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let parser = ResponseParser::new(
            config.role_format()?,
            &config.image_token,
            &config.participants,
        )?;
        for participant in &config.participants {
            store.set_writing(&WritingState::new(participant, false))?;
        }
        let source = match source {
            TurnSource::Replay(turns) => {
                TurnSource::Replay(known_senders(turns, parser.participants()))
            }
            live => live,
        };

        Ok(Self {
            store,
            source,
            parser,
            params: config.generation.clone(),
            pacing: Pacing::from_config(config),
            runs: RunState::new(
                config.runs.run_length,
                config.runs.run_deviation,
                config.runs.max_runs,
            ),
            memory: config.runs.memory.max(1),
            history: VecDeque::new(),
            buffer: None,
            sounds: None,
            recorder: None,
            events: None,
            rng: StdRng::from_entropy(),
            cancel,
            last_sender: String::new(),
            generation_started: None,
            finished: None,
            iterations: 0,
            published: 0,
        })
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_sounds(mut self, sounds: SoundPool) -> Self {
        self.sounds = Some(sounds);
        self
    }

    pub fn with_recorder(mut self, recorder: ConversationRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn pending(&self) -> Option<&Turn> {
        self.buffer.as_ref().map(TurnBuffer::pending)
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn runs(&self) -> &RunState {
        &self.runs
    }

    pub fn parser(&self) -> &ResponseParser {
        &self.parser
    }

    /// The rolling prompt: the last `memory` utterances, one per line.
    pub fn prompt(&self) -> String {
        let mut prompt = self
            .history
            .iter()
            .map(|u| u.trim_end_matches('\n'))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push('\n');
        prompt
    }

    /// Close the image channels and drop what is buffered in them.
    pub fn close_images(&mut self) -> usize {
        match &mut self.source {
            TurnSource::Live(live) => live.images.close(),
            TurnSource::Replay(_) => 0,
        }
    }

    /// Run until cancelled, out of runs or out of recorded turns.
    pub async fn run(&mut self) -> Result<StopReason> {
        loop {
            if self.cancel.is_cancelled() {
                mlog!("conversation cancelled after {} published turns", self.published);
                self.emit(SchedulerEvent::Stopped(StopReason::Cancelled));
                return Ok(StopReason::Cancelled);
            }
            if let Step::Stop(reason) = self.step().await? {
                return Ok(reason);
            }
        }
    }

    /// One iteration. The first call only produces the initial pending turn.
    pub async fn step(&mut self) -> Result<Step> {
        if let Some(reason) = self.finished {
            return Ok(Step::Stop(reason));
        }
        self.iterations += 1;

        let pending = self.buffer.as_ref().map(|b| PendingInfo::of(b.pending()));
        let Some(pending) = pending else {
            let first = self.first_turn().await?;
            mlog_debug!("first turn: {}> {}", first.sender, first.text);
            self.last_sender = first.sender.clone();
            self.buffer = Some(TurnBuffer::new(first));
            return Ok(Step::Continue);
        };

        // Read
        let read = self.read_time(&pending);
        self.last_sender = pending.sender.clone();
        self.sleep("read", read).await;

        // Writing
        self.set_writing(&pending.sender, true)?;
        self.generation_started.get_or_insert_with(Instant::now);

        // Generating, waiting for a selfie
        let (next, generated) = match self.next_turn().await? {
            Next::Turn { turn, generated } => (turn, generated),
            Next::Stop(reason) => return self.stop(reason, &pending).await,
        };
        mlog_debug!(
            "next turn: {}> {} image={} generated={}",
            next.sender,
            next.text,
            next.has_image(),
            generated
        );

        // Writing time
        self.wait_for_write(&pending).await;

        // Publish
        let outgoing = self.buffer.as_mut().and_then(|buffer| {
            buffer.stage(next);
            buffer.take_outgoing()
        });
        if let Some(turn) = outgoing {
            self.publish(turn, generated)?;
        }
        Ok(Step::Continue)
    }

    /// Stop, publishing the pending turn unless cancelled.
    async fn stop(&mut self, reason: StopReason, pending: &PendingInfo) -> Result<Step> {
        if reason != StopReason::Cancelled {
            self.wait_for_write(pending).await;
            if let Some(last) = self.buffer.take().map(TurnBuffer::into_pending) {
                self.publish(last, false)?;
            }
        }
        match reason {
            StopReason::ReplayFinished => mlog!("replay finished after {} turns", self.published),
            StopReason::RunBudgetExhausted => {
                mlog!("run budget exhausted after {} runs", self.runs.completed())
            }
            StopReason::Cancelled => {}
        }
        self.finished = Some(reason);
        self.emit(SchedulerEvent::Stopped(reason));
        Ok(Step::Stop(reason))
    }

    fn read_time(&mut self, pending: &PendingInfo) -> Duration {
        if pending.sender != self.last_sender {
            self.pacing.model.wait(
                &pending.text,
                pending.has_image,
                self.pacing.read,
                &mut self.rng,
            )
        } else {
            Duration::from_secs_f64(self.pacing.same_sender.sample(&mut self.rng))
        }
    }

    async fn wait_for_write(&mut self, pending: &PendingInfo) {
        let elapsed = self
            .generation_started
            .map(|start| start.elapsed())
            .unwrap_or_default();
        let write = self
            .pacing
            .model
            .wait(&pending.text, pending.has_image, self.pacing.write, &mut self.rng)
            .saturating_sub(elapsed);
        self.sleep("write", write).await;

        if pending.starts_new_run {
            self.sleep("run", self.pacing.run_pause).await;
        }
    }

    async fn sleep(&self, what: &str, duration: Duration) {
        if self.pacing.rapid {
            return;
        }
        mlog_debug!("waiting {} time {}", what, secs(duration));
        if pause(duration, &self.cancel).await == Pause::Cancelled {
            mlog_debug!("{} wait cut short by cancellation", what);
        }
    }

    async fn first_turn(&mut self) -> Result<Turn> {
        let replayed = match &mut self.source {
            TurnSource::Replay(turns) => Some(turns.pop_front()),
            TurnSource::Live(_) => None,
        };
        match replayed {
            Some(Some(mut turn)) => {
                self.attach(&mut turn)?;
                Ok(turn)
            }
            Some(None) => Err(Error::Config("recording has no turns".to_string())),
            None => {
                let utterance = self.start_run()?;
                self.live_turn(utterance, false).await
            }
        }
    }

    async fn next_turn(&mut self) -> Result<Next> {
        if let TurnSource::Replay(turns) = &mut self.source {
            let Some(mut turn) = turns.pop_front() else {
                return Ok(Next::Stop(StopReason::ReplayFinished));
            };
            self.attach(&mut turn)?;
            return Ok(Next::Turn {
                turn,
                generated: false,
            });
        }

        if self.runs.continues() {
            let raw = self.generate().await?;
            if let Some(utterance) = self.parser.first_utterance(&raw) {
                self.remember(&utterance.raw);
                let turn = self.live_turn(utterance, false).await?;
                return Ok(Next::Turn {
                    turn,
                    generated: true,
                });
            }
            mlog_warn!("no valid utterance in generated text, starting a new run: {:?}", raw);
            self.emit(SchedulerEvent::InvalidGeneration { raw });
        } else if !self.runs.finish() {
            return Ok(Next::Stop(StopReason::RunBudgetExhausted));
        }

        let utterance = self.start_run()?;
        let turn = self.live_turn(utterance, true).await?;
        Ok(Next::Turn {
            turn,
            generated: false,
        })
    }

    /// Draw a seed and reset the run length and the rolling prompt.
    fn start_run(&mut self) -> Result<Utterance> {
        let seed = match &mut self.source {
            TurnSource::Live(live) => live.prompts.get(),
            TurnSource::Replay(_) => {
                return Err(Error::Config("a replay cannot start new runs".to_string()))
            }
        };
        let utterance = self
            .parser
            .first_utterance(&seed)
            .ok_or_else(|| Error::InvalidSeed(seed.clone()))?;

        let length = self.runs.restart(&mut self.rng);
        self.history.clear();
        self.history.push_back(seed.clone());

        mlog!("new run of {} turns: {}", length, seed.trim_end());
        self.emit(SchedulerEvent::RunStarted { seed, length });
        Ok(utterance)
    }

    fn remember(&mut self, raw: &str) {
        self.history.push_back(raw.to_string());
        while self.history.len() > self.memory {
            self.history.pop_front();
        }
    }

    async fn generate(&mut self) -> Result<String> {
        let generator = match &self.source {
            TurnSource::Live(live) => Arc::clone(&live.text),
            TurnSource::Replay(_) => {
                return Err(Error::Config("a replay has no text generator".to_string()))
            }
        };
        let prompt = self.prompt();
        let params = self.params.clone();
        let request = prompt.clone();

        let candidates = blocking_with_timeout(self.params.timeout(), move || {
            generator.generate(&request, &params)
        })
        .await?;
        mlog_trace!("generator returned {} candidates: {:?}", candidates.len(), candidates);

        let chosen = candidates.choose(&mut self.rng).cloned().unwrap_or_default();
        Ok(remove_prompt(&chosen, &prompt))
    }

    async fn live_turn(&mut self, utterance: Utterance, starts_new_run: bool) -> Result<Turn> {
        let mut turn = Turn::new(utterance.sender, utterance.text);
        turn.starts_new_run = starts_new_run;

        if self.parser.contains_image(&turn.text) {
            turn.text = self.parser.strip_image(&turn.text);
            if let Some(image) = self.await_image(&turn.sender).await? {
                mlog_debug!("selfie of {} from seed {}", turn.sender, image.seed);
                turn.image = Some(Selfie::new(&turn.sender, image.bytes, image.seed));
            }
        }

        self.attach(&mut turn)?;
        Ok(turn)
    }

    /// Give a new turn its sound, and persist its selfie when recording.
    fn attach(&mut self, turn: &mut Turn) -> Result<()> {
        if let Some(sounds) = self.sounds.as_mut() {
            turn.sound = sounds.get();
        }
        if let (Some(recorder), Some(image)) = (self.recorder.as_mut(), turn.image.as_ref()) {
            turn.image_path = Some(recorder.save_image(&turn.sender, &image.bytes)?);
        }
        Ok(())
    }

    /// Check the sender's channel until a selfie is ready. Returns `None` when
    /// the wait is capped or cancelled, in which case the turn goes without one.
    async fn await_image(&mut self, sender: &str) -> Result<Option<SynthesizedImage>> {
        let mut attempt = 0u32;
        loop {
            let take = match &mut self.source {
                TurnSource::Live(live) => live.images.try_take(sender),
                TurnSource::Replay(_) => return Ok(None),
            };
            match take {
                ImageTake::Ready(image) => return Ok(Some(image)),
                ImageTake::Closed => return Err(Error::ImageProducerStopped(sender.to_string())),
                ImageTake::Unknown => {
                    mlog_warn!("no image producer for {}, sending without selfie", sender);
                    return Ok(None);
                }
                ImageTake::Empty => {}
            }

            attempt += 1;
            mlog_warn!("no selfie of {} ready yet (attempt {})", sender, attempt);
            self.emit(SchedulerEvent::ImageStarved {
                participant: sender.to_string(),
                attempt,
            });

            if self.pacing.max_wait_attempts.is_some_and(|max| attempt >= max) {
                mlog_warn!("gave up waiting for a selfie of {}", sender);
                return Ok(None);
            }
            if pause(self.pacing.retry, &self.cancel).await == Pause::Cancelled {
                return Ok(None);
            }
        }
    }

    fn set_writing(&self, participant: &str, writing: bool) -> Result<()> {
        self.store
            .set_writing(&WritingState::new(participant, writing))?;
        self.emit(SchedulerEvent::WritingChanged {
            participant: participant.to_string(),
            writing,
        });
        Ok(())
    }

    fn publish(&mut self, turn: Turn, generated: bool) -> Result<()> {
        let key = Uuid::new_v4().to_string();
        self.store
            .publish(&key, &turn.to_record(), self.pacing.expiry)?;
        self.set_writing(&turn.sender, false)?;
        if generated {
            self.runs.consume();
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.append(&turn)?;
        }
        self.generation_started = None;
        self.published += 1;

        mlog_debug!(
            "published {} from {} (run remaining {})",
            key,
            turn.sender,
            self.runs.remaining()
        );
        self.emit(SchedulerEvent::TurnPublished { key, turn });
        Ok(())
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
