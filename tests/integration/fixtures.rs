//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Rapid two-participant configurations
//! - Scripted live sources and pre-filled image channels
//! - A scheduler harness with an event receiver and an in-memory store

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use murmur::config::Config;
use murmur::generators::{encode_jpeg, ImageGenerator, ProceduralSelfies, ScriptedTextGenerator};
use murmur::pool::RotatingPool;
use murmur::producer::{ImageChannels, SynthesizedImage};
use murmur::scheduler::{LiveSource, Scheduler, SchedulerEvent, Step, TurnSource};
use murmur::store::{MemoryStore, StoreEvent};
use murmur::timing::Deviation;
use murmur::TurnRecord;

/// Two participants `a` and `b`, `[IMG]` selfies, no pacing waits.
pub fn config() -> Config {
    Config {
        participants: vec!["a".to_string(), "b".to_string()],
        image_token: "[IMG]".to_string(),
        rapid: true,
        ..Config::default()
    }
}

/// Runs of exactly `length` generated turns.
pub fn config_with_runs(length: u32) -> Config {
    let mut config = config();
    config.runs.run_length = length;
    config.runs.run_deviation = Deviation::fixed(1.0);
    config
}

pub fn scripted(responses: &[&str]) -> Arc<ScriptedTextGenerator> {
    Arc::new(ScriptedTextGenerator::new(responses.iter().copied()))
}

pub fn live(text: Arc<ScriptedTextGenerator>, seeds: &[&str], images: ImageChannels) -> TurnSource {
    TurnSource::Live(LiveSource {
        text,
        prompts: RotatingPool::new(seeds.iter().map(|s| s.to_string()).collect(), "prompts")
            .unwrap(),
        images,
    })
}

pub fn selfie(participant: &str, seed: u64) -> SynthesizedImage {
    let image = ProceduralSelfies::new(participant).generate(seed).unwrap();
    SynthesizedImage {
        seed,
        bytes: encode_jpeg(&image).unwrap(),
    }
}

/// A channel for `participant` holding `ready` selfies. The sender is returned
/// so the channel stays open.
pub fn filled_channel(
    channels: &mut ImageChannels,
    participant: &str,
    ready: usize,
) -> mpsc::Sender<SynthesizedImage> {
    let (tx, rx) = mpsc::channel(ready.max(1));
    for seed in 0..ready {
        tx.try_send(selfie(participant, seed as u64)).unwrap();
    }
    channels.insert(participant, rx);
    tx
}

/// A scheduler wired to a memory store and an event receiver.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub scheduler: Scheduler,
    pub events: mpsc::UnboundedReceiver<SchedulerEvent>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new(config: &Config, source: TurnSource) -> Self {
        Self::with(config, source, |scheduler| scheduler)
    }

    /// Like [`Harness::new`], letting the test add sounds or a recorder.
    pub fn with(
        config: &Config,
        source: TurnSource,
        customize: impl FnOnce(Scheduler) -> Scheduler,
    ) -> Self {
        let store = Arc::new(MemoryStore::recording());
        let cancel = CancellationToken::new();
        let (tx, events) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(config, store.clone(), source, cancel.clone())
            .unwrap()
            .with_events(tx)
            .with_rng(StdRng::seed_from_u64(7));
        let scheduler = customize(scheduler);
        Self {
            store,
            scheduler,
            events,
            cancel,
        }
    }

    pub async fn steps(&mut self, count: usize) {
        for _ in 0..count {
            assert_eq!(self.scheduler.step().await.unwrap(), Step::Continue);
        }
    }

    /// `(sender, text, has_image)` of every published record.
    pub fn published(&self) -> Vec<(String, String, bool)> {
        self.store
            .published()
            .into_iter()
            .map(|r: TurnRecord| (r.sender, r.text, !r.image_bytes.is_empty()))
            .collect()
    }

    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Assert every published turn was announced by its sender's writing flag and
/// followed by the flag being cleared.
pub fn assert_writing_brackets(history: &[StoreEvent]) {
    for (index, event) in history.iter().enumerate() {
        let StoreEvent::Published { record, .. } = event else {
            continue;
        };
        let before = history[..index].iter().rev().find_map(|e| match e {
            StoreEvent::Writing(state) if state.writer == record.sender => Some(state.state),
            _ => None,
        });
        let after = history[index + 1..].iter().find_map(|e| match e {
            StoreEvent::Writing(state) if state.writer == record.sender => Some(state.state),
            _ => None,
        });
        assert_eq!(before, Some(1), "{} was not writing before {:?}", record.sender, record.text);
        assert_eq!(after, Some(0), "{} still writing after {:?}", record.sender, record.text);
    }
}
