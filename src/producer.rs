//! Image producer pipeline.
//!
//! One actor per participant keeps a bounded channel topped up with encoded
//! selfies. The scheduler is the only reader of each channel and never blocks
//! on it: it checks, and sleeps between checks when the channel is empty.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::generators::{encode_jpeg, ImageGenerator};
use crate::util::{blocking, pause, Pause};
use crate::{mlog_debug, mlog_error, mlog_trace, Error, Result};

/// Starting seeds are drawn below this so restarts begin at a different point.
pub const SEED_RANGE: u64 = 10_000;

/// An encoded selfie waiting in a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedImage {
    pub seed: u64,
    /// JPEG bytes.
    pub bytes: Vec<u8>,
}

/// Keeps one participant's channel full.
pub struct ImageProducer {
    participant: String,
    generator: Arc<dyn ImageGenerator>,
    tx: mpsc::Sender<SynthesizedImage>,
    seed: u64,
    poll_interval: Duration,
}

impl ImageProducer {
    pub fn new(
        participant: &str,
        generator: Arc<dyn ImageGenerator>,
        tx: mpsc::Sender<SynthesizedImage>,
        first_seed: u64,
    ) -> Self {
        Self {
            participant: participant.to_string(),
            generator,
            tx,
            seed: first_seed,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<()>> {
        mlog_debug!(
            "ImageProducer::spawn participant={} first_seed={}",
            self.participant,
            self.seed
        );
        tokio::spawn(self.run(cancel))
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() || self.tx.is_closed() {
                break;
            }

            if self.tx.capacity() == 0 {
                if pause(self.poll_interval, &cancel).await == Pause::Cancelled {
                    break;
                }
                continue;
            }

            let generator = Arc::clone(&self.generator);
            let seed = self.seed;
            let bytes = tokio::select! {
                _ = cancel.cancelled() => break,
                result = blocking(move || encode_jpeg(&generator.generate(seed)?)) => result?,
            };

            match self.tx.try_send(SynthesizedImage { seed, bytes }) {
                Ok(()) => mlog_trace!("ImageProducer {}: buffered seed {}", self.participant, seed),
                // Only this actor writes, so this means the capacity check raced
                // a close. The image is dropped and the seed still advances.
                Err(TrySendError::Full(_)) => {
                    mlog_debug!("ImageProducer {}: channel full, dropped seed {}", self.participant, seed)
                }
                Err(TrySendError::Closed(_)) => break,
            }
            self.seed += 1;
        }

        mlog_debug!("ImageProducer {} stopped at seed {}", self.participant, self.seed);
        Ok(())
    }
}

/// Result of checking a participant's channel once.
#[derive(Debug, PartialEq, Eq)]
pub enum ImageTake {
    Ready(SynthesizedImage),
    Empty,
    /// The producer is gone and nothing is left in the channel.
    Closed,
    /// No channel exists for this participant.
    Unknown,
}

/// Reading ends of every participant's channel.
#[derive(Debug, Default)]
pub struct ImageChannels {
    receivers: HashMap<String, mpsc::Receiver<SynthesizedImage>>,
}

impl ImageChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, participant: &str, rx: mpsc::Receiver<SynthesizedImage>) {
        self.receivers.insert(participant.to_string(), rx);
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.receivers.contains_key(participant)
    }

    /// Take one image without waiting.
    pub fn try_take(&mut self, participant: &str) -> ImageTake {
        let Some(rx) = self.receivers.get_mut(participant) else {
            return ImageTake::Unknown;
        };
        match rx.try_recv() {
            Ok(image) => ImageTake::Ready(image),
            Err(TryRecvError::Empty) => ImageTake::Empty,
            Err(TryRecvError::Disconnected) => ImageTake::Closed,
        }
    }

    /// Close every channel and discard what is buffered. Returns the number
    /// of discarded images.
    pub fn close(&mut self) -> usize {
        let mut drained = 0;
        for rx in self.receivers.values_mut() {
            rx.close();
            while rx.try_recv().is_ok() {
                drained += 1;
            }
        }
        drained
    }
}

/// Running producer actors.
pub struct ProducerSet {
    cancel: CancellationToken,
    handles: Vec<(String, JoinHandle<Result<()>>)>,
}

impl ProducerSet {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Ask every producer to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop every producer and wait for it. Returns the first producer failure.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        let (names, handles): (Vec<_>, Vec<_>) = self.handles.into_iter().unzip();

        let mut first_error = None;
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => Error::TaskJoin(e.to_string()),
            };
            mlog_error!("image producer {} failed: {}", name, error);
            first_error.get_or_insert(error);
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Builds channels and producers for every participant.
pub struct ImagePipeline;

impl ImagePipeline {
    /// Spawn one producer per participant. Producers stop when `parent` is
    /// cancelled or when [`ProducerSet::shutdown`] is called.
    pub fn spawn<R: Rng + ?Sized>(
        generators: Vec<(String, Arc<dyn ImageGenerator>)>,
        buffer: usize,
        poll_interval: Duration,
        parent: &CancellationToken,
        rng: &mut R,
    ) -> (ImageChannels, ProducerSet) {
        let cancel = parent.child_token();
        let mut channels = ImageChannels::new();
        let mut handles = Vec::with_capacity(generators.len());

        for (participant, generator) in generators {
            let (tx, rx) = mpsc::channel(buffer.max(1));
            let handle = ImageProducer::new(&participant, generator, tx, rng.gen_range(0..SEED_RANGE))
                .with_poll_interval(poll_interval)
                .spawn(cancel.clone());
            channels.insert(&participant, rx);
            handles.push((participant, handle));
        }

        (channels, ProducerSet { cancel, handles })
    }
}
