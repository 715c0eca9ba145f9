//! Selfie channel tests.
//!
//! These tests verify what happens when a turn asks for a selfie and the
//! sender's channel is empty, closed or fed by a running producer.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use murmur::generators::{ImageGenerator, ProceduralSelfies};
use murmur::producer::{ImageChannels, ImagePipeline};
use murmur::scheduler::SchedulerEvent;
use murmur::Error;

use crate::fixtures::{config, filled_channel, live, scripted, Harness};

fn starved(events: &[SchedulerEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            SchedulerEvent::ImageStarved { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect()
}

/// Test: Capped image wait
/// Given max_wait_attempts 2 and an empty channel whose producer is alive
/// When a turn asks for a selfie
/// Then the turn goes out without one after two attempts
#[tokio::test]
async fn test_capped_wait_falls_back_to_no_image() {
    let mut config = config();
    config.images.max_wait_attempts = Some(2);
    config.images.retry_interval = 0.0;

    let mut images = ImageChannels::new();
    let _b_selfies = filled_channel(&mut images, "b", 0);
    let generator = scripted(&["[B] pic [IMG]"]);
    let mut harness = Harness::new(&config, live(generator, &["[A] start"], images));
    harness.steps(2).await;

    let pending = harness.scheduler.pending().unwrap();
    assert_eq!(pending.sender, "b");
    assert_eq!(pending.text, "pic");
    assert!(!pending.has_image());
    assert_eq!(starved(&harness.drain_events()), vec![1, 2]);
}

/// Test: Buffered selfie is consumed
/// Given two selfies waiting in the sender's channel
/// When one turn asks for a selfie
/// Then it takes exactly one and leaves the other buffered
#[tokio::test]
async fn test_ready_selfie_taken_once() {
    let mut images = ImageChannels::new();
    let _b_selfies = filled_channel(&mut images, "b", 2);
    let generator = scripted(&["[B] [IMG] hello"]);
    let mut harness = Harness::new(&config(), live(generator, &["[A] start"], images));
    harness.steps(2).await;

    let pending = harness.scheduler.pending().unwrap();
    assert_eq!(pending.text, "hello");
    let selfie = pending.image.as_ref().unwrap();
    assert_eq!(selfie.seed, 0);
    assert_eq!(selfie.alt, "selfie of b");
    assert!(starved(&harness.drain_events()).is_empty());
    assert_eq!(harness.scheduler.close_images(), 1);
}

/// Test: Stopped producer
/// Given a sender whose producer is gone and whose channel is empty
/// When a turn asks for a selfie
/// Then the iteration fails instead of waiting forever
#[tokio::test]
async fn test_closed_channel_is_fatal() {
    let mut images = ImageChannels::new();
    drop(filled_channel(&mut images, "b", 0));
    let generator = scripted(&["[B] pic [IMG]"]);
    let mut harness = Harness::new(&config(), live(generator, &["[A] start"], images));
    harness.steps(1).await;

    let result = harness.scheduler.step().await;
    assert!(matches!(result, Err(Error::ImageProducerStopped(ref name)) if name == "b"));
    assert!(harness.store.published().is_empty());
}

/// Test: Selfies from a running pipeline
/// Given procedural producers for both participants
/// When a turn asks for a selfie
/// Then every selfie turn carries an image from its sender's producer
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_feeds_scheduler() {
    let mut config = config();
    config.images.retry_interval = 0.02;

    let generators: Vec<(String, Arc<dyn ImageGenerator>)> = config
        .participants
        .iter()
        .map(|p| {
            let generator: Arc<dyn ImageGenerator> = Arc::new(ProceduralSelfies::new(p));
            (p.clone(), generator)
        })
        .collect();
    let mut rng = StdRng::seed_from_u64(3);
    let parent = tokio_util::sync::CancellationToken::new();
    let (images, producers) =
        ImagePipeline::spawn(generators, 2, Duration::from_millis(10), &parent, &mut rng);

    let generator = scripted(&["[B] me [IMG]", "[A] me too [IMG]"]);
    let mut harness = Harness::new(&config, live(generator, &["[A] start"], images));
    harness.steps(4).await;

    let published = harness.published();
    assert_eq!(
        published,
        vec![
            ("a".to_string(), "start".to_string(), false),
            ("b".to_string(), "me".to_string(), true),
        ]
    );
    let pending = harness.scheduler.pending().unwrap();
    assert_eq!(pending.text, "me too");
    assert!(pending.has_image());

    harness.scheduler.close_images();
    producers.shutdown().await.unwrap();
}

/// Test: Zero retry interval on a single thread
/// Given a current-thread runtime, a procedural producer and retry_interval 0
/// When the scheduler waits for a selfie that is still being synthesized
/// Then the wait yields to the producer and the selfie arrives
#[tokio::test]
async fn test_zero_retry_interval_yields_to_producer() {
    let mut config = config();
    config.images.retry_interval = 0.0;

    let generator: Arc<dyn ImageGenerator> = Arc::new(ProceduralSelfies::new("b"));
    let mut rng = StdRng::seed_from_u64(5);
    let parent = tokio_util::sync::CancellationToken::new();
    let (images, producers) = ImagePipeline::spawn(
        vec![("b".to_string(), generator)],
        1,
        Duration::from_millis(10),
        &parent,
        &mut rng,
    );

    let script = scripted(&["[B] pic [IMG]"]);
    let mut harness = Harness::new(&config, live(script, &["[A] start"], images));
    tokio::time::timeout(Duration::from_secs(10), harness.steps(2))
        .await
        .expect("scheduler starved its producer");

    assert!(harness.scheduler.pending().unwrap().has_image());
    harness.scheduler.close_images();
    producers.shutdown().await.unwrap();
}
