//! Lifecycle tests.
//!
//! These tests verify that upstream failures surface as errors and that
//! cancellation cuts pacing waits short.

use std::time::{Duration, Instant};

use murmur::producer::ImageChannels;
use murmur::scheduler::StopReason;
use murmur::timing::Deviation;
use murmur::Error;

use crate::fixtures::{config, live, scripted, Harness};

/// Test: Generator failure
/// Given a text generator with nothing left to say
/// When the second iteration asks it for a continuation
/// Then the error reaches the caller and nothing is published
#[tokio::test]
async fn test_generator_failure_propagates() {
    let generator = scripted(&[]);
    let mut harness = Harness::new(&config(), live(generator, &["[A] start"], ImageChannels::new()));
    harness.steps(1).await;

    let error = harness.scheduler.step().await.unwrap_err();
    assert!(matches!(error, Error::TextGenerator(_)), "unexpected {:?}", error);
    assert!(harness.store.published().is_empty());
    // The pending sender was announced before generation failed.
    assert_eq!(harness.store.writing_history("a"), vec![0, 1]);
}

/// Test: Cancellation during a pause
/// Given real pacing with a five second pause between turns of one sender
/// When the token is cancelled shortly after the run begins
/// Then the scheduler stops promptly with the turns published so far
#[tokio::test]
async fn test_cancel_cuts_pause_short() {
    let mut config = config();
    config.rapid = false;
    config.timing.base_time = 0.0;
    config.timing.letter_time = 0.0;
    config.timing.image_time = 0.0;
    config.timing.run_time = 0.0;
    config.timing.same_sender_pause = Deviation::fixed(5.0);

    let generator = scripted(&["[A] again", "[A] and again"]);
    let mut harness = Harness::new(&config, live(generator, &["[A] start"], ImageChannels::new()));

    let cancel = harness.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let reason = harness.scheduler.run().await.unwrap();
    assert_eq!(reason, StopReason::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));

    // The same-sender pause was cut short, the iteration finished, and the
    // loop noticed the token before starting another one.
    let texts: Vec<String> = harness.published().into_iter().map(|(_, text, _)| text).collect();
    assert_eq!(texts, vec!["start"]);
    assert_eq!(harness.scheduler.pending().unwrap().text, "again");
}
