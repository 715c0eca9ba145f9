//! Replay tests.
//!
//! These tests verify that a recorded conversation is published again in
//! order, selfies included, and that a live run can be recorded and replayed.

use std::collections::VecDeque;

use murmur::producer::ImageChannels;
use murmur::recording::{ConversationRecorder, Recording};
use murmur::scheduler::{StopReason, TurnSource};
use murmur::turn::{Selfie, Turn};
use murmur::Error;

use crate::fixtures::{config, config_with_runs, filled_channel, live, scripted, selfie, Harness};

fn replay_source(dir: &std::path::Path) -> TurnSource {
    let turns = Recording::load(dir).unwrap().into_turns().unwrap();
    TurnSource::Replay(VecDeque::from(turns))
}

/// Test: Replaying a recording
/// Given a recording of three turns, the last with a selfie
/// When it is replayed
/// Then all three turns are published in order and the selfie bytes survive
#[tokio::test]
async fn test_replay_publishes_every_turn() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = selfie("a", 4).bytes;
    {
        let mut recorder = ConversationRecorder::create(dir.path()).unwrap();
        recorder.append(&Turn::new("a", "hello")).unwrap();
        recorder.append(&Turn::new("b", "hi there")).unwrap();

        let mut last = Turn::new("a", "look");
        last.image_path = Some(recorder.save_image("a", &bytes).unwrap());
        last.image = Some(Selfie::new("a", bytes.clone(), 4));
        recorder.append(&last).unwrap();
    }

    let mut harness = Harness::new(&config(), replay_source(dir.path()));
    let reason = harness.scheduler.run().await.unwrap();
    assert_eq!(reason, StopReason::ReplayFinished);

    assert_eq!(
        harness.published(),
        vec![
            ("a".to_string(), "hello".to_string(), false),
            ("b".to_string(), "hi there".to_string(), false),
            ("a".to_string(), "look".to_string(), true),
        ]
    );
    let records = harness.store.published();
    assert_eq!(records[2].image_bytes, bytes);
    assert_eq!(records[2].alt, "selfie of a");
    assert_eq!(harness.store.writing_history("a").last(), Some(&0));
    assert_eq!(harness.store.writing_history("b").last(), Some(&0));
}

/// Test: Record then replay
/// Given a live run recorded to disk
/// When the recording is replayed
/// Then the replay publishes exactly what the live run published
#[tokio::test]
async fn test_recorded_run_replays_identically() {
    let dir = tempfile::tempdir().unwrap();

    let mut config = config_with_runs(3);
    config.runs.max_runs = Some(1);
    let mut images = ImageChannels::new();
    let _a_selfies = filled_channel(&mut images, "a", 1);
    let generator = scripted(&["[B] one", "[A] two [IMG]", "[B] three"]);
    let recorder = ConversationRecorder::create(dir.path()).unwrap();
    let mut live_run = Harness::with(
        &config,
        live(generator, &["[A] start"], images),
        |scheduler| scheduler.with_recorder(recorder),
    );
    assert_eq!(
        live_run.scheduler.run().await.unwrap(),
        StopReason::RunBudgetExhausted
    );

    let recording = Recording::load(dir.path()).unwrap();
    assert_eq!(recording.len(), 4);
    assert_eq!(recording.turns[2].image.as_deref(), Some("0000_a.jpg"));

    let mut replay = Harness::new(&config, replay_source(dir.path()));
    assert_eq!(
        replay.scheduler.run().await.unwrap(),
        StopReason::ReplayFinished
    );

    assert_eq!(replay.published(), live_run.published());
    let live_records = live_run.store.published();
    let replayed = replay.store.published();
    assert_eq!(replayed[2].image_bytes, live_records[2].image_bytes);
}

/// Test: Empty recording
/// Given a replay with no turns
/// When the scheduler starts
/// Then it fails with a configuration error
#[tokio::test]
async fn test_empty_replay_is_an_error() {
    let mut harness = Harness::new(&config(), TurnSource::Replay(VecDeque::new()));
    let error = harness.scheduler.step().await.unwrap_err();
    assert!(matches!(error, Error::Config(_)), "unexpected {:?}", error);
}

/// Test: Recording from another cast
/// Given a recording with a turn from a participant not in the config
/// When it is replayed
/// Then that turn is skipped and no writing flag is set for its sender
#[tokio::test]
async fn test_replay_skips_unknown_senders() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut recorder = ConversationRecorder::create(dir.path()).unwrap();
        recorder.append(&Turn::new("a", "hello")).unwrap();
        recorder.append(&Turn::new("carol", "who let me in")).unwrap();
        recorder.append(&Turn::new("b", "hi")).unwrap();
    }

    let mut harness = Harness::new(&config(), replay_source(dir.path()));
    assert_eq!(
        harness.scheduler.run().await.unwrap(),
        StopReason::ReplayFinished
    );

    let texts: Vec<String> = harness.published().into_iter().map(|(_, text, _)| text).collect();
    assert_eq!(texts, vec!["hello", "hi"]);
    assert!(harness.store.writing("carol").is_none());
    assert!(harness.store.writing_history("carol").is_empty());
}
