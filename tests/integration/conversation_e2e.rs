//! End-to-end conversation tests.
//!
//! These tests verify the one-turn publication delay, the writing flags that
//! bracket every published turn, and selfie attachment.

use murmur::producer::ImageChannels;
use murmur::scheduler::SchedulerEvent;

use crate::fixtures::{
    assert_writing_brackets, config, config_with_runs, filled_channel, live, scripted, Harness,
};

/// Test: E2E two-participant scenario
/// Given seed "[A] start" and continuations "[B] reply one", "[A] reply two [IMG]"
/// When the scheduler runs until the third turn is published
/// Then turns appear in order with the selfie attached and writing flags toggled
#[tokio::test]
async fn test_e2e_publication_order_and_writing_flags() {
    let mut images = ImageChannels::new();
    let _a_selfies = filled_channel(&mut images, "a", 1);
    let generator = scripted(&["[B] reply one", "[A] reply two [IMG]"]);

    // Two generated turns, then the run ends and the seed is drawn again.
    let mut harness = Harness::new(&config_with_runs(2), live(generator.clone(), &["[A] start"], images));
    harness.steps(4).await;

    assert_eq!(
        harness.published(),
        vec![
            ("a".to_string(), "start".to_string(), false),
            ("b".to_string(), "reply one".to_string(), false),
            ("a".to_string(), "reply two".to_string(), true),
        ]
    );

    let records = harness.store.published();
    assert_eq!(records[2].alt, "selfie of a");
    assert_eq!(&records[2].image_bytes[..2], &[0xFF, 0xD8]);
    assert_eq!(records[0].alt, "");

    assert_eq!(harness.store.writing_history("a"), vec![0, 1, 0, 1, 0]);
    assert_eq!(harness.store.writing_history("b"), vec![0, 1, 0]);
    assert_writing_brackets(&harness.store.history());

    assert_eq!(generator.prompts(), vec!["[A] start\n", "[B] reply one\n"]);
}

/// Test: Publication delay invariant
/// Given a steady supply of valid continuations
/// When k iterations complete
/// Then exactly k-1 turns are published and one turn is pending
#[tokio::test]
async fn test_publication_lags_one_iteration() {
    let responses: Vec<String> = (0..8)
        .map(|i| if i % 2 == 0 { format!("[B] b{}", i) } else { format!("[A] a{}", i) })
        .collect();
    let generator = scripted(&responses.iter().map(String::as_str).collect::<Vec<_>>());
    let mut harness = Harness::new(&config(), live(generator, &["[A] start"], ImageChannels::new()));

    assert!(harness.scheduler.pending().is_none());
    for k in 1..=8u64 {
        harness.steps(1).await;
        assert_eq!(harness.scheduler.iterations(), k);
        assert_eq!(harness.store.published().len() as u64, k - 1);
        assert_eq!(harness.scheduler.published(), k - 1);
        assert!(harness.scheduler.pending().is_some());
    }
}

/// Test: Events mirror the store
/// Given a short conversation
/// When it is stepped
/// Then every published record is also announced as an event, in order
#[tokio::test]
async fn test_events_follow_publications() {
    let generator = scripted(&["[B] one", "[A] two", "[B] three"]);
    let mut harness = Harness::new(&config(), live(generator, &["[A] start"], ImageChannels::new()));
    harness.steps(4).await;

    let published: Vec<String> = harness
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            SchedulerEvent::TurnPublished { turn, .. } => Some(turn.text),
            _ => None,
        })
        .collect();
    assert_eq!(published, vec!["start", "one", "two"]);
}

/// Test: Keys are unique
/// Given several published turns
/// When their keys are collected
/// Then no key repeats
#[tokio::test]
async fn test_published_keys_unique() {
    let generator = scripted(&["[B] one", "[A] two", "[B] three", "[A] four"]);
    let mut harness = Harness::new(&config(), live(generator, &["[A] start"], ImageChannels::new()));
    harness.steps(5).await;

    let mut keys: Vec<String> = harness
        .store
        .history()
        .into_iter()
        .filter_map(|event| match event {
            murmur::store::StoreEvent::Published { key, .. } => Some(key),
            _ => None,
        })
        .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), total);
    assert_eq!(total, 4);
}

/// Test: Sounds rotate with turns
/// Given a sound pool of two blobs
/// When four turns are published
/// Then every turn carries a sound and both blobs are used within each cycle
#[tokio::test]
async fn test_sounds_attached_to_turns() {
    let generator = scripted(&["[B] one", "[A] two", "[B] three", "[A] four"]);
    let sounds = murmur::pool::RotatingPool::new(vec![b"ding".to_vec(), b"dong".to_vec()], "sounds").unwrap();
    let mut harness = Harness::with(
        &config(),
        live(generator, &["[A] start"], ImageChannels::new()),
        |scheduler| scheduler.with_sounds(sounds),
    );
    harness.steps(5).await;

    let sounds: Vec<Vec<u8>> = harness.store.published().into_iter().map(|r| r.sound_bytes).collect();
    assert_eq!(sounds.len(), 4);
    let mut first_cycle = sounds[..2].to_vec();
    first_cycle.sort();
    assert_eq!(first_cycle, vec![b"ding".to_vec(), b"dong".to_vec()]);
}
