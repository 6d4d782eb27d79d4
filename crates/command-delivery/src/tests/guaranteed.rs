//! Durable spool fallback, replay, and restart recovery.

use super::harness::{test_config, wait_until, MockCommunicator, ScriptedOutcome};
use crate::sender::CommandSender;
use command_protocol_types::Command;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn guaranteed_commands_spool_while_sender_is_stopped() {
    let dir = TempDir::new().unwrap();
    let communicator = MockCommunicator::new();
    let sender = CommandSender::new(communicator, test_config(&dir)).unwrap();

    for i in 0..3 {
        sender
            .send_asynch_guaranteed(Command::new(format!("g-{i}")), None)
            .await
            .unwrap();
        assert_eq!(sender.spooled_count(), i + 1);
    }
    // Straight to disk, never through the queue.
    assert_eq!(sender.queue_depth(), 0);
}

#[tokio::test]
async fn spooled_commands_replay_on_start_in_fifo_order() {
    let dir = TempDir::new().unwrap();
    let communicator = MockCommunicator::new();
    let mut config = test_config(&dir);
    config.max_concurrent = 1;
    let sender = CommandSender::new(communicator.clone(), config).unwrap();

    for i in 0..3 {
        sender
            .send_asynch_guaranteed(Command::new(format!("g-{i}")), None)
            .await
            .unwrap();
    }
    assert_eq!(sender.spooled_count(), 3);

    sender.start_sending();
    wait_until("spool drained and sent", Duration::from_secs(5), || {
        sender.sent_count() == 3 && sender.spooled_count() == 0
    })
    .await;

    let types: Vec<String> = communicator
        .sent_commands()
        .iter()
        .map(|c| c.command_type.clone())
        .collect();
    assert_eq!(types, vec!["g-0", "g-1", "g-2"]);

    sender.stop_sending(false).await;
}

#[tokio::test]
async fn guaranteed_commands_survive_sender_restart_by_path() {
    let dir = TempDir::new().unwrap();
    let communicator = MockCommunicator::new();

    {
        let sender = CommandSender::new(communicator.clone(), test_config(&dir)).unwrap();
        sender
            .send_asynch_guaranteed(Command::new("persisted-1"), None)
            .await
            .unwrap();
        sender
            .send_asynch_guaranteed(Command::new("persisted-2"), None)
            .await
            .unwrap();
        assert_eq!(sender.spooled_count(), 2);
        // Dropped without ever being started, as in a process restart.
    }

    let sender = CommandSender::new(communicator.clone(), test_config(&dir)).unwrap();
    assert_eq!(sender.spooled_count(), 2);

    sender.start_sending();
    wait_until("recovered commands sent", Duration::from_secs(5), || {
        sender.sent_count() == 2 && sender.spooled_count() == 0
    })
    .await;
    assert_eq!(communicator.sent_commands().len(), 2);

    sender.stop_sending(false).await;
}

#[tokio::test]
async fn guaranteed_command_prefers_queue_while_started() {
    let dir = TempDir::new().unwrap();
    let communicator = MockCommunicator::new();
    let sender = CommandSender::new(communicator, test_config(&dir)).unwrap();
    sender.start_sending();

    sender
        .send_asynch_guaranteed(Command::new("in-memory"), None)
        .await
        .unwrap();
    // The queue accepted it, so the spool was never touched.
    assert_eq!(sender.spooled_count(), 0);

    wait_until("command sent", Duration::from_secs(5), || {
        sender.sent_count() == 1
    })
    .await;
    assert_eq!(sender.spooled_count(), 0);

    sender.stop_sending(false).await;
}

#[tokio::test]
async fn full_queue_falls_back_to_spool_while_started() {
    let dir = TempDir::new().unwrap();
    let communicator = MockCommunicator::new();
    communicator.set_default_outcome(ScriptedOutcome::NeverRespond);

    let mut config = test_config(&dir);
    config.max_concurrent = 1;
    config.queue_size = 1;
    config.default_timeout_millis = 300;
    let sender = CommandSender::new(communicator, config).unwrap();
    sender.start_sending();

    // The worker grabs the first command and hangs in its attempt.
    sender.send_asynch(Command::new("v-1"), None).await;
    wait_until("worker busy", Duration::from_secs(5), || {
        sender.in_flight() == 1
    })
    .await;

    // The second fills the one-slot queue.
    sender.send_asynch(Command::new("v-2"), None).await;
    assert_eq!(sender.queue_depth(), 1);

    // The guaranteed command cannot be accepted immediately and falls
    // back to the spool.
    sender
        .send_asynch_guaranteed(Command::new("g-1"), None)
        .await
        .unwrap();
    assert_eq!(sender.spooled_count(), 1);

    sender.stop_sending(false).await;
}

#[tokio::test]
async fn guaranteed_command_spools_after_stop() {
    let dir = TempDir::new().unwrap();
    let communicator = MockCommunicator::new();
    let sender = CommandSender::new(communicator, test_config(&dir)).unwrap();

    sender.start_sending();
    sender.stop_sending(false).await;

    sender
        .send_asynch_guaranteed(Command::new("late"), None)
        .await
        .unwrap();
    assert_eq!(sender.spooled_count(), 1);
    assert_eq!(sender.queue_depth(), 0);
}
