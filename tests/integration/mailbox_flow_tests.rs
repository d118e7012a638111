//! Worker mailbox messages flowing through the watcher into registry
//! status changes and notification events.

use std::io::Write;
use std::time::Duration;

use orc_supervisor::mailbox::{deliver_batch, parse_batch};
use orc_supervisor::models::event::EventKind;
use orc_supervisor::models::session::SessionStatus;

use super::test_helpers::{harness, wait_until};

fn append(path: &std::path::Path, line: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .expect("open mailbox");
    writeln!(file, "{line}").expect("append");
}

#[tokio::test]
async fn done_message_moves_session_to_ready_with_one_event() {
    let mut h = harness();
    let ws = h.workspace("alpha");
    h.registry.spawn("alpha", &ws).await.expect("spawn");
    h.drain_events();

    append(&ws.join(".orc/mailbox"), "DONE: implemented feature");

    let event = h.next_event().await.expect("status event");
    assert_eq!(event.session_name, "alpha");
    assert_eq!(event.kind, EventKind::StatusChange);
    assert_eq!(event.old_status, SessionStatus::Active);
    assert_eq!(event.new_status, SessionStatus::Ready);
    assert_eq!(event.reason, "implemented feature");

    let session = h.registry.get("alpha").await.expect("session");
    assert_eq!(session.declared_status, SessionStatus::Ready);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.drain_events().is_empty(), "message must be delivered once");
}

#[tokio::test]
async fn messages_are_applied_in_append_order() {
    let mut h = harness();
    let ws = h.workspace("alpha");
    h.registry.spawn("alpha", &ws).await.expect("spawn");
    h.drain_events();

    let mailbox = ws.join(".orc/mailbox");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&mailbox)
        .expect("open mailbox");
    file.write_all(b"QUESTION: which branch?\nREADY: resuming\nDONE: finished\n")
        .expect("append batch");
    drop(file);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = h.next_event().await.expect("event");
        seen.push((event.old_status, event.new_status));
    }
    assert_eq!(
        seen,
        [
            (SessionStatus::Active, SessionStatus::NeedsAttention),
            (SessionStatus::NeedsAttention, SessionStatus::Active),
            (SessionStatus::Active, SessionStatus::Ready),
        ]
    );
}

#[tokio::test]
async fn unknown_types_and_malformed_lines_are_ignored() {
    let mut h = harness();
    let ws = h.workspace("alpha");
    h.registry.spawn("alpha", &ws).await.expect("spawn");
    h.drain_events();

    let mailbox = ws.join(".orc/mailbox");
    append(&mailbox, "PROGRESS: 40%");
    append(&mailbox, "not a message");
    append(&mailbox, "lower: case");
    append(&mailbox, "BLOCKED: waiting on review");

    let event = h.next_event().await.expect("blocked event");
    assert_eq!(event.new_status, SessionStatus::NeedsAttention);
    assert_eq!(event.reason, "waiting on review");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn message_written_before_spawn_is_delivered() {
    let mut h = harness();
    let ws = h.workspace("alpha");
    let mailbox = ws.join(".orc/mailbox");
    std::fs::create_dir_all(mailbox.parent().expect("parent")).expect("mkdir");
    append(&mailbox, "DONE: already finished");

    h.registry.spawn("alpha", &ws).await.expect("spawn");

    let mut statuses = Vec::new();
    while let Some(event) = h.next_event().await {
        statuses.push(event.new_status);
        if event.new_status == SessionStatus::Ready {
            break;
        }
    }
    assert_eq!(statuses, [SessionStatus::Active, SessionStatus::Ready]);
}

#[tokio::test]
async fn orphaned_claim_is_recovered_on_spawn() {
    let mut h = harness();
    let ws = h.workspace("alpha");
    let dir = ws.join(".orc");
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join(".mailbox.claimed.leftover"), "DONE: from last run\n")
        .expect("write orphan");

    h.registry.spawn("alpha", &ws).await.expect("spawn");

    let registry = h.registry.clone();
    assert!(
        wait_until(|| {
            let registry = registry.clone();
            async move {
                registry
                    .get("alpha")
                    .await
                    .is_some_and(|s| s.declared_status == SessionStatus::Ready)
            }
        })
        .await
    );
    assert!(!dir.join(".mailbox.claimed.leftover").exists());
    let events = h.drain_events();
    assert!(events.iter().any(|e| e.reason == "from last run"));
}

#[tokio::test]
async fn same_status_message_still_emits_event() {
    let h = harness();
    let ws = h.workspace("alpha");
    h.registry.spawn("alpha", &ws).await.expect("spawn");
    h.registry
        .set_status("alpha", SessionStatus::Ready)
        .await
        .expect("ready");

    let published = deliver_batch(
        &h.registry,
        &h.events,
        "alpha",
        parse_batch("DONE: again\nPING: hello\n"),
    )
    .await;
    assert_eq!(published, 1);
}

#[tokio::test]
async fn rejected_transition_is_still_surfaced_for_the_whole_batch() {
    let mut h = harness();
    let ws = h.workspace("alpha");
    h.registry.spawn("alpha", &ws).await.expect("spawn");
    h.registry
        .set_status("alpha", SessionStatus::Exited)
        .await
        .expect("exited");

    let published = deliver_batch(
        &h.registry,
        &h.events,
        "alpha",
        parse_batch("DONE: late\nERROR: also late\n"),
    )
    .await;
    assert_eq!(published, 2);
    let session = h.registry.get("alpha").await.expect("session");
    assert_eq!(session.declared_status, SessionStatus::Exited);

    let events: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter(|e| e.reason.contains("late"))
        .collect();
    assert_eq!(events.len(), 2);
    assert!(events[0].reason.starts_with("late"));
    assert!(events[1].reason.starts_with("also late"));
    for event in &events {
        assert_eq!(event.kind, EventKind::StatusChange);
        assert_eq!(event.old_status, SessionStatus::Exited);
        assert_eq!(event.new_status, SessionStatus::Exited);
        assert!(event.reason.contains("not applied"), "{}", event.reason);
    }
}

#[tokio::test]
async fn question_after_worker_exit_reaches_the_operator() {
    let mut h = harness();
    let ws = h.workspace("alpha");
    h.registry.spawn("alpha", &ws).await.expect("spawn");
    h.drain_events();

    h.host.exit_process(h.process_id("alpha").await, 1);
    let exited = h.next_event().await.expect("exit event");
    assert_eq!(exited.new_status, SessionStatus::Exited);

    let mailbox = ws.join(".orc/mailbox");
    append(&mailbox, "QUESTION: which port should I use?");

    let event = h.next_event().await.expect("question event");
    assert_eq!(event.kind, EventKind::StatusChange);
    assert_eq!(event.old_status, SessionStatus::Exited);
    assert_eq!(event.new_status, SessionStatus::Exited);
    assert!(
        event.reason.starts_with("which port should I use?"),
        "{}",
        event.reason
    );
    assert_eq!(
        h.registry.get("alpha").await.expect("session").declared_status,
        SessionStatus::Exited
    );
}

#[tokio::test]
async fn mailbox_stops_after_teardown() {
    let mut h = harness();
    let ws = h.workspace("alpha");
    h.registry.spawn("alpha", &ws).await.expect("spawn");
    h.registry.teardown("alpha", false).await.expect("teardown");
    h.drain_events();

    append(&ws.join(".orc/mailbox"), "DONE: too late");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(h.drain_events().is_empty());
    assert!(ws.join(".orc/mailbox").exists(), "unclaimed mailbox stays in place");
}
