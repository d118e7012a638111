//! Reconciliation passes over fake processes: contradictions, probe
//! timeouts, idle and stuck detection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orc_supervisor::models::event::EventKind;
use orc_supervisor::models::session::SessionStatus;
use orc_supervisor::orchestrator::{Reconciler, ReconcilerOptions};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{harness, Harness};

fn options() -> ReconcilerOptions {
    ReconcilerOptions {
        interval: Duration::from_millis(20),
        probe_timeout: Duration::from_millis(50),
        idle_tail_lines: 5,
        idle_samples: 2,
        stuck_threshold: Duration::from_secs(60),
        debounce_samples: 1,
        contradiction_samples: 1,
    }
}

async fn spawned(name: &str) -> (Harness, u64) {
    let mut h = harness();
    let ws = h.workspace(name);
    h.registry.spawn(name, &ws).await.expect("spawn");
    h.drain_events();
    let id = h.process_id(name).await;
    (h, id)
}

fn reconciler(h: &Harness, options: ReconcilerOptions) -> Reconciler {
    Reconciler::new(h.registry.clone(), h.events.clone(), options)
}

#[tokio::test]
async fn dead_active_session_is_resolved_once() {
    let (mut h, id) = spawned("alpha").await;
    h.host.mark_dead_silently(id);
    let reconciler = reconciler(&h, options());

    let events = reconciler.run_pass().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Contradiction);
    assert_eq!(events[0].old_status, SessionStatus::Active);
    assert_eq!(events[0].new_status, SessionStatus::Exited);

    let session = h.registry.get("alpha").await.expect("session");
    assert_eq!(session.declared_status, SessionStatus::Exited);

    assert!(reconciler.run_pass().await.is_empty());
    let published = h.drain_events();
    assert_eq!(published.len(), 1, "exactly one contradiction published");
    assert_eq!(published[0].kind, EventKind::Contradiction);
}

#[tokio::test]
async fn dead_blocked_session_is_resolved() {
    let (h, id) = spawned("alpha").await;
    h.registry
        .set_status("alpha", SessionStatus::Blocked)
        .await
        .expect("blocked");
    h.host.mark_dead_silently(id);

    let events = reconciler(&h, options()).run_pass().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].old_status, SessionStatus::Blocked);
}

#[tokio::test]
async fn contradiction_waits_for_consecutive_dead_samples() {
    let (h, id) = spawned("alpha").await;
    h.host.mark_dead_silently(id);
    let reconciler = reconciler(
        &h,
        ReconcilerOptions {
            contradiction_samples: 2,
            ..options()
        },
    );

    assert!(reconciler.run_pass().await.is_empty());
    assert_eq!(
        h.registry.get("alpha").await.expect("session").declared_status,
        SessionStatus::Active
    );
    let events = reconciler.run_pass().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Contradiction);
}

#[tokio::test]
async fn hung_probe_is_not_a_contradiction() {
    let (h, id) = spawned("alpha").await;
    h.host.hang_probes(id, true);
    let reconciler = reconciler(&h, options());

    for _ in 0..2 {
        let events = tokio::time::timeout(Duration::from_secs(2), reconciler.run_pass())
            .await
            .expect("pass bounded by probe timeout");
        assert!(events.is_empty());
    }
    assert_eq!(
        h.registry.get("alpha").await.expect("session").declared_status,
        SessionStatus::Active
    );
}

#[tokio::test]
async fn unknown_sample_breaks_a_dead_streak() {
    let (h, id) = spawned("alpha").await;
    h.host.mark_dead_silently(id);
    let reconciler = reconciler(
        &h,
        ReconcilerOptions {
            contradiction_samples: 2,
            ..options()
        },
    );

    assert!(reconciler.run_pass().await.is_empty());
    h.host.hang_probes(id, true);
    assert!(reconciler.run_pass().await.is_empty());
    h.host.hang_probes(id, false);
    assert!(reconciler.run_pass().await.is_empty(), "streak restarted after unknown");
    assert_eq!(
        h.registry.get("alpha").await.expect("session").declared_status,
        SessionStatus::Active
    );

    let events = reconciler.run_pass().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Contradiction);
}

#[tokio::test]
async fn one_hung_session_does_not_delay_the_others() {
    let mut h = harness();
    for name in ["hung", "dead"] {
        let ws = h.workspace(name);
        h.registry.spawn(name, &ws).await.expect("spawn");
    }
    h.drain_events();
    h.host.hang_probes(h.process_id("hung").await, true);
    h.host.mark_dead_silently(h.process_id("dead").await);

    let events = reconciler(&h, options()).run_pass().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].session_name, "dead");
}

#[tokio::test]
async fn ready_session_with_dead_process_is_left_alone() {
    let (h, id) = spawned("alpha").await;
    h.registry
        .set_status("alpha", SessionStatus::Ready)
        .await
        .expect("ready");
    h.host.mark_dead_silently(id);

    assert!(reconciler(&h, options()).run_pass().await.is_empty());
    assert_eq!(
        h.registry.get("alpha").await.expect("session").declared_status,
        SessionStatus::Ready
    );
}

#[tokio::test]
async fn exited_session_with_live_process_is_not_corrected() {
    let (h, _) = spawned("alpha").await;
    h.registry
        .set_status("alpha", SessionStatus::Exited)
        .await
        .expect("exited");

    let reconciler = reconciler(&h, options());
    assert!(reconciler.run_pass().await.is_empty());
    assert!(reconciler.run_pass().await.is_empty());
    assert_eq!(
        h.registry.get("alpha").await.expect("session").declared_status,
        SessionStatus::Exited
    );
}

#[tokio::test]
async fn unchanged_output_emits_idle_once_per_episode() {
    let (h, id) = spawned("alpha").await;
    h.host.set_screen(id, "building...\n");
    let reconciler = reconciler(&h, options());

    assert!(reconciler.run_pass().await.is_empty());
    let events = reconciler.run_pass().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Idle);
    assert_eq!(events[0].old_status, SessionStatus::Active);
    assert_eq!(events[0].new_status, SessionStatus::Active);
    assert!(reconciler.run_pass().await.is_empty(), "idle fires once");

    // New output starts a new episode.
    h.host.set_screen(id, "building...\ntests passed\n");
    assert!(reconciler.run_pass().await.is_empty());
    let events = reconciler.run_pass().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Idle);
}

#[tokio::test]
async fn idle_respects_debounce() {
    let (h, id) = spawned("alpha").await;
    h.host.set_screen(id, "waiting\n");
    let reconciler = reconciler(
        &h,
        ReconcilerOptions {
            debounce_samples: 2,
            ..options()
        },
    );

    assert!(reconciler.run_pass().await.is_empty());
    assert!(reconciler.run_pass().await.is_empty());
    let events = reconciler.run_pass().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Idle);
}

#[tokio::test]
async fn idle_is_not_reported_for_non_active_sessions() {
    let (h, id) = spawned("alpha").await;
    h.host.set_screen(id, "done\n");
    h.registry
        .set_status("alpha", SessionStatus::Ready)
        .await
        .expect("ready");
    let reconciler = reconciler(&h, options());

    for _ in 0..4 {
        assert!(reconciler.run_pass().await.is_empty());
    }
}

#[tokio::test]
async fn active_session_without_progress_is_stuck() {
    let (h, id) = spawned("alpha").await;
    h.host.set_screen(id, "thinking\n");
    let reconciler = reconciler(&h, options());
    let start = Utc::now();

    assert!(reconciler.run_pass_at(start).await.is_empty());

    let later = start + chrono::Duration::seconds(61);
    let events = reconciler.run_pass_at(later).await;
    let stuck: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Stuck).collect();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].old_status, SessionStatus::Active);
    assert_eq!(stuck[0].new_status, SessionStatus::Active);

    let much_later = start + chrono::Duration::seconds(120);
    let events = reconciler.run_pass_at(much_later).await;
    assert!(events.iter().all(|e| e.kind != EventKind::Stuck), "stuck fires once");

    let session = h.registry.get("alpha").await.expect("session");
    assert!(session.notified_flags.stuck);
    assert!(session.notified_flags.idle);
}

#[tokio::test]
async fn status_change_clears_advisory_flags() {
    let (h, id) = spawned("alpha").await;
    h.host.set_screen(id, "idle\n");
    let reconciler = reconciler(&h, options());
    reconciler.run_pass().await;
    reconciler.run_pass().await;
    assert!(h.registry.get("alpha").await.expect("session").notified_flags.idle);

    h.registry
        .set_status("alpha", SessionStatus::Ready)
        .await
        .expect("ready");
    h.registry
        .set_status("alpha", SessionStatus::Active)
        .await
        .expect("active");
    let session = h.registry.get("alpha").await.expect("session");
    assert!(!session.notified_flags.idle);
    assert!(!session.notified_flags.stuck);
}

#[tokio::test]
async fn background_loop_runs_until_cancelled() {
    let (mut h, id) = spawned("alpha").await;
    h.host.mark_dead_silently(id);
    let cancel = CancellationToken::new();
    let handle = Arc::new(reconciler(&h, options())).spawn(cancel.clone());

    let event = h.next_event().await.expect("contradiction from loop");
    assert_eq!(event.kind, EventKind::Contradiction);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop stops")
        .expect("loop task");
}
