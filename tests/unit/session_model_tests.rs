use std::path::PathBuf;

use orc_supervisor::models::session::{is_valid_name, Session, SessionStatus, StatusChange};

const WORKING: [SessionStatus; 5] = [
    SessionStatus::Active,
    SessionStatus::Ready,
    SessionStatus::Blocked,
    SessionStatus::NeedsAttention,
    SessionStatus::Done,
];

#[test]
fn new_session_starts_spawning_with_clear_flags() {
    let session = Session::new("alpha".into(), PathBuf::from("/w/alpha"));
    assert_eq!(session.declared_status, SessionStatus::Spawning);
    assert!(session.last_activity_signature.is_none());
    assert!(!session.notified_flags.idle);
    assert!(!session.notified_flags.stuck);
}

#[test]
fn spawning_only_leads_to_active_or_exited() {
    assert!(SessionStatus::Spawning.can_transition_to(SessionStatus::Active));
    assert!(SessionStatus::Spawning.can_transition_to(SessionStatus::Exited));
    assert!(!SessionStatus::Spawning.can_transition_to(SessionStatus::Ready));
}

#[test]
fn working_states_move_freely_between_each_other() {
    for from in WORKING {
        for to in WORKING {
            assert!(from.can_transition_to(to), "{from} -> {to}");
        }
    }
}

#[test]
fn every_state_may_exit() {
    for from in WORKING.into_iter().chain([SessionStatus::Spawning, SessionStatus::Exited]) {
        assert!(from.can_transition_to(SessionStatus::Exited), "{from}");
    }
}

#[test]
fn exited_is_left_only_by_respawn() {
    for to in WORKING {
        assert!(!SessionStatus::Exited.can_transition_to(to), "exited -> {to}");
    }
    for from in WORKING {
        assert!(!from.can_transition_to(SessionStatus::Spawning), "{from} -> spawning");
    }
}

#[test]
fn status_wire_names_are_snake_case() {
    assert_eq!(SessionStatus::NeedsAttention.to_string(), "needs_attention");
    assert_eq!(
        serde_json::to_string(&SessionStatus::NeedsAttention).unwrap(),
        "\"needs_attention\""
    );
    let parsed: SessionStatus = serde_json::from_str("\"exited\"").unwrap();
    assert_eq!(parsed, SessionStatus::Exited);
}

#[test]
fn status_change_reports_movement() {
    let moved = StatusChange {
        old: SessionStatus::Active,
        new: SessionStatus::Ready,
    };
    let same = StatusChange {
        old: SessionStatus::Ready,
        new: SessionStatus::Ready,
    };
    assert!(moved.changed());
    assert!(!same.changed());
}

#[test]
fn session_names() {
    assert!(is_valid_name("feature-42", false));
    assert!(is_valid_name("fix_login.v2", false));
    assert!(!is_valid_name("", false));
    assert!(!is_valid_name("two words", false));
    assert!(!is_valid_name("nested/name", false));
    assert!(!is_valid_name("line\nbreak", false));
    assert!(!is_valid_name("@main", false));
    assert!(is_valid_name("@main", true));
}
