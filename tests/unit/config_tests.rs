use std::time::Duration;

use orc_supervisor::bridge::ViewerOptions;
use orc_supervisor::orchestrator::{ReconcilerOptions, RegistryOptions};
use orc_supervisor::{config::GlobalConfig, AppError};

fn sample_toml(workspace: &str) -> String {
    format!(
        r#"
root_workspace = '{workspace}'
primary_session = "@lead"
mailbox_path = ".agents/inbox"

[worker]
command = "codex"
args = ["--full-auto"]
env = {{ RUST_LOG = "warn" }}

[workspaces]
worktrees_dir = "trees"
base_ref = "main"

[reconcile]
interval_seconds = 3
probe_timeout_ms = 500
idle_tail_lines = 20
idle_samples = 4
stuck_threshold_seconds = 600
debounce_samples = 3
contradiction_samples = 2

[mailbox]
rescan_interval_ms = 1500

[bridge]
http_port = 9000
grace_ms = 1000
poll_interval_ms = 250
input_debounce_ms = 10
rows = 30
cols = 100
max_poll_failures = 7

[notifications]
webhook_url = "http://127.0.0.1:9999/hook"
"#
    )
}

fn minimal_toml(workspace: &str) -> String {
    format!("root_workspace = '{workspace}'\n")
}

#[test]
fn parses_full_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = GlobalConfig::from_toml_str(&sample_toml(temp.path().to_str().unwrap()))
        .expect("config parses");

    assert_eq!(config.root_workspace, temp.path().canonicalize().unwrap());
    assert_eq!(config.primary_session, "@lead");
    assert_eq!(config.mailbox_path, std::path::PathBuf::from(".agents/inbox"));
    assert_eq!(config.worker.command, "codex");
    assert_eq!(config.worker.args, ["--full-auto"]);
    assert_eq!(config.worker.env.get("RUST_LOG").map(String::as_str), Some("warn"));
    assert_eq!(config.workspaces.base_ref, "main");
    assert_eq!(config.worktrees_dir(), config.root_workspace.join("trees"));
    assert_eq!(config.reconcile.interval(), Duration::from_secs(3));
    assert_eq!(config.reconcile.probe_timeout(), Duration::from_millis(500));
    assert_eq!(config.reconcile.stuck_threshold(), Duration::from_secs(600));
    assert_eq!(config.mailbox.rescan_interval(), Duration::from_millis(1500));
    assert_eq!(config.bridge.http_port, 9000);
    assert_eq!(
        config.notifications.webhook_url.as_deref(),
        Some("http://127.0.0.1:9999/hook")
    );
}

#[test]
fn minimal_config_uses_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = GlobalConfig::from_toml_str(&minimal_toml(temp.path().to_str().unwrap()))
        .expect("config parses");

    assert_eq!(config.primary_session, "@main");
    assert_eq!(config.mailbox_path, std::path::PathBuf::from(".orc/mailbox"));
    assert_eq!(config.worker.command, "claude");
    assert!(config.worker.args.is_empty());
    assert_eq!(config.workspaces.base_ref, "HEAD");
    assert_eq!(config.reconcile.interval(), Duration::from_secs(5));
    assert_eq!(config.reconcile.contradiction_samples, 1);
    assert_eq!(config.bridge.grace_ms, 2000);
    assert_eq!(config.bridge.poll_interval_ms, 300);
    assert_eq!(config.bridge.input_debounce_ms, 16);
    assert!(config.notifications.webhook_url.is_none());
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, minimal_toml(temp.path().to_str().unwrap())).expect("write");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.root_workspace, temp.path().canonicalize().unwrap());
}

#[test]
fn missing_file_is_config_error() {
    let err = GlobalConfig::load_from_path("/nonexistent/orc/config.toml").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn invalid_toml_is_config_error() {
    let err = GlobalConfig::from_toml_str("root_workspace = [").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn missing_root_workspace_is_rejected() {
    let err = GlobalConfig::from_toml_str("primary_session = \"@main\"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn nonexistent_root_workspace_is_rejected() {
    let err = GlobalConfig::from_toml_str("root_workspace = '/nonexistent/orc-root'\n").unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("root_workspace")));
}

#[test]
fn zero_interval_and_sample_counts_are_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_str().unwrap();

    for section in [
        "[reconcile]\ninterval_seconds = 0\n",
        "[reconcile]\nidle_samples = 0\n",
        "[reconcile]\ndebounce_samples = 0\n",
        "[bridge]\npoll_interval_ms = 0\n",
        "[worker]\ncommand = \"  \"\n",
    ] {
        let raw = format!("{}{section}", minimal_toml(root));
        let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "{section} gave {err}");
    }
}

#[test]
fn absolute_mailbox_path_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let raw = format!(
        "{}mailbox_path = '/tmp/mailbox'\n",
        minimal_toml(temp.path().to_str().unwrap())
    );
    let err = GlobalConfig::from_toml_str(&raw).unwrap_err();
    assert!(matches!(err, AppError::Config(msg) if msg.contains("mailbox_path")));
}

#[test]
fn runtime_options_derive_from_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = GlobalConfig::from_toml_str(&sample_toml(temp.path().to_str().unwrap()))
        .expect("config parses");

    let reconcile = ReconcilerOptions::from_config(&config.reconcile);
    assert_eq!(reconcile.interval, Duration::from_secs(3));
    assert_eq!(reconcile.idle_samples, 4);
    assert_eq!(reconcile.debounce_samples, 3);
    assert_eq!(reconcile.contradiction_samples, 2);

    let viewer = ViewerOptions::from_config(&config.bridge);
    assert_eq!(viewer.grace, Duration::from_millis(1000));
    assert_eq!(viewer.poll_interval, Duration::from_millis(250));
    assert_eq!(viewer.input_debounce, Duration::from_millis(10));
    assert_eq!((viewer.size.rows, viewer.size.cols), (30, 100));
    assert_eq!(viewer.max_poll_failures, 7);

    let registry = RegistryOptions::from_config(&config);
    assert_eq!(registry.primary_session, "@lead");
    assert_eq!(registry.base_ref, "main");
    assert_eq!(registry.mailbox_rescan, Duration::from_millis(1500));
    assert_eq!((registry.console_size.rows, registry.console_size.cols), (30, 100));
}
