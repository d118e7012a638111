use orc_supervisor::AppError;

#[test]
fn display_prefixes_each_variant() {
    let cases = [
        (AppError::AlreadyExists("session a".into()), "already exists: session a"),
        (AppError::NotFound("session b".into()), "not found: session b"),
        (AppError::SpawnFailed("no pty".into()), "spawn failed: no pty"),
        (AppError::Protected("@main".into()), "protected: @main"),
        (AppError::DirtyWorkspace("/w".into()), "dirty workspace: /w"),
        (AppError::InvalidTransition("x".into()), "invalid transition: x"),
        (AppError::InvalidName("a b".into()), "invalid name: a b"),
        (AppError::StreamDropped("gone".into()), "stream dropped: gone"),
        (AppError::Workspace("git".into()), "workspace: git"),
        (AppError::Host("pty".into()), "host: pty"),
        (AppError::Sink("hook".into()), "sink: hook"),
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("disk".into()), "io: disk"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn only_transient_failures_are_retryable() {
    assert!(AppError::SpawnFailed(String::new()).is_retryable());
    assert!(AppError::Io(String::new()).is_retryable());
    assert!(AppError::Host(String::new()).is_retryable());

    assert!(!AppError::Protected(String::new()).is_retryable());
    assert!(!AppError::DirtyWorkspace(String::new()).is_retryable());
    assert!(!AppError::AlreadyExists(String::new()).is_retryable());
    assert!(!AppError::InvalidName(String::new()).is_retryable());
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
    assert!(matches!(err, AppError::Io(msg) if msg.contains("denied")));
}

#[test]
fn toml_errors_convert_to_config() {
    let parse: Result<toml::Value, _> = toml::from_str("= nope");
    let err: AppError = parse.unwrap_err().into();
    assert!(matches!(err, AppError::Config(msg) if msg.starts_with("invalid config")));
}
