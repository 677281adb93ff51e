//! Tests for `src/logging.rs`.

use blp_monitor::logging::{self, LoggingGuard};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    // Only one global subscriber per process; the directory is created
    // before installation is attempted.
    let _result = logging::init_production(&logs_dir, "info");
    assert!(logs_dir.exists(), "logs directory should be created");
}

#[test]
fn init_cli_tolerates_repeat_calls() {
    logging::init_cli("warn");
    logging::init_cli("debug");
}
