// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use nix::sys::signal::Signal;

#[test]
fn parse_signal_accepts_common_names() {
    assert_eq!(parse_signal(""), Some(Signal::SIGTERM));
    assert_eq!(parse_signal("SIGTERM"), Some(Signal::SIGTERM));
    assert_eq!(parse_signal("SIGKILL"), Some(Signal::SIGKILL));
    assert_eq!(parse_signal("SIGINT"), Some(Signal::SIGINT));
    assert_eq!(parse_signal("sigterm"), Some(Signal::SIGTERM));
    assert_eq!(parse_signal("TERM"), Some(Signal::SIGTERM));
    assert_eq!(parse_signal("hup"), Some(Signal::SIGHUP));
}

#[test]
fn parse_signal_rejects_garbage() {
    assert_eq!(parse_signal("SIGBOGUS"), None);
    assert_eq!(parse_signal("9000"), None);
}

#[test]
fn spawn_rejects_empty_command() {
    let result = PtyHost::spawn(&[], std::path::Path::new("/"), 80, 24, "xterm", &[]);
    assert!(result.is_err());
}

#[tokio::test]
async fn commander_reports_closed_channel() {
    let (commander, rx) = PtyCommander::channel();
    drop(rx);
    assert!(!commander.resize(80, 24).await);
}
