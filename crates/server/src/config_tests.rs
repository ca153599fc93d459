// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn base_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_owned(),
        port: 4020,
        control_dir: None,
        no_auth: true,
        term: "xterm-256color".to_owned(),
        hq: false,
        hq_url: None,
        hq_token: None,
        name: None,
        advertise_url: None,
    }
}

#[test]
fn default_config_validates() {
    assert!(base_config().validate().is_ok());
}

#[test]
fn hq_and_hq_url_conflict() {
    let mut config = base_config();
    config.hq = true;
    config.hq_url = Some("http://hq:4020".to_owned());
    assert!(config.validate().is_err());
}

#[test]
fn hq_url_requires_name_and_advertise_url() {
    let mut config = base_config();
    config.hq_url = Some("http://hq:4020".to_owned());
    assert!(config.validate().is_err());

    config.name = Some("peer-1".to_owned());
    assert!(config.validate().is_err());

    config.advertise_url = Some("http://peer:4020".to_owned());
    assert!(config.validate().is_ok());
}

#[test]
fn explicit_control_dir_wins() {
    let mut config = base_config();
    config.control_dir = Some(PathBuf::from("/tmp/vt-test"));
    assert_eq!(config.control_root(), PathBuf::from("/tmp/vt-test"));
}

#[test]
fn default_control_dir_is_under_home() {
    let config = base_config();
    let root = config.control_root();
    assert!(root.ends_with(".vibetunnel/control"));
}
