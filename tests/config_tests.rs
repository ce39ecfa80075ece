// ABOUTME: Tests for configuration loading, defaults, and environment overrides.
// ABOUTME: Env-var tests are serialized because process environment is global.

use confab::config::Config;
use serial_test::serial;
use std::io::Write;

fn clear_env() {
    for key in [
        "CONFAB_HOST",
        "CONFAB_PORT",
        "CONFAB_ACCESS_TOKEN",
        "CONFAB_MESSAGE_AS_STRING",
        "CONFAB_API_TIMEOUT_SECS",
        "CONFAB_WAIT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("nope.toml")).unwrap();

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 20220);
    assert!(config.server.access_token.is_none());
    assert!(config.protocol.message_as_string);
    assert_eq!(config.protocol.api_timeout_secs, 30);
    assert_eq!(config.protocol.default_wait_secs, 600);
}

#[test]
#[serial]
fn test_file_values_are_read() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confab.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[server]
host = "0.0.0.0"
port = 9001
access_token = "sesame"

[protocol]
message_as_string = false
default_wait_secs = 120
"#
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 9001);
    assert_eq!(config.server.access_token.as_deref(), Some("sesame"));
    assert!(!config.protocol.message_as_string);
    assert_eq!(config.protocol.default_wait_secs, 120);
    // Unspecified fields keep their defaults
    assert_eq!(config.protocol.api_timeout_secs, 30);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confab.toml");
    std::fs::write(&path, "[server]\nport = 9001\n").unwrap();

    std::env::set_var("CONFAB_PORT", "9002");
    std::env::set_var("CONFAB_ACCESS_TOKEN", "from-env");
    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.server.port, 9002);
    assert_eq!(config.server.access_token.as_deref(), Some("from-env"));
}

#[test]
#[serial]
fn test_invalid_env_port_is_an_error() {
    clear_env();
    std::env::set_var("CONFAB_PORT", "not-a-port");
    let result = Config::load("does-not-exist.toml");
    clear_env();
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_zero_wait_secs_rejected() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confab.toml");
    std::fs::write(&path, "[protocol]\ndefault_wait_secs = 0\n").unwrap();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn test_blank_access_token_rejected() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confab.toml");
    std::fs::write(&path, "[server]\naccess_token = \"  \"\n").unwrap();
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn test_context_config_reflects_protocol_section() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("confab.toml");
    std::fs::write(
        &path,
        "[protocol]\ndefault_wait_secs = 45\nmessage_as_string = false\n",
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    let context_config = config.context_config();
    assert_eq!(context_config.default_wait_timeout.as_secs(), 45);
    assert!(!context_config.message_as_string);
}
