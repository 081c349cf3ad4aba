//! Flag parsing behaviour for the daemon configuration.

use std::time::Duration;

use rstest::rstest;

use runnerd_config::{
    ConfigError, Config, DEFAULT_ALLOW_LIST_PATH, LogFormat, NetworkKind, SocketEndpoint,
};

fn load(args: &[&str]) -> Result<Config, ConfigError> {
    let mut argv = vec!["runnerd"];
    argv.extend_from_slice(args);
    Config::load_from_iter(argv)
}

#[test]
fn defaults_match_documented_values() {
    let config = load(&[]).expect("defaults should load");
    assert_eq!(config.endpoint().kind(), NetworkKind::Tcp);
    assert_eq!(config.endpoint().to_string(), "tcp://[::]:8081");
    assert_eq!(config.timeout(), Duration::from_secs(1));
    assert_eq!(config.allow_list().as_str(), DEFAULT_ALLOW_LIST_PATH);
    assert_eq!(config.log_format(), LogFormat::Json);
}

#[rstest]
#[case(&["-t", "0"], 1)]
#[case(&["-t", "-3"], 1)]
#[case(&["--timeout", "7"], 7)]
fn timeout_flag_is_clamped(#[case] args: &[&str], #[case] expected: u64) {
    let config = load(args).expect("timeout should load");
    assert_eq!(config.timeout(), Duration::from_secs(expected));
}

#[test]
fn unix_network_uses_address_as_path() {
    let config = load(&["-p", "unix", "-a", "/run/runnerd.sock"]).expect("unix config");
    assert_eq!(
        config.endpoint(),
        &SocketEndpoint::unix("/run/runnerd.sock")
    );
}

#[test]
fn unixpacket_network_selects_seqpacket_mode() {
    let config = load(&["--network", "unixpacket", "--address", "/run/r.sock"])
        .expect("unixpacket config");
    assert_eq!(
        config.endpoint(),
        &SocketEndpoint::unix_packet("/run/r.sock")
    );
}

#[test]
fn unknown_network_is_rejected() {
    let error = load(&["-p", "udp"]).expect_err("udp is unsupported");
    assert!(matches!(error, ConfigError::Cli(_)));
}

#[test]
fn tcp_address_without_port_is_rejected() {
    let error = load(&["-p", "tcp4", "-a", "localhost"]).expect_err("port is required");
    assert!(
        matches!(error, ConfigError::Address { network: NetworkKind::Tcp4, .. }),
        "unexpected error: {error}"
    );
}

#[test]
fn allow_list_and_logging_flags_are_applied() {
    let config = load(&[
        "-c",
        "/tmp/allowed.conf",
        "--log-filter",
        "runnerd=debug",
        "--log-format",
        "compact",
    ])
    .expect("flags should load");
    assert_eq!(config.allow_list().as_str(), "/tmp/allowed.conf");
    assert_eq!(config.log_filter(), "runnerd=debug");
    assert_eq!(config.log_format(), LogFormat::Compact);
}
