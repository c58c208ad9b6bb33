//! Metrics listener address validation tests.

use rulekeeper_core::config::MetricsConfig;
use rulekeeper_daemon::metrics_server;

#[test]
fn default_config_yields_loopback_address() {
    let addr = metrics_server::listen_addr(&MetricsConfig::default()).unwrap();
    assert!(addr.ip().is_loopback());
    assert_eq!(addr.port(), 9102);
}

#[test]
fn invalid_address_is_rejected() {
    let config = MetricsConfig {
        listen_addr: "not-an-ip".to_owned(),
        ..MetricsConfig::default()
    };
    let err = metrics_server::listen_addr(&config).unwrap_err();
    assert!(err.to_string().contains("invalid metrics listen address"));
}

#[test]
fn unsupported_endpoint_is_rejected() {
    let config = MetricsConfig {
        endpoint: "/stats".to_owned(),
        ..MetricsConfig::default()
    };
    assert!(metrics_server::install_metrics_recorder(&config).is_err());
}
