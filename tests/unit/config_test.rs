//! Configuration tests
//!
//! Environment variables are process-wide, so every test is serialized.

use std::env;
use std::time::Duration;

use admitflow::config::{Config, ConfigError, McbConfig, NotificationConfig};
use admitflow::models::Channel;
use admitflow::services::RetryPolicy;
use pretty_assertions::assert_eq;
use serial_test::serial;

const VARS: &[&str] = &[
    "HOST",
    "PORT",
    "DATABASE_URL",
    "ADMIN_API_TOKEN",
    "NOTIFY_CHANNELS",
    "NOTIFY_MAX_ATTEMPTS",
    "NOTIFY_BACKOFF_BASE_MS",
    "NOTIFY_BACKOFF_MAX_MS",
    "NOTIFY_BACKOFF_JITTER",
    "SENDER_TIMEOUT_SECS",
    "DISPATCH_DEADLINE_SECS",
    "MCB_BASE_URL",
    "MCB_PATH",
    "MCB_ORGANISATION_ID",
    "MCB_BRANCH_ID",
    "MCB_API_KEY",
    "MCB_TIMEOUT_SECS",
    "MCB_MAX_ATTEMPTS",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults() {
    clear_env();

    let config = Config::from_env().unwrap();
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8080);
    assert!(config.database.is_none());
    assert!(config.security.admin_token.is_none());

    let notification = config.notification;
    assert_eq!(notification.enabled_channels, Channel::ALL.to_vec());
    assert_eq!(notification.max_attempts, 3);
    assert_eq!(notification.backoff_base, Duration::from_secs(2));
    assert_eq!(notification.backoff_max, Duration::from_secs(30));
    assert_eq!(notification.dispatch_deadline, Duration::from_secs(120));

    assert!(config.mcb.base_url.is_none());
    assert_eq!(config.mcb.path, "/api/enquiry/create");
}

#[test]
#[serial]
fn test_custom_values() {
    clear_env();
    env::set_var("PORT", "9090");
    env::set_var("DATABASE_URL", "postgres://localhost/admitflow");
    env::set_var("ADMIN_API_TOKEN", "  s3cret  ");
    env::set_var("NOTIFY_CHANNELS", "email, sms");
    env::set_var("NOTIFY_MAX_ATTEMPTS", "5");
    env::set_var("NOTIFY_BACKOFF_BASE_MS", "250");
    env::set_var("NOTIFY_BACKOFF_JITTER", "3.5");

    let config = Config::from_env().unwrap();
    assert_eq!(config.port, 9090);
    assert_eq!(
        config.database.map(|d| d.url).as_deref(),
        Some("postgres://localhost/admitflow")
    );
    assert_eq!(config.security.admin_token.as_deref(), Some("s3cret"));
    assert_eq!(
        config.notification.enabled_channels,
        vec![Channel::Email, Channel::Sms]
    );
    assert_eq!(config.notification.max_attempts, 5);
    assert_eq!(config.notification.backoff_base, Duration::from_millis(250));
    assert_eq!(config.notification.backoff_jitter, 1.0);

    clear_env();
}

#[test]
#[serial]
fn test_non_finite_jitter_falls_back_to_default() {
    for value in ["NaN", "inf", "-infinity"] {
        clear_env();
        env::set_var("NOTIFY_BACKOFF_JITTER", value);

        let config = NotificationConfig::from_env().unwrap();
        assert_eq!(config.backoff_jitter, 0.1, "jitter from {:?}", value);
        assert!(RetryPolicy::from(&config).delay_after(1) >= config.backoff_base);
    }

    clear_env();
}

#[test]
#[serial]
fn test_blank_admin_token_is_unset() {
    clear_env();
    env::set_var("ADMIN_API_TOKEN", "   ");

    let config = Config::from_env().unwrap();
    assert!(config.security.admin_token.is_none());

    clear_env();
}

#[test]
#[serial]
fn test_invalid_channel_list_is_rejected() {
    clear_env();
    env::set_var("NOTIFY_CHANNELS", "email,fax");

    let result = NotificationConfig::from_env();
    assert!(matches!(result, Err(ConfigError::InvalidChannel(_))));

    clear_env();
}

#[test]
#[serial]
fn test_invalid_port_is_rejected() {
    clear_env();
    env::set_var("PORT", "eighty");

    assert!(matches!(Config::from_env(), Err(ConfigError::InvalidPort)));

    clear_env();
}

#[test]
#[serial]
fn test_zero_attempts_is_raised_to_one() {
    clear_env();
    env::set_var("NOTIFY_MAX_ATTEMPTS", "0");
    env::set_var("MCB_MAX_ATTEMPTS", "0");

    assert_eq!(NotificationConfig::from_env().unwrap().max_attempts, 1);
    assert_eq!(McbConfig::from_env().max_attempts, 1);

    clear_env();
}

#[test]
#[serial]
fn test_mcb_config() {
    clear_env();
    env::set_var("MCB_BASE_URL", "https://mcb.example.com");
    env::set_var("MCB_ORGANISATION_ID", "ORG-1");
    env::set_var("MCB_TIMEOUT_SECS", "10");

    let mcb = McbConfig::from_env();
    assert_eq!(mcb.base_url.as_deref(), Some("https://mcb.example.com"));
    assert_eq!(mcb.organisation_id.as_deref(), Some("ORG-1"));
    assert_eq!(mcb.branch_id, None);
    assert_eq!(mcb.timeout, Duration::from_secs(10));

    clear_env();
}
