use pk_domain::config::{Config, ConfigSeverity, LogFormat};

#[test]
fn default_config_validates_cleanly() {
    let config = Config::default();
    assert!(config.validate().is_empty(), "{:?}", config.validate());
    assert!(!config.has_errors());
}

#[test]
fn default_server_binds_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.api_token_env, "PK_API_TOKEN");
}

#[test]
fn default_endpoints_point_at_the_binary_gateway() {
    let config = Config::default();
    assert_eq!(config.gateway.push_production, "gateway.push.apple.com:2195");
    assert_eq!(config.gateway.push_sandbox, "gateway.sandbox.push.apple.com:2195");
    assert_eq!(config.gateway.feedback_production, "feedback.push.apple.com:2196");
    assert_eq!(config.gateway.feedback_sandbox, "feedback.sandbox.push.apple.com:2196");
}

#[test]
fn partial_file_keeps_other_defaults() {
    let toml_str = r#"
[server]
port = 9000

[storage]
path = "/var/lib/pushkeeper/log.db"
retain_generations = 0

[observability]
log_format = "compact"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.storage.retain_generations, 0);
    assert_eq!(config.delivery.idle_timeout_sec, 300);
    assert_eq!(config.observability.log_format, LogFormat::Compact);
    assert!(config.feedback.enabled);
}

#[test]
fn malformed_endpoint_is_an_error() {
    let toml_str = r#"
[gateway]
push_sandbox = "gateway.sandbox.push.apple.com"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.field == "gateway.push_sandbox" && e.severity == ConfigSeverity::Error));
    assert!(config.has_errors());
}

#[test]
fn bad_sample_rate_is_an_error_but_zero_replay_window_is_not() {
    let toml_str = r#"
[delivery]
max_replay_window = 0

[observability]
sample_rate = 1.5
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
    assert!(!fields.contains(&"delivery.max_replay_window".to_string()));
    assert!(fields.contains(&"observability.sample_rate".to_string()));
}

#[test]
fn suppressing_status_zero_is_only_a_warning() {
    let toml_str = r#"
[delivery]
suppress_replay_statuses = [0, 10]
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    assert!(!config.has_errors());
}

#[test]
fn disabled_feedback_ignores_interval() {
    let toml_str = r#"
[feedback]
enabled = false
interval_sec = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(!config.has_errors());
}
