use std::io::Write;
use std::time::Duration;

use procflow::cli::config::{DEFAULT_ENGINE_URL, Overrides, ProcflowConfig};
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(yaml.as_bytes()).unwrap();
    f
}

#[test]
fn load_valid_config_all_fields() {
    let f = write_config(
        r#"
engine_url: "https://engine.internal/api"
api_token: "secret"
timeout_s: 5
page_size: 25
"#,
    );

    let cfg = ProcflowConfig::load(Some(f.path())).unwrap();

    assert_eq!(cfg.engine_url.as_deref(), Some("https://engine.internal/api"));
    assert_eq!(cfg.api_token.as_deref(), Some("secret"));
    assert_eq!(cfg.timeout_s, Some(5));
    assert_eq!(cfg.page_size, Some(25));
}

#[test]
fn load_partial_config() {
    let f = write_config("timeout_s: 90\n");

    let cfg = ProcflowConfig::load(Some(f.path())).unwrap();

    assert_eq!(cfg.timeout_s, Some(90));
    assert!(cfg.engine_url.is_none());
    assert!(cfg.api_token.is_none());
    assert!(cfg.page_size.is_none());
}

#[test]
fn missing_explicit_path_returns_error() {
    let result = ProcflowConfig::load(Some(std::path::Path::new("/nonexistent/procflow.yaml")));
    assert!(result.is_err());
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("Config file not found")
    );
}

#[test]
fn invalid_yaml_returns_parse_error() {
    let f = write_config("timeout_s: [not, a, number\n");

    let err = ProcflowConfig::load(Some(f.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn defaults_fill_unset_values() {
    let settings = ProcflowConfig::default().resolve(Overrides::default());

    assert_eq!(settings.engine_url, DEFAULT_ENGINE_URL);
    assert!(settings.api_token.is_none());
    assert_eq!(settings.timeout, Duration::from_secs(30));
    assert_eq!(settings.page_size, 10);
}

#[test]
fn overrides_win_over_file_values() {
    let f = write_config(
        r#"
engine_url: "http://from-file/api"
api_token: "file-token"
timeout_s: 5
"#,
    );
    let cfg = ProcflowConfig::load(Some(f.path())).unwrap();

    let settings = cfg.resolve(Overrides {
        engine_url: Some("http://from-flag/api".into()),
        timeout_s: None,
        ..Overrides::default()
    });

    assert_eq!(settings.engine_url, "http://from-flag/api");
    assert_eq!(settings.api_token.as_deref(), Some("file-token"));
    assert_eq!(settings.timeout, Duration::from_secs(5));
}

#[test]
fn page_size_is_clamped() {
    let f = write_config("page_size: 5000\n");
    let cfg = ProcflowConfig::load(Some(f.path())).unwrap();

    assert_eq!(cfg.resolve(Overrides::default()).page_size, 100);
}
