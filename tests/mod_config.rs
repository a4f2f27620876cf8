mod support;

use std::path::PathBuf;
use unirank::query::{Order, SortSpec};
use unirank::schema::ReviewLayout;
use unirank::{ConfigLayer, Gateway, GatewayConfig, GatewayError};

fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unirank.toml");
    std::fs::write(&path, body).unwrap();
    (dir, path)
}

#[test]
fn file_settings_are_applied() {
    let (_dir, path) = write_config(
        r#"
data_dir = "/srv/unirank"
review_layout = "standalone"
allow_raw_pipelines = false
log_level = "debug"

[default_sort]
universities = "votes:desc"
reviews = "votes"
"#,
    );
    let cfg = GatewayConfig::load(ConfigLayer::default(), Some(&path)).unwrap();
    assert_eq!(cfg.data_dir, Some(PathBuf::from("/srv/unirank")));
    assert_eq!(cfg.review_layout, ReviewLayout::Standalone);
    assert!(!cfg.allow_raw_pipelines);
    assert_eq!(cfg.sort_for("universities"), Some(&SortSpec::desc("votes")));
    assert_eq!(cfg.sort_for("reviews"), Some(&SortSpec::asc("votes")));
    assert_eq!(cfg.sort_for("cities").map(|s| s.order), Some(Order::Desc));
    assert_eq!(cfg.log.level.as_deref(), Some("debug"));
}

#[test]
fn cli_layer_beats_file() {
    let (_dir, path) = write_config("entity_collection = \"universities\"\nallow_raw_pipelines = false\n");
    let cli = ConfigLayer {
        entity_collection: Some("cities".into()),
        allow_raw_pipelines: Some(true),
        ..ConfigLayer::default()
    };
    let cfg = GatewayConfig::load(cli, Some(&path)).unwrap();
    assert_eq!(cfg.entity_collection, "cities");
    assert!(cfg.allow_raw_pipelines);
}

#[test]
fn explicit_missing_file_is_an_error() {
    let err = GatewayConfig::load(ConfigLayer::default(), Some(PathBuf::from("/nonexistent/unirank.toml").as_path()))
        .unwrap_err();
    assert!(matches!(err, GatewayError::Config(_)));
}

#[test]
fn invalid_settings_fail_validation() {
    let (_dir, path) = write_config("entity_collection = \"reviews\"\n");
    assert!(matches!(GatewayConfig::load(ConfigLayer::default(), Some(&path)), Err(GatewayError::Config(_))));

    let (_dir, path) = write_config("[default_sort]\nreviews = \"votes\"\n");
    assert!(matches!(GatewayConfig::load(ConfigLayer::default(), Some(&path)), Err(GatewayError::Config(_))));

    let (_dir, path) = write_config("colour = \"blue\"\n");
    assert!(GatewayConfig::load(ConfigLayer::default(), Some(&path)).is_err());
}

#[test]
fn gateway_refuses_invalid_config() {
    let config = GatewayConfig { entity_collection: "feedback".into(), ..GatewayConfig::default() };
    let err = Gateway::with_store(support::seeded_store(), config).unwrap_err();
    assert!(matches!(err, GatewayError::Config(_)));
}
