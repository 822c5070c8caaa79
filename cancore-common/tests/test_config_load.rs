use std::io::Write;

use assertables::*;
use cancore_common::config::{FramingPolicy, StackConfig};

/// Load a config from disk the way a host application would
#[test]
fn test_load_from_file() {
    const CFG: &str = r#"
        node_id = 42

        [pdo]
        framing = "ignore"
    "#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CFG.as_bytes()).unwrap();

    let cfg = StackConfig::load_from_file(file.path()).expect("Failed to load config");
    assert_eq!(42, cfg.node_id.raw());
    assert_eq!(FramingPolicy::Ignore, cfg.pdo.framing);
    assert_eq!(1000, cfg.pdo.buffer_timeout_ms);
    // Node relative COB-IDs pick up the configured ID
    assert_eq!(0x180 + 42, cfg.node_id.apply_offset(0x180));
}

#[test]
fn test_missing_file() {
    let result = StackConfig::load_from_file("/nonexistent/cancore.toml");
    let err = result.unwrap_err();
    assert_contains!(err.to_string(), "/nonexistent/cancore.toml");
}
