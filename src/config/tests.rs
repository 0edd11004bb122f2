use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn config_file_persistence() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let config_path = temp_dir.path().join(DEFAULT_CONFIG_FILE);

    let original_config = Config {
        provider: ProviderChoice::Remote,
        remote: OllamaConfig {
            protocol: "https".to_string(),
            host: "test-host".to_string(),
            port: 8080,
            model: "test-model".to_string(),
            ..OllamaConfig::default()
        },
        ..Config::hermetic(temp_dir.path())
    };

    let toml_content = toml::to_string_pretty(&original_config)
        .expect("config should convert to toml string successfully");
    fs::write(&config_path, toml_content).expect("should write to config_path successfully");

    let content =
        fs::read_to_string(&config_path).expect("should read from config_path successfully");
    let loaded_config: Config = toml::from_str(&content).expect("should parse toml correctly");

    assert_eq!(original_config, loaded_config);
}

#[test]
fn invalid_toml_handling() {
    let invalid_toml = r#"
        [remote
        host = "localhost"
        port = "invalid_port"
    "#;

    let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
    assert!(result.is_err());
}

#[test]
fn invalid_provider_in_toml_is_rejected() {
    let result: Result<Config, toml::de::Error> = toml::from_str(r#"provider = "gpu""#);
    assert!(result.is_err());
}

#[test]
fn show_config_does_not_panic() {
    show_config(&Config::default());
    show_config(&Config::hermetic("/tmp/rag"));
}
