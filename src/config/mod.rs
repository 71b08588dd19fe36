mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./spdash.toml",
        "~/.config/spdash/config.toml",
        "/etc/spdash/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }
    if config.server.chunk_limit == 0 {
        anyhow::bail!("Server chunk_limit must be positive");
    }
    if config.server.send_window == 0 || config.client.send_window == 0 {
        anyhow::bail!("send_window must be positive");
    }
    if let Some(table) = &config.server.video_table {
        if !table.exists() {
            tracing::warn!("Server video table does not exist: {:?}", table);
        }
    }

    if !config.client.min_buffer_secs.is_finite() || config.client.min_buffer_secs < 0.0 {
        anyhow::bail!(
            "min_buffer_secs must be a non-negative number, got {}",
            config.client.min_buffer_secs
        );
    }
    if config.client.server.is_empty() {
        anyhow::bail!("Client server endpoint cannot be empty");
    }

    if config.decision.endpoint.is_empty() {
        anyhow::bail!("Decision endpoint cannot be empty");
    }
    if let Some(timeout) = config.decision.timeout_secs {
        if !timeout.is_finite() || timeout <= 0.0 {
            anyhow::bail!("Decision timeout_secs must be positive, got {}", timeout);
        }
    }
    for (name, value) in [
        ("reservoir_secs", config.decision.reservoir_secs),
        ("cushion_secs", config.decision.cushion_secs),
    ] {
        if !value.is_finite() || value < 0.0 {
            anyhow::bail!("Decision {} must be a non-negative number, got {}", name, value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spdash_common::AbrMode;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.chunk_limit, 1024);
        assert_eq!(config.client.manifest_length, 1232);
        assert_eq!(config.client.abr_mode, AbrMode::Server);
        assert_eq!(config.decision.endpoint, "127.0.0.1:8333");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [client]
            abr_mode = "client"
            min_buffer_secs = 12.5

            [decision]
            timeout_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.client.abr_mode, AbrMode::Client);
        assert_eq!(config.client.send_window, 2048);
        assert_eq!(config.decision.timeout(), Some(Duration::from_secs(2)));

        let player = config.client.player_config(&config.decision);
        assert_eq!(player.min_buffer, Duration::from_millis(12_500));
        assert_eq!(player.decision_endpoint, "127.0.0.1:8333");
    }

    #[test]
    fn test_rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_negative_buffer() {
        let mut config = Config::default();
        config.client.min_buffer_secs = -1.0;
        assert!(validate_config(&config).is_err());
    }
}
