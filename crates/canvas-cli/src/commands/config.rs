//! Config command implementation.
//!
//! Manages the store client configuration.

use anyhow::Result;
use canvas_client::ClientConfig;

const KEYS: &str = "api_url, request_timeout_ms, connect_timeout_ms";

/// Show current configuration.
pub fn show(config: &ClientConfig) -> Result<()> {
    println!("Canvas CLI Configuration");
    println!("{:-<40}", "");
    println!("API URL:          {}", config.api_url);
    println!("Request timeout:  {} ms", config.request_timeout_ms);
    println!("Connect timeout:  {} ms", config.connect_timeout_ms);

    if let Some(config_path) = ClientConfig::config_file_path() {
        println!("\nConfig file: {}", config_path.display());
    }
    Ok(())
}

/// Set a configuration value and persist it.
pub fn set(config: &mut ClientConfig, key: &str, value: &str) -> Result<()> {
    let key = normalize(key);
    config
        .set(&key, value)
        .map_err(|e| anyhow::anyhow!("{e}. Valid keys: {KEYS}"))?;
    config.save()?;
    println!("Set {} to: {}", key, value);
    Ok(())
}

/// Get a configuration value.
pub fn get(config: &ClientConfig, key: &str) -> Result<()> {
    match config.get(&normalize(key)) {
        Some(value) => println!("{}", value),
        None => anyhow::bail!("Unknown config key: {}. Valid keys: {}", key, KEYS),
    }
    Ok(())
}

/// Reset configuration to defaults.
pub fn reset() -> Result<()> {
    ClientConfig::default().save()?;
    println!("Configuration reset to defaults");
    Ok(())
}

/// Accept `api-url` as well as `api_url`.
fn normalize(key: &str) -> String {
    match key {
        "url" => "api_url".to_string(),
        other => other.replace('-', "_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_dashed_keys() {
        assert_eq!(normalize("api-url"), "api_url");
        assert_eq!(normalize("url"), "api_url");
        assert_eq!(normalize("request_timeout_ms"), "request_timeout_ms");
    }
}
