use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

/// Runtime configuration, read from the environment (a `.env` file is
/// honored when present). Every key has a usable default except the OAuth
/// client secret, which must be downloaded from the Google Cloud console.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gmail label whose emails carry the CSV exports. `GMAIL_LABEL_NAME`.
    pub gmail_label: String,
    /// OAuth client-secret JSON path. `GMAIL_CREDENTIALS_FILE`.
    pub credentials_file: PathBuf,
    /// Persisted token path. `GMAIL_TOKEN_FILE`, default in the data dir.
    pub token_file: PathBuf,
    /// Sync lookback window in days. `SYNC_LOOKBACK_DAYS`.
    pub lookback_days: u32,
    /// InfluxDB endpoint. `INFLUXDB_URL`.
    pub influx_url: String,
    /// InfluxDB database name. `INFLUXDB_DATABASE`.
    pub influx_database: String,
    /// Optional basic-auth pair. `INFLUXDB_USERNAME` / `INFLUXDB_PASSWORD`.
    pub influx_username: Option<String>,
    pub influx_password: Option<String>,
    /// Ollama endpoint and model. `OLLAMA_HOST` / `OLLAMA_MODEL`.
    pub ollama_host: String,
    pub ollama_model: String,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv(); // .env is optional

        let proj_dirs =
            ProjectDirs::from("", "", "healthsync").context("Could not determine home directory")?;
        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let token_file =
            env_opt("GMAIL_TOKEN_FILE").map_or_else(|| data_dir.join("token.json"), PathBuf::from);

        let lookback_days = match env_opt("SYNC_LOOKBACK_DAYS") {
            Some(v) => v
                .parse::<u32>()
                .with_context(|| format!("Invalid SYNC_LOOKBACK_DAYS: '{v}'"))?,
            None => 90,
        };

        Ok(Config {
            gmail_label: env_or("GMAIL_LABEL_NAME", "Lose It! Weekly Summary"),
            credentials_file: PathBuf::from(env_or("GMAIL_CREDENTIALS_FILE", "credentials.json")),
            token_file,
            lookback_days,
            influx_url: env_or("INFLUXDB_URL", "http://localhost:8086"),
            influx_database: env_or("INFLUXDB_DATABASE", "HealthStats"),
            influx_username: env_opt("INFLUXDB_USERNAME"),
            influx_password: env_opt("INFLUXDB_PASSWORD"),
            ollama_host: env_or("OLLAMA_HOST", "http://localhost:11434"),
            ollama_model: env_or("OLLAMA_MODEL", "qwen2.5:7b-instruct"),
            data_dir,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// A set-but-empty variable counts as unset.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_uses_default_when_unset() {
        assert_eq!(env_or("HEALTHSYNC_TEST_UNSET_KEY", "fallback"), "fallback");
        assert!(env_opt("HEALTHSYNC_TEST_UNSET_KEY").is_none());
    }
}
