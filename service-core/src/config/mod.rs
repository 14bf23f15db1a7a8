use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::{Deserialize, de::DeserializeOwned};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Deserialize a standalone configuration file (format picked from its extension).
pub fn load_file<T: DeserializeOwned>(path: &str) -> Result<T, AppError> {
    let config = Cfg::builder()
        .add_source(File::with_name(path).required(true))
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        limit: u32,
    }

    #[test]
    fn load_file_reads_toml() {
        let path = std::env::temp_dir().join(format!("service-core-{}.toml", uuid::Uuid::new_v4()));
        {
            let mut file = std::fs::File::create(&path).expect("temp file");
            writeln!(file, "name = \"rules\"\nlimit = 3").expect("write temp file");
        }

        let sample: Sample = load_file(path.to_str().expect("utf-8 path")).expect("load");
        assert_eq!(sample.name, "rules");
        assert_eq!(sample.limit, 3);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn load_file_missing_is_config_error() {
        let result: Result<Sample, _> = load_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
