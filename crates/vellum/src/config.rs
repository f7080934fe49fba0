use std::fs;
use std::path::Path;

/// Server configuration, read from a JSON file. Every field is optional;
/// absent fields fall back to the defaults below.
#[derive(Debug, Default, serde::Deserialize)]
pub struct Config {
    pub ip: Option<String>,
    pub port: Option<String>,
    pub data_path: Option<String>,
    pub user_path: Option<String>,
    pub log_path: Option<String>,
    pub working_directory: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn ip(&self) -> &str {
        self.ip.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn port(&self) -> &str {
        self.port.as_deref().unwrap_or("8260")
    }

    pub fn data_path(&self) -> &str {
        self.data_path.as_deref().unwrap_or("./storage.db")
    }

    pub fn user_path(&self) -> &str {
        self.user_path.as_deref().unwrap_or("./users.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_partial_configurations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port":"9000","data_path":"/var/lib/vellum/db"}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.ip(), "127.0.0.1");
        assert_eq!(config.port(), "9000");
        assert_eq!(config.data_path(), "/var/lib/vellum/db");
        assert_eq!(config.user_path(), "./users.json");
        assert_eq!(config.log_path, None);
    }

    #[test]
    fn rejects_malformed_configurations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
