//! Operator configuration: `.ponder/config.json` next to the database.
//!
//! Precedence is flag > config file > built-in default; the CLI applies
//! flags, this module supplies the rest.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Model handed to the agent when nothing else is configured.
pub const DEFAULT_MODEL: &str = "opencode/gemini-3-flash";

/// Worker ceiling when nothing else is configured.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// On-disk shape of config.json. All keys optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i64>,
    #[serde(default)]
    pub available_models: Vec<String>,
}

/// Resolved defaults for the orchestrator.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub model: String,
    pub max_concurrency: usize,
    pub available_models: Vec<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            available_models: vec![DEFAULT_MODEL.to_string()],
        }
    }
}

/// Load defaults from the config.json sitting next to the database file.
/// A missing file yields the built-in defaults; an invalid one is an
/// error, not a silent fallback.
pub fn load_defaults(db_path: &Path) -> Result<Defaults> {
    let config_path = db_path
        .parent()
        .map(|dir| dir.join("config.json"))
        .unwrap_or_else(|| Path::new("config.json").to_path_buf());

    let mut defaults = Defaults::default();

    let data = match fs::read_to_string(&config_path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(defaults),
        Err(e) => return Err(e.into()),
    };

    let cfg: ConfigFile = serde_json::from_str(&data).map_err(|e| {
        Error::Config(format!("failed to parse {}: {e}", config_path.display()))
    })?;

    if let Some(model) = cfg.model {
        if !model.is_empty() {
            defaults.model = model;
        }
    }
    if let Some(max) = cfg.max_concurrency {
        if max < 1 {
            return Err(Error::Config(format!(
                "invalid max_concurrency in {}: must be >= 1",
                config_path.display()
            )));
        }
        defaults.max_concurrency = max as usize;
    }
    if !cfg.available_models.is_empty() {
        defaults.available_models = cfg.available_models;
    }
    if !defaults.available_models.contains(&defaults.model) {
        defaults.available_models.push(defaults.model.clone());
    }

    Ok(defaults)
}

/// Write a config.json with the built-in defaults.
pub fn write_default_config(path: &Path) -> Result<()> {
    let cfg = ConfigFile {
        model: Some(DEFAULT_MODEL.to_string()),
        max_concurrency: Some(DEFAULT_MAX_CONCURRENCY as i64),
        available_models: vec![DEFAULT_MODEL.to_string()],
    };
    let mut content = serde_json::to_string_pretty(&cfg)?;
    content.push('\n');
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let defaults = load_defaults(&dir.path().join("ponder.db")).unwrap();
        assert_eq!(defaults.model, DEFAULT_MODEL);
        assert_eq!(defaults.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(defaults.available_models, vec![DEFAULT_MODEL.to_string()]);
    }

    #[test]
    fn test_config_overrides_and_model_is_listed() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"model": "custom/model", "max_concurrency": 8, "available_models": ["a", "b"]}"#,
        )
        .unwrap();

        let defaults = load_defaults(&dir.path().join("ponder.db")).unwrap();
        assert_eq!(defaults.model, "custom/model");
        assert_eq!(defaults.max_concurrency, 8);
        // The configured model is appended when the list omits it.
        assert_eq!(defaults.available_models, vec!["a", "b", "custom/model"]);
    }

    #[test]
    fn test_invalid_max_concurrency_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"max_concurrency": 0}"#,
        )
        .unwrap();
        assert!(matches!(
            load_defaults(&dir.path().join("ponder.db")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.json"), "{nope").unwrap();
        assert!(matches!(
            load_defaults(&dir.path().join("ponder.db")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_write_default_config_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        write_default_config(&path).unwrap();

        let defaults = load_defaults(&dir.path().join("ponder.db")).unwrap();
        assert_eq!(defaults.model, DEFAULT_MODEL);
        assert_eq!(defaults.max_concurrency, DEFAULT_MAX_CONCURRENCY);
    }
}
