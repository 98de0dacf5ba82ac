//! Service settings.
//!
//! Loaded from a TOML file, then overridden from the environment:
//!
//! ```toml
//! name = "orders"
//! port = 8080
//! terminate_timeout_ms = 5000
//!
//! [log]
//! level = "info"
//! format = "json"
//!
//! [preflight]
//! cors = true
//! origins = ["https://app.example.com"]
//! ```
//!
//! | Variable | Overrides |
//! |---|---|
//! | `TORTILLA_PORT` | `port` |
//! | `TORTILLA_LOG_LEVEL` | `log.level` |
//! | `TORTILLA_CORS` | `preflight.cors` (`true`/`false`/`1`/`0`) |

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;
use crate::middleware::PreflightConfig;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub terminate_timeout_ms: u64,
    pub log: LogSettings,
    pub preflight: PreflightConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            host: "0.0.0.0".to_owned(),
            port: 8080,
            terminate_timeout_ms: 5_000,
            log: LogSettings::default(),
            preflight: PreflightConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    /// An `EnvFilter` directive, e.g. `"info"` or `"tortilla=debug,hyper=warn"`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: "info".to_owned(), format: LogFormat::Text }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Settings {
    pub fn from_toml_str(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Applies the `TORTILLA_*` environment overrides.
    pub fn apply_env(self) -> Result<Self, Error> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        if let Some(port) = var("TORTILLA_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("TORTILLA_PORT is not a port: {port:?}")))?;
        }
        if let Some(level) = var("TORTILLA_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(cors) = var("TORTILLA_CORS") {
            self.preflight.cors = match cors.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(Error::Config(format!("TORTILLA_CORS is not a boolean: {cors:?}"))),
            };
        }
        Ok(self)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.terminate_timeout(), Duration::from_secs(5));
        assert!(!settings.preflight.cors);
    }

    #[test]
    fn parses_sections() {
        let settings = Settings::from_toml_str(
            r#"
            name = "orders"
            port = 9000
            [log]
            format = "json"
            [preflight]
            cors = true
            origins = "https://app.example.com"
            headers = ["x-trace-id"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.name, "orders");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.log.format, LogFormat::Json);
        assert_eq!(settings.log.level, "info");
        assert!(settings.preflight.cors);
        assert_eq!(settings.preflight.origins, ["https://app.example.com"]);
        assert_eq!(settings.preflight.headers, Some(vec!["x-trace-id".to_owned()]));
        assert_eq!(settings.preflight.status, 204);
    }

    #[test]
    fn bad_toml_is_config_error() {
        let err = Settings::from_toml_str("port = \"eighty\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"from-file\"\nterminate_timeout_ms = 250").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.name, "from-file");
        assert_eq!(settings.terminate_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let settings = Settings::default()
            .apply_vars(vars(&[
                ("TORTILLA_PORT", "3000"),
                ("TORTILLA_LOG_LEVEL", "debug"),
                ("TORTILLA_CORS", "TRUE"),
            ]))
            .unwrap();

        assert_eq!(settings.port, 3000);
        assert_eq!(settings.log.level, "debug");
        assert!(settings.preflight.cors);
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        let err = Settings::default().apply_vars(vars(&[("TORTILLA_PORT", "99999")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Settings::default().apply_vars(vars(&[("TORTILLA_CORS", "yes")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
