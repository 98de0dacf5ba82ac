//! Process-wide `tracing` subscriber.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogSettings};
use crate::error::Error;

/// Installs the global subscriber. `RUST_LOG`, when set, wins over
/// `settings.level`.
///
/// Fails if the level directive is invalid or a subscriber is already set.
pub fn init(settings: &LogSettings) -> Result<(), Error> {
    let filter = filter(settings)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match settings.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| Error::Config(format!("cannot install logger: {e}")))
}

fn filter(settings: &LogSettings) -> Result<EnvFilter, Error> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| Error::Config(format!("invalid log level {:?}: {e}", settings.level))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_is_config_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let settings = LogSettings { level: "tortilla=loud".to_owned(), ..LogSettings::default() };
        assert!(matches!(filter(&settings), Err(Error::Config(_))));
    }

    #[test]
    fn second_init_fails() {
        let settings = LogSettings::default();
        let _ = init(&settings);
        assert!(init(&settings).is_err());
    }
}
