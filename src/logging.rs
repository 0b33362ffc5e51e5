use anyhow::Context as _;
use tracing::Subscriber;
use tracing_subscriber::{
    Layer, filter::LevelFilter, fmt::MakeWriter, layer::SubscriberExt as _,
    registry::LookupSpan, util::SubscriberInitExt as _,
};

use crate::config::{LogFormat, LoggingConfig};

/// Log level and format after merging the `--log-level` flag with the
/// `[logging]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Json,
        }
    }
}

impl LogSettings {
    /// The flag wins over the config file for the level.
    pub fn resolve(config: Option<&LoggingConfig>, cli_level: Option<&str>) -> anyhow::Result<Self> {
        let mut settings = Self::default();
        if let Some(format) = config.and_then(|logging| logging.format) {
            settings.format = format;
        }
        if let Some(raw) = cli_level.or_else(|| config.and_then(|logging| logging.level.as_deref())) {
            settings.level = parse_level(raw)?;
        }
        Ok(settings)
    }

    /// Formatting layer for `writer`, filtered at the resolved level.
    pub fn layer<S, W>(self, writer: W) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'span> LookupSpan<'span> + 'static,
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = tracing_subscriber::fmt::layer().with_writer(writer);
        match self.format {
            LogFormat::Json => layer.json().with_filter(self.level).boxed(),
            LogFormat::Pretty => layer.pretty().with_filter(self.level).boxed(),
        }
    }
}

fn parse_level(raw: &str) -> anyhow::Result<LevelFilter> {
    raw.trim().parse().with_context(|| {
        format!("invalid log level `{raw}`; expected trace, debug, info, warn, error or off")
    })
}

/// Installs the global subscriber. Logs go to stderr; stdout is left to the
/// host.
pub fn init(config: Option<&LoggingConfig>, cli_level: Option<&str>) -> anyhow::Result<()> {
    let settings = LogSettings::resolve(config, cli_level)?;
    tracing_subscriber::registry()
        .with(settings.layer(std::io::stderr))
        .try_init()
        .context("install log subscriber")
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::LogSettings;
    use crate::config::{Config, LogFormat};

    #[test]
    fn defaults_apply_without_config_or_flag() {
        assert_eq!(LogSettings::resolve(None, None).unwrap(), LogSettings::default());
        assert_eq!(LogSettings::default().level, LevelFilter::INFO);
        assert_eq!(LogSettings::default().format, LogFormat::Json);
    }

    #[test]
    fn flag_overrides_config_level_but_not_format() {
        let config = Config::from_toml_str(
            r#"
[logging]
level = "warn"
format = "pretty"
"#,
        )
        .unwrap();

        let from_file = LogSettings::resolve(config.logging.as_ref(), None).unwrap();
        assert_eq!(from_file.level, LevelFilter::WARN);
        assert_eq!(from_file.format, LogFormat::Pretty);

        let flagged = LogSettings::resolve(config.logging.as_ref(), Some(" TRACE ")).unwrap();
        assert_eq!(flagged.level, LevelFilter::TRACE);
        assert_eq!(flagged.format, LogFormat::Pretty);
    }

    #[test]
    fn unknown_level_names_the_bad_value() {
        let err = LogSettings::resolve(None, Some("verbose")).unwrap_err();
        assert!(
            err.to_string().contains("invalid log level `verbose`"),
            "unexpected error: {err}"
        );
    }
}
