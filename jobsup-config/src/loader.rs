use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};

use crate::models::SupervisorConfig;

pub const CONFIG_PATH_VAR: &str = "JOBSUP_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "JOBSUP_CONFIG_JSON";

/// Source that produced the supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl ConfigSource {
    /// First of `$JOBSUP_CONFIG_PATH`, `$JOBSUP_CONFIG_JSON`, a default file
    /// in the working directory, or built-in defaults. Blank variables are
    /// treated as unset.
    pub fn resolve<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(path) = set(CONFIG_PATH_VAR) {
            ConfigSource::EnvPath(PathBuf::from(path))
        } else if set(CONFIG_JSON_VAR).is_some() {
            ConfigSource::EnvInline
        } else if let Some(path) = default_file() {
            ConfigSource::File(path)
        } else {
            ConfigSource::Default
        }
    }
}

/// Syntax of a config document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
    /// Unknown extension: TOML first, then JSON.
    Either,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Format::Toml,
            Some("json") => Format::Json,
            _ => Format::Either,
        }
    }

    fn parse(self, contents: &str, origin: &str) -> anyhow::Result<SupervisorConfig> {
        match self {
            Format::Toml => toml::from_str(contents)
                .map_err(|err| anyhow!("invalid supervisor config {origin}: {err}")),
            Format::Json => serde_json::from_str(contents)
                .map_err(|err| anyhow!("invalid supervisor config {origin}: {err}")),
            Format::Either => toml::from_str(contents).or_else(|toml_err| {
                serde_json::from_str(contents).map_err(|json_err| {
                    anyhow!(
                        "failed to parse supervisor config {origin}: \
                         toml error: {toml_err}; json error: {json_err}"
                    )
                })
            }),
        }
    }
}

fn default_file() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &["jobsup.toml", "jobsup.json", "config/jobsup.toml"];

    CANDIDATES
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
}

impl SupervisorConfig {
    /// Loads configuration from the process environment. See
    /// [`load_with`](Self::load_with).
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        Self::load_with(|name| env::var(name).ok())
    }

    /// Reads the document [`ConfigSource::resolve`] picks, then applies the
    /// per-field overrides (`JOBSUP_TIME_POLL` and friends) on top of it.
    /// Every variable is read through `lookup`.
    pub fn load_with<F>(lookup: F) -> anyhow::Result<(Self, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = ConfigSource::resolve(&lookup);
        let mut config = match &source {
            ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
                Self::load_from_file(path)?
            }
            ConfigSource::EnvInline => {
                let raw = lookup(CONFIG_JSON_VAR).unwrap_or_default();
                Format::Json.parse(&raw, CONFIG_JSON_VAR)?
            }
            ConfigSource::Default => Self::default(),
        };
        config
            .apply_overrides(&lookup)
            .with_context(|| format!("config from {source:?}"))?;
        Ok((config, source))
    }

    /// Parses `path` as TOML or JSON by extension, trying both when the
    /// extension is neither.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read supervisor config from {}", path.display())
        })?;
        Format::of(path).parse(&contents, &path.display().to_string())
    }

    /// Applies single-field overrides read through `lookup`. Durations take
    /// human-readable values such as `"5s"` or `"250ms"`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(instance) = get("JOBSUP_INSTANCE") {
            self.instance = instance;
        }
        if let Some(url) = get("JOBSUP_STORE_URL") {
            self.store.url = url;
        }
        if let Some(url) = get("JOBSUP_INDEX_URL") {
            self.store.index_url = url;
        }
        if let Some(locator) = get("JOBSUP_LOCATOR") {
            self.locator = locator;
        }
        if let Some(filter) = get("JOBSUP_LOG") {
            self.log_filter = filter;
        }

        let tunables = &mut self.tunables;
        let durations: [(&str, &mut u64); 4] = [
            ("JOBSUP_TIME_POLL", &mut tunables.time_poll_ms),
            ("JOBSUP_TIME_AGENT_POLL", &mut tunables.time_agent_poll_ms),
            ("JOBSUP_TIME_WORKER_POLL", &mut tunables.time_worker_poll_ms),
            ("JOBSUP_TIME_STORAGE_POLL", &mut tunables.time_storage_poll_ms),
        ];
        for (name, slot) in durations {
            if let Some(raw) = get(name) {
                *slot = parse_millis(&raw).with_context(|| format!("invalid {name}"))?;
            }
        }

        if let Some(raw) = get("JOBSUP_QUERY_LIMIT") {
            tunables.query_limit = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid JOBSUP_QUERY_LIMIT {raw:?}"))?;
        }
        Ok(())
    }
}

fn parse_millis(raw: &str) -> anyhow::Result<u64> {
    let duration: Duration =
        humantime::parse_duration(raw.trim()).context("failed to parse duration")?;
    u64::try_from(duration.as_millis()).context("duration out of range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn overrides_accept_human_durations() {
        let mut config = SupervisorConfig::default();
        config
            .apply_overrides(lookup(&[
                ("JOBSUP_TIME_POLL", "2s"),
                ("JOBSUP_TIME_STORAGE_POLL", "10m"),
                ("JOBSUP_INSTANCE", "worker-7"),
                ("JOBSUP_QUERY_LIMIT", "500"),
            ]))
            .unwrap();

        assert_eq!(config.tunables.time_poll_ms, 2_000);
        assert_eq!(config.tunables.time_storage_poll_ms, 600_000);
        assert_eq!(config.tunables.time_agent_poll_ms, 10_000);
        assert_eq!(config.tunables.query_limit, 500);
        assert_eq!(config.instance, "worker-7");
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut config = SupervisorConfig::default();
        config
            .apply_overrides(lookup(&[("JOBSUP_STORE_URL", "  ")]))
            .unwrap();
        assert_eq!(config, SupervisorConfig::default());
    }

    #[test]
    fn malformed_duration_names_the_variable() {
        let mut config = SupervisorConfig::default();
        let err = config
            .apply_overrides(lookup(&[("JOBSUP_TIME_WORKER_POLL", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("JOBSUP_TIME_WORKER_POLL"));
    }

    #[test]
    fn unknown_format_falls_back_to_json() {
        let config = Format::Either
            .parse(
                r#"{ "instance": "w1", "tunables": { "time_poll_ms": 750 } }"#,
                "inline",
            )
            .unwrap();
        assert_eq!(config.instance, "w1");
        assert_eq!(config.tunables.time_poll_ms, 750);
        assert_eq!(config.tunables.query_limit, 10_000);
    }

    #[test]
    fn inline_json_gets_overrides_applied() {
        let (config, source) = SupervisorConfig::load_with(lookup(&[
            (CONFIG_PATH_VAR, " "),
            (CONFIG_JSON_VAR, r#"{ "instance": "inline", "tunables": { "time_poll_ms": 750 } }"#),
            ("JOBSUP_TIME_POLL", "250ms"),
        ]))
        .unwrap();

        assert_eq!(source, ConfigSource::EnvInline);
        assert_eq!(config.instance, "inline");
        assert_eq!(config.tunables.time_poll_ms, 250);
    }

    #[test]
    fn config_path_wins_over_inline_json() {
        let vars = lookup(&[
            (CONFIG_PATH_VAR, "/nonexistent/jobsup.toml"),
            (CONFIG_JSON_VAR, "{}"),
        ]);
        assert_eq!(
            ConfigSource::resolve(&vars),
            ConfigSource::EnvPath(PathBuf::from("/nonexistent/jobsup.toml"))
        );
        let err = SupervisorConfig::load_with(vars).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/jobsup.toml"));
    }

    #[test]
    fn overrides_apply_to_defaults() {
        let (config, source) =
            SupervisorConfig::load_with(lookup(&[("JOBSUP_LOCATOR", "manta")])).unwrap();
        assert_eq!(source, ConfigSource::Default);
        assert_eq!(config.locator, "manta");
    }

    #[test]
    fn malformed_inline_json_is_rejected() {
        let err = SupervisorConfig::load_with(lookup(&[(CONFIG_JSON_VAR, "{ nope")]))
            .unwrap_err();
        assert!(err.to_string().contains(CONFIG_JSON_VAR));
    }
}
