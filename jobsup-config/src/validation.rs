use thiserror::Error;

use jobsup_core::catalog::Bucket;

use crate::models::SupervisorConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("instance id must not be empty")]
    MissingInstance,
    #[error("store url must not be empty")]
    MissingStoreUrl,
    #[error("bucket name for \"{0}\" must not be empty")]
    BlankBucket(Bucket),
    #[error("tunable {field} must be greater than zero")]
    ZeroTunable { field: &'static str },
    #[error("unsupported value for property \"locator\": {0}")]
    UnsupportedLocator(String),
}

/// Suspicious but runnable setting, reported at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

/// Rejects configurations the supervisor cannot run with and collects
/// warnings for ones that are merely suspicious.
pub fn apply_guard_rails(config: &SupervisorConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    if config.instance.trim().is_empty() {
        return Err(ConfigError::MissingInstance);
    }
    if config.store.url.trim().is_empty() {
        return Err(ConfigError::MissingStoreUrl);
    }
    if let Some(bucket) = config.buckets.blank().into_iter().next() {
        return Err(ConfigError::BlankBucket(bucket));
    }
    if config.locator_kind().is_err() {
        return Err(ConfigError::UnsupportedLocator(config.locator.clone()));
    }
    if let Some(field) = config.tunables.first_zero() {
        return Err(ConfigError::ZeroTunable { field });
    }

    let mut warnings = Vec::new();
    if config.store.index_url.trim().is_empty() {
        warnings.push(ConfigWarning {
            message: "store.index_url not set; the locator will use store.url".into(),
            hint: Some("set it to the metadata index tier in multi-shard deployments".into()),
        });
    }
    if config.tunables.time_poll_ms < 100 {
        warnings.push(ConfigWarning {
            message: format!(
                "time_poll_ms = {} polls every domain query more than ten times a second",
                config.tunables.time_poll_ms
            ),
            hint: None,
        });
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_with_index_warning() {
        let warnings = apply_guard_rails(&SupervisorConfig::default()).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.starts_with("store.index_url"));
        assert!(warnings[0].hint.is_some());
    }

    #[test]
    fn rejects_blank_bucket() {
        let mut config = SupervisorConfig::default();
        config.buckets.taskinput = " ".to_string();
        assert_eq!(
            apply_guard_rails(&config).unwrap_err(),
            ConfigError::BlankBucket(Bucket::TaskInput)
        );
    }

    #[test]
    fn rejects_zero_tunables() {
        let mut config = SupervisorConfig::default();
        config.tunables.query_limit = 0;
        assert_eq!(
            apply_guard_rails(&config).unwrap_err(),
            ConfigError::ZeroTunable {
                field: "query_limit"
            }
        );
    }

    #[test]
    fn fast_polling_is_only_a_warning() {
        let mut config = SupervisorConfig::default();
        config.store.index_url = "tcp://index.local:2020".to_string();
        config.tunables.time_poll_ms = 50;
        let warnings = apply_guard_rails(&config).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].hint, None);
    }

    #[test]
    fn rejects_unknown_locator() {
        let mut config = SupervisorConfig::default();
        config.locator = "local".to_string();
        let err = apply_guard_rails(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported value for property \"locator\": local"
        );
    }
}
