use crate::error::{ModelError, Result};

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(String);

        impl $name {
            /// Wrap a store-assigned identifier, rejecting empty strings.
            pub fn parse(raw: impl Into<String>) -> Result<Self> {
                let raw = raw.into();
                if raw.trim().is_empty() {
                    return Err(ModelError::EmptyIdentifier($kind));
                }
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// Shard of jobs owned by exactly one worker process.
    DomainId,
    "domain"
);

opaque_id!(
    /// Identifier of a submitted job.
    JobId,
    "job"
);

opaque_id!(
    /// Identifier of a single task within a job phase.
    TaskId,
    "task"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifiers_are_rejected() {
        assert_eq!(
            DomainId::parse("  "),
            Err(ModelError::EmptyIdentifier("domain"))
        );
        assert!(JobId::parse("").is_err());
    }

    #[test]
    fn identifiers_display_raw_value() {
        let task = TaskId::parse("7c1e-task").expect("valid id");
        assert_eq!(task.to_string(), "7c1e-task");
        assert_eq!(task.as_str(), "7c1e-task");
    }
}
