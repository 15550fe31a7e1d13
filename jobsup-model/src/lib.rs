//! Core data model definitions shared across jobsup crates.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod location;
pub mod record;

pub use error::{ModelError, Result as ModelResult};
pub use ids::{DomainId, JobId, TaskId};
pub use location::{LocationResult, NodeIdentity, SharkPlacement};
pub use record::StoreRecord;
