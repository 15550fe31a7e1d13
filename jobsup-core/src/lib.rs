//! # jobsup core
//!
//! Reconciliation core of the batch-compute job supervisor.
//!
//! Work items (jobs, tasks, task inputs and outputs) live in a replicated,
//! eventually consistent metadata store. Each lifecycle step is recorded as
//! a claim timestamp on the record, so "which records need step X" is a
//! filter query. This crate owns those queries and when they run, plus the
//! locator that routes dispatched work to the storage node holding its data.
//!
//! ## Modules
//!
//! - [`filter`]: typed filter expressions rendered to the store's syntax
//! - [`catalog`]: the fixed query catalog and the claim-stage table behind it
//! - [`store`]: record and metadata store contracts, plus an in-memory store
//! - [`reconcile`]: the scheduler that runs catalog queries and hands
//!   results to a [`TransitionHandler`](reconcile::TransitionHandler)
//! - [`locator`]: parallel key to placement resolution
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use jobsup_core::{
//!     catalog::QueryName,
//!     config::ReconcileConfig,
//!     reconcile::{Delivery, ReconcileScheduler, TransitionHandler},
//!     store::InMemoryRecordStore,
//! };
//! use jobsup_model::DomainId;
//!
//! struct Worker;
//!
//! #[async_trait]
//! impl TransitionHandler for Worker {
//!     async fn handle(&self, delivery: Delivery) -> jobsup_core::Result<()> {
//!         if delivery.query == QueryName::TasksDone {
//!             // commit the task, then write timeCommitted
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> jobsup_core::Result<()> {
//! let store = Arc::new(InMemoryRecordStore::new());
//! let scheduler = ReconcileScheduler::new(store, Arc::new(Worker), ReconcileConfig::default());
//! scheduler.start().await?;
//! scheduler.acquire_domain(DomainId::parse("d1").expect("valid id")).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod locator;
pub mod reconcile;
pub mod store;

pub use error::{Result, SupervisorError};
pub use filter::Filter;
