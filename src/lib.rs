//! SpecMem core: the search, drilldown, and dimension-safe vector I/O
//! subsystem behind a persistent-memory and code-context service for an
//! LLM assistant.
//!
//! Every public item here is one of the eight per-project components:
//! [`dimension`] (projection math + adapter), [`project`] (namespacing),
//! [`adaptive_config`] (density-driven tuning), [`queue`] (embedding
//! overflow), [`drilldown`] (handle registry), [`camera`] (Camera Roll
//! formatting + drilldown resolution), and [`scorer`] (Mini-COT rescoring).
//! [`provider`] defines the external-service seams; [`db`] owns pooling and
//! schema DDL; [`config`]/[`error`]/[`models`] are the ambient stack.

pub mod adaptive_config;
pub mod camera;
pub mod config;
pub mod db;
pub mod dimension;
pub mod drilldown;
pub mod error;
pub mod facade;
pub mod models;
pub mod project;
pub mod provider;
pub mod queue;
pub mod scorer;

pub use error::{Result, SpecMemError};
pub use facade::SpecMemProject;
