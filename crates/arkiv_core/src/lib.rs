//! # Arkiv Core
//!
//! Embedded key-value storage engine for Arkiv.
//!
//! Recent writes live in an in-memory cache; older data is archived into
//! immutable, timestamp-named segment files. Entries can be looked up by
//! key, by contiguous insertion-order range, or by timestamp range.
//!
//! This crate provides:
//! - The segment store (active segment, sealed segments, rotation, checkpoint)
//! - The index manager (primary key index, insertion-order index, active cache)
//! - The query engine (point lookup, position/time ranges, scan and filter)
//! - The lifecycle controller (startup validation, periodic flush, shutdown)
//!
//! The [`Engine`] is the public entry point:
//!
//! ```rust
//! use arkiv_core::{Config, Engine};
//! use serde_json::json;
//!
//! # fn main() -> arkiv_core::CoreResult<()> {
//! let dir = tempfile::tempdir().unwrap();
//! let config = Config::default().database_path(dir.path());
//! let engine = Engine::open(config)?;
//!
//! engine.put("user:1", json!({"name": "ada"}))?;
//! assert_eq!(engine.get("user:1")?, Some(json!({"name": "ada"})));
//!
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod index;
mod lifecycle;
mod query;
mod segment;
mod types;

pub use config::Config;
pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use lifecycle::{EngineState, ShutdownHandle};
pub use types::{Location, SegmentId, Seq};

/// Document type stored by the engine.
pub use serde_json::Value;
