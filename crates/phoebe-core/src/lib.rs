//! # phoebe-core
//!
//! Foundation types shared by every phoebe crate: the [`OrmError`](error::OrmError)
//! taxonomy that driver errors are normalized onto, and `tracing`-based logging
//! helpers.

pub mod error;
pub mod logging;

pub use error::{OrmError, OrmResult};
