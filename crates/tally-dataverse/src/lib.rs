//! # tally-dataverse
//!
//! Dataverse Web API transport for the [`tally`] counting engine.
//!
//! - [`DataverseConnector`] implements [`tally::ConnectionFactory`]: every
//!   worker gets its own HTTP client, with the connector's client as the
//!   shared fallback.
//! - [`DataverseConnection`] implements [`tally::CountConnection`] by sending
//!   one `$batch` request with a `RetrieveTotalRecordCount` call per entity,
//!   in continue-on-error mode.
//! - [`OrgVersion`] gates counting on organizations older than 9.0.

pub mod batch;
mod catalog;
mod config;
mod connection;
mod error;
mod version;

pub use crate::catalog::*;
pub use crate::config::*;
pub use crate::connection::*;
pub use crate::error::*;
pub use crate::version::*;
