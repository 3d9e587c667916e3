//! Persistence: libSQL-backed storage for users, mail, programs, and surveys.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, MessageLevel, SessionMessage};
