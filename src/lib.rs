//! ESP web site: database-backed mail, program classes, and surveys.

pub mod config;
pub mod dbmail;
pub mod error;
pub mod program;
pub mod store;
pub mod survey;
pub mod users;
pub mod web;
