//! Database-backed mail: list routing, message requests, preview and test send.

pub mod email_list;
pub mod mailer;
pub mod model;
pub mod preview;
pub mod smart_text;

pub use email_list::{EmailListRouter, ListRoute, ResolvedList};
pub use mailer::{LogMailer, Mailer, MemoryOutbox, OutgoingEmail, SmtpMailer};
pub use preview::{EmailPreview, PreviewService, TestSendOutcome};
