//! Stored mail entities: routing rules, redirects, and message requests.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which handler turns a matched local part into recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListHandler {
    SectionList,
    ClassList,
    PlainList,
    UserEmail,
}

impl ListHandler {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListHandler::SectionList => "SectionList",
            ListHandler::ClassList => "ClassList",
            ListHandler::PlainList => "PlainList",
            ListHandler::UserEmail => "UserEmail",
        }
    }
}

impl fmt::Display for ListHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListHandler {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SectionList" => Ok(ListHandler::SectionList),
            "ClassList" => Ok(ListHandler::ClassList),
            "PlainList" => Ok(ListHandler::PlainList),
            "UserEmail" => Ok(ListHandler::UserEmail),
            other => Err(format!("unknown list handler: {other}")),
        }
    }
}

/// A persisted routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailListRule {
    pub id: i64,
    pub regex: String,
    pub seq: i64,
    pub handler: ListHandler,
    pub description: String,
    /// Hold matched mail for admin approval before delivery.
    pub admin_hold: bool,
    /// Send as one message with everyone on Cc instead of individually.
    pub cc_all: bool,
}

/// Fields needed to create a routing rule.
#[derive(Debug, Clone)]
pub struct NewEmailListRule {
    pub regex: String,
    pub seq: i64,
    pub handler: ListHandler,
    pub description: String,
    pub admin_hold: bool,
    pub cc_all: bool,
}

/// A manual alias: mail for `original` goes to `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlainRedirect {
    pub id: i64,
    pub original: String,
    /// Comma-separated addresses or usernames.
    pub destination: String,
}

/// A stored, templated bulk-email job definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRequest {
    pub id: i64,
    pub subject: String,
    pub msgtext: String,
    pub sender: Option<String>,
    pub creator_id: Option<i64>,
    /// Recipient filter id.
    pub recipients_id: i64,
    pub special_headers: BTreeMap<String, String>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a message request.
#[derive(Debug, Clone, Default)]
pub struct NewMessageRequest {
    pub subject: String,
    pub msgtext: String,
    pub sender: Option<String>,
    pub creator_id: Option<i64>,
    pub recipients_id: i64,
    pub special_headers: BTreeMap<String, String>,
}
