//! Site user accounts.

use std::fmt::Write;

use lettre::Address;
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};

/// A registered site user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    /// Argon2 encoded hash; never serialized.
    #[serde(skip)]
    pub password_hash: Option<String>,
}

impl User {
    /// "First Last", trimmed; empty when neither name is set.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// The address mail from this user should carry, e.g. `Jane Doe <jane@example.org>`.
    ///
    /// Names with header specials are quoted. An unparsable email is returned as is.
    pub fn sendto_address(&self) -> String {
        let name = self.full_name().replace(['\r', '\n'], " ");
        let Ok(address) = self.email.parse::<Address>() else {
            return self.email.clone();
        };
        if name.is_empty() {
            return self.email.clone();
        }
        let mut out = String::new();
        match write!(out, "{}", Mailbox::new(Some(name), address)) {
            Ok(()) => out,
            Err(_) => self.email.clone(),
        }
    }

    /// Substitution context for message templates (`{{user.first_name}}` etc).
    pub fn template_context(&self) -> serde_json::Value {
        serde_json::json!({
            "user": {
                "id": self.id,
                "username": self.username,
                "email": self.email,
                "first_name": self.first_name,
                "last_name": self.last_name,
                "name": self.full_name(),
            }
        })
    }
}

/// Fields needed to create a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_staff: bool,
    pub password_hash: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }

    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }

    pub fn with_password_hash(mut self, hash: String) -> Self {
        self.password_hash = Some(hash);
        self
    }
}
