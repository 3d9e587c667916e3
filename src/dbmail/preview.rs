//! Previewing and test-sending message requests.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::mailer::{Mailer, OutgoingEmail};
use super::model::MessageRequest;
use super::smart_text::render;
use crate::error::DatabaseError;
use crate::store::Database;
use crate::users::User;

/// Pick the `From` address: explicit sender, then the creator's address, then the site default.
pub fn resolve_sender(request: &MessageRequest, creator: Option<&User>, default_from: &str) -> String {
    match (&request.sender, creator) {
        (Some(sender), _) if !sender.trim().is_empty() => sender.clone(),
        (_, Some(creator)) => creator.sendto_address(),
        _ => default_from.to_string(),
    }
}

/// A message request rendered for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub msgtext: String,
}

impl RenderedMessage {
    pub fn for_user(request: &MessageRequest, user: &User) -> Self {
        let context = user.template_context();
        Self {
            subject: render(&request.subject, &context),
            msgtext: render(&request.msgtext, &context),
        }
    }
}

/// Everything the preview page shows.
#[derive(Debug, Clone, Serialize)]
pub struct EmailPreview {
    pub message_request: MessageRequest,
    pub rendered: RenderedMessage,
    pub send_from: String,
    pub sample_user: User,
    pub recipient_count: usize,
}

/// Result of a test send. Transport failures are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSendOutcome {
    Sent { to: String },
    Failed { reason: String },
}

impl TestSendOutcome {
    /// The notice shown to the administrator afterwards.
    pub fn notice(&self) -> String {
        match self {
            TestSendOutcome::Sent { to } => format!("Test email sent successfully to {to}"),
            TestSendOutcome::Failed { reason } => format!("Failed to send test email: {reason}"),
        }
    }
}

/// Loads message requests and renders or test-sends them.
#[derive(Clone)]
pub struct PreviewService {
    db: Arc<dyn Database>,
    mailer: Arc<dyn Mailer>,
    default_from: String,
}

impl PreviewService {
    pub fn new(db: Arc<dyn Database>, mailer: Arc<dyn Mailer>, default_from: impl Into<String>) -> Self {
        Self {
            db,
            mailer,
            default_from: default_from.into(),
        }
    }

    async fn load_request(&self, id: i64) -> Result<MessageRequest, DatabaseError> {
        self.db
            .get_message_request(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "message request".into(),
                id: id.to_string(),
            })
    }

    async fn send_from(&self, request: &MessageRequest) -> Result<String, DatabaseError> {
        let creator = match request.creator_id {
            Some(creator_id) => self.db.get_user(creator_id).await?,
            None => None,
        };
        Ok(resolve_sender(request, creator.as_ref(), &self.default_from))
    }

    /// Members of the request's recipient filter, ordered by id.
    async fn recipients(&self, request: &MessageRequest) -> Result<Vec<User>, DatabaseError> {
        match self.db.get_recipient_filter(request.recipients_id).await? {
            Some(filter) => self.db.query_users(&filter.query).await,
            None => {
                warn!(
                    message_request_id = request.id,
                    filter_id = request.recipients_id,
                    "Recipient filter missing; treating as empty"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Render a message request against its first recipient, or `viewer` if it has none.
    pub async fn preview(&self, id: i64, viewer: &User) -> Result<EmailPreview, DatabaseError> {
        let request = self.load_request(id).await?;
        let recipients = self.recipients(&request).await?;
        let recipient_count = recipients.len();
        let sample_user = recipients
            .into_iter()
            .next()
            .unwrap_or_else(|| viewer.clone());

        let rendered = RenderedMessage::for_user(&request, &sample_user);
        let send_from = self.send_from(&request).await?;

        Ok(EmailPreview {
            message_request: request,
            rendered,
            send_from,
            sample_user,
            recipient_count,
        })
    }

    /// Render a message request for `admin` and send that single copy to `admin`.
    pub async fn send_test(&self, id: i64, admin: &User) -> Result<TestSendOutcome, DatabaseError> {
        let request = self.load_request(id).await?;
        let rendered = RenderedMessage::for_user(&request, admin);

        let email = OutgoingEmail {
            subject: rendered.subject,
            body: rendered.msgtext,
            from: self.send_from(&request).await?,
            to: vec![admin.email.clone()],
            headers: request.special_headers.clone(),
        };

        let outcome = match self.mailer.send(&email).await {
            Ok(()) => TestSendOutcome::Sent {
                to: admin.email.clone(),
            },
            Err(e) => TestSendOutcome::Failed {
                reason: e.to_string(),
            },
        };

        match &outcome {
            TestSendOutcome::Sent { to } => {
                info!(message_request_id = id, to = %to, "Test email sent")
            }
            TestSendOutcome::Failed { reason } => {
                warn!(message_request_id = id, error = %reason, "Test email failed")
            }
        }

        Ok(outcome)
    }
}
