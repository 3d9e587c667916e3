//! The `Database` trait: one async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dbmail::model::{
    EmailListRule, MessageRequest, NewEmailListRule, NewMessageRequest, PlainRedirect,
};
use crate::error::DatabaseError;
use crate::program::{Audience, ClassRecord, EnrollmentRole, Section};
use crate::survey::model::{Answer, Question, QuestionType, Survey};
use crate::users::{NewUser, RecipientFilter, User, UserQuery};

/// Severity of a one-shot notice shown on the next page a session renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Success,
    Error,
}

impl MessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageLevel::Success => "success",
            MessageLevel::Error => "error",
        }
    }
}

/// A pending flash notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Revert applied migrations above `version`, newest first.
    async fn rollback_to(&self, version: i64) -> Result<(), DatabaseError>;

    /// Highest applied migration version.
    async fn migration_version(&self) -> Result<i64, DatabaseError>;

    // ── Users & sessions ────────────────────────────────────────────

    async fn create_user(&self, user: &NewUser) -> Result<User, DatabaseError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError>;

    /// Open a session for `user_id`. Returns the session token.
    async fn create_session(
        &self,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, DatabaseError>;

    /// Look up the user behind an unexpired session token.
    async fn get_session_user(&self, token: Uuid) -> Result<Option<User>, DatabaseError>;

    async fn delete_session(&self, token: Uuid) -> Result<(), DatabaseError>;

    /// Queue a flash notice for the session.
    async fn push_session_message(
        &self,
        token: Uuid,
        level: MessageLevel,
        text: &str,
    ) -> Result<(), DatabaseError>;

    /// Remove and return all queued notices for the session, oldest first.
    async fn take_session_messages(&self, token: Uuid) -> Result<Vec<SessionMessage>, DatabaseError>;

    // ── Recipient filters ───────────────────────────────────────────

    async fn create_recipient_filter(
        &self,
        name: &str,
        query: &UserQuery,
    ) -> Result<RecipientFilter, DatabaseError>;

    async fn get_recipient_filter(&self, id: i64) -> Result<Option<RecipientFilter>, DatabaseError>;

    /// Materialize a query into its members, ordered by user id.
    async fn query_users(&self, query: &UserQuery) -> Result<Vec<User>, DatabaseError>;

    // ── Message requests ────────────────────────────────────────────

    async fn create_message_request(
        &self,
        request: &NewMessageRequest,
    ) -> Result<MessageRequest, DatabaseError>;

    async fn get_message_request(&self, id: i64) -> Result<Option<MessageRequest>, DatabaseError>;

    // ── Email routing ───────────────────────────────────────────────

    /// All routing rules ordered by `seq`, then id.
    async fn list_email_rules(&self) -> Result<Vec<EmailListRule>, DatabaseError>;

    async fn create_email_rule(
        &self,
        rule: &NewEmailListRule,
    ) -> Result<EmailListRule, DatabaseError>;

    async fn create_plain_redirect(
        &self,
        original: &str,
        destination: &str,
    ) -> Result<PlainRedirect, DatabaseError>;

    async fn get_plain_redirect(&self, original: &str)
    -> Result<Option<PlainRedirect>, DatabaseError>;

    // ── Programs ────────────────────────────────────────────────────

    async fn create_class(
        &self,
        program_code: &str,
        title: &str,
    ) -> Result<ClassRecord, DatabaseError>;

    async fn get_class(&self, id: i64) -> Result<Option<ClassRecord>, DatabaseError>;

    async fn create_section(&self, class_id: i64, idx: i64) -> Result<Section, DatabaseError>;

    async fn enroll(
        &self,
        section_id: i64,
        user_id: i64,
        role: EnrollmentRole,
    ) -> Result<(), DatabaseError>;

    /// Distinct members of a class (or one of its sections) in the audience, ordered by id.
    async fn section_members(
        &self,
        class_id: i64,
        section_index: Option<i64>,
        audience: Audience,
    ) -> Result<Vec<User>, DatabaseError>;

    // ── Surveys ─────────────────────────────────────────────────────

    async fn create_survey(&self, name: &str, program_code: &str) -> Result<Survey, DatabaseError>;

    async fn get_survey(&self, id: i64) -> Result<Option<Survey>, DatabaseError>;

    async fn get_question_type(&self, name: &str) -> Result<Option<QuestionType>, DatabaseError>;

    async fn add_question(
        &self,
        survey_id: i64,
        question_type_id: i64,
        name: &str,
        seq: i64,
    ) -> Result<Question, DatabaseError>;

    /// Questions of a survey ordered by `seq`, then id.
    async fn list_questions(&self, survey_id: i64) -> Result<Vec<Question>, DatabaseError>;

    /// Start a new response to a survey. Returns the response id.
    async fn create_survey_response(&self, survey_id: i64) -> Result<i64, DatabaseError>;

    async fn add_answer(
        &self,
        response_id: i64,
        question_id: i64,
        class_id: Option<i64>,
        value: &str,
    ) -> Result<Answer, DatabaseError>;

    async fn list_answers(&self, question_id: i64) -> Result<Vec<Answer>, DatabaseError>;
}
