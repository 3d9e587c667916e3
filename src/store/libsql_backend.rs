//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dbmail::model::{
    EmailListRule, ListHandler, MessageRequest, NewEmailListRule, NewMessageRequest, PlainRedirect,
};
use crate::error::DatabaseError;
use crate::program::{Audience, ClassRecord, EnrollmentRole, Section};
use crate::store::migrations;
use crate::store::traits::{Database, MessageLevel, SessionMessage};
use crate::survey::model::{Answer, Question, QuestionType, Survey};
use crate::users::{NewUser, RecipientFilter, User, UserQuery};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a query expected to return a single `id` column (INSERT ... RETURNING id).
    async fn insert_returning_id(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<i64, DatabaseError> {
        let mut rows = self.conn().query(sql, params).await.map_err(insert_error)?;
        match rows.next().await.map_err(insert_error)? {
            Some(row) => Ok(row.get(0)?),
            None => Err(DatabaseError::Query(format!("No id returned by: {sql}"))),
        }
    }

    async fn fetch_users(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<User>, DatabaseError> {
        let mut rows = self.conn().query(sql, params).await?;
        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row_to_user(&row)?);
        }
        Ok(users)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Constraint failures map to `Constraint`, anything else to `Query`.
fn insert_error(e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("constraint failed") {
        DatabaseError::Constraint(message)
    } else {
        DatabaseError::Query(message)
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, is_staff, password_hash";

const JOINED_USER_COLUMNS: &str =
    "u.id, u.username, u.email, u.first_name, u.last_name, u.is_staff, u.password_hash";

/// Map a libsql Row to a User. Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        is_staff: row.get::<i64>(5)? != 0,
        password_hash: row.get::<Option<String>>(6)?,
    })
}

const RULE_COLUMNS: &str = "id, regex, seq, handler, description, admin_hold, cc_all";

fn row_to_rule(row: &libsql::Row) -> Result<EmailListRule, DatabaseError> {
    let handler_str: String = row.get(3)?;
    let handler: ListHandler = handler_str
        .parse()
        .map_err(DatabaseError::Serialization)?;
    Ok(EmailListRule {
        id: row.get(0)?,
        regex: row.get(1)?,
        seq: row.get(2)?,
        handler,
        description: row.get(4)?,
        admin_hold: row.get::<i64>(5)? != 0,
        cc_all: row.get::<i64>(6)? != 0,
    })
}

const MESSAGE_REQUEST_COLUMNS: &str =
    "id, subject, msgtext, sender, creator_id, recipients_id, special_headers, processed, created_at";

fn row_to_message_request(row: &libsql::Row) -> Result<MessageRequest, DatabaseError> {
    let headers_str: String = row.get(6)?;
    let special_headers: BTreeMap<String, String> = serde_json::from_str(&headers_str)
        .map_err(|e| DatabaseError::Serialization(format!("Bad special_headers: {e}")))?;
    let created_str: String = row.get(8)?;
    Ok(MessageRequest {
        id: row.get(0)?,
        subject: row.get(1)?,
        msgtext: row.get(2)?,
        sender: row.get::<Option<String>>(3)?,
        creator_id: row.get::<Option<i64>>(4)?,
        recipients_id: row.get(5)?,
        special_headers,
        processed: row.get::<i64>(7)? != 0,
        created_at: parse_datetime(&created_str),
    })
}

const QUESTION_COLUMNS: &str =
    "q.id, q.survey_id, q.name, q.seq, t.id, t.name, t.is_numeric";

fn row_to_question(row: &libsql::Row) -> Result<Question, DatabaseError> {
    Ok(Question {
        id: row.get(0)?,
        survey_id: row.get(1)?,
        name: row.get(2)?,
        seq: row.get(3)?,
        question_type: QuestionType {
            id: row.get(4)?,
            name: row.get(5)?,
            is_numeric: row.get::<i64>(6)? != 0,
        },
    })
}

fn row_to_answer(row: &libsql::Row) -> Result<Answer, DatabaseError> {
    Ok(Answer {
        id: row.get(0)?,
        response_id: row.get(1)?,
        question_id: row.get(2)?,
        class_id: row.get::<Option<i64>>(3)?,
        value: row.get(4)?,
    })
}

fn str_to_level(s: &str) -> MessageLevel {
    match s {
        "success" => MessageLevel::Success,
        _ => MessageLevel::Error,
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn rollback_to(&self, version: i64) -> Result<(), DatabaseError> {
        migrations::rollback_to(self.conn(), version).await
    }

    async fn migration_version(&self) -> Result<i64, DatabaseError> {
        migrations::get_current_version(self.conn()).await
    }

    // ── Users & sessions ────────────────────────────────────────────

    async fn create_user(&self, user: &NewUser) -> Result<User, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO users (username, email, first_name, last_name, is_staff, password_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
                params![
                    user.username.as_str(),
                    user.email.as_str(),
                    user.first_name.as_str(),
                    user.last_name.as_str(),
                    i64::from(user.is_staff),
                    opt_text(user.password_hash.as_deref()),
                ],
            )
            .await?;
        debug!(user_id = id, username = %user.username, "User created");
        Ok(User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_staff: user.is_staff,
            password_hash: user.password_hash.clone(),
        })
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self.fetch_users(&sql, params![id]).await?.into_iter().next())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DatabaseError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1");
        Ok(self
            .fetch_users(&sql, params![username])
            .await?
            .into_iter()
            .next())
    }

    async fn create_session(
        &self,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<Uuid, DatabaseError> {
        let token = Uuid::new_v4();
        self.conn()
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token.to_string(), user_id, expires_at.to_rfc3339()],
            )
            .await?;
        Ok(token)
    }

    async fn get_session_user(&self, token: Uuid) -> Result<Option<User>, DatabaseError> {
        let sql = format!(
            "SELECT {JOINED_USER_COLUMNS}, s.expires_at FROM sessions s
             JOIN users u ON u.id = s.user_id WHERE s.token = ?1"
        );
        let mut rows = self.conn().query(&sql, params![token.to_string()]).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let expires_str: String = row.get(7)?;
        if parse_datetime(&expires_str) <= Utc::now() {
            debug!(token = %token, "Session expired");
            self.delete_session(token).await?;
            return Ok(None);
        }
        Ok(Some(row_to_user(&row)?))
    }

    async fn delete_session(&self, token: Uuid) -> Result<(), DatabaseError> {
        let token = token.to_string();
        self.conn()
            .execute("DELETE FROM session_messages WHERE token = ?1", params![token.as_str()])
            .await?;
        self.conn()
            .execute("DELETE FROM sessions WHERE token = ?1", params![token.as_str()])
            .await?;
        Ok(())
    }

    async fn push_session_message(
        &self,
        token: Uuid,
        level: MessageLevel,
        text: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO session_messages (token, level, text) VALUES (?1, ?2, ?3)",
                params![token.to_string(), level.as_str(), text],
            )
            .await?;
        Ok(())
    }

    async fn take_session_messages(&self, token: Uuid) -> Result<Vec<SessionMessage>, DatabaseError> {
        let token = token.to_string();
        let mut rows = self
            .conn()
            .query(
                "SELECT id, level, text FROM session_messages WHERE token = ?1 ORDER BY id",
                params![token.as_str()],
            )
            .await?;
        let mut messages = Vec::new();
        let mut last_id = 0i64;
        while let Some(row) = rows.next().await? {
            last_id = row.get(0)?;
            let level: String = row.get(1)?;
            messages.push(SessionMessage {
                level: str_to_level(&level),
                text: row.get(2)?,
            });
        }
        // Only what was read; a notice queued concurrently survives for the next page.
        self.conn()
            .execute(
                "DELETE FROM session_messages WHERE token = ?1 AND id <= ?2",
                params![token.as_str(), last_id],
            )
            .await?;
        Ok(messages)
    }

    // ── Recipient filters ───────────────────────────────────────────

    async fn create_recipient_filter(
        &self,
        name: &str,
        query: &UserQuery,
    ) -> Result<RecipientFilter, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO recipient_filters (name, query) VALUES (?1, ?2) RETURNING id",
                params![name, to_json(query)?],
            )
            .await?;
        Ok(RecipientFilter {
            id,
            name: name.to_string(),
            query: query.clone(),
        })
    }

    async fn get_recipient_filter(&self, id: i64) -> Result<Option<RecipientFilter>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, query FROM recipient_filters WHERE id = ?1",
                params![id],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let query_str: String = row.get(2)?;
        let query: UserQuery = serde_json::from_str(&query_str)
            .map_err(|e| DatabaseError::Serialization(format!("Bad recipient query: {e}")))?;
        Ok(Some(RecipientFilter {
            id: row.get(0)?,
            name: row.get(1)?,
            query,
        }))
    }

    async fn query_users(&self, query: &UserQuery) -> Result<Vec<User>, DatabaseError> {
        match query {
            UserQuery::All => {
                let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
                self.fetch_users(&sql, ()).await
            }
            UserQuery::Ids { ids } => {
                let sql = format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE id IN (SELECT value FROM json_each(?1)) ORDER BY id"
                );
                self.fetch_users(&sql, params![to_json(ids)?]).await
            }
            UserQuery::Usernames { usernames } => {
                let sql = format!(
                    "SELECT {USER_COLUMNS} FROM users
                     WHERE username IN (SELECT value FROM json_each(?1)) ORDER BY id"
                );
                self.fetch_users(&sql, params![to_json(usernames)?]).await
            }
            UserQuery::Section {
                class_id,
                section_index,
                audience,
            } => {
                self.section_members(*class_id, *section_index, *audience)
                    .await
            }
        }
    }

    // ── Message requests ────────────────────────────────────────────

    async fn create_message_request(
        &self,
        request: &NewMessageRequest,
    ) -> Result<MessageRequest, DatabaseError> {
        let created_at = Utc::now();
        let id = self
            .insert_returning_id(
                "INSERT INTO message_requests
                    (subject, msgtext, sender, creator_id, recipients_id, special_headers, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) RETURNING id",
                params![
                    request.subject.as_str(),
                    request.msgtext.as_str(),
                    opt_text(request.sender.as_deref()),
                    opt_int(request.creator_id),
                    request.recipients_id,
                    to_json(&request.special_headers)?,
                    created_at.to_rfc3339(),
                ],
            )
            .await?;
        info!(message_request_id = id, "Message request created");
        Ok(MessageRequest {
            id,
            subject: request.subject.clone(),
            msgtext: request.msgtext.clone(),
            sender: request.sender.clone(),
            creator_id: request.creator_id,
            recipients_id: request.recipients_id,
            special_headers: request.special_headers.clone(),
            processed: false,
            created_at,
        })
    }

    async fn get_message_request(&self, id: i64) -> Result<Option<MessageRequest>, DatabaseError> {
        let sql = format!("SELECT {MESSAGE_REQUEST_COLUMNS} FROM message_requests WHERE id = ?1");
        let mut rows = self.conn().query(&sql, params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_message_request(&row)?)),
            None => Ok(None),
        }
    }

    // ── Email routing ───────────────────────────────────────────────

    async fn list_email_rules(&self) -> Result<Vec<EmailListRule>, DatabaseError> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM email_lists ORDER BY seq, id");
        let mut rows = self.conn().query(&sql, ()).await?;
        let mut rules = Vec::new();
        while let Some(row) = rows.next().await? {
            rules.push(row_to_rule(&row)?);
        }
        Ok(rules)
    }

    async fn create_email_rule(
        &self,
        rule: &NewEmailListRule,
    ) -> Result<EmailListRule, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO email_lists (regex, seq, handler, description, admin_hold, cc_all)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING id",
                params![
                    rule.regex.as_str(),
                    rule.seq,
                    rule.handler.as_str(),
                    rule.description.as_str(),
                    i64::from(rule.admin_hold),
                    i64::from(rule.cc_all),
                ],
            )
            .await?;
        Ok(EmailListRule {
            id,
            regex: rule.regex.clone(),
            seq: rule.seq,
            handler: rule.handler,
            description: rule.description.clone(),
            admin_hold: rule.admin_hold,
            cc_all: rule.cc_all,
        })
    }

    async fn create_plain_redirect(
        &self,
        original: &str,
        destination: &str,
    ) -> Result<PlainRedirect, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO plain_redirects (original, destination) VALUES (?1, ?2) RETURNING id",
                params![original, destination],
            )
            .await?;
        Ok(PlainRedirect {
            id,
            original: original.to_string(),
            destination: destination.to_string(),
        })
    }

    async fn get_plain_redirect(
        &self,
        original: &str,
    ) -> Result<Option<PlainRedirect>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, original, destination FROM plain_redirects WHERE original = ?1",
                params![original],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(PlainRedirect {
                id: row.get(0)?,
                original: row.get(1)?,
                destination: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    // ── Programs ────────────────────────────────────────────────────

    async fn create_class(
        &self,
        program_code: &str,
        title: &str,
    ) -> Result<ClassRecord, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO classes (program_code, title) VALUES (?1, ?2) RETURNING id",
                params![program_code, title],
            )
            .await?;
        Ok(ClassRecord {
            id,
            program_code: program_code.to_string(),
            title: title.to_string(),
        })
    }

    async fn get_class(&self, id: i64) -> Result<Option<ClassRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, program_code, title FROM classes WHERE id = ?1",
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(ClassRecord {
                id: row.get(0)?,
                program_code: row.get(1)?,
                title: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    async fn create_section(&self, class_id: i64, idx: i64) -> Result<Section, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO sections (class_id, idx) VALUES (?1, ?2) RETURNING id",
                params![class_id, idx],
            )
            .await?;
        Ok(Section { id, class_id, idx })
    }

    async fn enroll(
        &self,
        section_id: i64,
        user_id: i64,
        role: EnrollmentRole,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO enrollments (section_id, user_id, role) VALUES (?1, ?2, ?3)",
                params![section_id, user_id, role.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn section_members(
        &self,
        class_id: i64,
        section_index: Option<i64>,
        audience: Audience,
    ) -> Result<Vec<User>, DatabaseError> {
        let roles: Vec<&str> = audience.roles().iter().map(|r| r.as_str()).collect();
        let sql = format!(
            "SELECT DISTINCT {JOINED_USER_COLUMNS} FROM users u
             JOIN enrollments e ON e.user_id = u.id
             JOIN sections s ON s.id = e.section_id
             WHERE s.class_id = ?1
               AND (?2 IS NULL OR s.idx = ?2)
               AND e.role IN (SELECT value FROM json_each(?3))
             ORDER BY u.id"
        );
        self.fetch_users(&sql, params![class_id, opt_int(section_index), to_json(&roles)?])
            .await
    }

    // ── Surveys ─────────────────────────────────────────────────────

    async fn create_survey(&self, name: &str, program_code: &str) -> Result<Survey, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO surveys (name, program_code) VALUES (?1, ?2) RETURNING id",
                params![name, program_code],
            )
            .await?;
        Ok(Survey {
            id,
            name: name.to_string(),
            program_code: program_code.to_string(),
        })
    }

    async fn get_survey(&self, id: i64) -> Result<Option<Survey>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, program_code FROM surveys WHERE id = ?1",
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Survey {
                id: row.get(0)?,
                name: row.get(1)?,
                program_code: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    async fn get_question_type(&self, name: &str) -> Result<Option<QuestionType>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, is_numeric FROM question_types WHERE name = ?1",
                params![name],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(QuestionType {
                id: row.get(0)?,
                name: row.get(1)?,
                is_numeric: row.get::<i64>(2)? != 0,
            })),
            None => Ok(None),
        }
    }

    async fn add_question(
        &self,
        survey_id: i64,
        question_type_id: i64,
        name: &str,
        seq: i64,
    ) -> Result<Question, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO questions (survey_id, question_type_id, name, seq)
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                params![survey_id, question_type_id, name, seq],
            )
            .await?;
        let sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM questions q
             JOIN question_types t ON t.id = q.question_type_id WHERE q.id = ?1"
        );
        let mut rows = self.conn().query(&sql, params![id]).await?;
        match rows.next().await? {
            Some(row) => row_to_question(&row),
            None => Err(DatabaseError::NotFound {
                entity: "question".into(),
                id: id.to_string(),
            }),
        }
    }

    async fn list_questions(&self, survey_id: i64) -> Result<Vec<Question>, DatabaseError> {
        let sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM questions q
             JOIN question_types t ON t.id = q.question_type_id
             WHERE q.survey_id = ?1 ORDER BY q.seq, q.id"
        );
        let mut rows = self.conn().query(&sql, params![survey_id]).await?;
        let mut questions = Vec::new();
        while let Some(row) = rows.next().await? {
            questions.push(row_to_question(&row)?);
        }
        Ok(questions)
    }

    async fn create_survey_response(&self, survey_id: i64) -> Result<i64, DatabaseError> {
        self.insert_returning_id(
            "INSERT INTO survey_responses (survey_id) VALUES (?1) RETURNING id",
            params![survey_id],
        )
        .await
    }

    async fn add_answer(
        &self,
        response_id: i64,
        question_id: i64,
        class_id: Option<i64>,
        value: &str,
    ) -> Result<Answer, DatabaseError> {
        let id = self
            .insert_returning_id(
                "INSERT INTO answers (response_id, question_id, class_id, value)
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                params![response_id, question_id, opt_int(class_id), value],
            )
            .await?;
        Ok(Answer {
            id,
            response_id,
            question_id,
            class_id,
            value: value.to_string(),
        })
    }

    async fn list_answers(&self, question_id: i64) -> Result<Vec<Answer>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, response_id, question_id, class_id, value FROM answers
                 WHERE question_id = ?1 ORDER BY id",
                params![question_id],
            )
            .await?;
        let mut answers = Vec::new();
        while let Some(row) = rows.next().await? {
            answers.push(row_to_answer(&row)?);
        }
        Ok(answers)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    async fn make_user(db: &LibSqlBackend, username: &str) -> User {
        db.create_user(
            &NewUser::new(username, format!("{username}@example.com")).with_name("First", username),
        )
        .await
        .unwrap()
    }

    // ── User tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn create_and_get_user() {
        let db = test_db().await;
        let user = make_user(&db, "alice").await;

        let fetched = db.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(fetched, user);
        let by_name = db.get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(db.get_user(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let db = test_db().await;
        make_user(&db, "alice").await;
        assert!(matches!(
            db.create_user(&NewUser::new("alice", "other@example.com")).await,
            Err(DatabaseError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_redirect_and_section_are_constraint_errors() {
        let db = test_db().await;
        db.create_plain_redirect("directors", "a@example.com").await.unwrap();
        assert!(matches!(
            db.create_plain_redirect("directors", "b@example.com").await,
            Err(DatabaseError::Constraint(_))
        ));

        let class = db.create_class("splash2024", "Rocketry").await.unwrap();
        db.create_section(class.id, 1).await.unwrap();
        assert!(matches!(
            db.create_section(class.id, 1).await,
            Err(DatabaseError::Constraint(_))
        ));
    }

    // ── Session tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn session_round_trip_and_expiry() {
        let db = test_db().await;
        let user = make_user(&db, "alice").await;

        let live = db
            .create_session(user.id, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(db.get_session_user(live).await.unwrap().unwrap().id, user.id);

        let stale = db
            .create_session(user.id, Utc::now() - Duration::minutes(1))
            .await
            .unwrap();
        assert!(db.get_session_user(stale).await.unwrap().is_none());

        db.delete_session(live).await.unwrap();
        assert!(db.get_session_user(live).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_messages_are_taken_once() {
        let db = test_db().await;
        let user = make_user(&db, "alice").await;
        let token = db
            .create_session(user.id, Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        db.push_session_message(token, MessageLevel::Error, "first")
            .await
            .unwrap();
        db.push_session_message(token, MessageLevel::Success, "second")
            .await
            .unwrap();

        let taken = db.take_session_messages(token).await.unwrap();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].level, MessageLevel::Error);
        assert_eq!(taken[1].text, "second");
        assert!(db.take_session_messages(token).await.unwrap().is_empty());
    }

    // ── Recipient filter tests ──────────────────────────────────────

    #[tokio::test]
    async fn filters_materialize_in_id_order() {
        let db = test_db().await;
        let alice = make_user(&db, "alice").await;
        let bob = make_user(&db, "bob").await;
        let carol = make_user(&db, "carol").await;

        let filter = db
            .create_recipient_filter(
                "Two users",
                &UserQuery::Usernames {
                    usernames: vec!["carol".into(), "alice".into()],
                },
            )
            .await
            .unwrap();
        let stored = db.get_recipient_filter(filter.id).await.unwrap().unwrap();
        assert_eq!(stored, filter);

        let members = db.query_users(&stored.query).await.unwrap();
        let ids: Vec<i64> = members.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![alice.id, carol.id]);

        let by_id = db
            .query_users(&UserQuery::Ids { ids: vec![bob.id, 4242] })
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].username, "bob");

        assert_eq!(db.query_users(&UserQuery::All).await.unwrap().len(), 3);
        assert!(db
            .query_users(&UserQuery::Ids { ids: vec![] })
            .await
            .unwrap()
            .is_empty());
    }

    // ── Message request tests ───────────────────────────────────────

    #[tokio::test]
    async fn message_request_round_trip() {
        let db = test_db().await;
        let admin = make_user(&db, "admin").await;
        let filter = db
            .create_recipient_filter("Everyone", &UserQuery::All)
            .await
            .unwrap();

        let mut headers = BTreeMap::new();
        headers.insert("Reply-To".to_string(), "office@example.com".to_string());
        let created = db
            .create_message_request(&NewMessageRequest {
                subject: "Hi {{user.first_name}}".into(),
                msgtext: "Body".into(),
                sender: None,
                creator_id: Some(admin.id),
                recipients_id: filter.id,
                special_headers: headers,
            })
            .await
            .unwrap();

        let fetched = db.get_message_request(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.subject, "Hi {{user.first_name}}");
        assert_eq!(fetched.sender, None);
        assert_eq!(fetched.creator_id, Some(admin.id));
        assert_eq!(fetched.special_headers["Reply-To"], "office@example.com");
        assert!(!fetched.processed);

        assert!(db.get_message_request(99999).await.unwrap().is_none());
    }

    // ── Routing tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn rules_listed_by_seq() {
        let db = test_db().await;
        db.create_email_rule(&NewEmailListRule {
            regex: "^first$".into(),
            seq: 1,
            handler: ListHandler::PlainList,
            description: String::new(),
            admin_hold: true,
            cc_all: false,
        })
        .await
        .unwrap();

        let rules = db.list_email_rules().await.unwrap();
        let seqs: Vec<i64> = rules.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 10, 20, 30, 40]);
        assert!(rules[0].admin_hold);
        assert_eq!(rules[4].handler, ListHandler::UserEmail);
    }

    // ── Program tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn section_members_by_audience() {
        let db = test_db().await;
        let student = make_user(&db, "student").await;
        let teacher = make_user(&db, "teacher").await;
        let other = make_user(&db, "other").await;

        let class = db.create_class("splash2024", "Rocketry").await.unwrap();
        let s1 = db.create_section(class.id, 1).await.unwrap();
        let s2 = db.create_section(class.id, 2).await.unwrap();
        db.enroll(s1.id, student.id, EnrollmentRole::Student).await.unwrap();
        db.enroll(s1.id, teacher.id, EnrollmentRole::Teacher).await.unwrap();
        db.enroll(s2.id, teacher.id, EnrollmentRole::Teacher).await.unwrap();
        db.enroll(s2.id, other.id, EnrollmentRole::Student).await.unwrap();

        let s1_students = db
            .section_members(class.id, Some(1), Audience::Students)
            .await
            .unwrap();
        assert_eq!(s1_students, vec![student.clone()]);

        let teachers = db
            .section_members(class.id, None, Audience::Teachers)
            .await
            .unwrap();
        assert_eq!(teachers.len(), 1, "teacher of two sections listed once");

        let everyone = db
            .section_members(class.id, None, Audience::Class)
            .await
            .unwrap();
        assert_eq!(everyone.len(), 3);
    }
}
