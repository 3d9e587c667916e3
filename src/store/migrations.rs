//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number, a forward step, and a reverse step.
//! `run_migrations()` checks the current version and applies only the new
//! ones sequentially; `rollback_to()` walks back down. Most steps are plain
//! SQL; data migrations run Rust against the live connection.

use libsql::Connection;

use crate::error::DatabaseError;

/// One direction of a migration.
enum Step {
    Sql(&'static str),
    SeedDefaultEmailLists,
    RemoveDefaultEmailLists,
}

/// A single migration.
struct Migration {
    version: i64,
    name: &'static str,
    up: Step,
    down: Step,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "users_and_sessions",
        up: Step::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                is_staff INTEGER NOT NULL DEFAULT 0,
                password_hash TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                expires_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

            CREATE TABLE IF NOT EXISTS session_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                level TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_session_messages_token ON session_messages(token);

            CREATE TABLE IF NOT EXISTS recipient_filters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                query TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
        ),
        down: Step::Sql(
            r#"
            DROP TABLE IF EXISTS recipient_filters;
            DROP TABLE IF EXISTS session_messages;
            DROP TABLE IF EXISTS sessions;
            DROP TABLE IF EXISTS users;
        "#,
        ),
    },
    Migration {
        version: 2,
        name: "dbmail_schema",
        up: Step::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS email_lists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                regex TEXT NOT NULL,
                seq INTEGER NOT NULL,
                handler TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                admin_hold INTEGER NOT NULL DEFAULT 0,
                cc_all INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_email_lists_seq ON email_lists(seq);

            CREATE TABLE IF NOT EXISTS plain_redirects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original TEXT NOT NULL UNIQUE,
                destination TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS message_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                msgtext TEXT NOT NULL,
                sender TEXT,
                creator_id INTEGER REFERENCES users(id),
                recipients_id INTEGER NOT NULL REFERENCES recipient_filters(id),
                special_headers TEXT NOT NULL DEFAULT '{}',
                processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
        "#,
        ),
        down: Step::Sql(
            r#"
            DROP TABLE IF EXISTS message_requests;
            DROP TABLE IF EXISTS plain_redirects;
            DROP TABLE IF EXISTS email_lists;
        "#,
        ),
    },
    Migration {
        version: 3,
        name: "programs_and_classes",
        up: Step::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS classes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                program_code TEXT NOT NULL,
                title TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_classes_program ON classes(program_code);

            CREATE TABLE IF NOT EXISTS sections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                class_id INTEGER NOT NULL REFERENCES classes(id),
                idx INTEGER NOT NULL,
                UNIQUE (class_id, idx)
            );

            CREATE TABLE IF NOT EXISTS enrollments (
                section_id INTEGER NOT NULL REFERENCES sections(id),
                user_id INTEGER NOT NULL REFERENCES users(id),
                role TEXT NOT NULL,
                PRIMARY KEY (section_id, user_id, role)
            );
        "#,
        ),
        down: Step::Sql(
            r#"
            DROP TABLE IF EXISTS enrollments;
            DROP TABLE IF EXISTS sections;
            DROP TABLE IF EXISTS classes;
        "#,
        ),
    },
    Migration {
        version: 4,
        name: "survey_schema",
        up: Step::Sql(
            r#"
            CREATE TABLE IF NOT EXISTS question_types (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                is_numeric INTEGER NOT NULL DEFAULT 0
            );
            INSERT OR IGNORE INTO question_types (name, is_numeric) VALUES
                ('Numeric Rating', 1),
                ('Yes-No Response', 0),
                ('Short Answer', 0),
                ('Long Answer', 0),
                ('Multiple Choice', 0),
                ('Favorite Class', 0);

            CREATE TABLE IF NOT EXISTS surveys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                program_code TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                survey_id INTEGER NOT NULL REFERENCES surveys(id),
                question_type_id INTEGER NOT NULL REFERENCES question_types(id),
                name TEXT NOT NULL,
                seq INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_questions_survey ON questions(survey_id);

            CREATE TABLE IF NOT EXISTS survey_responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                survey_id INTEGER NOT NULL REFERENCES surveys(id),
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS answers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                response_id INTEGER NOT NULL REFERENCES survey_responses(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                class_id INTEGER REFERENCES classes(id),
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id);
        "#,
        ),
        down: Step::Sql(
            r#"
            DROP TABLE IF EXISTS answers;
            DROP TABLE IF EXISTS survey_responses;
            DROP TABLE IF EXISTS questions;
            DROP TABLE IF EXISTS surveys;
            DROP TABLE IF EXISTS question_types;
        "#,
        ),
    },
    Migration {
        version: 5,
        name: "populate_default_email_lists",
        up: Step::SeedDefaultEmailLists,
        down: Step::RemoveDefaultEmailLists,
    },
];

/// A routing rule every new site starts with.
pub(crate) struct DefaultEmailList {
    pub regex: &'static str,
    pub seq: i64,
    pub handler: &'static str,
    pub description: &'static str,
}

pub(crate) const SECTION_LIST_REGEX: &str =
    r"^([a-zA-Z0-9_]+)s([0-9]+)c([0-9]+)-(students|teachers|class)$";
pub(crate) const CLASS_LIST_REGEX: &str = r"^([a-zA-Z0-9_]+)s([0-9]+)-(students|teachers|class)$";
pub(crate) const PLAIN_NAME_REGEX: &str = r"^([a-zA-Z0-9_\.\-]+)$";

pub(crate) const DEFAULT_EMAIL_LISTS: &[DefaultEmailList] = &[
    DefaultEmailList {
        regex: SECTION_LIST_REGEX,
        seq: 10,
        handler: "SectionList",
        description: "Section mailing lists (e.g., S123C1-students)",
    },
    DefaultEmailList {
        regex: CLASS_LIST_REGEX,
        seq: 20,
        handler: "ClassList",
        description: "Class mailing lists (e.g., S123-students)",
    },
    DefaultEmailList {
        regex: PLAIN_NAME_REGEX,
        seq: 30,
        handler: "PlainList",
        description: "Plain redirect lists (looks up in PlainRedirect table)",
    },
    DefaultEmailList {
        regex: PLAIN_NAME_REGEX,
        seq: 40,
        handler: "UserEmail",
        description: "User email forwarding (forwards to user's email address)",
    },
];

/// Patterns removed when the seed is reverted. The PlainList and UserEmail
/// defaults share a pattern, so removal by pattern takes both rows.
const DEFAULT_EMAIL_LIST_REGEXES: &[&str] =
    &[SECTION_LIST_REGEX, CLASS_LIST_REGEX, PLAIN_NAME_REGEX];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            apply_step(conn, &migration.up).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");

    Ok(())
}

/// Revert every applied migration with a version above `target`, newest first.
pub async fn rollback_to(conn: &Connection, target: i64) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS.iter().rev() {
        if migration.version > target && migration.version <= current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Reverting migration"
            );
            apply_step(conn, &migration.down).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Reverting V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            conn.execute(
                "DELETE FROM _migrations WHERE version = ?1",
                libsql::params![migration.version],
            )
            .await
            .map_err(|e| {
                DatabaseError::Migration(format!(
                    "Failed to unrecord migration V{}: {e}",
                    migration.version
                ))
            })?;
        }
    }

    Ok(())
}

async fn apply_step(conn: &Connection, step: &Step) -> Result<(), DatabaseError> {
    match step {
        Step::Sql(sql) => {
            conn.execute_batch(sql).await?;
            Ok(())
        }
        Step::SeedDefaultEmailLists => seed_default_email_lists(conn).await,
        Step::RemoveDefaultEmailLists => remove_default_email_lists(conn).await,
    }
}

/// Insert the default routing rules, unless the site already has any rule.
///
/// The guard and all inserts share one transaction, so a failed seed leaves no rows behind.
async fn seed_default_email_lists(conn: &Connection) -> Result<(), DatabaseError> {
    let tx = conn.transaction().await?;

    let exists = {
        let mut rows = tx
            .query("SELECT EXISTS (SELECT 1 FROM email_lists)", ())
            .await?;
        match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        }
    };
    if exists {
        tx.commit().await?;
        tracing::info!("Email lists already configured; skipping default seed");
        return Ok(());
    }

    if let Err(e) = insert_default_email_lists(&tx).await {
        if let Err(rollback) = tx.rollback().await {
            tracing::warn!(error = %rollback, "Failed to roll back partial email list seed");
        }
        return Err(e);
    }
    tx.commit().await?;

    tracing::info!(count = DEFAULT_EMAIL_LISTS.len(), "Seeded default email lists");
    Ok(())
}

async fn insert_default_email_lists(conn: &Connection) -> Result<(), DatabaseError> {
    for list in DEFAULT_EMAIL_LISTS {
        conn.execute(
            "INSERT INTO email_lists (regex, seq, handler, description, admin_hold, cc_all)
             VALUES (?1, ?2, ?3, ?4, 0, 0)",
            libsql::params![list.regex, list.seq, list.handler, list.description],
        )
        .await?;
    }
    Ok(())
}

/// Delete every rule whose pattern is exactly one of the default patterns.
async fn remove_default_email_lists(conn: &Connection) -> Result<(), DatabaseError> {
    for regex in DEFAULT_EMAIL_LIST_REGEXES {
        conn.execute(
            "DELETE FROM email_lists WHERE regex = ?1",
            libsql::params![*regex],
        )
        .await?;
    }
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
pub async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
