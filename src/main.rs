use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use esp_site::config::{AppConfig, MailBackend};
use esp_site::dbmail::{LogMailer, Mailer, SmtpMailer};
use esp_site::store::{Database, LibSqlBackend};
use esp_site::users::NewUser;
use esp_site::users::password::hash_password;
use esp_site::web::{AppState, app};

#[derive(Debug, Parser)]
#[command(name = "esp-site", version, about = "ESP web site server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Apply pending migrations and exit.
    Migrate,
    /// Reverse migrations down to `--to`.
    Rollback {
        #[arg(long)]
        to: i64,
    },
    /// Create a login account.
    CreateUser {
        username: String,
        email: String,
        #[arg(long, env = "ESP_NEW_USER_PASSWORD")]
        password: String,
        #[arg(long, default_value = "")]
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
        #[arg(long)]
        staff: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Opening the database applies pending migrations.
    let db = LibSqlBackend::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(Arc::new(db), &config).await,
        Command::Migrate => {
            let version = db.migration_version().await?;
            tracing::info!(version, db = %config.db_path.display(), "Database is up to date");
            Ok(())
        }
        Command::Rollback { to } => {
            db.rollback_to(to).await?;
            let version = db.migration_version().await?;
            tracing::info!(version, "Rolled back");
            Ok(())
        }
        Command::CreateUser {
            username,
            email,
            password,
            first_name,
            last_name,
            staff,
        } => {
            let mut new_user = NewUser::new(username, email)
                .with_name(first_name, last_name)
                .with_password_hash(hash_password(&password)?);
            if staff {
                new_user = new_user.staff();
            }
            let user = db.create_user(&new_user).await?;
            tracing::info!(user_id = user.id, username = %user.username, "User created");
            Ok(())
        }
    }
}

fn build_mailer(config: &AppConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match (config.mail_backend, &config.smtp) {
        (MailBackend::Smtp, Some(smtp)) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "Mail via SMTP");
            Ok(Arc::new(SmtpMailer::new(smtp)?))
        }
        (MailBackend::Smtp, None) => anyhow::bail!("SMTP mail backend selected without SMTP settings"),
        (MailBackend::Log, _) => {
            tracing::info!("Mail is logged, not sent");
            Ok(Arc::new(LogMailer))
        }
    }
}

async fn serve(db: Arc<dyn Database>, config: &AppConfig) -> anyhow::Result<()> {
    let mailer = build_mailer(config)?;
    let state = AppState::new(db, mailer, config).context("Failed to load templates")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "ESP web site listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
