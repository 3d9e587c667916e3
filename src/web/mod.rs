//! HTTP surface: axum router, shared state, and page handlers.

pub mod accounts;
pub mod auth;
pub mod dbmail_routes;
pub mod params;
pub mod survey_routes;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tera::Tera;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::dbmail::{Mailer, PreviewService};
use crate::store::Database;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub preview: PreviewService,
    pub templates: Arc<Tera>,
    pub session_ttl: Duration,
}

impl AppState {
    pub fn new(
        db: Arc<dyn Database>,
        mailer: Arc<dyn Mailer>,
        config: &AppConfig,
    ) -> Result<Self, tera::Error> {
        Ok(Self {
            preview: PreviewService::new(Arc::clone(&db), mailer, config.default_from.clone()),
            db,
            templates: Arc::new(templates::load()?),
            session_ttl: config.session_ttl,
        })
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(accounts::account_routes())
        .merge(dbmail_routes::dbmail_routes())
        .merge(survey_routes::survey_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "esp-site"
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::dbmail::MemoryOutbox;
    use crate::dbmail::model::NewMessageRequest;
    use crate::store::LibSqlBackend;
    use crate::users::password::hash_password;
    use crate::users::{NewUser, User, UserQuery};

    struct Harness {
        app: Router,
        db: Arc<dyn Database>,
        outbox: MemoryOutbox,
        admin: User,
        session: Uuid,
    }

    async fn harness() -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let outbox = MemoryOutbox::new();
        let state = AppState::new(
            Arc::clone(&db),
            Arc::new(outbox.clone()),
            &AppConfig::default(),
        )
        .unwrap();

        let admin = db
            .create_user(
                &NewUser::new("testadmin", "admin@example.com")
                    .with_name("Admin", "User")
                    .staff()
                    .with_password_hash(hash_password("password").unwrap()),
            )
            .await
            .unwrap();
        let session = db
            .create_session(admin.id, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        Harness {
            app: app(state),
            db,
            outbox,
            admin,
            session,
        }
    }

    async fn message_request(h: &Harness, usernames: &[&str]) -> i64 {
        let filter = h
            .db
            .create_recipient_filter(
                "test recipients",
                &UserQuery::Usernames {
                    usernames: usernames.iter().map(|s| s.to_string()).collect(),
                },
            )
            .await
            .unwrap();
        h.db.create_message_request(&NewMessageRequest {
            subject: "Welcome {{user.first_name}}!".into(),
            msgtext: "Hello {{user.first_name}} {{user.last_name}}, welcome to our program.".into(),
            sender: Some("noreply@example.com".into()),
            creator_id: Some(h.admin.id),
            recipients_id: filter.id,
            ..Default::default()
        })
        .await
        .unwrap()
        .id
    }

    fn get(uri: &str, session: Option<Uuid>) -> Request<Body> {
        request("GET", uri, session)
    }

    fn request(method: &str, uri: &str, session: Option<Uuid>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = session {
            builder = builder.header(header::COOKIE, format!("sessionid={token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn location(response: &axum::response::Response) -> &str {
        response.headers()[header::LOCATION].to_str().unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let h = harness().await;
        let response = h.app.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"ok\""));
    }

    #[tokio::test]
    async fn preview_requires_login() {
        let h = harness().await;
        let response = h.app.oneshot(get("/dbmail/preview/1/", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            location(&response),
            "/accounts/login/?next=%2Fdbmail%2Fpreview%2F1%2F"
        );
    }

    #[tokio::test]
    async fn expired_or_unknown_session_redirects() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(get("/dbmail/preview/1/", Some(Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).starts_with("/accounts/login/"));
    }

    #[tokio::test]
    async fn preview_renders_for_first_recipient() {
        let h = harness().await;
        h.db.create_user(&NewUser::new("recipient", "recipient@example.com").with_name("John", "Doe"))
            .await
            .unwrap();
        let id = message_request(&h, &["recipient"]).await;

        let uri = format!("/dbmail/preview/{id}/");
        let response = h.app.oneshot(get(&uri, Some(h.session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains("Welcome John!"));
        assert!(html.contains("Hello John Doe"));
        assert!(html.contains("noreply@example.com"));
        assert!(html.contains("1 recipient<"));
        assert!(html.contains("recipient@example.com"));
    }

    #[tokio::test]
    async fn preview_counts_multiple_recipients() {
        let h = harness().await;
        for (username, first) in [("alice", "Alice"), ("bob", "Bob")] {
            h.db.create_user(
                &NewUser::new(username, format!("{username}@example.com")).with_name(first, "Smith"),
            )
            .await
            .unwrap();
        }
        let id = message_request(&h, &["alice", "bob"]).await;

        let uri = format!("/dbmail/preview/{id}/");
        let html = body_text(h.app.oneshot(get(&uri, Some(h.session))).await.unwrap()).await;
        assert!(html.contains("2 recipients"));
        assert!(html.contains("Welcome Alice!"));
    }

    #[tokio::test]
    async fn preview_of_missing_request_is_404() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(get("/dbmail/preview/99999/", Some(h.session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_numeric_ids_are_404() {
        let h = harness().await;
        for (method, uri) in [
            ("GET", "/dbmail/preview/abc/"),
            ("POST", "/dbmail/send_test/abc/"),
            ("GET", "/survey/x/top_classes"),
        ] {
            let response = h
                .app
                .clone()
                .oneshot(request(method, uri, Some(h.session)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method} {uri}");
        }
        assert!(h.outbox.messages().is_empty());
    }

    #[tokio::test]
    async fn send_test_rejects_get_without_sending() {
        let h = harness().await;
        let id = message_request(&h, &[]).await;

        let uri = format!("/dbmail/send_test/{id}/");
        let response = h.app.clone().oneshot(get(&uri, Some(h.session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), format!("/dbmail/preview/{id}/"));
        assert!(h.outbox.messages().is_empty());

        let notices = h.db.take_session_messages(h.session).await.unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].text, "Invalid request method.");
    }

    #[tokio::test]
    async fn send_test_mails_only_the_caller() {
        let h = harness().await;
        h.db.create_user(&NewUser::new("recipient", "recipient@example.com").with_name("John", "Doe"))
            .await
            .unwrap();
        let id = message_request(&h, &["recipient"]).await;

        let uri = format!("/dbmail/send_test/{id}/");
        let response = h
            .app
            .clone()
            .oneshot(request("POST", &uri, Some(h.session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), format!("/dbmail/preview/{id}/"));

        let sent = h.outbox.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["admin@example.com"]);
        assert_eq!(sent[0].subject, "Welcome Admin!");

        // The notice shows once on the next preview.
        let preview = format!("/dbmail/preview/{id}/");
        let html = body_text(
            h.app
                .clone()
                .oneshot(get(&preview, Some(h.session)))
                .await
                .unwrap(),
        )
        .await;
        assert!(html.contains("Test email sent successfully to admin@example.com"));
        let html = body_text(h.app.oneshot(get(&preview, Some(h.session))).await.unwrap()).await;
        assert!(!html.contains("Test email sent successfully"));
    }

    #[tokio::test]
    async fn send_test_of_missing_request_is_404() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(request("POST", "/dbmail/send_test/99999/", Some(h.session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(h.outbox.messages().is_empty());
    }

    #[tokio::test]
    async fn login_sets_session_cookie() {
        let h = harness().await;
        let form = "username=testadmin&password=password&next=%2Fdbmail%2Fpreview%2F1%2F";
        let response = h
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/accounts/login/")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(form))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/dbmail/preview/1/");

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        let token = cookie
            .strip_prefix("sessionid=")
            .and_then(|rest| rest.split(';').next())
            .unwrap();
        let user = h
            .db
            .get_session_user(Uuid::parse_str(token).unwrap())
            .await
            .unwrap();
        assert_eq!(user.map(|u| u.username), Some("testadmin".to_string()));
    }

    #[tokio::test]
    async fn login_ignores_offsite_next() {
        let h = harness().await;
        let form = "username=testadmin&password=password&next=%2F%5Cevil.example.com";
        let response = h
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/accounts/login/")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(form))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn login_with_wrong_password_shows_form_again() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/accounts/login/")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("username=testadmin&password=wrong"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert!(body_text(response).await.contains("Please enter a correct username"));
    }

    #[tokio::test]
    async fn logout_ends_session() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(request("POST", "/accounts/logout/", Some(h.session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(h.db.get_session_user(h.session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn route_lookup_returns_recipients() {
        let h = harness().await;
        h.db.create_plain_redirect("directors", "dir1@example.com, testadmin")
            .await
            .unwrap();

        let response = h
            .app
            .oneshot(get("/dbmail/route/directors@esp.mit.edu", Some(h.session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["handler"], "PlainList");
        assert_eq!(
            json["recipients"],
            serde_json::json!(["dir1@example.com", "admin@example.com"])
        );
    }

    #[tokio::test]
    async fn route_lookup_misses_are_404() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(get("/dbmail/route/nobody-here", Some(h.session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn top_classes_of_missing_survey_is_404() {
        let h = harness().await;
        let response = h
            .app
            .oneshot(get("/survey/77/top_classes?limit=5", Some(h.session)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
