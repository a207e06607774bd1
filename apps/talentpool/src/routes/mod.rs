pub mod applications;
pub mod auth;
pub mod candidates;
pub mod cv;
pub mod health;
pub mod jobs;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};

use crate::access::Capability;
use crate::state::AppState;

use self::middleware::gated;

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health_handler))
        .route("/session", get(auth::handle_session))
        .route("/auth/sign-up", post(auth::handle_sign_up))
        .route("/auth/sign-in", post(auth::handle_sign_in))
        .route("/auth/sign-out", post(auth::handle_sign_out))
        .route("/jobs", get(jobs::handle_list_jobs))
        .route("/jobs/:id", get(jobs::handle_get_job));

    let profile = Router::new().route("/profile", patch(auth::handle_update_profile));

    let posting = Router::new().route("/jobs", post(jobs::handle_create_job));

    let own_jobs = Router::new()
        .route("/jobs/mine", get(jobs::handle_my_jobs))
        .route(
            "/jobs/:id",
            patch(jobs::handle_update_job).delete(jobs::handle_delete_job),
        );

    let applying = Router::new()
        .route("/jobs/:id/apply", post(jobs::handle_apply))
        .route("/jobs/:id/applied", get(jobs::handle_applied));

    let tracking = Router::new().route(
        "/applications/mine",
        get(applications::handle_my_applications),
    );

    let reviewing = Router::new()
        .route(
            "/applications/received",
            get(applications::handle_received_applications),
        )
        .route(
            "/applications/:id/status",
            patch(applications::handle_update_status),
        );

    let cv = Router::new()
        .route(
            "/cv",
            get(cv::handle_get_cv)
                .put(cv::handle_upload_cv)
                .delete(cv::handle_delete_cv),
        )
        .layer(DefaultBodyLimit::max(cv::MAX_CV_BYTES));

    let candidates = Router::new().route("/candidates/:id", get(candidates::handle_get_candidate));

    let api = public
        .merge(gated(profile, &state, Capability::EditOwnProfile))
        .merge(gated(posting, &state, Capability::PostJobs))
        .merge(gated(own_jobs, &state, Capability::ManageOwnJobs))
        .merge(gated(applying, &state, Capability::ApplyToJobs))
        .merge(gated(tracking, &state, Capability::TrackOwnApplications))
        .merge(gated(reviewing, &state, Capability::ReviewApplications))
        .merge(gated(cv, &state, Capability::ManageOwnCv))
        .merge(gated(candidates, &state, Capability::ViewCandidates));

    Router::new().nest("/api/v1", api).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::backend::seed::demo_server;
    use crate::backend::MemoryServer;
    use crate::config::{BackendTarget, Config};
    use crate::models::application::APPLICATIONS_TABLE;
    use crate::models::job::JOBS_TABLE;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const RECRUITER: &str = "john.smith@innovate.example";
    const CANDIDATE: &str = "jane.doe@example.com";
    const PASSWORD: &str = "talentpool";

    fn test_config() -> Config {
        Config {
            backend: BackendTarget::Offline,
            cv_bucket: "cvs".to_string(),
            http_timeout_secs: 5,
            port: 0,
            rust_log: "debug".to_string(),
        }
    }

    async fn app() -> (Router, Arc<MemoryServer>) {
        let server = demo_server().await.unwrap();
        let auth = AuthContext::init(Arc::new(server.connect())).await;
        (build_router(AppState::new(test_config(), auth)), server)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn sign_in(app: &Router, email: &str) -> Value {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/auth/sign-in",
            Some(json!({ "email": email, "password": PASSWORD })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app().await;
        let (status, body) = send(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "memory");
    }

    #[tokio::test]
    async fn test_anonymous_can_browse_but_not_apply() {
        let (app, _) = app().await;
        let (status, body) = send(&app, "GET", "/api/v1/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 5);

        let job_id = body["items"][0]["id"].as_str().unwrap().to_string();
        let (status, body) = send(&app, "GET", &format!("/api/v1/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], job_id);

        let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{job_id}/apply"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
        assert_eq!(body["error"]["message"], "User not authenticated");
    }

    #[tokio::test]
    async fn test_session_reflects_sign_in_and_sign_out() {
        let (app, _) = app().await;
        let (_, anonymous) = send(&app, "GET", "/api/v1/session", None).await;
        assert_eq!(anonymous["user"], Value::Null);
        assert_eq!(anonymous["capabilities"], json!(["browse_jobs"]));

        let view = sign_in(&app, CANDIDATE).await;
        assert_eq!(view["profile"]["role"], "candidate");
        assert_eq!(view["profile"]["name"], "Jane Doe");
        assert!(view["capabilities"]
            .as_array()
            .unwrap()
            .contains(&json!("apply_to_jobs")));
        assert!(view.get("access_token").is_none());

        let (status, view) = send(&app, "POST", "/api/v1/auth/sign-out", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["profile"], Value::Null);
    }

    #[tokio::test]
    async fn test_bad_credentials_and_weak_password() {
        let (app, _) = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/auth/sign-in",
            Some(json!({ "email": CANDIDATE, "password": "wrong-password" })),
        )
        .await;
        assert!(status.is_client_error());
        assert_eq!(body["error"]["message"], "Invalid login credentials");

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/auth/sign-up",
            Some(json!({ "email": "new@mail.io", "password": "123", "name": "New", "role": "candidate" })),
        )
        .await;
        assert!(status.is_client_error());
        assert_eq!(body["error"]["message"], "Password should be at least 6 characters.");
        let (_, session) = send(&app, "GET", "/api/v1/session", None).await;
        assert_eq!(session["user"], Value::Null);
    }

    #[tokio::test]
    async fn test_sign_up_provisions_recruiter_profile() {
        let (app, server) = app().await;
        let (status, view) = send(
            &app,
            "POST",
            "/api/v1/auth/sign-up",
            Some(json!({ "email": "mary@hire.io", "password": "secret1", "name": "Mary", "role": "recruiter" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{view}");
        assert_eq!(view["profile"]["role"], "recruiter");
        assert_eq!(server.table_rows("profiles").await.len(), 3);
    }

    #[tokio::test]
    async fn test_candidate_apply_flow() {
        let (app, server) = app().await;
        sign_in(&app, CANDIDATE).await;

        let (_, mine) = send(&app, "GET", "/api/v1/applications/mine", None).await;
        let applied: Vec<String> = mine["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["job_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(applied.len(), 2);

        let (_, jobs) = send(&app, "GET", "/api/v1/jobs", None).await;
        let open = jobs["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["id"].as_str().unwrap().to_string())
            .find(|id| !applied.contains(id))
            .unwrap();

        let (_, check) = send(&app, "GET", &format!("/api/v1/jobs/{open}/applied"), None).await;
        assert_eq!(check["applied"], false);

        let (status, created) = send(&app, "POST", &format!("/api/v1/jobs/{open}/apply"), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");

        let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{open}/apply"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["message"], "You have already applied to this job");
        assert_eq!(server.table_rows(APPLICATIONS_TABLE).await.len(), 3);

        let unknown = uuid::Uuid::new_v4();
        let (status, _) = send(&app, "POST", &format!("/api/v1/jobs/{unknown}/apply"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_candidate_cannot_post_or_review() {
        let (app, _) = app().await;
        sign_in(&app, CANDIDATE).await;
        let (status, body) = send(&app, "GET", "/api/v1/applications/received", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let (status, _) = send(&app, "GET", "/api/v1/jobs/mine", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_recruiter_manages_jobs_and_reviews() {
        let (app, server) = app().await;
        sign_in(&app, RECRUITER).await;

        let (status, created) = send(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({
                "title": "Platform Engineer",
                "company": "Innovate Inc.",
                "location": "Remote",
                "type": "Contract",
                "salary": "$90/hr",
                "description": "Keep the lights on.",
                "responsibilities": [],
                "qualifications": []
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        let job_id = created["id"].as_str().unwrap().to_string();

        let (status, updated) = send(
            &app,
            "PATCH",
            &format!("/api/v1/jobs/{job_id}"),
            Some(json!({ "salary": "$100/hr" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["salary"], "$100/hr");

        let (_, mine) = send(&app, "GET", "/api/v1/jobs/mine", None).await;
        assert_eq!(mine["items"].as_array().unwrap().len(), 6);

        let (status, _) = send(&app, "DELETE", &format!("/api/v1/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", &format!("/api/v1/jobs/{job_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(server.table_rows(JOBS_TABLE).await.len(), 5);

        let (_, received) = send(&app, "GET", "/api/v1/applications/received", None).await;
        let items = received["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["candidate"]["name"], "Jane Doe");
        let application_id = items[0]["id"].as_str().unwrap().to_string();
        let candidate_id = items[0]["candidate_id"].as_str().unwrap().to_string();

        for status_name in ["reviewed", "accepted"] {
            let (status, body) = send(
                &app,
                "PATCH",
                &format!("/api/v1/applications/{application_id}/status"),
                Some(json!({ "status": status_name })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], status_name);
        }

        let (status, detail) = send(&app, "GET", &format!("/api/v1/candidates/{candidate_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["profile"]["email"], CANDIDATE);
        assert_eq!(detail["cv"], Value::Null);
    }

    #[tokio::test]
    async fn test_profile_update_keeps_identity() {
        let (app, _) = app().await;
        let before = sign_in(&app, CANDIDATE).await;
        let (status, profile) = send(
            &app,
            "PATCH",
            "/api/v1/profile",
            Some(json!({ "headline": "Staff Engineer", "email": "evil@mail.io", "role": "recruiter" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["headline"], "Staff Engineer");
        assert_eq!(profile["email"], CANDIDATE);
        assert_eq!(profile["role"], "candidate");
        assert_eq!(profile["id"], before["profile"]["id"]);
    }

    #[tokio::test]
    async fn test_cv_upload_and_delete() {
        let (app, server) = app().await;
        let view = sign_in(&app, CANDIDATE).await;
        let user_id = view["user"]["id"].as_str().unwrap().to_string();

        let boundary = "talentpool-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"resume.pdf\"\r\nContent-Type: application/pdf\r\n\r\n%PDF-1.4 demo\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("PUT")
            .uri("/api/v1/cv")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (content_type, stored) = server
            .object("cvs", &format!("{user_id}/cv.pdf"))
            .await
            .unwrap();
        assert_eq!(content_type, "application/pdf");
        assert_eq!(&stored[..], b"%PDF-1.4 demo");

        let (_, cv) = send(&app, "GET", "/api/v1/cv", None).await;
        assert_eq!(cv["filename"], "resume.pdf");

        let (status, _) = send(&app, "DELETE", "/api/v1/cv", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, cv) = send(&app, "GET", "/api/v1/cv", None).await;
        assert_eq!(cv, Value::Null);
    }
}
