//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.
//!
//! Middleware stack (outermost → innermost):
//! CORS → security headers → Auth validator → Audit logger

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    let cors = cors_layer(core.config.cors_origin.as_deref());
    build_router(ApiContext::new(core))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(cors)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
    match origin {
        None => layer.allow_origin(Any),
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => layer.allow_origin(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring unparseable CORS origin; cross-origin requests disabled");
                layer
            }
        },
    }
}

fn build_router(ctx: ApiContext) -> Router {
    // Protected routes: require auth + audit.
    //
    // Layers are applied from bottom (innermost) to top (outermost):
    //   Extension (outermost) → Auth → Audit (innermost) → Handler
    //
    // Static segments (`/me`, `/stats`) take priority over `:id`.
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let protected = Router::new()
        .route("/auth/me", get(endpoints::auth::me))
        .route("/auth/logout", post(endpoints::auth::logout))
        .route(
            "/appointments",
            get(endpoints::appointments::list).post(endpoints::appointments::create),
        )
        .route("/appointments/stats", get(endpoints::appointments::stats))
        .route(
            "/appointments/:id",
            get(endpoints::appointments::detail)
                .put(endpoints::appointments::update)
                .delete(endpoints::appointments::remove),
        )
        .route(
            "/medical-records",
            get(endpoints::medical_records::list).post(endpoints::medical_records::create),
        )
        .route(
            "/medical-records/:id",
            get(endpoints::medical_records::detail)
                .put(endpoints::medical_records::update)
                .delete(endpoints::medical_records::remove),
        )
        .route(
            "/patients",
            get(endpoints::patients::list).post(endpoints::patients::create),
        )
        .route(
            "/patients/me",
            get(endpoints::patients::me).put(endpoints::patients::update_me),
        )
        .route(
            "/patients/:id",
            get(endpoints::patients::detail)
                .put(endpoints::patients::update)
                .delete(endpoints::patients::remove),
        )
        .route(
            "/doctors",
            get(endpoints::doctors::list).post(endpoints::doctors::create),
        )
        .route(
            "/doctors/:id",
            get(endpoints::doctors::detail)
                .put(endpoints::doctors::update)
                .delete(endpoints::doctors::remove),
        )
        .route(
            "/users",
            get(endpoints::users::list).post(endpoints::users::create),
        )
        .route("/users/:id/status", put(endpoints::users::set_status))
        .route("/users/:id", axum::routing::delete(endpoints::users::remove))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        // Extension must be outermost so middleware can extract ApiContext
        .layer(axum::Extension(ctx.clone()));

    // Unprotected routes
    let unprotected = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/auth/register", post(endpoints::auth::register))
        .route("/auth/login", post(endpoints::auth::login))
        .with_state(ctx.clone())
        .layer(axum::Extension(ctx));

    Router::new()
        .nest("/api", protected)
        .nest("/api", unprotected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::AppConfig;

    const ADMIN_EMAIL: &str = "admin@hospital.test";
    const ADMIN_PASSWORD: &str = "admin-password";

    struct TestApp {
        _dir: tempfile::TempDir,
        core: Arc<CoreState>,
        app: Router,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let core = Arc::new(CoreState::new(AppConfig::with_db_path(dir.path().join("hospital.db"))));
            core.connect().unwrap();
            let conn = core.open_db().unwrap();
            crate::auth::bootstrap_admin(&conn, ADMIN_EMAIL, ADMIN_PASSWORD).unwrap();
            let app = api_router(core.clone());
            Self { _dir: dir, core, app }
        }

        async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(t) = token {
                builder = builder.header("Authorization", format!("Bearer {t}"));
            }
            let req = match body {
                Some(json) => builder
                    .header("Content-Type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.app.clone().oneshot(req).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, json)
        }

        async fn login(&self, email: &str, password: &str) -> String {
            let (status, body) = self
                .send("POST", "/api/auth/login", None, Some(json!({"email": email, "password": password})))
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            body["token"].as_str().unwrap().to_string()
        }

        async fn admin_token(&self) -> String {
            self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await
        }

        async fn register_patient(&self, email: &str) -> (String, String) {
            let (status, body) = self
                .send(
                    "POST",
                    "/api/auth/register",
                    None,
                    Some(json!({"name": "Pat Doe", "email": email, "password": "patient-pass"})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            (
                body["token"].as_str().unwrap().to_string(),
                body["user"]["id"].as_str().unwrap().to_string(),
            )
        }

        async fn create_doctor(&self, admin: &str, email: &str) -> String {
            let (status, body) = self
                .send(
                    "POST",
                    "/api/doctors",
                    Some(admin),
                    Some(json!({
                        "name": "Dr. House",
                        "email": email,
                        "specialization": "Diagnostics",
                        "consultationFee": 120.0
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
            body["id"].as_str().unwrap().to_string()
        }

        async fn book(&self, token: &str, doctor: &str, at: &str) -> (StatusCode, Value) {
            self.send(
                "POST",
                "/api/appointments",
                Some(token),
                Some(json!({"doctor": doctor, "dateTime": at, "reason": "Headache"})),
            )
            .await
        }
    }

    #[tokio::test]
    async fn health_is_public_and_reports_store() {
        let t = TestApp::new();
        let (status, body) = t.send("GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"]["state"], "ready");

        t.core.disconnect().unwrap();
        let (status, body) = t.send("GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["store"]["state"], "disconnected");
    }

    #[tokio::test]
    async fn protected_routes_require_token() {
        let t = TestApp::new();
        let (status, body) = t.send("GET", "/api/appointments", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "AUTH_REQUIRED");

        let (status, _) = t.send("GET", "/api/appointments", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_token_is_reported() {
        let t = TestApp::new();
        let (_, user_id) = t.register_patient("late@example.com").await;
        let conn = t.core.open_db().unwrap();
        let past = chrono::Utc::now() - chrono::Duration::hours(2);
        crate::db::insert_session(
            &conn,
            &crate::auth::hash_token("stale-token"),
            &crate::db::SessionRecord {
                user_id: user_id.parse().unwrap(),
                created_at: past,
                expires_at: past + chrono::Duration::hours(1),
            },
        )
        .unwrap();

        let (status, body) = t.send("GET", "/api/auth/me", Some("stale-token"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn authenticated_responses_are_not_cached() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let req = Request::builder()
            .uri("/api/auth/me")
            .header("Authorization", format!("Bearer {admin}"))
            .body(Body::empty())
            .unwrap();
        let response = t.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
        assert_eq!(response.headers().get("X-Content-Type-Options").unwrap(), "nosniff");
    }

    #[tokio::test]
    async fn register_as_admin_is_forbidden() {
        let t = TestApp::new();
        let (status, _) = t
            .send(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"name": "Eve", "email": "eve@example.com", "password": "sneaky-pass", "role": "admin"})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let (status, body) = t
            .send("POST", "/api/appointments", Some(&admin), Some(json!({"duration": "long"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn patient_self_booking_and_profile_completion() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let doctor = t.create_doctor(&admin, "house@example.com").await;
        let (patient, _) = t.register_patient("pat@example.com").await;

        let (status, _) = t.send("GET", "/api/patients/me", Some(&patient), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = t.book(&patient, &doctor, "2030-03-04T09:00:00Z").await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["status"], "booked");
        assert_eq!(body["duration"], 30);
        assert_eq!(body["amount"], 120.0);

        let (status, me) = t.send("GET", "/api/patients/me", Some(&patient), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["profileComplete"], false);
        assert_eq!(me["phone"], "0000000000");
        assert_eq!(body["patientId"], me["id"]);

        let (status, me) = t
            .send(
                "PUT",
                "/api/patients/me",
                Some(&patient),
                Some(json!({"phone": "555-0101", "address": "9 Elm St"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["profileComplete"], true);
        assert_eq!(me["address"], "9 Elm St");
    }

    #[tokio::test]
    async fn patient_email_claimed_by_another_account_is_refused() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let doctor = t.create_doctor(&admin, "house@example.com").await;
        let (_, owner_id) = t.register_patient("owner@example.com").await;
        let (status, patient) = t
            .send(
                "POST",
                "/api/patients",
                Some(&admin),
                Some(json!({
                    "user": owner_id,
                    "name": "Olive Owner",
                    "email": "shared@example.com",
                    "phone": "555-0100",
                    "dateOfBirth": "1975-02-03",
                    "gender": "Female",
                    "address": "1 Main St",
                    "bloodGroup": "A+"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{patient}");
        let (status, _) = t
            .send(
                "POST",
                "/api/appointments",
                Some(&admin),
                Some(json!({
                    "doctor": doctor,
                    "patient": patient["id"],
                    "dateTime": "2030-03-04T09:00:00Z",
                    "reason": "Follow-up"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (intruder, _) = t.register_patient("shared@example.com").await;
        let (status, body) = t.send("GET", "/api/appointments", Some(&intruder), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["appointments"].as_array().unwrap().len(), 0);

        let (status, body) = t.book(&intruder, &doctor, "2030-03-05T09:00:00Z").await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
        assert_eq!(body["error"]["code"], "FORBIDDEN");

        let (status, _) = t
            .send("PUT", "/api/patients/me", Some(&intruder), Some(json!({"phone": "555-0111"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn overlapping_booking_is_a_conflict() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let doctor = t.create_doctor(&admin, "house@example.com").await;
        let (patient, _) = t.register_patient("pat@example.com").await;

        let (status, _) = t.book(&patient, &doctor, "2030-03-04T09:00:00Z").await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = t.book(&patient, &doctor, "2030-03-04T09:15:00Z").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "APPOINTMENT_CONFLICT");
        assert_eq!(body["message"], "Doctor already has an appointment at this time");

        let (status, _) = t.book(&patient, &doctor, "2030-03-04T09:30:00Z").await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn unknown_doctor_is_bad_request() {
        let t = TestApp::new();
        let (patient, _) = t.register_patient("pat@example.com").await;
        let (status, body) = t.book(&patient, &uuid::Uuid::new_v4().to_string(), "2030-03-04T09:00:00Z").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Doctor not found");
    }

    #[tokio::test]
    async fn patients_only_see_their_own_appointments() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let doctor = t.create_doctor(&admin, "house@example.com").await;
        let (alice, _) = t.register_patient("alice@example.com").await;
        let (bob, _) = t.register_patient("bob@example.com").await;

        let (_, booked) = t.book(&alice, &doctor, "2030-03-04T09:00:00Z").await;
        t.book(&bob, &doctor, "2030-03-04T10:00:00Z").await;

        let (status, body) = t.send("GET", "/api/appointments", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["appointments"][0]["id"], booked["id"]);
        assert_eq!(body["appointments"][0]["doctorName"], "Dr. House");

        let (_, all) = t.send("GET", "/api/appointments", Some(&admin), None).await;
        assert_eq!(all["pagination"]["total"], 2);

        let uri = format!("/api/appointments/{}", booked["id"].as_str().unwrap());
        let (status, _) = t.send("GET", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, stats) = t.send("GET", "/api/appointments/stats", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total"], 1);
    }

    #[tokio::test]
    async fn medical_record_access_is_scoped() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let doctor = t.create_doctor(&admin, "house@example.com").await;
        let (alice, _) = t.register_patient("alice@example.com").await;
        let (bob, _) = t.register_patient("bob@example.com").await;
        let (_, booked) = t.book(&alice, &doctor, "2030-03-04T09:00:00Z").await;
        t.book(&bob, &doctor, "2030-03-04T10:00:00Z").await;

        let (status, record) = t
            .send(
                "POST",
                "/api/medical-records",
                Some(&admin),
                Some(json!({
                    "patientId": booked["patientId"],
                    "doctorId": doctor,
                    "visitDate": "2030-03-04",
                    "diagnosis": "Tension headache"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{record}");

        let uri = format!("/api/medical-records/{}", record["id"].as_str().unwrap());
        let (status, _) = t.send("GET", &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = t.send("GET", &uri, Some(&bob), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let missing = format!("/api/medical-records/{}", uuid::Uuid::new_v4());
        let (status, _) = t.send("GET", &missing, Some(&alice), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, list) = t.send("GET", "/api/medical-records", Some(&bob), None).await;
        assert_eq!(list["pagination"]["total"], 0);

        let (status, _) = t
            .send("POST", "/api/medical-records", Some(&alice), Some(json!({"diagnosis": "Self-diagnosed"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn deleting_user_with_history_is_refused_but_deactivation_works() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let doctor = t.create_doctor(&admin, "house@example.com").await;
        let (patient, user_id) = t.register_patient("pat@example.com").await;
        t.book(&patient, &doctor, "2030-03-04T09:00:00Z").await;

        let uri = format!("/api/users/{user_id}");
        let (status, body) = t.send("DELETE", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["hasAssociatedData"], true);

        let (status, body) = t
            .send("PUT", &format!("{uri}/status"), Some(&admin), Some(json!({"isActive": false})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isActive"], false);

        let (status, _) = t.send("GET", "/api/auth/me", Some(&patient), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) = t
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({"email": "pat@example.com", "password": "patient-pass"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "ACCOUNT_DISABLED");
    }

    #[tokio::test]
    async fn user_administration_is_admin_only() {
        let t = TestApp::new();
        let (patient, _) = t.register_patient("pat@example.com").await;
        let (status, _) = t.send("GET", "/api/users", Some(&patient), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = t.admin_token().await;
        let (status, body) = t.send("GET", "/api/users?role=patient", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 1);
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let t = TestApp::new();
        let (patient, _) = t.register_patient("pat@example.com").await;
        let (status, _) = t.send("POST", "/api/auth/logout", Some(&patient), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = t.send("GET", "/api/auth/me", Some(&patient), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_path_id_is_bad_request() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        let (status, body) = t.send("GET", "/api/appointments/not-an-id", Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid ID format");
    }

    #[tokio::test]
    async fn not_found_for_unknown_route() {
        let t = TestApp::new();
        let (status, _) = t.send("GET", "/api/nonexistent", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_outage_returns_503() {
        let t = TestApp::new();
        let admin = t.admin_token().await;
        t.core.disconnect().unwrap();
        let (status, body) = t.send("GET", "/api/appointments", Some(&admin), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "STORE_UNAVAILABLE");
    }
}
