//! Audit logging middleware.
//!
//! Logs every protected request with user id, role, method, path and
//! response status. Runs innermost (after auth has injected the `Caller`).

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::authorization::Caller;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let caller = req.extensions().get::<Caller>().cloned();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    match caller {
        Some(caller) => tracing::info!(
            target: "audit",
            user_id = %caller.user_id,
            role = %caller.role,
            %method,
            path,
            status,
            "API access"
        ),
        None => tracing::info!(target: "audit", %method, path, status, "API access (anonymous)"),
    }

    response
}
