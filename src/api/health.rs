//! Liveness endpoint (spec.md §1 ambient stack; grounded on the teacher's
//! `endpoints::health_check`).

use rocket::serde::json::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

#[rocket::get("/health")]
pub async fn health_check() -> Json<HealthResponse> {
    log::debug!("health check endpoint called");
    Json(HealthResponse { status: "ok" })
}
