//! Fleet endpoints guarded by the rate limit gate.
//!
//! Payload processing is out of scope for the gateway; these acknowledge
//! what they receive so the gate can be exercised end to end.

use actix_web::{HttpResponse, web};
use serde::Serialize;
use serde_json::Value;

use crate::middleware::error::{AppError, AppResult};
use crate::middleware::subject::Subject;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub vehicle: String,
    pub accepted: usize,
}

/// POST /api/telemetry/capture
pub async fn capture(subject: Subject, body: web::Json<Value>) -> AppResult<HttpResponse> {
    if !body.is_object() {
        return Err(AppError::BadRequest(
            "Telemetry payload must be a JSON object".to_string(),
        ));
    }

    tracing::debug!(vehicle = %subject.0, "Telemetry captured");
    Ok(HttpResponse::Accepted().json(Accepted {
        vehicle: subject.0.to_string(),
        accepted: 1,
    }))
}

/// POST /api/telemetry/batch
pub async fn batch(subject: Subject, body: web::Json<Vec<Value>>) -> AppResult<HttpResponse> {
    let records = body.into_inner();
    if records.is_empty() {
        return Err(AppError::BadRequest("Telemetry batch is empty".to_string()));
    }

    tracing::debug!(vehicle = %subject.0, records = records.len(), "Telemetry batch captured");
    Ok(HttpResponse::Accepted().json(Accepted {
        vehicle: subject.0.to_string(),
        accepted: records.len(),
    }))
}

/// GET /api/vehicles/{vin}/alerts
pub async fn alerts(path: web::Path<String>) -> HttpResponse {
    let vin = path.into_inner();
    HttpResponse::Ok().json(serde_json::json!({ "vin": vin, "alerts": [] }))
}
