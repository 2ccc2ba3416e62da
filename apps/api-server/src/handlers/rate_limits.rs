//! Self-service rate limit status.

use actix_web::{HttpResponse, web};
use fleetgate_shared::ApiResponse;

use crate::middleware::error::AppResult;
use crate::middleware::subject::Subject;
use crate::state::AppState;

/// Windows of the calling subject on every gated route. Reading does not
/// consume quota.
///
/// GET /api/rate-limits/status
pub async fn my_status(state: web::Data<AppState>, subject: Subject) -> AppResult<HttpResponse> {
    let stats = state.monitor.subject_stats(&subject.0, None).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(stats)))
}
