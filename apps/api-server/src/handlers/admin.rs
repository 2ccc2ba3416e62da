//! Rate limit administration handlers.
//!
//! Mounted under `/api/admin/rate-limits`. Access control is the job of the
//! upstream identity layer.

use actix_web::{HttpResponse, web};
use fleetgate_core::domain::SubjectId;
use fleetgate_shared::ApiResponse;
use fleetgate_shared::dto::{PurgeRequest, PurgeResponse, ResetRequest, StatsQuery, TopQuery};

use crate::middleware::error::AppResult;
use crate::state::AppState;

/// Upper bound on `top?limit=`.
const MAX_TOP_SUBJECTS: usize = 100;

/// GET /api/admin/rate-limits/subjects/{subject}?resource=
pub async fn subject_stats(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<StatsQuery>,
) -> AppResult<HttpResponse> {
    let subject = SubjectId::parse(path.into_inner())?;
    let stats = state
        .monitor
        .subject_stats(&subject, query.resource.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(stats)))
}

/// GET /api/admin/rate-limits/global
pub async fn global_stats(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let stats = state.monitor.global_stats().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(stats)))
}

/// GET /api/admin/rate-limits/top?limit=
pub async fn top_subjects(
    state: web::Data<AppState>,
    query: web::Query<TopQuery>,
) -> AppResult<HttpResponse> {
    let limit = query.limit.clamp(1, MAX_TOP_SUBJECTS);
    let top = state.monitor.top_subjects(limit).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(top)))
}

/// POST /api/admin/rate-limits/subjects/{subject}/reset
///
/// Body is optional; without a `resource` every window of the subject is
/// cleared.
pub async fn reset(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<ResetRequest>>,
) -> AppResult<HttpResponse> {
    let subject = SubjectId::parse(path.into_inner())?;
    let request = body.map(web::Json::into_inner).unwrap_or_default();

    let outcome = state
        .admin
        .reset(&subject, request.resource.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok_with_message(
        outcome,
        "Rate limit reset successfully",
    )))
}

/// POST /api/admin/rate-limits/purge
pub async fn purge(
    state: web::Data<AppState>,
    body: web::Json<PurgeRequest>,
) -> AppResult<HttpResponse> {
    let PurgeRequest { pattern } = body.into_inner();
    let windows_cleared = state.admin.purge(&pattern).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(PurgeResponse {
        pattern,
        windows_cleared,
    })))
}
