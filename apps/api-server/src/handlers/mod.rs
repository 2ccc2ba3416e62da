//! HTTP handlers and route configuration.

mod admin;
mod fleet;
mod health;
mod rate_limits;

use actix_web::web;
use fleetgate_core::PolicyPreset;

use crate::middleware::rate_limit::RateLimitGate;
use crate::state::AppState;

pub const TELEMETRY_CAPTURE: &str = "/api/telemetry/capture";
pub const TELEMETRY_BATCH: &str = "/api/telemetry/batch";
pub const VEHICLE_ALERTS: &str = "/api/vehicles/{vin}/alerts";

/// A route template guarded by a preset.
#[derive(Debug, Clone, Copy)]
pub struct GatedRoute {
    pub path: &'static str,
    pub preset: PolicyPreset,
}

/// Every rate-limited route. The monitor reads windows with these policies.
pub const GATED_ROUTES: [GatedRoute; 3] = [
    GatedRoute {
        path: TELEMETRY_CAPTURE,
        preset: PolicyPreset::Telemetry,
    },
    GatedRoute {
        path: TELEMETRY_BATCH,
        preset: PolicyPreset::Batch,
    },
    GatedRoute {
        path: VEHICLE_ALERTS,
        preset: PolicyPreset::General,
    },
];

fn gate(state: &AppState, preset: PolicyPreset) -> RateLimitGate {
    RateLimitGate::new(state.limiters.get(preset).clone())
}

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &AppState) {
    // Gated routes
    cfg.service(
        web::resource(TELEMETRY_CAPTURE)
            .wrap(gate(state, PolicyPreset::Telemetry))
            .route(web::post().to(fleet::capture)),
    )
    .service(
        web::resource(TELEMETRY_BATCH)
            .wrap(gate(state, PolicyPreset::Batch))
            .route(web::post().to(fleet::batch)),
    )
    .service(
        web::resource(VEHICLE_ALERTS)
            .wrap(gate(state, PolicyPreset::General))
            .route(web::get().to(fleet::alerts)),
    );

    cfg.service(
        web::scope("/api")
            // Public routes
            .route("/health", web::get().to(health::health_check))
            // Caller's own windows
            .route("/rate-limits/status", web::get().to(rate_limits::my_status))
            // Admin routes
            .service(
                web::scope("/admin/rate-limits")
                    .route("/global", web::get().to(admin::global_stats))
                    .route("/top", web::get().to(admin::top_subjects))
                    .route("/purge", web::post().to(admin::purge))
                    .route("/subjects/{subject}", web::get().to(admin::subject_stats))
                    .route("/subjects/{subject}/reset", web::post().to(admin::reset)),
            ),
    );
}
