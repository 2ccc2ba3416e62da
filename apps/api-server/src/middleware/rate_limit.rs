//! Sliding-window rate limiting middleware.

use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{self, HeaderMap, HeaderName, HeaderValue},
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;

use fleetgate_core::domain::{SubjectId, WindowSnapshot};
use fleetgate_core::{Decision, SlidingWindowLimiter};
use fleetgate_shared::{RateLimitDenial, SlidingWindowDetails};

use crate::middleware::error::AppError;

/// Resource name for requests that matched no route template.
pub const UNMATCHED_RESOURCE: &str = "unmatched";

/// Entries echoed back in a denial body.
const RECENT_REQUESTS: usize = 5;

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
const WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");
const WINDOW_START: HeaderName = HeaderName::from_static("x-ratelimit-window-start");
const REQUESTS_IN_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-requests-in-window");
const AVG_INTERVAL: HeaderName = HeaderName::from_static("x-ratelimit-avg-interval");

/// Rate limiting middleware factory.
///
/// Wrap individual resources so the matched route template is known when the
/// gate runs; it becomes the window's resource key.
pub struct RateLimitGate {
    limiter: SlidingWindowLimiter,
}

impl RateLimitGate {
    pub fn new(limiter: SlidingWindowLimiter) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitGateService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitGateService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitGateService<S> {
    service: Rc<S>,
    limiter: SlidingWindowLimiter,
}

impl<S, B> Service<ServiceRequest> for RateLimitGateService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = self.limiter.clone();
        let resource = req
            .match_pattern()
            .unwrap_or_else(|| UNMATCHED_RESOURCE.to_string());

        Box::pin(async move {
            let subject = req.extensions().get::<SubjectId>().cloned();
            let Some(subject) = subject else {
                tracing::debug!(resource = %resource, "Rejecting request without subject identity");
                let response = AppError::MissingIdentity.response_for(req.path());
                return Ok(reject(req, response));
            };

            let decision = match limiter.evaluate(&subject, &resource).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(subject = %subject, error = %e, "Subject cannot form a key");
                    let response = AppError::MissingIdentity.response_for(req.path());
                    return Ok(reject(req, response));
                }
            };

            if !decision.allowed {
                let response = denial_response(&decision, limiter.policy().message());
                return Ok(reject(req, response));
            }

            let mut res = service.call(req).await?;
            apply_headers(res.headers_mut(), &decision.snapshot);
            Ok(res.map_into_left_body())
        })
    }
}

fn reject<B>(req: ServiceRequest, response: HttpResponse) -> ServiceResponse<EitherBody<B>> {
    let (http_req, _payload) = req.into_parts();
    ServiceResponse::new(http_req, response).map_into_right_body()
}

fn denial_response(decision: &Decision, message: &str) -> HttpResponse {
    let snapshot = &decision.snapshot;
    let retry_after = decision.retry_after.unwrap_or(1);

    let body = RateLimitDenial::new(
        message,
        SlidingWindowDetails {
            current_count: snapshot.count,
            limit: snapshot.limit,
            window_ms: snapshot.window_ms,
            window_start: snapshot.window_start,
            reset_time: snapshot.reset_time,
            retry_after,
            recent_requests: snapshot.recent_requests(RECENT_REQUESTS).to_vec(),
        },
    );

    let mut response = HttpResponse::TooManyRequests()
        .insert_header((header::RETRY_AFTER, retry_after))
        .json(body);
    apply_headers(response.headers_mut(), snapshot);
    response
}

/// Attach the window metadata headers.
fn apply_headers(headers: &mut HeaderMap, snapshot: &WindowSnapshot) {
    headers.insert(LIMIT, HeaderValue::from(snapshot.limit));
    headers.insert(REMAINING, HeaderValue::from(snapshot.remaining));
    headers.insert(RESET, HeaderValue::from(ceil_secs(snapshot.reset_time)));
    headers.insert(WINDOW, HeaderValue::from(snapshot.window_ms / 1000));
    headers.insert(WINDOW_START, HeaderValue::from(snapshot.window_start.div_euclid(1000)));
    headers.insert(REQUESTS_IN_WINDOW, HeaderValue::from(snapshot.count));
    if let Some(avg) = snapshot.average_interval {
        headers.insert(AVG_INTERVAL, HeaderValue::from(avg.round() as i64));
    }
}

fn ceil_secs(millis: i64) -> i64 {
    (millis + 999).div_euclid(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::{App, http::StatusCode, test, web};
    use async_trait::async_trait;
    use fleetgate_core::domain::{CheckOutcome, RateLimitKey, WindowReading};
    use fleetgate_core::ports::{ManualClock, WindowStore};
    use fleetgate_core::{PolicyPreset, StoreError};
    use fleetgate_infra::InMemoryWindowStore;

    use crate::middleware::subject::SubjectResolver;

    const START: i64 = 1_700_000_000_000;

    fn limiter(
        preset: PolicyPreset,
    ) -> (Arc<ManualClock>, Arc<InMemoryWindowStore>, SlidingWindowLimiter) {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(InMemoryWindowStore::new(clock.clone()));
        let limiter = SlidingWindowLimiter::new(preset.policy(), store.clone(), clock.clone());
        (clock, store, limiter)
    }

    fn alerts_request(subject: &str) -> actix_web::test::TestRequest {
        test::TestRequest::post()
            .uri("/api/vehicles/1HGCM82633A004352/alerts")
            .insert_header(("X-Subject-Id", subject))
    }

    macro_rules! gated_app {
        ($gate:expr) => {
            test::init_service(
                App::new()
                    .wrap(SubjectResolver::new(HeaderName::from_static("x-subject-id")))
                    .service(
                        web::resource("/api/vehicles/{vin}/alerts")
                            .wrap($gate)
                            .route(web::post().to(HttpResponse::Ok)),
                    ),
            )
            .await
        };
    }

    fn header<'a>(
        resp: &'a ServiceResponse<impl actix_web::body::MessageBody>,
        name: &str,
    ) -> &'a str {
        resp.headers().get(name).unwrap().to_str().unwrap()
    }

    #[actix_web::test]
    async fn test_allowed_request_carries_window_headers() {
        let (clock, _store, limiter) = limiter(PolicyPreset::Telemetry);
        let app = gated_app!(RateLimitGate::new(limiter));

        test::call_service(&app, alerts_request("42").to_request()).await;
        clock.advance(Duration::from_millis(1_500));
        let resp = test::call_service(&app, alerts_request("42").to_request()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(header(&resp, "x-ratelimit-limit"), "5");
        assert_eq!(header(&resp, "x-ratelimit-remaining"), "3");
        assert_eq!(header(&resp, "x-ratelimit-requests-in-window"), "2");
        assert_eq!(header(&resp, "x-ratelimit-window"), "10");
        assert_eq!(header(&resp, "x-ratelimit-avg-interval"), "1500");
        // now = START + 1.5s
        assert_eq!(header(&resp, "x-ratelimit-reset"), "1700000012");
        assert_eq!(header(&resp, "x-ratelimit-window-start"), "1699999991");
    }

    #[actix_web::test]
    async fn test_single_entry_omits_average_interval() {
        let (_clock, _store, limiter) = limiter(PolicyPreset::Telemetry);
        let app = gated_app!(RateLimitGate::new(limiter));

        let resp = test::call_service(&app, alerts_request("42").to_request()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get("x-ratelimit-avg-interval").is_none());
    }

    #[actix_web::test]
    async fn test_denied_request_gets_429_with_diagnostics() {
        let (clock, _store, limiter) = limiter(PolicyPreset::Batch);
        let app = gated_app!(RateLimitGate::new(limiter));

        for _ in 0..2 {
            let resp = test::call_service(&app, alerts_request("42").to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK);
            clock.advance(Duration::from_millis(100));
        }

        let resp = test::call_service(&app, alerts_request("42").to_request()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        // ceil((START + 60_000 - (START + 200)) / 1000)
        assert_eq!(header(&resp, "retry-after"), "60");
        assert_eq!(header(&resp, "x-ratelimit-remaining"), "0");

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["rateLimitExceeded"], true);
        assert_eq!(
            body["error"],
            "Too many batch requests. Maximum 2 batch operations per minute allowed."
        );
        assert_eq!(body["slidingWindow"]["currentCount"], 2);
        assert_eq!(body["slidingWindow"]["limit"], 2);
        assert_eq!(body["slidingWindow"]["windowMs"], 60_000);
        assert_eq!(body["slidingWindow"]["retryAfter"], 60);
        assert_eq!(
            body["slidingWindow"]["recentRequests"],
            serde_json::json!([START, START + 100])
        );
    }

    #[actix_web::test]
    async fn test_missing_subject_is_rejected_without_store_access() {
        let (_clock, store, limiter) = limiter(PolicyPreset::Telemetry);
        let app = gated_app!(RateLimitGate::new(limiter));

        let req = test::TestRequest::post()
            .uri("/api/vehicles/1HGCM82633A004352/alerts")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(store.is_empty().await);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], 401);
        assert_eq!(body["instance"], "/api/vehicles/1HGCM82633A004352/alerts");
    }

    #[actix_web::test]
    async fn test_windows_are_keyed_by_route_template() {
        let (_clock, store, limiter) = limiter(PolicyPreset::Telemetry);
        let app = gated_app!(RateLimitGate::new(limiter));

        for vin in ["A1", "B2", "C3"] {
            let req = test::TestRequest::post()
                .uri(&format!("/api/vehicles/{}/alerts", vin))
                .insert_header(("X-Subject-Id", "42"))
                .to_request();
            test::call_service(&app, req).await;
        }

        assert_eq!(
            store.scan_keys("*").await.unwrap(),
            vec!["42:/api/vehicles/{vin}/alerts".to_string()]
        );
    }

    #[actix_web::test]
    async fn test_unrouted_requests_share_one_window() {
        let (_clock, store, limiter) = limiter(PolicyPreset::Telemetry);
        let app = test::init_service(
            App::new()
                .wrap(RateLimitGate::new(limiter))
                .wrap(SubjectResolver::new(HeaderName::from_static("x-subject-id")))
                .default_service(web::to(HttpResponse::NotFound)),
        )
        .await;

        for path in ["/nowhere", "/api/unknown/1"] {
            let req = test::TestRequest::get()
                .uri(path)
                .insert_header(("X-Subject-Id", "42"))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }

        assert_eq!(
            store.scan_keys("*").await.unwrap(),
            vec!["42:unmatched".to_string()]
        );
        let key = RateLimitKey::new(SubjectId::parse("42").unwrap(), UNMATCHED_RESOURCE).unwrap();
        assert_eq!(store.status(&key, Duration::from_secs(10)).await.unwrap().count, 2);
    }

    /// Store whose every call fails.
    struct FailingStore;

    #[async_trait]
    impl WindowStore for FailingStore {
        async fn check_and_record(
            &self,
            _key: &RateLimitKey,
            _limit: u32,
            _window: Duration,
        ) -> Result<CheckOutcome, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn status(
            &self,
            _key: &RateLimitKey,
            _window: Duration,
        ) -> Result<WindowReading, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn purge(&self, _key: &RateLimitKey) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn purge_by_pattern(&self, _pattern: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn scan_keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[actix_web::test]
    async fn test_store_failure_lets_requests_through() {
        let limiter = SlidingWindowLimiter::new(
            PolicyPreset::Batch.policy(),
            Arc::new(FailingStore),
            Arc::new(ManualClock::new(START)),
        );
        let app = gated_app!(RateLimitGate::new(limiter));

        // Well past the batch limit of two.
        for _ in 0..4 {
            let resp = test::call_service(&app, alerts_request("42").to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(header(&resp, "x-ratelimit-requests-in-window"), "0");
            assert_eq!(header(&resp, "x-ratelimit-remaining"), "2");
            assert_eq!(header(&resp, "x-ratelimit-limit"), "2");
        }
    }

    #[::core::prelude::v1::test]
    fn test_reset_header_rounds_up() {
        assert_eq!(ceil_secs(1_700_000_000_000), 1_700_000_000);
        assert_eq!(ceil_secs(1_700_000_000_001), 1_700_000_001);
    }
}
