//! Subject resolution middleware and extractor.
//!
//! The gateway sits behind an identity layer that has already authenticated
//! the caller and forwards its id in a trusted header. This middleware only
//! lifts that id into request extensions; it never rejects a request.

use actix_web::{
    Error, FromRequest, HttpMessage, HttpRequest,
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::HeaderName,
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;

use fleetgate_core::domain::SubjectId;

use crate::middleware::error::AppError;

/// Middleware that resolves the caller's [`SubjectId`] from a header.
pub struct SubjectResolver {
    header: HeaderName,
}

impl SubjectResolver {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SubjectResolver
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = SubjectResolverService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SubjectResolverService {
            service,
            header: self.header.clone(),
        }))
    }
}

pub struct SubjectResolverService<S> {
    service: S,
    header: HeaderName,
}

impl<S, B> Service<ServiceRequest> for SubjectResolverService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let resolved = req
            .headers()
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(SubjectId::parse);

        match resolved {
            Some(Ok(subject)) => {
                req.extensions_mut().insert(subject);
            }
            Some(Err(e)) => {
                tracing::debug!(
                    header = %self.header,
                    error = %e,
                    "Ignoring malformed subject header"
                );
            }
            None => {}
        }

        let fut = self.service.call(req);
        Box::pin(fut)
    }
}

/// Resolved subject of the current request.
///
/// Use this in handlers that need the caller's identity:
/// ```ignore
/// async fn my_windows(subject: Subject) -> impl Responder {
///     format!("Hello, {}!", subject.0)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Subject(pub SubjectId);

impl FromRequest for Subject {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let subject = req.extensions().get::<SubjectId>().cloned();
        ready(subject.map(Subject).ok_or(AppError::MissingIdentity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, http::StatusCode, test, web};

    async fn whoami(subject: Subject) -> HttpResponse {
        HttpResponse::Ok().body(subject.0.to_string())
    }

    fn app_header() -> HeaderName {
        HeaderName::from_static("x-subject-id")
    }

    #[actix_web::test]
    async fn test_header_is_resolved_into_subject() {
        let app = test::init_service(
            App::new()
                .wrap(SubjectResolver::new(app_header()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("X-Subject-Id", " 123456 "))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;

        assert_eq!(body, "123456");
    }

    #[actix_web::test]
    async fn test_missing_or_malformed_header_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .wrap(SubjectResolver::new(app_header()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("X-Subject-Id", "a:b"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
