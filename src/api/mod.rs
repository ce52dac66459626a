// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

use crate::{
    audit::{AuditEvent, AuditEventType},
    auth::authenticate,
    error::{ApiError, ErrorBody},
    principal::PrincipalSummary,
    state::AppState,
};

pub mod health;
pub mod whoami;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/whoami", get(whoami::whoami))
        .route_layer(from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/api-doc/openapi.json", get(openapi_json))
        .nest("/v1", v1_routes)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "service_account_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "Authorization",
                    "ServiceAccountToken <token>",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        whoami::whoami
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            whoami::WhoAmIResponse,
            PrincipalSummary,
            ErrorBody,
            AuditEvent,
            AuditEventType
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Identity", description = "Service account identity")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::directory::InMemoryUserDirectory;
    use crate::principal::User;

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_state() -> (AppState, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let directory = InMemoryUserDirectory::with_users([User::new("foo")]);
        let state = AppState::default()
            .with_directory(Arc::new(directory))
            .with_audit_sink(sink.clone());
        (state, sink)
    }

    async fn whoami_request(state: &AppState, on_behalf: Option<&str>) -> Request<Body> {
        let token = state.tokens.get_or_create_token().await.unwrap();
        let mut builder = Request::builder()
            .uri("/v1/whoami")
            .header(AUTHORIZATION, format!("ServiceAccountToken {token}"));
        if let Some(username) = on_behalf {
            builder = builder.header("Service-Account-On-Behalf", username);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_routes_are_public() {
        for path in ["/health", "/health/live", "/health/ready"] {
            let response = router(AppState::default())
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let response = router(AppState::default())
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn whoami_requires_authentication() {
        let response = router(AppState::default())
            .oneshot(Request::builder().uri("/v1/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(response).await["error_code"], "not_authenticated");
    }

    #[tokio::test]
    async fn whoami_resolves_real_user_and_audits() {
        let (state, sink) = test_state();
        let request = whoami_request(&state, Some("foo")).await;

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["principal"]["is_service_account"], true);
        assert_eq!(body["principal"]["is_superuser"], true);
        assert_eq!(body["real_user"]["username"], "foo");
        assert_eq!(body["real_user"]["is_service_account"], false);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::AuthSuccess);
        assert_eq!(events[0].actor.as_deref(), Some("service_account"));
        assert_eq!(events[1].event_type, AuditEventType::IdentityResolved);
        assert_eq!(events[1].actor.as_deref(), Some("foo"));
        assert_eq!(events[1].resource_id.as_deref(), Some("foo"));
    }

    #[tokio::test]
    async fn whoami_without_on_behalf_header_is_bad_request() {
        let (state, sink) = test_state();
        let request = whoami_request(&state, None).await;

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error_code"], "missing_header");
        assert!(sink
            .events()
            .iter()
            .all(|event| event.event_type != AuditEventType::IdentityResolved));
    }

    #[tokio::test]
    async fn whoami_unknown_user_is_not_found() {
        let (state, _) = test_state();
        let request = whoami_request(&state, Some("ghost")).await;

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn openapi_document_lists_routes() {
        let response = router(AppState::default())
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let doc = json(response).await;
        assert!(doc["paths"]["/v1/whoami"].is_object());
        assert!(doc["paths"]["/health/ready"].is_object());
        assert!(doc["components"]["securitySchemes"]["service_account_token"].is_object());
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let response = router(AppState::default())
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
