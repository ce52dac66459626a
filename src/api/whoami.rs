// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::audit::{AuditEvent, AuditEventType};
use crate::auth::Auth;
use crate::error::{ApiError, ErrorBody};
use crate::principal::PrincipalSummary;
use crate::state::AppState;

/// The authenticated principal and the user it acts for.
#[derive(Debug, Serialize, ToSchema)]
pub struct WhoAmIResponse {
    /// Principal that passed authentication.
    pub principal: PrincipalSummary,
    /// End-user the request is attributed to.
    pub real_user: PrincipalSummary,
}

/// Describe the caller.
///
/// Service account calls must name the end-user in the on-behalf header.
#[utoipa::path(
    get,
    path = "/v1/whoami",
    tag = "Identity",
    responses(
        (status = 200, description = "Caller identity", body = WhoAmIResponse),
        (status = 400, description = "On-behalf header missing", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Host not allowed", body = ErrorBody),
        (status = 404, description = "On-behalf user not found", body = ErrorBody),
        (status = 503, description = "Token store unavailable", body = ErrorBody)
    ),
    security(("service_account_token" = []))
)]
pub async fn whoami(
    State(state): State<AppState>,
    Auth(principal): Auth,
    headers: HeaderMap,
) -> Result<Json<WhoAmIResponse>, ApiError> {
    let real_user = state.identity.resolve_real_user(&principal, &headers).await?;

    state
        .audit
        .record_for_request(
            AuditEvent::new(AuditEventType::IdentityResolved)
                .with_actor(real_user.username())
                .with_resource("user", real_user.username())
                .with_details(serde_json::json!({
                    "via_service_account": principal.is_service_account(),
                })),
            Some(&principal),
            &headers,
        )
        .await?;

    Ok(Json(WhoAmIResponse {
        principal: principal.summary(),
        real_user: real_user.summary(),
    }))
}
