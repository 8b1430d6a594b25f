use actix_web::{get, http::header, web, Error, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::error::AppError;
use crate::metrics;
use crate::middleware::auth::AuthError;
use crate::state::AppState;
use crate::websocket::{Connection, UserId};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Credential from `?token=`, falling back to `Authorization: Bearer`
fn credential(params: &WsParams, req: &HttpRequest) -> Option<String> {
    params
        .token
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

async fn authenticate(
    params: &WsParams,
    req: &HttpRequest,
    state: &AppState,
) -> Result<UserId, AuthError> {
    let token = credential(params, req).ok_or(AuthError::MissingCredential)?;
    state.identity.verify(&token).await
}

/// Upgrade an authenticated client and attach it to the hub.
///
/// Verification happens before the handshake; a rejected request never
/// touches hub state.
#[get("/api/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let user_id = match authenticate(&query, &req, &state).await {
        Ok(user_id) => user_id,
        Err(e) => {
            metrics::record_rejected_upgrade();
            tracing::warn!(
                peer = ?req.peer_addr(),
                error = %e,
                "websocket upgrade rejected"
            );
            return Err(AppError::from(e).into());
        }
    };

    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;

    let (handle, mailbox) = state.hub.register(user_id).await;
    tracing::info!(
        connection_id = %handle.id(),
        user_id,
        "websocket connection established"
    );

    Connection::new(state.hub.clone(), handle, state.channel_access.clone())
        .start(mailbox, session, msg_stream);

    Ok(response)
}
