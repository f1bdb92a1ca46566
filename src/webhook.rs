//! Inbound build-completion webhook.
use crate::db::{self, ChannelKind};
use crate::model::{BuildFinishedPayload, InboundBuild};
use crate::reconciler::{BuildAction, BuildContext, Reconciler};
use crate::servers::ServerDirectory;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub enum AppError {
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Internal(err) => {
                tracing::error!("{:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong").into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

#[derive(Clone)]
pub struct WebhookState {
    pub reconciler: Arc<Reconciler>,
    pub servers: Arc<dyn ServerDirectory>,
    pub pool: SqlitePool,
    pub api_key: Arc<str>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/wireci/build_finished", post(build_finished))
        .with_state(state)
}

#[instrument(skip_all)]
async fn build_finished(
    State(state): State<WebhookState>,
    Json(payload): Json<BuildFinishedPayload>,
) -> Result<StatusCode, AppError> {
    // Rejected callbacks get the same empty 200 as accepted ones, so the
    // response never tells a caller whether its key was right.
    if payload.api_key != *state.api_key {
        warn!("dropping build callback with bad API key");
        return Ok(StatusCode::OK);
    }

    let inbound = match payload.into_inbound() {
        Ok(inbound) => inbound,
        Err(err) => {
            warn!(%err, "dropping malformed build callback");
            return Ok(StatusCode::OK);
        }
    };
    let server_id = match &inbound {
        InboundBuild::Finished(ev) => ev.server.clone(),
        InboundBuild::Errored { server, .. } => server.clone(),
    };
    let server_name = match state.servers.resolve_server(&server_id) {
        Some(server) => server.short_name,
        None => {
            warn!(server = %server_id, "build callback from unknown server");
            server_id
        }
    };
    let ctx = BuildContext {
        channels: db::list_channels(&state.pool, ChannelKind::Build).await?,
        server_name,
        repo: db::get_repo(&state.pool).await?,
    };

    let action = match &inbound {
        InboundBuild::Finished(ev) => state.reconciler.handle_build_event(ev, &ctx).await,
        InboundBuild::Errored { error, .. } => state.reconciler.report_error(error, &ctx).await,
    };
    match &action {
        BuildAction::NoChannels => info!("no channels subscribed to builds"),
        BuildAction::Edited { handles } => info!(messages = handles.len(), "extended success message"),
        BuildAction::Posted { outcome, handles } => {
            info!(outcome = outcome.as_str(), messages = handles.len(), "posted build notification")
        }
        BuildAction::ErrorReported { handles } => info!(messages = handles.len(), "posted build error"),
    }
    Ok(StatusCode::OK)
}
