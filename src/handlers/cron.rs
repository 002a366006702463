use crate::middleware::RequireCronSecret;
use crate::router::KeeperState;
use crate::service::sweeper::SweepSummary;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

#[derive(Serialize)]
struct SweepResponse {
    success: bool,
    #[serde(flatten)]
    summary: SweepSummary,
    timestamp: DateTime<Utc>,
}

/// GET /api/cron/refresh-tokens -> refresh every credential inside the lookahead window.
pub async fn refresh_tokens(_auth: RequireCronSecret, State(state): State<KeeperState>) -> Response {
    let now = Utc::now();
    info!("cron token sweep triggered");
    match state.sweeper.sweep(now).await {
        Ok(summary) => {
            // A rejected OAuth client is a deployment problem, not a per-record one.
            let status = if summary.misconfigured {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            let body = SweepResponse {
                success: !summary.misconfigured,
                summary,
                timestamp: now,
            };
            (status, Json(body)).into_response()
        }
        Err(e) => {
            error!("token sweep could not start: {}", e);
            e.into_response()
        }
    }
}
