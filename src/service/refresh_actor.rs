use crate::error::{KeeperError, RefreshError};
use crate::google_oauth::credentials::RefreshedToken;
use crate::google_oauth::service::TokenRefresher;

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::collections::HashMap;
use tracing::{debug, warn};

type RefreshReply = RpcReplyPort<Result<RefreshedToken, RefreshError>>;

/// Messages handled by the refresh coordinator.
#[derive(Debug)]
pub enum RefreshMessage {
    /// Exchange this refresh token; joins an in-flight exchange of the same token.
    Refresh(String, RefreshReply),

    // Internal messages (sent by the actor itself)
    /// The exchange for this refresh token finished.
    Completed {
        refresh_token: String,
        result: Result<RefreshedToken, RefreshError>,
    },
}

/// Handle for interacting with the refresh coordinator.
#[derive(Clone)]
pub struct RefreshHandle {
    actor: ActorRef<RefreshMessage>,
}

impl RefreshHandle {
    /// Refresh one token. Concurrent callers for the same token share one provider call.
    pub async fn refresh(
        &self,
        refresh_token: impl Into<String>,
    ) -> Result<RefreshedToken, RefreshError> {
        let refresh_token = refresh_token.into();
        if refresh_token.trim().is_empty() {
            return Err(RefreshError::MissingRefreshToken);
        }
        ractor::call!(self.actor, RefreshMessage::Refresh, refresh_token).unwrap_or_else(|e| {
            Err(RefreshError::Transient(format!(
                "refresh coordinator unreachable: {e}"
            )))
        })
    }
}

struct RefreshCoordinatorState {
    refresher: TokenRefresher,
    in_flight: HashMap<String, Vec<RefreshReply>>,
}

struct RefreshCoordinator;

#[ractor::async_trait]
impl Actor for RefreshCoordinator {
    type Msg = RefreshMessage;
    type State = RefreshCoordinatorState;
    type Arguments = TokenRefresher;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        refresher: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(RefreshCoordinatorState {
            refresher,
            in_flight: HashMap::new(),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RefreshMessage::Refresh(refresh_token, reply) => {
                if let Some(waiters) = state.in_flight.get_mut(&refresh_token) {
                    debug!(waiters = waiters.len(), "refresh already in flight; joining");
                    waiters.push(reply);
                    return Ok(());
                }
                state.in_flight.insert(refresh_token.clone(), vec![reply]);

                let refresher = state.refresher.clone();
                tokio::spawn(async move {
                    let result = refresher.refresh(&refresh_token).await;
                    let _ = ractor::cast!(
                        myself,
                        RefreshMessage::Completed {
                            refresh_token,
                            result
                        }
                    );
                });
            }
            RefreshMessage::Completed {
                refresh_token,
                result,
            } => {
                let waiters = state.in_flight.remove(&refresh_token).unwrap_or_default();
                if let Err(e) = &result {
                    warn!(waiters = waiters.len(), "refresh failed: {}", e);
                }
                for reply in waiters {
                    let _ = reply.send(result.clone());
                }
            }
        }
        Ok(())
    }
}

/// Spawn the refresh coordinator and return a handle.
pub async fn spawn(refresher: TokenRefresher) -> Result<RefreshHandle, KeeperError> {
    let (actor, _jh) = Actor::spawn(None, RefreshCoordinator, refresher)
        .await
        .map_err(|e| KeeperError::Actor(format!("failed to spawn RefreshCoordinator: {e}")))?;
    Ok(RefreshHandle { actor })
}
