//! ZeroMQ plumbing to the governance backend: a REQ client for snapshot
//! queries and a SUB listener for the event feed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::config::BackendConfig;
use crate::db::Project;
use crate::error::{AppError, AppResult};
use crate::services::events::{EventRouter, HandleEvent};

/// Read access to project snapshots held by the backend.
#[async_trait]
pub trait GovernanceBackend: Send + Sync {
    /// Snapshots for the requested ids, keyed by project id. Ids unknown to
    /// the backend are simply absent from the map.
    async fn fetch_projects_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Project>>;

    /// Every project the backend considers active.
    async fn fetch_active_projects(&self) -> AppResult<HashMap<String, Project>>;
}

/// Request/reply client. One request is in flight at a time; the socket is
/// dropped and reconnected after any failure so a lost reply never wedges
/// the REQ state machine. Connecting counts against the request timeout,
/// since `connect` keeps retrying while the backend refuses connections.
pub struct ZmqBackend {
    endpoint: String,
    timeout: Duration,
    socket: Mutex<Option<ReqSocket>>,
}

impl ZmqBackend {
    pub fn new(config: &BackendConfig) -> Self {
        ZmqBackend {
            endpoint: config.request_endpoint(),
            timeout: config.request_timeout(),
            socket: Mutex::new(None),
        }
    }

    async fn request(&self, message: ZmqMessage) -> AppResult<Value> {
        let mut guard = self.socket.lock().await;

        // Taken out of the slot for the exchange; only put back on success.
        let exchange = async {
            let mut socket = match guard.take() {
                Some(socket) => socket,
                None => {
                    let mut socket = ReqSocket::new();
                    socket.connect(&self.endpoint).await?;
                    tracing::debug!("Connected request socket to {}", self.endpoint);
                    socket
                }
            };
            socket.send(message).await?;
            let reply = socket.recv().await?;
            Ok::<_, AppError>((socket, reply))
        };

        let (socket, reply) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(exchanged) => exchanged?,
            Err(_) => {
                tracing::warn!("Backend request to {} timed out", self.endpoint);
                return Err(AppError::BackendTimeout(self.timeout));
            }
        };
        *guard = Some(socket);

        let frame = reply
            .get(0)
            .ok_or_else(|| AppError::Backend("empty reply".to_string()))?;
        Ok(serde_json::from_slice(frame)?)
    }
}

#[async_trait]
impl GovernanceBackend for ZmqBackend {
    async fn fetch_projects_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Project>> {
        let mut message = ZmqMessage::from("projects");
        message.push_back(Bytes::from(serde_json::to_vec(ids)?));

        let reply = self.request(message).await?;
        parse_projects_reply(reply)
    }

    async fn fetch_active_projects(&self) -> AppResult<HashMap<String, Project>> {
        let reply = self.request(ZmqMessage::from("active-projects")).await?;
        parse_projects_reply(reply)
    }
}

/// Decode a `{id: Project}` reply. A reply carrying an `error` key is a
/// backend-side failure.
pub fn parse_projects_reply(reply: Value) -> AppResult<HashMap<String, Project>> {
    if let Some(error) = reply.get("error") {
        tracing::error!("Backend replied with error: {}", error);
        return Err(AppError::Backend(error.to_string()));
    }

    Ok(serde_json::from_value(reply)?)
}

/// Listener on the backend's publish socket.
pub struct BackendSubscriber {
    endpoint: String,
}

impl BackendSubscriber {
    pub fn new(config: &BackendConfig) -> Self {
        BackendSubscriber {
            endpoint: config.subscriber_endpoint(),
        }
    }

    /// Receive frames and dispatch them one by one until shutdown.
    pub async fn run<H: HandleEvent>(
        self,
        router: EventRouter<H>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> AppResult<()> {
        let mut socket = SubSocket::new();
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Backend subscriber shutting down before connecting");
                return Ok(());
            }
            connected = socket.connect(&self.endpoint) => connected?,
        }
        socket.subscribe("").await?;
        tracing::info!("Subscribed to backend events at {}", self.endpoint);

        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Backend subscriber shutting down");
                    break;
                }
                received = socket.recv() => received,
            };

            match received {
                Ok(message) => {
                    let frames = message.into_vec();
                    tracing::info!("Received update with {} frame(s)", frames.len());
                    router.dispatch(&frames).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to receive backend event: {}", e);
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unreachable_backend() -> BackendConfig {
        BackendConfig {
            host: "127.0.0.1".to_string(),
            request_port: 1,
            subscriber_port: 1,
            request_timeout_ms: 200,
        }
    }

    struct IgnoreEvents;

    #[async_trait]
    impl HandleEvent for IgnoreEvents {
        async fn handle(&self, _event: crate::services::events::RelayEvent) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn refused_connection_times_out() {
        let backend = ZmqBackend::new(&unreachable_backend());

        let outcome = tokio::time::timeout(Duration::from_secs(5), backend.fetch_active_projects())
            .await
            .expect("request should give up on its own timeout");
        assert!(matches!(outcome, Err(AppError::BackendTimeout(t)) if t == Duration::from_millis(200)));

        // The next request reconnects and times out the same way.
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            backend.fetch_projects_by_ids(&["p1".to_string()]),
        )
        .await
        .expect("request should give up on its own timeout");
        assert!(matches!(outcome, Err(AppError::BackendTimeout(_))));
    }

    #[tokio::test]
    async fn subscriber_stops_while_connecting() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let subscriber = BackendSubscriber::new(&unreachable_backend());
        let router = EventRouter::new(std::sync::Arc::new(IgnoreEvents));
        let handle = tokio::spawn(subscriber.run(router, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("subscriber should stop on shutdown")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn error_reply_is_rejected() {
        let err = parse_projects_reply(json!({"error": "unknown project"})).unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[test]
    fn projects_reply_is_keyed_by_id() {
        let project = crate::db::fixtures::project("p1", 0, vec![]);
        let reply = json!({ "p1": project });

        let projects = parse_projects_reply(reply).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects["p1"].name, "Project p1");
    }

    #[test]
    fn empty_reply_is_empty_map() {
        assert!(parse_projects_reply(json!({})).unwrap().is_empty());
    }

    #[test]
    fn malformed_project_is_an_error() {
        let err = parse_projects_reply(json!({"p1": {"id": "p1"}})).unwrap_err();
        assert!(matches!(err, AppError::Json(_)));
    }
}
