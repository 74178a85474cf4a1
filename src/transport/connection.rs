//! WebSocket command executor.
//!
//! Connects to a remote end over WebSocket and correlates responses with
//! requests by UUID.
//!
//! # Event Loop
//!
//! The executor spawns a tokio task that handles:
//!
//! - Outgoing requests from [`WebSocketExecutor::send`]
//! - Incoming responses, routed back by request ID
//! - Timed-out correlation cleanup
//! - Graceful shutdown, failing every pending request

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::driver::Executor;
use crate::driver::builder::DEFAULT_COMMAND_TIMEOUT;
use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Command, Request, Response};

// ============================================================================
// Constants
// ============================================================================

/// Maximum pending requests before rejecting new ones.
const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response channels.
type CorrelationMap = FxHashMap<RequestId, oneshot::Sender<Result<Response>>>;

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Internal commands for the event loop.
enum LoopCommand {
    /// Send a request and wait for response.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Remove a timed-out correlation entry.
    RemoveCorrelation(RequestId),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// WebSocketExecutor
// ============================================================================

/// Command executor speaking JSON over a WebSocket.
///
/// `WebSocketExecutor` is `Send + Sync`; clones share the connection.
#[derive(Clone, Debug)]
pub struct WebSocketExecutor {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    request_timeout: Duration,
}

impl WebSocketExecutor {
    /// Connects to `url` using [`DEFAULT_COMMAND_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `url` is not a `ws://` or `wss://` URL
    /// - [`Error::Connection`] if the handshake fails
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_timeout(url, DEFAULT_COMMAND_TIMEOUT).await
    }

    /// Connects to `url` with a custom per-request timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `url` is not a `ws://` or `wss://` URL
    /// - [`Error::Connection`] if the handshake fails
    pub async fn connect_with_timeout(url: &str, request_timeout: Duration) -> Result<Self> {
        let url = validate_url(url)?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::connection(format!("{url}: {e}")))?;

        debug!(%url, "WebSocket connected");
        Ok(Self::new(ws_stream, request_timeout))
    }

    fn new(ws_stream: Stream, request_timeout: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
        ));

        Self {
            command_tx,
            correlation,
            request_timeout,
        }
    }

    /// Returns the per-request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if connection is closed
    /// - [`Error::RequestTimeout`] if response not received within timeout
    /// - [`Error::Protocol`] if too many pending requests
    pub async fn send(&self, request: Request) -> Result<Response> {
        let request_id = request.id;

        {
            let correlation = self.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::protocol(format!(
                    "Too many pending requests: {}/{}",
                    correlation.len(),
                    MAX_PENDING_REQUESTS
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(LoopCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(self.request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(LoopCommand::RemoveCorrelation(request_id));

                Err(Error::request_timeout(
                    request_id,
                    u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Closes the connection. Pending requests fail with
    /// [`Error::ConnectionClosed`].
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(LoopCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: Stream,
        mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(LoopCommand::Send { request, response_tx }) => {
                            Self::handle_send_command(
                                request,
                                response_tx,
                                &mut ws_write,
                                &correlation,
                            ).await;
                        }

                        Some(LoopCommand::RemoveCorrelation(request_id)) => {
                            correlation.lock().remove(&request_id);
                            debug!(%request_id, "Removed timed-out correlation");
                        }

                        Some(LoopCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        Self::fail_pending_requests(&correlation);
        debug!("Event loop terminated");
    }

    fn handle_incoming_message(text: &str, correlation: &Mutex<CorrelationMap>) {
        let response = match from_str::<Response>(text) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse incoming message");
                return;
            }
        };

        let tx = correlation.lock().remove(&response.id);
        match tx {
            Some(tx) => {
                let _ = tx.send(Ok(response));
            }
            None => warn!(id = %response.id, "Response for unknown request"),
        }
    }

    async fn handle_send_command(
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
        ws_write: &mut SplitSink<Stream, Message>,
        correlation: &Mutex<CorrelationMap>,
    ) {
        let request_id = request.id;

        let json = match to_string(&request) {
            Ok(json) => json,
            Err(e) => {
                let _ = response_tx.send(Err(e.into()));
                return;
            }
        };

        correlation.lock().insert(request_id, response_tx);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            if let Some(tx) = correlation.lock().remove(&request_id) {
                let _ = tx.send(Err(Error::connection(e.to_string())));
            }
            return;
        }

        trace!(%request_id, command = %request.command.name, "Request sent");
    }

    fn fail_pending_requests(correlation: &Mutex<CorrelationMap>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

#[async_trait(?Send)]
impl Executor for WebSocketExecutor {
    async fn execute(&self, command: Command) -> Result<Value> {
        let response = self.send(Request::new(command.clone())).await?;
        response.into_result(&command)
    }
}

fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::config(format!("invalid url {url}: {e}")))?;

    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        scheme => Err(Error::config(format!(
            "expected a ws:// or wss:// url, got {scheme}://"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use crate::protocol::{Response, STATUS_UNKNOWN_COMMAND};

    /// Serves one connection, answering each request with `reply`.
    async fn serve(reply: fn(Request) -> Option<Response>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");

            while let Some(Ok(message)) = ws.next().await {
                let Message::Text(text) = message else {
                    continue;
                };
                let request: Request = from_str(&text).expect("request");
                if let Some(response) = reply(request) {
                    let json = to_string(&response).expect("serialize");
                    ws.send(Message::Text(json.into())).await.expect("send");
                }
            }
        });

        format!("ws://{addr}")
    }

    fn echo_title(request: Request) -> Option<Response> {
        Some(match request.command.name {
            crate::protocol::CommandName::GetTitle => {
                Response::success(request.id, json!("Example Domain"))
            }
            _ => Response::failure(request.id, STATUS_UNKNOWN_COMMAND, "unsupported"),
        })
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("ws://127.0.0.1:4444").is_ok());
        assert!(validate_url("wss://grid.example.com/session").is_ok());

        let err = validate_url("http://127.0.0.1:4444").expect_err("scheme");
        assert!(matches!(err, Error::Config { .. }));
        assert!(validate_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let url = serve(echo_title).await;
        let executor = WebSocketExecutor::connect(&url).await.expect("connect");
        assert_eq!(executor.request_timeout(), DEFAULT_COMMAND_TIMEOUT);

        let title = executor
            .execute(Command::get_title())
            .await
            .expect("title");
        assert_eq!(title, json!("Example Domain"));

        let err = executor
            .execute(Command::quit())
            .await
            .expect_err("unknown");
        assert!(matches!(err, Error::UnknownCommand { .. }));
        assert_eq!(executor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_timeout_cleans_up() {
        let url = serve(|_| None).await;
        let executor = WebSocketExecutor::connect_with_timeout(&url, Duration::from_millis(50))
            .await
            .expect("connect");

        let err = executor
            .execute(Command::get_title())
            .await
            .expect_err("timeout");
        assert!(err.is_timeout());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_fails_later_requests() {
        let url = serve(echo_title).await;
        let executor = WebSocketExecutor::connect(&url).await.expect("connect");
        executor.shutdown();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = executor
            .execute(Command::get_title())
            .await
            .expect_err("closed");
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = WebSocketExecutor::connect(&format!("ws://{addr}"))
            .await
            .expect_err("refused");
        assert!(err.is_connection_error());
    }
}
