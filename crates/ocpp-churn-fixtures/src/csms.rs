//! Minimal OCPP central system for end-to-end tests.
//!
//! Listens on an ephemeral loopback port, echoes the requested subprotocol,
//! answers every device call with a canned result and records what it saw.

use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use ocpp_churn::codec::{decode, encode_result};
use ocpp_churn::messages::{BOOT_NOTIFICATION, HEARTBEAT, STATUS_NOTIFICATION};
use ocpp_churn::model::{Envelope, RunConfigBuilder};
use serde_json::{json, Value};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::Message;

/// Heartbeat interval advertised in boot replies.
pub const BOOT_INTERVAL_SECS: u64 = 300;

/// Behaviour switches for the mock.
#[derive(Clone, Debug, Default)]
pub struct MockOptions {
    /// Calls `(action, payload)` pushed to the device right after each boot
    /// reply.
    pub push_after_boot: Vec<(String, Value)>,
    /// Close from the server side right after replying to the boot.
    pub close_after_boot: bool,
}

/// One accepted WebSocket connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Request path, `/<device id>` unless a prefix is configured.
    pub path: String,
    /// Subprotocol the device offered, if any.
    pub subprotocol: Option<String>,
}

/// Snapshot of the mock's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connections: u64,
    pub disconnections: u64,
    pub boot_notifications: u64,
    pub heartbeats: u64,
    pub status_notifications: u64,
    pub other_calls: u64,
    /// Results the device sent back for pushed calls.
    pub results_received: u64,
    /// Errors the device sent back for pushed calls.
    pub errors_received: u64,
    pub decode_failures: u64,
}

#[derive(Default)]
struct Counters {
    connections: AtomicU64,
    disconnections: AtomicU64,
    boot_notifications: AtomicU64,
    heartbeats: AtomicU64,
    status_notifications: AtomicU64,
    other_calls: AtomicU64,
    results_received: AtomicU64,
    errors_received: AtomicU64,
    decode_failures: AtomicU64,
    accepted: Mutex<Vec<ConnectionInfo>>,
    pushed_replies: Mutex<Vec<String>>,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> MockStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::SeqCst);
        MockStats {
            connections: load(&self.connections),
            disconnections: load(&self.disconnections),
            boot_notifications: load(&self.boot_notifications),
            heartbeats: load(&self.heartbeats),
            status_notifications: load(&self.status_notifications),
            other_calls: load(&self.other_calls),
            results_received: load(&self.results_received),
            errors_received: load(&self.errors_received),
            decode_failures: load(&self.decode_failures),
        }
    }
}

/// Running mock central system. Dropping it stops the listener and every
/// open connection.
pub struct MockCentralSystem {
    addr: SocketAddr,
    counters: Arc<Counters>,
    server: JoinHandle<()>,
}

impl MockCentralSystem {
    pub async fn start() -> io::Result<Self> {
        Self::start_with(MockOptions::default()).await
    }

    pub async fn start_with(options: MockOptions) -> io::Result<Self> {
        Self::bind("127.0.0.1:0", options).await
    }

    /// Listen on `addr`, which may name port 0 for an ephemeral port.
    pub async fn bind(addr: &str, options: MockOptions) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let counters = Arc::new(Counters::default());
        let server = tokio::spawn(accept_loop(listener, Arc::clone(&counters), options));
        tracing::info!(%addr, "mock central system listening");
        Ok(Self {
            addr,
            counters,
            server,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Config builder already pointed at this mock.
    pub fn config(&self) -> RunConfigBuilder {
        RunConfigBuilder::new()
            .host(self.addr.ip().to_string())
            .port(self.port())
    }

    pub fn stats(&self) -> MockStats {
        self.counters.snapshot()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.counters
            .accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raw frames the device sent in answer to pushed calls.
    pub fn pushed_replies(&self) -> Vec<String> {
        self.counters
            .pushed_replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for MockCentralSystem {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn accept_loop(listener: TcpListener, counters: Arc<Counters>, options: MockOptions) {
    let options = Arc::new(options);
    let mut connections = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "tcp connection accepted");
                connections.spawn(serve_connection(
                    stream,
                    Arc::clone(&counters),
                    Arc::clone(&options),
                ));
            }
            Err(err) => {
                tracing::warn!(%err, "accept failed");
            }
        }
        // Reap finished connections.
        while connections.try_join_next().is_some() {}
    }
}

async fn serve_connection(stream: TcpStream, counters: Arc<Counters>, options: Arc<MockOptions>) {
    let mut info = ConnectionInfo {
        path: String::new(),
        subprotocol: None,
    };
    let handshake = accept_hdr_async(stream, |request: &Request, mut response: Response| {
        info.path = request.uri().path().to_string();
        if let Some(offered) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            info.subprotocol = offered.to_str().ok().map(str::to_string);
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, offered.clone());
        }
        Ok::<Response, ErrorResponse>(response)
    })
    .await;
    let ws = match handshake {
        Ok(ws) => ws,
        Err(err) => {
            tracing::debug!(%err, "websocket handshake failed");
            return;
        }
    };
    Counters::bump(&counters.connections);
    counters
        .accepted
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(info);

    let (mut sink, mut stream) = ws.split();
    let mut pushed = 0_u64;
    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let (replies, close) = handle_frame(&text, &counters, &options, &mut pushed);
        let mut failed = false;
        for frame in replies {
            if sink.send(Message::Text(frame)).await.is_err() {
                failed = true;
                break;
            }
        }
        if failed || close {
            break;
        }
    }
    let _ = sink.close().await;
    Counters::bump(&counters.disconnections);
}

/// Frames to send back for one inbound frame, and whether to hang up after.
fn handle_frame(
    text: &str,
    counters: &Counters,
    options: &MockOptions,
    pushed: &mut u64,
) -> (Vec<String>, bool) {
    let envelope = match decode(text) {
        Ok(envelope) => envelope,
        Err(failure) => {
            tracing::debug!(%failure, "undecodable frame from device");
            Counters::bump(&counters.decode_failures);
            return (Vec::new(), false);
        }
    };
    match envelope {
        Envelope::Call {
            request_id, action, ..
        } => {
            let mut frames = vec![encode_result(&request_id, reply_payload(&action))];
            match action.as_str() {
                BOOT_NOTIFICATION => {
                    Counters::bump(&counters.boot_notifications);
                    for (push_action, payload) in &options.push_after_boot {
                        *pushed += 1;
                        frames.push(json!([2, format!("srv{pushed}"), push_action, payload]).to_string());
                    }
                    return (frames, options.close_after_boot);
                }
                HEARTBEAT => Counters::bump(&counters.heartbeats),
                STATUS_NOTIFICATION => Counters::bump(&counters.status_notifications),
                _ => Counters::bump(&counters.other_calls),
            }
            (frames, false)
        }
        Envelope::CallResult { .. } => {
            Counters::bump(&counters.results_received);
            record_pushed_reply(counters, text);
            (Vec::new(), false)
        }
        Envelope::CallError { .. } => {
            Counters::bump(&counters.errors_received);
            record_pushed_reply(counters, text);
            (Vec::new(), false)
        }
    }
}

fn record_pushed_reply(counters: &Counters, text: &str) {
    counters
        .pushed_replies
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(text.to_string());
}

fn reply_payload(action: &str) -> Value {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    match action {
        BOOT_NOTIFICATION => json!({
            "status": "Accepted",
            "currentTime": now,
            "interval": BOOT_INTERVAL_SECS,
        }),
        HEARTBEAT => json!({ "currentTime": now }),
        _ => json!({}),
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn boot_reply_carries_interval_and_time() {
        let payload = reply_payload(BOOT_NOTIFICATION);
        assert_eq!(payload["status"], "Accepted");
        assert_eq!(payload["interval"], BOOT_INTERVAL_SECS);
        assert!(payload["currentTime"].as_str().is_some_and(|t| t.ends_with('Z')));
        assert_eq!(reply_payload("DataTransfer"), json!({}));
    }

    #[test]
    fn pushed_calls_follow_the_boot_reply() {
        let counters = Counters::default();
        let options = MockOptions {
            push_after_boot: vec![("Reset".to_string(), json!({"type": "Soft"}))],
            close_after_boot: true,
        };
        let mut pushed = 0;
        let (frames, close) = handle_frame(
            r#"[2,"b1","BootNotification",{}]"#,
            &counters,
            &options,
            &mut pushed,
        );
        assert!(close);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with(r#"[3,"b1",{"#));
        assert_eq!(frames[1], r#"[2,"srv1","Reset",{"type":"Soft"}]"#);
        assert_eq!(counters.snapshot().boot_notifications, 1);
    }

    #[test]
    fn device_replies_are_recorded() {
        let counters = Counters::default();
        let mut pushed = 0;
        let options = MockOptions::default();
        handle_frame(r#"[3,"srv1",{}]"#, &counters, &options, &mut pushed);
        handle_frame(r#"[4,"srv2","NotImplemented","",{}]"#, &counters, &options, &mut pushed);
        handle_frame("nope", &counters, &options, &mut pushed);
        let stats = counters.snapshot();
        assert_eq!((stats.results_received, stats.errors_received, stats.decode_failures), (1, 1, 1));
    }
}
