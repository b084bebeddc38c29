//! Scripted in-process transport.
//!
//! Stands in for a central system without sockets. Opens can be made to
//! fail or stall, sends can be made to stall like a peer that stopped
//! reading, every connection can be greeted with scripted events, and a
//! responder closure turns each sent frame into inbound events. Every frame
//! a device sends is recorded per connection for later inspection.

use super::{Connection, ConnectionEvent, OpenFailure, Transport, TransportFault};
use crate::codec::{decode, encode_result};
use crate::model::Envelope;
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// An inbound event the script injects into a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedEvent {
    Message(String),
    Close,
    Fault(String),
}

impl ScriptedEvent {
    fn into_event(self) -> ConnectionEvent {
        match self {
            Self::Message(text) => ConnectionEvent::Message(text),
            Self::Close => ConnectionEvent::Closed,
            Self::Fault(reason) => ConnectionEvent::Fault(TransportFault::Receive(reason)),
        }
    }
}

type Responder = Arc<dyn Fn(&str) -> Vec<ScriptedEvent> + Send + Sync>;

/// What happened on one connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionLog {
    /// One-based order in which the connection was opened.
    pub index: usize,
    pub url: String,
    pub subprotocol: String,
    /// Frames the device sent, in order.
    pub sent: Vec<String>,
    pub closed_by_client: bool,
    pub closed_by_peer: bool,
    /// Sends attempted after the connection was closed.
    pub sends_after_close: usize,
    /// Sends that never completed.
    pub stalled_sends: usize,
}

#[derive(Default)]
struct Shared {
    open_attempts: usize,
    remaining_failures: usize,
    connections: Vec<ConnectionLog>,
}

#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
    open_delay: Option<Duration>,
    stall_sends_after: Option<usize>,
    greeting: Vec<ScriptedEvent>,
    responder: Option<Responder>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MemoryTransport {
    /// Transport whose connections stay silent until the device closes them.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MemoryTransportBuilder {
        MemoryTransportBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_attempts(&self) -> usize {
        self.lock().open_attempts
    }

    /// Snapshot of every successfully opened connection.
    pub fn connections(&self) -> Vec<ConnectionLog> {
        self.lock().connections.clone()
    }
}

#[derive(Default)]
pub struct MemoryTransportBuilder {
    fail_first: usize,
    open_delay: Option<Duration>,
    stall_sends_after: Option<usize>,
    greeting: Vec<ScriptedEvent>,
    responder: Option<Responder>,
}

impl MemoryTransportBuilder {
    /// Refuse the first `count` open attempts.
    #[must_use]
    pub fn fail_first_opens(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    /// Delay every open by `delay` before it succeeds or fails.
    #[must_use]
    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Let the first `count` sends on each connection through; every later
    /// send stays pending forever.
    #[must_use]
    pub fn stall_sends_after(mut self, count: usize) -> Self {
        self.stall_sends_after = Some(count);
        self
    }

    /// Events queued on every connection as soon as it opens.
    #[must_use]
    pub fn greeting(mut self, events: Vec<ScriptedEvent>) -> Self {
        self.greeting = events;
        self
    }

    /// Produce inbound events in reaction to each frame the device sends.
    #[must_use]
    pub fn responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Vec<ScriptedEvent> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Answer every call with an empty result, like a permissive server.
    #[must_use]
    pub fn answer_calls(self) -> Self {
        self.responder(answer_calls)
    }

    pub fn build(self) -> MemoryTransport {
        MemoryTransport {
            shared: Arc::new(Mutex::new(Shared {
                remaining_failures: self.fail_first,
                ..Shared::default()
            })),
            open_delay: self.open_delay,
            stall_sends_after: self.stall_sends_after,
            greeting: self.greeting,
            responder: self.responder,
        }
    }
}

/// Responder that answers each call frame with `[3, id, {}]`.
pub fn answer_calls(frame: &str) -> Vec<ScriptedEvent> {
    match decode(frame) {
        Ok(Envelope::Call { request_id, .. }) => vec![ScriptedEvent::Message(encode_result(
            &request_id,
            json!({}),
        ))],
        _ => Vec::new(),
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn open(&self, url: &str, subprotocol: &str) -> Result<Self::Connection, OpenFailure> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        let slot = {
            let mut shared = self.lock();
            shared.open_attempts += 1;
            if shared.remaining_failures > 0 {
                shared.remaining_failures -= 1;
                return Err(OpenFailure::Refused {
                    url: url.to_string(),
                    reason: "scripted refusal".to_string(),
                });
            }
            let slot = shared.connections.len();
            shared.connections.push(ConnectionLog {
                index: slot + 1,
                url: url.to_string(),
                subprotocol: subprotocol.to_string(),
                ..ConnectionLog::default()
            });
            slot
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        for event in self.greeting.iter().cloned() {
            let _ = inbound_tx.send(event.into_event());
        }
        Ok(MemoryConnection {
            shared: Arc::clone(&self.shared),
            slot,
            responder: self.responder.clone(),
            sends_left: self.stall_sends_after,
            inbound_tx,
            inbound_rx,
            closed: false,
        })
    }
}

pub struct MemoryConnection {
    shared: Arc<Mutex<Shared>>,
    slot: usize,
    responder: Option<Responder>,
    sends_left: Option<usize>,
    inbound_tx: mpsc::UnboundedSender<ConnectionEvent>,
    inbound_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    closed: bool,
}

impl MemoryConnection {
    fn with_log(&self, update: impl FnOnce(&mut ConnectionLog)) {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(log) = shared.connections.get_mut(self.slot) {
            update(log);
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, frame: String) -> Result<(), TransportFault> {
        if self.closed {
            self.with_log(|log| log.sends_after_close += 1);
            return Err(TransportFault::AlreadyClosed);
        }
        match self.sends_left {
            Some(0) => {
                self.with_log(|log| log.stalled_sends += 1);
                return std::future::pending().await;
            }
            Some(left) => self.sends_left = Some(left - 1),
            None => {}
        }
        let reactions = self
            .responder
            .as_ref()
            .map(|responder| responder(&frame))
            .unwrap_or_default();
        self.with_log(|log| log.sent.push(frame));
        for event in reactions {
            let _ = self.inbound_tx.send(event.into_event());
        }
        Ok(())
    }

    async fn next_event(&mut self) -> ConnectionEvent {
        if self.closed {
            return ConnectionEvent::Closed;
        }
        let Some(event) = self.inbound_rx.recv().await else {
            return ConnectionEvent::Closed;
        };
        if event == ConnectionEvent::Closed {
            self.closed = true;
            self.with_log(|log| log.closed_by_peer = true);
        }
        event
    }

    async fn close(&mut self) -> Result<(), TransportFault> {
        if !self.closed {
            self.closed = true;
            self.with_log(|log| log.closed_by_client = true);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_frames_and_replies_through_responder() {
        let transport = MemoryTransport::builder().answer_calls().build();
        let Ok(mut conn) = transport.open("ws://cs:8887/CP_1_x", "ocpp1.6").await else {
            unreachable!("memory open succeeds by default");
        };
        assert!(conn.send(r#"[2,"id1","Heartbeat",{}]"#.to_string()).await.is_ok());
        assert_eq!(
            conn.next_event().await,
            ConnectionEvent::Message(r#"[3,"id1",{}]"#.to_string())
        );
        assert!(conn.close().await.is_ok());
        assert_eq!(
            conn.send("late".to_string()).await,
            Err(TransportFault::AlreadyClosed)
        );

        let logs = transport.connections();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].subprotocol, "ocpp1.6");
        assert_eq!(logs[0].sent.len(), 1);
        assert!(logs[0].closed_by_client);
        assert_eq!(logs[0].sends_after_close, 1);
    }

    #[tokio::test]
    async fn scripted_failures_precede_successful_opens() {
        let transport = MemoryTransport::builder().fail_first_opens(2).build();
        assert!(transport.open("ws://a/1", "ocpp1.6").await.is_err());
        assert!(transport.open("ws://a/1", "ocpp1.6").await.is_err());
        assert!(transport.open("ws://a/1", "ocpp1.6").await.is_ok());
        assert_eq!(transport.open_attempts(), 3);
        assert_eq!(transport.connections().len(), 1);
    }

    #[tokio::test]
    async fn greeting_close_marks_peer_closed() {
        let transport = MemoryTransport::builder()
            .greeting(vec![ScriptedEvent::Close])
            .build();
        let Ok(mut conn) = transport.open("ws://a/1", "ocpp2.1").await else {
            unreachable!("memory open succeeds by default");
        };
        assert_eq!(conn.next_event().await, ConnectionEvent::Closed);
        assert_eq!(conn.next_event().await, ConnectionEvent::Closed);
        assert!(transport.connections()[0].closed_by_peer);
    }
}
