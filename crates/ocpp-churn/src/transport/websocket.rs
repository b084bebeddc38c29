//! WebSocket transport over `tokio-tungstenite`.

use super::{Connection, ConnectionEvent, OpenFailure, Transport, TransportFault};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn open(&self, url: &str, subprotocol: &str) -> Result<Self::Connection, OpenFailure> {
        let invalid = |reason: String| OpenFailure::InvalidEndpoint {
            url: url.to_string(),
            reason,
        };
        let mut request = url
            .into_client_request()
            .map_err(|err| invalid(err.to_string()))?;
        let header = HeaderValue::from_str(subprotocol).map_err(|err| invalid(err.to_string()))?;
        request.headers_mut().insert(SUBPROTOCOL_HEADER, header);

        let (stream, response) = connect_async(request).await.map_err(|err| match err {
            WsError::Url(reason) => invalid(reason.to_string()),
            other => OpenFailure::Refused {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;

        let accepted = response
            .headers()
            .get(SUBPROTOCOL_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if accepted != subprotocol {
            tracing::debug!(url, offered = subprotocol, accepted, "server did not echo subprotocol");
        }
        tracing::trace!(url, status = %response.status(), "websocket upgraded");
        Ok(WebSocketConnection {
            stream,
            closed: false,
        })
    }
}

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<(), TransportFault> {
        if self.closed {
            return Err(TransportFault::AlreadyClosed);
        }
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|err| TransportFault::Send(err.to_string()))
    }

    async fn next_event(&mut self) -> ConnectionEvent {
        if self.closed {
            return ConnectionEvent::Closed;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return ConnectionEvent::Message(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return ConnectionEvent::Message(text),
                    Err(err) => {
                        return ConnectionEvent::Fault(TransportFault::Receive(format!(
                            "binary frame is not UTF-8: {err}"
                        )))
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    self.closed = true;
                    return ConnectionEvent::Closed;
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    self.closed = true;
                    return ConnectionEvent::Closed;
                }
                Some(Err(err)) => {
                    self.closed = true;
                    return ConnectionEvent::Fault(TransportFault::Receive(err.to_string()));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportFault> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {}
            Err(err) => {
                self.closed = true;
                return Err(TransportFault::Close(err.to_string()));
            }
        }
        // Drain until the peer's close frame ends the stream.
        while let Some(Ok(_)) = self.stream.next().await {}
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_malformed_url() {
        let err = WebSocketTransport::new()
            .open("not a url", "ocpp1.6")
            .await
            .err();
        assert!(matches!(err, Some(OpenFailure::InvalidEndpoint { .. })));
    }

    #[tokio::test]
    async fn refused_connection_is_an_open_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0");
        let Ok(listener) = listener else { return };
        let Ok(addr) = listener.local_addr() else { return };
        drop(listener);
        let err = WebSocketTransport::new()
            .open(&format!("ws://{addr}/CP_1_x"), "ocpp1.6")
            .await
            .err();
        assert!(matches!(err, Some(OpenFailure::Refused { .. })));
    }
}
