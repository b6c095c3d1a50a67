use super::transport::{ChannelKind, StreamTransport};
use super::StreamError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use tungstenite::Message;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    socket: Option<Socket>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self { socket: None }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    fn channel(&self) -> ChannelKind {
        ChannelKind::WebSocket
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    async fn connect(&mut self, address: &str) -> Result<(), StreamError> {
        if let Err(e) = self.disconnect().await {
            debug!("Closing previous socket failed: {}", e);
        }

        debug!(address, "Opening socket");
        let (socket, response) = connect_async(address)
            .await
            .map_err(|e| StreamError::Connection(format!("{}: {}", address, e)))?;
        debug!(status = %response.status(), "Socket handshake complete");

        self.socket = Some(socket);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), StreamError> {
        if let Some(mut socket) = self.socket.take() {
            match socket.close(None).await {
                Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        let socket = self.socket.as_mut().ok_or(StreamError::NotConnected)?;
        socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        let socket = self.socket.as_mut()?;
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| StreamError::Parse(format!("Invalid UTF-8: {}", e))),
                    );
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Socket closed by peer");
                    // Flushes the queued close reply
                    if let Err(e) = socket.close(None).await {
                        debug!("Close handshake incomplete: {}", e);
                    }
                    self.socket = None;
                    return None;
                }
                // Ping/pong replies are queued by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.socket = None;
                    return Some(Err(e.into()));
                }
                None => {
                    self.socket = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_peer_close_completes_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"agent":"system","event":"connected"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
            // A clean reply ends the stream; a dropped socket surfaces as an error
            !matches!(ws.next().await, Some(Err(_)))
        });

        let mut transport = WebSocketTransport::new();
        transport.connect(&format!("ws://{}/ws/s1", addr)).await.unwrap();

        let first = transport.next_frame().await;
        assert!(matches!(first, Some(Ok(text)) if text.contains("connected")));
        assert!(transport.next_frame().await.is_none());
        assert!(!transport.is_open());

        assert!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut transport = WebSocketTransport::new();
        let result = transport.connect(&format!("ws://{}/ws/s1", addr)).await;
        assert!(matches!(result, Err(StreamError::Connection(_))));
        assert!(!transport.is_open());
    }
}
