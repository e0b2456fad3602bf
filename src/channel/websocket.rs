/// WebSocket transport: text frames in both directions
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::transport::Transport;
use crate::error::{BridgeError, Result};

pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Message>,
    is_connected: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Connect and start the reader/writer tasks
    ///
    /// Returns the transport and the stream of inbound text frames. The
    /// stream ends when the socket closes.
    pub async fn connect(url: &str) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<String>)> {
        info!("🔌 Connecting message transport to {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::WebSocketError(format!("Connection failed: {}", e)))?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let is_connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    error!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
            debug!("WebSocket writer task ended");
        });

        let connected = Arc::clone(&is_connected);
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            debug!("Inbound receiver dropped, stopping reader");
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        warn!("WebSocket closed by peer");
                        break;
                    }
                    // Binary and control frames are not part of the protocol
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            warn!("WebSocket reader task ended");
        });

        info!("✅ Message transport connected");

        Ok((
            Arc::new(WebSocketTransport {
                outbound: out_tx,
                is_connected,
            }),
            in_rx,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }
}

impl Transport for WebSocketTransport {
    fn post(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::TransportClosed("websocket closed".to_string()));
        }
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| BridgeError::TransportClosed("websocket writer stopped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn test_text_frames_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
            ws.send(Message::Ping(vec![9])).await.unwrap();
            ws.send(Message::Pong(vec![9])).await.unwrap();
            ws.send(Message::Text("hello".to_string())).await.unwrap();

            // Skip the client's pong and wait for its text frame
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let _ = seen_tx.send(text);
                    break;
                }
            }

            let _ = ws.close(None).await;
            while ws.next().await.is_some() {}
        });

        let (transport, mut inbound) = WebSocketTransport::connect(&format!("ws://{}", addr))
            .await
            .unwrap();
        assert!(transport.is_connected());

        // Binary and control frames never reach the inbound stream
        let first = timeout(Duration::from_secs(2), inbound.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("hello"));

        transport.post("from client".to_string()).unwrap();
        let seen = timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap();
        assert_eq!(seen.as_deref(), Some("from client"));

        // Server close ends the stream
        let end = timeout(Duration::from_secs(2), inbound.recv()).await.unwrap();
        assert!(end.is_none());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.post("too late".to_string()),
            Err(BridgeError::TransportClosed(_))
        ));

        let _ = timeout(Duration::from_secs(2), server).await;
    }

    #[tokio::test]
    async fn test_connect_failure_is_websocket_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WebSocketTransport::connect(&format!("ws://{}", addr)).await;
        assert!(matches!(result, Err(BridgeError::WebSocketError(_))));
    }
}
