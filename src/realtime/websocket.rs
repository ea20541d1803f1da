//! WebSocket endpoint streaming realtime events to remote observers

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::RealtimeHub;
use crate::error::{Result, SimError};

/// Accepts observers forever. Each observer receives every event published
/// after it connected, as a JSON text frame.
pub async fn serve(listener: TcpListener, hub: RealtimeHub) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Realtime channel listening on ws://{}", addr);

    loop {
        let (stream, remote_addr) = listener
            .accept()
            .await
            .map_err(|e| SimError::ServerError(format!("Accept failed: {}", e)))?;
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = stream_events(stream, remote_addr, hub).await {
                debug!("Observer {} disconnected: {}", remote_addr, e);
            }
        });
    }
}

async fn stream_events(
    stream: TcpStream,
    remote_addr: SocketAddr,
    hub: RealtimeHub,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut incoming) = ws.split();
    let mut events = hub.subscribe();
    debug!("Observer {} connected", remote_addr);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let text = serde_json::to_string(&event)?;
                    sink.send(Message::Text(text)).await?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Observer {} lagged, {} event(s) skipped", remote_addr, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }

    let _ = sink.close().await;
    Ok(())
}
