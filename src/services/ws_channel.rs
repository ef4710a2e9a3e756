// src/services/ws_channel.rs
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::models::{DriverIdentity, InboundEvent, OutboundEvent};
use crate::services::channel::{ChannelError, InboundReceiver, RealtimeChannel, INBOUND_BUFFER};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        !self.outbound.is_closed() && !self.reader.is_finished()
    }

    fn close(self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Realtime channel over a WebSocket carrying JSON event envelopes.
pub struct WebSocketChannel {
    server_url: Url,
    connection: Mutex<Option<Connection>>,
}

impl WebSocketChannel {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            connection: Mutex::new(None),
        }
    }

    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `<server>?driverId=..&role=..&lastName=..&firstName=..`
    pub fn connect_url(&self, identity: &DriverIdentity) -> Url {
        let mut url = self.server_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("driverId", &identity.driver_id);
            query.append_pair("role", &identity.role);
            if let Some(last_name) = &identity.last_name {
                query.append_pair("lastName", last_name);
            }
            if let Some(first_name) = &identity.first_name {
                query.append_pair("firstName", first_name);
            }
        }
        url
    }
}

#[async_trait]
impl RealtimeChannel for WebSocketChannel {
    async fn connect(&self, identity: &DriverIdentity) -> Result<InboundReceiver, ChannelError> {
        if identity.driver_id.trim().is_empty() {
            return Err(ChannelError::MissingDriverId);
        }
        if let Some(previous) = self.connection().take() {
            previous.close();
        }

        let url = self.connect_url(identity);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::Connection(err.to_string()))?;
        info!(server = %self.server_url, driver_id = %identity.driver_id, "Realtime connection established");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_BUFFER);

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(err) = sink.send(Message::Text(frame)).await {
                    error!(error = %err, "Realtime write failed");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(error = %err, "Realtime read failed");
                        break;
                    }
                };
                match InboundEvent::decode(&text) {
                    Ok(event) => {
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "Dropping undecodable realtime frame"),
                }
            }
            debug!("Realtime reader finished");
        });

        *self.connection() = Some(Connection {
            outbound: outbound_tx,
            writer,
            reader,
        });
        Ok(inbound_rx)
    }

    async fn disconnect(&self) {
        let Some(connection) = self.connection().take() else {
            return;
        };
        // Dropping the sender lets the writer send a close frame first.
        let Connection {
            outbound,
            mut writer,
            reader,
        } = connection;
        drop(outbound);
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut writer).await.is_err() {
            debug!("Realtime writer did not finish in time");
            writer.abort();
        }
        reader.abort();
        info!("Realtime connection closed");
    }

    fn emit(&self, event: OutboundEvent) -> Result<(), ChannelError> {
        let guard = self.connection();
        let connection = guard.as_ref().ok_or(ChannelError::NotConnected)?;
        let frame = event.encode().map_err(|source| ChannelError::Encode {
            event: event.name(),
            source,
        })?;
        connection.outbound.send(frame).map_err(|_| ChannelError::Closed)
    }

    fn is_connected(&self) -> bool {
        self.connection().as_ref().is_some_and(Connection::is_alive)
    }
}
