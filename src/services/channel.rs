// src/services/channel.rs
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{DriverIdentity, InboundEvent, OutboundEvent};

/// Buffer between the socket reader and the session loop.
pub const INBOUND_BUFFER: usize = 256;

/// Typed subscription to everything the server pushes. Dropping it
/// unsubscribes.
pub type InboundReceiver = mpsc::Receiver<InboundEvent>;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("driver identity has no driver id")]
    MissingDriverId,

    #[error("not connected to the realtime server")]
    NotConnected,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("failed to encode {event}: {source}")]
    Encode {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("outbound queue closed")]
    Closed,
}

/// Bidirectional event transport to the realtime server.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Open the connection for `identity` and return the inbound stream.
    async fn connect(&self, identity: &DriverIdentity) -> Result<InboundReceiver, ChannelError>;

    /// Close the connection. Safe to call when not connected.
    async fn disconnect(&self);

    /// Queue an event for the server. Never blocks.
    fn emit(&self, event: OutboundEvent) -> Result<(), ChannelError>;

    fn is_connected(&self) -> bool;
}

#[cfg(any(test, feature = "test-helpers"))]
pub use recording::RecordingChannel;

#[cfg(any(test, feature = "test-helpers"))]
mod recording {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    #[derive(Debug, Default)]
    struct RecordingState {
        connected: bool,
        fail_connect: bool,
        connect_calls: usize,
        emitted: Vec<OutboundEvent>,
        inbound: Option<mpsc::Sender<InboundEvent>>,
    }

    /// In-memory channel for tests: records what is emitted and lets the
    /// test push server events.
    #[derive(Debug, Default)]
    pub struct RecordingChannel {
        state: Mutex<RecordingState>,
    }

    impl RecordingChannel {
        pub fn new() -> Self {
            Self::default()
        }

        /// Already connected, for driving a session without the runtime.
        pub fn connected() -> Self {
            let channel = Self::default();
            channel.state().connected = true;
            channel
        }

        /// Every connect attempt fails.
        pub fn failing() -> Self {
            let channel = Self::default();
            channel.state().fail_connect = true;
            channel
        }

        fn state(&self) -> MutexGuard<'_, RecordingState> {
            self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        pub fn emitted(&self) -> Vec<OutboundEvent> {
            self.state().emitted.clone()
        }

        pub fn take_emitted(&self) -> Vec<OutboundEvent> {
            std::mem::take(&mut self.state().emitted)
        }

        pub fn connect_calls(&self) -> usize {
            self.state().connect_calls
        }

        /// The server side closes the link: the inbound stream ends.
        pub fn drop_connection(&self) {
            let mut state = self.state();
            state.connected = false;
            state.inbound = None;
        }

        /// Push a server event to the connected session.
        pub fn inject(&self, event: InboundEvent) -> bool {
            match &self.state().inbound {
                Some(tx) => tx.try_send(event).is_ok(),
                None => false,
            }
        }
    }

    #[async_trait]
    impl RealtimeChannel for RecordingChannel {
        async fn connect(&self, identity: &DriverIdentity) -> Result<InboundReceiver, ChannelError> {
            let mut state = self.state();
            state.connect_calls += 1;
            if identity.driver_id.is_empty() {
                return Err(ChannelError::MissingDriverId);
            }
            if state.fail_connect {
                return Err(ChannelError::Connection("refused".to_string()));
            }
            let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
            state.inbound = Some(tx);
            state.connected = true;
            Ok(rx)
        }

        async fn disconnect(&self) {
            let mut state = self.state();
            state.connected = false;
            state.inbound = None;
        }

        fn emit(&self, event: OutboundEvent) -> Result<(), ChannelError> {
            let mut state = self.state();
            if !state.connected {
                return Err(ChannelError::NotConnected);
            }
            state.emitted.push(event);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.state().connected
        }
    }
}
