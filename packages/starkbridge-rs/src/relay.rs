//! Relay Driver
//!
//! The boundary between the bridge and whatever carries messages across:
//! observe what a chain emitted, then submit the consume on the other side.
//! [`DevnetRelay`] drives an in-process [`Devnet`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::devnet::Devnet;
use crate::error::Result;
use crate::messaging::PendingMessage;
use crate::types::{Layer, Settlement};

/// Message transport between the layers
#[async_trait]
pub trait RelayDriver: Send + Sync {
    /// Deliver the messages `origin` emitted since the last call and return
    /// them. Each message is returned once.
    async fn observe_outbox(&self, origin: Layer) -> Result<Vec<PendingMessage>>;

    /// Messages delivered to `destination` and not yet consumed, including
    /// ones observed by an earlier relayer run that never settled them.
    async fn pending_inbox(&self, destination: Layer) -> Result<Vec<PendingMessage>>;

    /// Consume a delivered message on its destination chain.
    ///
    /// Resubmitting a settled message fails with `UnknownMessage`.
    async fn submit_consume(&self, message: &PendingMessage) -> Result<Settlement>;
}

/// [`RelayDriver`] over a shared devnet
#[derive(Clone)]
pub struct DevnetRelay {
    devnet: Arc<Mutex<Devnet>>,
}

impl DevnetRelay {
    pub fn new(devnet: Arc<Mutex<Devnet>>) -> Self {
        Self { devnet }
    }

    pub fn devnet(&self) -> Arc<Mutex<Devnet>> {
        self.devnet.clone()
    }
}

#[async_trait]
impl RelayDriver for DevnetRelay {
    async fn observe_outbox(&self, origin: Layer) -> Result<Vec<PendingMessage>> {
        self.devnet.lock().await.deliver_outbox(origin)
    }

    async fn pending_inbox(&self, destination: Layer) -> Result<Vec<PendingMessage>> {
        self.devnet.lock().await.pending_inbox(destination)
    }

    async fn submit_consume(&self, message: &PendingMessage) -> Result<Settlement> {
        self.devnet.lock().await.submit_consume(message)
    }
}
