//! Chain serializer
//!
//! A [`Chain`] owns one layer's state and applies operations one at a time,
//! the way a block applies transactions: the operation runs against a copy,
//! and only a successful result is persisted and committed. An error leaves
//! the committed state exactly as it was.
//!
//! Several [`Chain`] handles may share one store (a CLI and a relayer on the
//! same state directory). Each commit runs against the latest stored
//! snapshot under the store's lock, so a handle holding an older copy
//! catches up instead of overwriting newer commits.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::store::StateStore;
use crate::types::Layer;

#[derive(Serialize)]
struct SnapshotRef<'a, S> {
    height: u64,
    state: &'a S,
}

#[derive(Deserialize)]
struct Snapshot<S> {
    height: u64,
    state: S,
}

#[derive(Deserialize)]
struct SnapshotHeight {
    height: u64,
}

/// All-or-nothing wrapper around a layer's state
#[derive(Debug)]
pub struct Chain<S> {
    layer: Layer,
    height: u64,
    state: S,
    store: Arc<dyn StateStore>,
}

impl<S> Chain<S>
where
    S: Clone + Serialize + DeserializeOwned,
{
    /// Load the persisted state of `layer`, or create and persist it with
    /// `genesis` when the store has none.
    pub fn open(layer: Layer, store: Arc<dyn StateStore>, genesis: impl FnOnce() -> S) -> Result<Self> {
        let mut genesis = Some(genesis);
        let mut opened: Option<(u64, S)> = None;
        store.update(layer, &mut |current| match current {
            Some(bytes) => {
                let snapshot: Snapshot<S> = serde_json::from_slice(bytes)?;
                debug!(layer = %layer, height = snapshot.height, "Restored chain state");
                opened = Some((snapshot.height, snapshot.state));
                Ok(None)
            }
            None => {
                let genesis = genesis.take().ok_or_else(reentered)?;
                let state = genesis();
                let bytes = encode(&state, 0)?;
                debug!(layer = %layer, "Initialized chain state");
                opened = Some((0, state));
                Ok(Some(bytes))
            }
        })?;

        let (height, state) = opened.ok_or_else(reentered)?;
        Ok(Self {
            layer,
            height,
            state,
            store,
        })
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// Number of committed operations
    pub fn height(&self) -> u64 {
        self.height
    }

    /// State as of the last commit or [`Chain::refresh`] through this handle
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Adopt the stored snapshot when another handle committed since this
    /// one last looked. Returns whether anything changed.
    pub fn refresh(&mut self) -> Result<bool> {
        let Some(bytes) = self.store.load(self.layer)? else {
            return Ok(false);
        };
        match self.newer_snapshot(&bytes)? {
            Some((height, state)) => {
                self.height = height;
                self.state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply `operation` atomically to the latest stored state. On error
    /// nothing is committed or persisted.
    pub fn execute<T>(&mut self, operation: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        let layer = self.layer;
        let mut operation = Some(operation);
        let mut latest: Option<(u64, S)> = None;
        let mut committed: Option<(u64, S, T)> = None;

        let this = &*self;
        let result = this.store.update(layer, &mut |current| {
            if let Some(bytes) = current {
                latest = this.newer_snapshot(bytes)?;
            }
            let (base_height, mut next) = match &latest {
                Some((height, state)) => (*height, state.clone()),
                None => (this.height, this.state.clone()),
            };

            let operation = operation.take().ok_or_else(reentered)?;
            let output = match operation(&mut next) {
                Ok(output) => output,
                Err(e) => {
                    debug!(layer = %layer, height = base_height, error = %e, "Operation reverted");
                    return Err(e);
                }
            };

            let height = base_height + 1;
            let bytes = encode(&next, height)?;
            committed = Some((height, next, output));
            Ok(Some(bytes))
        });

        if let Some((height, state)) = latest {
            self.height = height;
            self.state = state;
        }
        result?;

        let (height, state, output) = committed.ok_or_else(reentered)?;
        self.height = height;
        self.state = state;
        Ok(output)
    }

    fn newer_snapshot(&self, bytes: &[u8]) -> Result<Option<(u64, S)>> {
        let stored: SnapshotHeight = serde_json::from_slice(bytes)?;
        if stored.height == self.height {
            return Ok(None);
        }
        let snapshot: Snapshot<S> = serde_json::from_slice(bytes)?;
        debug!(
            layer = %self.layer,
            from = self.height,
            to = snapshot.height,
            "Caught up with stored chain state"
        );
        Ok(Some((snapshot.height, snapshot.state)))
    }
}

fn encode<S: Serialize>(state: &S, height: u64) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(&SnapshotRef { height, state })?)
}

fn reentered() -> BridgeError {
    BridgeError::Storage {
        reason: "state store invoked an update more than once".to_string(),
    }
}
