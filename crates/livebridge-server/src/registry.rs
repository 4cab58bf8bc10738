//! Session ID → bridge mapping.

use std::sync::Arc;

use dashmap::DashMap;
use livebridge_core::ClientSession;
use tracing::{debug, warn};

use crate::bridge::{BridgeContext, BridgeHandle, spawn_bridge};

/// Registry of live bridges, safe for concurrent lookup.
pub struct BridgeRegistry {
    bridges: DashMap<String, BridgeHandle>,
    ctx: BridgeContext,
}

impl BridgeRegistry {
    /// Create an empty registry whose bridges share `ctx`.
    pub fn new(ctx: BridgeContext) -> Self {
        Self {
            bridges: DashMap::new(),
            ctx,
        }
    }

    /// Spawn a bridge for `session` and register it.
    ///
    /// A bridge already registered under the same ID is torn down first.
    pub fn create(&self, session: Arc<dyn ClientSession>) -> BridgeHandle {
        let session_id = session.id().to_string();
        let (handle, _task) = spawn_bridge(session, self.ctx.clone());
        if let Some(previous) = self.bridges.insert(session_id.clone(), handle.clone()) {
            warn!(session_id, "replacing existing bridge");
            let _ = previous.teardown("replaced by new session");
        }
        debug!(session_id, "bridge registered");
        handle
    }

    /// Look up a bridge.
    pub fn get(&self, session_id: &str) -> Option<BridgeHandle> {
        self.bridges.get(session_id).map(|entry| entry.value().clone())
    }

    /// Unregister a bridge, returning it if present.
    pub fn remove(&self, session_id: &str) -> Option<BridgeHandle> {
        self.bridges.remove(session_id).map(|(_, handle)| handle)
    }

    /// Number of registered bridges.
    pub fn count(&self) -> usize {
        self.bridges.len()
    }

    /// Registered session IDs.
    pub fn session_ids(&self) -> Vec<String> {
        self.bridges.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Unregister every bridge and ask each to tear down.
    pub fn teardown_all(&self, reason: &str) -> usize {
        let mut count = 0;
        for session_id in self.session_ids() {
            if let Some(handle) = self.remove(&session_id) {
                let _ = handle.teardown(reason);
                count += 1;
            }
        }
        count
    }
}
