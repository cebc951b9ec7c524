//! Debounced node position writes.
//!
//! Dragging a node produces a stream of position updates. Writing each one
//! to SQLite is wasteful, so updates are buffered per conversation (latest
//! position per node wins) and written when a buffer grows past
//! `max_pending` nodes or gets older than `max_age`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use edaha_types::{ConversationId, NodeId, Position};

use crate::SharedDb;
use crate::error::KernelResult;

/// Configuration for position batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Buffered nodes per conversation before forcing a flush.
    pub max_pending: usize,
    /// Maximum time to hold buffered positions, in milliseconds.
    pub max_age_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            max_pending: 64,
            max_age_ms: 250,
        }
    }
}

impl FlushConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

/// Pending positions for one conversation.
#[derive(Debug)]
struct PositionBuffer {
    positions: IndexMap<NodeId, Position>,
    /// When the first unflushed update arrived.
    since: Instant,
}

impl PositionBuffer {
    fn new() -> Self {
        Self {
            positions: IndexMap::new(),
            since: Instant::now(),
        }
    }

    fn should_flush(&self, config: &FlushConfig) -> bool {
        self.positions.len() >= config.max_pending || self.since.elapsed() >= config.max_age()
    }

    fn take(&mut self) -> Vec<(NodeId, Position)> {
        self.since = Instant::now();
        self.positions.drain(..).collect()
    }
}

/// Buffers position updates and writes them to the database in batches.
pub struct PositionBatcher {
    db: SharedDb,
    config: FlushConfig,
    buffers: Arc<Mutex<HashMap<ConversationId, PositionBuffer>>>,
}

impl PositionBatcher {
    pub fn new(db: SharedDb) -> Self {
        Self::with_config(db, FlushConfig::default())
    }

    pub fn with_config(db: SharedDb, config: FlushConfig) -> Self {
        Self {
            db,
            config,
            buffers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Buffer updates for a conversation.
    ///
    /// Returns `true` if the buffer was flushed to the database.
    pub fn record(&self, conversation_id: ConversationId, updates: &[(NodeId, Position)]) -> KernelResult<bool> {
        let should_flush = {
            let mut buffers = self.buffers.lock();
            let buffer = buffers.entry(conversation_id).or_insert_with(PositionBuffer::new);
            if buffer.positions.is_empty() {
                buffer.since = Instant::now();
            }
            for (id, pos) in updates {
                buffer.positions.insert(*id, *pos);
            }
            buffer.should_flush(&self.config)
        };

        if should_flush {
            self.flush_conversation(conversation_id)?;
        }
        Ok(should_flush)
    }

    /// Write a conversation's buffer now. Returns the number of rows updated.
    ///
    /// If the write fails the positions stay buffered for the next flush.
    pub fn flush_conversation(&self, conversation_id: ConversationId) -> KernelResult<usize> {
        let pending = {
            let mut buffers = self.buffers.lock();
            match buffers.get_mut(&conversation_id) {
                Some(buffer) if !buffer.positions.is_empty() => buffer.take(),
                _ => return Ok(0),
            }
        };

        let written = match self.db.lock().update_positions(&pending) {
            Ok(written) => written,
            Err(e) => {
                self.restore(conversation_id, pending);
                return Err(e.into());
            }
        };
        tracing::debug!(
            conversation = %conversation_id,
            pending = pending.len(),
            written,
            "flushed node positions"
        );
        Ok(written)
    }

    /// Put back positions from a failed write. Updates recorded since win.
    fn restore(&self, conversation_id: ConversationId, pending: Vec<(NodeId, Position)>) {
        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(conversation_id).or_insert_with(PositionBuffer::new);
        for (id, pos) in pending {
            buffer.positions.entry(id).or_insert(pos);
        }
    }

    /// Flush every buffer that has outlived `max_age`.
    pub fn flush_due(&self) -> KernelResult<usize> {
        let due: Vec<ConversationId> = {
            let buffers = self.buffers.lock();
            buffers
                .iter()
                .filter(|(_, b)| !b.positions.is_empty() && b.should_flush(&self.config))
                .map(|(id, _)| *id)
                .collect()
        };

        let mut written = 0;
        for id in due {
            written += self.flush_conversation(id)?;
        }
        Ok(written)
    }

    /// Flush all pending buffers.
    pub fn flush_all(&self) -> KernelResult<usize> {
        let ids: Vec<ConversationId> = self.buffers.lock().keys().copied().collect();
        let mut written = 0;
        for id in ids {
            written += self.flush_conversation(id)?;
        }
        Ok(written)
    }

    /// Drop buffered updates for nodes that no longer exist.
    pub fn forget_nodes(&self, conversation_id: ConversationId, nodes: &[NodeId]) {
        let mut buffers = self.buffers.lock();
        if let Some(buffer) = buffers.get_mut(&conversation_id) {
            for id in nodes {
                buffer.positions.shift_remove(id);
            }
        }
    }

    /// Drop a conversation's buffer without writing it.
    pub fn forget_conversation(&self, conversation_id: ConversationId) {
        self.buffers.lock().remove(&conversation_id);
    }

    /// Get current buffer stats for debugging.
    pub fn stats(&self) -> BatcherStats {
        let buffers = self.buffers.lock();
        let mut pending_positions = 0;
        let mut oldest = Duration::ZERO;

        for buffer in buffers.values().filter(|b| !b.positions.is_empty()) {
            pending_positions += buffer.positions.len();
            oldest = oldest.max(buffer.since.elapsed());
        }

        BatcherStats {
            active_buffers: buffers.values().filter(|b| !b.positions.is_empty()).count(),
            pending_positions,
            oldest_buffer_age: oldest,
        }
    }
}

/// Spawn a task that flushes due buffers every `interval`.
pub fn spawn_flusher(batcher: Arc<PositionBatcher>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = batcher.flush_due() {
                tracing::warn!(error = %e, "background position flush failed");
            }
        }
    })
}

/// Statistics about the batcher's current state.
#[derive(Debug, Clone)]
pub struct BatcherStats {
    /// Conversations with unflushed positions.
    pub active_buffers: usize,
    pub pending_positions: usize,
    /// Age of the oldest unflushed buffer.
    pub oldest_buffer_age: Duration,
}
