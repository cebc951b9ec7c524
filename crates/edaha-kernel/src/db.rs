//! SQLite persistence for conversation graphs.
//!
//! One row per conversation, message, node and edge. Deleting a conversation
//! cascades to everything it owns; deleting a node cascades to its edges.

use std::path::Path;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{Connection, Result as SqliteResult, params};

use edaha_graph::DeletionPlan;
use edaha_types::{
    Conversation, ConversationId, Edge, Message, Node, NodeId, NodeKind, Position, Viewport,
};

/// Database handle for graph persistence.
pub struct GraphDb {
    conn: Connection,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    system_instruction TEXT,
    viewport_x REAL NOT NULL DEFAULT 0,
    viewport_y REAL NOT NULL DEFAULT 0,
    viewport_zoom REAL NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_conversations_created ON conversations(created_at DESC);

-- Stored text behind nodes; context_ranges is a JSON array
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    author TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    context_ranges TEXT NOT NULL DEFAULT '[]',
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);

CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    message_id TEXT,
    type TEXT NOT NULL,
    label TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    pos_x REAL,
    pos_y REAL,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE SET NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_conversation ON nodes(conversation_id, created_at);

CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (source) REFERENCES nodes(id) ON DELETE CASCADE,
    FOREIGN KEY (target) REFERENCES nodes(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_edges_conversation ON edges(conversation_id);
"#;

// =============================================================================
// Row helpers
// =============================================================================

/// Parse a typed id (or kind) out of a text column.
fn parse_column<T>(idx: usize, raw: &str) -> SqliteResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_optional<T>(idx: usize, raw: Option<String>) -> SqliteResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|s| parse_column(idx, &s)).transpose()
}

fn parse_kind(idx: usize, raw: &str) -> SqliteResult<NodeKind> {
    NodeKind::from_str(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unknown node kind: {raw}").into())
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> SqliteResult<Conversation> {
    let id: String = row.get(0)?;
    Ok(Conversation {
        id: parse_column(0, &id)?,
        title: row.get(1)?,
        created_at: row.get::<_, i64>(2)? as u64,
        system_instruction: row.get(3)?,
        viewport: Viewport {
            x: row.get(4)?,
            y: row.get(5)?,
            zoom: row.get(6)?,
        },
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, title, created_at, system_instruction, viewport_x, viewport_y, viewport_zoom";

impl GraphDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqliteResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    pub fn insert_conversation(&self, conv: &Conversation) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO conversations (id, title, created_at, system_instruction, viewport_x, viewport_y, viewport_zoom)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                conv.id.to_string(),
                conv.title,
                conv.created_at as i64,
                conv.system_instruction,
                conv.viewport.x,
                conv.viewport.y,
                conv.viewport.zoom,
            ],
        )?;
        Ok(())
    }

    /// Load a conversation's metadata.
    pub fn conversation(&self, id: ConversationId) -> SqliteResult<Option<Conversation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_conversation(row)?)),
            None => Ok(None),
        }
    }

    /// All conversations, newest first.
    pub fn list_conversations(&self) -> SqliteResult<Vec<Conversation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_conversation)?;
        rows.collect()
    }

    pub fn exists(&self, id: ConversationId) -> SqliteResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM conversations WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Returns whether a row was updated.
    pub fn update_title(&self, id: ConversationId, title: &str) -> SqliteResult<bool> {
        let changed = self.conn.execute(
            "UPDATE conversations SET title = ?2 WHERE id = ?1",
            params![id.to_string(), title],
        )?;
        Ok(changed > 0)
    }

    pub fn update_system_instruction(&self, id: ConversationId, instruction: Option<&str>) -> SqliteResult<bool> {
        let changed = self.conn.execute(
            "UPDATE conversations SET system_instruction = ?2 WHERE id = ?1",
            params![id.to_string(), instruction],
        )?;
        Ok(changed > 0)
    }

    pub fn update_viewport(&self, id: ConversationId, viewport: Viewport) -> SqliteResult<bool> {
        let changed = self.conn.execute(
            "UPDATE conversations SET viewport_x = ?2, viewport_y = ?3, viewport_zoom = ?4 WHERE id = ?1",
            params![id.to_string(), viewport.x, viewport.y, viewport.zoom],
        )?;
        Ok(changed > 0)
    }

    /// Delete a conversation and everything it owns.
    pub fn delete_conversation(&self, id: ConversationId) -> SqliteResult<bool> {
        // Foreign key cascade handles messages, nodes and edges
        let changed = self
            .conn
            .execute("DELETE FROM conversations WHERE id = ?1", params![id.to_string()])?;
        Ok(changed > 0)
    }

    // =========================================================================
    // Graph rows
    // =========================================================================

    /// Nodes of a conversation in creation order.
    pub fn load_nodes(&self, conversation_id: ConversationId) -> SqliteResult<Vec<Node>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, message_id, type, label, created_at, pos_x, pos_y
             FROM nodes WHERE conversation_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let message_id: Option<String> = row.get(1)?;
            let kind: String = row.get(2)?;
            let pos_x: Option<f64> = row.get(5)?;
            let pos_y: Option<f64> = row.get(6)?;

            Ok(Node {
                id: parse_column(0, &id)?,
                conversation_id,
                kind: parse_kind(2, &kind)?,
                text: row.get(3)?,
                created_at: row.get::<_, i64>(4)? as u64,
                position: match (pos_x, pos_y) {
                    (Some(x), Some(y)) => Some(Position::new(x, y)),
                    _ => None,
                },
                source_message_id: parse_optional(1, message_id)?,
            })
        })?;
        rows.collect()
    }

    pub fn load_edges(&self, conversation_id: ConversationId) -> SqliteResult<Vec<Edge>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source, target, created_at
             FROM edges WHERE conversation_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let source: String = row.get(1)?;
            let target: String = row.get(2)?;
            Ok(Edge {
                id: parse_column(0, &id)?,
                conversation_id,
                source: parse_column(1, &source)?,
                target: parse_column(2, &target)?,
                created_at: row.get::<_, i64>(3)? as u64,
            })
        })?;
        rows.collect()
    }

    pub fn load_messages(&self, conversation_id: ConversationId) -> SqliteResult<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, author, content, created_at, context_ranges
             FROM messages WHERE conversation_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![conversation_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let author: String = row.get(1)?;
            let ranges: String = row.get(4)?;
            let context_ranges = Message::parse_context_ranges(&ranges).unwrap_or_else(|e| {
                tracing::warn!(message = %id, error = %e, "unreadable context ranges; ignoring");
                Vec::new()
            });
            Ok(Message {
                id: parse_column(0, &id)?,
                conversation_id,
                author: parse_kind(1, &author)?,
                content: row.get(2)?,
                created_at: row.get::<_, i64>(3)? as u64,
                context_ranges,
            })
        })?;
        rows.collect()
    }

    /// Write messages, nodes and edges in one transaction.
    ///
    /// Messages go first so nodes can reference them; nodes before the
    /// edges that point at them.
    pub fn insert_records(&self, messages: &[Message], nodes: &[Node], edges: &[Edge]) -> SqliteResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        for msg in messages {
            let ranges = msg
                .context_ranges_json()
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, author, content, created_at, context_ranges)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.id.to_string(),
                    msg.conversation_id.to_string(),
                    msg.author.as_str(),
                    msg.content,
                    msg.created_at as i64,
                    ranges,
                ],
            )?;
        }

        for node in nodes {
            tx.execute(
                "INSERT INTO nodes (id, conversation_id, message_id, type, label, created_at, pos_x, pos_y)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    node.id.to_string(),
                    node.conversation_id.to_string(),
                    node.source_message_id.map(|m| m.to_string()),
                    node.kind.as_str(),
                    node.text,
                    node.created_at as i64,
                    node.position.map(|p| p.x),
                    node.position.map(|p| p.y),
                ],
            )?;
        }

        for edge in edges {
            tx.execute(
                "INSERT INTO edges (id, conversation_id, source, target, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    edge.id.to_string(),
                    edge.conversation_id.to_string(),
                    edge.source.to_string(),
                    edge.target.to_string(),
                    edge.created_at as i64,
                ],
            )?;
        }

        tx.commit()
    }

    /// Rewrite a node's text and, when given, its message's content and
    /// context ranges; delete `stale` in the same transaction.
    pub fn apply_edit(&self, node: &Node, message: Option<&Message>, stale: &DeletionPlan) -> SqliteResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE nodes SET label = ?2 WHERE id = ?1",
            params![node.id.to_string(), node.text],
        )?;
        if let Some(msg) = message {
            let ranges = msg
                .context_ranges_json()
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                "UPDATE messages SET content = ?2, context_ranges = ?3 WHERE id = ?1",
                params![msg.id.to_string(), msg.content, ranges],
            )?;
        }
        Self::delete_plan(&tx, stale)?;
        tx.commit()
    }

    /// Delete the nodes and messages named by a plan. Edges cascade.
    pub fn delete_nodes(&self, plan: &DeletionPlan) -> SqliteResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        Self::delete_plan(&tx, plan)?;
        tx.commit()
    }

    fn delete_plan(tx: &rusqlite::Transaction<'_>, plan: &DeletionPlan) -> SqliteResult<()> {
        for id in &plan.message_ids {
            tx.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        }
        for id in &plan.node_ids {
            tx.execute("DELETE FROM nodes WHERE id = ?1", params![id.to_string()])?;
        }
        Ok(())
    }

    /// Store node positions. Unknown nodes are skipped; returns how many rows changed.
    pub fn update_positions(&self, positions: &[(NodeId, Position)]) -> SqliteResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare("UPDATE nodes SET pos_x = ?2, pos_y = ?3 WHERE id = ?1")?;
            for (id, pos) in positions {
                changed += stmt.execute(params![id.to_string(), pos.x, pos.y])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Node count across all conversations.
    pub fn node_count(&self) -> SqliteResult<usize> {
        self.conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get::<_, i64>(0))
            .map(|c| c as usize)
    }
}
