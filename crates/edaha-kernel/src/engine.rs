//! The conversation engine.
//!
//! [`GraphEngine`] owns one cached [`Snapshot`] per conversation behind an
//! async mutex. Every command on a conversation takes that mutex, so commands
//! on the same conversation run one at a time and never observe a
//! half-applied change. Commands work on copies of the graph and layout,
//! write to SQLite, and only then swap the copies in; a failed command leaves
//! both the database and the cache as they were.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use kurbo::Size;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};

use edaha_graph::placement::{to_point, to_position};
use edaha_graph::{
    AncestorResolver, ContextSpanTracker, ConversationGraph, Draft, GraphError, LayoutPlanner, Quote,
    Reflow, SerializedDraft, Span, locate, plan_descendant_deletion, plan_subtree_deletion, surviving_ranges,
};
use edaha_types::{
    ContextEntryId, ContextRange, Conversation, ConversationId, Edge, Message, MessageId, Node, NodeId, Position,
    Viewport, now_millis,
};

use crate::config::EngineConfig;
use crate::db::GraphDb;
use crate::error::{KernelError, KernelResult};
use crate::events::{GraphEvent, NodePosition};
use crate::llm::{self, CompletionRequest, LlmProvider, complete_with_retry};
use crate::positions::PositionBatcher;
use crate::SharedDb;

// ============================================================================
// Requests and results
// ============================================================================

/// Nodes and edges of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphView {
    pub conversation: Conversation,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// A new question to send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub content: String,
    /// Nodes the question is asked from; each attaches through its QA pair's
    /// anchor. Empty starts a new root.
    #[serde(default)]
    pub from_node_ids: Vec<NodeId>,
    /// Id to give the user node (the draft it was typed into).
    #[serde(default)]
    pub draft_node_id: Option<NodeId>,
    /// Where to put the user node. Placed automatically when absent.
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub context_ranges: Vec<ContextRange>,
}

impl ExchangeRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn from_nodes(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.from_node_ids = ids.into_iter().collect();
        self
    }

    pub fn with_draft_id(mut self, id: NodeId) -> Self {
        self.draft_node_id = Some(id);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_context_ranges(mut self, ranges: Vec<ContextRange>) -> Self {
        self.context_ranges = ranges;
        self
    }
}

/// What an exchange added to the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDelta {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResult {
    pub user_message: Message,
    pub ai_message: Message,
    pub delta: GraphDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_node_ids: Vec<NodeId>,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Cached state of one conversation.
struct Snapshot {
    conversation: Conversation,
    graph: ConversationGraph,
    messages: HashMap<MessageId, Message>,
    layout: LayoutPlanner,
    drafts: ContextSpanTracker,
    /// Latest timestamp handed out, so history order follows creation order.
    clock: u64,
}

impl Snapshot {
    fn load(db: &GraphDb, id: ConversationId, config: &EngineConfig) -> KernelResult<Self> {
        let conversation = db.conversation(id)?.ok_or(KernelError::ConversationNotFound(id))?;
        let graph = ConversationGraph::from_parts(id, db.load_nodes(id)?, db.load_edges(id)?);
        let messages: HashMap<MessageId, Message> =
            db.load_messages(id)?.into_iter().map(|m| (m.id, m)).collect();
        let clock = messages
            .values()
            .map(|m| m.created_at)
            .chain(graph.nodes().map(|n| n.created_at))
            .max()
            .unwrap_or(0);

        let violations = graph.validate();
        if !violations.is_empty() {
            tracing::warn!(conversation = %id, ?violations, "stored graph breaks invariants");
        }

        let layout = LayoutPlanner::from_graph(&graph, config.placement);
        tracing::debug!(conversation = %id, nodes = graph.len(), "loaded conversation snapshot");
        Ok(Self {
            conversation,
            graph,
            messages,
            layout,
            drafts: ContextSpanTracker::new(),
            clock,
        })
    }

    /// A timestamp strictly after every one handed out before.
    fn tick(&mut self) -> u64 {
        self.clock = now_millis().max(self.clock + 1);
        self.clock
    }

    fn require_node(&self, id: &NodeId) -> KernelResult<&Node> {
        self.graph.node(id).ok_or_else(|| GraphError::NodeNotFound(*id).into())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Command surface for conversation graphs.
pub struct GraphEngine {
    db: SharedDb,
    provider: Arc<dyn LlmProvider>,
    config: EngineConfig,
    resolver: AncestorResolver,
    snapshots: DashMap<ConversationId, Arc<Mutex<Snapshot>>>,
    positions: Arc<PositionBatcher>,
    event_tx: broadcast::Sender<GraphEvent>,
}

impl GraphEngine {
    pub fn new(db: GraphDb, provider: Arc<dyn LlmProvider>, config: EngineConfig) -> Self {
        let db: SharedDb = Arc::new(SyncMutex::new(db));
        let positions = Arc::new(PositionBatcher::with_config(db.clone(), config.positions.clone()));
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            resolver: AncestorResolver::new(config.ancestor_limit),
            db,
            provider,
            config,
            snapshots: DashMap::new(),
            positions,
            event_tx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to graph change events.
    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.event_tx.subscribe()
    }

    /// The position batcher, e.g. to run [`spawn_flusher`](crate::positions::spawn_flusher).
    pub fn positions(&self) -> Arc<PositionBatcher> {
        self.positions.clone()
    }

    /// Write all buffered positions now.
    pub fn flush_positions(&self) -> KernelResult<usize> {
        self.positions.flush_all()
    }

    fn emit(&self, event: GraphEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    async fn snapshot(&self, id: ConversationId) -> KernelResult<Arc<Mutex<Snapshot>>> {
        if let Some(entry) = self.snapshots.get(&id) {
            return Ok(entry.value().clone());
        }
        let loaded = {
            let db = self.db.lock();
            Snapshot::load(&db, id, &self.config)?
        };
        let entry = self
            .snapshots
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(loaded)));
        Ok(entry.value().clone())
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    #[tracing::instrument(skip(self, system_instruction), name = "engine.create_conversation")]
    pub fn create_conversation(
        &self,
        title: &str,
        system_instruction: Option<String>,
    ) -> KernelResult<Conversation> {
        let mut conv = Conversation::new(title);
        conv.system_instruction = system_instruction;
        self.db.lock().insert_conversation(&conv)?;
        tracing::info!(conversation = %conv.id, "created conversation");
        Ok(conv)
    }

    pub async fn conversation(&self, id: ConversationId) -> KernelResult<Conversation> {
        let snap = self.snapshot(id).await?;
        let snap = snap.lock().await;
        Ok(snap.conversation.clone())
    }

    pub fn list_conversations(&self) -> KernelResult<Vec<Conversation>> {
        Ok(self.db.lock().list_conversations()?)
    }

    #[tracing::instrument(skip(self), name = "engine.rename_conversation")]
    pub async fn rename_conversation(&self, id: ConversationId, title: &str) -> KernelResult<()> {
        let snap = self.snapshot(id).await?;
        let mut snap = snap.lock().await;
        self.db.lock().update_title(id, title)?;
        snap.conversation.title = title.to_string();
        Ok(())
    }

    #[tracing::instrument(skip(self, instruction), name = "engine.set_system_instruction")]
    pub async fn set_system_instruction(&self, id: ConversationId, instruction: Option<String>) -> KernelResult<()> {
        let snap = self.snapshot(id).await?;
        let mut snap = snap.lock().await;
        self.db.lock().update_system_instruction(id, instruction.as_deref())?;
        snap.conversation.system_instruction = instruction;
        Ok(())
    }

    pub async fn set_viewport(&self, id: ConversationId, viewport: Viewport) -> KernelResult<()> {
        let snap = self.snapshot(id).await?;
        let mut snap = snap.lock().await;
        self.db.lock().update_viewport(id, viewport)?;
        snap.conversation.viewport = viewport;
        Ok(())
    }

    /// Delete a conversation and everything in it. Returns whether it existed.
    #[tracing::instrument(skip(self), name = "engine.delete_conversation")]
    pub async fn delete_conversation(&self, id: ConversationId) -> KernelResult<bool> {
        // Hold the conversation lock (when cached) so no command races the delete.
        let cached = self.snapshots.get(&id).map(|e| e.value().clone());
        let _guard = match &cached {
            Some(snap) => Some(snap.lock().await),
            None => None,
        };

        self.positions.forget_conversation(id);
        let existed = self.db.lock().delete_conversation(id)?;
        self.snapshots.remove(&id);
        if existed {
            tracing::info!(conversation = %id, "deleted conversation");
            self.emit(GraphEvent::ConversationDeleted { conversation_id: id });
        }
        Ok(existed)
    }

    // ========================================================================
    // Graph commands
    // ========================================================================

    pub async fn get_graph(&self, id: ConversationId) -> KernelResult<GraphView> {
        let snap = self.snapshot(id).await?;
        let snap = snap.lock().await;
        Ok(GraphView {
            conversation: snap.conversation.clone(),
            nodes: snap.graph.nodes().cloned().collect(),
            edges: snap.graph.edges().to_vec(),
        })
    }

    /// Ask a question and record it with the AI's answer.
    ///
    /// The AI is called first. Only when it answers are the user message,
    /// user node, AI message, AI node and edges written, all in one
    /// transaction. If the AI fails after all attempts nothing is recorded.
    #[tracing::instrument(skip(self, request), name = "engine.create_exchange", fields(conversation = %conversation_id))]
    pub async fn create_exchange(
        &self,
        conversation_id: ConversationId,
        request: ExchangeRequest,
    ) -> KernelResult<ExchangeResult> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;
        self.exchange_locked(&mut snap, request).await
    }

    async fn exchange_locked(&self, snap: &mut Snapshot, request: ExchangeRequest) -> KernelResult<ExchangeResult> {
        let conversation_id = snap.conversation.id;
        if request.content.trim().is_empty() {
            return Err(KernelError::InvalidRequest("question text is empty".into()));
        }
        // A question follows the whole pair it was asked from: the answer
        // when there is one.
        let mut parents: Vec<NodeId> = Vec::with_capacity(request.from_node_ids.len());
        for id in &request.from_node_ids {
            snap.require_node(id)?;
            let anchor = snap.graph.anchor_of(id).unwrap_or(*id);
            if !parents.contains(&anchor) {
                parents.push(anchor);
            }
        }
        if let Some(id) = request.draft_node_id.filter(|id| snap.graph.contains(id)) {
            return Err(GraphError::DuplicateNode(id).into());
        }

        let asked_at = snap.tick();
        let user_message = Message::user(conversation_id, &request.content)
            .with_context_ranges(request.context_ranges.clone())
            .with_created_at(asked_at);
        let mut user_node = Node::user(conversation_id, &request.content)
            .with_message(user_message.id)
            .with_created_at(asked_at);
        if let Some(id) = request.draft_node_id {
            user_node = user_node.with_id(id);
        }

        // History first: everything the question draws from, then the question.
        let mut history: Vec<llm::Message> = self
            .resolver
            .resolve(&snap.graph, &snap.messages, &parents)
            .iter()
            .map(llm::Message::from)
            .collect();
        history.push(llm::Message::user(&request.content));

        let llm_config = &self.config.llm;
        let mut completion = CompletionRequest::new(&llm_config.model, history).with_max_tokens(llm_config.max_tokens);
        if let Some(system) = &snap.conversation.system_instruction {
            completion = completion.with_system(system);
        }
        if let Some(temperature) = llm_config.temperature {
            completion = completion.with_temperature(temperature);
        }

        let response = complete_with_retry(self.provider.as_ref(), &completion, llm_config.attempts).await?;

        let ai_message = Message::ai(conversation_id, &response.content).with_created_at(snap.tick());
        let mut ai_node = Node::ai(conversation_id, &response.content)
            .with_message(ai_message.id)
            .with_created_at(ai_message.created_at);

        // Work on copies; they replace the cached state only after the write.
        let mut layout = snap.layout.clone();
        let user_position = match request.position {
            Some(pos) => {
                layout.insert(user_node.id, to_point(pos), None);
                pos
            }
            None => layout
                .place_provisional(user_node.id, parents.first().copied(), None)
                .position(),
        };
        user_node = user_node.with_position(user_position);
        let ai_position = layout.place_provisional(ai_node.id, Some(user_node.id), None).position();
        ai_node = ai_node.with_position(ai_position);

        let mut graph = snap.graph.clone();
        let mut edges = graph.insert_node(user_node.clone(), &parents)?;
        edges.extend(graph.insert_node(ai_node.clone(), &[user_node.id])?);

        self.db.lock().insert_records(
            &[user_message.clone(), ai_message.clone()],
            &[user_node.clone(), ai_node.clone()],
            &edges,
        )?;

        snap.graph = graph;
        snap.layout = layout;
        snap.messages.insert(user_message.id, user_message.clone());
        snap.messages.insert(ai_message.id, ai_message.clone());
        if let Some(id) = request.draft_node_id {
            snap.drafts.discard(&id);
        }

        tracing::info!(
            conversation = %conversation_id,
            user_node = %user_node.id,
            ai_node = %ai_node.id,
            parents = parents.len(),
            model = %response.model,
            "recorded exchange"
        );
        self.emit(GraphEvent::ExchangeCreated {
            conversation_id,
            user_node: user_node.clone(),
            ai_node: ai_node.clone(),
            edges: edges.clone(),
        });

        Ok(ExchangeResult {
            user_message,
            ai_message,
            delta: GraphDelta {
                nodes: vec![user_node, ai_node],
                edges,
            },
        })
    }

    /// Rewrite a question. Its answer and everything that followed from it
    /// are stale and get deleted; joined nodes with another live parent
    /// further down survive.
    #[tracing::instrument(skip(self, new_content), name = "engine.edit_node")]
    pub async fn edit_node(
        &self,
        conversation_id: ConversationId,
        node_id: NodeId,
        new_content: &str,
    ) -> KernelResult<Node> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;

        let node = snap.require_node(&node_id)?;
        if !node.is_user() {
            return Err(GraphError::NotAUserNode {
                id: node_id,
                kind: node.kind,
            }
            .into());
        }
        if new_content.trim().is_empty() {
            return Err(KernelError::InvalidRequest("question text is empty".into()));
        }

        let mut edited = node.clone();
        edited.text = new_content.to_string();
        let message = edited.source_message_id.and_then(|id| snap.messages.get(&id)).map(|old| {
            let mut message = old.clone();
            message.context_ranges = surviving_ranges(&old.content, new_content, &old.context_ranges);
            message.content = new_content.to_string();
            message
        });
        let stale = plan_descendant_deletion(&snap.graph, &node_id);

        self.db.lock().apply_edit(&edited, message.as_ref(), &stale)?;

        snap.graph.set_text(&node_id, new_content)?;
        snap.graph.apply_deletion(&stale);
        if let Some(message) = message {
            snap.messages.insert(message.id, message);
        }
        self.forget(&mut snap, &stale.node_ids, &stale.message_ids);

        tracing::info!(
            conversation = %conversation_id,
            node = %node_id,
            deleted = stale.len(),
            "edited question"
        );
        self.emit(GraphEvent::NodeEdited {
            conversation_id,
            node_id,
            deleted: stale.node_ids,
        });
        Ok(edited)
    }

    /// Delete a node and the descendants that hang only off it.
    ///
    /// Deleting a node that does not exist deletes nothing.
    #[tracing::instrument(skip(self), name = "engine.delete_node")]
    pub async fn delete_node(&self, conversation_id: ConversationId, node_id: NodeId) -> KernelResult<DeleteResult> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;

        let plan = plan_subtree_deletion(&snap.graph, &node_id);
        if plan.is_empty() {
            tracing::debug!(node = %node_id, "delete of unknown node ignored");
            return Ok(DeleteResult::default());
        }

        self.db.lock().delete_nodes(&plan)?;
        snap.graph.apply_deletion(&plan);
        self.forget(&mut snap, &plan.node_ids, &plan.message_ids);

        tracing::info!(conversation = %conversation_id, node = %node_id, deleted = plan.len(), "deleted subtree");
        self.emit(GraphEvent::NodesDeleted {
            conversation_id,
            node_ids: plan.node_ids.clone(),
        });
        Ok(DeleteResult {
            deleted_node_ids: plan.node_ids,
        })
    }

    /// Drop cached state for deleted nodes.
    fn forget(&self, snap: &mut Snapshot, nodes: &[NodeId], messages: &[MessageId]) {
        for id in messages {
            snap.messages.remove(id);
        }
        for id in nodes {
            snap.layout.remove(id);
        }
        let orphaned: Vec<NodeId> = snap
            .drafts
            .drafts()
            .filter(|d| d.anchor.is_some_and(|a| nodes.contains(&a)))
            .map(|d| d.id)
            .collect();
        for id in orphaned {
            snap.drafts.discard(&id);
        }
        self.positions.forget_nodes(snap.conversation.id, nodes);
    }

    /// Move nodes. The cache updates at once; database writes are batched.
    /// Unknown nodes are skipped. Returns how many positions were applied.
    ///
    /// A failed batch write is not a command failure: the positions stay
    /// buffered and go out with the next flush.
    #[tracing::instrument(skip(self, positions), name = "engine.update_node_positions")]
    pub async fn update_node_positions(
        &self,
        conversation_id: ConversationId,
        positions: &[NodePosition],
    ) -> KernelResult<usize> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;

        let (applied, unknown): (Vec<NodePosition>, Vec<NodePosition>) =
            positions.iter().copied().partition(|p| snap.graph.contains(&p.node_id));
        for update in &unknown {
            tracing::debug!(node = %update.node_id, "position for unknown node ignored");
        }
        if applied.is_empty() {
            return Ok(0);
        }

        let pending: Vec<(NodeId, Position)> = applied.iter().map(|p| (p.node_id, p.position())).collect();
        if let Err(e) = self.positions.record(conversation_id, &pending) {
            tracing::warn!(conversation = %conversation_id, error = %e, "position flush failed, kept buffered");
        }

        for (id, pos) in &pending {
            snap.graph.set_position(id, *pos)?;
            snap.layout.move_to(id, to_point(*pos));
        }

        let count = applied.len();
        self.emit(GraphEvent::PositionsUpdated {
            conversation_id,
            positions: applied,
        });
        Ok(count)
    }

    /// Apply rendered node sizes. Provisionally placed nodes that now overlap
    /// something are moved; the moves are stored and returned.
    #[tracing::instrument(skip(self, measured), name = "engine.reconcile_layout")]
    pub async fn reconcile_layout(
        &self,
        conversation_id: ConversationId,
        measured: &HashMap<NodeId, Size>,
    ) -> KernelResult<Vec<Reflow>> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;

        let mut layout = snap.layout.clone();
        let reflows = layout.reconcile(measured);
        let moves: Vec<(NodeId, Position)> = reflows.iter().map(|r| (r.node_id, to_position(r.to))).collect();
        if !moves.is_empty() {
            self.db.lock().update_positions(&moves)?;
        }

        snap.layout = layout;
        for (id, pos) in &moves {
            snap.graph.set_position(id, *pos)?;
        }

        if !moves.is_empty() {
            tracing::debug!(conversation = %conversation_id, moved = moves.len(), "reflowed layout");
            self.emit(GraphEvent::LayoutReflowed {
                conversation_id,
                positions: moves.iter().map(|(id, p)| NodePosition::new(*id, p.x, p.y)).collect(),
            });
        }
        Ok(reflows)
    }

    /// Find quoted text inside a node, as a char span.
    pub async fn locate_quote(
        &self,
        conversation_id: ConversationId,
        node_id: NodeId,
        text: &str,
    ) -> KernelResult<Option<Span>> {
        let snap = self.snapshot(conversation_id).await?;
        let snap = snap.lock().await;
        let node = snap.require_node(&node_id)?;
        Ok(locate(&node.text, text))
    }

    // ========================================================================
    // Drafts
    // ========================================================================

    /// Start a draft question drawing from `from_node_ids`.
    pub async fn create_draft(&self, conversation_id: ConversationId, from_node_ids: Vec<NodeId>) -> KernelResult<NodeId> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;
        for id in &from_node_ids {
            snap.require_node(id)?;
        }
        let anchor = from_node_ids.first().and_then(|id| snap.graph.anchor_of(id));
        Ok(snap.drafts.create_draft(anchor, from_node_ids))
    }

    pub async fn draft(&self, conversation_id: ConversationId, draft_id: NodeId) -> KernelResult<Draft> {
        let snap = self.snapshot(conversation_id).await?;
        let snap = snap.lock().await;
        let draft = snap.drafts.draft(&draft_id).ok_or(GraphError::DraftNotFound(draft_id))?;
        Ok(draft.clone())
    }

    pub async fn push_draft_text(&self, conversation_id: ConversationId, draft_id: NodeId, text: &str) -> KernelResult<()> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;
        Ok(snap.drafts.push_text(&draft_id, text)?)
    }

    /// Attach a quote to a draft. The source span is located in the source
    /// node's text when the quote does not carry one. Returns `false` if the
    /// quote's entry was already attached.
    pub async fn attach_context(&self, conversation_id: ConversationId, draft_id: NodeId, quote: Quote) -> KernelResult<bool> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;
        let source_text = snap.require_node(&quote.source_node_id)?.text.clone();
        Ok(snap.drafts.attach(&draft_id, quote, Some(&source_text))?)
    }

    pub async fn remove_context(
        &self,
        conversation_id: ConversationId,
        draft_id: NodeId,
        entry_id: ContextEntryId,
    ) -> KernelResult<bool> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;
        Ok(snap.drafts.remove_context(&draft_id, &entry_id)?)
    }

    pub async fn serialize_draft(&self, conversation_id: ConversationId, draft_id: NodeId) -> KernelResult<SerializedDraft> {
        let snap = self.snapshot(conversation_id).await?;
        let snap = snap.lock().await;
        Ok(snap.drafts.serialize(&draft_id)?)
    }

    /// Send a draft as a question. The user node keeps the draft's id. On
    /// failure the draft is kept so it can be retried.
    #[tracing::instrument(skip(self), name = "engine.submit_draft")]
    pub async fn submit_draft(&self, conversation_id: ConversationId, draft_id: NodeId) -> KernelResult<ExchangeResult> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;

        let draft = snap.drafts.draft(&draft_id).ok_or(GraphError::DraftNotFound(draft_id))?;
        let serialized = draft.serialize();
        let request = ExchangeRequest::new(serialized.text)
            .from_nodes(draft.from_node_ids.iter().copied())
            .with_draft_id(draft_id)
            .with_context_ranges(serialized.context_ranges);

        self.exchange_locked(&mut snap, request).await
    }

    pub async fn discard_draft(&self, conversation_id: ConversationId, draft_id: NodeId) -> KernelResult<bool> {
        let snap = self.snapshot(conversation_id).await?;
        let mut snap = snap.lock().await;
        Ok(snap.drafts.discard(&draft_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, LlmError, LlmResult};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Answers every question with "re: <question>".
    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(CompletionResponse::text(request.model, format!("re: {last}")))
        }
    }

    struct Down;

    #[async_trait]
    impl LlmProvider for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _request: CompletionRequest) -> LlmResult<CompletionResponse> {
            Err(LlmError::NetworkError("unreachable".into()))
        }
    }

    fn engine(provider: Arc<dyn LlmProvider>) -> (GraphEngine, ConversationId) {
        let engine = GraphEngine::new(GraphDb::in_memory().unwrap(), provider, EngineConfig::default());
        let conv = engine.create_conversation("test", None).unwrap();
        (engine, conv.id)
    }

    #[tokio::test]
    async fn test_first_exchange_is_root_at_origin() {
        let (engine, conv) = engine(Arc::new(Echo));
        let result = engine.create_exchange(conv, ExchangeRequest::new("hello")).await.unwrap();

        assert_eq!(result.ai_message.content, "re: hello");
        let [user, ai] = &result.delta.nodes[..] else {
            panic!("expected two nodes");
        };
        assert_eq!(user.position, Some(Position::new(0.0, 0.0)));
        assert_eq!(ai.position, Some(Position::new(0.0, 220.0)));
        assert_eq!(result.delta.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_parent_fails_before_ai_call() {
        let (engine, conv) = engine(Arc::new(Down));
        let err = engine
            .create_exchange(conv, ExchangeRequest::new("q").from_nodes([NodeId::new()]))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Graph(GraphError::NodeNotFound(_))));
    }

    #[tokio::test]
    async fn test_ai_failure_records_nothing() {
        let (engine, conv) = engine(Arc::new(Down));
        let err = engine.create_exchange(conv, ExchangeRequest::new("q")).await.unwrap_err();
        assert!(matches!(err, KernelError::Llm(_)));
        assert!(engine.get_graph(conv).await.unwrap().nodes.is_empty());
    }

    #[tokio::test]
    async fn test_blank_question_rejected() {
        let (engine, conv) = engine(Arc::new(Echo));
        let err = engine.create_exchange(conv, ExchangeRequest::new("  ")).await.unwrap_err();
        assert!(matches!(err, KernelError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_missing_conversation() {
        let (engine, _) = engine(Arc::new(Echo));
        let missing = ConversationId::new();
        assert!(matches!(
            engine.get_graph(missing).await,
            Err(KernelError::ConversationNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_edit_rejects_ai_node() {
        let (engine, conv) = engine(Arc::new(Echo));
        let result = engine.create_exchange(conv, ExchangeRequest::new("q")).await.unwrap();
        let ai = result.delta.nodes[1].id;

        let err = engine.edit_node(conv, ai, "nope").await.unwrap_err();
        assert!(matches!(err, KernelError::Graph(GraphError::NotAUserNode { .. })));
    }

    #[tokio::test]
    async fn test_positions_and_reflow() {
        let (engine, conv) = engine(Arc::new(Echo));
        let first = engine.create_exchange(conv, ExchangeRequest::new("q")).await.unwrap();
        let (user, ai) = (first.delta.nodes[0].id, first.delta.nodes[1].id);

        let applied = engine
            .update_node_positions(conv, &[NodePosition::new(user, -5.0, -5.0), NodePosition::new(NodeId::new(), 0.0, 0.0)])
            .await
            .unwrap();
        assert_eq!(applied, 1);

        // The answer renders taller than guessed; nothing overlaps, so no reflow.
        let measured = HashMap::from([(ai, Size::new(320.0, 400.0))]);
        assert!(engine.reconcile_layout(conv, &measured).await.unwrap().is_empty());

        engine.flush_positions().unwrap();
        let view = engine.get_graph(conv).await.unwrap();
        let moved = view.nodes.iter().find(|n| n.id == user).unwrap();
        assert_eq!(moved.position, Some(Position::new(-5.0, -5.0)));
    }

    #[tokio::test]
    async fn test_locate_quote() {
        let (engine, conv) = engine(Arc::new(Echo));
        let result = engine.create_exchange(conv, ExchangeRequest::new("tell me")).await.unwrap();
        let ai = result.delta.nodes[1].id;

        let span = engine.locate_quote(conv, ai, "tell").await.unwrap();
        assert_eq!(span, Some(Span::new(4, 8)));
        assert_eq!(engine.locate_quote(conv, ai, "absent").await.unwrap(), None);
        assert!(engine.locate_quote(conv, NodeId::new(), "x").await.is_err());
    }

    #[tokio::test]
    async fn test_conversation_metadata() {
        let (engine, conv) = engine(Arc::new(Echo));
        engine.rename_conversation(conv, "renamed").await.unwrap();
        engine.set_system_instruction(conv, Some("Be terse.".into())).await.unwrap();
        engine.set_viewport(conv, Viewport { x: 1.0, y: 2.0, zoom: 0.5 }).await.unwrap();

        let loaded = engine.conversation(conv).await.unwrap();
        assert_eq!(loaded.title, "renamed");
        assert_eq!(loaded.system_instruction.as_deref(), Some("Be terse."));
        assert_eq!(loaded.viewport.zoom, 0.5);
        assert_eq!(engine.list_conversations().unwrap().len(), 1);

        let mut events = engine.subscribe();
        assert!(engine.delete_conversation(conv).await.unwrap());
        assert!(!engine.delete_conversation(conv).await.unwrap());
        assert!(matches!(events.try_recv(), Ok(GraphEvent::ConversationDeleted { .. })));
        assert!(engine.get_graph(conv).await.is_err());
    }
}
