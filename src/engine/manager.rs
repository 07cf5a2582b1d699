//! Evaluation context manager: registry and router for one session's contexts.
//!
//! The manager is the only component that creates, aborts, or destroys
//! contexts. It allocates context identifiers from a monotonically increasing
//! counter so an identifier is never handed out twice within a session, and it
//! keeps a session-wide set of cell identifiers so a client-supplied cell id
//! cannot collide with an earlier one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::compiler::Compiler;
use crate::engine::bus::{EventBus, Subscription, SubscriptionId};
use crate::engine::context::{AbortReason, EvaluationContext, SubmitOutcome};
use crate::models::cell::{CodeCellId, CodeCellRecord};
use crate::models::context::{ContextConfiguration, ContextSummary, EvaluationContextId};
use crate::{AppError, Result};

/// Default time a runtime is given to acknowledge an abort.
pub const DEFAULT_ABORT_GRACE: Duration = Duration::from_secs(2);

/// Top-level registry of live evaluation contexts.
pub struct EvaluationContextManager {
    compiler: Arc<dyn Compiler>,
    bus: Arc<EventBus>,
    abort_grace: Duration,
    next_context_id: AtomicU64,
    contexts: Mutex<HashMap<EvaluationContextId, Arc<EvaluationContext>>>,
    cell_ids: Mutex<HashSet<CodeCellId>>,
}

impl std::fmt::Debug for EvaluationContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContextManager")
            .field("abort_grace", &self.abort_grace)
            .finish_non_exhaustive()
    }
}

impl EvaluationContextManager {
    /// Create a manager publishing to its own fresh event bus.
    #[must_use]
    pub fn new(compiler: Arc<dyn Compiler>, abort_grace: Duration) -> Self {
        Self::with_bus(compiler, Arc::new(EventBus::new()), abort_grace)
    }

    /// Create a manager publishing to `bus`.
    #[must_use]
    pub fn with_bus(
        compiler: Arc<dyn Compiler>,
        bus: Arc<EventBus>,
        abort_grace: Duration,
    ) -> Self {
        Self {
            compiler,
            bus,
            abort_grace,
            next_context_id: AtomicU64::new(1),
            contexts: Mutex::new(HashMap::new()),
            cell_ids: Mutex::new(HashSet::new()),
        }
    }

    /// Event bus shared by all contexts of this manager.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Subscribe to cell events from every context of this manager.
    pub async fn subscribe(&self) -> Subscription {
        self.bus.subscribe().await
    }

    /// Remove a subscription. Returns `false` if the handle was unknown.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id).await
    }

    /// Initialize a runtime and register a new context in state `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ContextCreation`] when the compiler cannot
    /// initialize. Other compiler errors are reported as `ContextCreation`
    /// too, with the original error as the message.
    pub async fn create_context(
        &self,
        configuration: ContextConfiguration,
    ) -> Result<EvaluationContextId> {
        let id = EvaluationContextId::new(self.next_context_id.fetch_add(1, Ordering::Relaxed));
        let span = info_span!("create_context", context_id = %id);

        async move {
            let runtime = self
                .compiler
                .initialize(id, configuration)
                .await
                .map_err(|err| match err {
                    AppError::ContextCreation(_) => err,
                    other => AppError::ContextCreation(other.to_string()),
                })?;

            let context = Arc::new(EvaluationContext::spawn(
                id,
                runtime,
                Arc::clone(&self.bus),
                self.abort_grace,
            ));
            self.contexts.lock().await.insert(id, context);

            info!("evaluation context created");
            Ok(id)
        }
        .instrument(span)
        .await
    }

    /// Queue `source` on a context. Returns as soon as the cell is queued.
    ///
    /// When `requested_id` is `None` a fresh identifier is allocated.
    ///
    /// # Errors
    ///
    /// - [`AppError::UnknownContext`] if `context_id` is not live.
    /// - [`AppError::InvalidRequest`] if `requested_id` was already used in this session.
    /// - Any error the runtime reports from its completeness check.
    pub async fn submit(
        &self,
        context_id: EvaluationContextId,
        source: String,
        requested_id: Option<CodeCellId>,
    ) -> Result<SubmitOutcome> {
        let context = self.resolve(context_id).await?;

        let cell_id = requested_id.unwrap_or_else(CodeCellId::generate);
        if !self.cell_ids.lock().await.insert(cell_id.clone()) {
            return Err(AppError::InvalidRequest(format!(
                "code cell id {cell_id} was already submitted"
            )));
        }

        let outcome = context.submit(source, cell_id.clone()).await;
        if !matches!(outcome, Ok(SubmitOutcome::Accepted(_))) {
            // Nothing was queued; release the reservation.
            self.cell_ids.lock().await.remove(&cell_id);
        }
        outcome
    }

    /// Abort the currently evaluating cell of a context, if any.
    ///
    /// A context with nothing evaluating is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::UnknownContext`] if `context_id` is not live.
    pub async fn abort_evaluation(&self, context_id: EvaluationContextId) -> Result<()> {
        let context = self.resolve(context_id).await?;
        context.abort(AbortReason::Requested).await;
        Ok(())
    }

    /// Tear a context down. Unknown or already destroyed ids are a silent no-op.
    pub async fn destroy_context(&self, context_id: EvaluationContextId) {
        let removed = self.contexts.lock().await.remove(&context_id);
        match removed {
            Some(context) => context.destroy(AbortReason::Teardown).await,
            None => info!(context_id = %context_id, "destroy of unknown context ignored"),
        }
    }

    /// Tear down every context after the client transport was lost.
    ///
    /// In-flight cells resolve to `Disconnected`.
    pub async fn disconnect_all(&self) {
        let drained: Vec<Arc<EvaluationContext>> =
            self.contexts.lock().await.drain().map(|(_, ctx)| ctx).collect();
        if drained.is_empty() {
            return;
        }

        warn!(count = drained.len(), "client disconnected, tearing down contexts");
        for context in drained {
            context.destroy(AbortReason::Disconnect).await;
        }
    }

    /// Summaries of all live contexts, ordered by identifier.
    pub async fn list_contexts(&self) -> Vec<ContextSummary> {
        let contexts: Vec<Arc<EvaluationContext>> =
            self.contexts.lock().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(contexts.len());
        for context in contexts {
            summaries.push(context.summary().await);
        }
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// Cell history of a context in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::UnknownContext`] if `context_id` is not live.
    pub async fn context_history(
        &self,
        context_id: EvaluationContextId,
    ) -> Result<Vec<CodeCellRecord>> {
        Ok(self.resolve(context_id).await?.history().await)
    }

    /// Look a cell up across all live contexts.
    pub async fn cell(&self, cell_id: &CodeCellId) -> Option<CodeCellRecord> {
        let contexts: Vec<Arc<EvaluationContext>> =
            self.contexts.lock().await.values().cloned().collect();
        for context in contexts {
            if let Some(record) = context.cell(cell_id).await {
                return Some(record);
            }
        }
        None
    }

    async fn resolve(&self, context_id: EvaluationContextId) -> Result<Arc<EvaluationContext>> {
        self.contexts
            .lock()
            .await
            .get(&context_id)
            .cloned()
            .ok_or_else(|| {
                AppError::UnknownContext(format!("no evaluation context with id {context_id}"))
            })
    }
}
