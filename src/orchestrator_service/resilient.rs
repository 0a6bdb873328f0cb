use super::ports::{
    Checkpoint, CheckpointStore, Completion, CompletionPort, CompletionRequest, EventSink,
    PortFuture, RetrievalCandidate, RetrievalPort, RetrievalScope, SchemaMetadataPort,
    SqlExecutionPort,
};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{ConnectionId, ExecutionOutcome, ProgressEvent, SchemaMetadata, ThreadId};

/// Wraps every port call in transient-failure backoff.
///
/// Engine-reported SQL errors arrive as `Ok` outcomes and are therefore
/// returned after exactly one call.
#[derive(Debug, Clone)]
pub struct ResilientPorts<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> ResilientPorts<P> {
    #[must_use]
    pub const fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    #[must_use]
    pub const fn inner(&self) -> &P {
        &self.inner
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<P: CompletionPort + Sync> CompletionPort for ResilientPorts<P> {
    fn complete(&self, request: CompletionRequest) -> PortFuture<'_, Completion> {
        Box::pin(async move {
            retry_with_backoff(&self.policy, request.purpose.as_str(), || {
                self.inner.complete(request.clone())
            })
            .await
        })
    }

    fn embed<'a>(&'a self, text: &'a str) -> PortFuture<'a, Option<Vec<f32>>> {
        Box::pin(async move {
            retry_with_backoff(&self.policy, "embed", || self.inner.embed(text)).await
        })
    }
}

impl<P: SqlExecutionPort + Sync> SqlExecutionPort for ResilientPorts<P> {
    fn execute<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ExecutionOutcome> {
        Box::pin(async move {
            retry_with_backoff(&self.policy, "execute_sql", || {
                self.inner.execute(connection_id, sql)
            })
            .await
        })
    }
}

impl<P: SchemaMetadataPort + Sync> SchemaMetadataPort for ResilientPorts<P> {
    fn get_schema<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        table_filter: Option<&'a [String]>,
    ) -> PortFuture<'a, SchemaMetadata> {
        Box::pin(async move {
            retry_with_backoff(&self.policy, "get_schema", || {
                self.inner.get_schema(connection_id, table_filter)
            })
            .await
        })
    }
}

impl<P: RetrievalPort + Sync> RetrievalPort for ResilientPorts<P> {
    fn find_similar<'a>(
        &'a self,
        query_text: &'a str,
        scope: &'a RetrievalScope,
    ) -> PortFuture<'a, Vec<RetrievalCandidate>> {
        Box::pin(async move {
            retry_with_backoff(&self.policy, "find_similar", || {
                self.inner.find_similar(query_text, scope)
            })
            .await
        })
    }

    fn remember<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        question: &'a str,
        sql: &'a str,
    ) -> PortFuture<'a, ()> {
        self.inner.remember(connection_id, question, sql)
    }

    fn mark_failed<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ()> {
        self.inner.mark_failed(connection_id, sql)
    }
}

impl<P: CheckpointStore + Sync> CheckpointStore for ResilientPorts<P> {
    fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> PortFuture<'a, ()> {
        Box::pin(async move {
            retry_with_backoff(&self.policy, "save_checkpoint", || {
                self.inner.save_checkpoint(checkpoint)
            })
            .await
        })
    }

    fn load_checkpoint<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> PortFuture<'a, Option<Checkpoint>> {
        Box::pin(async move {
            retry_with_backoff(&self.policy, "load_checkpoint", || {
                self.inner.load_checkpoint(thread_id)
            })
            .await
        })
    }
}

impl<P: EventSink> EventSink for ResilientPorts<P> {
    fn emit(&self, event: ProgressEvent) {
        self.inner.emit(event);
    }
}
