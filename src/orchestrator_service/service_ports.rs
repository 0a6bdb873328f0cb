use super::ports::{
    Checkpoint, CheckpointStore, Completion, CompletionPort, CompletionRequest, EventSink,
    PortFuture, RetrievalCandidate, RetrievalPort, RetrievalScope, SchemaMetadataPort,
    SqlExecutionPort,
};
use crate::types::{ConnectionId, ExecutionOutcome, ProgressEvent, SchemaMetadata, ThreadId};

/// Bundles one adapter per capability into a single [`super::ports::PipelinePorts`].
#[derive(Debug, Clone)]
pub struct ServicePorts<C, X, S, R, K, E> {
    pub completion: C,
    pub executor: X,
    pub schema: S,
    pub retrieval: R,
    pub checkpoints: K,
    pub events: E,
}

impl<C, X, S, R, K, E> CompletionPort for ServicePorts<C, X, S, R, K, E>
where
    C: CompletionPort,
{
    fn complete(&self, request: CompletionRequest) -> PortFuture<'_, Completion> {
        self.completion.complete(request)
    }

    fn embed<'a>(&'a self, text: &'a str) -> PortFuture<'a, Option<Vec<f32>>> {
        self.completion.embed(text)
    }
}

impl<C, X, S, R, K, E> SqlExecutionPort for ServicePorts<C, X, S, R, K, E>
where
    X: SqlExecutionPort,
{
    fn execute<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ExecutionOutcome> {
        self.executor.execute(connection_id, sql)
    }
}

impl<C, X, S, R, K, E> SchemaMetadataPort for ServicePorts<C, X, S, R, K, E>
where
    S: SchemaMetadataPort,
{
    fn get_schema<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        table_filter: Option<&'a [String]>,
    ) -> PortFuture<'a, SchemaMetadata> {
        self.schema.get_schema(connection_id, table_filter)
    }
}

impl<C, X, S, R, K, E> RetrievalPort for ServicePorts<C, X, S, R, K, E>
where
    R: RetrievalPort,
{
    fn find_similar<'a>(
        &'a self,
        query_text: &'a str,
        scope: &'a RetrievalScope,
    ) -> PortFuture<'a, Vec<RetrievalCandidate>> {
        self.retrieval.find_similar(query_text, scope)
    }

    fn remember<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        question: &'a str,
        sql: &'a str,
    ) -> PortFuture<'a, ()> {
        self.retrieval.remember(connection_id, question, sql)
    }

    fn mark_failed<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ()> {
        self.retrieval.mark_failed(connection_id, sql)
    }
}

impl<C, X, S, R, K, E> CheckpointStore for ServicePorts<C, X, S, R, K, E>
where
    K: CheckpointStore,
{
    fn save_checkpoint<'a>(&'a self, checkpoint: &'a Checkpoint) -> PortFuture<'a, ()> {
        self.checkpoints.save_checkpoint(checkpoint)
    }

    fn load_checkpoint<'a>(
        &'a self,
        thread_id: &'a ThreadId,
    ) -> PortFuture<'a, Option<Checkpoint>> {
        self.checkpoints.load_checkpoint(thread_id)
    }
}

impl<C, X, S, R, K, E> EventSink for ServicePorts<C, X, S, R, K, E>
where
    E: EventSink,
{
    fn emit(&self, event: ProgressEvent) {
        self.events.emit(event);
    }
}

/// Retrieval port for deployments without a retrieval index.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetrieval;

impl RetrievalPort for NoRetrieval {
    fn find_similar<'a>(
        &'a self,
        _query_text: &'a str,
        _scope: &'a RetrievalScope,
    ) -> PortFuture<'a, Vec<RetrievalCandidate>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}
