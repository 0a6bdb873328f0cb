use super::ports::EventSink;
use crate::types::{ConversationState, ProgressEvent, ProgressEventKind};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Bounded progress channel. A full or closed channel drops the event
/// instead of blocking the pipeline.
#[derive(Debug)]
pub struct ChannelEventSink {
    sender: mpsc::Sender<ProgressEvent>,
    dropped: AtomicU64,
}

impl ChannelEventSink {
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ProgressEvent) {
        if let Err(err) = self.sender.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped = total, error = %err, "Progress event dropped");
        }
    }
}

/// Stamps the next per-thread sequence number and hands the event to the sink.
pub fn emit_progress<E: EventSink + ?Sized>(
    sink: &E,
    state: &mut ConversationState,
    kind: ProgressEventKind,
) {
    let sequence = state.next_event_sequence();
    sink.emit(ProgressEvent::new(state.thread_id.clone(), sequence, kind));
}

/// Reserves a sequence number without emitting. Terminal events are stamped
/// before the final checkpoint so a resumed thread never reuses a number.
pub fn stamp_progress(state: &mut ConversationState, kind: ProgressEventKind) -> ProgressEvent {
    let sequence = state.next_event_sequence();
    ProgressEvent::new(state.thread_id.clone(), sequence, kind)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: ProgressEvent) {}
}
