use crate::compositor::surface::BackendKind;
use crate::error::AttributeOp;
use std::sync::mpsc::{channel, Receiver, Sender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorEvent {
    /// The requested backend could not be built; `active` is what runs instead.
    BackendFallback {
        requested: BackendKind,
        active: Option<BackendKind>,
        error: String,
    },
    /// A window attribute change was rejected and rolled back.
    AttributeFailure { op: AttributeOp, error: String },
    /// The frame source has been empty for `idle_ticks` consecutive ticks.
    FrameStarvation { idle_ticks: u32 },
    Started { backend: BackendKind },
    Stopped,
}

/// Non-blocking notification channel. A dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<CompositorEvent>,
}

impl EventSink {
    pub fn new() -> (Self, Receiver<CompositorEvent>) {
        let (tx, rx) = channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: CompositorEvent) {
        let _ = self.tx.send(event);
    }
}
