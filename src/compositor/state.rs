#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopLifecycle {
    Stopped,
    Running,
    Stopping,
}

impl LoopLifecycle {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

pub fn can_transition(from: LoopLifecycle, to: LoopLifecycle) -> bool {
    matches!(
        (from, to),
        (LoopLifecycle::Stopped, LoopLifecycle::Running)
            | (LoopLifecycle::Running, LoopLifecycle::Stopping)
            | (LoopLifecycle::Stopping, LoopLifecycle::Stopped)
    ) || from == to
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorLifecycle {
    Idle,
    Active,
    TornDown,
}
