use crate::compositor::surface::BackendKind;
use thiserror::Error;

/// Window attribute operations that can be rejected by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOp {
    ReadStyle,
    WriteStyle,
    LayeredAttributes,
    ZOrder,
}

impl std::fmt::Display for AttributeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeOp::ReadStyle => write!(f, "read extended style"),
            AttributeOp::WriteStyle => write!(f, "write extended style"),
            AttributeOp::LayeredAttributes => write!(f, "set layered attributes"),
            AttributeOp::ZOrder => write!(f, "set z-order"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompositorError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("failed to {op}: {reason}")]
    Attribute { op: AttributeOp, reason: String },
    #[error("present failed: {0}")]
    Present(String),
    #[error("unable to create {kind} surface: {reason}")]
    Backend { kind: BackendKind, reason: String },
    #[error("script injection failed: {0}")]
    Script(String),
    #[error("surface already torn down")]
    TornDown,
}

impl CompositorError {
    pub fn attribute(op: AttributeOp, reason: impl Into<String>) -> Self {
        Self::Attribute {
            op,
            reason: reason.into(),
        }
    }

    pub fn backend(kind: BackendKind, reason: impl Into<String>) -> Self {
        Self::Backend {
            kind,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = CompositorError> = std::result::Result<T, E>;
