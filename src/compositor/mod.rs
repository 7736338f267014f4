pub mod chroma;
pub mod frame;
pub mod frame_source;
pub mod headless;
pub mod messages;
pub mod perf;
#[cfg(windows)]
pub mod platform;
pub mod render_loop;
pub mod script;
pub mod service;
pub mod state;
pub mod surface;
pub mod window;

pub use chroma::{ChromaKeyConfig, KeyColor};
pub use frame::{Bgra, Frame};
pub use frame_source::{frame_slot, FrameProducer, FrameSource, PatternSource, SlotSource};
pub use messages::{CompositorEvent, EventSink};
pub use render_loop::{RenderLoop, StopOutcome, TickOutcome};
pub use service::{Compositor, ConfigOutcome, StartOutcome};
pub use surface::{BackendKind, PresentMode, Surface, SurfaceFactory};
pub use window::{
    TransparencyMode, WindowAttributes, WindowTransparencyController, WindowTransparencyState,
};
