//! In-memory stand-ins for the OS seams.
//!
//! Every type here is a cloneable handle over shared state, so a caller can box one
//! copy into the compositor and keep another to inspect what the compositor did.
//! The non-Windows host binary runs on these, and so do the integration tests.

use crate::compositor::chroma::{ChromaKeyConfig, KeyColor};
use crate::compositor::frame::Frame;
use crate::compositor::surface::{
    BackendKind, EmbeddedSurface, LayeredPresenter, NativeSurface, PresentMode, ScriptHost,
    Surface, SurfaceFactory,
};
use crate::compositor::window::{LayeredAttributes, WindowAttributes, EX_STYLE_TOPMOST};
use crate::error::{AttributeOp, CompositorError, Result};
use crate::settings::OverlaySettings;
use std::sync::{Arc, Mutex};

const PRESENT_HISTORY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCall {
    ReadStyle,
    WriteStyle(u32),
    LayeredAttributes(LayeredAttributes),
    TopMost(bool),
}

#[derive(Debug, Default)]
struct WindowLog {
    style: u32,
    layered: Option<LayeredAttributes>,
    top_most: bool,
    calls: Vec<WindowCall>,
    fail_once: Vec<AttributeOp>,
    fail_always: Vec<AttributeOp>,
}

impl WindowLog {
    fn check(&mut self, op: AttributeOp) -> Result<()> {
        if self.fail_always.contains(&op) {
            return Err(CompositorError::attribute(op, "rejected by window"));
        }
        if let Some(idx) = self.fail_once.iter().position(|o| *o == op) {
            self.fail_once.remove(idx);
            return Err(CompositorError::attribute(op, "rejected by window"));
        }
        Ok(())
    }
}

/// Window whose extended style lives in memory. Failures can be injected per operation.
#[derive(Debug, Clone, Default)]
pub struct RecordingWindow {
    inner: Arc<Mutex<WindowLog>>,
}

impl RecordingWindow {
    pub fn new(initial_style: u32) -> Self {
        let window = Self::default();
        window.with_log(|log| log.style = initial_style);
        window
    }

    fn with_log<R: Default>(&self, f: impl FnOnce(&mut WindowLog) -> R) -> R {
        self.inner.lock().map(|mut log| f(&mut log)).unwrap_or_default()
    }

    fn call<R>(&self, op: AttributeOp, f: impl FnOnce(&mut WindowLog) -> R) -> Result<R> {
        let Ok(mut log) = self.inner.lock() else {
            return Err(CompositorError::attribute(op, "window state poisoned"));
        };
        log.check(op)?;
        Ok(f(&mut log))
    }

    pub fn ex_style(&self) -> u32 {
        self.with_log(|log| log.style)
    }

    pub fn layered_attributes(&self) -> Option<LayeredAttributes> {
        self.with_log(|log| log.layered)
    }

    pub fn top_most(&self) -> bool {
        self.with_log(|log| log.top_most)
    }

    pub fn calls(&self) -> Vec<WindowCall> {
        self.with_log(|log| log.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with_log(|log| log.calls.clear());
    }

    /// The next call of `op` fails; later ones succeed.
    pub fn fail_next(&self, op: AttributeOp) {
        self.with_log(|log| log.fail_once.push(op));
    }

    pub fn fail_always(&self, op: AttributeOp) {
        self.with_log(|log| log.fail_always.push(op));
    }

    pub fn heal(&self) {
        self.with_log(|log| {
            log.fail_once.clear();
            log.fail_always.clear();
        });
    }
}

impl WindowAttributes for RecordingWindow {
    fn read_ex_style(&self) -> Result<u32> {
        self.call(AttributeOp::ReadStyle, |log| {
            log.calls.push(WindowCall::ReadStyle);
            log.style
        })
    }

    fn write_ex_style(&mut self, style: u32) -> Result<()> {
        self.call(AttributeOp::WriteStyle, |log| {
            log.calls.push(WindowCall::WriteStyle(style));
            log.style = style;
        })
    }

    fn set_layered_attributes(&mut self, attributes: LayeredAttributes) -> Result<()> {
        self.call(AttributeOp::LayeredAttributes, |log| {
            log.calls.push(WindowCall::LayeredAttributes(attributes));
            log.layered = Some(attributes);
        })
    }

    fn set_top_most(&mut self, top_most: bool) -> Result<()> {
        self.call(AttributeOp::ZOrder, |log| {
            log.calls.push(WindowCall::TopMost(top_most));
            log.top_most = top_most;
            if top_most {
                log.style |= EX_STYLE_TOPMOST;
            } else {
                log.style &= !EX_STYLE_TOPMOST;
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentRecord {
    pub mode: PresentMode,
    pub frame: Frame,
}

#[derive(Debug, Default)]
struct PresenterLog {
    client_size: (u32, u32),
    history: Vec<PresentRecord>,
    presented: u64,
    fail_next: u32,
    released: bool,
}

/// Presenter that keeps the last few presented back-buffers.
#[derive(Debug, Clone, Default)]
pub struct MemoryPresenter {
    inner: Arc<Mutex<PresenterLog>>,
}

impl MemoryPresenter {
    pub fn new(width: u32, height: u32) -> Self {
        let presenter = Self::default();
        presenter.with_log(|log| log.client_size = (width, height));
        presenter
    }

    fn with_log<R: Default>(&self, f: impl FnOnce(&mut PresenterLog) -> R) -> R {
        self.inner.lock().map(|mut log| f(&mut log)).unwrap_or_default()
    }

    pub fn set_client_size(&self, width: u32, height: u32) {
        self.with_log(|log| log.client_size = (width, height));
    }

    pub fn fail_next_presents(&self, count: u32) {
        self.with_log(|log| log.fail_next = count);
    }

    pub fn presented(&self) -> u64 {
        self.with_log(|log| log.presented)
    }

    pub fn last(&self) -> Option<PresentRecord> {
        self.with_log(|log| log.history.last().cloned())
    }

    pub fn history(&self) -> Vec<PresentRecord> {
        self.with_log(|log| log.history.clone())
    }

    pub fn is_released(&self) -> bool {
        self.with_log(|log| log.released)
    }
}

impl LayeredPresenter for MemoryPresenter {
    fn client_size(&self) -> (u32, u32) {
        self.with_log(|log| log.client_size)
    }

    fn present(&mut self, back_buffer: &Frame, mode: PresentMode) -> Result<()> {
        let Ok(mut log) = self.inner.lock() else {
            return Err(CompositorError::Present("presenter state poisoned".into()));
        };
        if log.released {
            return Err(CompositorError::TornDown);
        }
        if log.fail_next > 0 {
            log.fail_next -= 1;
            return Err(CompositorError::Present("present rejected".into()));
        }
        if log.history.len() == PRESENT_HISTORY {
            log.history.remove(0);
        }
        log.history.push(PresentRecord {
            mode,
            frame: back_buffer.clone(),
        });
        log.presented += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.with_log(|log| log.released = true);
    }
}

#[derive(Debug, Default)]
struct ScriptLog {
    address: Option<String>,
    navigations: Vec<String>,
    generation: u64,
    scripts: Vec<String>,
    background: Option<KeyColor>,
    closed: bool,
    fail_navigation: bool,
    fail_scripts: bool,
}

/// Content host that records injected scripts. Loads complete only when told to.
#[derive(Debug, Clone, Default)]
pub struct RecordingScriptHost {
    inner: Arc<Mutex<ScriptLog>>,
}

impl RecordingScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_log<R: Default>(&self, f: impl FnOnce(&mut ScriptLog) -> R) -> R {
        self.inner.lock().map(|mut log| f(&mut log)).unwrap_or_default()
    }

    /// Simulates a finished navigation or reload; the page loses injected scripts.
    pub fn complete_load(&self) {
        self.with_log(|log| log.generation += 1);
    }

    pub fn address(&self) -> Option<String> {
        self.with_log(|log| log.address.clone())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.with_log(|log| log.navigations.clone())
    }

    pub fn scripts(&self) -> Vec<String> {
        self.with_log(|log| log.scripts.clone())
    }

    pub fn last_script(&self) -> Option<String> {
        self.with_log(|log| log.scripts.last().cloned())
    }

    pub fn background(&self) -> Option<KeyColor> {
        self.with_log(|log| log.background)
    }

    pub fn is_closed(&self) -> bool {
        self.with_log(|log| log.closed)
    }

    pub fn fail_navigation(&self, fail: bool) {
        self.with_log(|log| log.fail_navigation = fail);
    }

    pub fn fail_scripts(&self, fail: bool) {
        self.with_log(|log| log.fail_scripts = fail);
    }
}

impl ScriptHost for RecordingScriptHost {
    fn navigate(&mut self, address: &str) -> Result<()> {
        let Ok(mut log) = self.inner.lock() else {
            return Err(CompositorError::backend(BackendKind::Embedded, "host state poisoned"));
        };
        if log.fail_navigation {
            return Err(CompositorError::backend(
                BackendKind::Embedded,
                format!("navigation to {address} refused"),
            ));
        }
        log.address = Some(address.to_string());
        log.navigations.push(address.to_string());
        Ok(())
    }

    fn content_generation(&self) -> u64 {
        self.with_log(|log| log.generation)
    }

    fn execute_script(&mut self, script: &str) -> Result<()> {
        let Ok(mut log) = self.inner.lock() else {
            return Err(CompositorError::Script("host state poisoned".into()));
        };
        if log.closed {
            return Err(CompositorError::TornDown);
        }
        if log.fail_scripts {
            return Err(CompositorError::Script("script rejected".into()));
        }
        log.scripts.push(script.to_string());
        Ok(())
    }

    fn set_host_background(&mut self, color: Option<KeyColor>) -> Result<()> {
        self.with_log(|log| log.background = color);
        Ok(())
    }

    fn close(&mut self) {
        self.with_log(|log| log.closed = true);
    }
}

#[derive(Debug)]
struct FactoryLog {
    failing: Vec<BackendKind>,
    created: Vec<BackendKind>,
    presenters: Vec<MemoryPresenter>,
    hosts: Vec<RecordingScriptHost>,
    auto_load: bool,
}

impl Default for FactoryLog {
    fn default() -> Self {
        Self {
            failing: Vec::new(),
            created: Vec::new(),
            presenters: Vec::new(),
            hosts: Vec::new(),
            auto_load: true,
        }
    }
}

/// Builds surfaces over [`MemoryPresenter`] and [`RecordingScriptHost`].
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurfaceFactory {
    inner: Arc<Mutex<FactoryLog>>,
}

impl HeadlessSurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_log<R: Default>(&self, f: impl FnOnce(&mut FactoryLog) -> R) -> R {
        self.inner.lock().map(|mut log| f(&mut log)).unwrap_or_default()
    }

    pub fn set_failing(&self, kind: BackendKind, failing: bool) {
        self.with_log(|log| {
            log.failing.retain(|k| *k != kind);
            if failing {
                log.failing.push(kind);
            }
        });
    }

    /// When set, embedded content reports a finished load right after creation.
    pub fn set_auto_load(&self, auto_load: bool) {
        self.with_log(|log| log.auto_load = auto_load);
    }

    pub fn created(&self) -> Vec<BackendKind> {
        self.with_log(|log| log.created.clone())
    }

    pub fn last_presenter(&self) -> Option<MemoryPresenter> {
        self.with_log(|log| log.presenters.last().cloned())
    }

    pub fn last_script_host(&self) -> Option<RecordingScriptHost> {
        self.with_log(|log| log.hosts.last().cloned())
    }
}

impl SurfaceFactory for HeadlessSurfaceFactory {
    fn create(&mut self, kind: BackendKind, settings: &OverlaySettings) -> Result<Surface> {
        let Ok(mut log) = self.inner.lock() else {
            return Err(CompositorError::backend(kind, "factory state poisoned"));
        };
        if log.failing.contains(&kind) {
            return Err(CompositorError::backend(kind, "backend unavailable"));
        }
        let surface = match kind {
            BackendKind::Native => {
                let presenter = MemoryPresenter::new(settings.window_width, settings.window_height);
                log.presenters.push(presenter.clone());
                Surface::Native(NativeSurface::new(Box::new(presenter)))
            }
            BackendKind::Embedded => {
                let host = RecordingScriptHost::new();
                let surface = EmbeddedSurface::new(
                    Box::new(host.clone()),
                    settings.content_address.clone(),
                    ChromaKeyConfig::from(settings),
                )?;
                if log.auto_load {
                    host.complete_load();
                }
                log.hosts.push(host);
                Surface::Embedded(surface)
            }
        };
        log.created.push(kind);
        Ok(surface)
    }
}
