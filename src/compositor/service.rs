use crate::compositor::chroma::ChromaKeyConfig;
use crate::compositor::frame::Frame;
use crate::compositor::frame_source::FrameSource;
use crate::compositor::messages::{CompositorEvent, EventSink};
use crate::compositor::perf::{perf_enabled_from_env, RenderPerfSnapshot};
use crate::compositor::render_loop::{
    CompositeFlag, RenderLoop, StopOutcome, TickContext, TickOutcome,
};
use crate::compositor::state::{CompositorLifecycle, LoopLifecycle};
use crate::compositor::surface::{BackendKind, Surface, SurfaceFactory};
use crate::compositor::window::{
    WindowAttributes, WindowTransparencyController, WindowTransparencyState,
};
use crate::error::{AttributeOp, CompositorError};
use crate::settings::OverlaySettings;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(BackendKind),
    AlreadyRunning,
    /// The configured backend failed; `active` runs instead.
    Fallback {
        requested: BackendKind,
        active: BackendKind,
    },
    /// Neither backend could be built. The window stays opaque.
    Unavailable,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    Unchanged,
    Applied,
    /// Window attributes were rejected and rolled back; the rest was applied.
    Degraded(AttributeOp),
    /// The surface was torn down and rebuilt.
    Rebuilt,
    Fallback {
        requested: BackendKind,
        active: Option<BackendKind>,
    },
    TornDown,
}

enum BuildResult {
    Built(BackendKind),
    Fallback(BackendKind),
    Unavailable,
}

/// Owns the window controller, the active surface and the render loop for one
/// overlay window. All methods run on the thread that owns the window.
pub struct Compositor {
    settings: OverlaySettings,
    keying: ChromaKeyConfig,
    controller: WindowTransparencyController,
    factory: Box<dyn SurfaceFactory>,
    source: Box<dyn FrameSource>,
    surface: Option<Surface>,
    render_loop: RenderLoop,
    events: EventSink,
    lifecycle: CompositorLifecycle,
    perf_from_env: bool,
    client_size: (u32, u32),
}

impl std::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("settings", &self.settings)
            .field("controller", &self.controller)
            .field("surface", &self.surface)
            .field("render_loop", &self.render_loop.lifecycle())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

fn attribute_op(err: &CompositorError) -> AttributeOp {
    match err {
        CompositorError::Attribute { op, .. } => *op,
        _ => AttributeOp::WriteStyle,
    }
}

impl Compositor {
    pub fn new(
        window: Box<dyn WindowAttributes>,
        factory: Box<dyn SurfaceFactory>,
        source: Box<dyn FrameSource>,
        mut settings: OverlaySettings,
    ) -> (Self, Receiver<CompositorEvent>) {
        settings.sanitize();
        let (events, rx) = EventSink::new();
        let render_loop = RenderLoop::new(
            settings.tick_interval(),
            settings.starvation_notice_ticks,
            settings.window_size(),
        );
        let mut compositor = Self {
            keying: ChromaKeyConfig::from(&settings),
            controller: WindowTransparencyController::new(window, settings.top_most),
            factory,
            source,
            surface: None,
            render_loop,
            events,
            lifecycle: CompositorLifecycle::Idle,
            perf_from_env: perf_enabled_from_env(),
            client_size: settings.window_size(),
            settings,
        };
        compositor.sync_loop_settings();
        if let Err(err) = compositor.controller.install() {
            compositor.report_attribute_failure(&err);
        }
        (compositor, rx)
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn keying(&self) -> ChromaKeyConfig {
        self.keying
    }

    pub fn transparency_state(&self) -> WindowTransparencyState {
        self.controller.state()
    }

    pub fn active_backend(&self) -> Option<BackendKind> {
        self.surface.as_ref().map(Surface::kind)
    }

    pub fn lifecycle(&self) -> CompositorLifecycle {
        self.lifecycle
    }

    pub fn loop_lifecycle(&self) -> LoopLifecycle {
        self.render_loop.lifecycle()
    }

    pub fn busy_flag(&self) -> CompositeFlag {
        self.render_loop.busy_flag()
    }

    pub fn last_good_frame(&self) -> Option<&Frame> {
        self.render_loop.last_good_frame()
    }

    pub fn stats(&self) -> RenderPerfSnapshot {
        self.render_loop.stats().snapshot()
    }

    /// `None` while the loop is not scheduled.
    pub fn time_until_next_tick(&self, now: Instant) -> Option<Duration> {
        self.render_loop.ticker().time_until_due(now)
    }

    pub fn start(&mut self) -> StartOutcome {
        if self.lifecycle == CompositorLifecycle::TornDown {
            return StartOutcome::TornDown;
        }
        if self.render_loop.is_running() {
            return StartOutcome::AlreadyRunning;
        }

        let requested = self.settings.backend;
        let outcome = match self.surface.as_ref().map(Surface::kind) {
            Some(kind) => StartOutcome::Started(kind),
            None => match self.build_surface(requested) {
                BuildResult::Built(kind) => StartOutcome::Started(kind),
                BuildResult::Fallback(active) => StartOutcome::Fallback { requested, active },
                BuildResult::Unavailable => {
                    tracing::error!(%requested, "no surface available; overlay stays opaque");
                    return StartOutcome::Unavailable;
                }
            },
        };

        self.render_loop.start(Instant::now());
        self.lifecycle = CompositorLifecycle::Active;
        if let Some(backend) = self.active_backend() {
            tracing::info!(%backend, "compositor started");
            self.events.emit(CompositorEvent::Started { backend });
        }
        outcome
    }

    /// Stops ticking. The surface and window attributes stay as they are.
    pub fn stop(&mut self) -> StopOutcome {
        let outcome = self.render_loop.stop();
        if self.lifecycle == CompositorLifecycle::Active {
            self.lifecycle = CompositorLifecycle::Idle;
        }
        if outcome != StopOutcome::AlreadyStopped {
            self.events.emit(CompositorEvent::Stopped);
        }
        outcome
    }

    /// Full shutdown; call before the window is destroyed. Idempotent.
    pub fn teardown(&mut self) {
        if self.lifecycle == CompositorLifecycle::TornDown {
            return;
        }
        if self.cancel() != StopOutcome::AlreadyStopped {
            self.events.emit(CompositorEvent::Stopped);
        }
        self.render_loop.clear_frames();
        self.lifecycle = CompositorLifecycle::TornDown;
        tracing::info!("compositor torn down");
    }

    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.lifecycle == CompositorLifecycle::TornDown {
            return TickOutcome::Idle;
        }
        let Some(surface) = self.surface.as_mut() else {
            return TickOutcome::Idle;
        };
        let mode = self.controller.state().present_mode();
        self.render_loop.tick(
            now,
            TickContext {
                source: self.source.as_mut(),
                surface,
                keying: &self.keying,
                mode,
                events: &self.events,
            },
        )
    }

    pub fn client_size(&self) -> (u32, u32) {
        self.client_size
    }

    /// Reallocates the native back-buffer for a new client size. Surfaces built
    /// later start at this size too.
    pub fn resize(&mut self, width: u32, height: u32) {
        let size = (width.max(1), height.max(1));
        if size == self.client_size {
            return;
        }
        self.client_size = size;
        self.render_loop.set_placeholder_size(size);
        if let Some(Surface::Native(surface)) = self.surface.as_mut() {
            surface.resize(size.0, size.1);
        }
        tracing::debug!(width = size.0, height = size.1, "client area resized");
    }

    pub fn set_configuration(&mut self, mut settings: OverlaySettings) -> ConfigOutcome {
        if self.lifecycle == CompositorLifecycle::TornDown {
            return ConfigOutcome::TornDown;
        }
        settings.sanitize();
        if settings == self.settings {
            return ConfigOutcome::Unchanged;
        }

        let previous = std::mem::replace(&mut self.settings, settings);
        let previous_keying = self.keying;
        self.keying = ChromaKeyConfig::from(&self.settings);
        self.sync_loop_settings();
        if self.settings.window_size() != previous.window_size() {
            let (width, height) = self.settings.window_size();
            self.resize(width, height);
        }
        tracing::info!(
            enabled = self.settings.enabled,
            backend = %self.settings.backend,
            tolerance = self.settings.tolerance,
            click_through = self.settings.click_through,
            top_most = self.settings.top_most,
            "overlay settings applied"
        );

        let Some(active) = self.active_backend() else {
            return match self.controller.set_top_most(self.settings.top_most) {
                Ok(()) => ConfigOutcome::Applied,
                Err(err) => {
                    self.report_attribute_failure(&err);
                    ConfigOutcome::Degraded(attribute_op(&err))
                }
            };
        };

        if self.keying != previous_keying {
            self.render_loop.invalidate_keying();
        }
        let backend_changed = self.settings.backend != previous.backend;
        if backend_changed || self.settings.enabled != previous.enabled {
            return self.rebuild(backend_changed);
        }

        if self.keying != previous_keying {
            if let Some(surface) = self.surface.as_mut() {
                if let Err(err) = surface.configure_keying(&self.keying) {
                    tracing::warn!(%err, "surface rejected keying update");
                }
            }
        }
        if self.settings.content_address != previous.content_address {
            if let Some(Surface::Embedded(surface)) = self.surface.as_mut() {
                if let Err(err) = surface.navigate(&self.settings.content_address) {
                    tracing::warn!(%err, "embedded content navigation failed");
                }
            }
        }

        match self.apply_window_target(active) {
            Ok(()) => ConfigOutcome::Applied,
            Err(op) => ConfigOutcome::Degraded(op),
        }
    }

    /// Stop the loop, tear the surface down, reset the window to Opaque, in that order.
    fn cancel(&mut self) -> StopOutcome {
        let stopped = self.render_loop.stop();
        if let Some(mut surface) = self.surface.take() {
            let kind = surface.kind();
            surface.teardown();
            tracing::debug!(%kind, "surface torn down");
        }
        if let Err(err) = self.controller.reset_to_opaque() {
            self.report_attribute_failure(&err);
        }
        stopped
    }

    fn rebuild(&mut self, backend_changed: bool) -> ConfigOutcome {
        let restart = self.lifecycle == CompositorLifecycle::Active;
        self.cancel();
        if backend_changed {
            self.render_loop.clear_frames();
        }
        if !restart {
            return ConfigOutcome::Rebuilt;
        }

        let requested = self.settings.backend;
        let outcome = match self.build_surface(requested) {
            BuildResult::Built(_) => ConfigOutcome::Rebuilt,
            BuildResult::Fallback(active) => ConfigOutcome::Fallback {
                requested,
                active: Some(active),
            },
            BuildResult::Unavailable => {
                self.lifecycle = CompositorLifecycle::Idle;
                tracing::error!(%requested, "no surface available after rebuild; overlay stays opaque");
                return ConfigOutcome::Fallback {
                    requested,
                    active: None,
                };
            }
        };
        self.render_loop.start(Instant::now());
        outcome
    }

    /// Creates `requested`, falling back to the other backend once.
    fn build_surface(&mut self, requested: BackendKind) -> BuildResult {
        let error = match self.create_surface(requested) {
            Ok(()) => return BuildResult::Built(requested),
            Err(err) => err,
        };
        let fallback = requested.other();
        tracing::warn!(%error, %requested, %fallback, "backend unavailable; falling back");

        match self.create_surface(fallback) {
            Ok(()) => {
                self.events.emit(CompositorEvent::BackendFallback {
                    requested,
                    active: Some(fallback),
                    error: error.to_string(),
                });
                BuildResult::Fallback(fallback)
            }
            Err(fallback_error) => {
                tracing::error!(%fallback_error, %fallback, "fallback backend unavailable");
                self.events.emit(CompositorEvent::BackendFallback {
                    requested,
                    active: None,
                    error: error.to_string(),
                });
                if let Err(err) = self.controller.reset_to_opaque() {
                    self.report_attribute_failure(&err);
                }
                BuildResult::Unavailable
            }
        }
    }

    fn create_surface(&mut self, kind: BackendKind) -> Result<(), CompositorError> {
        if let Err(err) = self.controller.bind_backend(kind) {
            self.report_attribute_failure(&err);
        }
        let mut surface = self.factory.create(kind, &self.settings)?;
        if let Surface::Native(native) = &mut surface {
            native.resize(self.client_size.0, self.client_size.1);
        }
        tracing::info!(%kind, "surface created");
        self.surface = Some(surface);
        let _ = self.apply_window_target(kind);
        Ok(())
    }

    fn apply_window_target(&mut self, kind: BackendKind) -> Result<(), AttributeOp> {
        let target = WindowTransparencyState::target_for(&self.settings, kind);
        self.controller.apply(target).map_err(|err| {
            self.report_attribute_failure(&err);
            attribute_op(&err)
        })
    }

    fn sync_loop_settings(&mut self) {
        self.render_loop.set_interval(self.settings.tick_interval());
        self.render_loop
            .set_starvation_notice_ticks(self.settings.starvation_notice_ticks);
        self.render_loop
            .set_placeholder_size(self.client_size);
        let perf = self.settings.perf_stats || self.perf_from_env;
        self.render_loop.stats_mut().set_enabled(perf);
    }

    fn report_attribute_failure(&self, err: &CompositorError) {
        let op = attribute_op(err);
        tracing::warn!(%err, %op, "window attribute change rejected");
        self.events.emit(CompositorEvent::AttributeFailure {
            op,
            error: err.to_string(),
        });
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.teardown();
    }
}
