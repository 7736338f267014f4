use chroma_overlay::compositor::headless::{HeadlessSurfaceFactory, RecordingWindow};
use chroma_overlay::compositor::script::removal_routine;
use chroma_overlay::compositor::state::CompositorLifecycle;
use chroma_overlay::compositor::window::{LayeredAttributes, EX_STYLE_LAYERED};
use chroma_overlay::compositor::{
    frame_slot, BackendKind, Bgra, Compositor, CompositorEvent, ConfigOutcome, Frame,
    FrameProducer, KeyColor, PresentMode, StartOutcome, TickOutcome, TransparencyMode,
};
use chroma_overlay::error::AttributeOp;
use chroma_overlay::settings::OverlaySettings;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

struct Rig {
    compositor: Compositor,
    events: Receiver<CompositorEvent>,
    window: RecordingWindow,
    factory: HeadlessSurfaceFactory,
    producer: FrameProducer,
    base: Instant,
    step: u64,
}

fn settings(backend: BackendKind) -> OverlaySettings {
    OverlaySettings {
        backend,
        window_width: 4,
        window_height: 1,
        tick_interval_ms: 10,
        ..OverlaySettings::default()
    }
}

impl Rig {
    fn new(settings: OverlaySettings) -> Self {
        Self::with_factory(settings, HeadlessSurfaceFactory::new())
    }

    fn with_factory(settings: OverlaySettings, factory: HeadlessSurfaceFactory) -> Self {
        let window = RecordingWindow::new(0);
        let (producer, source) = frame_slot();
        let (compositor, events) = Compositor::new(
            Box::new(window.clone()),
            Box::new(factory.clone()),
            Box::new(source),
            settings,
        );
        Self {
            compositor,
            events,
            window,
            factory,
            producer,
            base: Instant::now(),
            step: 0,
        }
    }

    /// Each tick lands a full second after the previous one, so it is always due.
    fn tick(&mut self) -> TickOutcome {
        self.step += 1;
        self.compositor
            .tick(self.base + Duration::from_secs(self.step))
    }

    fn reconfigure(&mut self, change: impl FnOnce(&mut OverlaySettings)) -> ConfigOutcome {
        let mut next = self.compositor.settings().clone();
        change(&mut next);
        self.compositor.set_configuration(next)
    }

    fn drain(&self) -> Vec<CompositorEvent> {
        self.events.try_iter().collect()
    }
}

/// Green, near-green, blue, red.
fn test_card() -> Frame {
    let mut frame = Frame::transparent(4, 1);
    frame.set_pixel(0, 0, Bgra::opaque(0, 255, 0));
    frame.set_pixel(1, 0, Bgra::opaque(10, 245, 5));
    frame.set_pixel(2, 0, Bgra::opaque(0, 0, 255));
    frame.set_pixel(3, 0, Bgra::opaque(255, 0, 0));
    frame
}

#[test]
fn native_embedded_native_round_trip() {
    let mut rig = Rig::new(settings(BackendKind::Native));
    assert_eq!(
        rig.compositor.start(),
        StartOutcome::Started(BackendKind::Native)
    );

    rig.producer.publish(test_card());
    assert_eq!(rig.tick(), TickOutcome::Presented);
    let first_presenter = rig.factory.last_presenter().expect("native presenter");
    let first = first_presenter.last().expect("first present");
    assert_eq!(first.mode, PresentMode::ColorKey(KeyColor::GREEN));
    assert_eq!(first.frame.pixel(1, 0), Bgra::opaque(0, 255, 0));
    assert_eq!(first.frame.pixel(2, 0), Bgra::opaque(0, 0, 255));

    assert_eq!(
        rig.reconfigure(|s| s.backend = BackendKind::Embedded),
        ConfigOutcome::Rebuilt
    );
    assert!(first_presenter.is_released());
    assert_eq!(rig.compositor.active_backend(), Some(BackendKind::Embedded));
    assert_eq!(
        rig.window.layered_attributes(),
        Some(LayeredAttributes::ColorKey(KeyColor::GREEN))
    );
    assert_ne!(rig.window.ex_style() & EX_STYLE_LAYERED, 0);

    assert_eq!(rig.tick(), TickOutcome::Refreshed);
    let host = rig.factory.last_script_host().expect("script host");
    let script = host.last_script().expect("keying routine injected");
    assert!(script.contains("const keyR = 0, keyG = 255, keyB = 0;"));
    assert!(script.contains("const limit = 30 * 30;"));
    assert_eq!(host.background(), Some(KeyColor::GREEN));

    assert_eq!(
        rig.reconfigure(|s| s.backend = BackendKind::Native),
        ConfigOutcome::Rebuilt
    );
    assert!(host.is_closed());
    assert_eq!(host.last_script(), Some(removal_routine()));
    assert_eq!(host.background(), None);

    rig.producer.publish(test_card());
    assert_eq!(rig.tick(), TickOutcome::Presented);
    let second = rig
        .factory
        .last_presenter()
        .and_then(|p| p.last())
        .expect("second present");
    assert_eq!(second, first);
    assert_eq!(
        rig.factory.created(),
        vec![BackendKind::Native, BackendKind::Embedded, BackendKind::Native]
    );
    assert_eq!(
        rig.compositor.transparency_state().present_mode(),
        PresentMode::ColorKey(KeyColor::GREEN)
    );
}

#[test]
fn failing_backend_falls_back_once() {
    let factory = HeadlessSurfaceFactory::new();
    factory.set_failing(BackendKind::Embedded, true);
    let mut rig = Rig::with_factory(settings(BackendKind::Embedded), factory);

    assert_eq!(
        rig.compositor.start(),
        StartOutcome::Fallback {
            requested: BackendKind::Embedded,
            active: BackendKind::Native,
        }
    );
    assert_eq!(rig.compositor.active_backend(), Some(BackendKind::Native));
    assert_eq!(rig.compositor.settings().backend, BackendKind::Embedded);

    let fallbacks: Vec<_> = rig
        .drain()
        .into_iter()
        .filter(|e| matches!(e, CompositorEvent::BackendFallback { .. }))
        .collect();
    assert_eq!(fallbacks.len(), 1);
    assert!(matches!(
        &fallbacks[0],
        CompositorEvent::BackendFallback {
            requested: BackendKind::Embedded,
            active: Some(BackendKind::Native),
            ..
        }
    ));

    rig.producer.publish(test_card());
    assert_eq!(rig.tick(), TickOutcome::Presented);
}

#[test]
fn no_backend_leaves_the_window_opaque() {
    let factory = HeadlessSurfaceFactory::new();
    factory.set_failing(BackendKind::Native, true);
    factory.set_failing(BackendKind::Embedded, true);
    let mut rig = Rig::with_factory(settings(BackendKind::Native), factory);

    assert_eq!(rig.compositor.start(), StartOutcome::Unavailable);
    assert_eq!(rig.compositor.active_backend(), None);
    assert_eq!(
        rig.compositor.transparency_state().mode,
        TransparencyMode::Opaque
    );
    assert_eq!(rig.window.ex_style() & EX_STYLE_LAYERED, 0);
    assert_eq!(rig.tick(), TickOutcome::Idle);
    assert!(rig.drain().iter().any(|e| matches!(
        e,
        CompositorEvent::BackendFallback { active: None, .. }
    )));
}

#[test]
fn teardown_releases_everything_and_is_idempotent() {
    let mut rig = Rig::new(settings(BackendKind::Native));
    rig.compositor.start();
    rig.producer.publish(test_card());
    assert_eq!(rig.tick(), TickOutcome::Presented);
    let presenter = rig.factory.last_presenter().expect("presenter");

    rig.compositor.teardown();
    assert!(presenter.is_released());
    assert_eq!(rig.window.ex_style() & EX_STYLE_LAYERED, 0);
    assert_eq!(rig.compositor.lifecycle(), CompositorLifecycle::TornDown);
    assert!(rig.compositor.last_good_frame().is_none());
    assert_eq!(rig.tick(), TickOutcome::Idle);
    assert_eq!(rig.compositor.start(), StartOutcome::TornDown);
    assert_eq!(
        rig.reconfigure(|s| s.tolerance = 90),
        ConfigOutcome::TornDown
    );

    rig.compositor.teardown();
    let stopped = rig
        .drain()
        .into_iter()
        .filter(|e| *e == CompositorEvent::Stopped)
        .count();
    assert_eq!(stopped, 1);
}

#[test]
fn disabling_keying_rebuilds_and_presents_opaque() {
    let mut rig = Rig::new(settings(BackendKind::Native));
    rig.compositor.start();
    rig.producer.publish(test_card());
    assert_eq!(rig.tick(), TickOutcome::Presented);

    assert_eq!(rig.reconfigure(|s| s.enabled = false), ConfigOutcome::Rebuilt);
    assert_eq!(
        rig.compositor.transparency_state().mode,
        TransparencyMode::Opaque
    );
    assert_eq!(rig.tick(), TickOutcome::Reused);

    let record = rig
        .factory
        .last_presenter()
        .and_then(|p| p.last())
        .expect("present after rebuild");
    assert_eq!(record.mode, PresentMode::LayeredOpaque);
    assert_eq!(record.frame.pixel(1, 0), Bgra::opaque(10, 245, 5));
}

#[test]
fn rejected_style_write_degrades_without_stopping() {
    let mut rig = Rig::new(settings(BackendKind::Native));
    rig.compositor.start();
    rig.drain();

    rig.window.fail_always(AttributeOp::WriteStyle);
    assert_eq!(
        rig.reconfigure(|s| s.click_through = false),
        ConfigOutcome::Degraded(AttributeOp::WriteStyle)
    );
    assert!(rig.compositor.transparency_state().click_through);
    assert!(rig.drain().iter().any(|e| matches!(
        e,
        CompositorEvent::AttributeFailure {
            op: AttributeOp::WriteStyle,
            ..
        }
    )));

    rig.producer.publish(test_card());
    assert_eq!(rig.tick(), TickOutcome::Presented);

    rig.window.heal();
    assert_eq!(
        rig.reconfigure(|s| s.top_most = false),
        ConfigOutcome::Applied
    );
    assert!(!rig.compositor.transparency_state().click_through);
    assert!(!rig.window.top_most());
}

#[test]
fn embedded_content_is_rekeyed_after_reload_and_tolerance_change() {
    let mut rig = Rig::new(settings(BackendKind::Embedded));
    assert_eq!(
        rig.compositor.start(),
        StartOutcome::Started(BackendKind::Embedded)
    );
    let host = rig.factory.last_script_host().expect("script host");
    assert_eq!(host.address().as_deref(), Some("ws://localhost:8888"));

    assert_eq!(rig.tick(), TickOutcome::Refreshed);
    assert_eq!(rig.tick(), TickOutcome::Refreshed);
    assert_eq!(host.scripts().len(), 1);

    host.complete_load();
    rig.tick();
    assert_eq!(host.scripts().len(), 2);

    assert_eq!(rig.reconfigure(|s| s.tolerance = 50), ConfigOutcome::Applied);
    assert_eq!(host.scripts().len(), 3);
    let script = host.last_script().expect("re-keyed routine");
    assert!(script.contains("const limit = 50 * 50;"));

    assert_eq!(
        rig.reconfigure(|s| s.content_address = "ws://localhost:9999".into()),
        ConfigOutcome::Applied
    );
    assert_eq!(
        host.navigations(),
        vec!["ws://localhost:8888".to_string(), "ws://localhost:9999".to_string()]
    );
}

#[test]
fn configuration_before_start_only_touches_z_order() {
    let mut rig = Rig::new(settings(BackendKind::Native));
    assert_eq!(rig.reconfigure(|s| s.top_most = false), ConfigOutcome::Applied);
    assert!(!rig.window.top_most());
    assert_eq!(rig.compositor.active_backend(), None);
    assert_eq!(rig.reconfigure(|s| s.top_most = false), ConfigOutcome::Unchanged);

    assert_eq!(
        rig.compositor.start(),
        StartOutcome::Started(BackendKind::Native)
    );
    assert_eq!(rig.compositor.start(), StartOutcome::AlreadyRunning);
}

#[test]
fn resize_reallocates_the_presented_back_buffer() {
    let mut rig = Rig::new(settings(BackendKind::Native));
    rig.compositor.start();
    rig.producer.publish(test_card());
    assert_eq!(rig.tick(), TickOutcome::Presented);
    let presenter = rig.factory.last_presenter().expect("presenter");
    assert_eq!(presenter.last().map(|r| r.frame.size()), Some((4, 1)));

    rig.compositor.resize(8, 2);
    presenter.set_client_size(8, 2);
    rig.producer.publish(test_card());
    assert_eq!(rig.tick(), TickOutcome::Presented);
    let record = presenter.last().expect("resized present");
    assert_eq!(record.frame.size(), (8, 2));
    assert_eq!(record.frame.pixel(5, 1), Bgra::opaque(0, 0, 255));
    assert_eq!(record.frame.pixel(7, 0), Bgra::opaque(255, 0, 0));

    // A client size the owner never reported does not move the back-buffer.
    presenter.set_client_size(2, 2);
    assert_eq!(rig.tick(), TickOutcome::Reused);
    assert_eq!(presenter.last().map(|r| r.frame.size()), Some((8, 2)));
}

#[test]
fn rebuilt_surface_keeps_the_resized_client_area() {
    let mut rig = Rig::new(settings(BackendKind::Native));
    rig.compositor.start();
    rig.compositor.resize(6, 3);
    assert_eq!(rig.compositor.client_size(), (6, 3));

    assert_eq!(rig.reconfigure(|s| s.enabled = false), ConfigOutcome::Rebuilt);
    assert_eq!(rig.tick(), TickOutcome::Placeholder);
    let record = rig
        .factory
        .last_presenter()
        .and_then(|p| p.last())
        .expect("placeholder present");
    assert_eq!(record.frame.size(), (6, 3));
}

#[test]
fn alpha_blend_presents_premultiplied_frames_every_tick() {
    let mut rig = Rig::new(OverlaySettings {
        per_pixel_alpha: true,
        ..settings(BackendKind::Native)
    });
    assert_eq!(
        rig.compositor.start(),
        StartOutcome::Started(BackendKind::Native)
    );
    assert_eq!(
        rig.compositor.transparency_state().mode,
        TransparencyMode::AlphaBlend
    );
    assert_ne!(rig.window.ex_style() & EX_STYLE_LAYERED, 0);
    assert_eq!(rig.window.layered_attributes(), None);

    rig.producer.publish(test_card());
    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(rig.tick());
        let record = rig
            .factory
            .last_presenter()
            .and_then(|p| p.last())
            .expect("present");
        assert_eq!(record.mode, PresentMode::PerPixelAlpha);
        assert_eq!(record.frame.size(), (4, 1));
        assert_eq!(record.frame.pixel(0, 0), Bgra::TRANSPARENT);
        assert_eq!(record.frame.pixel(1, 0), Bgra::TRANSPARENT);
        assert_eq!(record.frame.pixel(2, 0), Bgra::opaque(0, 0, 255));
        assert_eq!(record.frame.pixel(3, 0), Bgra::opaque(255, 0, 0));
    }
    assert_eq!(
        outcomes,
        vec![TickOutcome::Presented, TickOutcome::Reused, TickOutcome::Reused]
    );
}
