#![cfg_attr(feature = "windows_gui", windows_subsystem = "windows")]

use chroma_overlay::compositor::{
    frame_slot, Compositor, CompositorEvent, FrameProducer, PatternSource, StartOutcome,
};
use chroma_overlay::settings::OverlaySettings;
use chroma_overlay::{logging, settings_store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const MAX_IDLE_SLEEP: Duration = Duration::from_millis(15);
#[cfg(not(windows))]
const HEADLESS_TICKS: u32 = 90;

fn main() -> anyhow::Result<()> {
    let (settings, load_error) = match settings_store::load() {
        Ok(settings) => (settings, None),
        Err(err) => (OverlaySettings::default(), Some(err)),
    };
    logging::init(settings.debug_logging, settings.log_file.clone());
    if let Some(err) = load_error {
        tracing::warn!("{err:#}; using default overlay settings");
    }
    run(settings)
}

struct PatternProducer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PatternProducer {
    fn spawn(producer: FrameProducer, settings: &OverlaySettings) -> anyhow::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (width, height) = settings.window_size();
        let pattern = PatternSource::new(width, height, settings.key_color);
        let interval = settings.tick_interval();
        let handle = thread::Builder::new()
            .name("pattern-producer".to_string())
            .spawn(move || {
                let mut step = 0u32;
                while !stop_flag.load(Ordering::Relaxed) {
                    producer.publish(pattern.render(step));
                    step = step.wrapping_add(1);
                    thread::sleep(interval);
                }
            })?;
        Ok(Self { stop, handle })
    }

    fn finish(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            tracing::warn!("pattern producer thread panicked");
        }
    }
}

fn log_start(outcome: StartOutcome) {
    match outcome {
        StartOutcome::Started(backend) => tracing::info!(%backend, "overlay running"),
        StartOutcome::Fallback { requested, active } => {
            tracing::warn!(%requested, %active, "overlay running on fallback backend")
        }
        other => tracing::error!(?other, "overlay could not start; window stays opaque"),
    }
}

fn drain_events(events: &Receiver<CompositorEvent>) {
    for event in events.try_iter() {
        match event {
            CompositorEvent::BackendFallback {
                requested,
                active,
                error,
            } => tracing::warn!(%requested, ?active, %error, "backend fallback"),
            CompositorEvent::AttributeFailure { op, error } => {
                tracing::warn!(%op, %error, "window attribute failure")
            }
            CompositorEvent::FrameStarvation { idle_ticks } => {
                tracing::info!(idle_ticks, "waiting for frames")
            }
            CompositorEvent::Started { backend } => tracing::debug!(%backend, "started"),
            CompositorEvent::Stopped => tracing::debug!("stopped"),
        }
    }
}

fn idle_sleep(compositor: &Compositor) {
    let wait = compositor
        .time_until_next_tick(Instant::now())
        .unwrap_or(MAX_IDLE_SLEEP)
        .min(MAX_IDLE_SLEEP);
    if !wait.is_zero() {
        thread::sleep(wait);
    }
}

#[cfg(windows)]
fn run(settings: OverlaySettings) -> anyhow::Result<()> {
    use chroma_overlay::compositor::platform::{pump_messages, HostWindow};

    let window = HostWindow::create(&settings)?;
    let (producer, source) = frame_slot();
    let pattern = PatternProducer::spawn(producer.clone(), &settings)?;

    let (mut compositor, events) = Compositor::new(
        Box::new(window.attributes()),
        Box::new(window.surface_factory()),
        Box::new(source),
        settings,
    );
    log_start(compositor.start());

    while pump_messages() {
        if let Some((width, height)) = window.client_size() {
            compositor.resize(width, height);
        }
        compositor.tick(Instant::now());
        drain_events(&events);
        idle_sleep(&compositor);
    }

    compositor.teardown();
    drain_events(&events);
    pattern.finish();
    tracing::info!(dropped_frames = producer.dropped(), "overlay closed");
    drop(window);
    Ok(())
}

#[cfg(not(windows))]
fn run(settings: OverlaySettings) -> anyhow::Result<()> {
    use chroma_overlay::compositor::headless::{HeadlessSurfaceFactory, RecordingWindow};
    use chroma_overlay::compositor::TickOutcome;

    tracing::info!("no native window support on this platform; running headless");
    let window = RecordingWindow::new(0);
    let factory = HeadlessSurfaceFactory::new();
    let (producer, source) = frame_slot();
    let pattern = PatternProducer::spawn(producer.clone(), &settings)?;

    let (mut compositor, events) = Compositor::new(
        Box::new(window.clone()),
        Box::new(factory.clone()),
        Box::new(source),
        settings,
    );
    log_start(compositor.start());

    let mut ticks = 0u32;
    while ticks < HEADLESS_TICKS {
        match compositor.tick(Instant::now()) {
            TickOutcome::Idle => break,
            TickOutcome::NotDue => idle_sleep(&compositor),
            _ => ticks += 1,
        }
        drain_events(&events);
    }

    let stats = compositor.stats();
    compositor.teardown();
    drain_events(&events);
    pattern.finish();

    let presented = factory
        .last_presenter()
        .map(|presenter| presenter.presented())
        .unwrap_or(0);
    tracing::info!(
        ticks,
        presented,
        dropped_frames = producer.dropped(),
        ex_style = format_args!("{:#010x}", window.ex_style()),
        avg_ms = stats.avg_ms,
        p95_ms = stats.p95_ms,
        "headless run finished"
    );
    Ok(())
}
