use chroma_overlay::compositor::chroma::{ChromaKeyConfig, KeyColor};
use chroma_overlay::compositor::frame::{Bgra, Frame};
use chroma_overlay::compositor::frame_source::{frame_slot, FrameSource};
use chroma_overlay::compositor::headless::MemoryPresenter;
use chroma_overlay::compositor::messages::{CompositorEvent, EventSink};
use chroma_overlay::compositor::render_loop::{RenderLoop, StopOutcome, TickContext, TickOutcome};
use chroma_overlay::compositor::state::LoopLifecycle;
use chroma_overlay::compositor::surface::{NativeSurface, PresentMode, Surface};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

const INTERVAL: Duration = Duration::from_millis(10);

struct Harness {
    render_loop: RenderLoop,
    surface: Surface,
    presenter: MemoryPresenter,
    keying: ChromaKeyConfig,
    mode: PresentMode,
    events: EventSink,
    rx: Receiver<CompositorEvent>,
    start: Instant,
    step: u32,
}

impl Harness {
    fn new(width: u32, height: u32, starvation_notice_ticks: u32) -> Self {
        let presenter = MemoryPresenter::new(width, height);
        let surface = Surface::Native(NativeSurface::new(Box::new(presenter.clone())));
        let (events, rx) = EventSink::new();
        let mut render_loop = RenderLoop::new(INTERVAL, starvation_notice_ticks, (width, height));
        let start = Instant::now();
        assert!(render_loop.start(start));
        Self {
            render_loop,
            surface,
            presenter,
            keying: ChromaKeyConfig::default(),
            mode: PresentMode::ColorKey(KeyColor::GREEN),
            events,
            rx,
            start,
            step: 0,
        }
    }

    /// Ticks at the next scheduled instant.
    fn tick(&mut self, source: &mut dyn FrameSource) -> TickOutcome {
        let now = self.start + INTERVAL * self.step;
        self.step += 1;
        self.render_loop.tick(
            now,
            TickContext {
                source,
                surface: &mut self.surface,
                keying: &self.keying,
                mode: self.mode,
                events: &self.events,
            },
        )
    }

    fn starvation_notices(&self) -> Vec<u32> {
        self.rx
            .try_iter()
            .filter_map(|event| match event {
                CompositorEvent::FrameStarvation { idle_ticks } => Some(idle_ticks),
                _ => None,
            })
            .collect()
    }
}

fn never() -> impl FnMut() -> Option<Frame> {
    || None
}

#[test]
fn first_frame_is_re_presented_forever_when_source_dries_up() {
    let mut harness = Harness::new(4, 4, 1000);
    let mut first = Some(Frame::filled(4, 4, Bgra::opaque(200, 10, 10)));
    let mut source = move || first.take();

    assert_eq!(harness.tick(&mut source), TickOutcome::Presented);
    let presented = harness.presenter.last().expect("first present");
    for _ in 0..50 {
        assert_eq!(harness.tick(&mut source), TickOutcome::Reused);
    }

    assert_eq!(harness.presenter.presented(), 51);
    assert_eq!(harness.presenter.last(), Some(presented));
}

#[test]
fn placeholder_is_fully_see_through_before_any_frame() {
    let mut harness = Harness::new(8, 6, 1000);
    harness.mode = PresentMode::PerPixelAlpha;
    let mut source = never();

    assert_eq!(harness.tick(&mut source), TickOutcome::Placeholder);
    let record = harness.presenter.last().expect("placeholder present");
    assert_eq!(record.frame.size(), (8, 6));
    assert!(record.frame.as_bytes().iter().all(|b| *b == 0));
    assert!(harness.render_loop.last_good_frame().is_none());
}

#[test]
fn overlapping_composite_drops_the_tick() {
    let mut harness = Harness::new(2, 2, 1000);
    let (producer, mut source) = frame_slot();
    producer.publish(Frame::filled(2, 2, Bgra::opaque(1, 2, 3)));

    let guard = harness
        .render_loop
        .busy_flag()
        .try_acquire()
        .expect("flag free");
    assert_eq!(harness.tick(&mut source), TickOutcome::SkippedBusy);
    assert_eq!(harness.presenter.presented(), 0);
    drop(guard);

    assert_eq!(harness.tick(&mut source), TickOutcome::Presented);
}

#[test]
fn ticks_before_the_interval_elapses_are_not_due() {
    let mut harness = Harness::new(2, 2, 1000);
    let mut source = never();
    let now = harness.start;
    assert_eq!(harness.tick(&mut source), TickOutcome::Placeholder);

    let early = harness.render_loop.tick(
        now + Duration::from_millis(3),
        TickContext {
            source: &mut source,
            surface: &mut harness.surface,
            keying: &harness.keying,
            mode: harness.mode,
            events: &harness.events,
        },
    );
    assert_eq!(early, TickOutcome::NotDue);
}

#[test]
fn stop_is_idempotent_and_silences_ticks() {
    let mut harness = Harness::new(2, 2, 1000);
    let mut source = never();

    assert_eq!(harness.render_loop.stop(), StopOutcome::Stopped);
    assert_eq!(harness.render_loop.stop(), StopOutcome::AlreadyStopped);
    assert_eq!(harness.render_loop.lifecycle(), LoopLifecycle::Stopped);
    assert_eq!(harness.tick(&mut source), TickOutcome::Idle);
    assert_eq!(harness.presenter.presented(), 0);
}

#[test]
fn stop_waits_for_in_flight_composite() {
    let mut harness = Harness::new(2, 2, 1000);
    let flag = harness.render_loop.busy_flag();
    let guard = flag.try_acquire().expect("flag free");
    let worker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        drop(guard);
    });

    assert_eq!(harness.render_loop.stop(), StopOutcome::Stopped);
    assert!(!flag.is_busy());
    worker.join().expect("worker");
}

#[test]
fn starvation_is_reported_once_and_rearms_on_new_frame() {
    let mut harness = Harness::new(2, 2, 3);
    let (producer, mut source) = frame_slot();

    for _ in 0..10 {
        harness.tick(&mut source);
    }
    assert_eq!(harness.starvation_notices(), vec![3]);

    producer.publish(Frame::filled(2, 2, Bgra::opaque(9, 9, 9)));
    assert_eq!(harness.tick(&mut source), TickOutcome::Presented);
    for _ in 0..5 {
        harness.tick(&mut source);
    }
    assert_eq!(harness.starvation_notices(), vec![3]);
}

#[test]
fn keying_change_rekeys_the_retained_frame() {
    let mut harness = Harness::new(1, 1, 1000);
    let (producer, mut source) = frame_slot();
    producer.publish(Frame::filled(1, 1, Bgra::opaque(0, 200, 0)));

    assert_eq!(harness.tick(&mut source), TickOutcome::Presented);
    let kept = harness.render_loop.last_good_frame().expect("last good");
    assert_eq!(kept.pixel(0, 0).a, 255);

    harness.keying.tolerance = 60;
    harness.render_loop.invalidate_keying();
    assert_eq!(harness.tick(&mut source), TickOutcome::Reused);
    let rekeyed = harness.render_loop.last_good_frame().expect("last good");
    assert_eq!(rekeyed.pixel(0, 0).a, 0);
    assert_eq!(
        harness.presenter.last().map(|r| r.frame.pixel(0, 0)),
        Some(Bgra::opaque(0, 255, 0))
    );
}

#[test]
fn failed_present_keeps_the_last_good_frame() {
    let mut harness = Harness::new(1, 1, 1000);
    let (producer, mut source) = frame_slot();
    producer.publish(Frame::filled(1, 1, Bgra::opaque(7, 7, 7)));
    assert_eq!(harness.tick(&mut source), TickOutcome::Presented);

    harness.presenter.fail_next_presents(1);
    producer.publish(Frame::filled(1, 1, Bgra::opaque(8, 8, 8)));
    assert_eq!(harness.tick(&mut source), TickOutcome::Failed);

    let kept = harness.render_loop.last_good_frame().expect("last good");
    assert_eq!(kept.pixel(0, 0), Bgra::opaque(7, 7, 7));
    assert_eq!(harness.tick(&mut source), TickOutcome::Reused);
}

#[test]
fn small_frames_are_stretched_to_the_client_area() {
    let mut harness = Harness::new(4, 2, 1000);
    harness.mode = PresentMode::Blit;
    let (producer, mut source) = frame_slot();
    let mut frame = Frame::transparent(2, 1);
    frame.set_pixel(0, 0, Bgra::opaque(255, 0, 0));
    frame.set_pixel(1, 0, Bgra::opaque(0, 0, 255));
    producer.publish(frame);

    assert_eq!(harness.tick(&mut source), TickOutcome::Presented);
    let presented = harness.presenter.last().expect("present").frame;
    assert_eq!(presented.size(), (4, 2));
    assert_eq!(presented.pixel(1, 1), Bgra::opaque(255, 0, 0));
    assert_eq!(presented.pixel(2, 0), Bgra::opaque(0, 0, 255));
}

#[test]
fn latest_frame_wins_under_a_fast_producer() {
    let mut harness = Harness::new(1, 1, 1000);
    let (producer, mut source) = frame_slot();
    for shade in 0..5u8 {
        producer.publish(Frame::filled(1, 1, Bgra::opaque(shade, shade, 100)));
    }

    assert_eq!(harness.tick(&mut source), TickOutcome::Presented);
    let kept = harness.render_loop.last_good_frame().expect("last good");
    assert_eq!(kept.pixel(0, 0), Bgra::opaque(4, 4, 100));
    assert_eq!(producer.dropped(), 4);
}
