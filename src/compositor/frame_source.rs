use crate::compositor::chroma::KeyColor;
use crate::compositor::frame::{Bgra, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Per-tick, non-blocking pull of the next frame.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Frame>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<Frame>,
{
    fn next_frame(&mut self) -> Option<Frame> {
        self()
    }
}

#[derive(Debug, Default)]
struct SlotShared {
    pending: Mutex<Option<Frame>>,
    dropped: AtomicU64,
    published: AtomicU64,
}

/// Producer half of the single-slot hand-off. May live on another thread.
#[derive(Debug, Clone)]
pub struct FrameProducer {
    shared: Arc<SlotShared>,
}

/// Consumer half, read by the render loop on the owner thread.
#[derive(Debug)]
pub struct SlotSource {
    shared: Arc<SlotShared>,
}

/// Creates a latest-frame-wins hand-off holding at most one pending frame.
pub fn frame_slot() -> (FrameProducer, SlotSource) {
    let shared = Arc::new(SlotShared::default());
    (
        FrameProducer {
            shared: shared.clone(),
        },
        SlotSource { shared },
    )
}

impl FrameProducer {
    /// Replaces any frame the loop has not picked up yet.
    pub fn publish(&self, frame: Frame) {
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        let Ok(mut pending) = self.shared.pending.lock() else {
            return;
        };
        if pending.replace(frame).is_some() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl SlotSource {
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }
}

impl FrameSource for SlotSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.shared.pending.lock().ok().and_then(|mut p| p.take())
    }
}

/// Key-coloured background with a bouncing disc, for demos and benches.
#[derive(Debug, Clone)]
pub struct PatternSource {
    width: u32,
    height: u32,
    background: KeyColor,
    foreground: Bgra,
    step: u32,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, background: KeyColor) -> Self {
        Self {
            width,
            height,
            background,
            foreground: Bgra::opaque(30, 60, 220),
            step: 0,
        }
    }

    pub fn render(&self, step: u32) -> Frame {
        let mut frame = Frame::filled(self.width, self.height, self.background.to_bgra());
        let radius = (self.width.min(self.height) / 5).max(1) as i64;
        let travel = (self.width as i64 - 2 * radius).max(1);
        let phase = (step as i64 * 4) % (2 * travel);
        let offset = if phase < travel { phase } else { 2 * travel - phase };
        let cx = radius + offset;
        let cy = self.height as i64 / 2;

        for y in (cy - radius).max(0)..(cy + radius).min(self.height as i64) {
            for x in (cx - radius).max(0)..(cx + radius).min(self.width as i64) {
                let (dx, dy) = (x - cx, y - cy);
                if dx * dx + dy * dy <= radius * radius {
                    frame.set_pixel(x as u32, y as u32, self.foreground);
                }
            }
        }
        frame
    }
}

impl FrameSource for PatternSource {
    fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.render(self.step);
        self.step = self.step.wrapping_add(1);
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::{frame_slot, FrameSource, PatternSource};
    use crate::compositor::chroma::KeyColor;
    use crate::compositor::frame::{Bgra, Frame};

    #[test]
    fn slot_keeps_only_the_latest_frame() {
        let (producer, mut source) = frame_slot();
        producer.publish(Frame::filled(1, 1, Bgra::opaque(1, 0, 0)));
        producer.publish(Frame::filled(1, 1, Bgra::opaque(2, 0, 0)));

        let frame = source.next_frame().expect("latest frame");
        assert_eq!(frame.pixel(0, 0).r, 2);
        assert!(source.next_frame().is_none());
        assert_eq!(source.dropped(), 1);
        assert_eq!(source.published(), 2);
    }

    #[test]
    fn producer_can_publish_from_another_thread() {
        let (producer, mut source) = frame_slot();
        std::thread::spawn(move || producer.publish(Frame::transparent(2, 2)))
            .join()
            .expect("producer thread");
        assert_eq!(source.next_frame().map(|f| f.size()), Some((2, 2)));
    }

    #[test]
    fn pattern_has_key_corners_and_opaque_disc() {
        let pattern = PatternSource::new(100, 50, KeyColor::GREEN);
        let frame = pattern.render(0);
        assert_eq!(frame.pixel(99, 0), Bgra::opaque(0, 255, 0));
        assert_eq!(frame.pixel(10, 25), Bgra::opaque(30, 60, 220));
    }
}
