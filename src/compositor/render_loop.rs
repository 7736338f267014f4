use crate::compositor::chroma::{self, ChromaKeyConfig};
use crate::compositor::frame::Frame;
use crate::compositor::frame_source::FrameSource;
use crate::compositor::messages::{CompositorEvent, EventSink};
use crate::compositor::perf::RenderPerfStats;
use crate::compositor::state::{can_transition, LoopLifecycle};
use crate::compositor::surface::{PresentMode, Surface};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(33);
const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed-interval schedule. Missed ticks collapse into one; there is no catch-up burst.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.max(Duration::from_millis(1));
    }

    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.next_due.map(|due| due.saturating_duration_since(now))
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }
        let mut next = due + self.interval;
        if next <= now {
            next = now + self.interval;
        }
        self.next_due = Some(next);
        true
    }
}

/// Set while a composite runs. Clones share the flag so other threads can observe it.
#[derive(Debug, Clone, Default)]
pub struct CompositeFlag {
    busy: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct CompositeGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for CompositeGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl CompositeFlag {
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self) -> Option<CompositeGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CompositeGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    NotDue,
    SkippedBusy,
    Presented,
    /// No new frame; the last good frame went out again.
    Reused,
    Placeholder,
    /// Embedded surface: keying routine checked and re-injected if needed.
    Refreshed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
    /// The in-flight composite did not finish in time; the loop is stopped anyway.
    TimedOut,
}

/// What one tick needs from its owner.
pub struct TickContext<'a> {
    pub source: &'a mut dyn FrameSource,
    pub surface: &'a mut Surface,
    pub keying: &'a ChromaKeyConfig,
    pub mode: PresentMode,
    pub events: &'a EventSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOrigin {
    Fresh,
    Rekeyed,
    Placeholder,
}

#[derive(Debug)]
pub struct RenderLoop {
    lifecycle: LoopLifecycle,
    ticker: Ticker,
    busy: CompositeFlag,
    last_raw: Option<Frame>,
    last_good: Option<Frame>,
    scratch: Frame,
    rekey_pending: bool,
    idle_ticks: u32,
    starvation_notice_ticks: u32,
    starvation_reported: bool,
    placeholder_size: (u32, u32),
    stats: RenderPerfStats,
}

impl RenderLoop {
    pub fn new(interval: Duration, starvation_notice_ticks: u32, placeholder_size: (u32, u32)) -> Self {
        Self {
            lifecycle: LoopLifecycle::Stopped,
            ticker: Ticker::new(interval),
            busy: CompositeFlag::default(),
            last_raw: None,
            last_good: None,
            scratch: Frame::default(),
            rekey_pending: false,
            idle_ticks: 0,
            starvation_notice_ticks: starvation_notice_ticks.max(1),
            starvation_reported: false,
            placeholder_size,
            stats: RenderPerfStats::disabled(),
        }
    }

    pub fn lifecycle(&self) -> LoopLifecycle {
        self.lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn busy_flag(&self) -> CompositeFlag {
        self.busy.clone()
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.ticker.set_interval(interval);
    }

    pub fn set_starvation_notice_ticks(&mut self, ticks: u32) {
        self.starvation_notice_ticks = ticks.max(1);
    }

    pub fn set_placeholder_size(&mut self, size: (u32, u32)) {
        self.placeholder_size = size;
    }

    pub fn stats(&self) -> &RenderPerfStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut RenderPerfStats {
        &mut self.stats
    }

    pub fn last_good_frame(&self) -> Option<&Frame> {
        self.last_good.as_ref()
    }

    /// The retained raw frame is re-keyed on the next tick.
    pub fn invalidate_keying(&mut self) {
        self.rekey_pending = true;
    }

    pub fn clear_frames(&mut self) {
        self.last_raw = None;
        self.last_good = None;
        self.scratch = Frame::default();
        self.rekey_pending = false;
    }

    fn transition(&mut self, to: LoopLifecycle) -> bool {
        if !can_transition(self.lifecycle, to) {
            tracing::warn!(from = ?self.lifecycle, to = ?to, "invalid render loop transition");
            return false;
        }
        self.lifecycle = to;
        true
    }

    pub fn start(&mut self, now: Instant) -> bool {
        if self.lifecycle != LoopLifecycle::Stopped || !self.transition(LoopLifecycle::Running) {
            return false;
        }
        self.ticker.arm(now);
        self.idle_ticks = 0;
        self.starvation_reported = false;
        tracing::info!(interval_ms = self.ticker.interval().as_millis() as u64, "render loop started");
        true
    }

    /// Cancels the pending tick and waits for an in-flight composite. Idempotent.
    pub fn stop(&mut self) -> StopOutcome {
        if self.lifecycle == LoopLifecycle::Stopped {
            return StopOutcome::AlreadyStopped;
        }
        self.transition(LoopLifecycle::Stopping);
        self.ticker.cancel();
        let drained = self.busy.wait_idle(STOP_WAIT_TIMEOUT);
        self.transition(LoopLifecycle::Stopped);
        if drained {
            tracing::info!("render loop stopped");
            StopOutcome::Stopped
        } else {
            tracing::warn!("render loop stopped while a composite was still in flight");
            StopOutcome::TimedOut
        }
    }

    pub fn tick(&mut self, now: Instant, ctx: TickContext<'_>) -> TickOutcome {
        if !self.lifecycle.is_running() {
            return TickOutcome::Idle;
        }
        if !self.ticker.poll(now) {
            return TickOutcome::NotDue;
        }
        self.composite(now, ctx)
    }

    fn composite(&mut self, now: Instant, ctx: TickContext<'_>) -> TickOutcome {
        let Some(_guard) = self.busy.try_acquire() else {
            self.stats.record_skip();
            tracing::debug!("composite still in flight; tick dropped");
            return TickOutcome::SkippedBusy;
        };

        if let Surface::Embedded(surface) = &mut *ctx.surface {
            return match surface.refresh() {
                Ok(_) => TickOutcome::Refreshed,
                Err(err) => {
                    tracing::warn!(%err, "embedded keying refresh failed");
                    TickOutcome::Failed
                }
            };
        }

        let started = Instant::now();
        let origin = match ctx.source.next_frame() {
            Some(frame) => {
                self.idle_ticks = 0;
                self.starvation_reported = false;
                self.last_raw = Some(frame);
                FrameOrigin::Fresh
            }
            None => {
                self.note_starvation(ctx.events);
                if self.last_good.is_some() && !self.rekey_pending {
                    return self.present_last_good(now, started, ctx);
                }
                if self.last_raw.is_some() {
                    FrameOrigin::Rekeyed
                } else {
                    FrameOrigin::Placeholder
                }
            }
        };

        let placeholder;
        let raw = match (&self.last_raw, origin) {
            (Some(raw), FrameOrigin::Fresh | FrameOrigin::Rekeyed) => raw,
            _ => {
                let (w, h) = self.placeholder_size;
                placeholder = Frame::filled(w, h, ctx.keying.key.to_bgra());
                &placeholder
            }
        };
        chroma::apply_into(raw, &mut self.scratch, ctx.keying);

        if let Err(err) = ctx.surface.present(&self.scratch, ctx.mode) {
            self.stats.record_failure();
            tracing::warn!(%err, "present failed; keeping last good frame");
            return TickOutcome::Failed;
        }

        if self.stats.enabled() {
            self.stats
                .record_keyed_pixels(chroma::count_keyed(&self.scratch, ctx.keying));
        }
        self.stats
            .record_present(now, started.elapsed(), origin != FrameOrigin::Fresh);
        self.stats.maybe_report(now);

        match origin {
            FrameOrigin::Placeholder => TickOutcome::Placeholder,
            FrameOrigin::Fresh | FrameOrigin::Rekeyed => {
                let presented = std::mem::take(&mut self.scratch);
                if let Some(previous) = self.last_good.replace(presented) {
                    self.scratch = previous;
                }
                self.rekey_pending = false;
                if origin == FrameOrigin::Fresh {
                    TickOutcome::Presented
                } else {
                    TickOutcome::Reused
                }
            }
        }
    }

    fn present_last_good(
        &mut self,
        now: Instant,
        started: Instant,
        ctx: TickContext<'_>,
    ) -> TickOutcome {
        let Some(last_good) = self.last_good.as_ref() else {
            return TickOutcome::Failed;
        };
        if let Err(err) = ctx.surface.present(last_good, ctx.mode) {
            self.stats.record_failure();
            tracing::warn!(%err, "re-present of last good frame failed");
            return TickOutcome::Failed;
        }
        self.stats.record_present(now, started.elapsed(), true);
        self.stats.maybe_report(now);
        TickOutcome::Reused
    }

    fn note_starvation(&mut self, events: &EventSink) {
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if !self.starvation_reported && self.idle_ticks >= self.starvation_notice_ticks {
            self.starvation_reported = true;
            tracing::info!(idle_ticks = self.idle_ticks, "frame source starved; re-presenting last frame");
            events.emit(CompositorEvent::FrameStarvation {
                idle_ticks: self.idle_ticks,
            });
        }
    }
}
