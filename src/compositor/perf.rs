use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const RENDER_PERF_DEBUG_ENV: &str = "CHROMA_OVERLAY_PERF_DEBUG";
const DEFAULT_WINDOW_SIZE: usize = 120;
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderPerfSnapshot {
    pub enabled: bool,
    pub avg_ms: f64,
    pub worst_ms: f64,
    pub p95_ms: f64,
    pub effective_present_hz: f64,
    pub presented: u64,
    pub reused: u64,
    pub skipped_busy: u64,
    pub present_failures: u64,
    pub keyed_pixels_last: u64,
    pub frame_samples: usize,
}

#[derive(Debug, Clone)]
pub struct RenderPerfStats {
    enabled: bool,
    window_size: usize,
    composite_ms_window: VecDeque<f64>,
    present_window: VecDeque<Instant>,
    presented: u64,
    reused: u64,
    skipped_busy: u64,
    present_failures: u64,
    keyed_pixels_last: u64,
    last_report: Option<Instant>,
}

pub fn perf_enabled_from_env() -> bool {
    std::env::var(RENDER_PERF_DEBUG_ENV)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl RenderPerfStats {
    pub fn new(enabled: bool, rolling_window: usize) -> Self {
        Self {
            enabled,
            window_size: rolling_window.max(1),
            composite_ms_window: VecDeque::with_capacity(rolling_window.max(1)),
            present_window: VecDeque::new(),
            presented: 0,
            reused: 0,
            skipped_busy: 0,
            present_failures: 0,
            keyed_pixels_last: 0,
            last_report: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, DEFAULT_WINDOW_SIZE)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.composite_ms_window.clear();
        self.present_window.clear();
        self.presented = 0;
        self.reused = 0;
        self.skipped_busy = 0;
        self.present_failures = 0;
        self.keyed_pixels_last = 0;
        self.last_report = None;
    }

    pub fn record_present(&mut self, now: Instant, composite: Duration, reused: bool) {
        if !self.enabled {
            return;
        }
        if reused {
            self.reused = self.reused.saturating_add(1);
        } else {
            self.presented = self.presented.saturating_add(1);
        }
        let ms = composite.as_secs_f64() * 1000.0;
        if self.composite_ms_window.len() == self.window_size {
            self.composite_ms_window.pop_front();
        }
        self.composite_ms_window.push_back(ms);
        self.present_window.push_back(now);
        while let Some(front) = self.present_window.front() {
            if now.duration_since(*front) > Duration::from_secs(1) {
                self.present_window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_keyed_pixels(&mut self, count: usize) {
        if self.enabled {
            self.keyed_pixels_last = count as u64;
        }
    }

    pub fn record_skip(&mut self) {
        if self.enabled {
            self.skipped_busy = self.skipped_busy.saturating_add(1);
        }
    }

    pub fn record_failure(&mut self) {
        if self.enabled {
            self.present_failures = self.present_failures.saturating_add(1);
        }
    }

    /// Logs a snapshot at most once per report interval.
    pub fn maybe_report(&mut self, now: Instant) {
        if !self.enabled {
            return;
        }
        let due = self
            .last_report
            .map_or(true, |last| now.duration_since(last) >= REPORT_INTERVAL);
        if !due {
            return;
        }
        self.last_report = Some(now);
        let snap = self.snapshot();
        tracing::debug!(
            avg_ms = snap.avg_ms,
            p95_ms = snap.p95_ms,
            worst_ms = snap.worst_ms,
            present_hz = snap.effective_present_hz,
            presented = snap.presented,
            reused = snap.reused,
            skipped = snap.skipped_busy,
            failures = snap.present_failures,
            "render loop stats"
        );
    }

    pub fn snapshot(&self) -> RenderPerfSnapshot {
        if !self.enabled {
            return RenderPerfSnapshot::default();
        }
        RenderPerfSnapshot {
            enabled: true,
            avg_ms: avg(&self.composite_ms_window),
            worst_ms: max(&self.composite_ms_window),
            p95_ms: p95(&self.composite_ms_window),
            effective_present_hz: self.present_window.len() as f64,
            presented: self.presented,
            reused: self.reused,
            skipped_busy: self.skipped_busy,
            present_failures: self.present_failures,
            keyed_pixels_last: self.keyed_pixels_last,
            frame_samples: self.composite_ms_window.len(),
        }
    }
}

fn avg(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn max(values: &VecDeque<f64>) -> f64 {
    values.iter().copied().fold(0.0, f64::max)
}

fn p95(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    sorted[idx.min(sorted.len() - 1)]
}
