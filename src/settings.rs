use crate::compositor::chroma::KeyColor;
use crate::compositor::surface::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const MIN_TICK_INTERVAL_MS: u64 = 10;
pub const MAX_TICK_INTERVAL_MS: u64 = 1000;
const MAX_WINDOW_EDGE: u32 = 16_384;

/// Overlay configuration pushed in by the settings layer.
///
/// Out-of-range values are clamped on load and by [`OverlaySettings::sanitize`];
/// nothing here is ever rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlaySettings {
    pub enabled: bool,
    pub key_color: KeyColor,
    pub tolerance: u8,
    pub click_through: bool,
    pub top_most: bool,
    pub backend: BackendKind,
    pub content_address: String,
    pub window_width: u32,
    pub window_height: u32,
    /// `None` centres the window on the primary monitor.
    pub window_x: Option<i32>,
    pub window_y: Option<i32>,
    /// Native backend only: present premultiplied alpha instead of a hard colour key.
    pub per_pixel_alpha: bool,
    pub tick_interval_ms: u64,
    pub starvation_notice_ticks: u32,
    pub debug_logging: bool,
    pub log_file: Option<PathBuf>,
    pub perf_stats: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum KeyColorWire {
    Channels { r: i64, g: i64, b: i64 },
    Array([i64; 3]),
}

impl KeyColorWire {
    fn clamped(self) -> KeyColor {
        let (r, g, b) = match self {
            KeyColorWire::Channels { r, g, b } => (r, g, b),
            KeyColorWire::Array([r, g, b]) => (r, g, b),
        };
        KeyColor::rgb(clamp_u8(r), clamp_u8(g), clamp_u8(b))
    }
}

#[derive(Debug, Deserialize)]
struct OverlaySettingsDe {
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    key_color: Option<KeyColorWire>,
    #[serde(default = "default_tolerance_wire", alias = "chroma_key_tolerance")]
    tolerance: i64,
    #[serde(default = "default_click_through")]
    click_through: bool,
    #[serde(default = "default_top_most")]
    top_most: bool,
    #[serde(default)]
    backend: BackendKind,
    #[serde(default = "default_content_address", alias = "stream_address")]
    content_address: String,
    #[serde(default = "default_window_width")]
    window_width: i64,
    #[serde(default = "default_window_height")]
    window_height: i64,
    #[serde(default)]
    window_x: Option<i32>,
    #[serde(default)]
    window_y: Option<i32>,
    #[serde(default)]
    per_pixel_alpha: bool,
    #[serde(default = "default_tick_interval_ms")]
    tick_interval_ms: u64,
    #[serde(default = "default_starvation_notice_ticks")]
    starvation_notice_ticks: u32,
    #[serde(default)]
    debug_logging: bool,
    #[serde(default)]
    log_file: Option<PathBuf>,
    #[serde(default)]
    perf_stats: bool,
}

impl<'de> Deserialize<'de> for OverlaySettings {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let decoded = OverlaySettingsDe::deserialize(deserializer)?;
        let mut settings = Self {
            enabled: decoded.enabled,
            key_color: decoded
                .key_color
                .map(KeyColorWire::clamped)
                .unwrap_or_else(default_key_color),
            tolerance: clamp_u8(decoded.tolerance),
            click_through: decoded.click_through,
            top_most: decoded.top_most,
            backend: decoded.backend,
            content_address: decoded.content_address,
            window_width: clamp_edge(decoded.window_width),
            window_height: clamp_edge(decoded.window_height),
            window_x: decoded.window_x,
            window_y: decoded.window_y,
            per_pixel_alpha: decoded.per_pixel_alpha,
            tick_interval_ms: decoded.tick_interval_ms,
            starvation_notice_ticks: decoded.starvation_notice_ticks,
            debug_logging: decoded.debug_logging,
            log_file: decoded.log_file,
            perf_stats: decoded.perf_stats,
        };
        settings.sanitize();
        Ok(settings)
    }
}

fn clamp_u8(value: i64) -> u8 {
    value.clamp(0, u8::MAX as i64) as u8
}

fn clamp_edge(value: i64) -> u32 {
    value.clamp(1, MAX_WINDOW_EDGE as i64) as u32
}

fn default_enabled() -> bool {
    true
}

fn default_key_color() -> KeyColor {
    KeyColor::GREEN
}

fn default_tolerance() -> u8 {
    30
}

fn default_tolerance_wire() -> i64 {
    default_tolerance() as i64
}

fn default_click_through() -> bool {
    true
}

fn default_top_most() -> bool {
    true
}

fn default_content_address() -> String {
    "ws://localhost:8888".to_owned()
}

fn default_window_width() -> i64 {
    800
}

fn default_window_height() -> i64 {
    600
}

fn default_tick_interval_ms() -> u64 {
    33
}

fn default_starvation_notice_ticks() -> u32 {
    30
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            key_color: default_key_color(),
            tolerance: default_tolerance(),
            click_through: default_click_through(),
            top_most: default_top_most(),
            backend: BackendKind::default(),
            content_address: default_content_address(),
            window_width: default_window_width() as u32,
            window_height: default_window_height() as u32,
            window_x: None,
            window_y: None,
            per_pixel_alpha: false,
            tick_interval_ms: default_tick_interval_ms(),
            starvation_notice_ticks: default_starvation_notice_ticks(),
            debug_logging: false,
            log_file: None,
            perf_stats: false,
        }
    }
}

impl OverlaySettings {
    /// Pulls every numeric field back into its supported range.
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self
            .tick_interval_ms
            .clamp(MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS);
        self.window_width = self.window_width.clamp(1, MAX_WINDOW_EDGE);
        self.window_height = self.window_height.clamp(1, MAX_WINDOW_EDGE);
        self.starvation_notice_ticks = self.starvation_notice_ticks.max(1);
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(
            self.tick_interval_ms
                .clamp(MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS),
        )
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }
}
