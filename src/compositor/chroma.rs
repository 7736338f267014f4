use crate::compositor::frame::{Bgra, Frame};
use crate::settings::OverlaySettings;
use serde::{Deserialize, Serialize};

/// Colour treated as see-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl KeyColor {
    pub const GREEN: Self = Self::rgb(0, 255, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `0x00BBGGRR`, the order the OS expects for a colour key.
    pub fn to_colorref(self) -> u32 {
        (self.r as u32) | ((self.g as u32) << 8) | ((self.b as u32) << 16)
    }

    pub fn to_bgra(self) -> Bgra {
        Bgra::opaque(self.r, self.g, self.b)
    }
}

impl Default for KeyColor {
    fn default() -> Self {
        Self::GREEN
    }
}

/// Keying parameters derived from the overlay settings.
///
/// `tolerance` is compared against the raw Euclidean RGB distance, whose range is
/// 0..=441. The tolerance itself is clamped to 0..=255, so distances above 255 can
/// never be keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChromaKeyConfig {
    pub key: KeyColor,
    pub tolerance: u8,
    pub enabled: bool,
}

impl Default for ChromaKeyConfig {
    fn default() -> Self {
        Self {
            key: KeyColor::GREEN,
            tolerance: 30,
            enabled: true,
        }
    }
}

impl From<&OverlaySettings> for ChromaKeyConfig {
    fn from(settings: &OverlaySettings) -> Self {
        Self {
            key: settings.key_color,
            tolerance: settings.tolerance,
            enabled: settings.enabled,
        }
    }
}

impl ChromaKeyConfig {
    pub fn disabled(self) -> Self {
        Self {
            enabled: false,
            ..self
        }
    }

    #[inline]
    pub fn matches(&self, r: u8, g: u8, b: u8) -> bool {
        let dr = r as i32 - self.key.r as i32;
        let dg = g as i32 - self.key.g as i32;
        let db = b as i32 - self.key.b as i32;
        let tol = self.tolerance as i32;
        dr * dr + dg * dg + db * db <= tol * tol
    }
}

pub fn color_distance(rgb: (u8, u8, u8), key: KeyColor) -> f64 {
    let dr = rgb.0 as f64 - key.r as f64;
    let dg = rgb.1 as f64 - key.g as f64;
    let db = rgb.2 as f64 - key.b as f64;
    (dr * dr + dg * dg + db * db).sqrt()
}

/// Zeroes the alpha of every BGRA pixel within tolerance of the key.
///
/// RGB is left untouched so keying the same buffer twice is a no-op.
pub fn key_pixels_in_place(pixels: &mut [u8], config: &ChromaKeyConfig) {
    if !config.enabled {
        return;
    }
    for px in pixels.chunks_exact_mut(4) {
        if config.matches(px[2], px[1], px[0]) {
            px[3] = 0;
        }
    }
}

/// Keys an owned frame and hands it back.
pub fn apply(mut frame: Frame, config: &ChromaKeyConfig) -> Frame {
    key_pixels_in_place(frame.as_bytes_mut(), config);
    frame
}

/// Writes the keyed version of `src` into the private buffer `dst`.
pub fn apply_into(src: &Frame, dst: &mut Frame, config: &ChromaKeyConfig) {
    dst.ensure_size(src.width(), src.height());
    dst.as_bytes_mut().copy_from_slice(src.as_bytes());
    key_pixels_in_place(dst.as_bytes_mut(), config);
}

/// Number of pixels the current config would key. Used for stats.
pub fn count_keyed(frame: &Frame, config: &ChromaKeyConfig) -> usize {
    if !config.enabled {
        return 0;
    }
    frame
        .as_bytes()
        .chunks_exact(4)
        .filter(|px| config.matches(px[2], px[1], px[0]))
        .count()
}
