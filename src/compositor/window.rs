use crate::compositor::chroma::KeyColor;
use crate::compositor::surface::{BackendKind, PresentMode};
use crate::error::{AttributeOp, CompositorError, Result};
use crate::settings::OverlaySettings;

/// Extended style bits managed by the controller. Values match the Win32 ABI.
pub const EX_STYLE_TOPMOST: u32 = 0x0000_0008;
pub const EX_STYLE_TRANSPARENT: u32 = 0x0000_0020;
pub const EX_STYLE_LAYERED: u32 = 0x0008_0000;
const MANAGED_EX_STYLE: u32 = EX_STYLE_TOPMOST | EX_STYLE_TRANSPARENT | EX_STYLE_LAYERED;

pub const LAYERED_FLAG_COLORKEY: u32 = 0x0000_0001;
pub const LAYERED_FLAG_ALPHA: u32 = 0x0000_0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransparencyMode {
    Opaque,
    ColorKey(KeyColor),
    AlphaBlend,
}

/// Where the colour key reaches the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySubmission {
    /// Set once as a window attribute; the hosted content keys itself.
    WindowAttribute,
    /// Submitted with every present call together with the back-buffer.
    PerPresent,
}

impl From<BackendKind> for KeySubmission {
    fn from(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Native => KeySubmission::PerPresent,
            BackendKind::Embedded => KeySubmission::WindowAttribute,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayeredAttributes {
    ColorKey(KeyColor),
    ConstantAlpha(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawLayeredAttributes {
    pub colorref: u32,
    pub alpha: u8,
    pub flags: u32,
}

impl LayeredAttributes {
    pub fn raw(self) -> RawLayeredAttributes {
        match self {
            LayeredAttributes::ColorKey(key) => RawLayeredAttributes {
                colorref: key.to_colorref(),
                alpha: 255,
                flags: LAYERED_FLAG_COLORKEY,
            },
            LayeredAttributes::ConstantAlpha(alpha) => RawLayeredAttributes {
                colorref: 0,
                alpha,
                flags: LAYERED_FLAG_ALPHA,
            },
        }
    }
}

/// Transparency mode, click-through and z-order, combined into one style word on apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTransparencyState {
    pub mode: TransparencyMode,
    pub click_through: bool,
    pub top_most: bool,
}

impl WindowTransparencyState {
    pub fn opaque(top_most: bool) -> Self {
        Self {
            mode: TransparencyMode::Opaque,
            click_through: false,
            top_most,
        }
    }

    /// The state a backend should reach for the given settings.
    pub fn target_for(settings: &OverlaySettings, kind: BackendKind) -> Self {
        let mode = if !settings.enabled {
            TransparencyMode::Opaque
        } else if kind == BackendKind::Native && settings.per_pixel_alpha {
            TransparencyMode::AlphaBlend
        } else {
            TransparencyMode::ColorKey(settings.key_color)
        };
        Self {
            mode,
            click_through: settings.click_through,
            top_most: settings.top_most,
        }
    }

    /// Click-through only affects hit-testing on layered windows, so it forces layering.
    pub fn layered(&self) -> bool {
        self.mode != TransparencyMode::Opaque || self.click_through
    }

    pub fn ex_style(&self, current: u32) -> u32 {
        let mut style = current & !MANAGED_EX_STYLE;
        if self.layered() {
            style |= EX_STYLE_LAYERED;
        }
        if self.click_through {
            style |= EX_STYLE_TRANSPARENT;
        }
        if self.top_most {
            style |= EX_STYLE_TOPMOST;
        }
        style
    }

    pub fn layered_attributes(&self, submission: KeySubmission) -> Option<LayeredAttributes> {
        if submission == KeySubmission::PerPresent || !self.layered() {
            return None;
        }
        match self.mode {
            TransparencyMode::ColorKey(key) => Some(LayeredAttributes::ColorKey(key)),
            TransparencyMode::Opaque | TransparencyMode::AlphaBlend => {
                Some(LayeredAttributes::ConstantAlpha(255))
            }
        }
    }

    pub fn present_mode(&self) -> PresentMode {
        match self.mode {
            TransparencyMode::ColorKey(key) => PresentMode::ColorKey(key),
            TransparencyMode::AlphaBlend => PresentMode::PerPixelAlpha,
            TransparencyMode::Opaque if self.layered() => PresentMode::LayeredOpaque,
            TransparencyMode::Opaque => PresentMode::Blit,
        }
    }
}

/// OS boundary for a window's extended style and layered attributes.
pub trait WindowAttributes {
    fn read_ex_style(&self) -> Result<u32>;
    fn write_ex_style(&mut self, style: u32) -> Result<()>;
    fn set_layered_attributes(&mut self, attributes: LayeredAttributes) -> Result<()>;
    fn set_top_most(&mut self, top_most: bool) -> Result<()>;
}

/// Owns one window's transparency state and applies transitions as a single
/// read-modify-write. A failed transition leaves the previous state in place.
pub struct WindowTransparencyController {
    window: Box<dyn WindowAttributes>,
    state: WindowTransparencyState,
    submission: KeySubmission,
    synced: bool,
}

impl std::fmt::Debug for WindowTransparencyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowTransparencyController")
            .field("state", &self.state)
            .field("submission", &self.submission)
            .field("synced", &self.synced)
            .finish()
    }
}

impl WindowTransparencyController {
    pub fn new(window: Box<dyn WindowAttributes>, top_most: bool) -> Self {
        Self {
            window,
            state: WindowTransparencyState::opaque(top_most),
            submission: KeySubmission::PerPresent,
            synced: false,
        }
    }

    pub fn state(&self) -> WindowTransparencyState {
        self.state
    }

    pub fn submission(&self) -> KeySubmission {
        self.submission
    }

    /// Writes the initial state to the window.
    pub fn install(&mut self) -> Result<()> {
        let target = self.state;
        self.synced = false;
        self.apply(target)
    }

    /// Rebinds the key submission path, resetting to Opaque first. The new path is
    /// bound even when the reset is rejected.
    pub fn bind_backend(&mut self, kind: BackendKind) -> Result<()> {
        let reset = if self.state != WindowTransparencyState::opaque(self.state.top_most) {
            self.reset_to_opaque()
        } else {
            Ok(())
        };
        self.submission = KeySubmission::from(kind);
        reset
    }

    pub fn set_keying_enabled(&mut self, enabled: bool, key: KeyColor) -> Result<()> {
        let mode = if enabled {
            TransparencyMode::ColorKey(key)
        } else {
            TransparencyMode::Opaque
        };
        self.apply(WindowTransparencyState { mode, ..self.state })
    }

    pub fn set_alpha_blend_mode(&mut self) -> Result<()> {
        if self.submission != KeySubmission::PerPresent {
            return Err(CompositorError::attribute(
                AttributeOp::LayeredAttributes,
                "per-pixel alpha needs a surface that presents its own back-buffer",
            ));
        }
        self.apply(WindowTransparencyState {
            mode: TransparencyMode::AlphaBlend,
            ..self.state
        })
    }

    pub fn set_click_through(&mut self, click_through: bool) -> Result<()> {
        self.apply(WindowTransparencyState {
            click_through,
            ..self.state
        })
    }

    pub fn set_top_most(&mut self, top_most: bool) -> Result<()> {
        self.apply(WindowTransparencyState {
            top_most,
            ..self.state
        })
    }

    /// Drops keying and click-through; z-order is left as configured.
    pub fn reset_to_opaque(&mut self) -> Result<()> {
        self.apply(WindowTransparencyState::opaque(self.state.top_most))
    }

    pub fn apply(&mut self, target: WindowTransparencyState) -> Result<()> {
        if self.synced && target == self.state {
            return Ok(());
        }

        let previous_style = match self.window.read_ex_style() {
            Ok(style) => style,
            Err(err) => {
                tracing::warn!(%err, "window style read failed; keeping previous transparency state");
                return Err(err);
            }
        };
        let next_style = target.ex_style(previous_style);

        if let Err(err) = self.write_all(target, previous_style, next_style) {
            tracing::warn!(
                %err,
                from = ?self.state,
                to = ?target,
                "window transparency transition rolled back"
            );
            self.rollback(previous_style);
            return Err(err);
        }

        tracing::debug!(
            from = ?self.state,
            to = ?target,
            style = format_args!("{next_style:#010x}"),
            "window transparency applied"
        );
        self.state = target;
        self.synced = true;
        Ok(())
    }

    fn write_all(
        &mut self,
        target: WindowTransparencyState,
        previous_style: u32,
        next_style: u32,
    ) -> Result<()> {
        if next_style != previous_style {
            self.window.write_ex_style(next_style)?;
        }
        if let Some(attributes) = target.layered_attributes(self.submission) {
            self.window.set_layered_attributes(attributes)?;
        }
        if !self.synced || target.top_most != self.state.top_most {
            self.window.set_top_most(target.top_most)?;
        }
        Ok(())
    }

    fn rollback(&mut self, previous_style: u32) {
        if let Err(err) = self.window.write_ex_style(previous_style) {
            tracing::warn!(%err, style = format_args!("{previous_style:#010x}"), "style rollback failed");
        }
        if let Some(attributes) = self.state.layered_attributes(self.submission) {
            if let Err(err) = self.window.set_layered_attributes(attributes) {
                tracing::warn!(%err, ?attributes, "layered attribute rollback failed");
            }
        }
        if let Err(err) = self.window.set_top_most(self.state.top_most) {
            tracing::warn!(%err, top_most = self.state.top_most, "z-order rollback failed");
        }
    }
}
