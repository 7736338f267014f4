use crate::compositor::chroma::{ChromaKeyConfig, KeyColor};
use crate::compositor::frame::Frame;
use crate::compositor::script;
use crate::error::{CompositorError, Result};
use crate::settings::OverlaySettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Native,
    Embedded,
}

impl BackendKind {
    pub fn other(self) -> Self {
        match self {
            BackendKind::Native => BackendKind::Embedded,
            BackendKind::Embedded => BackendKind::Native,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Embedded => write!(f, "embedded"),
        }
    }
}

/// How a back-buffer reaches the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentMode {
    /// Plain copy to a non-layered window.
    Blit,
    /// Layered window, every pixel fully opaque.
    LayeredOpaque,
    /// Layered window, one colour treated as fully transparent.
    ColorKey(KeyColor),
    /// Layered window, premultiplied per-pixel alpha.
    PerPixelAlpha,
}

/// OS boundary that pushes a back-buffer to a layered window in one call.
pub trait LayeredPresenter {
    fn client_size(&self) -> (u32, u32);
    fn present(&mut self, back_buffer: &Frame, mode: PresentMode) -> Result<()>;
    fn release(&mut self);
}

/// OS boundary for hosted content that runs its own per-pixel keying.
pub trait ScriptHost {
    fn navigate(&mut self, address: &str) -> Result<()>;
    /// Increases each time a navigation completes; zero until the first load.
    fn content_generation(&self) -> u64;
    fn execute_script(&mut self, script: &str) -> Result<()>;
    /// Colour the host paints around the content; `None` restores the default.
    fn set_host_background(&mut self, color: Option<KeyColor>) -> Result<()>;
    fn close(&mut self);
}

pub struct NativeSurface {
    back_buffer: Frame,
    presenter: Box<dyn LayeredPresenter>,
    torn_down: bool,
}

impl std::fmt::Debug for NativeSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeSurface")
            .field("back_buffer", &self.back_buffer.size())
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

impl NativeSurface {
    pub fn new(presenter: Box<dyn LayeredPresenter>) -> Self {
        let (width, height) = presenter.client_size();
        Self {
            back_buffer: Frame::transparent(width, height),
            presenter,
            torn_down: false,
        }
    }

    pub fn back_buffer(&self) -> &Frame {
        &self.back_buffer
    }

    /// Builds the new back-buffer before dropping the old one. The back-buffer starts
    /// at the presenter's client size and only changes through this call; every
    /// present is scaled to it.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.back_buffer.size() == (width, height) {
            return;
        }
        let next = Frame::transparent(width, height);
        let previous = std::mem::replace(&mut self.back_buffer, next);
        tracing::debug!(
            from = ?previous.size(),
            to = ?(width, height),
            "native back-buffer reallocated"
        );
    }

    pub fn present(&mut self, frame: &Frame, mode: PresentMode) -> Result<()> {
        if self.torn_down {
            return Err(CompositorError::TornDown);
        }
        self.back_buffer.blit_scaled_from(frame);
        prepare_for_present(self.back_buffer.as_bytes_mut(), mode);
        self.presenter.present(&self.back_buffer, mode)
    }

    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.presenter.release();
        self.back_buffer = Frame::default();
        self.torn_down = true;
    }
}

/// Rewrites a keyed BGRA buffer into what the presentation call expects.
pub fn prepare_for_present(pixels: &mut [u8], mode: PresentMode) {
    match mode {
        PresentMode::Blit | PresentMode::LayeredOpaque => {
            for px in pixels.chunks_exact_mut(4) {
                px[3] = 255;
            }
        }
        PresentMode::ColorKey(key) => {
            for px in pixels.chunks_exact_mut(4) {
                if px[3] == 0 {
                    px[0] = key.b;
                    px[1] = key.g;
                    px[2] = key.r;
                }
                px[3] = 255;
            }
        }
        PresentMode::PerPixelAlpha => {
            for px in pixels.chunks_exact_mut(4) {
                let a = px[3] as u16;
                if a == 255 {
                    continue;
                }
                px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
                px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
                px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
            }
        }
    }
}

pub struct EmbeddedSurface {
    host: Box<dyn ScriptHost>,
    content_address: String,
    keying: ChromaKeyConfig,
    injected_generation: Option<u64>,
    keying_dirty: bool,
    torn_down: bool,
}

impl std::fmt::Debug for EmbeddedSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedSurface")
            .field("content_address", &self.content_address)
            .field("keying", &self.keying)
            .field("injected_generation", &self.injected_generation)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

impl EmbeddedSurface {
    pub fn new(
        mut host: Box<dyn ScriptHost>,
        content_address: impl Into<String>,
        keying: ChromaKeyConfig,
    ) -> Result<Self> {
        let content_address = content_address.into();
        host.navigate(&content_address)?;
        host.set_host_background(keying.enabled.then_some(keying.key))?;
        Ok(Self {
            host,
            content_address,
            keying,
            injected_generation: None,
            keying_dirty: true,
            torn_down: false,
        })
    }

    pub fn keying(&self) -> ChromaKeyConfig {
        self.keying
    }

    pub fn content_address(&self) -> &str {
        &self.content_address
    }

    pub fn navigate(&mut self, address: &str) -> Result<()> {
        if self.torn_down {
            return Err(CompositorError::TornDown);
        }
        if address == self.content_address {
            return Ok(());
        }
        self.host.navigate(address)?;
        self.content_address = address.to_string();
        self.injected_generation = None;
        Ok(())
    }

    pub fn configure_keying(&mut self, key: KeyColor, tolerance: u8, enabled: bool) -> Result<()> {
        let next = ChromaKeyConfig {
            key,
            tolerance,
            enabled,
        };
        if next != self.keying {
            self.keying = next;
            self.keying_dirty = true;
            self.host.set_host_background(enabled.then_some(key))?;
        }
        self.refresh().map(|_| ())
    }

    /// Re-injects the keying routine after a content reload or a keying change.
    /// Returns whether a script ran.
    pub fn refresh(&mut self) -> Result<bool> {
        if self.torn_down {
            return Err(CompositorError::TornDown);
        }
        let generation = self.host.content_generation();
        if generation == 0 {
            return Ok(false);
        }
        if !self.keying_dirty && self.injected_generation == Some(generation) {
            return Ok(false);
        }

        let routine = if self.keying.enabled {
            script::keying_routine(&self.keying)
        } else {
            script::removal_routine()
        };
        self.host.execute_script(&routine)?;
        self.injected_generation = Some(generation);
        self.keying_dirty = false;
        tracing::debug!(
            generation,
            enabled = self.keying.enabled,
            "embedded keying routine injected"
        );
        Ok(true)
    }

    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        if self.injected_generation.is_some() && self.keying.enabled {
            if let Err(err) = self.host.execute_script(&script::removal_routine()) {
                tracing::debug!(%err, "embedded keying removal skipped");
            }
        }
        let _ = self.host.set_host_background(None);
        self.host.close();
        self.torn_down = true;
    }
}

/// A presentable transparent drawing target.
#[derive(Debug)]
pub enum Surface {
    Native(NativeSurface),
    Embedded(EmbeddedSurface),
}

impl Surface {
    pub fn kind(&self) -> BackendKind {
        match self {
            Surface::Native(_) => BackendKind::Native,
            Surface::Embedded(_) => BackendKind::Embedded,
        }
    }

    /// Embedded content composites itself, so presenting to it only refreshes keying.
    pub fn present(&mut self, frame: &Frame, mode: PresentMode) -> Result<()> {
        match self {
            Surface::Native(surface) => surface.present(frame, mode),
            Surface::Embedded(surface) => surface.refresh().map(|_| ()),
        }
    }

    pub fn configure_keying(&mut self, config: &ChromaKeyConfig) -> Result<()> {
        match self {
            Surface::Native(_) => Ok(()),
            Surface::Embedded(surface) => {
                surface.configure_keying(config.key, config.tolerance, config.enabled)
            }
        }
    }

    pub fn teardown(&mut self) {
        match self {
            Surface::Native(surface) => surface.teardown(),
            Surface::Embedded(surface) => surface.teardown(),
        }
    }
}

/// Builds surfaces on demand. Backend switches go through here.
pub trait SurfaceFactory {
    fn create(&mut self, kind: BackendKind, settings: &OverlaySettings) -> Result<Surface>;
}
