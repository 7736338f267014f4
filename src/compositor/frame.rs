use crate::error::{CompositorError, Result};

/// One pixel in blue, green, red, alpha byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bgra {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

impl Bgra {
    pub const TRANSPARENT: Self = Self {
        b: 0,
        g: 0,
        r: 0,
        a: 0,
    };

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { b, g, r, a: 255 }
    }

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { b, g, r, a }
    }

    fn write(self, px: &mut [u8]) {
        px[0] = self.b;
        px[1] = self.g;
        px[2] = self.r;
        px[3] = self.a;
    }
}

/// A packed 4-byte-per-pixel BGRA image.
///
/// The buffer length is always `width * height * 4`; every constructor checks it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

pub(crate) fn byte_len(width: u32, height: u32) -> usize {
    (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(4)
}

impl Frame {
    pub fn filled(width: u32, height: u32, fill: Bgra) -> Self {
        let mut pixels = vec![0u8; byte_len(width, height)];
        for px in pixels.chunks_exact_mut(4) {
            fill.write(px);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; byte_len(width, height)],
        }
    }

    pub fn from_bgra(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = byte_len(width, height);
        if pixels.len() != expected {
            return Err(CompositorError::InvalidFrame {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.pixels
    }

    /// `None` outside the frame, matching `set_pixel`, which ignores such writes.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<Bgra> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 4;
        let px = self.pixels.get(idx..idx + 4)?;
        Some(Bgra {
            b: px[0],
            g: px[1],
            r: px[2],
            a: px[3],
        })
    }

    /// # Panics
    ///
    /// Panics when `(x, y)` lies outside the frame. Use [`Frame::get_pixel`] for a
    /// checked read.
    pub fn pixel(&self, x: u32, y: u32) -> Bgra {
        match self.get_pixel(x, y) {
            Some(px) => px,
            None => panic!(
                "pixel ({x}, {y}) outside {}x{} frame",
                self.width, self.height
            ),
        }
    }

    /// Writes outside the frame are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: Bgra) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 4;
        value.write(&mut self.pixels[idx..idx + 4]);
    }

    /// Reallocates only when the geometry changes. Returns whether it did.
    pub(crate) fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        let target_len = byte_len(width, height);
        if self.width == width && self.height == height && self.pixels.len() == target_len {
            return false;
        }
        self.pixels = vec![0u8; target_len];
        self.width = width;
        self.height = height;
        true
    }

    /// Copies `src` into `self`, scaling nearest-neighbour when sizes differ.
    pub(crate) fn blit_scaled_from(&mut self, src: &Frame) {
        if self.size() == src.size() {
            self.pixels.copy_from_slice(&src.pixels);
            return;
        }
        if src.width == 0 || src.height == 0 {
            self.pixels.fill(0);
            return;
        }
        let (dw, dh) = (self.width as usize, self.height as usize);
        let (sw, sh) = (src.width as usize, src.height as usize);
        for y in 0..dh {
            let sy = y * sh / dh;
            let src_row = sy * sw * 4;
            let dst_row = y * dw * 4;
            for x in 0..dw {
                let sx = x * sw / dw;
                let s = src_row + sx * 4;
                let d = dst_row + x * 4;
                self.pixels[d..d + 4].copy_from_slice(&src.pixels[s..s + 4]);
            }
        }
    }
}
