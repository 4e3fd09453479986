//! Port-fed framebuffer.
//!
//! The guest positions a pixel cursor and streams `0x00RRGGBB` pixels through
//! the data port; the cursor advances after every write and wraps at the end
//! of the buffer. The host reads the whole buffer on redraw.

use std::ops::RangeInclusive;

use super::{BusError, Peripheral};

/// Framebuffer width in pixels.
pub const FRAMEBUFFER_WIDTH: usize = 640;
/// Framebuffer height in pixels.
pub const FRAMEBUFFER_HEIGHT: usize = 480;

/// First framebuffer port.
pub const FRAMEBUFFER_BASE: u32 = 0x8000_0000;
/// Register offset of the pixel cursor.
pub const FRAMEBUFFER_CURSOR: u32 = 0;
/// Register offset of the pixel data port.
pub const FRAMEBUFFER_DATA: u32 = 1;

const PIXEL_COUNT: usize = FRAMEBUFFER_WIDTH * FRAMEBUFFER_HEIGHT;

/// Pixel buffer presented by the host on redraw.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    pixels: Box<[u32]>,
    cursor: usize,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self {
            pixels: vec![0; PIXEL_COUNT].into_boxed_slice(),
            cursor: 0,
        }
    }
}

impl Framebuffer {
    /// Row-major `0x00RRGGBB` pixels.
    #[must_use]
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Current pixel cursor.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Peripheral for Framebuffer {
    fn ports(&self) -> RangeInclusive<u32> {
        FRAMEBUFFER_BASE..=FRAMEBUFFER_BASE + FRAMEBUFFER_DATA
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read(&mut self, offset: u32) -> Result<u32, BusError> {
        Ok(match offset {
            FRAMEBUFFER_CURSOR => self.cursor as u32,
            _ => self.pixels[self.cursor],
        })
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<(), BusError> {
        match offset {
            FRAMEBUFFER_CURSOR => self.cursor = value as usize % PIXEL_COUNT,
            _ => {
                self.pixels[self.cursor] = value & 0x00FF_FFFF;
                self.cursor = (self.cursor + 1) % PIXEL_COUNT;
            }
        }
        Ok(())
    }
}
