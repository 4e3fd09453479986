use std::collections::VecDeque;
use std::ops::RangeInclusive;

use super::{BusError, Peripheral};

/// First mouse port.
pub const MOUSE_BASE: u32 = 0x8000_0400;
/// Keyboard data port.
pub const KEYBOARD_PORT: u32 = 0x8000_0500;

/// Mouse button bit: left button currently held.
pub const MOUSE_HELD: u32 = 1 << 0;
/// Mouse button bit: pressed since the last button read.
pub const MOUSE_CLICKED: u32 = 1 << 1;
/// Mouse button bit: released since the last button read.
pub const MOUSE_RELEASED: u32 = 1 << 2;

/// Bit set on a scancode to mark a key release.
pub const KEY_RELEASE_BIT: u8 = 0x80;

/// Upper bound on queued scancodes; older codes are dropped first.
pub const KEYBOARD_QUEUE_CAPACITY: usize = 32;

/// Scancode FIFO fed by host key events.
#[derive(Debug, Clone, Default)]
pub struct Keyboard {
    queue: VecDeque<u8>,
}

impl Keyboard {
    /// Queues a key-press scancode.
    pub fn press(&mut self, scancode: u8) {
        self.push(scancode & !KEY_RELEASE_BIT);
    }

    /// Queues a key-release scancode.
    pub fn release(&mut self, scancode: u8) {
        self.push(scancode | KEY_RELEASE_BIT);
    }

    fn push(&mut self, code: u8) {
        if self.queue.len() == KEYBOARD_QUEUE_CAPACITY {
            self.queue.pop_front();
        }
        self.queue.push_back(code);
    }

    /// Number of scancodes waiting for the guest.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Peripheral for Keyboard {
    fn ports(&self) -> RangeInclusive<u32> {
        KEYBOARD_PORT..=KEYBOARD_PORT
    }

    fn read(&mut self, _offset: u32) -> Result<u32, BusError> {
        Ok(self.queue.pop_front().map_or(0, u32::from))
    }

    fn write(&mut self, _offset: u32, _value: u32) -> Result<(), BusError> {
        Ok(())
    }
}

/// Pointer position and button state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mouse {
    x: u16,
    y: u16,
    buttons: u32,
}

impl Mouse {
    /// Moves the pointer.
    #[allow(clippy::missing_const_for_fn)]
    pub fn move_to(&mut self, x: u16, y: u16) {
        self.x = x;
        self.y = y;
    }

    /// Updates the button state, latching click/release edges.
    #[allow(clippy::missing_const_for_fn)]
    pub fn set_pressed(&mut self, pressed: bool) {
        if pressed {
            self.buttons |= MOUSE_HELD | MOUSE_CLICKED;
        } else {
            self.buttons &= !MOUSE_HELD;
            self.buttons |= MOUSE_RELEASED;
        }
    }

    /// Current pointer position.
    #[must_use]
    pub const fn position(&self) -> (u16, u16) {
        (self.x, self.y)
    }
}

impl Peripheral for Mouse {
    fn ports(&self) -> RangeInclusive<u32> {
        MOUSE_BASE..=MOUSE_BASE + 1
    }

    fn read(&mut self, offset: u32) -> Result<u32, BusError> {
        Ok(match offset {
            0 => (u32::from(self.y) << 16) | u32::from(self.x),
            _ => {
                let buttons = self.buttons;
                self.buttons &= MOUSE_HELD;
                buttons
            }
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&mut self, offset: u32, value: u32) -> Result<(), BusError> {
        if offset == 0 {
            self.move_to(value as u16, (value >> 16) as u16);
        } else {
            self.buttons = value & (MOUSE_HELD | MOUSE_CLICKED | MOUSE_RELEASED);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Keyboard, Mouse, KEYBOARD_QUEUE_CAPACITY, MOUSE_CLICKED, MOUSE_HELD, MOUSE_RELEASED,
    };
    use crate::bus::Peripheral;

    #[test]
    fn release_codes_carry_the_break_bit() {
        let mut keyboard = Keyboard::default();
        keyboard.press(0x1E);
        keyboard.release(0x1E);

        assert_eq!(keyboard.read(0), Ok(0x1E));
        assert_eq!(keyboard.read(0), Ok(0x9E));
        assert_eq!(keyboard.read(0), Ok(0));
    }

    #[test]
    fn full_queue_drops_oldest_code() {
        let mut keyboard = Keyboard::default();
        for code in 0..=u8::try_from(KEYBOARD_QUEUE_CAPACITY).expect("fits u8") {
            keyboard.press(code);
        }
        assert_eq!(keyboard.pending(), KEYBOARD_QUEUE_CAPACITY);
        assert_eq!(keyboard.read(0), Ok(1));
    }

    #[test]
    fn button_edges_clear_after_read() {
        let mut mouse = Mouse::default();
        mouse.set_pressed(true);
        assert_eq!(mouse.read(1), Ok(MOUSE_HELD | MOUSE_CLICKED));
        assert_eq!(mouse.read(1), Ok(MOUSE_HELD));

        mouse.set_pressed(false);
        assert_eq!(mouse.read(1), Ok(MOUSE_RELEASED));
        assert_eq!(mouse.read(1), Ok(0));
    }

    #[test]
    fn position_packs_y_high_x_low() {
        let mut mouse = Mouse::default();
        mouse.write(0, (20 << 16) | 10).expect("mouse write");
        assert_eq!(mouse.position(), (10, 20));
        assert_eq!(mouse.read(0), Ok((20 << 16) | 10));
    }
}
