//! Desktop window host backed by `minifb`.

use host_core::bus::framebuffer::{Framebuffer, FRAMEBUFFER_HEIGHT, FRAMEBUFFER_WIDTH};
use host_core::{Host, HostEvent};
use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};

const TITLE: &str = "host-runner";

/// Window presenting the guest framebuffer and translating input.
pub struct WindowHost {
    window: Window,
    pumped: bool,
    mouse: Option<(u16, u16)>,
    button_down: bool,
}

impl std::fmt::Debug for WindowHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowHost")
            .field("mouse", &self.mouse)
            .field("button_down", &self.button_down)
            .finish_non_exhaustive()
    }
}

impl WindowHost {
    /// Opens a framebuffer-sized window.
    pub fn open() -> Result<Self, minifb::Error> {
        let window = Window::new(
            TITLE,
            FRAMEBUFFER_WIDTH,
            FRAMEBUFFER_HEIGHT,
            WindowOptions::default(),
        )?;
        Ok(Self {
            window,
            pumped: false,
            mouse: None,
            button_down: false,
        })
    }
}

impl Host for WindowHost {
    fn redraw(&mut self, framebuffer: &Framebuffer) {
        match self.window.update_with_buffer(
            framebuffer.pixels(),
            FRAMEBUFFER_WIDTH,
            FRAMEBUFFER_HEIGHT,
        ) {
            Ok(()) => self.pumped = true,
            Err(error) => tracing::warn!(%error, "window update failed"),
        }
    }

    fn poll_events(&mut self) -> Vec<HostEvent> {
        // Input is collected by the window update; pump it on ticks without a redraw.
        if !std::mem::take(&mut self.pumped) {
            self.window.update();
        }

        if !self.window.is_open() {
            return vec![HostEvent::Quit];
        }

        let mut events = Vec::new();
        for key in self.window.get_keys_pressed(KeyRepeat::No) {
            if let Some(scancode) = scancode(key) {
                events.push(HostEvent::KeyDown(scancode));
            }
        }
        for key in self.window.get_keys_released() {
            if let Some(scancode) = scancode(key) {
                events.push(HostEvent::KeyUp(scancode));
            }
        }

        let position = self
            .window
            .get_mouse_pos(MouseMode::Clamp)
            .map(|(x, y)| (clamp_axis(x), clamp_axis(y)));
        if let Some((x, y)) = position {
            if self.mouse != Some((x, y)) {
                self.mouse = Some((x, y));
                events.push(HostEvent::MouseMoved { x, y });
            }
        }

        let pressed = self.window.get_mouse_down(MouseButton::Left);
        if pressed != self.button_down {
            self.button_down = pressed;
            events.push(HostEvent::MouseButton { pressed });
        }

        events
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_axis(value: f32) -> u16 {
    value.clamp(0.0, f32::from(u16::MAX)) as u16
}

/// Set-1 make code for `key`.
const fn scancode(key: Key) -> Option<u8> {
    Some(match key {
        Key::Escape => 0x01,
        Key::Key1 => 0x02,
        Key::Key2 => 0x03,
        Key::Key3 => 0x04,
        Key::Key4 => 0x05,
        Key::Key5 => 0x06,
        Key::Key6 => 0x07,
        Key::Key7 => 0x08,
        Key::Key8 => 0x09,
        Key::Key9 => 0x0A,
        Key::Key0 => 0x0B,
        Key::Minus => 0x0C,
        Key::Equal => 0x0D,
        Key::Backspace => 0x0E,
        Key::Tab => 0x0F,
        Key::Q => 0x10,
        Key::W => 0x11,
        Key::E => 0x12,
        Key::R => 0x13,
        Key::T => 0x14,
        Key::Y => 0x15,
        Key::U => 0x16,
        Key::I => 0x17,
        Key::O => 0x18,
        Key::P => 0x19,
        Key::LeftBracket => 0x1A,
        Key::RightBracket => 0x1B,
        Key::Enter => 0x1C,
        Key::LeftCtrl | Key::RightCtrl => 0x1D,
        Key::A => 0x1E,
        Key::S => 0x1F,
        Key::D => 0x20,
        Key::F => 0x21,
        Key::G => 0x22,
        Key::H => 0x23,
        Key::J => 0x24,
        Key::K => 0x25,
        Key::L => 0x26,
        Key::Semicolon => 0x27,
        Key::Apostrophe => 0x28,
        Key::Backquote => 0x29,
        Key::LeftShift => 0x2A,
        Key::Backslash => 0x2B,
        Key::Z => 0x2C,
        Key::X => 0x2D,
        Key::C => 0x2E,
        Key::V => 0x2F,
        Key::B => 0x30,
        Key::N => 0x31,
        Key::M => 0x32,
        Key::Comma => 0x33,
        Key::Period => 0x34,
        Key::Slash => 0x35,
        Key::RightShift => 0x36,
        Key::LeftAlt | Key::RightAlt => 0x38,
        Key::Space => 0x39,
        Key::CapsLock => 0x3A,
        Key::F1 => 0x3B,
        Key::F2 => 0x3C,
        Key::F3 => 0x3D,
        Key::F4 => 0x3E,
        Key::F5 => 0x3F,
        Key::F6 => 0x40,
        Key::F7 => 0x41,
        Key::F8 => 0x42,
        Key::F9 => 0x43,
        Key::F10 => 0x44,
        Key::Up => 0x48,
        Key::Left => 0x4B,
        Key::Right => 0x4D,
        Key::Down => 0x50,
        _ => return None,
    })
}
