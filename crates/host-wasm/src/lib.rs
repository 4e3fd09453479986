//! WebAssembly bindings: the page calls [`WasmSession::step`] from
//! `requestAnimationFrame`, so the push driver and the adaptive budget policy
//! are used instead of the blocking loop.

mod runtime;

use host_core::bus::disk::DiskImage;
use host_core::bus::framebuffer::{FRAMEBUFFER_HEIGHT, FRAMEBUFFER_WIDTH};
use host_core::{Clock, HostEvent};
use wasm_bindgen::prelude::*;

pub use runtime::WebConfig;
use runtime::Runtime;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

macro_rules! console_log {
    ($($t:tt)*) => (log(&format!($($t)*)))
}

/// Milliseconds from `Date.now()`, relative to session start.
struct BrowserClock {
    origin: f64,
}

impl BrowserClock {
    fn new() -> Self {
        Self {
            origin: js_sys::Date::now(),
        }
    }
}

impl Clock for BrowserClock {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn now_ms(&mut self) -> u64 {
        (js_sys::Date::now() - self.origin).max(0.0) as u64
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn unix_seconds(&mut self) -> u64 {
        (js_sys::Date::now() / 1000.0).max(0.0) as u64
    }

    // The page schedules the next frame; nothing blocks here.
    fn sleep_ms(&mut self, _ms: u64) {}
}

#[wasm_bindgen]
pub struct WasmSession {
    runtime: Runtime<BrowserClock>,
}

#[wasm_bindgen]
impl WasmSession {
    /// Builds a session. `config` is an optional object with any of
    /// `cpu_hz`, `ticks_per_second`, `frames_per_update`, `budget_mode` and
    /// `debug`. `rom` replaces the built-in boot ROM; `disks` are registered
    /// in array order.
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: JsValue,
        rom: Option<Vec<u8>>,
        disks: &js_sys::Array,
    ) -> Result<Self, JsError> {
        console_error_panic_hook::set_once();

        let config: WebConfig = if config.is_undefined() || config.is_null() {
            WebConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)?
        };
        let images: Vec<_> = disks
            .iter()
            .enumerate()
            .map(|(index, bytes)| {
                let bytes = js_sys::Uint8Array::new(&bytes).to_vec();
                DiskImage::from_bytes(format!("disk{index}"), bytes)
            })
            .collect();
        console_log!(
            "session: {} Hz, {:?} budget, {} disk(s)",
            config.cpu_hz,
            config.budget_mode,
            images.len()
        );

        Ok(Self {
            runtime: Runtime::new(config.into(), rom.as_deref(), images, BrowserClock::new())?,
        })
    }

    /// Runs one tick. Returns `false` once the session has stopped.
    pub fn step(&mut self) -> bool {
        let running = self.runtime.step();
        if !running {
            let faults = self.runtime.fault_counters();
            console_log!(
                "session stopped after {} ticks ({} recovered, {} unrecoverable faults)",
                self.runtime.tick_count(),
                faults.recovered,
                faults.unrecoverable
            );
        }
        running
    }

    pub fn is_running(&self) -> bool {
        self.runtime.running()
    }

    pub fn key_down(&mut self, scancode: u8) {
        self.runtime.push_event(HostEvent::KeyDown(scancode));
    }

    pub fn key_up(&mut self, scancode: u8) {
        self.runtime.push_event(HostEvent::KeyUp(scancode));
    }

    pub fn mouse_move(&mut self, x: u16, y: u16) {
        self.runtime.push_event(HostEvent::MouseMoved { x, y });
    }

    pub fn mouse_button(&mut self, pressed: bool) {
        self.runtime.push_event(HostEvent::MouseButton { pressed });
    }

    /// Reports a dropped file by name. The disk table is fixed once the
    /// session exists, so the guest only sees the drop counter change.
    pub fn file_dropped(&mut self, name: String) {
        self.runtime.push_event(HostEvent::FileDropped(name.into()));
    }

    pub fn quit(&mut self) {
        self.runtime.push_event(HostEvent::Quit);
    }

    pub fn serial_input(&mut self, bytes: &[u8]) {
        self.runtime.push_serial_input(bytes);
    }

    /// Serial bytes written by the guest since the previous call.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.runtime.take_serial_output()
    }

    /// Last presented frame as `0x00RRGGBB` pixels, row-major. Empty until
    /// the first redraw.
    pub fn framebuffer(&self) -> js_sys::Uint32Array {
        js_sys::Uint32Array::from(self.runtime.frame())
    }

    #[allow(clippy::missing_const_for_fn)]
    pub fn width() -> usize {
        FRAMEBUFFER_WIDTH
    }

    #[allow(clippy::missing_const_for_fn)]
    pub fn height() -> usize {
        FRAMEBUFFER_HEIGHT
    }

    /// `{ host_quit, guest_shutdown }`.
    pub fn exit_signal(&self) -> Result<JsValue, JsError> {
        Ok(serde_wasm_bindgen::to_value(&self.runtime.exit_signal())?)
    }
}
