//! Host-side collaborators: presentation, input events and time.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::bus::framebuffer::Framebuffer;

/// Input reported by the host windowing layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostEvent {
    /// The user closed the window or asked to quit.
    Quit,
    /// Key pressed, as a set-1 scancode.
    KeyDown(u8),
    /// Key released, as a set-1 scancode (without the break bit).
    KeyUp(u8),
    /// Pointer moved to framebuffer coordinates.
    MouseMoved {
        /// Column.
        x: u16,
        /// Row.
        y: u16,
    },
    /// Primary button changed state.
    MouseButton {
        /// `true` on press, `false` on release.
        pressed: bool,
    },
    /// A file was dropped onto the window.
    FileDropped(PathBuf),
}

/// Presentation and input surface driven by the event loop.
pub trait Host {
    /// Presents the framebuffer.
    fn redraw(&mut self, framebuffer: &Framebuffer);

    /// Drains pending input without blocking.
    fn poll_events(&mut self) -> Vec<HostEvent>;
}

/// Host without a window: redraws are counted, events are injected.
#[derive(Debug, Clone, Default)]
pub struct HeadlessHost {
    pending: VecDeque<HostEvent>,
    redraws: u64,
}

impl HeadlessHost {
    /// Queues an event for the next poll.
    pub fn push_event(&mut self, event: HostEvent) {
        self.pending.push_back(event);
    }

    /// Number of redraw requests received.
    #[must_use]
    pub const fn redraws(&self) -> u64 {
        self.redraws
    }
}

impl Host for HeadlessHost {
    fn redraw(&mut self, _framebuffer: &Framebuffer) {
        self.redraws += 1;
    }

    fn poll_events(&mut self) -> Vec<HostEvent> {
        self.pending.drain(..).collect()
    }
}

/// Time source used for pacing and the guest real-time clock.
pub trait Clock {
    /// Monotonic milliseconds since the clock was created.
    fn now_ms(&mut self) -> u64;

    /// Wall-clock time in unix seconds.
    fn unix_seconds(&mut self) -> u64;

    /// Blocks for `ms` milliseconds.
    fn sleep_ms(&mut self, ms: u64);
}

/// Operating-system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&mut self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn unix_seconds(&mut self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_secs())
    }

    fn sleep_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Deterministic clock: time moves only when told to, or by a fixed step
/// every time it is read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualClock {
    now_ms: u64,
    unix_seconds: u64,
    step_per_read: u64,
    slept_ms: u64,
}

impl ManualClock {
    /// Clock starting at `now_ms` that stays put until advanced.
    #[must_use]
    pub const fn new(now_ms: u64) -> Self {
        Self {
            now_ms,
            unix_seconds: 0,
            step_per_read: 0,
            slept_ms: 0,
        }
    }

    /// Makes every [`Clock::now_ms`] read advance time by `step_ms` first.
    #[must_use]
    pub const fn with_step(mut self, step_ms: u64) -> Self {
        self.step_per_read = step_ms;
        self
    }

    /// Sets the reported wall-clock time.
    #[must_use]
    pub const fn with_unix_seconds(mut self, unix_seconds: u64) -> Self {
        self.unix_seconds = unix_seconds;
        self
    }

    /// Moves time forward.
    #[allow(clippy::missing_const_for_fn)]
    pub fn advance(&mut self, ms: u64) {
        self.now_ms += ms;
    }

    /// Total milliseconds spent in [`Clock::sleep_ms`].
    #[must_use]
    pub const fn slept_ms(&self) -> u64 {
        self.slept_ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&mut self) -> u64 {
        self.now_ms += self.step_per_read;
        self.now_ms
    }

    fn unix_seconds(&mut self) -> u64 {
        self.unix_seconds + self.now_ms / 1000
    }

    fn sleep_ms(&mut self, ms: u64) {
        self.slept_ms += ms;
        self.now_ms += ms;
    }
}
