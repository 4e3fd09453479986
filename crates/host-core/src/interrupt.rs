//! Periodic display-update interrupt.

use crate::bus::framebuffer::Framebuffer;
use crate::config::SessionConfig;
use crate::engine::{ExecutionEngine, Processor};
use crate::host::Host;

/// What the dispatcher did for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DispatchOutcome {
    /// Tick is not on the display cadence.
    Skipped,
    /// Display update fired.
    Dispatched {
        /// A redraw was requested from the host.
        redrawn: bool,
        /// The guest accepted the vsync interrupt.
        vsync_raised: bool,
    },
}

/// Requests a redraw and raises vsync every `frames_per_update` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptDispatcher {
    frames_per_update: u64,
    vector: u16,
    headless: bool,
}

impl InterruptDispatcher {
    /// Builds the dispatcher from the session cadence settings.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            frames_per_update: u64::from(config.frames_per_update.max(1)),
            vector: config.vsync_vector,
            headless: config.headless,
        }
    }

    /// Runs after tick `tick_count`'s budget has been consumed or abandoned.
    ///
    /// On cadence ticks: redraw (never when headless), raise vsync, then
    /// clear the halted flag whether or not the guest accepted the raise.
    pub fn on_tick<P: Processor>(
        &self,
        tick_count: u64,
        engine: &mut ExecutionEngine<P>,
        host: &mut dyn Host,
        framebuffer: &Framebuffer,
    ) -> DispatchOutcome {
        if tick_count % self.frames_per_update != 0 {
            return DispatchOutcome::Skipped;
        }

        let redrawn = !self.headless;
        if redrawn {
            host.redraw(framebuffer);
        }

        let vsync_raised = match engine.raise(self.vector) {
            Ok(()) => true,
            Err(error) => {
                tracing::trace!(tick_count, %error, "vsync not delivered");
                false
            }
        };
        engine.set_halted(false);

        DispatchOutcome::Dispatched {
            redrawn,
            vsync_raised,
        }
    }
}
