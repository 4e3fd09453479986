//! Session state and the event loop.
//!
//! [`Session::iterate`] is one full tick: budget, slice execution with a
//! real-time clock update after every slice, display interrupt, host event
//! poll and exit check. Two drivers sit on top of it. [`Session::run_blocking`]
//! loops and sleeps off the rest of each tick; [`Session::step`] runs one
//! iteration for hosts that own the schedule (browser animation frames).

use crate::bus::BusAdapter;
use crate::config::{ConfigError, SessionConfig};
use crate::engine::{ExecutionEngine, FaultCounters, Processor};
use crate::fault::Fault;
use crate::host::{Clock, Host, HostEvent};
use crate::interrupt::{DispatchOutcome, InterruptDispatcher};
use crate::timing::{TickBudget, TimingScheduler, TimingState, UptimeSource};

/// Event loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LoopState {
    /// Iterations continue.
    #[default]
    Running,
    /// Terminal; no further iterations run.
    Stopped,
}

/// Independent stop requests, checked once per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExitSignal {
    /// Host UI asked to quit.
    pub host_quit: bool,
    /// Guest wrote the power-off request.
    pub guest_shutdown: bool,
}

impl ExitSignal {
    /// Returns `true` when either side asked to stop.
    #[must_use]
    pub const fn should_stop(self) -> bool {
        self.host_quit || self.guest_shutdown
    }
}

/// Summary of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct IterationReport {
    /// Tick index this iteration ran as.
    pub tick: u64,
    /// Wall-clock milliseconds since the previous iteration started.
    pub elapsed_ms: u64,
    /// Budget granted for the tick.
    pub budget: TickBudget,
    /// Cycles actually executed.
    pub executed: u64,
    /// Faults resolved by recovery.
    pub recovered: u32,
    /// Fault that abandoned the rest of the tick.
    pub abandoned: Option<Fault>,
    /// Display interrupt result.
    pub dispatch: DispatchOutcome,
    /// Loop state after the exit check.
    pub state: LoopState,
}

/// Everything one emulation session owns.
#[derive(Debug)]
pub struct Session<P, H> {
    config: SessionConfig,
    engine: ExecutionEngine<P>,
    bus: BusAdapter,
    scheduler: TimingScheduler,
    dispatcher: InterruptDispatcher,
    host: H,
    exit: ExitSignal,
    state: LoopState,
}

impl<P: Processor, H: Host> Session<P, H> {
    /// Builds a session whose first tick is measured from `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `config` fails validation.
    pub fn new(
        config: SessionConfig,
        processor: P,
        bus: BusAdapter,
        host: H,
        now_ms: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::info!(
            cpu_hz = config.cpu_hz,
            ticks_per_second = config.ticks_per_second,
            budget_mode = ?config.budget_mode,
            headless = config.headless,
            debug = config.debug,
            disks = bus.disks().table().len(),
            "session created"
        );
        Ok(Self {
            engine: ExecutionEngine::new(processor, config.debug),
            scheduler: TimingScheduler::for_mode(config.budget_mode, now_ms),
            dispatcher: InterruptDispatcher::from_config(&config),
            config,
            bus,
            host,
            exit: ExitSignal::default(),
            state: LoopState::Running,
        })
    }

    /// Runs one full tick.
    pub fn iterate(&mut self, clock: &mut dyn Clock) -> IterationReport {
        let elapsed_ms = self.scheduler.begin_tick(clock.now_ms());
        let budget = self.scheduler.next_budget(&self.config, elapsed_ms);
        tracing::debug!(
            elapsed_ms,
            per_slice = budget.per_slice,
            leftover = budget.leftover,
            slices = budget.slices,
            "tick budget"
        );

        let mut executed = 0;
        let mut recovered = 0;
        let mut abandoned = None;
        for slice in 0..budget.slices {
            if abandoned.is_none() {
                let outcome = self
                    .engine
                    .run_slice(budget.slice_budget(slice), &mut self.bus);
                executed += u64::from(outcome.executed);
                recovered += outcome.recovered;
                abandoned = outcome.unrecoverable;
            }
            self.update_rtc(clock);
        }

        let tick = self.scheduler.state().tick_count;
        let dispatch =
            self.dispatcher
                .on_tick(tick, &mut self.engine, &mut self.host, self.bus.framebuffer());

        for event in self.host.poll_events() {
            self.apply_event(event);
        }

        self.scheduler.end_tick(clock.now_ms());
        self.exit.guest_shutdown |= self.bus.shutdown_requested();
        if self.state == LoopState::Running && self.exit.should_stop() {
            tracing::info!(
                host_quit = self.exit.host_quit,
                guest_shutdown = self.exit.guest_shutdown,
                ticks = self.scheduler.state().tick_count,
                "event loop stopping"
            );
            self.state = LoopState::Stopped;
        }

        IterationReport {
            tick,
            elapsed_ms,
            budget,
            executed,
            recovered,
            abandoned,
            dispatch,
            state: self.state,
        }
    }

    /// Push driver: one iteration per call, no sleeping. Returns
    /// [`LoopState::Stopped`] without doing anything once the loop has ended.
    pub fn step(&mut self, clock: &mut dyn Clock) -> LoopState {
        if self.state == LoopState::Stopped {
            return LoopState::Stopped;
        }
        self.iterate(clock).state
    }

    /// Pull driver: iterates until stopped, sleeping off the remainder of
    /// each tick. An iteration that overran its tick is not followed by a
    /// sleep.
    pub fn run_blocking(&mut self, clock: &mut dyn Clock) -> ExitSignal {
        while self.state == LoopState::Running {
            self.iterate(clock);
            if self.state == LoopState::Stopped {
                break;
            }
            match self.pacing_delay_ms() {
                0 => tracing::trace!("tick overran; not sleeping"),
                delay => clock.sleep_ms(delay),
            }
        }
        self.exit
    }

    /// Milliseconds left in the nominal tick after the last iteration's work.
    #[must_use]
    pub fn pacing_delay_ms(&self) -> u64 {
        let timing = self.scheduler.state();
        self.config
            .tick_duration_ms()
            .saturating_sub(timing.tick_end.saturating_sub(timing.tick_start))
    }

    /// Asks the loop to stop after the current iteration.
    #[allow(clippy::missing_const_for_fn)]
    pub fn request_quit(&mut self) {
        self.exit.host_quit = true;
    }

    fn update_rtc(&mut self, clock: &mut dyn Clock) {
        let source = self.scheduler.uptime_source();
        let rtc = self.bus.rtc_mut();
        rtc.set_wall_time(clock.unix_seconds());
        match source {
            UptimeSource::Counted => rtc.tick_uptime(),
            UptimeSource::HostClock => {
                rtc.set_uptime(u32::try_from(clock.now_ms()).unwrap_or(u32::MAX));
            }
        }
    }

    fn apply_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Quit => {
                tracing::info!("host requested quit");
                self.exit.host_quit = true;
            }
            HostEvent::KeyDown(scancode) => self.bus.keyboard_mut().press(scancode),
            HostEvent::KeyUp(scancode) => self.bus.keyboard_mut().release(scancode),
            HostEvent::MouseMoved { x, y } => self.bus.mouse_mut().move_to(x, y),
            HostEvent::MouseButton { pressed } => self.bus.mouse_mut().set_pressed(pressed),
            HostEvent::FileDropped(path) => self.bus.disks_mut().note_dropped_file(&path),
        }
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Bus and peripherals.
    #[must_use]
    pub const fn bus(&self) -> &BusAdapter {
        &self.bus
    }

    /// Mutable bus, for host-side input such as serial bytes.
    #[allow(clippy::missing_const_for_fn)]
    pub fn bus_mut(&mut self) -> &mut BusAdapter {
        &mut self.bus
    }

    /// Execution context.
    #[must_use]
    pub const fn processor(&self) -> &P {
        self.engine.processor()
    }

    /// Session fault totals.
    #[must_use]
    pub const fn fault_counters(&self) -> FaultCounters {
        self.engine.counters()
    }

    /// Timing bookkeeping.
    #[must_use]
    pub const fn timing(&self) -> &TimingState {
        self.scheduler.state()
    }

    /// Presentation host.
    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Mutable presentation host.
    #[allow(clippy::missing_const_for_fn)]
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Current stop requests.
    #[must_use]
    pub const fn exit_signal(&self) -> ExitSignal {
        self.exit
    }

    /// Current loop state.
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }
}
