//! Processor contract and the per-slice driving loop.
//!
//! The engine owns the execution context for the whole session. It feeds one
//! slice budget at a time into [`Processor::run`], gives every fault exactly
//! one [`Processor::recover`] attempt, and stops the slice when recovery
//! fails. The session then abandons the rest of the tick; abandoned cycles
//! are never carried over.

use thiserror::Error;

use crate::bus::Bus;
use crate::fault::Fault;

/// Result of one [`Processor::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunOutcome {
    /// Cycles consumed; never more than the budget passed in.
    pub executed: u32,
    /// Fault that stopped execution early, if any.
    pub fault: Option<Fault>,
}

impl RunOutcome {
    /// Outcome for a run that consumed `executed` cycles without faulting.
    #[must_use]
    pub const fn completed(executed: u32) -> Self {
        Self {
            executed,
            fault: None,
        }
    }

    /// Outcome for a run stopped by `fault` after `executed` cycles.
    #[must_use]
    pub const fn faulted(executed: u32, fault: Fault) -> Self {
        Self {
            executed,
            fault: Some(fault),
        }
    }
}

/// Reason an interrupt could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RaiseError {
    /// The guest has interrupts disabled.
    #[error("interrupts are masked")]
    Masked,
    /// Entering the handler faulted (for example, the stack is unmapped).
    #[error("interrupt entry faulted: {0}")]
    Entry(Fault),
}

/// Execution context driven by the engine.
pub trait Processor {
    /// Runs until `budget` cycles are consumed, the processor halts, or a
    /// fault occurs. Must never report more than `budget` executed cycles.
    fn run(&mut self, budget: u32, bus: &mut dyn Bus) -> RunOutcome;

    /// Attempts to resolve `fault` in place. Returns `None` when execution
    /// may continue, or the same or an escalated fault otherwise.
    fn recover(&mut self, fault: Fault) -> Option<Fault>;

    /// Raises interrupt `vector`.
    ///
    /// # Errors
    ///
    /// Returns a [`RaiseError`] when the interrupt cannot be delivered.
    fn raise(&mut self, vector: u16) -> Result<(), RaiseError>;

    /// Forces the halted flag.
    fn set_halted(&mut self, halted: bool);

    /// Returns `true` while the processor waits for an interrupt.
    fn halted(&self) -> bool;
}

/// What happened while driving one millisecond slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SliceOutcome {
    /// Cycles consumed in this slice.
    pub executed: u32,
    /// Faults resolved by recovery.
    pub recovered: u32,
    /// Fault recovery could not resolve; the rest of the tick is abandoned.
    pub unrecoverable: Option<Fault>,
}

/// Running fault totals for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FaultCounters {
    /// Faults resolved by recovery.
    pub recovered: u64,
    /// Faults that abandoned a tick.
    pub unrecoverable: u64,
}

/// Owns the processor and drives it through slice budgets.
#[derive(Debug)]
pub struct ExecutionEngine<P> {
    processor: P,
    debug: bool,
    counters: FaultCounters,
}

impl<P: Processor> ExecutionEngine<P> {
    /// Wraps `processor`. With `debug` set every fault is logged before
    /// recovery.
    #[must_use]
    pub const fn new(processor: P, debug: bool) -> Self {
        Self {
            processor,
            debug,
            counters: FaultCounters {
                recovered: 0,
                unrecoverable: 0,
            },
        }
    }

    /// Consumes one slice budget.
    ///
    /// Repeats `run` on the remaining budget, attempting one recovery per
    /// fault, until the budget is spent or recovery fails. A run without a
    /// fault that makes no progress (halted processor) also ends the slice,
    /// as do two recovered faults in a row that both executed nothing.
    pub fn run_slice(&mut self, budget: u32, bus: &mut dyn Bus) -> SliceOutcome {
        let mut outcome = SliceOutcome::default();
        let mut remaining = budget;
        let mut stalled = false;

        while remaining > 0 {
            let run = self.processor.run(remaining, bus);
            let executed = run.executed.min(remaining);
            remaining -= executed;
            outcome.executed += executed;

            let Some(fault) = run.fault else {
                if executed == 0 {
                    break;
                }
                stalled = false;
                continue;
            };

            if self.debug {
                tracing::warn!(
                    %fault,
                    code = fault.kind.as_u8(),
                    class = ?fault.kind.class(),
                    "processor fault"
                );
            }

            if let Some(unresolved) = self.processor.recover(fault) {
                if self.debug {
                    tracing::warn!(fault = %unresolved, "unrecoverable fault; abandoning tick");
                }
                self.counters.unrecoverable += 1;
                outcome.unrecoverable = Some(unresolved);
                break;
            }

            self.counters.recovered += 1;
            outcome.recovered += 1;
            // A recovered fault that cost nothing gets one more pass; two in
            // a row would spin.
            if executed == 0 {
                if stalled {
                    break;
                }
                stalled = true;
            } else {
                stalled = false;
            }
        }

        outcome
    }

    /// Raises `vector` on the processor.
    ///
    /// # Errors
    ///
    /// Propagates the processor's [`RaiseError`].
    pub fn raise(&mut self, vector: u16) -> Result<(), RaiseError> {
        self.processor.raise(vector)
    }

    /// Forces the processor's halted flag.
    pub fn set_halted(&mut self, halted: bool) {
        self.processor.set_halted(halted);
    }

    /// Session fault totals.
    #[must_use]
    pub const fn counters(&self) -> FaultCounters {
        self.counters
    }

    /// The execution context.
    #[must_use]
    pub const fn processor(&self) -> &P {
        &self.processor
    }
}
