//! Machine-wide scheduling configuration.

use crate::time::ATTOS_PER_SECOND;
use crate::Time;

/// Default synchronization quantum (100 µs).
pub const DEFAULT_QUANTUM: Time = Time::from_micros(100);

/// Default frame period (1/60 s).
pub const DEFAULT_FRAME_PERIOD: Time = Time::from_attos(ATTOS_PER_SECOND / 60);

/// Top-level immutable configuration for a machine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineConfig {
    /// Largest lead any live execution unit may build over another.
    ///
    /// A zero quantum degrades to one instruction per slice.
    pub quantum: Time,
    /// Span covered by one [`crate::Machine::run_frame`] call.
    pub frame_period: Time,
    /// Enables trace event dispatch to the installed sink.
    pub tracing_enabled: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            frame_period: DEFAULT_FRAME_PERIOD,
            tracing_enabled: false,
        }
    }
}

impl MachineConfig {
    /// Replaces the quantum.
    #[must_use]
    pub const fn with_quantum(mut self, quantum: Time) -> Self {
        self.quantum = quantum;
        self
    }

    /// Replaces the frame period.
    #[must_use]
    pub const fn with_frame_period(mut self, frame_period: Time) -> Self {
        self.frame_period = frame_period;
        self
    }

    /// Enables or disables tracing.
    #[must_use]
    pub const fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }
}
