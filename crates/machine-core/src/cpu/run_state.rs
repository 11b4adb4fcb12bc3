use crate::TrapCode;

/// Execution state of one execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunState {
    /// Powered but never run, or stopped by the machine.
    #[default]
    Stopped,
    /// Executing instructions.
    Running,
    /// Halted until an interrupt is accepted.
    WaitingForInterrupt,
    /// Halted permanently until reset.
    Trapped(TrapCode),
}

impl RunState {
    /// Returns the trap cause, if this state is trapped.
    #[must_use]
    pub const fn trap(self) -> Option<TrapCode> {
        match self {
            Self::Trapped(cause) => Some(cause),
            Self::Stopped | Self::Running | Self::WaitingForInterrupt => None,
        }
    }

    /// Returns `true` when only a reset can make the unit progress.
    #[must_use]
    pub const fn is_trapped(self) -> bool {
        matches!(self, Self::Trapped(_))
    }

    /// Stable numeric encoding: 0 stopped, 1 running, 2 waiting,
    /// `0x80 | trap code` trapped.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::WaitingForInterrupt => 2,
            Self::Trapped(cause) => 0x80 | cause.as_u8(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RunState;
    use crate::TrapCode;

    #[test]
    fn run_state_default_is_stopped() {
        assert_eq!(RunState::default(), RunState::Stopped);
    }

    #[test]
    fn trap_accessor_reports_only_trapped_variant() {
        assert_eq!(RunState::Running.trap(), None);
        assert_eq!(RunState::WaitingForInterrupt.trap(), None);
        assert_eq!(
            RunState::Trapped(TrapCode::IllegalInstruction).trap(),
            Some(TrapCode::IllegalInstruction)
        );
        assert!(RunState::Trapped(TrapCode::Lockup).is_trapped());
        assert_eq!(RunState::Trapped(TrapCode::InvalidVector).as_u8(), 0x82);
    }
}
