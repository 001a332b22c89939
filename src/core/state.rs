use crate::error::{Error, Result};

/// Lifecycle of a record sink: `Unconfigured -> Configured -> Writing* -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Unconfigured,
    Configured,
    Writing { records: u64 },
    Closed,
}

impl StageState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &StageState) -> bool {
        use StageState::*;

        matches!(
            (self, target),
            (Unconfigured, Configured) |
            (Unconfigured, Closed) |

            // header renegotiation keeps the layout, see `RecordHeader::same_layout`
            (Configured, Configured) |
            (Configured, Writing { .. }) |
            (Configured, Closed) |

            (Writing { .. }, Writing { .. }) |
            (Writing { .. }, Configured) |
            (Writing { .. }, Closed)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Unconfigured => "Unconfigured",
            Self::Configured => "Configured",
            Self::Writing { .. } => "Writing",
            Self::Closed => "Closed",
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured | Self::Writing { .. })
    }

    pub fn records(&self) -> u64 {
        match self {
            Self::Writing { records } => *records,
            _ => 0,
        }
    }

    /// Enter `Configured`; returns true on the first configuration
    pub fn configure(&mut self) -> Result<bool> {
        let first = *self == StageState::Unconfigured;
        self.transition_to(StageState::Configured)?;
        Ok(first)
    }

    /// Account for one record written
    pub fn record_written(&mut self) -> Result<()> {
        let records = self.records() + 1;
        if !self.is_configured() {
            return Err(Error::state(format!(
                "write_record called in state {}",
                self.name()
            )));
        }
        *self = StageState::Writing { records };
        Ok(())
    }

    /// Enter `Closed`; returns false when already closed
    pub fn close(&mut self) -> bool {
        if *self == StageState::Closed {
            return false;
        }
        *self = StageState::Closed;
        true
    }

    fn transition_to(&mut self, target: StageState) -> Result<()> {
        if !self.can_transition_to(&target) {
            return Err(Error::state(format!(
                "invalid transition {} -> {}",
                self.name(),
                target.name()
            )));
        }
        // renegotiating a header mid-stream keeps the record count
        if let (StageState::Writing { .. }, StageState::Configured) = (*self, target) {
            return Ok(());
        }
        *self = target;
        Ok(())
    }
}

impl Default for StageState {
    fn default() -> Self {
        Self::Unconfigured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(StageState::Unconfigured.can_transition_to(&StageState::Configured));
        assert!(!StageState::Unconfigured.can_transition_to(&StageState::Writing { records: 1 }));
        assert!(!StageState::Closed.can_transition_to(&StageState::Configured));
    }

    #[test]
    fn test_write_before_configure_fails() {
        let mut state = StageState::default();
        assert!(matches!(state.record_written(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_reconfigure_keeps_record_count() {
        let mut state = StageState::default();
        assert!(state.configure().unwrap());
        state.record_written().unwrap();
        state.record_written().unwrap();
        assert!(!state.configure().unwrap());
        assert_eq!(state.records(), 2);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = StageState::default();
        state.configure().unwrap();
        assert!(state.close());
        assert!(!state.close());
        assert!(state.configure().is_err());
        assert!(state.record_written().is_err());
    }
}
