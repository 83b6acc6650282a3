//! Per-operation session state

use stkflash_core::target::Signature;

/// Where a session is in the programming sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet
    Idle,
    /// Reset pulse in progress
    Resetting,
    /// Waiting for the bootloader to answer `GetSync`
    AwaitingSync,
    /// Reading versions, sign-on and signature
    ReadingSignature,
    /// Sending device parameters
    SettingDevice,
    /// Programming mode entered
    InProgMode,
    /// Chip erase in progress
    Erasing,
    /// Writing a page
    Programming {
        /// Page index
        page: usize,
    },
    /// Reading a page back after writing it
    Verifying {
        /// Page index
        page: usize,
    },
    /// Reading a page for a flash dump
    Reading {
        /// Page index
        page: usize,
    },
    /// Leaving programming mode
    LeavingProgMode,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

impl SessionState {
    /// Whether the session has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    /// Page the state refers to, if any
    pub fn page(self) -> Option<usize> {
        match self {
            SessionState::Programming { page }
            | SessionState::Verifying { page }
            | SessionState::Reading { page } => Some(page),
            _ => None,
        }
    }
}

/// Bookkeeping for one flash, probe or read operation
#[derive(Debug, Clone)]
pub struct ProgrammingSession {
    state: SessionState,
    /// Signature read from the device
    pub signature: Option<Signature>,
    /// Baud rate of the link before the session switched it
    pub saved_baud: Option<u32>,
    /// Segment selected by the last extended address load
    pub extended_address: Option<u8>,
    /// Whether programming mode was entered
    pub in_prog_mode: bool,
    /// Command re-sends so far
    pub retries: u32,
    /// Clock value when the session started
    pub started_ms: u64,
}

impl ProgrammingSession {
    /// Start a new session
    pub fn new(started_ms: u64) -> Self {
        Self {
            state: SessionState::Idle,
            signature: None,
            saved_baud: None,
            extended_address: None,
            in_prog_mode: false,
            retries: 0,
            started_ms,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`
    ///
    /// Terminal states are final; later transitions are ignored.
    pub fn enter(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            return;
        }
        log::trace!("stk500: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Page cursor: the page currently being processed
    pub fn page(&self) -> Option<usize> {
        self.state.page()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = ProgrammingSession::new(0);
        assert_eq!(s.state(), SessionState::Idle);
        s.enter(SessionState::Programming { page: 2 });
        assert_eq!(s.page(), Some(2));
        s.enter(SessionState::Failed);
        s.enter(SessionState::Done);
        assert_eq!(s.state(), SessionState::Failed);
    }
}
