//! Command/response pairing via a free-running id
//!
//! The protocol is strictly request/response on one connection, so a single
//! counter is enough to detect a lost or duplicated response. The sender side
//! owns a [`SequenceTracker`]; the daemon side only observes incoming ids with
//! a [`CommandSequence`] to report gaps.

use thiserror::Error;

/// Maximum distance a response id may trail the last issued id before the
/// peers are considered out of sync.
pub const MAX_EXPECTED_DRIFT: u32 = 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Command {outstanding} is still awaiting its response")]
    CommandInFlight { outstanding: u32 },

    #[error("Response id {received} does not match command id {expected}")]
    Mismatch { expected: u32, received: u32 },

    #[error("Desynchronized: response id {received} trails command id {expected}")]
    Desynchronized { expected: u32, received: u32 },
}

impl SequenceError {
    /// Whether the connection owning the tracker must be discarded
    pub fn is_fatal(&self) -> bool {
        matches!(self, SequenceError::Desynchronized { .. })
    }
}

/// Per-connection sequence state on the sending side
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    last_issued: u32,
    outstanding: bool,
    desync: Option<(u32, u32)>,
}

impl SequenceTracker {
    /// Create a tracker whose first issued id will be `initial + 1`
    pub fn new(initial: u32) -> Self {
        Self {
            last_issued: initial,
            outstanding: false,
            desync: None,
        }
    }

    /// Stamp the next command; fails while a previous command is unresolved
    pub fn issue(&mut self) -> Result<u32, SequenceError> {
        if let Some((expected, received)) = self.desync {
            return Err(SequenceError::Desynchronized { expected, received });
        }
        if self.outstanding {
            return Err(SequenceError::CommandInFlight {
                outstanding: self.last_issued,
            });
        }

        self.last_issued = self.last_issued.wrapping_add(1);
        self.outstanding = true;
        Ok(self.last_issued)
    }

    /// Match a response id against the outstanding command
    pub fn pair(&mut self, received: u32) -> Result<(), SequenceError> {
        let expected = self.last_issued;
        if let Some((expected, received)) = self.desync {
            return Err(SequenceError::Desynchronized { expected, received });
        }

        if self.outstanding && received == expected {
            self.outstanding = false;
            return Ok(());
        }

        let behind = expected.wrapping_sub(received);
        if behind > MAX_EXPECTED_DRIFT && behind <= u32::MAX / 2 {
            self.desync = Some((expected, received));
            return Err(SequenceError::Desynchronized { expected, received });
        }

        Err(SequenceError::Mismatch { expected, received })
    }

    pub fn last_issued(&self) -> u32 {
        self.last_issued
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding
    }

    pub fn is_desynchronized(&self) -> bool {
        self.desync.is_some()
    }

    /// Fresh state, as after a reconnect
    pub fn reset(&mut self, initial: u32) {
        *self = Self::new(initial);
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new(0)
    }
}

/// What the daemon saw when a command id arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceObservation {
    /// First command on this connection
    First,
    InOrder,
    /// Id did not follow the previous one; the peers are out of sync
    Gap { previous: u32, current: u32 },
}

/// Receive-side view of the sender's counter
#[derive(Debug, Clone, Default)]
pub struct CommandSequence {
    previous: Option<u32>,
}

impl CommandSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, current: u32) -> SequenceObservation {
        let observation = match self.previous {
            None => SequenceObservation::First,
            Some(previous) if current.wrapping_sub(previous) == 1 => SequenceObservation::InOrder,
            Some(previous) => SequenceObservation::Gap { previous, current },
        };
        self.previous = Some(current);
        observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_never_desyncs() {
        let mut tracker = SequenceTracker::default();
        for expected in 1..=100u32 {
            let id = tracker.issue().unwrap();
            assert_eq!(id, expected);
            tracker.pair(id).unwrap();
        }
        assert!(!tracker.is_desynchronized());
    }

    #[test]
    fn test_stale_response_desyncs() {
        let mut tracker = SequenceTracker::new(9);
        assert_eq!(tracker.issue().unwrap(), 10);

        let err = tracker.pair(7).unwrap_err();
        assert_eq!(
            err,
            SequenceError::Desynchronized {
                expected: 10,
                received: 7
            }
        );
        assert!(err.is_fatal());
        assert!(tracker.is_desynchronized());

        // Terminal: even the right id is rejected now
        assert!(matches!(
            tracker.pair(10),
            Err(SequenceError::Desynchronized { .. })
        ));
        assert!(matches!(
            tracker.issue(),
            Err(SequenceError::Desynchronized { .. })
        ));
    }

    #[test]
    fn test_reordered_response_is_flagged() {
        // Commands 5, 6, 7; the reply on 7's channel carries id 6
        let mut tracker = SequenceTracker::new(4);
        for _ in 0..2 {
            let id = tracker.issue().unwrap();
            tracker.pair(id).unwrap();
        }
        assert_eq!(tracker.issue().unwrap(), 7);

        let err = tracker.pair(6).unwrap_err();
        assert_eq!(
            err,
            SequenceError::Mismatch {
                expected: 7,
                received: 6
            }
        );
        assert!(!err.is_fatal());
        assert!(tracker.has_outstanding());
    }

    #[test]
    fn test_response_ahead_is_mismatch() {
        let mut tracker = SequenceTracker::default();
        tracker.issue().unwrap();
        assert!(matches!(
            tracker.pair(5),
            Err(SequenceError::Mismatch { .. })
        ));
        assert!(!tracker.is_desynchronized());
    }

    #[test]
    fn test_duplicate_response_is_mismatch() {
        let mut tracker = SequenceTracker::default();
        let id = tracker.issue().unwrap();
        tracker.pair(id).unwrap();
        assert!(matches!(
            tracker.pair(id),
            Err(SequenceError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_one_command_in_flight() {
        let mut tracker = SequenceTracker::default();
        tracker.issue().unwrap();
        assert_eq!(
            tracker.issue(),
            Err(SequenceError::CommandInFlight { outstanding: 1 })
        );

        // The stray response leaves the command outstanding
        assert!(tracker.pair(7).is_err());
        assert!(tracker.has_outstanding());
    }

    #[test]
    fn test_wraparound() {
        let mut tracker = SequenceTracker::new(u32::MAX - 1);
        assert_eq!(tracker.issue().unwrap(), u32::MAX);
        tracker.pair(u32::MAX).unwrap();
        assert_eq!(tracker.issue().unwrap(), 0);
        tracker.pair(0).unwrap();
        assert_eq!(tracker.issue().unwrap(), 1);

        // u32::MAX trails 1 by two
        assert!(matches!(
            tracker.pair(u32::MAX),
            Err(SequenceError::Desynchronized { .. })
        ));
    }

    #[test]
    fn test_reset_clears_desync() {
        let mut tracker = SequenceTracker::new(10);
        tracker.issue().unwrap();
        let _ = tracker.pair(1);
        assert!(tracker.is_desynchronized());

        tracker.reset(0);
        assert!(!tracker.is_desynchronized());
        assert_eq!(tracker.issue().unwrap(), 1);
    }

    #[test]
    fn test_command_sequence_gaps() {
        let mut seq = CommandSequence::new();
        assert_eq!(seq.observe(1), SequenceObservation::First);
        assert_eq!(seq.observe(2), SequenceObservation::InOrder);
        assert_eq!(
            seq.observe(4),
            SequenceObservation::Gap {
                previous: 2,
                current: 4
            }
        );
        assert_eq!(seq.observe(5), SequenceObservation::InOrder);
    }
}
