//! Timer bookkeeping for the call bridge.
//!
//! Each timer kind has one slot with an armed flag and a generation counter.
//! Arming or cancelling bumps the generation, so a firing scheduled before the
//! latest (re)arm is recognised as stale and ignored.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Caller said nothing since the AI finished its turn
    NoInput,
    /// AI has not started speaking after an instruction
    NoResponse,
    /// Caller stopped talking
    EndOfSpeech,
    /// Upper bound on waiting for the outgoing queue to empty after turn-complete
    Drain,
}

impl TimerKind {
    pub const ALL: [TimerKind; 4] = [
        TimerKind::NoInput,
        TimerKind::NoResponse,
        TimerKind::EndOfSpeech,
        TimerKind::Drain,
    ];

    fn index(self) -> usize {
        match self {
            TimerKind::NoInput => 0,
            TimerKind::NoResponse => 1,
            TimerKind::EndOfSpeech => 2,
            TimerKind::Drain => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TimerSlot {
    armed: bool,
    generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TimerTable {
    slots: [TimerSlot; 4],
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a timer, returning the generation its firing must carry.
    pub fn arm(&mut self, kind: TimerKind) -> u64 {
        let slot = &mut self.slots[kind.index()];
        slot.generation += 1;
        slot.armed = true;
        slot.generation
    }

    /// Disarm a timer. Returns false if it was not armed.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        let slot = &mut self.slots[kind.index()];
        if !slot.armed {
            return false;
        }
        slot.armed = false;
        slot.generation += 1;
        true
    }

    /// Accept a firing. Only the latest generation of an armed timer counts.
    pub fn fire(&mut self, kind: TimerKind, generation: u64) -> bool {
        let slot = &mut self.slots[kind.index()];
        if slot.armed && slot.generation == generation {
            slot.armed = false;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.index()].armed
    }

    #[cfg(test)]
    /// Generation of an armed timer.
    pub fn pending(&self, kind: TimerKind) -> Option<u64> {
        let slot = self.slots[kind.index()];
        slot.armed.then_some(slot.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearm_makes_previous_firing_stale() {
        let mut timers = TimerTable::new();
        let first = timers.arm(TimerKind::EndOfSpeech);
        let second = timers.arm(TimerKind::EndOfSpeech);
        assert!(!timers.fire(TimerKind::EndOfSpeech, first));
        assert!(timers.fire(TimerKind::EndOfSpeech, second));
        assert!(!timers.is_armed(TimerKind::EndOfSpeech));
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let mut timers = TimerTable::new();
        let generation = timers.arm(TimerKind::NoInput);
        assert!(timers.cancel(TimerKind::NoInput));
        assert!(!timers.cancel(TimerKind::NoInput));
        assert!(!timers.fire(TimerKind::NoInput, generation));
        assert_eq!(timers.pending(TimerKind::NoInput), None);
    }

    #[test]
    fn test_timer_kinds_are_independent() {
        let mut timers = TimerTable::new();
        let no_input = timers.arm(TimerKind::NoInput);
        timers.arm(TimerKind::NoResponse);
        timers.cancel(TimerKind::NoResponse);
        assert!(timers.fire(TimerKind::NoInput, no_input));
    }
}
