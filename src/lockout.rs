//! Login-failure lockout state machine.
//!
//! Pure decisions over a user's failed-attempt counter and lock-expiry
//! timestamp. Persistence is the caller's job (UserStore::set_lockout).
//! Lock expiry is evaluated lazily at check time; there is no sweeper.

/// Failed attempts before an account locks.
pub const MAX_ATTEMPTS: i64 = 5;

/// Lock duration in seconds (2 hours).
pub const LOCK_DURATION_SECS: i64 = 2 * 60 * 60;

/// Derived lock state. `Locked` iff `locked_until` is set and in the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// What the caller must persist after a credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// Write the given counters.
    Persist {
        attempts: i64,
        locked_until: Option<i64>,
    },
    /// Reset counters to zero and clear the lock.
    Clear,
    /// Counters are already clean, nothing to write.
    None,
}

pub fn lock_state(locked_until: Option<i64>, now: i64) -> LockState {
    match locked_until {
        Some(until) if until > now => LockState::Locked,
        _ => LockState::Unlocked,
    }
}

/// Decide the counter update for a failed credential check.
///
/// While locked, attempts keep counting but the lock is not extended:
/// the "just reached max" condition cannot retrigger, and the counter is
/// deliberately left uncapped.
pub fn on_failed_attempt(attempts: i64, locked_until: Option<i64>, now: i64) -> Update {
    if lock_state(locked_until, now) == LockState::Locked {
        return Update::Persist {
            attempts: attempts + 1,
            locked_until,
        };
    }

    if attempts + 1 == MAX_ATTEMPTS {
        return Update::Persist {
            attempts: MAX_ATTEMPTS,
            locked_until: Some(now + LOCK_DURATION_SECS),
        };
    }

    Update::Persist {
        attempts: attempts + 1,
        locked_until,
    }
}

/// Decide the counter update for a successful credential check.
pub fn on_successful_attempt(attempts: i64, locked_until: Option<i64>) -> Update {
    if attempts == 0 && locked_until.is_none() {
        Update::None
    } else {
        Update::Clear
    }
}
