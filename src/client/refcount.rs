use super::lock;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Usage counter that refuses to go negative
#[derive(Debug)]
pub(crate) struct UsageCount {
    count: AtomicI64,
}

impl UsageCount {
    pub fn new(initial: i64) -> Self {
        Self {
            count: AtomicI64::new(initial),
        }
    }

    pub fn get(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Increment, returning the new count
    pub fn acquire(&self) -> i64 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement, returning the new count
    ///
    /// An underflow leaves the count untouched and reports a lifecycle error
    /// naming `what`.
    pub fn release(&self, what: &str) -> Result<i64> {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then_some(n - 1)
            })
            .map(|previous| previous - 1)
            .map_err(|_| Error::lifecycle(what))
    }
}

#[derive(Debug)]
struct OwnedState {
    count: i64,
    holds_owner: bool,
}

/// Usage count of an object that keeps a usage of its owner while in use
///
/// The count and the owner usage change together under one lock, so an
/// acquire racing the last release never ends up without an owner usage.
#[derive(Debug)]
pub(crate) struct OwnedUsage {
    state: Mutex<OwnedState>,
}

impl OwnedUsage {
    /// `holds_owner` says whether the creator already took the owner usage
    pub fn new(initial: i64, holds_owner: bool) -> Self {
        Self {
            state: Mutex::new(OwnedState {
                count: initial,
                holds_owner,
            }),
        }
    }

    pub fn get(&self) -> i64 {
        lock(&self.state).count
    }

    /// Increment, calling `acquire_owner` when the owner usage is missing
    pub fn acquire(&self, acquire_owner: impl FnOnce()) -> i64 {
        let mut state = lock(&self.state);
        state.count += 1;
        if !state.holds_owner {
            acquire_owner();
            state.holds_owner = true;
        }
        state.count
    }

    /// Decrement; the last usage hands the owner usage to `release_owner`
    pub fn release(
        &self,
        what: &str,
        release_owner: impl FnOnce() -> Result<()>,
    ) -> Result<i64> {
        let mut state = lock(&self.state);
        let count = Self::decrement(&mut state, what)?;
        if count == 0 && state.holds_owner {
            state.holds_owner = false;
            release_owner()?;
        }
        Ok(count)
    }

    /// Decrement; at zero the owner usage is given up and the second value
    /// says whether the caller now has to release it
    pub fn release_detached(&self, what: &str) -> Result<(i64, bool)> {
        let mut state = lock(&self.state);
        let count = Self::decrement(&mut state, what)?;
        let detached = count == 0 && std::mem::take(&mut state.holds_owner);
        Ok((count, detached))
    }

    fn decrement(state: &mut OwnedState, what: &str) -> Result<i64> {
        if state.count <= 0 {
            return Err(Error::lifecycle(what));
        }
        state.count -= 1;
        Ok(state.count)
    }
}
