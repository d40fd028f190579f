use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use auto_impl::auto_impl;

/// Trait for types that can report the current time as milliseconds since the
/// UNIX epoch.
#[auto_impl(Box, Arc)]
pub trait TimeSinceEpoch: Send + Sync + 'static {
    /// Returns the number of milliseconds since the UNIX epoch.
    fn since_epoch_millis(&self) -> u64;
}

/// Reports the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct CurrentTime;

impl TimeSinceEpoch for CurrentTime {
    fn since_epoch_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| {
                u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
            })
    }
}

/// A clock that only moves when told to. For testing purposes.
#[derive(Debug, Default)]
pub struct MockTime {
    millis: AtomicU64,
}

impl MockTime {
    /// Constructs a clock that starts at the provided time.
    pub fn from_millis(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Constructs a clock that starts at the current system time.
    pub fn now() -> Self {
        Self::from_millis(CurrentTime.since_epoch_millis())
    }

    /// Advances the clock by the provided number of milliseconds.
    pub fn add_millis(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to the provided time.
    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl TimeSinceEpoch for MockTime {
    fn since_epoch_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
