use core::{error::Error as _, fmt};

use allocator::BuddyError;
use log::error;

use crate::HEAP;

/// Human-readable report of an allocator error.
///
/// Includes the location where the error was raised, the chain of
/// underlying causes and, when the heap lock is free, the current heap
/// statistics.
pub struct Report<'a> {
    error: &'a BuddyError,
}

impl<'a> Report<'a> {
    #[must_use]
    pub fn new(error: &'a BuddyError) -> Self {
        Self { error }
    }
}

impl fmt::Debug for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        writeln!(f, "  at {}", self.error.location())?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {s}")?;
            source = s.source();
            index += 1;
        }
        if let Some(heap) = HEAP.try_lock() {
            writeln!(f)?;
            write!(f, "{}", heap.stats())?;
        }
        Ok(())
    }
}

/// Reports a fatal allocator error and halts by panicking.
///
/// Must not be called while the heap lock is held by the caller.
#[track_caller]
pub fn report(err: &BuddyError) -> ! {
    error!("kernel heap: {err}");
    let report = Report::new(err);
    panic!("Critical error occurred\n\n{report}");
}
