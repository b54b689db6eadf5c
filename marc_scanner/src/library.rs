//! Process-wide driver-library reference counting.
//!
//! The vendor runtime library keeps global state and must be opened exactly
//! once per process no matter how many adapters exist. All callers go through
//! `acquire`/`release`; only the 0→1 transition performs the open call and
//! only the 1→0 transition closes the library.

use std::sync::Mutex;

static REF_COUNT: Mutex<u32> = Mutex::new(0);

/// Library errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LibraryError {
    /// `release` without a matching `acquire`.
    #[error("driver library released more often than acquired")]
    Unbalanced,
}

/// Increment the library reference count, opening the library on the first
/// reference.
pub fn acquire() -> Result<(), LibraryError> {
    let mut count = REF_COUNT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if *count == 0 {
        // The one place the process-wide open call happens.
        tracing::info!("driver library opened");
    }
    *count += 1;
    tracing::debug!("driver library reference count = {count}");
    Ok(())
}

/// Decrement the library reference count, closing the library when the last
/// reference is dropped.
pub fn release() -> Result<(), LibraryError> {
    let mut count = REF_COUNT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if *count == 0 {
        return Err(LibraryError::Unbalanced);
    }
    *count -= 1;
    if *count == 0 {
        tracing::info!("driver library closed");
    }
    tracing::debug!("driver library reference count = {count}");
    Ok(())
}

/// Current open-reference count.
pub fn open_count() -> u32 {
    *REF_COUNT.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
