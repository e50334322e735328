// MIT License - Copyright (c) 2026 Peter Wright
// Foxtron DALI gateway driver

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod connection;
pub mod pending;

pub use connection::{Backoff, Connection, ConnectionState, SessionHandler};
pub use pending::{PendingQueries, PendingQuery};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
