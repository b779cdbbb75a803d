//! Bounded blocking writes.
//!
//! Some sinks (TLS sockets on a dead link are the usual offender) can block
//! inside `write` forever and offer no way to cancel the call. `BoundedWrite`
//! runs each write on a dedicated thread and waits for it with a deadline, so
//! the caller always gets an answer in bounded time. A write that overruns is
//! reported as a timeout; the thread running it is left behind until the
//! underlying call returns on its own (a zombie write).

mod bounded;
mod error;

pub use bounded::BoundedWrite;
pub use error::WriteError;
