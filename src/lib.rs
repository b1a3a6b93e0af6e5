//! Asynchronous MySQL/MariaDB client built on the client library's
//! non-blocking (`*_start` / `*_cont`) API.
//!
//! A [`Pool`] multiplexes statements and transactions over a bounded set of
//! [`Connection`]s, each driven as a cooperative state machine on a shared
//! [`Reactor`] thread. Results materialize into [`ResultSet`]s before any
//! callback fires.

pub mod error;

mod client;
mod conn;
mod driver;
mod ffi;
mod info;
mod pool;
mod reactor;
mod result;
mod transaction;

pub use client::Client;
pub use conn::{ConnStatus, Connection, ErrorCallback, ResultCallback};
pub use info::ConnectionInfo;
pub use pool::{DEFAULT_PENDING_LIMIT, Pool, TransactionCallback};
pub use reactor::{Reactor, ReactorHandle};
pub use result::ResultSet;
pub use transaction::{CommitCallback, Transaction};

#[cfg(test)]
mod result_test;
