//! Convenience owner of one reactor and one pool.

use std::sync::Arc;
use std::sync::mpsc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::info::ConnectionInfo;
use crate::pool::Pool;
use crate::reactor::Reactor;
use crate::result::ResultSet;
use crate::transaction::Transaction;

/// Owns a [`Reactor`] thread and the [`Pool`] running on it, so callers that
/// do not manage their own reactor get a one-stop handle.
pub struct Client {
    reactor: Reactor,
    pool: Arc<Pool>,
}

impl Client {
    pub fn new(info: ConnectionInfo, min_size: usize, max_size: usize) -> Result<Self> {
        let reactor = Reactor::new()?;
        let pool = Pool::new(reactor.handle(), info, min_size, max_size);
        Ok(Self { reactor, pool })
    }

    /// Bring the pool up to its minimum population.
    pub fn init(&self) {
        self.pool.init();
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Fire-and-forget statement; failures are logged, not reported.
    pub fn execute(&self, sql: &str) {
        self.pool
            .execute(sql, |_| {}, |err| warn!(error = %err, "statement failed"));
    }

    /// Statement with result and error callbacks, like [`Pool::execute`].
    pub fn query<R, E>(&self, sql: &str, result_cb: R, error_cb: E)
    where
        R: FnMut(ResultSet) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        self.pool.execute(sql, result_cb, error_cb);
    }

    /// Block until a transaction is bound to a connection and BEGIN has been
    /// dispatched. Must not be called from the reactor thread.
    pub fn new_transaction(&self) -> Result<Transaction> {
        let (tx, rx) = mpsc::channel();
        self.pool.new_transaction_async(move |result| {
            let _ = tx.send(result);
        });
        rx.recv().map_err(|_| Error::PoolClosed)?
    }

    /// Shut the pool down and stop the reactor loop.
    pub fn close_all(&self) {
        self.pool.close_all();
        self.reactor.stop();
    }

    /// Wait for the reactor thread to exit.
    pub fn join(&self) {
        self.reactor.join();
    }
}
