//! Connection pool: owns a bounded population of connections, routes
//! statements and transaction requests to idle ones, queues the overflow.
//!
//! One mutex guards the membership sets and the pending queues, held for
//! strict critical sections only; callbacks and dispatches always run with
//! the mutex released. Connections call back into the pool through weak
//! references, so dropping the pool never cycles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use crate::conn::{ConnStatus, Connection, ErrorCallback, ResultCallback};
use crate::error::{Error, Result};
use crate::info::ConnectionInfo;
use crate::reactor::ReactorHandle;
use crate::result::ResultSet;
use crate::transaction::Transaction;

/// High-water mark for the pending-statement queue. Once the queue has grown
/// past it, further submissions are rejected with [`Error::PoolOverloaded`].
pub const DEFAULT_PENDING_LIMIT: usize = 200_000;

/// Receives the transaction once a connection is bound and BEGIN has been
/// dispatched, or the error that prevented it.
pub type TransactionCallback = Box<dyn FnOnce(Result<Transaction>) + Send + 'static>;

pub(crate) struct SqlCmd {
    pub(crate) sql: String,
    pub(crate) result_cb: ResultCallback,
    pub(crate) error_cb: ErrorCallback,
}

pub struct Pool {
    reactor: ReactorHandle,
    info: Arc<ConnectionInfo>,
    min_size: usize,
    max_size: usize,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    all: HashMap<u64, Arc<Connection>>,
    idle: HashMap<u64, Arc<Connection>>,
    busy: HashMap<u64, Arc<Connection>>,
    pending_sql: VecDeque<SqlCmd>,
    pending_trans: VecDeque<TransactionCallback>,
    pending_limit: usize,
    closed: bool,
}

enum Submit {
    Dispatch(Arc<Connection>, String, ResultCallback, ErrorCallback),
    Queued { spawn_new: bool },
    Reject(Error, ErrorCallback),
}

enum TransSubmit {
    Begin(Arc<Connection>, TransactionCallback),
    Queued { spawn_new: bool },
    Reject(Error, TransactionCallback),
}

enum Next {
    Sql(SqlCmd),
    Trans(TransactionCallback),
    Retire,
    Idle,
}

impl Pool {
    pub fn new(
        reactor: ReactorHandle,
        info: ConnectionInfo,
        min_size: usize,
        max_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            reactor,
            info: Arc::new(info),
            min_size,
            max_size: max_size.max(min_size).max(1),
            inner: Mutex::new(PoolInner {
                all: HashMap::new(),
                idle: HashMap::new(),
                busy: HashMap::new(),
                pending_sql: VecDeque::new(),
                pending_trans: VecDeque::new(),
                pending_limit: DEFAULT_PENDING_LIMIT,
                closed: false,
            }),
        })
    }

    /// Bring the population up to `min_size`. Connections come up
    /// asynchronously and drain any work queued in the meantime.
    pub fn init(self: &Arc<Self>) {
        for _ in 0..self.min_size {
            self.spawn_connection();
        }
    }

    /// Override the pending-statement high-water mark.
    pub fn set_pending_limit(&self, limit: usize) {
        self.inner.lock().unwrap().pending_limit = limit;
    }

    /// Submit one pooled (non-transactional) statement.
    ///
    /// `result_cb` fires once per result set on success, `error_cb` exactly
    /// once on failure, never both. Callbacks run on the pool's reactor
    /// thread and must not panic.
    pub fn execute<R, E>(self: &Arc<Self>, sql: &str, result_cb: R, error_cb: E)
    where
        R: FnMut(ResultSet) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        self.execute_boxed(sql.to_string(), Box::new(result_cb), Box::new(error_cb));
    }

    fn execute_boxed(
        self: &Arc<Self>,
        sql: String,
        result_cb: ResultCallback,
        error_cb: ErrorCallback,
    ) {
        let submit = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                Submit::Reject(Error::PoolClosed, error_cb)
            } else if let Some(conn) = inner.checkout_idle() {
                Submit::Dispatch(conn, sql, result_cb, error_cb)
            } else if inner.pending_sql.len() > inner.pending_limit {
                Submit::Reject(Error::PoolOverloaded, error_cb)
            } else {
                inner.pending_sql.push_back(SqlCmd {
                    sql,
                    result_cb,
                    error_cb,
                });
                Submit::Queued {
                    spawn_new: inner.all.len() < self.max_size,
                }
            }
        };
        match submit {
            Submit::Dispatch(conn, sql, result_cb, error_cb) => {
                conn.execute(sql, result_cb, error_cb);
            }
            Submit::Queued { spawn_new } => {
                if spawn_new {
                    self.spawn_connection();
                }
            }
            Submit::Reject(err, error_cb) => {
                warn!(error = %err, "statement rejected");
                error_cb(err);
            }
        }
    }

    /// Acquire a connection and hand a ready [`Transaction`] to `cb`; BEGIN
    /// has been dispatched before `cb` fires. Requests wait in FIFO order
    /// behind pending statements when no connection is idle.
    pub fn new_transaction_async<F>(self: &Arc<Self>, cb: F)
    where
        F: FnOnce(Result<Transaction>) + Send + 'static,
    {
        let cb: TransactionCallback = Box::new(cb);
        let submit = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                TransSubmit::Reject(Error::PoolClosed, cb)
            } else if let Some(conn) = inner.checkout_idle() {
                TransSubmit::Begin(conn, cb)
            } else {
                inner.pending_trans.push_back(cb);
                TransSubmit::Queued {
                    spawn_new: inner.all.len() < self.max_size,
                }
            }
        };
        match submit {
            TransSubmit::Begin(conn, cb) => self.begin_transaction(&conn, cb),
            TransSubmit::Queued { spawn_new } => {
                if spawn_new {
                    self.spawn_connection();
                }
            }
            TransSubmit::Reject(err, cb) => cb(Err(err)),
        }
    }

    /// Terminate the pool: every pending statement and transaction request
    /// fails with [`Error::PoolClosed`], in-flight statements complete with
    /// the same error, and all connections are released.
    pub fn close_all(self: &Arc<Self>) {
        let (conns, sqls, trans) = {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            inner.idle.clear();
            inner.busy.clear();
            let conns: Vec<_> = inner.all.drain().map(|(_, conn)| conn).collect();
            (
                conns,
                std::mem::take(&mut inner.pending_sql),
                std::mem::take(&mut inner.pending_trans),
            )
        };
        debug!(
            connections = conns.len(),
            pending_sql = sqls.len(),
            pending_trans = trans.len(),
            "closing pool"
        );
        for cmd in sqls {
            (cmd.error_cb)(Error::PoolClosed);
        }
        for cb in trans {
            cb(Err(Error::PoolClosed));
        }
        for conn in conns {
            conn.shutdown(Error::PoolClosed);
        }
    }

    // ─── Connection lifecycle ────────────────────────────────────────────

    fn spawn_connection(self: &Arc<Self>) {
        let conn = match Connection::new(self.reactor.clone(), Arc::clone(&self.info)) {
            Ok(conn) => conn,
            Err(err) => {
                error!(error = %err, "failed to allocate connection");
                return;
            }
        };

        let weak = Arc::downgrade(self);
        conn.set_closed_callback(Box::new(move |conn| {
            if let Some(pool) = weak.upgrade() {
                pool.on_connection_closed(conn);
            }
        }));

        let weak = Arc::downgrade(self);
        conn.set_connected_callback(Box::new(move |conn| {
            if let Some(pool) = weak.upgrade() {
                pool.on_connection_ready(conn);
            }
        }));

        let weak = Arc::downgrade(self);
        conn.set_complete_callback(Box::new(move |conn| {
            if let Some(pool) = weak.upgrade() {
                pool.handle_new_task(conn);
            }
        }));

        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed || inner.all.len() >= self.max_size {
                return;
            }
            inner.all.insert(conn.id(), Arc::clone(&conn));
        }
        debug!(id = conn.id(), "spawning connection");
        conn.connect();
    }

    fn on_connection_closed(&self, conn: &Arc<Connection>) {
        let mut inner = self.inner.lock().unwrap();
        inner.all.remove(&conn.id());
        inner.idle.remove(&conn.id());
        inner.busy.remove(&conn.id());
        debug!(id = conn.id(), remaining = inner.all.len(), "connection retired");
    }

    fn on_connection_ready(self: &Arc<Self>, conn: &Arc<Connection>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed || !inner.all.contains_key(&conn.id()) {
                return;
            }
            inner.busy.insert(conn.id(), Arc::clone(conn));
        }
        self.handle_new_task(conn);
    }

    /// A connection finished its statement (or just came up): hand it the
    /// next piece of work, retire it if the population is above `min_size`,
    /// or park it in the idle set. Pending statements drain before pending
    /// transaction requests.
    pub(crate) fn handle_new_task(self: &Arc<Self>, conn: &Arc<Connection>) {
        let next = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.all.contains_key(&conn.id()) {
                return;
            }
            if let Some(cmd) = inner.pending_sql.pop_front() {
                Next::Sql(cmd)
            } else if let Some(cb) = inner.pending_trans.pop_front() {
                Next::Trans(cb)
            } else if inner.all.len() > self.min_size {
                Next::Retire
            } else {
                inner.busy.remove(&conn.id());
                inner.idle.insert(conn.id(), Arc::clone(conn));
                Next::Idle
            }
        };
        match next {
            Next::Sql(cmd) => conn.execute(cmd.sql, cmd.result_cb, cmd.error_cb),
            Next::Trans(cb) => self.begin_transaction(conn, cb),
            Next::Retire => {
                debug!(id = conn.id(), "retiring surplus connection");
                conn.close();
            }
            Next::Idle => {}
        }
    }

    // ─── Transactions ────────────────────────────────────────────────────

    /// Bind `conn` exclusively to a new transaction. The release callback
    /// returns the connection to dispatch once the transaction is over; it
    /// tolerates the connection having been retired in the meantime.
    fn begin_transaction(self: &Arc<Self>, conn: &Arc<Connection>, cb: TransactionCallback) {
        let weak = Arc::downgrade(self);
        let release_conn = Arc::clone(conn);
        let release = Box::new(move || {
            let Some(pool) = weak.upgrade() else {
                return;
            };
            if release_conn.status() != ConnStatus::Ok {
                return;
            }
            {
                let inner = pool.inner.lock().unwrap();
                if !inner.all.contains_key(&release_conn.id()) {
                    return;
                }
            }
            let conn = Arc::clone(&release_conn);
            let reactor = pool.reactor.clone();
            reactor.post(move || {
                let weak = Arc::downgrade(&pool);
                conn.set_complete_callback(Box::new(move |conn| {
                    if let Some(pool) = weak.upgrade() {
                        pool.handle_new_task(conn);
                    }
                }));
                pool.handle_new_task(&conn);
            });
        });

        let transaction = Transaction::new(Arc::clone(conn), self.reactor.clone(), release);
        transaction.begin();
        self.reactor.post(move || cb(Ok(transaction)));
    }
}

impl PoolInner {
    fn checkout_idle(&mut self) -> Option<Arc<Connection>> {
        let id = self.idle.keys().next().copied()?;
        let conn = self.idle.remove(&id)?;
        self.busy.insert(id, Arc::clone(&conn));
        Some(conn)
    }
}
