//! Exclusive single-connection transaction scope.
//!
//! Statements submitted on one transaction run strictly in submission order
//! over the bound connection; while one is in flight the rest wait in a
//! serial buffer. A failing user statement triggers an automatic ROLLBACK,
//! which preempts anything still buffered. Dropping the transaction issues
//! COMMIT after all outstanding statements unless it already ended, and the
//! commit callback reports the final outcome either way.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::conn::{ConnStatus, Connection, ErrorCallback, ResultCallback};
use crate::error::Error;
use crate::reactor::ReactorHandle;
use crate::result::ResultSet;

pub(crate) type ReleaseCallback = Box<dyn FnOnce() + Send + 'static>;
pub type CommitCallback = Box<dyn FnOnce(bool) + Send + 'static>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum CmdKind {
    Statement,
    Rollback,
    Commit,
}

struct TxCmd {
    sql: String,
    kind: CmdKind,
    result_cb: Option<ResultCallback>,
    error_cb: Option<ErrorCallback>,
}

impl TxCmd {
    fn control(sql: &str, kind: CmdKind) -> Self {
        Self {
            sql: sql.to_string(),
            kind,
            result_cb: None,
            error_cb: None,
        }
    }
}

pub struct Transaction {
    shared: Arc<TxShared>,
}

struct TxShared {
    conn: Arc<Connection>,
    reactor: ReactorHandle,
    state: Mutex<TxState>,
}

struct TxState {
    buffer: VecDeque<TxCmd>,
    is_working: bool,
    finished: bool,
    commit_cb: Option<CommitCallback>,
    release_cb: Option<ReleaseCallback>,
}

impl Transaction {
    pub(crate) fn new(
        conn: Arc<Connection>,
        reactor: ReactorHandle,
        release_cb: ReleaseCallback,
    ) -> Self {
        Self {
            shared: Arc::new(TxShared {
                conn,
                reactor,
                state: Mutex::new(TxState {
                    buffer: VecDeque::new(),
                    is_working: false,
                    finished: false,
                    commit_cb: None,
                    release_cb: Some(release_cb),
                }),
            }),
        }
    }

    /// Dispatch BEGIN and rebind the connection's completion to this
    /// transaction's serial queue. Called by the pool before the transaction
    /// is handed to the requester.
    pub(crate) fn begin(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.reactor.post(move || {
            let weak = Arc::downgrade(&shared);
            shared.conn.set_complete_callback(Box::new(move |_conn| {
                if let Some(shared) = weak.upgrade() {
                    TxShared::drain(&shared);
                }
            }));
            shared.state.lock().unwrap().is_working = true;
            let begin_shared = Arc::clone(&shared);
            shared.conn.execute(
                "BEGIN".to_string(),
                Box::new(|_| {}),
                Box::new(move |_err| TxShared::finish(&begin_shared)),
            );
        });
    }

    /// Submit a statement inside the transaction. Statements execute in
    /// submission order; a statement that fails rolls the transaction back
    /// before its error callback is forwarded.
    pub fn execute<R, E>(&self, sql: &str, result_cb: R, error_cb: E)
    where
        R: FnMut(ResultSet) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        TxShared::submit(
            &self.shared,
            TxCmd {
                sql: sql.to_string(),
                kind: CmdKind::Statement,
                result_cb: Some(Box::new(result_cb)),
                error_cb: Some(Box::new(error_cb)),
            },
        );
    }

    /// Roll the transaction back. Preempts any statements still buffered;
    /// already-submitted statements that have not run yet fail with
    /// [`Error::TransactionFinished`].
    pub fn rollback(&self) {
        TxShared::rollback(&self.shared);
    }

    /// Install the callback receiving the transaction outcome: `true` after
    /// a successful COMMIT, `false` when the transaction rolled back or the
    /// COMMIT failed. Fires at most once.
    pub fn set_commit_callback<F>(&self, cb: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.shared.state.lock().unwrap().commit_cb = Some(Box::new(cb));
    }

    /// True once COMMIT or ROLLBACK has been acknowledged.
    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().unwrap().finished
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        enum Step {
            Report(Option<CommitCallback>, Option<ReleaseCallback>),
            Dispatch(TxCmd),
            Queued,
        }
        let shared = Arc::clone(&self.shared);
        let step = {
            let mut state = shared.state.lock().unwrap();
            if state.finished {
                // Ended by rollback or an earlier failure; the release side
                // is handled by whoever latched `finished` unless the
                // transaction is already fully idle.
                let release_cb = if state.is_working {
                    None
                } else {
                    state.release_cb.take()
                };
                Step::Report(state.commit_cb.take(), release_cb)
            } else {
                let cmd = TxCmd::control("COMMIT", CmdKind::Commit);
                if state.is_working {
                    // COMMIT runs after every outstanding user statement.
                    state.buffer.push_back(cmd);
                    Step::Queued
                } else {
                    state.is_working = true;
                    Step::Dispatch(cmd)
                }
            }
        };
        match step {
            Step::Report(commit_cb, release_cb) => {
                shared.reactor.post(move || {
                    if let Some(cb) = commit_cb {
                        cb(false);
                    }
                    if let Some(release) = release_cb {
                        release();
                    }
                });
            }
            Step::Dispatch(cmd) => {
                let dispatch_shared = Arc::clone(&shared);
                shared
                    .reactor
                    .post(move || TxShared::dispatch(&dispatch_shared, cmd));
            }
            Step::Queued => {}
        }
    }
}

impl TxShared {
    fn submit(shared: &Arc<Self>, cmd: TxCmd) {
        enum Step {
            Fail(Option<ErrorCallback>),
            Dispatch(TxCmd),
            Buffered,
        }
        let step = {
            let mut state = shared.state.lock().unwrap();
            if state.finished {
                Step::Fail(cmd.error_cb)
            } else if state.is_working {
                state.buffer.push_back(cmd);
                Step::Buffered
            } else {
                state.is_working = true;
                Step::Dispatch(cmd)
            }
        };
        match step {
            Step::Fail(Some(error_cb)) => error_cb(Error::TransactionFinished),
            Step::Fail(None) | Step::Buffered => {}
            Step::Dispatch(cmd) => Self::dispatch(shared, cmd),
        }
    }

    /// Hand one command to the connection with wrapped callbacks that keep
    /// the transaction bookkeeping in step with the statement outcome.
    fn dispatch(shared: &Arc<Self>, cmd: TxCmd) {
        let kind = cmd.kind;

        let mut user_result_cb = cmd.result_cb;
        let result_shared = Arc::clone(shared);
        let wrapped_result: ResultCallback = Box::new(move |result| {
            match kind {
                CmdKind::Statement => {}
                CmdKind::Rollback => {
                    result_shared.state.lock().unwrap().finished = true;
                }
                CmdKind::Commit => {
                    let commit_cb = {
                        let mut state = result_shared.state.lock().unwrap();
                        state.finished = true;
                        state.commit_cb.take()
                    };
                    if let Some(cb) = commit_cb {
                        cb(true);
                    }
                }
            }
            if let Some(cb) = user_result_cb.as_mut() {
                cb(result);
            }
        });

        let user_error_cb = cmd.error_cb;
        let error_shared = Arc::clone(shared);
        let wrapped_error: ErrorCallback = Box::new(move |err| {
            match kind {
                CmdKind::Statement => Self::rollback(&error_shared),
                CmdKind::Rollback => Self::finish(&error_shared),
                CmdKind::Commit => {
                    let commit_cb = {
                        let mut state = error_shared.state.lock().unwrap();
                        state.finished = true;
                        state.commit_cb.take()
                    };
                    if let Some(cb) = commit_cb {
                        cb(false);
                    }
                    Self::finish(&error_shared);
                }
            }
            if let Some(cb) = user_error_cb {
                cb(err);
            }
        });

        shared.conn.execute(cmd.sql, wrapped_result, wrapped_error);
    }

    /// Completion hook: run the next buffered command, or settle up once the
    /// transaction has ended.
    fn drain(shared: &Arc<Self>) {
        enum Step {
            Dispatch(TxCmd),
            Settle,
            Idle,
        }
        let step = {
            let mut state = shared.state.lock().unwrap();
            if state.finished {
                Step::Settle
            } else if let Some(cmd) = state.buffer.pop_front() {
                Step::Dispatch(cmd)
            } else {
                state.is_working = false;
                Step::Idle
            }
        };
        match step {
            Step::Dispatch(cmd) => Self::dispatch(shared, cmd),
            Step::Settle => Self::finish(shared),
            Step::Idle => {}
        }
    }

    fn rollback(shared: &Arc<Self>) {
        let task_shared = Arc::clone(shared);
        shared.reactor.post(move || {
            enum Step {
                Done,
                Dead,
                Dispatch(TxCmd),
            }
            let step = {
                let mut state = task_shared.state.lock().unwrap();
                if state.finished {
                    Step::Done
                } else if task_shared.conn.status() != ConnStatus::Ok {
                    // The session is gone and took the transaction with it;
                    // there is nothing left to send.
                    Step::Dead
                } else if state.is_working {
                    // ROLLBACK preempts every buffered user statement.
                    state
                        .buffer
                        .push_front(TxCmd::control("ROLLBACK", CmdKind::Rollback));
                    Step::Done
                } else {
                    state.is_working = true;
                    Step::Dispatch(TxCmd::control("ROLLBACK", CmdKind::Rollback))
                }
            };
            match step {
                Step::Done => {}
                Step::Dead => Self::finish(&task_shared),
                Step::Dispatch(cmd) => Self::dispatch(&task_shared, cmd),
            }
        });
    }

    /// Latch `finished`, fail whatever is still buffered, and give the
    /// connection back. Safe to call more than once; every side effect is
    /// taken out of the state exactly once.
    fn finish(shared: &Arc<Self>) {
        let (cmds, commit_cb, release_cb) = {
            let mut state = shared.state.lock().unwrap();
            state.finished = true;
            state.is_working = false;
            let cmds = std::mem::take(&mut state.buffer);
            let commit_cb = if cmds.iter().any(|cmd| cmd.kind == CmdKind::Commit) {
                state.commit_cb.take()
            } else {
                None
            };
            (cmds, commit_cb, state.release_cb.take())
        };
        for cmd in cmds {
            if cmd.kind == CmdKind::Statement {
                if let Some(error_cb) = cmd.error_cb {
                    error_cb(Error::TransactionFinished);
                }
            }
        }
        if let Some(cb) = commit_cb {
            cb(false);
        }
        if let Some(release) = release_cb {
            debug!(id = shared.conn.id(), "transaction released connection");
            release();
        }
    }
}
