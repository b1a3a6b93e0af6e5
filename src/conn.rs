//! One MySQL session driven by the non-blocking protocol state machine.
//!
//! A `Connection` suspends only on socket readiness: every `*_start` call
//! that reports "waiting" loops through the reactor's readiness wait and the
//! matching `*_cont` until the operation completes. All protocol activity and
//! every callback happens on the reactor thread; submitters on other threads
//! reach the machine by posting through the [`ReactorHandle`].

use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument, warn};

use crate::driver::{ConnectParams, MysqlHandle, RawResult};
use crate::error::{Error, eyre};
use crate::info::ConnectionInfo;
use crate::reactor::{ReactorHandle, SocketWatcher};
use crate::result::ResultSet;

/// Fires once per produced result set (a multi-result statement produces
/// several before completing).
pub type ResultCallback = Box<dyn FnMut(ResultSet) + Send + 'static>;
/// Fires exactly once when a submission fails; never together with results
/// for the same submission.
pub type ErrorCallback = Box<dyn FnOnce(Error) + Send + 'static>;
pub(crate) type CompleteCallback = Box<dyn FnMut(&Arc<Connection>) + Send + 'static>;
pub(crate) type LifecycleCallback = Box<dyn FnMut(&Arc<Connection>) + Send + 'static>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnStatus {
    None,
    Connecting,
    SettingCharacterSet,
    Ok,
    Bad,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ExecStatus {
    None,
    RealQuery,
    StoreResult,
    NextResult,
}

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub struct Connection {
    id: u64,
    info: Arc<ConnectionInfo>,
    reactor: ReactorHandle,
    driver: MysqlHandle,
    state: Mutex<ConnState>,
}

struct ConnState {
    conn_status: ConnStatus,
    exec_status: ExecStatus,
    is_working: bool,
    active_sql: String,
    watcher: Option<Arc<SocketWatcher>>,
    result_cb: Option<ResultCallback>,
    error_cb: Option<ErrorCallback>,
    complete_cb: Option<CompleteCallback>,
    connected_cb: Option<LifecycleCallback>,
    closed_cb: Option<LifecycleCallback>,
}

impl Connection {
    pub(crate) fn new(
        reactor: ReactorHandle,
        info: Arc<ConnectionInfo>,
    ) -> crate::error::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            info,
            reactor,
            driver: MysqlHandle::new()?,
            state: Mutex::new(ConnState {
                conn_status: ConnStatus::None,
                exec_status: ExecStatus::None,
                is_working: false,
                active_sql: String::new(),
                watcher: None,
                result_cb: None,
                error_cb: None,
                complete_cb: None,
                connected_cb: None,
                closed_cb: None,
            }),
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> ConnStatus {
        self.state.lock().unwrap().conn_status
    }

    pub fn is_working(&self) -> bool {
        self.state.lock().unwrap().is_working
    }

    pub(crate) fn set_connected_callback(&self, cb: LifecycleCallback) {
        self.state.lock().unwrap().connected_cb = Some(cb);
    }

    pub(crate) fn set_closed_callback(&self, cb: LifecycleCallback) {
        self.state.lock().unwrap().closed_cb = Some(cb);
    }

    pub(crate) fn set_complete_callback(&self, cb: CompleteCallback) {
        self.state.lock().unwrap().complete_cb = Some(cb);
    }

    /// Start the non-blocking connect. Effective only from `None`; repeat
    /// calls are ignored.
    pub(crate) fn connect(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.conn_status != ConnStatus::None {
                return;
            }
            state.conn_status = ConnStatus::Connecting;
        }
        let conn = Arc::clone(self);
        self.reactor.spawn(async move { conn.drive_connect().await });
    }

    /// Submit one statement. Requires an established, idle session; exactly
    /// one of `result_cb` (at least once) or `error_cb` (once) fires, and the
    /// completion callback fires after the final result on success.
    pub(crate) fn execute(
        self: &Arc<Self>,
        sql: String,
        result_cb: ResultCallback,
        error_cb: ErrorCallback,
    ) {
        {
            let mut state = self.state.lock().unwrap();
            if state.conn_status != ConnStatus::Ok {
                drop(state);
                self.reactor.post(move || {
                    error_cb(Error::ConnectionLost {
                        message: "connection is not ready".to_string(),
                    });
                });
                return;
            }
            if state.is_working {
                drop(state);
                self.reactor.post(move || {
                    error_cb(Error::BadUsageError(
                        "statement submitted while another is in flight".to_string(),
                    ));
                });
                return;
            }
            state.is_working = true;
            state.active_sql = sql;
            state.result_cb = Some(result_cb);
            state.error_cb = Some(error_cb);
        }
        let conn = Arc::clone(self);
        self.reactor.spawn(async move { conn.drive_execute().await });
    }

    /// Retire the session: mark it bad and tell the owner.
    pub(crate) fn close(self: &Arc<Self>) {
        self.state.lock().unwrap().conn_status = ConnStatus::Bad;
        self.fire_closed();
    }

    /// Pool-shutdown path: fail any in-flight statement with `error` and
    /// sever every callback so late completions become no-ops.
    pub(crate) fn shutdown(self: &Arc<Self>, error: Error) {
        let (error_cb, was_working) = {
            let mut state = self.state.lock().unwrap();
            let was_working = state.is_working;
            state.is_working = false;
            state.conn_status = ConnStatus::Bad;
            state.exec_status = ExecStatus::None;
            state.active_sql.clear();
            state.result_cb = None;
            state.complete_cb = None;
            state.connected_cb = None;
            state.closed_cb = None;
            (state.error_cb.take(), was_working)
        };
        if was_working {
            if let Some(cb) = error_cb {
                cb(error);
            }
        }
    }

    // ─── Protocol state machine ──────────────────────────────────────────

    #[instrument(skip_all, fields(id = self.id))]
    async fn drive_connect(self: Arc<Self>) {
        let params = match ConnectParams::new(&self.info) {
            Ok(params) => params,
            Err(error) => return self.fail_with(error),
        };
        let (mut status, mut connected) = self.driver.connect_start(&params);
        let fd = self.driver.socket_fd();
        if fd < 0 {
            return self.handle_error();
        }
        let watcher = match SocketWatcher::bind(fd) {
            Ok(watcher) => Arc::new(watcher),
            Err(error) => return self.fail_with(Error::IoError(error)),
        };
        self.state.lock().unwrap().watcher = Some(Arc::clone(&watcher));
        while status != 0 {
            if watcher.readable().await.is_err() {
                return self.handle_error();
            }
            (status, connected) = self.driver.connect_cont();
        }
        if !connected {
            return self.handle_error();
        }

        if !self.info.character_set.is_empty() {
            self.state.lock().unwrap().conn_status = ConnStatus::SettingCharacterSet;
            let name = match CString::new(self.info.character_set.as_str()) {
                Ok(name) => name,
                Err(_) => {
                    return self.fail_with(Error::ConnectFailed {
                        message: "interior NUL byte in character_set".to_string(),
                    });
                }
            };
            let (mut status, mut err) = self.driver.charset_start(&name);
            while status != 0 {
                if watcher.readable().await.is_err() {
                    return self.handle_error();
                }
                (status, err) = self.driver.charset_cont();
            }
            if err != 0 {
                return self.handle_error();
            }
        }

        self.state.lock().unwrap().conn_status = ConnStatus::Ok;
        debug!(id = self.id, "connected");
        self.fire_connected();
    }

    #[instrument(skip_all, fields(id = self.id))]
    async fn drive_execute(self: Arc<Self>) {
        let (sql, watcher) = {
            let state = self.state.lock().unwrap();
            (state.active_sql.clone(), state.watcher.clone())
        };
        let Some(watcher) = watcher else {
            return self.fail_with(Error::LibraryBug(eyre!(
                "statement dispatched before connect bound the socket"
            )));
        };

        self.set_exec_status(ExecStatus::RealQuery);
        let (mut status, mut err) = self.driver.query_start(sql.as_bytes());
        while status != 0 {
            if watcher.readable().await.is_err() {
                return self.handle_error();
            }
            (status, err) = self.driver.query_cont();
        }
        if err != 0 {
            return self.handle_error();
        }

        loop {
            self.set_exec_status(ExecStatus::StoreResult);
            let (mut status, mut res) = self.driver.store_result_start();
            while status != 0 {
                if watcher.readable().await.is_err() {
                    return self.handle_error();
                }
                (status, res) = self.driver.store_result_cont();
            }
            let result = {
                let raw = RawResult::new(res);
                if raw.is_null() && self.driver.errno() != 0 {
                    return self.handle_error();
                }
                ResultSet::from_raw(&raw, self.driver.affected_rows(), self.driver.insert_id())
            };
            self.fire_result(result);

            if !self.driver.more_results() {
                let complete = {
                    let mut state = self.state.lock().unwrap();
                    state.result_cb = None;
                    state.error_cb = None;
                    state.is_working = false;
                    state.exec_status = ExecStatus::None;
                    state.active_sql.clear();
                    state.complete_cb.take()
                };
                if let Some(mut cb) = complete {
                    cb(&self);
                    let mut state = self.state.lock().unwrap();
                    if state.complete_cb.is_none() {
                        state.complete_cb = Some(cb);
                    }
                }
                return;
            }

            self.set_exec_status(ExecStatus::NextResult);
            let (mut status, mut err) = self.driver.next_result_start();
            while status != 0 {
                if watcher.readable().await.is_err() {
                    return self.handle_error();
                }
                (status, err) = self.driver.next_result_cont();
            }
            if err != 0 {
                return self.handle_error();
            }
        }
    }

    // ─── Failure path ────────────────────────────────────────────────────

    /// Build the error the driver is currently reporting and retire the
    /// session through [`Connection::fail_with`].
    fn handle_error(self: &Arc<Self>) {
        let message = self.driver.error_message();
        let errno = self.driver.errno();
        let phase = self.state.lock().unwrap().conn_status;
        let error = match phase {
            ConnStatus::None | ConnStatus::Connecting | ConnStatus::SettingCharacterSet => {
                Error::ConnectFailed { message }
            }
            ConnStatus::Ok | ConnStatus::Bad => Error::from_driver(errno, message),
        };
        self.fail_with(error);
    }

    fn fail_with(self: &Arc<Self>, error: Error) {
        let (error_cb, was_working, exec_phase) = {
            let mut state = self.state.lock().unwrap();
            if state.conn_status == ConnStatus::Bad {
                return;
            }
            state.conn_status = ConnStatus::Bad;
            let exec_phase = state.exec_status;
            state.exec_status = ExecStatus::None;
            let was_working = state.is_working;
            state.is_working = false;
            state.active_sql.clear();
            state.result_cb = None;
            (state.error_cb.take(), was_working, exec_phase)
        };
        warn!(id = self.id, error = %error, phase = ?exec_phase, "connection error");
        if was_working {
            if let Some(cb) = error_cb {
                cb(error);
            }
        }
        self.fire_closed();
    }

    // ─── Callback plumbing ───────────────────────────────────────────────
    // Persistent callbacks are taken out of the state, invoked with no lock
    // held, and put back unless the callee installed a replacement.

    fn set_exec_status(&self, exec_status: ExecStatus) {
        self.state.lock().unwrap().exec_status = exec_status;
    }

    fn fire_result(&self, result: ResultSet) {
        let taken = self.state.lock().unwrap().result_cb.take();
        if let Some(mut cb) = taken {
            cb(result);
            let mut state = self.state.lock().unwrap();
            if state.result_cb.is_none() {
                state.result_cb = Some(cb);
            }
        }
    }

    fn fire_connected(self: &Arc<Self>) {
        let taken = self.state.lock().unwrap().connected_cb.take();
        if let Some(mut cb) = taken {
            cb(self);
            let mut state = self.state.lock().unwrap();
            if state.connected_cb.is_none() {
                state.connected_cb = Some(cb);
            }
        }
    }

    fn fire_closed(self: &Arc<Self>) {
        let taken = self.state.lock().unwrap().closed_cb.take();
        if let Some(mut cb) = taken {
            cb(self);
            let mut state = self.state.lock().unwrap();
            if state.closed_cb.is_none() {
                state.closed_cb = Some(cb);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!(id = self.id, "connection dropped");
    }
}
