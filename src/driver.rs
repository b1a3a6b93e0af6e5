//! Safe wrapper over one `MYSQL*` handle in non-blocking mode.
//!
//! Every suspendable protocol operation comes as a start/cont pair that
//! returns the library's wait-status bitmask: non-zero means "waiting on the
//! socket", zero means the operation finished and its out-value is valid.
//! The connection state machine drives these pairs against socket readiness.

use std::ffi::{CStr, CString, c_int, c_uint, c_ulong};
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};

use bytes::Bytes;

use crate::error::{Error, Result, eyre};
use crate::ffi;
use crate::info::ConnectionInfo;

pub(crate) type WaitStatus = c_int;

/// Owned MYSQL session handle with `MYSQL_OPT_NONBLOCK` enabled.
///
/// The handle is shared across threads inside an `Arc<Connection>`, but every
/// protocol call happens on the owning reactor's thread; the only cross-thread
/// access is the final `mysql_close` when the last reference drops.
pub(crate) struct MysqlHandle {
    ptr: NonNull<ffi::MYSQL>,
}

// Invariant: protocol calls are reactor-thread-confined (see above).
unsafe impl Send for MysqlHandle {}
unsafe impl Sync for MysqlHandle {}

/// NUL-terminated connect arguments, kept alive for the whole connect phase.
pub(crate) struct ConnectParams {
    host: CString,
    user: CString,
    password: CString,
    database: CString,
    port: u16,
    flags: c_ulong,
}

impl ConnectParams {
    pub(crate) fn new(info: &ConnectionInfo) -> Result<Self> {
        let cstring = |field: &str, value: &str| {
            CString::new(value).map_err(|_| Error::ConnectFailed {
                message: format!("interior NUL byte in {field}"),
            })
        };
        Ok(Self {
            host: cstring("host", &info.host)?,
            user: cstring("user", &info.user)?,
            password: cstring("password", &info.password)?,
            database: cstring("database", &info.database)?,
            port: info.port,
            flags: ffi::CLIENT_MULTI_STATEMENTS | ffi::CLIENT_MULTI_RESULTS,
        })
    }
}

impl MysqlHandle {
    pub(crate) fn new() -> Result<Self> {
        let raw = unsafe { ffi::mysql_init(ptr::null_mut()) };
        let handle = NonNull::new(raw)
            .ok_or_else(|| Error::LibraryBug(eyre!("mysql_init returned a null handle")))?;
        let rc =
            unsafe { ffi::mysql_options(handle.as_ptr(), ffi::MYSQL_OPT_NONBLOCK, ptr::null()) };
        if rc != 0 {
            unsafe { ffi::mysql_close(handle.as_ptr()) };
            return Err(Error::LibraryBug(eyre!(
                "MYSQL_OPT_NONBLOCK rejected by client library (rc {rc})"
            )));
        }
        Ok(Self { ptr: handle })
    }

    fn raw(&self) -> *mut ffi::MYSQL {
        self.ptr.as_ptr()
    }

    // ─── Connect phase ───────────────────────────────────────────────────

    /// Returns the wait status and, once it reaches zero, whether the
    /// connection was established.
    pub(crate) fn connect_start(&self, params: &ConnectParams) -> (WaitStatus, bool) {
        let mut ret: *mut ffi::MYSQL = ptr::null_mut();
        let status = unsafe {
            ffi::mysql_real_connect_start(
                &mut ret,
                self.raw(),
                params.host.as_ptr(),
                params.user.as_ptr(),
                params.password.as_ptr(),
                params.database.as_ptr(),
                params.port as c_uint,
                ptr::null(),
                params.flags,
            )
        };
        (status, !ret.is_null())
    }

    pub(crate) fn connect_cont(&self) -> (WaitStatus, bool) {
        let mut ret: *mut ffi::MYSQL = ptr::null_mut();
        let status =
            unsafe { ffi::mysql_real_connect_cont(&mut ret, self.raw(), ffi::MYSQL_WAIT_READ) };
        (status, !ret.is_null())
    }

    pub(crate) fn charset_start(&self, name: &CStr) -> (WaitStatus, c_int) {
        let mut err: c_int = 0;
        let status =
            unsafe { ffi::mysql_set_character_set_start(&mut err, self.raw(), name.as_ptr()) };
        (status, err)
    }

    pub(crate) fn charset_cont(&self) -> (WaitStatus, c_int) {
        let mut err: c_int = 0;
        let status =
            unsafe { ffi::mysql_set_character_set_cont(&mut err, self.raw(), ffi::MYSQL_WAIT_READ) };
        (status, err)
    }

    // ─── Execute phase ───────────────────────────────────────────────────

    /// `sql` must stay alive until the query phase completes; the caller owns
    /// the statement text for the duration of the whole execute.
    pub(crate) fn query_start(&self, sql: &[u8]) -> (WaitStatus, c_int) {
        let mut err: c_int = 0;
        let status = unsafe {
            ffi::mysql_real_query_start(
                &mut err,
                self.raw(),
                sql.as_ptr().cast(),
                sql.len() as c_ulong,
            )
        };
        (status, err)
    }

    pub(crate) fn query_cont(&self) -> (WaitStatus, c_int) {
        let mut err: c_int = 0;
        let status = unsafe { ffi::mysql_real_query_cont(&mut err, self.raw(), ffi::MYSQL_WAIT_READ) };
        (status, err)
    }

    pub(crate) fn store_result_start(&self) -> (WaitStatus, ResPtr) {
        let mut res: *mut ffi::MYSQL_RES = ptr::null_mut();
        let status = unsafe { ffi::mysql_store_result_start(&mut res, self.raw()) };
        (status, ResPtr(res))
    }

    pub(crate) fn store_result_cont(&self) -> (WaitStatus, ResPtr) {
        let mut res: *mut ffi::MYSQL_RES = ptr::null_mut();
        let status =
            unsafe { ffi::mysql_store_result_cont(&mut res, self.raw(), ffi::MYSQL_WAIT_READ) };
        (status, ResPtr(res))
    }

    pub(crate) fn next_result_start(&self) -> (WaitStatus, c_int) {
        let mut err: c_int = 0;
        let status = unsafe { ffi::mysql_next_result_start(&mut err, self.raw()) };
        (status, err)
    }

    pub(crate) fn next_result_cont(&self) -> (WaitStatus, c_int) {
        let mut err: c_int = 0;
        let status =
            unsafe { ffi::mysql_next_result_cont(&mut err, self.raw(), ffi::MYSQL_WAIT_READ) };
        (status, err)
    }

    pub(crate) fn more_results(&self) -> bool {
        unsafe { ffi::mysql_more_results(self.raw()) != 0 }
    }

    // ─── Session accessors ───────────────────────────────────────────────

    pub(crate) fn errno(&self) -> u32 {
        unsafe { ffi::mysql_errno(self.raw()) }
    }

    pub(crate) fn error_message(&self) -> String {
        let msg = unsafe { ffi::mysql_error(self.raw()) };
        if msg.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }

    pub(crate) fn socket_fd(&self) -> RawFd {
        unsafe { ffi::mysql_get_socket(self.raw()) }
    }

    pub(crate) fn affected_rows(&self) -> u64 {
        unsafe { ffi::mysql_affected_rows(self.raw()) }
    }

    pub(crate) fn insert_id(&self) -> u64 {
        unsafe { ffi::mysql_insert_id(self.raw()) }
    }
}

impl Drop for MysqlHandle {
    fn drop(&mut self) {
        unsafe { ffi::mysql_close(self.raw()) };
    }
}

/// Result-handle pointer that crosses suspension points inside the
/// store-result wait loop; only the reactor thread dereferences it.
#[derive(Clone, Copy)]
pub(crate) struct ResPtr(*mut ffi::MYSQL_RES);

unsafe impl Send for ResPtr {}

/// Owned `MYSQL_RES` handle, freed on drop. A null pointer is valid and
/// represents a statement that produced no result set (INSERT/UPDATE/...).
pub(crate) struct RawResult {
    ptr: *mut ffi::MYSQL_RES,
}

impl RawResult {
    pub(crate) fn new(res: ResPtr) -> Self {
        Self { ptr: res.0 }
    }

    pub(crate) fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    pub(crate) fn num_rows(&self) -> u64 {
        if self.ptr.is_null() {
            return 0;
        }
        unsafe { ffi::mysql_num_rows(self.ptr) }
    }

    /// Column names in server order, original case preserved.
    pub(crate) fn column_names(&self) -> Vec<String> {
        if self.ptr.is_null() {
            return Vec::new();
        }
        unsafe {
            let count = ffi::mysql_num_fields(self.ptr) as usize;
            let fields = ffi::mysql_fetch_fields(self.ptr);
            if fields.is_null() {
                return Vec::new();
            }
            (0..count)
                .map(|i| {
                    let field = &*fields.add(i);
                    let bytes =
                        std::slice::from_raw_parts(field.name.cast(), field.name_length as usize);
                    match simdutf8::basic::from_utf8(bytes) {
                        Ok(name) => name.to_owned(),
                        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
                    }
                })
                .collect()
        }
    }

    /// Copies the next row out of the result handle, pairing each cell with
    /// its reported length. `None` cell means SQL NULL.
    pub(crate) fn fetch_row(&self) -> Option<Vec<Option<Bytes>>> {
        if self.ptr.is_null() {
            return None;
        }
        unsafe {
            let row = ffi::mysql_fetch_row(self.ptr);
            if row.is_null() {
                return None;
            }
            let lengths = ffi::mysql_fetch_lengths(self.ptr);
            let count = ffi::mysql_num_fields(self.ptr) as usize;
            let mut cells = Vec::with_capacity(count);
            for i in 0..count {
                let cell = *row.add(i);
                if cell.is_null() {
                    cells.push(None);
                } else {
                    let len = *lengths.add(i) as usize;
                    let bytes = std::slice::from_raw_parts(cell.cast::<u8>(), len);
                    cells.push(Some(Bytes::copy_from_slice(bytes)));
                }
            }
            Some(cells)
        }
    }
}

impl Drop for RawResult {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ffi::mysql_free_result(self.ptr) };
        }
    }
}
