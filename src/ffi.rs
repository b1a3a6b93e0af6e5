//! Low-level FFI bindings to the MariaDB client library's non-blocking API.
//!
//! These bindings are manually written to provide full control over the
//! interface. Only the functions the connection state machine actually
//! drives are declared here.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_uint, c_ulong, c_ulonglong, c_void};

/// Opaque MYSQL session handle.
#[repr(C)]
pub struct MYSQL {
    _private: [u8; 0],
}

/// Opaque MYSQL_RES result handle.
#[repr(C)]
pub struct MYSQL_RES {
    _private: [u8; 0],
}

pub type my_bool = c_char;
pub type my_socket = c_int;
pub type MYSQL_ROW = *mut *mut c_char;

/// Column metadata as laid out by the client library. Declared in full so
/// that indexing into the array returned by `mysql_fetch_fields` strides
/// correctly; only `name`/`name_length` are read.
#[repr(C)]
pub struct MYSQL_FIELD {
    pub name: *mut c_char,
    pub org_name: *mut c_char,
    pub table: *mut c_char,
    pub org_table: *mut c_char,
    pub db: *mut c_char,
    pub catalog: *mut c_char,
    pub def: *mut c_char,
    pub length: c_ulong,
    pub max_length: c_ulong,
    pub name_length: c_uint,
    pub org_name_length: c_uint,
    pub table_length: c_uint,
    pub org_table_length: c_uint,
    pub db_length: c_uint,
    pub catalog_length: c_uint,
    pub def_length: c_uint,
    pub flags: c_uint,
    pub decimals: c_uint,
    pub charsetnr: c_uint,
    pub field_type: c_int,
    pub extension: *mut c_void,
}

// Wait-status bit returned by the *_start/*_cont family. The state machine
// only ever waits on (and resumes with) READ; the library multiplexes writes
// internally.
pub const MYSQL_WAIT_READ: c_int = 1;

/// `mysql_options` selector that switches the handle into non-blocking mode.
pub const MYSQL_OPT_NONBLOCK: c_int = 6000;

// Client capability flags passed to mysql_real_connect_start.
pub const CLIENT_MULTI_STATEMENTS: c_ulong = 1 << 16;
pub const CLIENT_MULTI_RESULTS: c_ulong = 1 << 17;

#[link(name = "mariadb")]
unsafe extern "C" {
    // Session lifecycle
    pub fn mysql_init(mysql: *mut MYSQL) -> *mut MYSQL;
    pub fn mysql_options(mysql: *mut MYSQL, option: c_int, arg: *const c_void) -> c_int;
    pub fn mysql_close(mysql: *mut MYSQL);
    pub fn mysql_errno(mysql: *mut MYSQL) -> c_uint;
    pub fn mysql_error(mysql: *mut MYSQL) -> *const c_char;
    pub fn mysql_get_socket(mysql: *const MYSQL) -> my_socket;

    // Non-blocking connect + charset
    pub fn mysql_real_connect_start(
        ret: *mut *mut MYSQL,
        mysql: *mut MYSQL,
        host: *const c_char,
        user: *const c_char,
        passwd: *const c_char,
        db: *const c_char,
        port: c_uint,
        unix_socket: *const c_char,
        client_flags: c_ulong,
    ) -> c_int;
    pub fn mysql_real_connect_cont(
        ret: *mut *mut MYSQL,
        mysql: *mut MYSQL,
        ready_status: c_int,
    ) -> c_int;
    pub fn mysql_set_character_set_start(
        ret: *mut c_int,
        mysql: *mut MYSQL,
        csname: *const c_char,
    ) -> c_int;
    pub fn mysql_set_character_set_cont(
        ret: *mut c_int,
        mysql: *mut MYSQL,
        ready_status: c_int,
    ) -> c_int;

    // Non-blocking statement execution
    pub fn mysql_real_query_start(
        ret: *mut c_int,
        mysql: *mut MYSQL,
        stmt_str: *const c_char,
        length: c_ulong,
    ) -> c_int;
    pub fn mysql_real_query_cont(ret: *mut c_int, mysql: *mut MYSQL, ready_status: c_int) -> c_int;
    pub fn mysql_store_result_start(ret: *mut *mut MYSQL_RES, mysql: *mut MYSQL) -> c_int;
    pub fn mysql_store_result_cont(
        ret: *mut *mut MYSQL_RES,
        mysql: *mut MYSQL,
        ready_status: c_int,
    ) -> c_int;
    pub fn mysql_next_result_start(ret: *mut c_int, mysql: *mut MYSQL) -> c_int;
    pub fn mysql_next_result_cont(ret: *mut c_int, mysql: *mut MYSQL, ready_status: c_int) -> c_int;
    pub fn mysql_more_results(mysql: *mut MYSQL) -> my_bool;

    // Result access
    pub fn mysql_free_result(result: *mut MYSQL_RES);
    pub fn mysql_num_rows(result: *mut MYSQL_RES) -> c_ulonglong;
    pub fn mysql_num_fields(result: *mut MYSQL_RES) -> c_uint;
    pub fn mysql_fetch_fields(result: *mut MYSQL_RES) -> *mut MYSQL_FIELD;
    pub fn mysql_fetch_row(result: *mut MYSQL_RES) -> MYSQL_ROW;
    pub fn mysql_fetch_lengths(result: *mut MYSQL_RES) -> *mut c_ulong;
    pub fn mysql_affected_rows(mysql: *mut MYSQL) -> c_ulonglong;
    pub fn mysql_insert_id(mysql: *mut MYSQL) -> c_ulonglong;
}
