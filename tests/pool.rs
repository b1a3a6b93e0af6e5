//! Integration tests for pool dispatch, queueing, and shutdown.
//!
//! These run against a live MariaDB/MySQL server; configure it with the
//! MYSQL_TEST_* environment variables (defaults: test:1234@127.0.0.1:3306/test).

use std::env;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use nonblock_mysql::error::Error;
use nonblock_mysql::{ConnectionInfo, Pool, Reactor, ResultSet};

const WAIT: Duration = Duration::from_secs(20);

fn test_info() -> ConnectionInfo {
    ConnectionInfo {
        user: env::var("MYSQL_TEST_USER").unwrap_or_else(|_| "test".to_string()),
        host: env::var("MYSQL_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("MYSQL_TEST_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(3306),
        password: env::var("MYSQL_TEST_PASSWORD").unwrap_or_else(|_| "1234".to_string()),
        database: env::var("MYSQL_TEST_DB").unwrap_or_else(|_| "test".to_string()),
        character_set: "utf8mb4".to_string(),
    }
}

struct TestPool {
    reactor: Reactor,
    pool: Arc<Pool>,
}

impl TestPool {
    fn new(min_size: usize, max_size: usize) -> Self {
        let reactor = Reactor::new().expect("reactor");
        let pool = Pool::new(reactor.handle(), test_info(), min_size, max_size);
        pool.init();
        Self { reactor, pool }
    }
}

impl Drop for TestPool {
    fn drop(&mut self) {
        self.pool.close_all();
        self.reactor.stop();
        self.reactor.join();
    }
}

fn exec(pool: &Arc<Pool>, sql: &str) -> Result<ResultSet, Error> {
    let (tx, rx) = mpsc::channel();
    let ok_tx = tx.clone();
    pool.execute(
        sql,
        move |result| {
            let _ = ok_tx.send(Ok(result));
        },
        move |err| {
            let _ = tx.send(Err(err));
        },
    );
    rx.recv_timeout(WAIT).expect("statement timed out")
}

#[test]
fn select_one_returns_a_materialized_row() {
    let harness = TestPool::new(2, 4);
    let result = exec(&harness.pool, "SELECT 1").expect("SELECT 1");
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.column_count(), 1);
    assert_eq!(result.value(0, 0), Some(&b"1"[..]));
    assert_eq!(result.insert_id(), 0);
}

#[test]
fn statements_race_for_idle_connections() {
    let harness = TestPool::new(2, 4);
    // Warm the pool so connect time does not skew the measurement.
    exec(&harness.pool, "SELECT 1").expect("warm-up");

    let (tx, rx) = mpsc::channel();
    let start = Instant::now();
    for _ in 0..10 {
        let ok_tx = tx.clone();
        let err_tx = tx.clone();
        harness.pool.execute(
            "SELECT SLEEP(1)",
            move |_| {
                let _ = ok_tx.send(Ok(()));
            },
            move |err| {
                let _ = err_tx.send(Err(err));
            },
        );
    }
    for _ in 0..10 {
        rx.recv_timeout(WAIT)
            .expect("sleep statement timed out")
            .expect("sleep statement failed");
    }
    let elapsed = start.elapsed();
    // 10 one-second sleeps over at most 4 connections: 3 batches.
    assert!(elapsed >= Duration::from_millis(2500), "finished too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(9), "not enough parallelism: {elapsed:?}");
}

#[test]
fn multi_result_statements_fire_once_per_result_set() {
    let harness = TestPool::new(1, 1);
    let (tx, rx) = mpsc::channel();
    let err_tx = tx.clone();
    harness.pool.execute(
        "SELECT 1; SELECT 2",
        move |result| {
            let _ = tx.send(Ok(result));
        },
        move |err| {
            let _ = err_tx.send(Err(err));
        },
    );
    let first = rx.recv_timeout(WAIT).expect("first result").expect("first result");
    let second = rx.recv_timeout(WAIT).expect("second result").expect("second result");
    assert_eq!(first.value(0, 0), Some(&b"1"[..]));
    assert_eq!(second.value(0, 0), Some(&b"2"[..]));
}

#[test]
fn overload_rejects_with_explicit_error() {
    let harness = TestPool::new(1, 1);
    harness.pool.set_pending_limit(2);
    exec(&harness.pool, "SELECT 1").expect("warm-up");

    // Occupy the only connection, then fill the pending queue. The queue
    // accepts entries until it has grown past the limit, so three fit.
    let (done_tx, done_rx) = mpsc::channel();
    let sleep_done = done_tx.clone();
    harness.pool.execute(
        "SELECT SLEEP(2)",
        move |_| {
            let _ = sleep_done.send(());
        },
        |_| {},
    );
    for _ in 0..3 {
        let queued_done = done_tx.clone();
        harness.pool.execute(
            "SELECT 1",
            move |_| {
                let _ = queued_done.send(());
            },
            |_| {},
        );
    }

    let (reject_tx, reject_rx) = mpsc::channel();
    harness.pool.execute(
        "SELECT 1",
        |_| {},
        move |err| {
            let _ = reject_tx.send(err);
        },
    );
    let err = reject_rx.recv_timeout(WAIT).expect("overload error");
    assert!(matches!(err, Error::PoolOverloaded), "got {err:?}");

    // The occupied connection and the three queued statements still finish.
    for _ in 0..4 {
        done_rx.recv_timeout(WAIT).expect("queued statement");
    }
}

#[test]
fn statement_error_retires_connection_and_pool_replaces_it() {
    let harness = TestPool::new(1, 1);
    exec(&harness.pool, "SELECT 1").expect("warm-up");

    let err = exec(&harness.pool, "THIS IS NOT SQL").expect_err("malformed statement");
    assert!(matches!(err, Error::QueryFailed { .. }), "got {err:?}");

    // The broken connection is gone; the next submission brings up a
    // replacement and succeeds.
    let result = exec(&harness.pool, "SELECT 1").expect("replacement connection");
    assert_eq!(result.value(0, 0), Some(&b"1"[..]));
}

#[test]
fn close_all_fails_pending_and_in_flight_work() {
    let harness = TestPool::new(1, 1);
    exec(&harness.pool, "SELECT 1").expect("warm-up");

    let (in_flight_tx, in_flight_rx) = mpsc::channel();
    harness.pool.execute(
        "SELECT SLEEP(5)",
        |_| {},
        move |err| {
            let _ = in_flight_tx.send(err);
        },
    );
    let (pending_tx, pending_rx) = mpsc::channel();
    harness.pool.execute(
        "SELECT 1",
        |_| {},
        move |err| {
            let _ = pending_tx.send(err);
        },
    );

    // Give the sleep a moment to be dispatched before tearing down.
    std::thread::sleep(Duration::from_millis(300));
    harness.pool.close_all();

    let err = in_flight_rx.recv_timeout(WAIT).expect("in-flight error");
    assert!(matches!(err, Error::PoolClosed), "got {err:?}");
    let err = pending_rx.recv_timeout(WAIT).expect("pending error");
    assert!(matches!(err, Error::PoolClosed), "got {err:?}");
}

#[test]
fn work_queued_before_connections_exist_is_drained() {
    let reactor = Reactor::new().expect("reactor");
    let pool = Pool::new(reactor.handle(), test_info(), 1, 2);
    // No init: the submission itself must bring a connection up.
    let result = exec(&pool, "SELECT 40 + 2").expect("cold-start statement");
    assert_eq!(result.value(0, 0), Some(&b"42"[..]));
    pool.close_all();
    reactor.stop();
    reactor.join();
}
