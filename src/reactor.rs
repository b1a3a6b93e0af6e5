//! Single-threaded cooperative execution context with socket-readiness waits.
//!
//! One [`Reactor`] owns one OS thread running a current-thread tokio runtime
//! inside a `LocalSet`. Everything a pool and its connections do happens on
//! that thread; other threads hand work over with [`ReactorHandle::post`] or
//! [`ReactorHandle::spawn`], and posted tasks run in submission order.

use std::os::fd::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::thread;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Stop,
}

pub struct Reactor {
    handle: ReactorHandle,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ReactorHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let thread = thread::Builder::new()
            .name("mysql-reactor".to_string())
            .spawn(move || {
                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, async move {
                    while let Some(message) = rx.recv().await {
                        match message {
                            Message::Run(task) => task(),
                            Message::Stop => break,
                        }
                    }
                });
                debug!("reactor thread exiting");
            })?;
        Ok(Self {
            handle: ReactorHandle { tx },
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Ask the reactor loop to exit. Tasks already queued before the stop
    /// message still run; suspended coroutines are dropped.
    pub fn stop(&self) {
        let _ = self.handle.tx.send(Message::Stop);
    }

    pub fn join(&self) {
        let joined = self.thread.lock().unwrap().take();
        if let Some(thread) = joined {
            let _ = thread.join();
        }
    }
}

impl ReactorHandle {
    /// Schedule a closure to run on the reactor thread. Silently dropped if
    /// the reactor has already stopped.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Message::Run(Box::new(task))).is_err() {
            debug!("task posted to a stopped reactor");
        }
    }

    /// Run a coroutine to completion on the reactor thread, detached.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.post(move || {
            tokio::task::spawn_local(future);
        });
    }
}

struct SocketFd(RawFd);

impl AsRawFd for SocketFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Readiness waiter for a socket the reactor does not own; the client library
/// keeps the fd open until its handle is closed.
pub(crate) struct SocketWatcher {
    fd: AsyncFd<SocketFd>,
}

impl SocketWatcher {
    /// Must be called on the reactor thread (registration needs the runtime).
    pub(crate) fn bind(fd: RawFd) -> std::io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::with_interest(SocketFd(fd), Interest::READABLE)?,
        })
    }

    /// Wait until the socket is readable, then clear the readiness flag.
    /// Clearing before the resume call is sound: the client library reads to
    /// EWOULDBLOCK before it suspends, so a stale flag cannot strand data.
    pub(crate) async fn readable(&self) -> std::io::Result<()> {
        let mut guard = self.fd.readable().await?;
        guard.clear_ready();
        Ok(())
    }
}
