use crate::conn::{self, ConnInner};
use crate::worker;
use hop::error::{HopError, Result};
use hop::logging::{self, Logger};
use hop::Msg;
use std::collections::VecDeque;
use std::mem;
use std::net::TcpListener;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

/// The capability set the worker pool dispatches into. Implementations
/// supply the actual key-value storage; every operation defaults to
/// "unsupported message", which is what an absent capability answers.
pub trait Hop: Send + Sync {
    fn create(&self, _key: &[u8], _flags: &[u8], _val: &[u8]) -> Result<u64> {
        Err(unsupported())
    }

    fn remove(&self, _key: &[u8]) -> Result<()> {
        Err(unsupported())
    }

    /// Returns the entry's version and value. `version` is either a
    /// linear version or one of the sentinels.
    fn get(&self, _key: &[u8], _version: u64) -> Result<(u64, Vec<u8>)> {
        Err(unsupported())
    }

    fn set(&self, _key: &[u8], _val: &[u8]) -> Result<u64> {
        Err(unsupported())
    }

    /// Compare-and-swap: installs `val` when `oldver`/`oldval` still
    /// match, returning the new version and value.
    fn testset(
        &self,
        _key: &[u8],
        _oldver: u64,
        _oldval: &[u8],
        _val: &[u8],
    ) -> Result<(u64, Vec<u8>)> {
        Err(unsupported())
    }

    /// Applies `op` and returns the new version plus the result values.
    fn atomic(&self, _key: &[u8], _op: hop::AtomicOp, _vals: &[&[u8]]) -> Result<(u64, Vec<Vec<u8>>)> {
        Err(unsupported())
    }
}

fn unsupported() -> HopError {
    HopError::new(libc::ENOSYS, "unsupported message")
}

pub struct ServerConfig {
    /// Worker threads processing requests.
    pub workers: usize,
    /// Trace every frame received and sent at debug level.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            workers: 4,
            debug: false,
        }
    }
}

/// A parsed inbound request on its way from a connection reader through
/// the worker pool and back to the connection writer. The connection
/// list owns the connection; requests only hold a weak handle.
pub(crate) struct SrvReq {
    pub(crate) conn: Weak<ConnInner>,
    pub(crate) tc: Msg,
}

pub(crate) struct SrvState {
    pub(crate) conns: Vec<Arc<ConnInner>>,
    pub(crate) queue: VecDeque<SrvReq>,
    pub(crate) in_progress: usize,
    pub(crate) shutdown: bool,
    pub(crate) next_conn_id: u64,
}

pub(crate) struct SrvInner {
    pub(crate) hop: Arc<dyn Hop>,
    pub(crate) state: Mutex<SrvState>,
    pub(crate) reqcond: Condvar,
    pub(crate) debug: bool,
    pub(crate) log: Logger,
}

/// Accepts connections and runs the worker pool over the supplied
/// capability set.
pub struct Server {
    inner: Arc<SrvInner>,
}

impl Server {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        hop: Arc<dyn Hop>,
        config: ServerConfig,
        log: L,
    ) -> Server {
        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => Logger::root(logging::Discard, logging::o!()),
        };

        let inner = Arc::new(SrvInner {
            hop,
            state: Mutex::new(SrvState {
                conns: Vec::new(),
                queue: VecDeque::new(),
                in_progress: 0,
                shutdown: false,
                next_conn_id: 0,
            }),
            reqcond: Condvar::new(),
            debug: config.debug,
            log,
        });

        for i in 0..config.workers.max(1) {
            worker::spawn(&inner, i);
        }

        Server { inner }
    }

    /// Accept loop. Returns when the listener fails; each accepted
    /// stream gets its own reader/writer pair.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        for stream in listener.incoming() {
            if self.inner.lock().shutdown {
                break;
            }
            let stream = stream?;
            conn::create(&self.inner, stream);
        }
        Ok(())
    }

    /// Stops the workers and tears down every connection. In-flight
    /// responses drain through the connection writers.
    pub fn shutdown(&self) {
        let (conns, dropped, in_progress) = {
            let mut state = self.inner.lock();
            state.shutdown = true;
            let dropped = state.queue.len();
            state.queue.clear();
            (mem::take(&mut state.conns), dropped, state.in_progress)
        };
        self.inner.reqcond.notify_all();

        for conn in conns {
            conn.close();
        }
        logging::info!(self.inner.log, "server shut down";
                       "dropped_requests" => dropped,
                       "in_progress" => in_progress);
    }
}

impl SrvInner {
    pub(crate) fn lock(&self) -> MutexGuard<SrvState> {
        self.state.lock().expect("server lock poisoned")
    }

    /// Queues a parsed request and wakes one worker.
    pub(crate) fn submit(&self, req: SrvReq) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        state.queue.push_back(req);
        drop(state);
        self.reqcond.notify_one();
    }

    pub(crate) fn add_conn(&self, conn: Arc<ConnInner>) {
        self.lock().conns.push(conn);
    }

    /// Unregisters a connection; true when it was still on the list.
    pub(crate) fn del_conn(&self, conn: &ConnInner) -> bool {
        let mut state = self.lock();
        let before = state.conns.len();
        state.conns.retain(|c| c.id != conn.id);
        state.conns.len() != before
    }
}
