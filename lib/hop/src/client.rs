use crate::buffer::{FrameBuffer, DEFAULT_CAPACITY};
use crate::error::{HopError, Result};
use crate::logging::{self, Logger};
use crate::msg::Msg;
use crate::tagpool::TagPool;
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::io::Write;
use std::mem;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Completion callback of a non-blocking RPC. Fires exactly once, with
/// the matched response or with the error that took the connection
/// down.
pub type Callback = Box<dyn FnOnce(Result<Msg>) + Send + 'static>;

pub struct ClientConfig {
    /// Largest request tag; bounds the number of in-flight requests.
    pub max_tags: u16,
    /// How long `rpc` waits for a response. `None` waits indefinitely.
    pub rpc_timeout: Option<Duration>,
    /// Trace every frame sent and received at debug level.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            max_tags: 255,
            rpc_timeout: None,
            debug: false,
        }
    }
}

struct UnsentReq {
    tag: u16,
    tc: Msg,
    cb: Callback,
}

struct ClntState {
    connected: bool,
    unsent: VecDeque<UnsentReq>,
    pending: HashMap<u16, Callback>,
}

struct ClntInner {
    stream: TcpStream,
    state: Mutex<ClntState>,
    cond: Condvar,
    tags: TagPool,
    rpc_timeout: Option<Duration>,
    debug: bool,
    log: Logger,
}

/// One Hop connection: a TCP stream plus the reader and writer threads
/// that pipeline requests over it. Requests are correlated with
/// responses purely by tag, so responses may complete in any order.
///
/// Connection failures are terminal. Every queued and pending request
/// fails with `EPIPE "closed"` and later submissions are refused; the
/// caller reconnects with a fresh client. An `Rerror` response is a
/// completed RPC like any other and is returned, not converted into an
/// `Err`.
pub struct Client {
    inner: Arc<ClntInner>,
    rthread: Option<thread::JoinHandle<()>>,
    wthread: Option<thread::JoinHandle<()>>,
}

impl Client {
    /// Connects to `addr:port` with default configuration and no
    /// logging.
    pub fn connect(addr: &str, port: u16) -> Result<Client> {
        Client::connect_with(addr, port, ClientConfig::default(), None)
    }

    pub fn connect_with<'a, L: Into<Option<&'a Logger>>>(
        addr: &str,
        port: u16,
        config: ClientConfig,
        log: L,
    ) -> Result<Client> {
        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => Logger::root(logging::Discard, logging::o!()),
        };

        let stream = TcpStream::connect((addr, port))?;

        let inner = Arc::new(ClntInner {
            stream,
            state: Mutex::new(ClntState {
                connected: true,
                unsent: VecDeque::new(),
                pending: HashMap::new(),
            }),
            cond: Condvar::new(),
            tags: TagPool::new(config.max_tags),
            rpc_timeout: config.rpc_timeout,
            debug: config.debug,
            log,
        });

        let r = Arc::clone(&inner);
        let rthread = thread::spawn(move || read_proc(&r));
        let w = Arc::clone(&inner);
        let wthread = thread::spawn(move || write_proc(&w));

        Ok(Client {
            inner,
            rthread: Some(rthread),
            wthread: Some(wthread),
        })
    }

    /// Submits `tc` and blocks until the matching response arrives or
    /// the connection fails.
    pub fn rpc(&self, tc: Msg) -> Result<Msg> {
        let slot = Arc::new((Mutex::new(None), Condvar::new()));
        let done = Arc::clone(&slot);
        self.inner.rpc_nb(
            tc,
            Box::new(move |res| {
                let (lock, cond) = &*done;
                *lock.lock().expect("rpc slot poisoned") = Some(res);
                cond.notify_one();
            }),
        )?;

        let (lock, cond) = &*slot;
        let mut result = lock.lock().expect("rpc slot poisoned");
        match self.inner.rpc_timeout {
            None => {
                while result.is_none() {
                    result = cond.wait(result).expect("rpc slot poisoned");
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while result.is_none() {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(HopError::new(libc::ETIMEDOUT, "rpc timed out"));
                    }
                    let (guard, _) = cond
                        .wait_timeout(result, deadline - now)
                        .expect("rpc slot poisoned");
                    result = guard;
                }
            }
        }

        result.take().expect("rpc completion recorded")
    }

    /// Submits `tc` without waiting. Ownership of the message transfers
    /// to the client until `cb` fires. Blocks only while acquiring a
    /// tag when the pool is saturated.
    pub fn rpc_nb<F>(&self, tc: Msg, cb: F) -> Result<()>
    where
        F: FnOnce(Result<Msg>) + Send + 'static,
    {
        self.inner.rpc_nb(tc, Box::new(cb))
    }

    /// Shuts the connection down, wakes both workers and joins them.
    /// Safe to call more than once; dropping the client disconnects.
    pub fn disconnect(&mut self) {
        {
            let mut state = self.inner.lock();
            if state.connected {
                state.connected = false;
                let _ = self.inner.stream.shutdown(Shutdown::Both);
            }
        }
        self.inner.cond.notify_all();

        if let Some(t) = self.rthread.take() {
            let _ = t.join();
        }
        if let Some(t) = self.wthread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl ClntInner {
    fn lock(&self) -> MutexGuard<ClntState> {
        self.state.lock().expect("client lock poisoned")
    }

    fn rpc_nb(&self, mut tc: Msg, cb: Callback) -> Result<()> {
        let tag = self.tags.acquire();
        tc.set_tag(tag);

        let mut state = self.lock();
        if !state.connected {
            drop(state);
            self.tags.release(tag);
            return Err(HopError::new(libc::EPIPE, "no connection"));
        }

        state.unsent.push_back(UnsentReq { tag, tc, cb });
        drop(state);
        self.cond.notify_all();
        Ok(())
    }
}

fn write_proc(inner: &ClntInner) {
    let mut stream = &inner.stream;
    let mut state = inner.lock();

    loop {
        if !state.connected {
            break;
        }

        let req = match state.unsent.pop_front() {
            Some(req) => req,
            None => {
                state = inner.cond.wait(state).expect("client lock poisoned");
                continue;
            }
        };

        // The request must be pending before the lock drops, or the
        // reply could arrive with nothing to match it against.
        let UnsentReq { tag, tc, cb } = req;
        state.pending.insert(tag, cb);
        drop(state);

        if inner.debug {
            logging::debug!(inner.log, ">>> {}", tc);
        }
        let res = stream.write_all(tc.pkt());

        state = inner.lock();
        if res.is_err() {
            if state.connected {
                state.connected = false;
                let _ = inner.stream.shutdown(Shutdown::Both);
            }
            inner.cond.notify_all();
            break;
        }
    }
}

fn read_proc(inner: &ClntInner) {
    let mut stream = &inner.stream;
    let mut buf = FrameBuffer::new(DEFAULT_CAPACITY);
    let mut err = None;

    'recv: loop {
        match buf.fill(&mut stream) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        loop {
            let frame = match buf.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    logging::error!(inner.log, "bad frame: {}", e);
                    err = Some(e);
                    break 'recv;
                }
            };

            let rc = match Msg::unpack(frame) {
                Ok(rc) => rc,
                Err(e) => {
                    logging::error!(inner.log, "unparseable response: {}", e);
                    err = Some(e);
                    break 'recv;
                }
            };

            if inner.debug {
                logging::debug!(inner.log, "<<< {}", rc);
            }

            let tag = rc.tag();
            let cb = {
                let mut state = inner.lock();
                state.pending.remove(&tag)
            };

            match cb {
                Some(cb) => {
                    cb(Ok(rc));
                    inner.tags.release(tag);
                }
                None => {
                    logging::error!(inner.log, "unmatched response: {}", rc);
                    err = Some(HopError::new(libc::EINVAL, "unmatched response"));
                    break 'recv;
                }
            }
        }
    }

    // Fail everything still queued or in flight with one terminal
    // error, cloned per request.
    let err = err.unwrap_or_else(|| HopError::new(libc::EPIPE, "closed"));
    let (unsent, pending) = {
        let mut state = inner.lock();
        state.connected = false;
        let _ = inner.stream.shutdown(Shutdown::Both);
        let unsent = mem::take(&mut state.unsent);
        let pending: Vec<_> = state.pending.drain().collect();
        (unsent, pending)
    };
    inner.cond.notify_all();

    for UnsentReq { tag, cb, .. } in unsent {
        cb(Err(err.clone()));
        inner.tags.release(tag);
    }
    for (tag, cb) in pending {
        cb(Err(err.clone()));
        inner.tags.release(tag);
    }
}
