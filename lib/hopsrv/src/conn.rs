use crate::srv::{SrvInner, SrvReq};
use hop::buffer::{FrameBuffer, DEFAULT_CAPACITY};
use hop::logging::{self, Logger};
use hop::Msg;
use std::collections::VecDeque;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread;

struct ConnState {
    shutdown: bool,
    outreqs: VecDeque<Msg>,
}

/// One accepted connection. The reader parses `T*` frames into server
/// requests; the writer drains the outbound queue of packed `R*`
/// frames. The server's connection list holds the owning reference;
/// the object is freed when the last thread drops its handle.
pub(crate) struct ConnInner {
    pub(crate) id: u64,
    stream: TcpStream,
    state: Mutex<ConnState>,
    cond: Condvar,
    srv: Weak<SrvInner>,
    debug: bool,
    log: Logger,
}

/// Registers a connection with the server and spawns its reader and
/// writer. Both run detached.
pub(crate) fn create(srv: &Arc<SrvInner>, stream: TcpStream) {
    let id = {
        let mut state = srv.lock();
        state.next_conn_id += 1;
        state.next_conn_id
    };

    let conn = Arc::new(ConnInner {
        id,
        stream,
        state: Mutex::new(ConnState {
            shutdown: false,
            outreqs: VecDeque::new(),
        }),
        cond: Condvar::new(),
        srv: Arc::downgrade(srv),
        debug: srv.debug,
        log: srv.log.new(logging::o!("conn" => id)),
    });

    logging::debug!(conn.log, "connection accepted");
    srv.add_conn(Arc::clone(&conn));

    let r = Arc::clone(&conn);
    thread::spawn(move || read_proc(&r));
    let w = conn;
    thread::spawn(move || write_proc(&w));
}

/// Unregisters the connection and closes it down. The first caller
/// wins; later calls are no-ops.
pub(crate) fn destroy(conn: &ConnInner) {
    if let Some(srv) = conn.srv.upgrade() {
        if !srv.del_conn(conn) {
            return;
        }
    }
    conn.close();
}

impl ConnInner {
    fn lock(&self) -> MutexGuard<ConnState> {
        self.state.lock().expect("conn lock poisoned")
    }

    /// Queues a packed response for the writer. Responses completed
    /// after shutdown are dropped.
    pub(crate) fn send(&self, rc: Msg) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        state.outreqs.push_back(rc);
        drop(state);
        self.cond.notify_one();
    }

    /// Marks the connection down and wakes the writer; the socket
    /// shutdown also unblocks the reader.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        if !state.shutdown {
            state.shutdown = true;
            let _ = self.stream.shutdown(Shutdown::Both);
            logging::debug!(self.log, "connection closed");
        }
        drop(state);
        self.cond.notify_all();
    }
}

fn read_proc(conn: &Arc<ConnInner>) {
    let mut stream = &conn.stream;
    let mut buf = FrameBuffer::new(DEFAULT_CAPACITY);

    'recv: loop {
        match buf.fill(&mut stream) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        loop {
            let frame = match buf.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    logging::error!(conn.log, "bad frame: {}", err);
                    break 'recv;
                }
            };

            let tc = match Msg::unpack(frame) {
                Ok(tc) => tc,
                Err(err) => {
                    logging::error!(conn.log, "unparseable request: {}", err);
                    break 'recv;
                }
            };

            if conn.debug {
                logging::debug!(conn.log, "<<< {}", tc);
            }

            let srv = match conn.srv.upgrade() {
                Some(srv) => srv,
                None => break 'recv,
            };
            srv.submit(SrvReq {
                conn: Arc::downgrade(conn),
                tc,
            });
        }
    }

    destroy(conn);
}

fn write_proc(conn: &Arc<ConnInner>) {
    let mut stream = &conn.stream;
    let mut state = conn.lock();

    loop {
        let rc = match state.outreqs.pop_front() {
            Some(rc) => rc,
            None if state.shutdown => break,
            None => {
                state = conn.cond.wait(state).expect("conn lock poisoned");
                continue;
            }
        };
        drop(state);

        if conn.debug {
            logging::debug!(conn.log, ">>> {}", rc);
        }
        if stream.write_all(rc.pkt()).is_err() {
            destroy(conn);
            return;
        }

        state = conn.lock();
    }
    drop(state);

    destroy(conn);
}
