use crate::srv::{Hop, SrvInner, SrvReq};
use hop::error::{HopError, Result};
use hop::{Msg, MsgType};
use std::sync::Arc;
use std::thread;

pub(crate) fn spawn(srv: &Arc<SrvInner>, id: usize) {
    let srv = Arc::clone(srv);
    thread::Builder::new()
        .name(format!("hop-worker-{}", id))
        .spawn(move || work_proc(&srv))
        .expect("worker thread spawn failed");
}

fn work_proc(srv: &SrvInner) {
    loop {
        let req = {
            let mut state = srv.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(req) = state.queue.pop_front() {
                    state.in_progress += 1;
                    break req;
                }
                state = srv.reqcond.wait(state).expect("server lock poisoned");
            }
        };

        let rc = process(srv, &req.tc);
        respond(req, rc);

        srv.lock().in_progress -= 1;
    }
}

/// Dispatches a parsed request into the capability set; any error
/// comes back as an Rerror frame.
fn process(srv: &SrvInner, tc: &Msg) -> Msg {
    match dispatch(&*srv.hop, tc) {
        Ok(rc) => rc,
        Err(err) => pack_error(&err),
    }
}

fn dispatch(hop: &dyn Hop, tc: &Msg) -> Result<Msg> {
    match tc.mtype() {
        MsgType::Tget => {
            let key = nonempty_key(tc)?;
            let (ver, val) = hop.get(key, tc.version())?;
            Msg::rget(ver, &val)
        }
        MsgType::Tset => {
            let key = nonempty_key(tc)?;
            let ver = hop.set(key, tc.value())?;
            Msg::rset(ver)
        }
        MsgType::Tcreate => {
            let key = nonempty_key(tc)?;
            let ver = hop.create(key, tc.flags(), tc.value())?;
            Msg::rcreate(ver)
        }
        MsgType::Tremove => {
            let key = nonempty_key(tc)?;
            hop.remove(key)?;
            Msg::rremove()
        }
        MsgType::Ttestset => {
            let key = nonempty_key(tc)?;
            let (ver, val) = hop.testset(key, tc.version(), tc.oldval(), tc.value())?;
            Msg::rtestset(ver, &val)
        }
        MsgType::Tatomic => {
            let key = nonempty_key(tc)?;
            let op = tc
                .atomic_op()
                .ok_or_else(|| HopError::new(libc::EINVAL, "invalid atomic op"))?;
            let vals: Vec<&[u8]> = tc.vals().collect();
            let (ver, out) = hop.atomic(key, op, &vals)?;
            let out: Vec<&[u8]> = out.iter().map(|v| v.as_slice()).collect();
            Msg::ratomic(ver, &out)
        }
        // A response type arriving on the server side.
        _ => Err(HopError::new(libc::EINVAL, "invalid message type")),
    }
}

// The codec leaves semantic checks to the server.
fn nonempty_key(tc: &Msg) -> Result<&[u8]> {
    let key = tc.key();
    if key.is_empty() {
        return Err(HopError::new(libc::EINVAL, "empty key"));
    }
    Ok(key)
}

fn pack_error(err: &HopError) -> Msg {
    Msg::rerror(err.errnum, &err.descr)
        .unwrap_or_else(|_| Msg::rerror(err.errnum, "error").expect("short description packs"))
}

/// Stamps the request tag on the response and hands it to the
/// originating connection's writer. A connection that died while the
/// request was in flight swallows the response.
fn respond(req: SrvReq, mut rc: Msg) {
    rc.set_tag(req.tc.tag());
    if let Some(conn) = req.conn.upgrade() {
        conn.send(rc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use hop::version;

    fn store_with(key: &[u8], val: &[u8]) -> MemStore {
        let store = MemStore::new();
        store.set(key, val).unwrap();
        store
    }

    #[test]
    fn dispatches_get() {
        let store = store_with(b"k", b"v");
        let tc = Msg::tget(b"k", version::ANY).unwrap();
        let rc = dispatch(&store, &tc).unwrap();
        assert_eq!(rc.mtype(), MsgType::Rget);
        assert_eq!(rc.value(), b"v");
    }

    #[test]
    fn rejects_empty_key() {
        let store = MemStore::new();
        let tc = Msg::tget(b"", version::ANY).unwrap();
        let err = dispatch(&store, &tc).unwrap_err();
        assert_eq!(err.errnum, libc::EINVAL as u32);
        assert_eq!(err.descr, "empty key");
    }

    #[test]
    fn rejects_response_types_inbound() {
        let store = MemStore::new();
        let tc = Msg::rset(1).unwrap();
        let err = dispatch(&store, &tc).unwrap_err();
        assert_eq!(err.errnum, libc::EINVAL as u32);
    }

    #[test]
    fn absent_capability_answers_unsupported() {
        struct NoCaps;
        impl Hop for NoCaps {}

        let tc = Msg::tget(b"k", version::ANY).unwrap();
        let err = dispatch(&NoCaps, &tc).unwrap_err();
        assert_eq!(err.errnum, libc::ENOSYS as u32);
        assert_eq!(err.descr, "unsupported message");
    }

    #[test]
    fn errors_become_rerror_frames() {
        let err = HopError::new(libc::ENOENT, "no such key");
        let rc = pack_error(&err);
        assert_eq!(rc.mtype(), MsgType::Rerror);
        assert_eq!(rc.ecode(), libc::ENOENT as u32);
        assert_eq!(rc.edescr(), b"no such key");
    }
}
