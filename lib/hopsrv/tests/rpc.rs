//! End-to-end scenarios: a real client against a MemStore-backed
//! server over a loopback listener.

use hop::{version, AtomicOp, Client, Msg, MsgType};
use hopsrv::{MemStore, Server, ServerConfig};
use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn start_server() -> (String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::new(
        Arc::new(MemStore::new()),
        ServerConfig::default(),
        None,
    );
    thread::spawn(move || server.serve(listener).unwrap());

    (addr.ip().to_string(), addr.port())
}

#[test]
fn create_then_get() {
    let (addr, port) = start_server();
    let client = Client::connect(&addr, port).unwrap();

    let rc = client.rpc(Msg::tcreate(b"foo", b"", b"bar").unwrap()).unwrap();
    assert_eq!(rc.mtype(), MsgType::Rcreate);
    let v1 = rc.version();
    assert!(v1 > 0);

    let rc = client.rpc(Msg::tget(b"foo", version::ANY).unwrap()).unwrap();
    assert_eq!(rc.mtype(), MsgType::Rget);
    assert_eq!(rc.version(), v1);
    assert_eq!(rc.value(), b"bar");
}

#[test]
fn set_bumps_version_and_reads_return_current() {
    let (addr, port) = start_server();
    let client = Client::connect(&addr, port).unwrap();

    let v1 = client
        .rpc(Msg::tcreate(b"foo", b"", b"bar").unwrap())
        .unwrap()
        .version();

    let rc = client.rpc(Msg::tset(b"foo", b"baz").unwrap()).unwrap();
    assert_eq!(rc.mtype(), MsgType::Rset);
    let v2 = rc.version();
    assert!(v2 > v1);

    // Asking for the old version still returns the current value.
    let rc = client.rpc(Msg::tget(b"foo", v1).unwrap()).unwrap();
    assert_eq!(rc.version(), v2);
    assert_eq!(rc.value(), b"baz");
}

#[test]
fn testset_succeeds_then_conflicts() {
    let (addr, port) = start_server();
    let client = Client::connect(&addr, port).unwrap();

    client
        .rpc(Msg::tcreate(b"foo", b"", b"bar").unwrap())
        .unwrap();
    let v2 = client
        .rpc(Msg::tset(b"foo", b"baz").unwrap())
        .unwrap()
        .version();

    let rc = client
        .rpc(Msg::ttestset(b"foo", v2, b"baz", b"qux").unwrap())
        .unwrap();
    assert_eq!(rc.mtype(), MsgType::Rtestset);
    let v3 = rc.version();
    assert!(v3 > v2);
    assert_eq!(rc.value(), b"qux");

    // Retrying against the superseded version fails; the key still
    // holds the winner's value.
    let rc = client
        .rpc(Msg::ttestset(b"foo", v2, b"baz", b"zzz").unwrap())
        .unwrap();
    assert_eq!(rc.mtype(), MsgType::Rerror);
    assert_ne!(rc.ecode(), 0);

    let rc = client.rpc(Msg::tget(b"foo", version::ANY).unwrap()).unwrap();
    assert_eq!(rc.value(), b"qux");
}

#[test]
fn concurrent_atomic_adds_from_two_clients() {
    let (addr, port) = start_server();
    let client = Client::connect(&addr, port).unwrap();

    client
        .rpc(Msg::tcreate(b"ctr", b"", &0u32.to_le_bytes()).unwrap())
        .unwrap();

    let mut threads = Vec::new();
    let (tx, rx) = mpsc::channel();
    for _ in 0..2 {
        let tx = tx.clone();
        let addr = addr.clone();
        threads.push(thread::spawn(move || {
            let client = Client::connect(&addr, port).unwrap();
            let one = 1u32.to_le_bytes();
            for _ in 0..5 {
                let rc = client
                    .rpc(Msg::tatomic(b"ctr", AtomicOp::Add, &[&one]).unwrap())
                    .unwrap();
                assert_eq!(rc.mtype(), MsgType::Ratomic);
                tx.send(rc.version()).unwrap();
            }
        }));
    }
    for t in threads {
        t.join().unwrap();
    }

    let mut versions: Vec<u64> = (0..10).map(|_| rx.recv().unwrap()).collect();
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), 10, "every add got its own version");

    let rc = client.rpc(Msg::tget(b"ctr", version::NEWEST).unwrap()).unwrap();
    assert_eq!(rc.value(), &10u32.to_le_bytes());
}

#[test]
fn remove_then_get_is_enoent() {
    let (addr, port) = start_server();
    let client = Client::connect(&addr, port).unwrap();

    client
        .rpc(Msg::tcreate(b"foo", b"", b"bar").unwrap())
        .unwrap();
    let rc = client.rpc(Msg::tremove(b"foo").unwrap()).unwrap();
    assert_eq!(rc.mtype(), MsgType::Rremove);

    let rc = client.rpc(Msg::tget(b"foo", version::ANY).unwrap()).unwrap();
    assert_eq!(rc.mtype(), MsgType::Rerror);
    assert_eq!(rc.ecode(), libc::ENOENT as u32);
}

#[test]
fn past_newest_waits_for_the_next_write() {
    let (addr, port) = start_server();
    let client = Client::connect(&addr, port).unwrap();

    client
        .rpc(Msg::tcreate(b"watched", b"", b"old").unwrap())
        .unwrap();

    let (tx, rx) = mpsc::channel();
    client
        .rpc_nb(
            Msg::tget(b"watched", version::PAST_NEWEST).unwrap(),
            move |res| tx.send(res).unwrap(),
        )
        .unwrap();

    // The watcher must still be parked server-side.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    let v2 = client
        .rpc(Msg::tset(b"watched", b"new").unwrap())
        .unwrap()
        .version();

    let rc = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(rc.version(), v2);
    assert_eq!(rc.value(), b"new");
}

#[test]
fn pipelined_requests_on_one_connection() {
    let (addr, port) = start_server();
    let client = Client::connect(&addr, port).unwrap();

    let (tx, rx) = mpsc::channel();
    for i in 0u32..16 {
        let tx = tx.clone();
        let key = format!("key{}", i);
        client
            .rpc_nb(
                Msg::tset(key.as_bytes(), &i.to_le_bytes()).unwrap(),
                move |res| tx.send((i, res)).unwrap(),
            )
            .unwrap();
    }

    for _ in 0..16 {
        let (_, res) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(res.unwrap().mtype(), MsgType::Rset);
    }

    for i in 0u32..16 {
        let key = format!("key{}", i);
        let rc = client
            .rpc(Msg::tget(key.as_bytes(), version::ANY).unwrap())
            .unwrap();
        assert_eq!(rc.value(), &i.to_le_bytes());
    }
}

#[test]
fn empty_key_is_rejected_by_the_server() {
    let (addr, port) = start_server();
    let client = Client::connect(&addr, port).unwrap();

    let rc = client.rpc(Msg::tget(b"", version::ANY).unwrap()).unwrap();
    assert_eq!(rc.mtype(), MsgType::Rerror);
    assert_eq!(rc.ecode(), libc::EINVAL as u32);
}
