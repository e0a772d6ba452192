//! Client behavior against scripted peers: pipelining, reordered
//! responses, shutdown cascades and timeouts.

use hop::{Client, ClientConfig, Msg, MsgType};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut hdr = [0u8; 4];
    stream.read_exact(&mut hdr).ok()?;
    let size = u32::from_le_bytes(hdr) as usize;

    let mut frame = vec![0u8; size];
    frame[..4].copy_from_slice(&hdr);
    stream.read_exact(&mut frame[4..]).ok()?;
    Some(frame)
}

fn spawn_peer<F>(script: F) -> (String, u16)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(stream);
    });
    (addr.ip().to_string(), addr.port())
}

#[test]
fn pipelined_responses_in_reverse_order() {
    const K: usize = 8;

    let (addr, port) = spawn_peer(|mut stream| {
        let mut reqs = Vec::new();
        for _ in 0..K {
            let tc = Msg::unpack(read_frame(&mut stream).unwrap()).unwrap();
            assert_eq!(tc.mtype(), MsgType::Tset);
            reqs.push(tc);
        }
        // Answer everything backwards; tags are the only correlation.
        for tc in reqs.iter().rev() {
            let mut rc = Msg::rset(tc.tag() as u64 + 1000).unwrap();
            rc.set_tag(tc.tag());
            stream.write_all(rc.pkt()).unwrap();
        }
    });

    let client = Client::connect(&addr, port).unwrap();
    let (tx, rx) = mpsc::channel();
    for i in 0..K {
        let tx = tx.clone();
        let tc = Msg::tset(format!("key{}", i).as_bytes(), b"v").unwrap();
        client
            .rpc_nb(tc, move |res| {
                let rc = res.unwrap();
                assert_eq!(rc.mtype(), MsgType::Rset);
                assert_eq!(rc.version(), rc.tag() as u64 + 1000);
                tx.send(rc.tag()).unwrap();
            })
            .unwrap();
    }

    let mut tags: Vec<u16> = (0..K)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    tags.sort_unstable();
    tags.dedup();
    assert_eq!(tags.len(), K, "every callback fired exactly once");
}

#[test]
fn peer_close_fails_everything_with_epipe() {
    const K: usize = 6;

    let (addr, port) = spawn_peer(|mut stream| {
        // Absorb one frame so at least one request is known-pending,
        // then slam the connection shut without answering.
        let _ = read_frame(&mut stream);
        thread::sleep(Duration::from_millis(20));
    });

    let client = Client::connect(&addr, port).unwrap();
    let (tx, rx) = mpsc::channel();
    for i in 0..K {
        let tx = tx.clone();
        let tc = Msg::tget(format!("key{}", i).as_bytes(), 0).unwrap();
        client.rpc_nb(tc, move |res| tx.send(res).unwrap()).unwrap();
    }

    for _ in 0..K {
        let res = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let err = res.unwrap_err();
        assert_eq!(err.errnum, libc::EPIPE as u32);
    }

    // The connection is gone for good; later calls fail immediately.
    let err = client.rpc(Msg::tget(b"key", 0).unwrap()).unwrap_err();
    assert_eq!(err.errnum, libc::EPIPE as u32);
    assert_eq!(err.descr, "no connection");
}

#[test]
fn unmatched_tag_tears_the_connection_down() {
    let (addr, port) = spawn_peer(|mut stream| {
        let tc = Msg::unpack(read_frame(&mut stream).unwrap()).unwrap();
        let mut rc = Msg::rset(1).unwrap();
        // A tag the client never issued.
        rc.set_tag(tc.tag().wrapping_add(7));
        stream.write_all(rc.pkt()).unwrap();
        // Hold the socket open; the client must cut it itself.
        thread::sleep(Duration::from_millis(200));
    });

    let client = Client::connect(&addr, port).unwrap();
    let err = client.rpc(Msg::tset(b"k", b"v").unwrap()).unwrap_err();
    assert_eq!(err.errnum, libc::EINVAL as u32);
    assert_eq!(err.descr, "unmatched response");
}

#[test]
fn rpc_timeout_expires() {
    let (addr, port) = spawn_peer(|mut stream| {
        let _ = read_frame(&mut stream);
        thread::sleep(Duration::from_millis(500));
    });

    let config = ClientConfig {
        rpc_timeout: Some(Duration::from_millis(50)),
        ..ClientConfig::default()
    };
    let client = Client::connect_with(&addr, port, config, None).unwrap();
    let err = client.rpc(Msg::tget(b"slow", 0).unwrap()).unwrap_err();
    assert_eq!(err.errnum, libc::ETIMEDOUT as u32);
}

#[test]
fn disconnect_is_idempotent() {
    let (addr, port) = spawn_peer(|mut stream| {
        let _ = read_frame(&mut stream);
    });

    let mut client = Client::connect(&addr, port).unwrap();
    client.disconnect();
    client.disconnect();

    let err = client.rpc(Msg::tget(b"k", 0).unwrap()).unwrap_err();
    assert_eq!(err.errnum, libc::EPIPE as u32);
}
