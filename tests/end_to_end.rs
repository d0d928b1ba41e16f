extern crate futures;
extern crate tk_dispatch;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use futures::Future;
use futures::future::join_all;

use tk_dispatch::server::{Config, Error, Request, Server, ServerState};
use tk_dispatch::{sleep, Dispatcher};


fn ok_handler(req: Result<Request, Error>)
    -> Box<Future<Item=(), Error=Error>>
{
    let req = req.expect("request is parsed");
    req.response().send_body(b"ok")
}

/// Drive the loop until the client thread reports back
fn pump_until<T: Send + 'static>(lp: &mut Dispatcher,
    rx: &mpsc::Receiver<T>) -> T
{
    let handle = lp.handle();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(value) = rx.try_recv() {
            return value;
        }
        assert!(Instant::now() < deadline, "client thread timed out");
        lp.run(sleep(&handle, Duration::from_millis(10))).unwrap();
    }
}

#[test]
fn hello_world_over_tcp() {
    let mut lp = Dispatcher::new().unwrap();
    let handle = lp.handle();
    let server = Server::new("127.0.0.1:0".parse().unwrap(),
        Config::new().done(),
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>,
        &handle);
    server.start().unwrap();
    assert_eq!(server.state(), ServerState::Running);
    let addr = server.local_addr().unwrap();

    let (tx, rx) = mpsc::channel();
    let child = thread::spawn(move || {
        let mut sock = TcpStream::connect(addr).unwrap();
        sock.write_all(
            b"GET / HTTP/1.1\r\nHost: localhost\r\n\
              Connection: close\r\n\r\n").unwrap();
        let mut buf = Vec::new();
        sock.read_to_end(&mut buf).unwrap();
        tx.send(buf).unwrap();
    });

    let response = pump_until(&mut lp, &rx);
    child.join().unwrap();
    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\nDate: "));
    assert!(text.contains("\r\nConnection: close\r\n"));
    assert!(text.ends_with("\r\n\r\nok"));

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn two_requests_on_one_connection() {
    let mut lp = Dispatcher::new().unwrap();
    let handle = lp.handle();
    let server = Server::new("127.0.0.1:0".parse().unwrap(),
        Config::new().done(),
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>,
        &handle);
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let (tx, rx) = mpsc::channel();
    let child = thread::spawn(move || {
        let mut sock = TcpStream::connect(addr).unwrap();
        sock.write_all(
            b"GET /one HTTP/1.1\r\nHost: localhost\r\n\r\n\
              GET /two HTTP/1.1\r\nHost: localhost\r\n\
              Connection: close\r\n\r\n").unwrap();
        let mut buf = Vec::new();
        sock.read_to_end(&mut buf).unwrap();
        tx.send(buf).unwrap();
    });

    let response = pump_until(&mut lp, &rx);
    child.join().unwrap();
    let text = String::from_utf8(response).unwrap();
    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
    server.stop();
}

#[test]
fn server_lifecycle() {
    let mut lp = Dispatcher::new().unwrap();
    let handle = lp.handle();
    let server = Server::new("127.0.0.1:0".parse().unwrap(),
        Config::new().done(),
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>,
        &handle);
    assert_eq!(server.state(), ServerState::Stopped);
    server.start().unwrap();
    assert_eq!(server.state(), ServerState::Running);
    assert!(server.start().is_err());
    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
    lp.run(server.join()).unwrap();

    // can be started again while merely stopped
    server.start().unwrap();
    lp.run(server.close_wait()).unwrap();
    assert_eq!(server.state(), ServerState::Closed);
    assert!(server.start().is_err());
}

#[test]
fn concurrent_sleeps_complete_together() {
    let mut lp = Dispatcher::new().unwrap();
    let handle = lp.handle();
    let start = Instant::now();
    let sleeps: Vec<_> = (0..8)
        .map(|_| sleep(&handle, Duration::from_millis(50)))
        .collect();
    lp.run(join_all(sleeps)).unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(5));
}
