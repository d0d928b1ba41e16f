extern crate futures;
extern crate tk_dispatch;

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures::Future;
use futures::future::ok;

use tk_dispatch::mock::MockData;
use tk_dispatch::server::{serve, Config, Error, Request, Service};
use tk_dispatch::stream::{read_to_end, IoStream, SharedTransport, Transport};
use tk_dispatch::{Dispatcher, Status};


fn transport(lp: &Dispatcher, mock: &MockData) -> SharedTransport {
    let stream = IoStream::new(mock.clone(), &lp.handle());
    Rc::new(RefCell::new(Box::new(stream) as Box<Transport>))
}

/// Run a full connection against scripted input and return the raw output
fn run_conn<S: Service + 'static>(config: Arc<Config>, input: &[u8],
    service: S)
    -> String
{
    let mut lp = Dispatcher::new().unwrap();
    let mock = MockData::new();
    mock.add_input(input);
    mock.mark_eof();
    let t = transport(&lp, &mock);
    let peer: SocketAddr = "127.0.0.1:41234".parse().unwrap();
    let local: SocketAddr = "127.0.0.1:80".parse().unwrap();
    let fut = serve(t, None, peer, local, config,
        Rc::new(service), lp.handle());
    lp.run(fut).unwrap();
    String::from_utf8(mock.output()).unwrap()
}

fn ok_handler(req: Result<Request, Error>)
    -> Box<Future<Item=(), Error=Error>>
{
    let req = req.expect("request is parsed");
    req.response().send_body(b"ok")
}

#[test]
fn simple_get() {
    let out = run_conn(Config::new().done(),
        b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    assert!(out.starts_with("HTTP/1.1 200 OK\r\nDate: "));
    assert!(out.contains("\r\nContent-Type: text/html; charset=utf-8\r\n"));
    assert!(out.contains("\r\nContent-Length: 2\r\n"));
    assert!(out.contains("\r\nConnection: keep-alive\r\n"));
    assert!(out.ends_with("\r\n\r\nok"));
}

#[test]
fn keep_alive_serves_pipelined_heads() {
    let out = run_conn(Config::new().done(),
        b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n\
          GET /b HTTP/1.1\r\nHost: x\r\n\r\n",
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
}

#[test]
fn connection_close_stops_the_loop() {
    let out = run_conn(Config::new().done(),
        b"GET /a HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n\
          GET /b HTTP/1.1\r\nHost: x\r\n\r\n",
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 1);
}

#[test]
fn http10_without_keep_alive_closes() {
    let out = run_conn(Config::new().done(),
        b"GET /a HTTP/1.0\r\n\r\nGET /b HTTP/1.0\r\n\r\n",
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    assert_eq!(out.matches("HTTP/1.0 200 OK").count(), 1);
    assert!(out.contains("\r\nConnection: close\r\n"));
}

#[test]
fn untouched_response_turns_into_404() {
    let handler = |req: Result<Request, Error>|
        -> Box<Future<Item=(), Error=Error>>
    {
        let _req = req.unwrap();
        Box::new(ok(()))
    };
    let out = run_conn(Config::new().done(),
        b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", handler);
    assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[test]
fn handler_error_maps_to_status() {
    let handler = |req: Result<Request, Error>|
        -> Box<Future<Item=(), Error=Error>>
    {
        let _req = req.unwrap();
        Box::new(futures::future::err(Error::Status(Status::Forbidden)))
    };
    let out = run_conn(Config::new().done(),
        b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", handler);
    assert!(out.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(out.contains("\r\nConnection: close\r\n"));
}

#[test]
fn unclassified_handler_error_is_503() {
    let handler = |req: Result<Request, Error>|
        -> Box<Future<Item=(), Error=Error>>
    {
        let _req = req.unwrap();
        Box::new(futures::future::err(
            Error::Custom("database is down".into())))
    };
    let out = run_conn(Config::new().done(),
        b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", handler);
    assert!(out.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
}

#[test]
fn expect_continue_then_chunked_body() {
    let handler = |req: Result<Request, Error>|
        -> Box<Future<Item=(), Error=Error>>
    {
        let req = req.unwrap();
        let reader = req.body().unwrap();
        let resp = req.response();
        Box::new(read_to_end(reader)
            .map_err(Error::from)
            .and_then(move |(_, body)| resp.send_body(&body)))
    };
    let out = run_conn(Config::new().done(),
        b"POST /x HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\
          Expect: 100-continue\r\n\r\n\
          5\r\nhello\r\n0\r\n\r\n",
        handler);
    assert!(out.starts_with("HTTP/1.1 100 Continue\r\n\r\n\
                             HTTP/1.1 200 OK\r\n"));
    assert!(out.contains("\r\nContent-Length: 5\r\n"));
    assert!(out.ends_with("\r\n\r\nhello"));
}

#[test]
fn length_and_chunked_is_bad_request() {
    let out = run_conn(Config::new().done(),
        b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 10\r\n\
          Transfer-Encoding: chunked\r\n\r\n",
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(out.contains("\r\nConnection: close\r\n"));
}

#[test]
fn oversized_head_is_413() {
    let mut config = Config::new();
    config.max_headers_size(128);
    let mut head = b"GET / HTTP/1.1\r\nHost: x\r\nX-Filler: ".to_vec();
    head.extend(::std::iter::repeat(b'a').take(200));
    head.extend_from_slice(b"\r\n\r\n");
    let out = run_conn(config.done(), &head,
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    assert!(out.starts_with("HTTP/1.1 413 Request Entity Too Large\r\n"));
}

#[test]
fn head_of_exactly_the_limit_parses() {
    // pad the filler header so the final CRLFCRLF ends exactly at the cap
    let mut head = b"GET / HTTP/1.1\r\nHost: x\r\nX-Filler: ".to_vec();
    let target = 256;
    let fill = target - head.len() - 4;
    head.extend(::std::iter::repeat(b'a').take(fill));
    head.extend_from_slice(b"\r\n\r\n");
    assert_eq!(head.len(), target);
    let mut config = Config::new();
    config.max_headers_size(target);
    let out = run_conn(config.done(), &head,
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[test]
fn oversized_declared_body_is_413() {
    let mut config = Config::new();
    config.max_request_body_size(16);
    let out = run_conn(config.done(),
        b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 17\r\n\r\n\
          aaaaaaaaaaaaaaaaa",
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    assert!(out.starts_with("HTTP/1.1 413 Request Entity Too Large\r\n"));
}

#[test]
fn idle_connection_times_out_with_408() {
    let mut lp = Dispatcher::new().unwrap();
    let mock = MockData::new();
    // no input and no EOF: the read parks until the deadline fires
    let t = transport(&lp, &mock);
    let peer: SocketAddr = "127.0.0.1:41234".parse().unwrap();
    let local: SocketAddr = "127.0.0.1:80".parse().unwrap();
    let mut config = Config::new();
    config.headers_timeout(Duration::from_millis(50));
    let service: Rc<Service> = Rc::new(
        ok_handler as fn(Result<Request, Error>)
            -> Box<Future<Item=(), Error=Error>>);
    let fut = serve(t, None, peer, local, config.done(), service,
        lp.handle());
    lp.run(fut).unwrap();
    let out = String::from_utf8(mock.output()).unwrap();
    assert!(out.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
}

#[test]
fn streamed_response_reassembles() {
    let handler = |req: Result<Request, Error>|
        -> Box<Future<Item=(), Error=Error>>
    {
        let resp = req.unwrap().response();
        let resp2 = resp.clone();
        let resp3 = resp.clone();
        Box::new(resp.prepare()
            .and_then(move |()| resp2.send_chunk(b"hello "))
            .and_then(move |()| {
                let resp = resp3.clone();
                resp3.send_chunk(b"world").and_then(move |()| resp.finish())
            }))
    };
    let out = run_conn(Config::new().done(),
        b"GET /stream HTTP/1.1\r\nHost: x\r\n\r\n", handler);
    assert!(out.contains("\r\nTransfer-Encoding: chunked\r\n"));
    assert!(out.ends_with("\r\n\r\n6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n"));
}

#[test]
fn forgotten_finish_is_flushed() {
    let handler = |req: Result<Request, Error>|
        -> Box<Future<Item=(), Error=Error>>
    {
        let resp = req.unwrap().response();
        let resp2 = resp.clone();
        Box::new(resp.prepare()
            .and_then(move |()| resp2.send_chunk(b"data")))
    };
    let out = run_conn(Config::new().done(),
        b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", handler);
    assert!(out.ends_with("4\r\ndata\r\n0\r\n\r\n"));
}

#[test]
fn prepared_but_bodyless_response_is_conflict() {
    let handler = |req: Result<Request, Error>|
        -> Box<Future<Item=(), Error=Error>>
    {
        let resp = req.unwrap().response();
        resp.prepare()
    };
    let out = run_conn(Config::new().done(),
        b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", handler);
    assert!(out.contains("409 Conflict"));
}

#[test]
fn post_table_round_trip() {
    let handler = |req: Result<Request, Error>|
        -> Box<Future<Item=(), Error=Error>>
    {
        let req = req.unwrap();
        let resp = req.response();
        Box::new(req.post().and_then(move |table| {
            let mut pairs: Vec<String> = Vec::new();
            for &(ref k, ref v) in table.iter() {
                pairs.push(format!("{}={}", k, v));
            }
            resp.send_body(pairs.join("&").as_bytes())
        }))
    };
    let out = run_conn(Config::new().done(),
        b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 12\r\n\
          Content-Type: application/x-www-form-urlencoded\r\n\r\n\
          a=1&b=two%20",
        handler);
    assert!(out.ends_with("\r\n\r\na=1&b=two "));
}
