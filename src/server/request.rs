//! The request object handed to the application

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use futures::{Future, Poll};
use futures::future::{err, ok};
use url::{form_urlencoded, Url};

use bounded::{BoundHandle, BoundedReader};
use chunked::ChunkedReader;
use enums::{Method, Version};
use headers::HeaderTable;
use multipart;
use server::parser::{Head, RequestFlags};
use server::response::Response;
use server::{Config, Error};
use stream::{consume_to_eof, read_to_end, SharedTransport, StreamReader,
             Transport};


/// Reader for the request body
///
/// Stacks the right decoders for the request's framing (a bounded frame
/// for `Content-Length`, a chunked decoder under a size ceiling for
/// `Transfer-Encoding: chunked`) and owns the whole pipeline, so dropping
/// it tears the readers down in order.
pub struct BodyReader {
    top: Box<StreamReader>,
    bound: BoundHandle,
    done: Rc<Cell<bool>>,
}

impl BodyReader {
    /// True when the frame was consumed down to the exact configured
    /// bound, which tells an aborted request from an oversized one
    pub fn at_bound(&self) -> bool {
        self.bound.at_bound()
    }
}

impl StreamReader for BodyReader {
    fn poll_read(&mut self, buf: &mut [u8]) -> Poll<usize, ::Error> {
        let res = self.top.poll_read(buf);
        if let Ok(::futures::Async::Ready(0)) = res {
            self.done.set(true);
        }
        res
    }

    fn at_eof(&self) -> bool {
        self.top.at_eof()
    }
}

/// A single parsed HTTP request; cheap to clone
#[derive(Clone)]
pub struct Request {
    inner: Rc<RequestInner>,
}

struct RequestInner {
    head: Head,
    uri: Url,
    query: HeaderTable,
    transport: SharedTransport,
    peer: SocketAddr,
    local: SocketAddr,
    config: Arc<Config>,
    response: Response,
    body_taken: Cell<bool>,
    body_done: Rc<Cell<bool>>,
    body_bound: RefCell<Option<BoundHandle>>,
    expect_sent: Cell<bool>,
    post_cache: RefCell<Option<Rc<HeaderTable>>>,
}

impl Request {
    pub fn new(head: Head, transport: SharedTransport,
        peer: SocketAddr, local: SocketAddr, config: Arc<Config>)
        -> Result<Request, Error>
    {
        let uri = request_uri(&head, &config, local)?;
        let mut query = HeaderTable::new();
        for (key, value) in uri.query_pairs() {
            query.add(&key, &value);
        }
        let response = Response::new(transport.clone(), head.version);
        // covers both an explicit `Connection: close` on 1.1 and the 1.0
        // default-close with an explicit keep-alive override
        response.set_keep_alive(!head.connection_close);
        Ok(Request {
            inner: Rc::new(RequestInner {
                head: head,
                uri: uri,
                query: query,
                transport: transport,
                peer: peer,
                local: local,
                config: config,
                response: response,
                body_taken: Cell::new(false),
                body_done: Rc::new(Cell::new(false)),
                body_bound: RefCell::new(None),
                expect_sent: Cell::new(false),
                post_cache: RefCell::new(None),
            }),
        })
    }

    pub fn method(&self) -> &Method {
        &self.inner.head.method
    }

    pub fn version(&self) -> Version {
        self.inner.head.version
    }

    /// The request target exactly as received
    pub fn path(&self) -> &str {
        &self.inner.head.path
    }

    /// The absolute request URI
    pub fn uri(&self) -> &Url {
        &self.inner.uri
    }

    /// Decoded query parameters, insertion order preserved
    pub fn query(&self) -> &HeaderTable {
        &self.inner.query
    }

    pub fn headers(&self) -> &HeaderTable {
        &self.inner.head.headers
    }

    pub fn flags(&self) -> RequestFlags {
        self.inner.head.flags
    }

    pub fn content_length(&self) -> u64 {
        self.inner.head.content_length
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local
    }

    /// The response paired with this request
    pub fn response(&self) -> Response {
        self.inner.response.clone()
    }

    /// True when the request head asked for the connection to be closed
    pub fn connection_close(&self) -> bool {
        self.inner.head.connection_close
    }

    /// Take the body reader; may be taken once
    ///
    /// When the client sent `Expect: 100-continue` the interim response is
    /// queued here, before the first read, unless the server was
    /// configured not to.
    pub fn body(&self) -> Result<BodyReader, Error> {
        if self.inner.body_taken.get() {
            return Err(Error::Custom("request body was already taken".into()));
        }
        self.inner.body_taken.set(true);
        self.handle_expect();
        let flags = self.inner.head.flags;
        let done = self.inner.body_done.clone();
        let (top, bound): (Box<StreamReader>, _) = if flags.unbound_body {
            let limit = self.inner.config.max_request_body_size;
            let bounded = BoundedReader::at_most(
                self.inner.transport.clone(), limit);
            let bound = bounded.handle();
            (Box::new(ChunkedReader::new(bounded)), bound)
        } else {
            // a zero limit degenerates to an immediate EOF
            let bounded = BoundedReader::exact(
                self.inner.transport.clone(),
                self.inner.head.content_length);
            let bound = bounded.handle();
            (Box::new(bounded), bound)
        };
        *self.inner.body_bound.borrow_mut() = Some(bound.clone());
        Ok(BodyReader {
            top: top,
            bound: bound,
            done: done,
        })
    }

    fn handle_expect(&self) {
        if self.inner.head.flags.client_expect
            && self.inner.head.version == Version::Http11
            && !self.inner.config.no_expect_handler
            && !self.inner.expect_sent.get()
        {
            self.inner.expect_sent.set(true);
            let _ = self.inner.transport.borrow_mut()
                .write(b"HTTP/1.1 100 Continue\r\n\r\n");
        }
    }

    /// Decode the body as a form; computed once and memoized
    pub fn post(&self) -> Box<Future<Item=Rc<HeaderTable>, Error=Error>> {
        if let Some(cached) = self.inner.post_cache.borrow().clone() {
            return Box::new(ok(cached));
        }
        if !self.inner.head.method.may_post() {
            return Box::new(err(Error::BadRequest(
                "request method cannot carry a form")));
        }
        let flags = self.inner.head.flags;
        if !flags.bound_body && !flags.unbound_body {
            let table = Rc::new(HeaderTable::new());
            *self.inner.post_cache.borrow_mut() = Some(table.clone());
            return Box::new(ok(table));
        }
        if !flags.urlencoded_form && !flags.multipart_form {
            return Box::new(err(Error::BadRequest(
                "unsupported request body")));
        }
        let reader = match self.body() {
            Ok(reader) => reader,
            Err(e) => return Box::new(err(e)),
        };
        let this = self.clone();
        Box::new(read_to_end(reader)
            .map_err(body_error)
            .and_then(move |(_, data)| {
                let mut table = HeaderTable::new();
                if flags.urlencoded_form {
                    for (key, value) in form_urlencoded::parse(&data) {
                        if key.is_empty() {
                            continue;
                        }
                        table.add(&key, &value);
                    }
                } else {
                    let boundary = this.headers().get("content-type")
                        .and_then(multipart::boundary)
                        .ok_or(Error::BadRequest(
                            "multipart body without a boundary"))?;
                    let parts = multipart::parse_form(&data, &boundary)
                        .map_err(body_error)?;
                    for (name, value) in parts {
                        table.add(&name, &value);
                    }
                }
                let table = Rc::new(table);
                *this.inner.post_cache.borrow_mut() = Some(table.clone());
                Ok(table)
            }))
    }

    /// Bring the connection back to a request boundary
    ///
    /// Resolves to true when the transport is clean enough to read the
    /// next request from, false when the connection has to close.
    pub fn finish_body(&self) -> Box<Future<Item=bool, Error=Error>> {
        let flags = self.inner.head.flags;
        if !flags.bound_body && !flags.unbound_body {
            return Box::new(ok(true));
        }
        if self.inner.body_done.get() {
            return Box::new(ok(true));
        }
        if !self.inner.body_taken.get() {
            if flags.client_expect && !self.inner.expect_sent.get() {
                // the client is still waiting for 100 Continue and may
                // never send the body; draining would hang
                return Box::new(ok(false));
            }
            let reader = match self.body() {
                Ok(reader) => reader,
                Err(..) => return Box::new(ok(false)),
            };
            return Box::new(consume_to_eof(reader)
                .then(|res| Ok(res.is_ok())));
        }
        if flags.bound_body {
            let bound = self.inner.body_bound.borrow().clone();
            if let Some(bound) = bound {
                if bound.at_bound() {
                    return Box::new(ok(true));
                }
                let drain = BoundedReader::exact(
                    self.inner.transport.clone(), bound.remaining());
                return Box::new(consume_to_eof(drain)
                    .then(|res| Ok(res.is_ok())));
            }
        }
        // a half-read chunked body cannot be resumed reliably
        Box::new(ok(false))
    }
}

fn body_error(err: ::Error) -> Error {
    match err {
        ::Error::LimitExceeded => Error::BodyTooLarge,
        other => other.into(),
    }
}

fn request_uri(head: &Head, config: &Config, local: SocketAddr)
    -> Result<Url, Error>
{
    if head.path.contains("://") {
        return Url::parse(&head.path)
            .map_err(|_| Error::BadRequest("malformed request target"));
    }
    let base = match config.server_uri {
        Some(ref base) => base.clone(),
        None => {
            let scheme = if config.tls.is_some() { "https" } else { "http" };
            let authority = match head.headers.get("host") {
                Some(host) => host.trim().to_string(),
                None => format!("{}", local),
            };
            Url::parse(&format!("{}://{}/", scheme, authority))
                .map_err(|_| Error::BadRequest("invalid host header"))?
        }
    };
    if head.path == "*" {
        return Ok(base);
    }
    base.join(&head.path)
        .map_err(|_| Error::BadRequest("malformed request target"))
}


#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::net::SocketAddr;
    use std::rc::Rc;

    use dispatcher::Dispatcher;
    use mock::MockData;
    use server::parser::parse_head;
    use server::Config;
    use stream::{IoStream, SharedTransport, Transport};
    use super::Request;

    fn request(lp: &Dispatcher, mock: &MockData, head: &[u8]) -> Request {
        let config = Config::new().done();
        let parsed = parse_head(head, &config).unwrap();
        let stream = IoStream::new(mock.clone(), &lp.handle());
        let transport: SharedTransport =
            Rc::new(RefCell::new(Box::new(stream) as Box<Transport>));
        let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:80".parse().unwrap();
        Request::new(parsed, transport, peer, local, config).unwrap()
    }

    #[test]
    fn uri_and_query() {
        let lp = Dispatcher::new().unwrap();
        let mock = MockData::new();
        let req = request(&lp, &mock,
            b"GET /search?q=rust&lang=en&q=http HTTP/1.1\r\n\
              Host: example.com\r\n\r\n");
        assert_eq!(req.uri().as_str(),
            "http://example.com/search?q=rust&lang=en&q=http");
        assert_eq!(req.query().get("q"), Some("rust"));
        assert_eq!(req.query().get_all("q"), vec!["rust", "http"]);
        assert_eq!(req.query().get("lang"), Some("en"));
    }

    #[test]
    fn bound_body_reads_exactly() {
        let mut lp = Dispatcher::new().unwrap();
        let mock = MockData::new();
        let req = request(&lp, &mock,
            b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\n");
        mock.add_input(b"helloEXTRA");
        let reader = req.body().unwrap();
        let (reader, body) = lp.run(::stream::read_to_end(reader)).unwrap();
        assert_eq!(&body[..], b"hello");
        assert!(reader.at_bound());
    }

    #[test]
    fn urlencoded_post_decodes() {
        let mut lp = Dispatcher::new().unwrap();
        let mock = MockData::new();
        let req = request(&lp, &mock,
            b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 12\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\r\n");
        mock.add_input(b"a=1&b=two%20");
        let table = lp.run(req.post()).unwrap();
        assert_eq!(table.get("a"), Some("1"));
        assert_eq!(table.get("b"), Some("two "));
        // memoized: a second call resolves without any input left
        let again = lp.run(req.post()).unwrap();
        assert_eq!(again.get("a"), Some("1"));
    }

    #[test]
    fn post_on_get_is_rejected() {
        let mut lp = Dispatcher::new().unwrap();
        let mock = MockData::new();
        let req = request(&lp, &mock,
            b"GET /x HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(lp.run(req.post()).is_err());
    }

    #[test]
    fn unrecognized_form_is_rejected() {
        let mut lp = Dispatcher::new().unwrap();
        let mock = MockData::new();
        let req = request(&lp, &mock,
            b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\
              Content-Type: application/octet-stream\r\n\r\n");
        mock.add_input(b"abc");
        assert!(lp.run(req.post()).is_err());
    }

    #[test]
    fn expect_continue_is_emitted_before_body_reads() {
        let mut lp = Dispatcher::new().unwrap();
        let mock = MockData::new();
        let req = request(&lp, &mock,
            b"POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\
              Expect: 100-continue\r\n\r\n");
        mock.add_input(b"hello");
        let reader = req.body().unwrap();
        let (_, body) = lp.run(::stream::read_to_end(reader)).unwrap();
        assert_eq!(&body[..], b"hello");
        // give the flusher a turn to push the interim response out
        lp.turn(None);
        assert_eq!(mock.output(), b"HTTP/1.1 100 Continue\r\n\r\n".to_vec());
    }

    #[test]
    fn multipart_post_decodes() {
        let mut lp = Dispatcher::new().unwrap();
        let mock = MockData::new();
        let body: &[u8] = b"--AaB03x\r\n\
            Content-Disposition: form-data; name=\"field\"\r\n\r\n\
            value\r\n\
            --AaB03x--\r\n";
        let head = format!(
            "POST /x HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\
             Content-Type: multipart/form-data; boundary=AaB03x\r\n\r\n",
            body.len());
        let req = request(&lp, &mock, head.as_bytes());
        mock.add_input(body);
        let table = lp.run(req.post()).unwrap();
        assert_eq!(table.get("field"), Some("value"));
    }
}
