//! Response construction and emission
//!
//! A `Response` is a handle shared between the request given to the
//! application and the connection loop that disposes of it afterwards.
//! Methods ensure that everything written to the wire is consistent
//! protocol; calling them in the wrong state is a programmer error and
//! panics.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::SystemTime;

use futures::Future;
use httpdate::HttpDate;

use chunked::ChunkedWriter;
use enums::{Status, Version};
use headers::{self, HeaderTable};
use server::Error;
use stream::{SharedTransport, Transport};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Nothing was sent or recorded yet
    Empty,
    /// Head is composed (and, for the chunked path, on the wire)
    Prepared,
    /// Body bytes are flowing
    Sending,
    Finished,
    /// A write failed; the connection is unusable
    Failed,
    Cancelled,
    /// The application took over the wire format
    Dumb,
}

pub struct Response {
    inner: Rc<RefCell<ResponseInner>>,
}

struct ResponseInner {
    transport: SharedTransport,
    version: Version,
    status: Status,
    headers: HeaderTable,
    keep_alive: bool,
    state: ResponseState,
    chunked: Option<ChunkedWriter>,
}

impl Clone for Response {
    fn clone(&self) -> Response {
        Response { inner: self.inner.clone() }
    }
}

fn compose_head(inner: &ResponseInner, body_len: Option<u64>, chunked: bool)
    -> Vec<u8>
{
    let mut head = Vec::with_capacity(256);
    write!(head, "{} {} {}\r\n",
        inner.version, inner.status.code(), inner.status.reason())
        .expect("writing into a memory buffer never fails");
    write!(head, "Date: {}\r\n", HttpDate::from(SystemTime::now()))
        .expect("writing into a memory buffer never fails");
    let ctype = inner.headers.get("content-type")
        .unwrap_or("text/html; charset=utf-8");
    write!(head, "Content-Type: {}\r\n", ctype)
        .expect("writing into a memory buffer never fails");
    match body_len {
        Some(n) if n > 0 => {
            write!(head, "Content-Length: {}\r\n", n)
                .expect("writing into a memory buffer never fails");
        }
        _ => {}
    }
    if chunked {
        write!(head, "Transfer-Encoding: chunked\r\n")
            .expect("writing into a memory buffer never fails");
    }
    if !inner.headers.contains("connection") {
        let token = if inner.keep_alive { "keep-alive" } else { "close" };
        write!(head, "Connection: {}\r\n", token)
            .expect("writing into a memory buffer never fails");
    }
    for &(ref name, ref value) in inner.headers.iter() {
        let lower = name.to_lowercase();
        match &lower[..] {
            "date" | "content-type" | "content-length" |
            "transfer-encoding" => continue,
            _ => {}
        }
        write!(head, "{}: {}\r\n", headers::title_case(name), value)
            .expect("writing into a memory buffer never fails");
    }
    head.extend_from_slice(b"\r\n");
    head
}

fn error_body(status: Status) -> Vec<u8> {
    format!("<!DOCTYPE html>\r\n<title>{code} {reason}</title>\r\n\
             <h1>{code} {reason}</h1>\r\n",
        code=status.code(), reason=status.reason()).into_bytes()
}

impl Response {
    pub fn new(transport: SharedTransport, version: Version) -> Response {
        Response {
            inner: Rc::new(RefCell::new(ResponseInner {
                transport: transport,
                version: version,
                status: Status::Ok,
                headers: HeaderTable::new(),
                // request construction refines this from the request's
                // own connection headers
                keep_alive: version == Version::Http11,
                state: ResponseState::Empty,
                chunked: None,
            })),
        }
    }

    pub fn state(&self) -> ResponseState {
        self.inner.borrow().state
    }

    pub fn status(&self) -> Status {
        self.inner.borrow().status
    }

    pub fn version(&self) -> Version {
        self.inner.borrow().version
    }

    pub fn keep_alive(&self) -> bool {
        self.inner.borrow().keep_alive
    }

    /// Clearing the flag makes this the last response on the connection
    pub fn set_keep_alive(&self, value: bool) {
        self.inner.borrow_mut().keep_alive = value;
    }

    /// # Panics
    ///
    /// Panics when the head was already composed.
    pub fn set_status(&self, status: Status) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != ResponseState::Empty {
            panic!("called set_status() on a response in state {:?}",
                inner.state);
        }
        inner.status = status;
    }

    /// Append a header; `Date`, `Content-Type` and `Content-Length` are
    /// composed by the response itself and skipped on output
    ///
    /// # Panics
    ///
    /// Panics when the head was already composed.
    pub fn add_header(&self, name: &str, value: &str) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != ResponseState::Empty {
            panic!("called add_header() on a response in state {:?}",
                inner.state);
        }
        inner.headers.add(name, value);
    }

    /// Replace a header
    ///
    /// # Panics
    ///
    /// Panics when the head was already composed.
    pub fn set_header(&self, name: &str, value: &str) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != ResponseState::Empty {
            panic!("called set_header() on a response in state {:?}",
                inner.state);
        }
        inner.headers.set(name, value);
    }

    /// Send a complete fixed-length response
    ///
    /// For statuses that must not carry a body (1xx, 204, 304) the body
    /// and its length header are suppressed.
    ///
    /// # Panics
    ///
    /// Panics unless the response is still empty.
    pub fn send_body(&self, body: &[u8]) -> Box<Future<Item=(), Error=Error>> {
        let fut = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ResponseState::Empty {
                panic!("called send_body() on a response in state {:?}",
                    inner.state);
            }
            if let Some(conn) = inner.headers.get("connection")
                .map(|v| v.to_string())
            {
                if headers::has_token(&conn, "close") {
                    inner.keep_alive = false;
                }
            }
            let denied = inner.status.body_denied();
            let body_len = if denied { None } else { Some(body.len() as u64) };
            let mut bytes = compose_head(&inner, body_len, false);
            inner.state = ResponseState::Prepared;
            if !denied {
                bytes.extend_from_slice(body);
            }
            let fut = inner.transport.borrow_mut().write(&bytes);
            inner.state = ResponseState::Sending;
            fut
        };
        let this = self.clone();
        Box::new(fut.then(move |res| this.after_write(res, true)))
    }

    /// Send headers for a chunked response
    ///
    /// # Panics
    ///
    /// Panics unless the response is still empty.
    pub fn prepare(&self) -> Box<Future<Item=(), Error=Error>> {
        let fut = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ResponseState::Empty {
                panic!("called prepare() on a response in state {:?}",
                    inner.state);
            }
            if let Some(conn) = inner.headers.get("connection")
                .map(|v| v.to_string())
            {
                if headers::has_token(&conn, "close") {
                    inner.keep_alive = false;
                }
            }
            let bytes = compose_head(&inner, None, true);
            let fut = inner.transport.borrow_mut().write(&bytes);
            let writer = ChunkedWriter::new(inner.transport.clone());
            inner.chunked = Some(writer);
            inner.state = ResponseState::Prepared;
            fut
        };
        let this = self.clone();
        Box::new(fut.then(move |res| this.after_write(res, false)))
    }

    /// Send one body chunk
    ///
    /// # Panics
    ///
    /// Panics unless `prepare()` went first.
    pub fn send_chunk(&self, data: &[u8])
        -> Box<Future<Item=(), Error=Error>>
    {
        let fut = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                ResponseState::Prepared | ResponseState::Sending => {}
                ref state => {
                    panic!("called send_chunk() on a response in state {:?}",
                        state);
                }
            }
            inner.state = ResponseState::Sending;
            inner.chunked.as_mut()
                .expect("prepare() allocates the chunked writer")
                .write(data)
        };
        let this = self.clone();
        Box::new(fut.then(move |res| this.after_write(res, false)))
    }

    /// Terminate a chunked response; repeated calls are a no-op
    ///
    /// # Panics
    ///
    /// Panics when the response never was `prepare()`d.
    pub fn finish(&self) -> Box<Future<Item=(), Error=Error>> {
        let fut = {
            let mut inner = self.inner.borrow_mut();
            match inner.state {
                ResponseState::Prepared | ResponseState::Sending |
                ResponseState::Finished => {}
                ref state => {
                    panic!("called finish() on a response in state {:?}",
                        state);
                }
            }
            inner.state = ResponseState::Finished;
            inner.chunked.as_mut()
                .expect("prepare() allocates the chunked writer")
                .finish()
        };
        let this = self.clone();
        Box::new(fut.then(move |res| this.after_write(res, false)))
    }

    /// Status-and-body shortcut; an empty body turns into a tiny status
    /// page
    ///
    /// # Panics
    ///
    /// Panics unless the response is still empty.
    pub fn send_error(&self, status: Status, body: &str)
        -> Box<Future<Item=(), Error=Error>>
    {
        self.set_status(status);
        if body.is_empty() {
            self.send_body(&error_body(status))
        } else {
            self.send_body(body.as_bytes())
        }
    }

    /// Tell the server the application manages the wire format itself
    ///
    /// # Panics
    ///
    /// Panics unless the response is still empty.
    pub fn detach(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != ResponseState::Empty {
            panic!("called detach() on a response in state {:?}", inner.state);
        }
        inner.state = ResponseState::Dumb;
    }

    /// Best-effort error page for the disposal path; unlike `send_error`
    /// it does not insist on a fresh response and always closes the
    /// connection afterwards
    pub fn force_error(&self, status: Status)
        -> Box<Future<Item=(), Error=Error>>
    {
        let fut = {
            let mut inner = self.inner.borrow_mut();
            inner.keep_alive = false;
            inner.status = status;
            let body = error_body(status);
            let mut bytes = compose_head(&inner, Some(body.len() as u64),
                false);
            bytes.extend_from_slice(&body);
            inner.state = ResponseState::Sending;
            let fut = inner.transport.borrow_mut().write(&bytes);
            fut
        };
        let this = self.clone();
        Box::new(fut.then(move |res| this.after_write(res, true)))
    }

    fn after_write(&self, res: Result<(), ::Error>, last: bool)
        -> Result<(), Error>
    {
        let mut inner = self.inner.borrow_mut();
        match res {
            Ok(()) => {
                if last && inner.state == ResponseState::Sending {
                    inner.state = ResponseState::Finished;
                }
                Ok(())
            }
            Err(::Error::Cancelled) => {
                inner.state = ResponseState::Cancelled;
                Err(Error::Cancelled)
            }
            Err(e) => {
                inner.state = ResponseState::Failed;
                Err(e.into())
            }
        }
    }

    /// True when a chunked body was started but not terminated
    pub fn needs_finish(&self) -> bool {
        let inner = self.inner.borrow();
        inner.chunked.as_ref().map_or(false, |w| !w.is_finished())
    }
}
