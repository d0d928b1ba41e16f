use std::io;
use std::rc::Rc;

use httparse;

use enums::Status;


quick_error! {
    /// Request-level error with its HTTP status mapping
    #[derive(Debug, Clone)]
    pub enum Error {
        /// Peer went away; no response is possible or warranted
        Disconnected {
            description("peer disconnected")
        }
        /// The future driving the request was cancelled
        Cancelled {
            description("request was cancelled")
        }
        /// Request head did not arrive within the configured deadline
        Timeout {
            description("timeout reading request head")
        }
        /// Request head crossed the configured buffer size
        HeadersTooLarge {
            description("request head too large")
        }
        /// Declared or actual body crossed the configured limit
        BodyTooLarge {
            description("request body too large")
        }
        BadRequest(reason: &'static str) {
            description("bad request")
            display("bad request: {}", reason)
        }
        VersionNotSupported {
            description("unsupported HTTP version")
        }
        ParseError(err: httparse::Error) {
            description("malformed request head")
            display("malformed request head: {}", err)
            from()
        }
        /// TLS handshake or record-layer failure on this connection
        Tls(err: ::Error) {
            description("TLS failure")
            display("TLS failure: {}", err)
        }
        Io(err: Rc<io::Error>) {
            description("I/O error")
            display("I/O error: {}", err)
            from(err: io::Error) -> (Rc::new(err))
        }
        /// Application-level failure with an explicit status
        Status(status: Status) {
            description("request failed")
            display("request failed: {} {}", status.code(), status.reason())
        }
        /// Anything else a request handler may report; maps to 503
        Custom(msg: String) {
            description("handler error")
            display("handler error: {}", msg)
            from()
        }
    }
}

impl Error {
    /// The status sent in the error response; `None` closes silently
    pub fn status(&self) -> Option<Status> {
        match *self {
            Error::Disconnected | Error::Cancelled => None,
            Error::Timeout => Some(Status::RequestTimeout),
            Error::HeadersTooLarge | Error::BodyTooLarge => {
                Some(Status::RequestEntityTooLarge)
            }
            Error::BadRequest(..) | Error::ParseError(..) | Error::Tls(..) => {
                Some(Status::BadRequest)
            }
            Error::VersionNotSupported => Some(Status::VersionNotSupported),
            Error::Status(status) => Some(status),
            Error::Io(..) | Error::Custom(..) => {
                Some(Status::ServiceUnavailable)
            }
        }
    }
}

impl From<::Error> for Error {
    fn from(err: ::Error) -> Error {
        match err {
            ::Error::TimedOut => Error::Timeout,
            ::Error::Cancelled => Error::Cancelled,
            ::Error::LimitExceeded => Error::HeadersTooLarge,
            ::Error::Incomplete | ::Error::StreamClosed => Error::Disconnected,
            ::Error::Protocol(msg) => Error::BadRequest(msg),
            ::Error::Tls(..) => Error::Tls(err),
            ::Error::Io(..) if err.is_disconnect() => Error::Disconnected,
            ::Error::Io(e) => Error::Io(e),
        }
    }
}
