use std::io;
use std::rc::Rc;

use rustls::TLSError;


quick_error! {
    /// Error type shared by the event loop, timers and stream layers
    ///
    /// The enum is `Clone` (I/O and TLS payloads are reference counted) so
    /// that a failed future can re-raise the same error to every waiter.
    #[derive(Debug, Clone)]
    pub enum Error {
        Io(err: Rc<io::Error>) {
            description("I/O error")
            display("I/O error: {}", err)
            from(err: io::Error) -> (Rc::new(err))
        }
        Tls(err: Rc<TLSError>) {
            description("TLS error")
            display("TLS error: {}", err)
            from(err: TLSError) -> (Rc::new(err))
        }
        /// The future was cancelled before producing a result
        Cancelled {
            description("future is cancelled")
        }
        /// A deadline elapsed before the wrapped future resolved
        TimedOut {
            description("timed out")
        }
        /// `read_until` crossed its byte limit without finding the separator
        LimitExceeded {
            description("limit exceeded")
        }
        /// End of stream in the middle of an expected unit of data
        Incomplete {
            description("incomplete data before end of stream")
        }
        /// Peer violated the framing rules of the protocol spoken on the
        /// stream (chunk sizes, TLS records)
        Protocol(msg: &'static str) {
            description("protocol error")
            display("protocol error: {}", msg)
        }
        /// The stream was closed while the operation was still queued
        StreamClosed {
            description("stream closed")
        }
    }
}

impl Error {
    /// True for errors that mean the peer is gone rather than misbehaving
    pub fn is_disconnect(&self) -> bool {
        match *self {
            Error::Io(ref e) => {
                matches!(e.kind(),
                    io::ErrorKind::ConnectionReset |
                    io::ErrorKind::ConnectionAborted |
                    io::ErrorKind::BrokenPipe |
                    io::ErrorKind::UnexpectedEof)
            }
            _ => false,
        }
    }
}
