//! Chunked transfer coding (RFC 7230 section 4.1)
//!
//! The reader yields the concatenated chunk data and turns into EOF after
//! the terminating zero chunk; trailer fields are consumed and discarded.
//! The writer frames every buffer as one chunk.

use std::cmp::min;

use httparse::{self, parse_chunk_size};

use bounded::BoundedReader;
use future::{Deferred, DeferredFuture};
use stream::{SharedTransport, StreamReader, Transport};
use Error;


/// Upper bound for a `hex-size [; ext] CRLF` line
const MAX_SIZE_LINE: usize = 256;
/// Upper bound for a single trailer field line
const MAX_TRAILER_LINE: usize = 1024;

#[derive(Debug, Clone, Copy)]
enum State {
    /// Expecting a chunk size line
    Size,
    /// Inside chunk data, n bytes left
    Data(u64),
    /// Expecting the CRLF closing a data chunk
    DataCrlf,
    /// After the zero chunk, discarding trailers
    Trailers,
    Done,
}

/// Decoder for a chunked message body
///
/// Sits on top of a `BoundedReader` so the total body, framing included,
/// stays under the configured ceiling.
pub struct ChunkedReader {
    src: BoundedReader,
    state: State,
}

impl ChunkedReader {
    pub fn new(src: BoundedReader) -> ChunkedReader {
        ChunkedReader {
            src: src,
            state: State::Size,
        }
    }
}

impl StreamReader for ChunkedReader {
    fn poll_read(&mut self, buf: &mut [u8]) -> ::futures::Poll<usize, Error> {
        use futures::Async::*;
        loop {
            match self.state {
                State::Done => return Ok(Ready(0)),
                State::Size => {
                    let line = try_ready!(
                        self.src.poll_read_until(b"\r\n", MAX_SIZE_LINE));
                    match parse_chunk_size(&line) {
                        Ok(httparse::Status::Complete((_, 0))) => {
                            self.state = State::Trailers;
                        }
                        Ok(httparse::Status::Complete((_, size))) => {
                            self.state = State::Data(size);
                        }
                        Ok(httparse::Status::Partial) => {
                            return Err(Error::Protocol(
                                "truncated chunk size line"));
                        }
                        Err(..) => {
                            return Err(Error::Protocol("invalid chunk size"));
                        }
                    }
                }
                State::Data(ref mut left) => {
                    let cap = min(buf.len() as u64, *left) as usize;
                    let n = try_ready!(self.src.poll_read(&mut buf[..cap]));
                    if n == 0 {
                        return Err(Error::Incomplete);
                    }
                    *left -= n as u64;
                    if *left == 0 {
                        self.state = State::DataCrlf;
                    }
                    return Ok(Ready(n));
                }
                State::DataCrlf => {
                    match self.src.poll_read_until(b"\r\n", 2) {
                        Ok(NotReady) => return Ok(NotReady),
                        Ok(Ready(..)) => self.state = State::Size,
                        Err(Error::LimitExceeded) | Err(Error::Incomplete) => {
                            return Err(Error::Protocol(
                                "chunk data not closed by CRLF"));
                        }
                        Err(e) => return Err(e),
                    }
                }
                State::Trailers => {
                    let line = try_ready!(
                        self.src.poll_read_until(b"\r\n", MAX_TRAILER_LINE));
                    if line == b"\r\n" {
                        self.state = State::Done;
                        return Ok(Ready(0));
                    }
                }
            }
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.state, State::Done)
    }
}

/// Encoder framing every write as one chunk
pub struct ChunkedWriter {
    transport: SharedTransport,
    finished: bool,
}

pub fn frame(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

impl ChunkedWriter {
    pub fn new(transport: SharedTransport) -> ChunkedWriter {
        ChunkedWriter {
            transport: transport,
            finished: false,
        }
    }

    /// Send one chunk; empty buffers are skipped, a zero-length chunk
    /// would terminate the body
    pub fn write(&mut self, data: &[u8]) -> DeferredFuture<()> {
        if self.finished {
            return Deferred::failed(Error::StreamClosed).future();
        }
        if data.is_empty() {
            return Deferred::completed(()).future();
        }
        self.transport.borrow_mut().write(&frame(data))
    }

    /// Send the terminating zero chunk; repeated calls are a no-op
    pub fn finish(&mut self) -> DeferredFuture<()> {
        if self.finished {
            return Deferred::completed(()).future();
        }
        self.finished = true;
        self.transport.borrow_mut().write(b"0\r\n\r\n")
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}


#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use bounded::BoundedReader;
    use dispatcher::Dispatcher;
    use mock::MockData;
    use stream::{read_to_end, IoStream, SharedTransport, Transport};
    use Error;
    use super::{frame, ChunkedReader};

    fn transport(lp: &Dispatcher, mock: &MockData) -> SharedTransport {
        let stream = IoStream::new(mock.clone(), &lp.handle());
        Rc::new(RefCell::new(Box::new(stream) as Box<Transport>))
    }

    fn decode(input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut lp = Dispatcher::new().unwrap();
        let mock = MockData::new();
        mock.add_input(input);
        mock.mark_eof();
        let t = transport(&lp, &mock);
        let reader = ChunkedReader::new(BoundedReader::at_most(t, 65536));
        lp.run(read_to_end(reader)).map(|(_, body)| body)
    }

    #[test]
    fn two_chunks() {
        let body = decode(
            b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n").unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[test]
    fn trailers_are_discarded() {
        let body = decode(
            b"3\r\nabc\r\n0\r\nExpires: never\r\n\r\n").unwrap();
        assert_eq!(&body[..], b"abc");
    }

    #[test]
    fn chunk_extension_is_ignored() {
        let body = decode(b"4;marker=1\r\nwxyz\r\n0\r\n\r\n").unwrap();
        assert_eq!(&body[..], b"wxyz");
    }

    #[test]
    fn invalid_size_is_protocol_error() {
        match decode(b"zz\r\ndata\r\n0\r\n\r\n") {
            Err(Error::Protocol(..)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_crlf_is_protocol_error() {
        match decode(b"3\r\nabcX\r\n0\r\n\r\n") {
            Err(Error::Protocol(..)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_body_is_incomplete() {
        match decode(b"5\r\nhel") {
            Err(Error::Incomplete) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn frame_format() {
        assert_eq!(frame(b"hello"), b"5\r\nhello\r\n".to_vec());
        assert_eq!(frame(&[0u8; 16][..]),
            [&b"10\r\n"[..], &[0u8; 16][..], b"\r\n"].concat());
    }
}
