//! Byte-limited reader adapter
//!
//! Frames a region of an underlying transport: either exactly `limit`
//! bytes (known `Content-Length` bodies) or at most `limit` bytes (a
//! ceiling under a self-terminating codec such as chunked encoding).

use std::cell::Cell;
use std::cmp::min;
use std::rc::Rc;

use futures::{Async, Poll};

use stream::{SharedTransport, StreamReader, Transport};
use Error;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Exactly `limit` bytes; EOF earlier is an error
    Exact,
    /// Up to `limit` bytes; reading past the ceiling is an error
    AtMost,
}

pub struct BoundedReader {
    src: SharedTransport,
    limit: u64,
    consumed: Rc<Cell<u64>>,
    mode: Mode,
}

/// Cheap observer of a bounded reader's progress
///
/// Lets the body facade ask whether the frame was consumed down to the
/// exact byte even after the reader itself was boxed away.
#[derive(Clone)]
pub struct BoundHandle {
    limit: u64,
    consumed: Rc<Cell<u64>>,
}

impl BoundHandle {
    pub fn at_bound(&self) -> bool {
        self.consumed.get() == self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.consumed.get()
    }
}

impl BoundedReader {
    /// Frame of a known size
    pub fn exact(src: SharedTransport, limit: u64) -> BoundedReader {
        BoundedReader::new(src, limit, Mode::Exact)
    }

    /// Ceiling for a self-terminating reader stacked on top
    pub fn at_most(src: SharedTransport, limit: u64) -> BoundedReader {
        BoundedReader::new(src, limit, Mode::AtMost)
    }

    fn new(src: SharedTransport, limit: u64, mode: Mode) -> BoundedReader {
        BoundedReader {
            src: src,
            limit: limit,
            consumed: Rc::new(Cell::new(0)),
            mode: mode,
        }
    }

    pub fn handle(&self) -> BoundHandle {
        BoundHandle {
            limit: self.limit,
            consumed: self.consumed.clone(),
        }
    }

    fn remaining(&self) -> u64 {
        self.limit - self.consumed.get()
    }

    /// Forwarded `read_until`, counted against the byte limit
    pub fn poll_read_until(&mut self, sep: &[u8], limit: usize)
        -> Poll<Vec<u8>, Error>
    {
        let remaining = self.remaining();
        if remaining == 0 {
            return Err(match self.mode {
                Mode::AtMost => Error::LimitExceeded,
                Mode::Exact => Error::Incomplete,
            });
        }
        let window = min(limit as u64, remaining) as usize;
        let line = try_ready!(
            self.src.borrow_mut().poll_read_until(sep, window));
        self.consumed.set(self.consumed.get() + line.len() as u64);
        Ok(Async::Ready(line))
    }
}

impl StreamReader for BoundedReader {
    fn poll_read(&mut self, buf: &mut [u8]) -> Poll<usize, Error> {
        let remaining = self.remaining();
        if remaining == 0 {
            return match self.mode {
                // the frame is fully delivered
                Mode::Exact => Ok(Async::Ready(0)),
                Mode::AtMost => Err(Error::LimitExceeded),
            };
        }
        let cap = min(buf.len() as u64, remaining) as usize;
        let n = try_ready!(
            self.src.borrow_mut().poll_read(&mut buf[..cap]));
        if n == 0 {
            return match self.mode {
                Mode::Exact => Err(Error::Incomplete),
                Mode::AtMost => Ok(Async::Ready(0)),
            };
        }
        self.consumed.set(self.consumed.get() + n as u64);
        Ok(Async::Ready(n))
    }

    fn at_eof(&self) -> bool {
        match self.mode {
            Mode::Exact => self.remaining() == 0,
            Mode::AtMost => self.remaining() == 0 || self.src.borrow().at_eof(),
        }
    }
}
