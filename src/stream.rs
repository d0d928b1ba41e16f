//! Buffered byte streams over a raw transport
//!
//! `IoStream` owns the socket plus an input and an output buffer.  Writes
//! are queued as items with a completion deferred and served strictly in
//! FIFO order by a background flusher task; a write resolves exactly when
//! its bytes were accepted by the layer below.  Reads are driven by the
//! consuming future directly.  EOF is sticky.

use std::cell::RefCell;
use std::cmp::min;
use std::collections::VecDeque;
use std::io;
use std::io::Write;
use std::rc::Rc;

use futures::{Async, Future, Poll};
use futures::task::{self, Task};
use netbuf::Buf;

use dispatcher::Handle;
use future::{Deferred, DeferredFuture};
use net::Io;
use Error;


/// Byte source every reader layer implements
///
/// `poll_read` returns `Ready(0)` exactly at end of stream.
pub trait StreamReader {
    fn poll_read(&mut self, buf: &mut [u8]) -> Poll<usize, Error>;
    fn at_eof(&self) -> bool;
}

/// Full duplex seam an HTTP connection talks to (plain or TLS)
pub trait Transport: StreamReader {
    /// Read until the separator is matched, inclusive
    ///
    /// Fails with `LimitExceeded` when no match ends within `limit` bytes
    /// and with `Incomplete` on EOF before a match.  Bytes after the
    /// separator stay buffered for the next read.
    fn poll_read_until(&mut self, sep: &[u8], limit: usize)
        -> Poll<Vec<u8>, Error>;
    /// Queue bytes for sending; resolves when they were accepted by the
    /// layer below
    fn write(&mut self, data: &[u8]) -> DeferredFuture<()>;
    /// Flush pending writes, signal EOF to the reader and resolve when the
    /// stream is fully closed.  Idempotent.
    fn close_wait(&mut self) -> DeferredFuture<()>;
    /// Immediate teardown; queued writes fail with "stream closed"
    fn abort(&mut self);
}

/// Shared handle to a boxed transport
pub type SharedTransport = Rc<RefCell<Box<Transport>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    /// close requested, flush still pending
    Closing,
    Closed,
    Failed,
}

struct WriteItem {
    watermark: u64,
    done: Deferred<()>,
}

struct StreamCore<S> {
    socket: S,
    in_buf: Buf,
    out_buf: Buf,
    eof: bool,
    state: State,
    error: Option<Error>,
    enqueued: u64,
    flushed: u64,
    write_items: VecDeque<WriteItem>,
    writer_task: Option<Task>,
    close: Deferred<()>,
}

/// Buffered duplex stream; cheap to clone, all clones share the buffers
pub struct IoStream<S: Io> {
    core: Rc<RefCell<StreamCore<S>>>,
}

impl<S: Io> Clone for IoStream<S> {
    fn clone(&self) -> IoStream<S> {
        IoStream { core: self.core.clone() }
    }
}

impl<S: Io + 'static> IoStream<S> {
    /// Wrap a socket and spawn the write-flushing task on the dispatcher
    pub fn new(socket: S, handle: &Handle) -> IoStream<S> {
        let core = Rc::new(RefCell::new(StreamCore {
            socket: socket,
            in_buf: Buf::new(),
            out_buf: Buf::new(),
            eof: false,
            state: State::Running,
            error: None,
            enqueued: 0,
            flushed: 0,
            write_items: VecDeque::new(),
            writer_task: None,
            close: Deferred::new(),
        }));
        handle.spawn(Flusher { core: core.clone() });
        IoStream { core: core }
    }
}

impl<S: Io> IoStream<S> {
    /// Bytes currently buffered on the input side
    pub fn in_buffered(&self) -> usize {
        self.core.borrow().in_buf.len()
    }

    /// Bytes accepted but not yet flushed to the socket
    pub fn out_buffered(&self) -> usize {
        self.core.borrow().out_buf.len()
    }

    fn wake_flusher(core: &mut StreamCore<S>) {
        if let Some(task) = core.writer_task.take() {
            task.notify();
        }
    }

    fn fail(core: &mut StreamCore<S>, err: Error) {
        if core.state == State::Failed || core.state == State::Closed {
            return;
        }
        core.state = State::Failed;
        core.error = Some(err.clone());
        for item in core.write_items.drain(..) {
            item.done.fail(Error::StreamClosed);
        }
        if core.close.is_pending() {
            core.close.fail(err);
        }
        IoStream::wake_flusher(core);
    }
}

impl<S: Io> StreamReader for IoStream<S> {
    fn poll_read(&mut self, buf: &mut [u8]) -> Poll<usize, Error> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        loop {
            if let Some(ref e) = core.error {
                return Err(e.clone());
            }
            if core.in_buf.len() > 0 {
                let n = min(buf.len(), core.in_buf.len());
                buf[..n].copy_from_slice(&core.in_buf[..n]);
                core.in_buf.consume(n);
                return Ok(Async::Ready(n));
            }
            if core.eof || core.state != State::Running {
                return Ok(Async::Ready(0));
            }
            match core.in_buf.read_from(&mut core.socket) {
                Ok(0) => {
                    core.eof = true;
                    return Ok(Async::Ready(0));
                }
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    core.socket.need_read();
                    return Ok(Async::NotReady);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let err: Error = e.into();
                    IoStream::fail(core, err.clone());
                    return Err(err);
                }
            }
        }
    }

    fn at_eof(&self) -> bool {
        let core = self.core.borrow();
        (core.eof || core.state != State::Running) && core.in_buf.len() == 0
    }
}

impl<S: Io> Transport for IoStream<S> {
    fn poll_read_until(&mut self, sep: &[u8], limit: usize)
        -> Poll<Vec<u8>, Error>
    {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        loop {
            if let Some(ref e) = core.error {
                return Err(e.clone());
            }
            let window = min(core.in_buf.len(), limit);
            if let Some(pos) = find(&core.in_buf[..window], sep) {
                let end = pos + sep.len();
                let mut head = vec![0; end];
                head.copy_from_slice(&core.in_buf[..end]);
                core.in_buf.consume(end);
                return Ok(Async::Ready(head));
            }
            if core.in_buf.len() >= limit {
                return Err(Error::LimitExceeded);
            }
            if core.eof || core.state != State::Running {
                return Err(Error::Incomplete);
            }
            match core.in_buf.read_from(&mut core.socket) {
                Ok(0) => core.eof = true,
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    core.socket.need_read();
                    return Ok(Async::NotReady);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let err: Error = e.into();
                    IoStream::fail(core, err.clone());
                    return Err(err);
                }
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> DeferredFuture<()> {
        let mut core = self.core.borrow_mut();
        if core.state != State::Running {
            return Deferred::failed(Error::StreamClosed).future();
        }
        if data.is_empty() {
            return Deferred::completed(()).future();
        }
        core.out_buf.write_all(data)
            .expect("writing into a memory buffer never fails");
        core.enqueued += data.len() as u64;
        let done = Deferred::new();
        let watermark = core.enqueued;
        core.write_items.push_back(WriteItem {
            watermark: watermark,
            done: done.clone(),
        });
        IoStream::wake_flusher(&mut core);
        done.future()
    }

    fn close_wait(&mut self) -> DeferredFuture<()> {
        let mut core = self.core.borrow_mut();
        if core.state == State::Running {
            core.state = State::Closing;
            IoStream::wake_flusher(&mut core);
        }
        core.close.future()
    }

    fn abort(&mut self) {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        if core.state == State::Closed || core.state == State::Failed {
            return;
        }
        core.state = State::Closed;
        for item in core.write_items.drain(..) {
            item.done.fail(Error::StreamClosed);
        }
        if core.close.is_pending() {
            core.close.complete(());
        }
        IoStream::wake_flusher(core);
    }
}

/// Background task flushing the output buffer
struct Flusher<S: Io> {
    core: Rc<RefCell<StreamCore<S>>>,
}

impl<S: Io> Future for Flusher<S> {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        loop {
            match core.state {
                State::Closed | State::Failed => return Ok(Async::Ready(())),
                State::Running | State::Closing => {}
            }
            while core.out_buf.len() > 0 {
                match core.socket.write(&core.out_buf[..]) {
                    Ok(0) => {
                        IoStream::fail(core,
                            io::Error::from(io::ErrorKind::WriteZero).into());
                        return Ok(Async::Ready(()));
                    }
                    Ok(n) => {
                        core.out_buf.consume(n);
                        core.flushed += n as u64;
                        while core.write_items.front()
                            .map_or(false, |i| i.watermark <= core.flushed)
                        {
                            let item = core.write_items.pop_front().unwrap();
                            item.done.complete(());
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        core.socket.need_write();
                        return Ok(Async::NotReady);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        IoStream::fail(core, e.into());
                        return Ok(Async::Ready(()));
                    }
                }
            }
            if core.state == State::Closing {
                let _ = core.socket.flush();
                core.state = State::Closed;
                if core.close.is_pending() {
                    core.close.complete(());
                }
                return Ok(Async::Ready(()));
            }
            // idle; the next write wakes us up
            core.writer_task = Some(task::current());
            return Ok(Async::NotReady);
        }
    }
}

impl StreamReader for SharedTransport {
    fn poll_read(&mut self, buf: &mut [u8]) -> Poll<usize, Error> {
        self.borrow_mut().poll_read(buf)
    }
    fn at_eof(&self) -> bool {
        self.borrow().at_eof()
    }
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Future reading exactly `n` bytes, or up to EOF if the stream is shorter
pub struct ReadExact<R> {
    reader: Option<R>,
    buf: Vec<u8>,
    done: usize,
}

/// Future reading at least one byte; an empty buffer means EOF
pub struct ReadOnce<R> {
    reader: Option<R>,
    cap: usize,
}

/// Future collecting the whole stream
pub struct ReadToEnd<R> {
    reader: Option<R>,
    buf: Vec<u8>,
}

/// Future discarding the stream to EOF
pub struct Consume<R> {
    reader: Option<R>,
    discarded: u64,
}

pub fn read_exact<R: StreamReader>(reader: R, n: usize) -> ReadExact<R> {
    ReadExact {
        reader: Some(reader),
        buf: vec![0; n],
        done: 0,
    }
}

pub fn read_once<R: StreamReader>(reader: R, cap: usize) -> ReadOnce<R> {
    ReadOnce {
        reader: Some(reader),
        cap: cap,
    }
}

pub fn read_to_end<R: StreamReader>(reader: R) -> ReadToEnd<R> {
    ReadToEnd {
        reader: Some(reader),
        buf: Vec::new(),
    }
}

pub fn consume_to_eof<R: StreamReader>(reader: R) -> Consume<R> {
    Consume {
        reader: Some(reader),
        discarded: 0,
    }
}

impl<R: StreamReader> Future for ReadExact<R> {
    type Item = (R, Vec<u8>);
    type Error = Error;

    fn poll(&mut self) -> Poll<(R, Vec<u8>), Error> {
        loop {
            let n = {
                let reader = self.reader.as_mut()
                    .expect("read future polled after resolution");
                if self.done == self.buf.len() {
                    0
                } else {
                    try_ready!(reader.poll_read(&mut self.buf[self.done..]))
                }
            };
            if n == 0 {
                self.buf.truncate(self.done);
                let mut buf = Vec::new();
                ::std::mem::swap(&mut buf, &mut self.buf);
                return Ok(Async::Ready((self.reader.take().unwrap(), buf)));
            }
            self.done += n;
        }
    }
}

impl<R: StreamReader> Future for ReadOnce<R> {
    type Item = (R, Vec<u8>);
    type Error = Error;

    fn poll(&mut self) -> Poll<(R, Vec<u8>), Error> {
        let mut buf = vec![0; self.cap];
        let n = {
            let reader = self.reader.as_mut()
                .expect("read future polled after resolution");
            try_ready!(reader.poll_read(&mut buf))
        };
        buf.truncate(n);
        Ok(Async::Ready((self.reader.take().unwrap(), buf)))
    }
}

impl<R: StreamReader> Future for ReadToEnd<R> {
    type Item = (R, Vec<u8>);
    type Error = Error;

    fn poll(&mut self) -> Poll<(R, Vec<u8>), Error> {
        let mut chunk = [0u8; 4096];
        loop {
            let n = {
                let reader = self.reader.as_mut()
                    .expect("read future polled after resolution");
                try_ready!(reader.poll_read(&mut chunk))
            };
            if n == 0 {
                let mut buf = Vec::new();
                ::std::mem::swap(&mut buf, &mut self.buf);
                return Ok(Async::Ready((self.reader.take().unwrap(), buf)));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl<R: StreamReader> Future for Consume<R> {
    type Item = (R, u64);
    type Error = Error;

    fn poll(&mut self) -> Poll<(R, u64), Error> {
        let mut chunk = [0u8; 4096];
        loop {
            let n = {
                let reader = self.reader.as_mut()
                    .expect("read future polled after resolution");
                try_ready!(reader.poll_read(&mut chunk))
            };
            if n == 0 {
                return Ok(Async::Ready(
                    (self.reader.take().unwrap(), self.discarded)));
            }
            self.discarded += n as u64;
        }
    }
}

/// Future form of `Transport::poll_read_until` over a shared transport
pub struct ReadUntil {
    transport: SharedTransport,
    sep: Vec<u8>,
    limit: usize,
}

pub fn read_until(transport: SharedTransport, sep: &[u8], limit: usize)
    -> ReadUntil
{
    ReadUntil {
        transport: transport,
        sep: sep.to_vec(),
        limit: limit,
    }
}

impl Future for ReadUntil {
    type Item = Vec<u8>;
    type Error = Error;

    fn poll(&mut self) -> Poll<Vec<u8>, Error> {
        self.transport.borrow_mut().poll_read_until(&self.sep, self.limit)
    }
}
