//! In-memory transport for tests
//!
//! Behaves like a socket pair driven by the test: input bytes are queued
//! with `add_input`, everything the code under test writes accumulates in
//! `output`.  Reads block (and park the task) while the input is empty and
//! EOF was not announced yet.

use std::cell::RefCell;
use std::io;
use std::io::Write;
use std::rc::Rc;

use futures::task::{self, Task};
use netbuf::Buf;

use net::Io;


#[derive(Clone)]
pub struct MockData {
    inner: Rc<RefCell<MockInner>>,
}

struct MockInner {
    input: Buf,
    eof: bool,
    output: Vec<u8>,
    read_task: Option<Task>,
}

impl MockData {
    pub fn new() -> MockData {
        MockData {
            inner: Rc::new(RefCell::new(MockInner {
                input: Buf::new(),
                eof: false,
                output: Vec::new(),
                read_task: None,
            })),
        }
    }

    /// Queue bytes for the code under test to read
    pub fn add_input<B: AsRef<[u8]>>(&self, data: B) {
        let mut inner = self.inner.borrow_mut();
        inner.input.write_all(data.as_ref())
            .expect("writing into a memory buffer never fails");
        if let Some(task) = inner.read_task.take() {
            task.notify();
        }
    }

    /// Announce end of input
    pub fn mark_eof(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.eof = true;
        if let Some(task) = inner.read_task.take() {
            task.notify();
        }
    }

    /// Everything written so far
    pub fn output(&self) -> Vec<u8> {
        self.inner.borrow().output.clone()
    }
}

impl io::Read for MockData {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if inner.input.len() > 0 {
            let n = ::std::cmp::min(buf.len(), inner.input.len());
            buf[..n].copy_from_slice(&inner.input[..n]);
            inner.input.consume(n);
            Ok(n)
        } else if inner.eof {
            Ok(0)
        } else {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }
}

impl io::Write for MockData {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.borrow_mut().output.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Io for MockData {
    fn need_read(&mut self) {
        self.inner.borrow_mut().read_task = Some(task::current());
    }
    fn need_write(&mut self) {
        unreachable!("mock writes never block");
    }
}
