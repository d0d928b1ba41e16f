//! Datagram transport with a queued send path
//!
//! Outgoing datagrams are queued as write vectors and served strictly in
//! FIFO order by a background sender task; each `send_to` resolves when its
//! datagram hit the socket.  Receiving is driven by the consuming future.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;

use futures::{Async, Future, Poll};
use futures::task::{self, Task};

use dispatcher::Handle;
use future::{Deferred, DeferredFuture};
use net::UdpSocket;
use Error;


const MAX_DATAGRAM: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Closing,
    Closed,
}

struct DgramItem {
    data: Vec<u8>,
    addr: SocketAddr,
    done: Deferred<()>,
}

struct DgramCore {
    socket: UdpSocket,
    queue: VecDeque<DgramItem>,
    state: State,
    close: Deferred<()>,
    sender_task: Option<Task>,
}

/// UDP endpoint bound to a local address
pub struct DatagramSocket {
    core: Rc<RefCell<DgramCore>>,
}

/// Future yielding the next incoming datagram
pub struct RecvFrom {
    core: Rc<RefCell<DgramCore>>,
}

impl Clone for DatagramSocket {
    fn clone(&self) -> DatagramSocket {
        DatagramSocket { core: self.core.clone() }
    }
}

impl DatagramSocket {
    pub fn bind(addr: &SocketAddr, handle: &Handle)
        -> Result<DatagramSocket, Error>
    {
        let socket = UdpSocket::bind(addr, handle)?;
        let core = Rc::new(RefCell::new(DgramCore {
            socket: socket,
            queue: VecDeque::new(),
            state: State::Running,
            close: Deferred::new(),
            sender_task: None,
        }));
        handle.spawn(Sender { core: core.clone() });
        Ok(DatagramSocket { core: core })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        let core = self.core.borrow();
        Ok(core.socket.local_addr()?)
    }

    /// Queue a datagram; resolves when it was handed to the socket
    pub fn send_to(&self, data: &[u8], addr: &SocketAddr)
        -> DeferredFuture<()>
    {
        let mut core = self.core.borrow_mut();
        if core.state != State::Running {
            return Deferred::failed(Error::StreamClosed).future();
        }
        let done = Deferred::new();
        core.queue.push_back(DgramItem {
            data: data.to_vec(),
            addr: *addr,
            done: done.clone(),
        });
        if let Some(task) = core.sender_task.take() {
            task.notify();
        }
        done.future()
    }

    /// Wait for the next datagram
    pub fn recv_from(&self) -> RecvFrom {
        RecvFrom { core: self.core.clone() }
    }

    /// Flush the send queue and tear the socket down
    pub fn close_wait(&self) -> DeferredFuture<()> {
        let mut core = self.core.borrow_mut();
        if core.state == State::Running {
            core.state = State::Closing;
            if let Some(task) = core.sender_task.take() {
                task.notify();
            }
        }
        core.close.future()
    }
}

impl Future for RecvFrom {
    type Item = (Vec<u8>, SocketAddr);
    type Error = Error;

    fn poll(&mut self) -> Poll<(Vec<u8>, SocketAddr), Error> {
        let mut core = self.core.borrow_mut();
        if core.state == State::Closed {
            return Err(Error::StreamClosed);
        }
        let mut buf = vec![0; MAX_DATAGRAM];
        let (n, addr) = try_ready!(core.socket.poll_recv_from(&mut buf));
        buf.truncate(n);
        Ok(Async::Ready((buf, addr)))
    }
}

struct Sender {
    core: Rc<RefCell<DgramCore>>,
}

impl Future for Sender {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        loop {
            if core.state == State::Closed {
                return Ok(Async::Ready(()));
            }
            match core.queue.pop_front() {
                Some(item) => {
                    match core.socket.poll_send_to(&item.data, &item.addr) {
                        Ok(Async::Ready(..)) => {
                            item.done.complete(());
                        }
                        Ok(Async::NotReady) => {
                            core.queue.push_front(item);
                            return Ok(Async::NotReady);
                        }
                        Err(e) => {
                            // a refused datagram only fails its own item
                            debug!("datagram send error: {}", e);
                            item.done.fail(e.into());
                        }
                    }
                }
                None => {
                    if core.state == State::Closing {
                        core.state = State::Closed;
                        if core.close.is_pending() {
                            core.close.complete(());
                        }
                        return Ok(Async::Ready(()));
                    }
                    core.sender_task = Some(task::current());
                    return Ok(Async::NotReady);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use dispatcher::Dispatcher;

    use super::DatagramSocket;

    #[test]
    fn datagram_round_trip() {
        let mut lp = Dispatcher::new().unwrap();
        let h = lp.handle();
        let any = "127.0.0.1:0".parse().unwrap();
        let a = DatagramSocket::bind(&any, &h).unwrap();
        let b = DatagramSocket::bind(&any, &h).unwrap();
        let to = b.local_addr().unwrap();
        let send = a.send_to(b"ping", &to);
        let (data, from) = lp.run(b.recv_from()).unwrap();
        assert_eq!(&data[..], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
        lp.run(send).unwrap();
        lp.run(a.close_wait()).unwrap();
    }

    #[test]
    fn sends_are_served_in_order() {
        let mut lp = Dispatcher::new().unwrap();
        let h = lp.handle();
        let any = "127.0.0.1:0".parse().unwrap();
        let a = DatagramSocket::bind(&any, &h).unwrap();
        let b = DatagramSocket::bind(&any, &h).unwrap();
        let to = b.local_addr().unwrap();
        for text in &["one", "two", "three"] {
            a.send_to(text.as_bytes(), &to);
        }
        for text in &["one", "two", "three"] {
            let (data, _) = lp.run(b.recv_from()).unwrap();
            assert_eq!(&data[..], text.as_bytes());
        }
    }
}
