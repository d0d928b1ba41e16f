//! Readiness-driven socket wrappers
//!
//! The wrappers attempt their syscall first and park the current task only
//! on `WouldBlock`; the dispatcher wakes the task on the next readiness
//! transition of the file descriptor.

use std::io;
use std::io::{Read, Write};
use std::net::SocketAddr;

use futures::{Async, Future, Poll, Stream};
use mio;
use socket2::{Domain, Protocol, Socket, Type};

use dispatcher::{Handle, IoToken};
use Error;


/// The transport seam between sockets and the buffered stream layer
///
/// Implemented by `TcpStream` and by in-memory mocks in tests.  `need_read`
/// and `need_write` park the current task until the transport may make
/// progress again; they must only be called right after a `WouldBlock`.
pub trait Io: io::Read + io::Write {
    fn need_read(&mut self);
    fn need_write(&mut self);
}

/// Non-blocking TCP stream registered with a dispatcher
pub struct TcpStream {
    io: mio::net::TcpStream,
    token: IoToken,
    handle: Handle,
}

/// Future returned by `TcpStream::connect`
pub struct TcpConnect {
    stream: Option<TcpStream>,
}

/// Non-blocking TCP listener registered with a dispatcher
pub struct TcpListener {
    io: mio::net::TcpListener,
    token: IoToken,
    handle: Handle,
}

/// Stream of accepted connections
pub struct Incoming {
    listener: TcpListener,
}

/// Non-blocking UDP socket registered with a dispatcher
pub struct UdpSocket {
    io: mio::net::UdpSocket,
    token: IoToken,
    handle: Handle,
}

impl TcpStream {
    pub fn from_mio(mut io: mio::net::TcpStream, handle: &Handle)
        -> io::Result<TcpStream>
    {
        let token = handle.register(&mut io)?;
        Ok(TcpStream {
            io: io,
            token: token,
            handle: handle.clone(),
        })
    }

    /// Start connecting to the address
    pub fn connect(addr: &SocketAddr, handle: &Handle)
        -> io::Result<TcpConnect>
    {
        let io = mio::net::TcpStream::connect(*addr)?;
        Ok(TcpConnect {
            stream: Some(TcpStream::from_mio(io, handle)?),
        })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.io.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.io.local_addr()
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.io.set_nodelay(nodelay)
    }
}

impl io::Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf)
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.io.flush()
    }
}

impl Io for TcpStream {
    fn need_read(&mut self) {
        self.handle.park_reader(self.token);
    }
    fn need_write(&mut self) {
        self.handle.park_writer(self.token);
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.handle.deregister(&mut self.io, self.token);
    }
}

impl Future for TcpConnect {
    type Item = TcpStream;
    type Error = Error;

    fn poll(&mut self) -> Poll<TcpStream, Error> {
        let pending = {
            let stream = self.stream.as_mut()
                .expect("connect future polled after resolution");
            match stream.io.take_error()? {
                Some(e) => return Err(e.into()),
                None => {}
            }
            match stream.io.peer_addr() {
                Ok(_) => false,
                Err(ref e) if e.kind() == io::ErrorKind::NotConnected ||
                              e.kind() == io::ErrorKind::WouldBlock => true,
                Err(e) => return Err(e.into()),
            }
        };
        if pending {
            self.stream.as_mut().unwrap().need_write();
            Ok(Async::NotReady)
        } else {
            Ok(Async::Ready(self.stream.take().unwrap()))
        }
    }
}

impl TcpListener {
    /// Bind a listening socket with an explicit accept backlog
    pub fn bind(addr: &SocketAddr, backlog: i32, handle: &Handle)
        -> io::Result<TcpListener>
    {
        let domain = match *addr {
            SocketAddr::V4(..) => Domain::IPV4,
            SocketAddr::V6(..) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&(*addr).into())?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;
        let std_listener: ::std::net::TcpListener = socket.into();
        let mut io = mio::net::TcpListener::from_std(std_listener);
        let token = handle.register(&mut io)?;
        Ok(TcpListener {
            io: io,
            token: token,
            handle: handle.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.io.local_addr()
    }

    pub fn poll_accept(&mut self) -> Poll<(TcpStream, SocketAddr), io::Error> {
        loop {
            match self.io.accept() {
                Ok((stream, addr)) => {
                    let stream = TcpStream::from_mio(stream, &self.handle)?;
                    return Ok(Async::Ready((stream, addr)));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.handle.park_reader(self.token);
                    return Ok(Async::NotReady);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    pub fn incoming(self) -> Incoming {
        Incoming { listener: self }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.handle.deregister(&mut self.io, self.token);
    }
}

impl Stream for Incoming {
    type Item = (TcpStream, SocketAddr);
    type Error = io::Error;

    fn poll(&mut self) -> Poll<Option<(TcpStream, SocketAddr)>, io::Error> {
        let pair = try_ready!(self.listener.poll_accept());
        Ok(Async::Ready(Some(pair)))
    }
}

impl UdpSocket {
    pub fn bind(addr: &SocketAddr, handle: &Handle) -> io::Result<UdpSocket> {
        let mut io = mio::net::UdpSocket::bind(*addr)?;
        let token = handle.register(&mut io)?;
        Ok(UdpSocket {
            io: io,
            token: token,
            handle: handle.clone(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.io.local_addr()
    }

    pub fn poll_send_to(&mut self, buf: &[u8], target: &SocketAddr)
        -> Poll<usize, io::Error>
    {
        match self.io.send_to(buf, *target) {
            Ok(n) => Ok(Async::Ready(n)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.handle.park_writer(self.token);
                Ok(Async::NotReady)
            }
            Err(e) => Err(e),
        }
    }

    pub fn poll_recv_from(&mut self, buf: &mut [u8])
        -> Poll<(usize, SocketAddr), io::Error>
    {
        match self.io.recv_from(buf) {
            Ok((n, addr)) => Ok(Async::Ready((n, addr))),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.handle.park_reader(self.token);
                Ok(Async::NotReady)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        self.handle.deregister(&mut self.io, self.token);
    }
}
