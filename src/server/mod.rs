//! HTTP server protocol implementation

mod config;
mod connection;
mod error;
mod parser;
mod request;
mod response;

pub use self::config::Config;
pub use self::connection::serve;
pub use self::error::Error;
pub use self::parser::{parse_head, EncodingSet, Head, RequestFlags};
pub use self::request::{BodyReader, Request};
pub use self::response::{Response, ResponseState};

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use futures::{Async, Future, Poll};
use futures::future::ok;
use rustls::ServerConfig;

use dispatcher::Handle;
use future::{Deferred, DeferredFuture};
use net::TcpListener;
use stream::{IoStream, SharedTransport, Transport};
use tls::TlsStream;


/// The application side of the server
///
/// Gets either a parsed request or the reason why no request could be
/// produced on this connection (currently a TLS handshake failure), and
/// returns a future that resolves once the response was produced.
pub trait Service {
    fn call(&self, req: Result<Request, Error>)
        -> Box<Future<Item=(), Error=Error>>;
}

impl<F> Service for F
    where F: Fn(Result<Request, Error>) -> Box<Future<Item=(), Error=Error>>
{
    fn call(&self, req: Result<Request, Error>)
        -> Box<Future<Item=(), Error=Error>>
    {
        (self)(req)
    }
}

/// Externally observable lifecycle of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
    /// Terminal; a closed server cannot be started again
    Closed,
}

type ConnTable = Rc<RefCell<HashMap<(SocketAddr, SocketAddr),
                                    SharedTransport>>>;

struct ServerInner {
    addr: SocketAddr,
    config: Arc<Config>,
    service: Rc<Service>,
    handle: Handle,
    state: ServerState,
    local_addr: Option<SocketAddr>,
    stop: Option<Deferred<()>>,
    idle: Deferred<()>,
    connections: ConnTable,
}

/// An HTTP/1.x server bound to one address
pub struct Server {
    inner: Rc<RefCell<ServerInner>>,
}

impl Clone for Server {
    fn clone(&self) -> Server {
        Server { inner: self.inner.clone() }
    }
}

impl Server {
    pub fn new<S>(addr: SocketAddr, config: Arc<Config>, service: S,
        handle: &Handle)
        -> Server
        where S: Service + 'static
    {
        Server {
            inner: Rc::new(RefCell::new(ServerInner {
                addr: addr,
                config: config,
                service: Rc::new(service),
                handle: handle.clone(),
                state: ServerState::Stopped,
                local_addr: None,
                stop: None,
                idle: Deferred::completed(()),
                connections: Rc::new(RefCell::new(HashMap::new())),
            })),
        }
    }

    pub fn state(&self) -> ServerState {
        self.inner.borrow().state
    }

    /// Address the listener is actually bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.borrow().local_addr
    }

    /// Bind the listening socket and start accepting
    pub fn start(&self) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            ServerState::Stopped => {}
            ServerState::Running => {
                return Err(Error::Custom("server is already running".into()));
            }
            ServerState::Closed => {
                return Err(Error::Custom("server is closed".into()));
            }
        }
        let tls = match inner.config.tls {
            Some(ref options) => {
                Some(options.server_config().map_err(Error::from)?)
            }
            None => None,
        };
        let listener = TcpListener::bind(
            &inner.addr, inner.config.backlog_size, &inner.handle)?;
        inner.local_addr = Some(listener.local_addr()?);
        let stop = Deferred::new();
        let idle = Deferred::new();
        inner.stop = Some(stop.clone());
        inner.idle = idle.clone();
        inner.state = ServerState::Running;
        inner.handle.spawn(AcceptLoop {
            listener: listener,
            stop: stop.future(),
            server: self.inner.clone(),
            tls: tls,
        });
        Ok(())
    }

    /// Stop accepting; connections in flight keep being served
    pub fn stop(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != ServerState::Running {
            return;
        }
        inner.state = ServerState::Stopped;
        if let Some(stop) = inner.stop.take() {
            if stop.is_pending() {
                stop.complete(());
            }
        }
        if inner.idle.is_pending() {
            inner.idle.complete(());
        }
    }

    /// Stop accepting, disconnect every live connection and close for
    /// good
    pub fn close_wait(&self) -> Box<Future<Item=(), Error=Error>> {
        self.stop();
        let mut inner = self.inner.borrow_mut();
        if inner.state == ServerState::Closed {
            return Box::new(ok(()));
        }
        inner.state = ServerState::Closed;
        let connections = inner.connections.borrow_mut()
            .drain().collect::<Vec<_>>();
        for (addr, transport) in connections {
            debug!("dropping connection {}<->{}", addr.0, addr.1);
            transport.borrow_mut().abort();
        }
        Box::new(ok(()))
    }

    /// Resolves once the server is not running any more
    pub fn join(&self) -> Box<Future<Item=(), Error=Error>> {
        let inner = self.inner.borrow();
        if inner.state != ServerState::Running {
            return Box::new(ok(()));
        }
        Box::new(inner.idle.future().from_err())
    }
}

struct AcceptLoop {
    listener: TcpListener,
    stop: DeferredFuture<()>,
    server: Rc<RefCell<ServerInner>>,
    tls: Option<Arc<ServerConfig>>,
}

impl AcceptLoop {
    fn spawn_connection(&mut self, stream: ::net::TcpStream,
        peer: SocketAddr)
    {
        let (config, service, handle, connections) = {
            let server = self.server.borrow();
            (server.config.clone(), server.service.clone(),
             server.handle.clone(), server.connections.clone())
        };
        if let Some(max) = config.max_connections {
            if connections.borrow().len() >= max {
                warn!("connection from {} dropped: connection limit \
                       reached", peer);
                return;
            }
        }
        let local = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                debug!("connection from {} dropped: {}", peer, e);
                return;
            }
        };
        let io = IoStream::new(stream, &handle);
        let (transport, handshake) = match self.tls {
            Some(ref tls_config) => {
                let tls = TlsStream::server(io, tls_config, &handle);
                let handshake = tls.handshake();
                let transport: SharedTransport =
                    Rc::new(RefCell::new(Box::new(tls) as Box<Transport>));
                (transport, Some(handshake))
            }
            None => {
                let transport: SharedTransport =
                    Rc::new(RefCell::new(Box::new(io) as Box<Transport>));
                (transport, None)
            }
        };
        connections.borrow_mut().insert((peer, local), transport.clone());
        let table = connections.clone();
        handle.spawn(
            connection::serve(transport, handshake, peer, local,
                    config, service, handle.clone())
                .then(move |_| {
                    table.borrow_mut().remove(&(peer, local));
                    Ok(())
                }));
    }
}

impl Future for AcceptLoop {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        match self.stop.poll() {
            Ok(Async::NotReady) => {}
            // completed or cancelled: stop accepting either way
            Ok(Async::Ready(())) | Err(..) => return Ok(Async::Ready(())),
        }
        loop {
            match self.listener.poll_accept() {
                Ok(Async::Ready((stream, peer))) => {
                    self.spawn_connection(stream, peer);
                }
                Ok(Async::NotReady) => return Ok(Async::NotReady),
                Err(ref e)
                    if e.kind() == ::std::io::ErrorKind::ConnectionAborted
                => {
                    // the peer went away between accept and now
                    continue;
                }
                Err(e) => {
                    error!("accept loop terminated: {}", e);
                    let mut server = self.server.borrow_mut();
                    if server.state == ServerState::Running {
                        server.state = ServerState::Stopped;
                        server.stop = None;
                        if server.idle.is_pending() {
                            server.idle.complete(());
                        }
                    }
                    return Ok(Async::Ready(()));
                }
            }
        }
    }
}
