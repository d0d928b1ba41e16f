//! TLS transport over a buffered stream
//!
//! The record-layer engine is a `rustls` session.  A single driver task
//! owns the engine and alternates between four duties, exactly one of
//! which can make progress at any instant: pulling ciphertext from the
//! wire, pushing ciphertext to the wire, draining decrypted plaintext to
//! the application buffer, and feeding queued application writes into the
//! engine.  Application reads and writes park until the driver moved.

use std::cell::RefCell;
use std::cmp::min;
use std::collections::VecDeque;
use std::io;
use std::io::{BufReader, Write};
use std::rc::Rc;
use std::sync::Arc;

use futures::{Async, Future, Poll};
use futures::task::{self, Task};
use netbuf::Buf;
use rustls::{self, ClientConfig, ClientSession, ProtocolVersion,
             ServerConfig, ServerSession, Session};
use rustls::internal::pemfile;
use webpki::DNSNameRef;

use dispatcher::Handle;
use future::{Deferred, DeferredFuture};
use net::Io;
use stream::{find, IoStream, StreamReader, Transport};
use Error;


/// Protocol versions selectable for a TLS endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    V1_0,
    V1_1,
    V1_2,
    V1_3,
}

/// Endpoint behavior switches
#[derive(Debug, Clone, Default)]
pub struct TlsFlags {
    /// Skip certificate chain validation (client)
    pub no_verify_host: bool,
    /// Skip host name validation (client)
    pub no_verify_server_name: bool,
    /// Prefer the server's cipher suite order
    pub enforce_server_pref: bool,
    /// Refuse renegotiation (the engine never renegotiates; recorded for
    /// completeness)
    pub no_renegotiation: bool,
    /// Do not require a client certificate
    pub tolerate_no_client_auth: bool,
    /// Abort the handshake when ALPN negotiation fails
    pub fail_on_alpn_mismatch: bool,
}

/// Key material and negotiation bounds for a TLS endpoint
#[derive(Debug, Clone)]
pub struct TlsOptions {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    min_version: TlsVersion,
    max_version: TlsVersion,
    flags: TlsFlags,
}

impl TlsOptions {
    pub fn new() -> TlsOptions {
        TlsOptions {
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            min_version: TlsVersion::V1_1,
            max_version: TlsVersion::V1_2,
            flags: TlsFlags::default(),
        }
    }

    /// PEM encoded certificate chain
    pub fn cert_pem(&mut self, pem: &[u8]) -> &mut Self {
        self.cert_pem = pem.to_vec();
        self
    }

    /// PEM encoded private key, either RSA or PKCS#8
    pub fn key_pem(&mut self, pem: &[u8]) -> &mut Self {
        self.key_pem = pem.to_vec();
        self
    }

    pub fn versions(&mut self, min: TlsVersion, max: TlsVersion) -> &mut Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    pub fn flags(&mut self, flags: TlsFlags) -> &mut Self {
        self.flags = flags;
        self
    }

    fn protocol_versions(&self) -> Vec<ProtocolVersion> {
        let mut min = self.min_version;
        if min < TlsVersion::V1_2 {
            // the engine implements nothing below 1.2
            warn!("TLS versions below 1.2 are not available, \
                   raising the minimum");
            min = TlsVersion::V1_2;
        }
        let mut versions = Vec::new();
        if min <= TlsVersion::V1_2 && self.max_version >= TlsVersion::V1_2 {
            versions.push(ProtocolVersion::TLSv1_2);
        }
        if self.max_version >= TlsVersion::V1_3 {
            versions.push(ProtocolVersion::TLSv1_3);
        }
        versions
    }

    /// Build the engine configuration for the accepting side
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, Error> {
        let certs = pemfile::certs(&mut BufReader::new(&self.cert_pem[..]))
            .map_err(|()| Error::Protocol("invalid certificate PEM"))?;
        if certs.is_empty() {
            return Err(Error::Protocol("no certificates in PEM"));
        }
        let mut keys = pemfile::pkcs8_private_keys(
                &mut BufReader::new(&self.key_pem[..]))
            .map_err(|()| Error::Protocol("invalid private key PEM"))?;
        if keys.is_empty() {
            keys = pemfile::rsa_private_keys(
                    &mut BufReader::new(&self.key_pem[..]))
                .map_err(|()| Error::Protocol("invalid private key PEM"))?;
        }
        let key = match keys.into_iter().next() {
            Some(key) => key,
            None => return Err(Error::Protocol("no private key in PEM")),
        };
        let mut cfg = ServerConfig::new(rustls::NoClientAuth::new());
        cfg.set_single_cert(certs, key);
        cfg.versions = self.protocol_versions();
        if self.flags.enforce_server_pref {
            cfg.ignore_client_order = true;
        }
        Ok(Arc::new(cfg))
    }

    /// Build the engine configuration for the connecting side
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, Error> {
        let mut cfg = ClientConfig::new();
        cfg.versions = self.protocol_versions();
        if !self.cert_pem.is_empty() {
            cfg.root_store
                .add_pem_file(&mut BufReader::new(&self.cert_pem[..]))
                .map_err(|()| Error::Protocol("invalid certificate PEM"))?;
        }
        if self.flags.no_verify_host || self.flags.no_verify_server_name {
            cfg.dangerous()
                .set_certificate_verifier(Arc::new(AcceptAnyCert));
        }
        Ok(Arc::new(cfg))
    }
}

struct AcceptAnyCert;

impl rustls::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(&self,
        _roots: &rustls::RootCertStore,
        _presented_certs: &[rustls::Certificate],
        _dns_name: DNSNameRef,
        _ocsp_response: &[u8])
        -> Result<rustls::ServerCertVerified, rustls::TLSError>
    {
        Ok(rustls::ServerCertVerified::assertion())
    }
}

enum Engine {
    Server(ServerSession),
    Client(ClientSession),
}

impl Engine {
    fn session(&mut self) -> &mut Session {
        match *self {
            Engine::Server(ref mut s) => s,
            Engine::Client(ref mut s) => s,
        }
    }

    fn read_plain(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        match *self {
            Engine::Server(ref mut s) => s.read(buf),
            Engine::Client(ref mut s) => s.read(buf),
        }
    }

    fn write_plain(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Engine::Server(ref mut s) => s.write(buf),
            Engine::Client(ref mut s) => s.write(buf),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Handshake,
    Running,
    Closing,
    Closed,
    Failed,
}

struct TlsWriteItem {
    data: Vec<u8>,
    offset: usize,
    done: Deferred<()>,
}

struct TlsCore<S: Io> {
    engine: Engine,
    lower: IoStream<S>,
    /// ciphertext pulled off the wire, not yet consumed by the engine
    carry: Vec<u8>,
    carry_off: usize,
    /// decrypted data the application did not read yet
    in_plain: Buf,
    eof: bool,
    state: State,
    error: Option<Error>,
    write_items: VecDeque<TlsWriteItem>,
    handshake: Deferred<()>,
    close: Deferred<()>,
    lower_close: Option<DeferredFuture<()>>,
    driver_task: Option<Task>,
    reader_task: Option<Task>,
}

/// Encrypting transport; clones share the engine
pub struct TlsStream<S: Io> {
    core: Rc<RefCell<TlsCore<S>>>,
}

impl<S: Io> Clone for TlsStream<S> {
    fn clone(&self) -> TlsStream<S> {
        TlsStream { core: self.core.clone() }
    }
}

impl<S: Io + 'static> TlsStream<S> {
    /// Accepting endpoint
    pub fn server(lower: IoStream<S>, config: &Arc<ServerConfig>,
        handle: &Handle)
        -> TlsStream<S>
    {
        TlsStream::with_engine(
            Engine::Server(ServerSession::new(config)), lower, handle)
    }

    /// Connecting endpoint
    pub fn client(lower: IoStream<S>, config: &Arc<ClientConfig>,
        hostname: &str, handle: &Handle)
        -> Result<TlsStream<S>, Error>
    {
        let name = DNSNameRef::try_from_ascii_str(hostname)
            .map_err(|()| Error::Protocol("invalid DNS name"))?;
        Ok(TlsStream::with_engine(
            Engine::Client(ClientSession::new(config, name)), lower, handle))
    }

    fn with_engine(engine: Engine, lower: IoStream<S>, handle: &Handle)
        -> TlsStream<S>
    {
        let core = Rc::new(RefCell::new(TlsCore {
            engine: engine,
            lower: lower,
            carry: Vec::new(),
            carry_off: 0,
            in_plain: Buf::new(),
            eof: false,
            state: State::Handshake,
            error: None,
            write_items: VecDeque::new(),
            handshake: Deferred::new(),
            close: Deferred::new(),
            lower_close: None,
            driver_task: None,
            reader_task: None,
        }));
        handle.spawn(Driver { core: core.clone() });
        TlsStream { core: core }
    }
}

impl<S: Io> TlsStream<S> {
    /// Resolves once the first application data may flow
    pub fn handshake(&self) -> DeferredFuture<()> {
        self.core.borrow().handshake.future()
    }

    fn wake_driver(core: &mut TlsCore<S>) {
        if let Some(task) = core.driver_task.take() {
            task.notify();
        }
    }

    fn wake_reader(core: &mut TlsCore<S>) {
        if let Some(task) = core.reader_task.take() {
            task.notify();
        }
    }

    fn fail(core: &mut TlsCore<S>, err: Error) {
        if core.state == State::Failed || core.state == State::Closed {
            return;
        }
        core.state = State::Failed;
        core.error = Some(err.clone());
        for item in core.write_items.drain(..) {
            item.done.fail(Error::StreamClosed);
        }
        if core.handshake.is_pending() {
            core.handshake.fail(err.clone());
        }
        if core.close.is_pending() {
            core.close.fail(err);
        }
        core.carry.clear();
        // flush whatever is queued (alerts included) and drop the socket
        let _ = core.lower.close_wait();
        TlsStream::wake_reader(core);
        TlsStream::wake_driver(core);
    }
}

impl<S: Io> StreamReader for TlsStream<S> {
    fn poll_read(&mut self, buf: &mut [u8]) -> Poll<usize, Error> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        if core.in_plain.len() > 0 {
            let n = min(buf.len(), core.in_plain.len());
            buf[..n].copy_from_slice(&core.in_plain[..n]);
            core.in_plain.consume(n);
            return Ok(Async::Ready(n));
        }
        if let Some(ref e) = core.error {
            return Err(e.clone());
        }
        if core.eof || core.state == State::Closed {
            return Ok(Async::Ready(0));
        }
        core.reader_task = Some(task::current());
        Ok(Async::NotReady)
    }

    fn at_eof(&self) -> bool {
        let core = self.core.borrow();
        (core.eof || core.state == State::Closed ||
         core.state == State::Failed) && core.in_plain.len() == 0
    }
}

impl<S: Io> Transport for TlsStream<S> {
    fn poll_read_until(&mut self, sep: &[u8], limit: usize)
        -> Poll<Vec<u8>, Error>
    {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        let window = min(core.in_plain.len(), limit);
        if let Some(pos) = find(&core.in_plain[..window], sep) {
            let end = pos + sep.len();
            let mut head = vec![0; end];
            head.copy_from_slice(&core.in_plain[..end]);
            core.in_plain.consume(end);
            return Ok(Async::Ready(head));
        }
        if core.in_plain.len() >= limit {
            return Err(Error::LimitExceeded);
        }
        if let Some(ref e) = core.error {
            return Err(e.clone());
        }
        if core.eof || core.state == State::Closed {
            return Err(Error::Incomplete);
        }
        core.reader_task = Some(task::current());
        Ok(Async::NotReady)
    }

    fn write(&mut self, data: &[u8]) -> DeferredFuture<()> {
        let mut core = self.core.borrow_mut();
        match core.state {
            State::Handshake | State::Running => {}
            _ => return Deferred::failed(Error::StreamClosed).future(),
        }
        if data.is_empty() {
            return Deferred::completed(()).future();
        }
        let done = Deferred::new();
        core.write_items.push_back(TlsWriteItem {
            data: data.to_vec(),
            offset: 0,
            done: done.clone(),
        });
        TlsStream::wake_driver(&mut core);
        done.future()
    }

    fn close_wait(&mut self) -> DeferredFuture<()> {
        let mut core = self.core.borrow_mut();
        match core.state {
            State::Handshake | State::Running => {
                core.state = State::Closing;
                TlsStream::wake_driver(&mut core);
            }
            _ => {}
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
        if core.handshake.is_pending() {
            core.handshake.fail(Error::StreamClosed);
        }
        if core.close.is_pending() {
            core.close.complete(());
        }
        core.lower.abort();
        TlsStream::wake_reader(core);
        TlsStream::wake_driver(core);
    }
}

/// The engine-driving task
struct Driver<S: Io> {
    core: Rc<RefCell<TlsCore<S>>>,
}

impl<S: Io> Future for Driver<S> {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        loop {
            match core.state {
                State::Closed | State::Failed => return Ok(Async::Ready(())),
                _ => {}
            }
            let mut progress = false;

            // SENDREC: queued records go down to the wire
            while core.engine.session().wants_write() {
                let mut records = Vec::new();
                match core.engine.session().write_tls(&mut records) {
                    Ok(0) => break,
                    Ok(_) => {
                        // acceptance into the lower buffer is tracked by
                        // the lower stream's own flusher
                        let _ = core.lower.write(&records);
                        progress = true;
                    }
                    Err(e) => {
                        TlsStream::fail(core, e.into());
                        return Ok(Async::Ready(()));
                    }
                }
            }

            // RECVREC: pull ciphertext while the engine asks for it
            if core.carry_off >= core.carry.len() &&
                core.engine.session().wants_read() && !core.eof
            {
                let mut chunk = [0u8; 8192];
                match core.lower.poll_read(&mut chunk) {
                    Ok(Async::Ready(0)) => {
                        core.eof = true;
                        progress = true;
                        if core.state == State::Handshake {
                            TlsStream::fail(core, Error::Incomplete);
                            return Ok(Async::Ready(()));
                        }
                        TlsStream::wake_reader(core);
                    }
                    Ok(Async::Ready(n)) => {
                        core.carry.clear();
                        core.carry.extend_from_slice(&chunk[..n]);
                        core.carry_off = 0;
                        progress = true;
                    }
                    Ok(Async::NotReady) => {}
                    Err(e) => {
                        TlsStream::fail(core, e);
                        return Ok(Async::Ready(()));
                    }
                }
            }
            if core.carry_off < core.carry.len() {
                let consumed = {
                    let mut slice = &core.carry[core.carry_off..];
                    match core.engine.session().read_tls(&mut slice) {
                        Ok(n) => n,
                        Err(e) => {
                            TlsStream::fail(core, e.into());
                            return Ok(Async::Ready(()));
                        }
                    }
                };
                core.carry_off += consumed;
                progress = progress || consumed > 0;
                if let Err(e) = core.engine.session().process_new_packets() {
                    // flush the alert the engine queued for the peer
                    let mut records = Vec::new();
                    if core.engine.session().write_tls(&mut records).is_ok() {
                        let _ = core.lower.write(&records);
                    }
                    TlsStream::fail(core, e.into());
                    return Ok(Async::Ready(()));
                }
            }

            // RECVAPP: move decrypted bytes to the application buffer
            loop {
                let mut chunk = [0u8; 8192];
                match core.engine.read_plain(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        core.in_plain.write_all(&chunk[..n])
                            .expect("writing into a memory buffer \
                                     never fails");
                        progress = true;
                        TlsStream::wake_reader(core);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        break;
                    }
                    Err(ref e)
                        if e.kind() == io::ErrorKind::ConnectionAborted =>
                    {
                        // clean close-notify from the peer
                        core.eof = true;
                        TlsStream::wake_reader(core);
                        break;
                    }
                    Err(e) => {
                        TlsStream::fail(core, e.into());
                        return Ok(Async::Ready(()));
                    }
                }
            }

            // the first SENDAPP transition finishes the handshake
            if core.state == State::Handshake &&
                !core.engine.session().is_handshaking()
            {
                core.state = State::Running;
                if core.handshake.is_pending() {
                    core.handshake.complete(());
                }
                progress = true;
            }

            // SENDAPP: feed queued application writes into the engine;
            // a partially accepted item stays at the head of the queue
            if core.state == State::Running || core.state == State::Closing {
                while let Some(mut item) = core.write_items.pop_front() {
                    match core.engine.write_plain(&item.data[item.offset..]) {
                        Ok(n) => {
                            item.offset += n;
                            progress = progress || n > 0;
                            if item.offset == item.data.len() {
                                item.done.complete(());
                            } else {
                                core.write_items.push_front(item);
                                break;
                            }
                        }
                        Err(ref e)
                            if e.kind() == io::ErrorKind::WouldBlock =>
                        {
                            core.write_items.push_front(item);
                            break;
                        }
                        Err(e) => {
                            item.done.fail(Error::StreamClosed);
                            TlsStream::fail(core, e.into());
                            return Ok(Async::Ready(()));
                        }
                    }
                }
            }

            // shutdown: close-notify, flush, then close the lower stream
            if core.state == State::Closing && core.write_items.is_empty() &&
                !core.engine.session().wants_write()
            {
                if core.lower_close.is_none() {
                    core.engine.session().send_close_notify();
                    if core.engine.session().wants_write() {
                        // emit the alert on the next turn of the loop
                        continue;
                    }
                    core.lower_close = Some(core.lower.close_wait());
                }
                match core.lower_close.as_mut().unwrap().poll() {
                    Ok(Async::Ready(())) | Err(..) => {
                        core.state = State::Closed;
                        core.carry.clear();
                        if core.handshake.is_pending() {
                            core.handshake.fail(Error::StreamClosed);
                        }
                        if core.close.is_pending() {
                            core.close.complete(());
                        }
                        TlsStream::wake_reader(core);
                        return Ok(Async::Ready(()));
                    }
                    Ok(Async::NotReady) => {}
                }
            }

            if !progress {
                core.driver_task = Some(task::current());
                return Ok(Async::NotReady);
            }
        }
    }
}
