//! The per-connection request loop

use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use futures::Future;
use futures::future::{loop_fn, ok, Either, Loop};

use dispatcher::Handle;
use enums::{Status, Version};
use future::DeferredFuture;
use server::parser::parse_head;
use server::request::Request;
use server::response::{Response, ResponseState};
use server::{Config, Error, Service};
use stream::{read_until, SharedTransport, Transport};
use timers::deadline;


#[derive(Clone)]
struct ConnCtx {
    transport: SharedTransport,
    peer: SocketAddr,
    local: SocketAddr,
    config: Arc<Config>,
    service: Rc<Service>,
    handle: Handle,
}

/// Serve requests on an established connection until it has to close
///
/// `handshake`, when present, must resolve before the first request is
/// read; its failure is reported to the service once (best effort) and
/// closes the connection.
pub fn serve(transport: SharedTransport,
    handshake: Option<DeferredFuture<()>>,
    peer: SocketAddr, local: SocketAddr,
    config: Arc<Config>, service: Rc<Service>, handle: Handle)
    -> Box<Future<Item=(), Error=()>>
{
    let ctx = ConnCtx {
        transport: transport,
        peer: peer,
        local: local,
        config: config,
        service: service,
        handle: handle,
    };
    let hs: Box<Future<Item=(), Error=::Error>> = match handshake {
        Some(f) => Box::new(f),
        None => Box::new(ok(())),
    };
    Box::new(hs.then(move |res| {
        match res {
            Err(e) => {
                debug!("connection from {}: TLS handshake failed: {}",
                    ctx.peer, e);
                let transport = ctx.transport.clone();
                Either::A(ctx.service.call(Err(Error::Tls(e)))
                    .then(move |_| {
                        transport.borrow_mut().close_wait()
                            .then(|_| Ok(()))
                    }))
            }
            Ok(()) => {
                let transport = ctx.transport.clone();
                Either::B(loop_fn((), move |()| {
                        let ctx = ctx.clone();
                        one_request(ctx).map(|reuse| {
                            if reuse {
                                Loop::Continue(())
                            } else {
                                Loop::Break(())
                            }
                        })
                    })
                    .then(move |_: Result<(), ()>| {
                        transport.borrow_mut().close_wait()
                            .then(|_| Ok(()))
                    }))
            }
        }
    }))
}

/// Read, dispatch and dispose a single request; resolves to whether the
/// connection may be reused
fn one_request(ctx: ConnCtx) -> Box<Future<Item=bool, Error=()>> {
    let head_fut = deadline(
        &ctx.handle,
        read_until(ctx.transport.clone(), b"\r\n\r\n",
            ctx.config.max_headers_size),
        ctx.config.headers_timeout);
    Box::new(head_fut.then(move |res| -> Box<Future<Item=bool, Error=()>> {
        let head_bytes = match res {
            Ok(bytes) => bytes,
            Err(e) => return error_close(&ctx, head_error(e)),
        };
        let head = match parse_head(&head_bytes, &ctx.config) {
            Ok(head) => head,
            Err(e) => return error_close(&ctx, e),
        };
        let close_requested = head.connection_close;
        let request = match Request::new(head, ctx.transport.clone(),
            ctx.peer, ctx.local, ctx.config.clone())
        {
            Ok(request) => request,
            Err(e) => return error_close(&ctx, e),
        };
        let response = request.response();
        Box::new(ctx.service.call(Ok(request.clone()))
            .then(move |res| dispose(request, response, res,
                close_requested)))
    }))
}

/// Map errors of the head read phase
fn head_error(err: ::Error) -> Error {
    match err {
        ::Error::TimedOut => Error::Timeout,
        ::Error::LimitExceeded => Error::HeadersTooLarge,
        other => other.into(),
    }
}

/// Emit the error response when one is warranted and close
fn error_close(ctx: &ConnCtx, err: Error) -> Box<Future<Item=bool, Error=()>> {
    match err.status() {
        Some(status) => {
            debug!("request error from {}: {}", ctx.peer, err);
            let response = Response::new(
                ctx.transport.clone(), Version::Http11);
            // best effort: a failing error page is not reported
            Box::new(response.force_error(status).then(|_| Ok(false)))
        }
        None => Box::new(ok(false)),
    }
}

/// The disposal table: examine what the application left behind and
/// bring the connection to a well-defined state
fn dispose(request: Request, response: Response,
    result: Result<(), Error>, close_requested: bool)
    -> Box<Future<Item=bool, Error=()>>
{
    // an unterminated chunked body of a successful handler is finished
    // for it; everything else closes as-is
    let flush: Box<Future<Item=(), Error=()>> = match result {
        Ok(()) if response.state() == ResponseState::Sending &&
                  response.needs_finish() => {
            Box::new(response.finish().then(|_| Ok(())))
        }
        _ => Box::new(ok(())),
    };
    let response2 = response.clone();
    Box::new(flush.and_then(move |()| {
        let emit: Box<Future<Item=bool, Error=()>> = match result {
            Ok(()) => match response2.state() {
                ResponseState::Empty => {
                    Box::new(response2.send_error(Status::NotFound, "")
                        .then(|_| Ok(true)))
                }
                ResponseState::Prepared => {
                    Box::new(response2.force_error(Status::Conflict)
                        .then(|_| Ok(false)))
                }
                ResponseState::Finished => Box::new(ok(true)),
                ResponseState::Sending | ResponseState::Failed |
                ResponseState::Cancelled | ResponseState::Dumb => {
                    Box::new(ok(false))
                }
            },
            Err(ref e) => {
                debug!("request handler failed: {}", e);
                match (response2.state(), e.status()) {
                    (ResponseState::Empty, Some(status)) => {
                        Box::new(response2.force_error(status)
                            .then(|_| Ok(false)))
                    }
                    _ => Box::new(ok(false)),
                }
            }
        };
        let response = response2;
        emit.and_then(move |resp_ok| {
            request.finish_body()
                .then(|res| Ok(res.unwrap_or(false)))
                .map(move |body_ok| {
                    resp_ok && body_ok &&
                        response.keep_alive() && !close_requested
                })
        })
    }))
}
