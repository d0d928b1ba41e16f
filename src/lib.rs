//! Single-threaded event dispatcher with an HTTP/1.1 server on top
#![recursion_limit="100"]

extern crate httparse;
extern crate httpdate;
extern crate mio;
extern crate netbuf;
extern crate rustls;
extern crate slab;
extern crate socket2;
extern crate url;
extern crate webpki;
#[macro_use] extern crate futures;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;

pub mod bounded;
pub mod chunked;
pub mod mock;
pub mod multipart;
pub mod net;
pub mod server;
pub mod stream;
pub mod tls;
pub mod udp;
mod dispatcher;
mod enums;
mod error;
mod future;
mod headers;
mod timers;

pub use dispatcher::{Dispatcher, Handle, IoToken, TimerToken};
pub use enums::{Method, Status, Version};
pub use error::Error;
pub use future::{CancelAndWait, Deferred, DeferredFuture};
pub use headers::HeaderTable;
pub use timers::{add_interval, deadline, interval, sleep};
pub use timers::{Deadline, Interval, Sleep};
