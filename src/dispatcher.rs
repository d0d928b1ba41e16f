//! The event loop
//!
//! A `Dispatcher` is a single-threaded cooperative scheduler: it owns the
//! OS readiness poll, a heap of monotonic timers and a FIFO of tasks that
//! were woken up.  Everything else in this crate (streams, TLS, the HTTP
//! server) is a future polled by it.
//!
//! The design follows the classic reactor shape: leaf futures attempt their
//! syscall first and park the current task only after observing
//! `WouldBlock`, so edge-triggered readiness can never be lost.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::io;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use std::usize;

use futures::{Async, Future};
use futures::executor::{self, Notify, Spawn};
use futures::task::{self, Task};
use mio::{self, Events, Interest, Token, Waker};
use mio::event::Source;
use slab::Slab;


const WAKER_TOKEN: Token = Token(usize::MAX);

/// Key of an I/O registration inside the dispatcher
#[derive(Debug, Clone, Copy)]
pub struct IoToken(usize);

/// Key of a timer registration inside the dispatcher
///
/// Carries the slot generation so a token that outlived its timer can never
/// touch a reused slot.
#[derive(Debug, Clone, Copy)]
pub struct TimerToken {
    key: usize,
    seq: u64,
}

struct IoSlot {
    reader: Option<Task>,
    writer: Option<Task>,
}

struct TimerSlot {
    seq: u64,
    task: Option<Task>,
    fired: bool,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    at: Instant,
    seq: u64,
    key: usize,
}

type BoxedTask = Spawn<Box<Future<Item=(), Error=()>>>;

struct Inner {
    registry: mio::Registry,
    io: Slab<IoSlot>,
    timer_slots: Slab<TimerSlot>,
    timer_heap: BinaryHeap<Reverse<TimerEntry>>,
    timer_seq: u64,
    // `None` means the task is currently out being polled
    tasks: Slab<Option<BoxedTask>>,
    pending_spawn: Vec<Box<Future<Item=(), Error=()>>>,
}

struct LoopNotify {
    queue: Mutex<VecDeque<usize>>,
    waker: Waker,
}

impl Notify for LoopNotify {
    fn notify(&self, id: usize) {
        self.queue.lock()
            .expect("wake queue is never poisoned")
            .push_back(id);
        let _ = self.waker.wake();
    }
}

/// The single-threaded event loop driving timers, I/O and tasks
pub struct Dispatcher {
    mio: mio::Poll,
    events: Events,
    inner: Rc<RefCell<Inner>>,
    notify: Arc<LoopNotify>,
    main_ready: bool,
}

/// Cheap cloneable reference to the dispatcher
///
/// All runtime objects (sockets, timers, streams) keep one and use it to
/// register themselves.  Using a handle whose dispatcher is dropped is a
/// programmer error and panics.
#[derive(Clone)]
pub struct Handle {
    inner: Weak<RefCell<Inner>>,
}

thread_local!(static CURRENT: RefCell<Option<Handle>> = RefCell::new(None));

impl Dispatcher {
    /// Create a fresh event loop and install it as the thread's current one
    pub fn new() -> io::Result<Dispatcher> {
        let mio = mio::Poll::new()?;
        let registry = mio.registry().try_clone()?;
        let waker = Waker::new(mio.registry(), WAKER_TOKEN)?;
        let inner = Rc::new(RefCell::new(Inner {
            registry: registry,
            io: Slab::new(),
            timer_slots: Slab::new(),
            timer_heap: BinaryHeap::new(),
            timer_seq: 0,
            tasks: Slab::new(),
            pending_spawn: Vec::new(),
        }));
        let handle = Handle { inner: Rc::downgrade(&inner) };
        CURRENT.with(|c| *c.borrow_mut() = Some(handle));
        Ok(Dispatcher {
            mio: mio,
            events: Events::with_capacity(1024),
            inner: inner,
            notify: Arc::new(LoopNotify {
                queue: Mutex::new(VecDeque::new()),
                waker: waker,
            }),
            main_ready: false,
        })
    }

    pub fn handle(&self) -> Handle {
        Handle { inner: Rc::downgrade(&self.inner) }
    }

    /// Run the loop until the given future resolves, returning its result
    pub fn run<F: Future>(&mut self, f: F) -> Result<F::Item, F::Error> {
        let mut main = executor::spawn(f);
        loop {
            match main.poll_future_notify(&self.notify, 0)? {
                Async::Ready(v) => return Ok(v),
                Async::NotReady => {}
            }
            self.main_ready = false;
            while !self.main_ready {
                self.turn(None);
            }
        }
    }

    /// Run the loop forever, serving spawned tasks
    pub fn run_forever(&mut self) {
        loop {
            self.turn(None);
        }
    }

    /// A single iteration of the loop
    ///
    /// Fires every timer that is due (deadline order, ties in insertion
    /// order), waits for OS readiness no longer than `max_wait` (and not at
    /// all when work is already queued), then drains the ready FIFO
    /// completely.  Tasks are popped and polled strictly one at a time.
    pub fn turn(&mut self, max_wait: Option<Duration>) {
        let now = Instant::now();
        self.fire_timers(now);
        self.flush_spawns();

        let timeout = if self.queued_work() {
            Some(Duration::from_millis(0))
        } else {
            let next = self.inner.borrow().next_deadline();
            match (next, max_wait) {
                (Some(at), wait) => {
                    let until = at.checked_duration_since(now)
                        .unwrap_or(Duration::from_millis(0));
                    Some(wait.map_or(until, |w| ::std::cmp::min(until, w)))
                }
                (None, Some(wait)) => Some(wait),
                (None, None) => None,
            }
        };

        match self.mio.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => panic!("poll of the OS selector failed: {}", e),
        }

        let mut woken = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            for ev in self.events.iter() {
                let token = ev.token();
                if token == WAKER_TOKEN {
                    continue;
                }
                if let Some(slot) = inner.io.get_mut(token.0) {
                    if ev.is_readable() || ev.is_read_closed() || ev.is_error() {
                        if let Some(task) = slot.reader.take() {
                            woken.push(task);
                        }
                    }
                    if ev.is_writable() || ev.is_write_closed() || ev.is_error() {
                        if let Some(task) = slot.writer.take() {
                            woken.push(task);
                        }
                    }
                }
            }
        }
        for task in woken {
            task.notify();
        }

        self.fire_timers(Instant::now());
        self.drain();
    }

    fn queued_work(&self) -> bool {
        self.main_ready ||
            !self.notify.queue.lock()
                .expect("wake queue is never poisoned").is_empty() ||
            !self.inner.borrow().pending_spawn.is_empty()
    }

    fn fire_timers(&mut self, now: Instant) {
        let mut woken = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            loop {
                match inner.timer_heap.peek() {
                    Some(&Reverse(ref e)) if e.at <= now => {}
                    _ => break,
                }
                let Reverse(entry) = inner.timer_heap.pop()
                    .expect("peeked entry is there");
                let stale = inner.timer_slots.get(entry.key)
                    .map_or(true, |slot| slot.seq != entry.seq);
                if stale {
                    continue;
                }
                let slot = &mut inner.timer_slots[entry.key];
                slot.fired = true;
                if let Some(task) = slot.task.take() {
                    woken.push(task);
                }
            }
        }
        for task in woken {
            task.notify();
        }
    }

    fn flush_spawns(&mut self) {
        loop {
            let fut = match self.inner.borrow_mut().pending_spawn.pop() {
                Some(f) => f,
                None => return,
            };
            let key = self.inner.borrow_mut().tasks
                .insert(Some(executor::spawn(fut)));
            self.notify.queue.lock()
                .expect("wake queue is never poisoned")
                .push_back(key + 1);
        }
    }

    /// Pop and poll woken tasks until the FIFO is empty
    fn drain(&mut self) {
        loop {
            self.flush_spawns();
            let id = self.notify.queue.lock()
                .expect("wake queue is never poisoned")
                .pop_front();
            let id = match id {
                Some(id) => id,
                None => return,
            };
            if id == 0 {
                self.main_ready = true;
                continue;
            }
            let key = id - 1;
            let mut spawn = {
                let mut inner = self.inner.borrow_mut();
                match inner.tasks.get_mut(key).and_then(|slot| slot.take()) {
                    Some(spawn) => spawn,
                    // spurious wakeup of a finished task
                    None => continue,
                }
            };
            let done = match spawn.poll_future_notify(&self.notify, id) {
                Ok(Async::Ready(())) | Err(()) => true,
                Ok(Async::NotReady) => false,
            };
            let mut inner = self.inner.borrow_mut();
            if done {
                inner.tasks.remove(key);
            } else if let Some(slot) = inner.tasks.get_mut(key) {
                *slot = Some(spawn);
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        CURRENT.with(|c| {
            let ours = c.borrow().as_ref().map_or(false, |h| {
                h.inner.upgrade()
                    .map_or(true, |rc| Rc::ptr_eq(&rc, &self.inner))
            });
            if ours {
                *c.borrow_mut() = None;
            }
        });
    }
}

impl Inner {
    fn next_deadline(&self) -> Option<Instant> {
        // stale heap entries only make the wait too short, never too long
        self.timer_heap.peek().map(|&Reverse(ref e)| e.at)
    }
}

impl Handle {
    /// The handle installed by the most recent `Dispatcher::new` on this
    /// thread
    ///
    /// # Panics
    ///
    /// Panics when no dispatcher was created on the thread.
    pub fn current() -> Handle {
        Handle::try_current().expect("no dispatcher on this thread")
    }

    pub fn try_current() -> Option<Handle> {
        CURRENT.with(|c| c.borrow().clone())
    }

    fn with<R, F: FnOnce(&mut Inner) -> R>(&self, f: F) -> R {
        let inner = self.inner.upgrade().expect("event loop is gone");
        let mut inner = inner.borrow_mut();
        f(&mut inner)
    }

    /// Spawn a background task
    ///
    /// The task is queued and gets its first poll on the next loop
    /// iteration, never inside the caller's stack frame.
    pub fn spawn<F>(&self, f: F)
        where F: Future<Item=(), Error=()> + 'static
    {
        self.with(|inner| inner.pending_spawn.insert(0, Box::new(f)));
    }

    /// Register an I/O source for readiness tracking
    pub fn register<S>(&self, source: &mut S) -> io::Result<IoToken>
        where S: Source + ?Sized
    {
        self.with(|inner| {
            let key = inner.io.insert(IoSlot { reader: None, writer: None });
            let res = inner.registry.register(
                source, Token(key),
                Interest::READABLE | Interest::WRITABLE);
            match res {
                Ok(()) => Ok(IoToken(key)),
                Err(e) => {
                    inner.io.remove(key);
                    Err(e)
                }
            }
        })
    }

    /// Forget an I/O source; safe to call with a dead dispatcher
    pub fn deregister<S>(&self, source: &mut S, token: IoToken)
        where S: Source + ?Sized
    {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.borrow_mut();
            if inner.io.contains(token.0) {
                inner.io.remove(token.0);
            }
            let _ = inner.registry.deregister(source);
        }
    }

    /// Park the current task until the source becomes readable
    pub fn park_reader(&self, token: IoToken) {
        self.with(|inner| {
            inner.io[token.0].reader = Some(task::current());
        })
    }

    /// Park the current task until the source becomes writable
    pub fn park_writer(&self, token: IoToken) {
        self.with(|inner| {
            inner.io[token.0].writer = Some(task::current());
        })
    }

    /// Arm a timer; the dispatcher fires it once `at` is reached
    pub fn add_timer(&self, at: Instant) -> TimerToken {
        self.with(|inner| {
            inner.timer_seq += 1;
            let seq = inner.timer_seq;
            let key = inner.timer_slots.insert(TimerSlot {
                seq: seq,
                task: None,
                fired: false,
            });
            inner.timer_heap.push(Reverse(TimerEntry {
                at: at,
                seq: seq,
                key: key,
            }));
            TimerToken { key: key, seq: seq }
        })
    }

    /// True once the timer's deadline was reached
    pub fn timer_fired(&self, token: TimerToken) -> bool {
        self.with(|inner| {
            inner.timer_slots.get(token.key)
                .map_or(true, |s| s.seq == token.seq && s.fired)
        })
    }

    /// Park the current task until the timer fires
    pub fn timer_park(&self, token: TimerToken) {
        self.with(|inner| {
            if let Some(slot) = inner.timer_slots.get_mut(token.key) {
                if slot.seq == token.seq {
                    slot.task = Some(task::current());
                }
            }
        })
    }

    /// Disarm a timer; the heap entry is invalidated lazily
    pub fn cancel_timer(&self, token: TimerToken) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.borrow_mut();
            let valid = inner.timer_slots.get(token.key)
                .map_or(false, |s| s.seq == token.seq);
            if valid {
                inner.timer_slots.remove(token.key);
            }
        }
    }
}
