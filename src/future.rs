//! A write-once result cell with ordered wakeups and cooperative
//! cancellation
//!
//! `Deferred` is the pairing point between a producer (an I/O loop, a timer,
//! a protocol coroutine) and any number of consumers.  Consumers either park
//! their task via a `DeferredFuture` handle or register a plain callback;
//! both are released in registration order on the first terminal transition.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use futures::{Async, Future, Poll};
use futures::future::lazy;
use futures::task::{self, Task};

use dispatcher::Handle;
use Error;


/// Result slot that can be completed, failed or cancelled exactly once
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

/// Consumer handle; polls to the deferred result
///
/// Every clone of the deferred may hand out any number of these.  A waiter
/// that is dropped before the transition simply gives up its wakeup slot.
pub struct DeferredFuture<T> {
    inner: Rc<RefCell<Inner<T>>>,
    slot: Option<usize>,
}

/// Future returned by `Deferred::cancel_and_wait`
pub struct CancelAndWait<T> {
    inner: Rc<RefCell<Inner<T>>>,
    slot: Option<usize>,
    issued: bool,
}

enum State<T> {
    Pending,
    Done(Result<T, Error>),
    Cancelled,
}

struct Inner<T> {
    state: State<T>,
    waiters: Vec<Option<Task>>,
    callbacks: Vec<Option<Box<FnMut()>>>,
    on_cancel: Option<Box<FnMut()>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Deferred<T> {
        Deferred { inner: self.inner.clone() }
    }
}

impl<T> Deferred<T> {
    pub fn new() -> Deferred<T> {
        Deferred {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                waiters: Vec::new(),
                callbacks: Vec::new(),
                on_cancel: None,
            })),
        }
    }

    /// Shortcut for a deferred that is already completed
    pub fn completed(value: T) -> Deferred<T> {
        let d = Deferred::new();
        d.complete(value);
        d
    }

    /// Shortcut for a deferred that is already failed
    pub fn failed(err: Error) -> Deferred<T> {
        let d = Deferred::new();
        d.fail(err);
        d
    }

    /// Resolve with a value
    ///
    /// # Panics
    ///
    /// Panics if the deferred is not pending any more.  Completing twice is
    /// a programmer error, not a runtime condition.
    pub fn complete(&self, value: T) {
        self.transition(State::Done(Ok(value)));
    }

    /// Resolve with an error
    ///
    /// # Panics
    ///
    /// Same rules as `complete`.
    pub fn fail(&self, err: Error) {
        self.transition(State::Done(Err(err)));
    }

    /// Request cancellation
    ///
    /// If the producer installed an `on_cancel` hook it is invoked (once)
    /// and the producer is expected to drive the deferred to a terminal
    /// state itself.  Without a hook a pending deferred transitions straight
    /// to cancelled.  Cancelling a terminal deferred is a no-op.
    pub fn cancel(&self) {
        let hook = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.on_cancel.take()
        };
        match hook {
            Some(mut hook) => hook(),
            None => self.transition(State::Cancelled),
        }
    }

    /// Install the producer-side cancellation hook
    pub fn on_cancel<F: FnOnce() + 'static>(&self, f: F) {
        let mut f = Some(f);
        self.inner.borrow_mut().on_cancel =
            Some(Box::new(move || if let Some(f) = f.take() { f() }));
    }

    /// Issue `cancel` and resolve once the deferred is terminal
    pub fn cancel_and_wait(&self) -> CancelAndWait<T> {
        CancelAndWait {
            inner: self.inner.clone(),
            slot: None,
            issued: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// Register a callback fired on the terminal transition
    ///
    /// Callbacks registered while pending run in registration order, after
    /// every parked task has been notified.  Returns a token for
    /// `remove_callback`.  Registering on an already terminal deferred runs
    /// the callback right away.
    pub fn add_callback<F: FnOnce() + 'static>(&self, f: F) -> usize {
        let mut f = Some(f);
        let mut boxed: Box<FnMut()> =
            Box::new(move || if let Some(f) = f.take() { f() });
        let terminal = {
            let mut inner = self.inner.borrow_mut();
            if matches!(inner.state, State::Pending) {
                inner.callbacks.push(Some(boxed));
                return inner.callbacks.len() - 1;
            }
            true
        };
        debug_assert!(terminal);
        schedule(&mut boxed);
        // tokens of late registrations are never stored
        ::std::usize::MAX
    }

    /// Drop a callback registered with `add_callback`
    pub fn remove_callback(&self, token: usize) -> bool {
        let mut inner = self.inner.borrow_mut();
        match inner.callbacks.get_mut(token) {
            Some(slot) => slot.take().is_some(),
            None => false,
        }
    }

    /// Consumer handle implementing `Future`
    pub fn future(&self) -> DeferredFuture<T> {
        DeferredFuture {
            inner: self.inner.clone(),
            slot: None,
        }
    }

    fn transition(&self, target: State<T>) {
        let (waiters, callbacks) = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                panic!("future already finished");
            }
            inner.state = target;
            inner.on_cancel = None;
            (mem::replace(&mut inner.waiters, Vec::new()),
             mem::replace(&mut inner.callbacks, Vec::new()))
        };
        for task in waiters {
            if let Some(task) = task {
                task.notify();
            }
        }
        for cb in callbacks {
            if let Some(mut cb) = cb {
                schedule(&mut cb);
            }
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// Read the terminal result
    ///
    /// # Panics
    ///
    /// Panics when the deferred is still pending; reading an unresolved
    /// future is a programmer error.
    pub fn read(&self) -> Result<T, Error> {
        match self.inner.borrow().state {
            State::Pending => panic!("future is still pending"),
            State::Done(ref result) => result.clone(),
            State::Cancelled => Err(Error::Cancelled),
        }
    }
}

/// Run the callback through the dispatcher's ready queue when one is
/// around, so it never executes in the middle of the producer's own call
/// stack.  Without a dispatcher (plain unit tests) it runs inline.
fn schedule(cb: &mut Box<FnMut()>) {
    match Handle::try_current() {
        Some(handle) => {
            let mut cb = mem::replace(cb, Box::new(|| ()));
            handle.spawn(lazy(move || {
                cb();
                Ok(())
            }));
        }
        None => cb(),
    }
}

fn park(waiters: &mut Vec<Option<Task>>, slot: &mut Option<usize>) {
    match *slot {
        Some(idx) => waiters[idx] = Some(task::current()),
        None => {
            waiters.push(Some(task::current()));
            *slot = Some(waiters.len() - 1);
        }
    }
}

impl<T: Clone> Future for DeferredFuture<T> {
    type Item = T;
    type Error = Error;

    fn poll(&mut self) -> Poll<T, Error> {
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            State::Pending => {
                park(&mut inner.waiters, &mut self.slot);
                Ok(Async::NotReady)
            }
            State::Done(Ok(ref v)) => Ok(Async::Ready(v.clone())),
            State::Done(Err(ref e)) => Err(e.clone()),
            State::Cancelled => Err(Error::Cancelled),
        }
    }
}

impl<T> Drop for DeferredFuture<T> {
    fn drop(&mut self) {
        if let Some(idx) = self.slot {
            // the waiter list is drained wholesale on the terminal
            // transition, so the slot may be gone already
            let mut inner = self.inner.borrow_mut();
            if idx < inner.waiters.len() {
                inner.waiters[idx] = None;
            }
        }
    }
}

impl<T> Future for CancelAndWait<T> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        if !self.issued {
            self.issued = true;
            Deferred { inner: self.inner.clone() }.cancel();
        }
        let mut inner = self.inner.borrow_mut();
        match inner.state {
            State::Pending => {
                park(&mut inner.waiters, &mut self.slot);
                Ok(Async::NotReady)
            }
            _ => Ok(Async::Ready(())),
        }
    }
}

impl<T> Drop for CancelAndWait<T> {
    fn drop(&mut self) {
        if let Some(idx) = self.slot {
            let mut inner = self.inner.borrow_mut();
            if idx < inner.waiters.len() {
                inner.waiters[idx] = None;
            }
        }
    }
}


#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use Error;
    use super::Deferred;

    #[test]
    fn read_completed() {
        let d = Deferred::new();
        d.complete(7u32);
        assert_eq!(d.read().unwrap(), 7);
        // stays terminal, may be read again
        assert_eq!(d.read().unwrap(), 7);
    }

    #[test]
    #[should_panic(expected="future already finished")]
    fn double_complete() {
        let d = Deferred::new();
        d.complete(1u32);
        d.complete(2u32);
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let d = Deferred::<u32>::new();
        for i in 0..4 {
            let order = order.clone();
            d.add_callback(move || order.borrow_mut().push(i));
        }
        d.complete(0);
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn removed_callback_does_not_fire() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let d = Deferred::<u32>::new();
        let o1 = order.clone();
        d.add_callback(move || o1.borrow_mut().push(1));
        let o2 = order.clone();
        let tok = d.add_callback(move || o2.borrow_mut().push(2));
        assert!(d.remove_callback(tok));
        d.complete(0);
        assert_eq!(*order.borrow(), vec![1]);
    }

    #[test]
    fn cancel_without_hook() {
        let d = Deferred::<u32>::new();
        d.cancel();
        assert!(d.is_cancelled());
        assert!(matches!(d.read(), Err(Error::Cancelled)));
    }

    #[test]
    fn cancel_hook_may_complete() {
        let d = Deferred::<u32>::new();
        let d2 = d.clone();
        d.on_cancel(move || d2.complete(99));
        d.cancel();
        assert_eq!(d.read().unwrap(), 99);
    }

    #[test]
    fn cancel_is_idempotent() {
        let hits = Rc::new(RefCell::new(0));
        let d = Deferred::<u32>::new();
        let h = hits.clone();
        let d2 = d.clone();
        d.on_cancel(move || {
            *h.borrow_mut() += 1;
            d2.fail(Error::Cancelled);
        });
        d.cancel();
        d.cancel();
        assert_eq!(*hits.borrow(), 1);
    }
}
