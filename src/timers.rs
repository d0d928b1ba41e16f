//! Timer futures on top of the dispatcher's deadline heap

use std::time::{Duration, Instant};

use futures::{Async, Future, Poll, Stream};

use dispatcher::{Handle, TimerToken};
use future::{Deferred, DeferredFuture};
use Error;


/// Future that resolves once the given duration elapsed
///
/// Dropping the future disarms the timer.
pub struct Sleep {
    handle: Handle,
    token: TimerToken,
}

/// Future wrapping another future with a deadline
///
/// Whichever side resolves first wins; the loser is disarmed and dropped
/// before the combinator returns, so no orphan timer or future stays
/// behind.
pub struct Deadline<F> {
    fut: Option<F>,
    sleep: Sleep,
}

/// Stream ticking on a fixed grid
///
/// The next deadline is derived from the previous deadline, not from the
/// moment the tick was consumed, so slow consumers do not shift the grid.
pub struct Interval {
    handle: Handle,
    token: TimerToken,
    at: Instant,
    period: Duration,
}

pub fn sleep(handle: &Handle, d: Duration) -> Sleep {
    let at = Instant::now() + d;
    Sleep {
        handle: handle.clone(),
        token: handle.add_timer(at),
    }
}

pub fn deadline<F>(handle: &Handle, f: F, d: Duration) -> Deadline<F>
    where F: Future<Error=Error>
{
    Deadline {
        fut: Some(f),
        sleep: sleep(handle, d),
    }
}

pub fn interval(handle: &Handle, period: Duration) -> Interval {
    let at = Instant::now() + period;
    Interval {
        handle: handle.clone(),
        token: handle.add_timer(at),
        at: at,
        period: period,
    }
}

/// Spawn a task invoking `f` every `period`
///
/// The returned deferred stops the interval when completed (or cancelled).
/// An error returned by the handler terminates the interval and is stored
/// in the deferred.
pub fn add_interval<F>(handle: &Handle, period: Duration, f: F)
    -> Deferred<()>
    where F: FnMut() -> Result<(), Error> + 'static
{
    let stop = Deferred::new();
    handle.spawn(IntervalDriver {
        interval: interval(handle, period),
        f: f,
        stop_fut: stop.future(),
        stop: stop.clone(),
    });
    stop
}

impl Future for Sleep {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        if self.handle.timer_fired(self.token) {
            Ok(Async::Ready(()))
        } else {
            self.handle.timer_park(self.token);
            Ok(Async::NotReady)
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.handle.cancel_timer(self.token);
    }
}

impl<F: Future<Error=Error>> Future for Deadline<F> {
    type Item = F::Item;
    type Error = Error;

    fn poll(&mut self) -> Poll<F::Item, Error> {
        let res = self.fut.as_mut()
            .expect("deadline future polled after resolution")
            .poll()?;
        if let Async::Ready(v) = res {
            return Ok(Async::Ready(v));
        }
        match self.sleep.poll()? {
            Async::Ready(()) => {
                self.fut = None;
                Err(Error::TimedOut)
            }
            Async::NotReady => Ok(Async::NotReady),
        }
    }
}

impl Stream for Interval {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<Option<()>, Error> {
        if !self.handle.timer_fired(self.token) {
            self.handle.timer_park(self.token);
            return Ok(Async::NotReady);
        }
        self.handle.cancel_timer(self.token);
        self.at = self.at + self.period;
        self.token = self.handle.add_timer(self.at);
        Ok(Async::Ready(Some(())))
    }
}

impl Drop for Interval {
    fn drop(&mut self) {
        self.handle.cancel_timer(self.token);
    }
}

struct IntervalDriver<F> {
    interval: Interval,
    f: F,
    stop: Deferred<()>,
    stop_fut: DeferredFuture<()>,
}

impl<F> Future for IntervalDriver<F>
    where F: FnMut() -> Result<(), Error>
{
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        match self.stop_fut.poll() {
            Ok(Async::Ready(())) | Err(_) => return Ok(Async::Ready(())),
            Ok(Async::NotReady) => {}
        }
        loop {
            match self.interval.poll() {
                Ok(Async::NotReady) => return Ok(Async::NotReady),
                Ok(Async::Ready(Some(()))) => {
                    if let Err(e) = (self.f)() {
                        if self.stop.is_pending() {
                            self.stop.fail(e);
                        }
                        return Ok(Async::Ready(()));
                    }
                }
                Ok(Async::Ready(None)) | Err(_) => {
                    return Ok(Async::Ready(()));
                }
            }
        }
    }
}


#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use futures::Stream;
    use futures::future::empty;

    use dispatcher::Dispatcher;
    use Error;
    use super::{deadline, interval, sleep};

    #[test]
    fn sleep_takes_about_right() {
        let mut lp = Dispatcher::new().unwrap();
        let h = lp.handle();
        let start = Instant::now();
        lp.run(sleep(&h, Duration::from_millis(40))).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn deadline_expires() {
        let mut lp = Dispatcher::new().unwrap();
        let h = lp.handle();
        let res = lp.run(
            deadline(&h, empty::<(), Error>(), Duration::from_millis(30)));
        assert!(matches!(res, Err(Error::TimedOut)));
    }

    #[test]
    fn deadline_passes_winner_through() {
        let mut lp = Dispatcher::new().unwrap();
        let h = lp.handle();
        let fast = sleep(&h, Duration::from_millis(10));
        lp.run(deadline(&h, fast, Duration::from_secs(10))).unwrap();
    }

    #[test]
    fn interval_stays_on_grid() {
        let mut lp = Dispatcher::new().unwrap();
        let h = lp.handle();
        let start = Instant::now();
        let ticks = lp.run(
            interval(&h, Duration::from_millis(20)).take(3).collect());
        assert_eq!(ticks.unwrap().len(), 3);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
