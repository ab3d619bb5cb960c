use crate::base::{LoopExit, LoopMode};
use crate::error::Error;
use crate::event::{
    Callback, EV_PERSIST, EV_READ, EV_SIGNAL, EV_TIMEOUT, EV_WRITE, EVLIST_ACTIVE,
    EVLIST_INSERTED, EVLIST_SIGNAL, EVLIST_TIMEOUT, Event, Inner, MAX_SIGNAL, TimerState, Watch,
};
use crate::reactor::event::Readiness;
use crate::reactor::poller::Poller;
use crate::reactor::poller::common::Interest;
use crate::reactor::timer::TimerEntry;
use crate::utils::Slab;

use std::cell::{Cell, RefCell};
use std::collections::BinaryHeap;
use std::mem;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Shared loop state: poller, registrations, timer queue.
///
/// One `BaseShared` backs every clone of an
/// [`EventBase`](crate::EventBase) handle. Descriptors reference it
/// weakly; it must outlive every inserted descriptor.
pub(crate) struct BaseShared {
    poller: RefCell<Poller>,

    /// Registrations with a live I/O or signal watcher, by token.
    watches: RefCell<Slab<Rc<RefCell<Inner>>>>,

    /// Pending timeouts, earliest deadline first.
    timers: RefCell<BinaryHeap<TimerEntry>>,

    /// Number of descriptors currently inserted.
    inserted: Cell<usize>,

    /// Set by `stop()`; makes `run` return after the current turn.
    stopped: Cell<bool>,
}

impl BaseShared {
    pub(crate) fn new() -> Result<Self, Error> {
        let poller = Poller::new()?;

        Ok(Self {
            poller: RefCell::new(poller),
            watches: RefCell::new(Slab::new()),
            timers: RefCell::new(BinaryHeap::new()),
            inserted: Cell::new(0),
            stopped: Cell::new(false),
        })
    }

    /// Number of descriptors currently inserted.
    pub(crate) fn live(&self) -> usize {
        self.inserted.get()
    }

    /// The registration half of `Event::add`.
    ///
    /// Validates the request, arms the I/O-or-signal watcher and the
    /// timeout, and marks the descriptor inserted. A failed arm rolls
    /// back completely, leaving the descriptor untouched.
    pub(crate) fn insert(
        &self,
        owner: &Weak<BaseShared>,
        event: &Rc<RefCell<Inner>>,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let mut inner = event.borrow_mut();

        let wants_signal = inner.events & EV_SIGNAL != 0;
        let wants_io = !wants_signal && inner.fd >= 0 && inner.events & (EV_READ | EV_WRITE) != 0;

        if wants_signal && inner.events & (EV_READ | EV_WRITE) != 0 {
            return Err(Error::InvalidArgument);
        }
        if wants_signal && !(0 < inner.fd && inner.fd <= MAX_SIGNAL) {
            return Err(Error::InvalidArgument);
        }
        if !wants_signal && !wants_io && timeout.is_none() {
            return Err(Error::InvalidArgument);
        }

        if inner.flags & EVLIST_INSERTED != 0 {
            if !Weak::ptr_eq(&inner.owner, owner) {
                return Err(Error::InvalidArgument);
            }

            // re-add: restart the countdown, never duplicate the watcher
            if let Some(duration) = timeout {
                inner.timeout = Some(duration);
                self.arm_timer(event, &mut inner, duration);
            }
            inner.result = 0;
            inner.epoch += 1;

            return Ok(());
        }

        if wants_io {
            let interest = Interest {
                read: inner.events & EV_READ != 0,
                write: inner.events & EV_WRITE != 0,
            };

            let token = self.watches.borrow_mut().insert(event.clone());
            if let Err(err) = self.poller.borrow().register(inner.fd, token, interest) {
                self.watches.borrow_mut().remove(token);
                return Err(Error::Backend(err));
            }
            inner.watch = Watch::Io { token };
        } else if wants_signal {
            let token = self.watches.borrow_mut().insert(event.clone());
            if let Err(err) = self.poller.borrow_mut().register_signal(inner.fd, token) {
                self.watches.borrow_mut().remove(token);
                return Err(Error::Backend(err));
            }
            inner.watch = Watch::Signal { token };
            inner.flags |= EVLIST_SIGNAL;
        }

        // nothing below can fail; the descriptor only takes on new
        // state once insertion is certain
        inner.owner = owner.clone();

        match timeout {
            Some(duration) => {
                inner.timeout = Some(duration);
                self.arm_timer(event, &mut inner, duration);
            }
            None => inner.timeout = None,
        }

        inner.flags |= EVLIST_INSERTED;
        inner.result = 0;
        inner.epoch += 1;
        self.inserted.set(self.inserted.get() + 1);

        Ok(())
    }

    /// The removal half of `Event::del`, also used for the implicit
    /// delete of non-persistent descriptors.
    ///
    /// Stops every live sub-watcher; a no-op when not inserted.
    pub(crate) fn remove(&self, event: &Rc<RefCell<Inner>>) {
        let mut inner = event.borrow_mut();

        if inner.flags & EVLIST_INSERTED == 0 {
            return;
        }

        match mem::replace(&mut inner.watch, Watch::Idle) {
            Watch::Io { token } => {
                self.poller.borrow().deregister(inner.fd);
                self.watches.borrow_mut().remove(token);
            }
            Watch::Signal { token } => {
                self.poller.borrow_mut().deregister_signal(inner.fd, token);
                self.watches.borrow_mut().remove(token);
            }
            Watch::Idle => {}
        }

        if let Some(timer) = inner.timer.take() {
            timer.cancelled.set(true);
        }

        inner.flags &= !(EVLIST_INSERTED | EVLIST_ACTIVE | EVLIST_TIMEOUT | EVLIST_SIGNAL);
        inner.epoch += 1;
        self.inserted.set(self.inserted.get() - 1);
    }

    /// Schedules (or reschedules) the descriptor's timeout.
    ///
    /// The previous heap entry, if any, is retired through its
    /// cancellation flag rather than removed.
    fn arm_timer(&self, event: &Rc<RefCell<Inner>>, inner: &mut Inner, duration: Duration) {
        if let Some(timer) = inner.timer.take() {
            timer.cancelled.set(true);
        }

        let deadline = Instant::now() + duration;
        let cancelled = Rc::new(Cell::new(false));

        self.timers.borrow_mut().push(TimerEntry {
            deadline,
            event: event.clone(),
            cancelled: cancelled.clone(),
        });

        inner.timer = Some(TimerState {
            deadline,
            cancelled,
        });
        inner.flags |= EVLIST_TIMEOUT;
    }

    pub(crate) fn stop(&self) {
        self.stopped.set(true);
        self.poller.borrow().wake();
    }

    /// Rebuild the backend after a process fork.
    ///
    /// Recreates the poller's kernel resources, then re-registers
    /// every live I/O watch; signal watches are re-armed by the
    /// poller itself.
    pub(crate) fn reinit(&self) -> Result<(), Error> {
        let mut poller = self.poller.borrow_mut();
        poller.reinit()?;

        let watches = self.watches.borrow();
        for (token, event) in watches.iter() {
            let inner = event.borrow();
            if let Watch::Io { .. } = inner.watch {
                let interest = Interest {
                    read: inner.events & EV_READ != 0,
                    write: inner.events & EV_WRITE != 0,
                };
                poller.register(inner.fd, token, interest)?;
            }
        }

        Ok(())
    }

    /// Drives the loop: poll, expire timers, dispatch readiness.
    pub(crate) fn run(&self, mode: LoopMode) -> Result<LoopExit, Error> {
        self.stopped.set(false);
        let mut ready = Vec::with_capacity(64);

        loop {
            if self.inserted.get() == 0 {
                return Ok(LoopExit::Drained);
            }

            let timeout = self
                .timers
                .borrow()
                .peek()
                .map(|t| t.deadline.saturating_duration_since(Instant::now()));

            self.poller.borrow_mut().poll(&mut ready, timeout)?;

            self.expire_timers();
            for readiness in ready.drain(..) {
                self.dispatch_ready(readiness);
            }

            if self.stopped.get() {
                return Ok(LoopExit::Stopped);
            }
            if let LoopMode::Once = mode {
                return Ok(LoopExit::Cycled);
            }
        }
    }

    /// Dispatches every timer whose deadline has passed, skipping
    /// cancelled entries.
    fn expire_timers(&self) {
        let now = Instant::now();

        loop {
            let entry = {
                let mut timers = self.timers.borrow_mut();
                if !timers.peek().is_some_and(|t| t.deadline <= now) {
                    break;
                }
                timers.pop()
            };

            let Some(entry) = entry else { break };

            if entry.cancelled.get() {
                continue;
            }

            self.dispatch(&entry.event, EV_TIMEOUT);
        }
    }

    /// Translates one poller readiness report into a dispatch.
    fn dispatch_ready(&self, readiness: Readiness) {
        let event = self.watches.borrow().get(readiness.token).cloned();
        let Some(event) = event else {
            // removed by an earlier callback in this batch
            return;
        };

        let result = {
            let inner = event.borrow();
            match inner.watch {
                Watch::Signal { token } if token == readiness.token => EV_SIGNAL,
                Watch::Io { token } if token == readiness.token => {
                    let mut result = 0;
                    if readiness.readable {
                        result |= EV_READ;
                    }
                    if readiness.writable {
                        result |= EV_WRITE;
                    }
                    result & inner.events
                }
                _ => 0,
            }
        };

        if result != 0 {
            self.dispatch(&event, result);
        }
    }

    /// The trampoline between backend watchers and the legacy-shaped
    /// callback.
    ///
    /// In order: settle the paired timeout, mark the descriptor
    /// active with its triggered conditions, run the callback, then
    /// apply the post-callback contract (implicit delete for
    /// non-persistent descriptors, timer re-arm for persistent timed
    /// ones) unless the callback already changed the registration
    /// itself.
    fn dispatch(&self, event: &Rc<RefCell<Inner>>, result: u16) {
        let mut callback: Option<Callback>;
        let epoch;

        {
            let mut inner = event.borrow_mut();

            if inner.flags & EVLIST_INSERTED == 0 {
                return;
            }

            if result & EV_TIMEOUT != 0 {
                // the armed timeout is what fired
                inner.timer = None;
                inner.flags &= !EVLIST_TIMEOUT;
            } else if inner.timer.is_some() {
                if inner.events & EV_PERSIST != 0 {
                    // a trigger restarts the paired inactivity timeout
                    if let Some(duration) = inner.timeout {
                        self.arm_timer(event, &mut inner, duration);
                    }
                } else {
                    if let Some(timer) = inner.timer.take() {
                        timer.cancelled.set(true);
                    }
                    inner.flags &= !EVLIST_TIMEOUT;
                }
            }

            inner.flags |= EVLIST_ACTIVE;
            inner.result = result;
            epoch = inner.epoch;
            callback = inner.callback.take();
        }

        let handle = Event {
            inner: event.clone(),
        };
        if let Some(cb) = callback.as_mut() {
            cb(&handle, result);
        }

        let rearm = {
            let mut inner = event.borrow_mut();

            if callback.is_some() {
                inner.callback = callback;
            }
            inner.flags &= !EVLIST_ACTIVE;

            if inner.epoch != epoch {
                // the callback deleted or re-registered the
                // descriptor; its state is authoritative
                false
            } else if inner.events & EV_PERSIST == 0 {
                drop(inner);
                self.remove(event);
                false
            } else {
                // backend timers are one-shot; persistent timed
                // descriptors need a fresh countdown
                result & EV_TIMEOUT != 0
            }
        };

        if rearm {
            let mut inner = event.borrow_mut();
            if let Some(duration) = inner.timeout {
                self.arm_timer(event, &mut inner, duration);
            }
        }
    }
}
