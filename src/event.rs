//! Event descriptors in the style of the legacy `struct event` API.
//!
//! An [`Event`] unifies up to two backend watchers behind one handle:
//! an I/O *or* signal watcher, plus an optional timeout. Registering
//! the descriptor with an [`EventBase`](crate::EventBase) arms the
//! watchers; when one fires, the stored callback runs synchronously on
//! the thread driving the loop, with the triggered conditions encoded
//! in the same `EV_*` bits used to request them.
//!
//! Descriptors are single-threaded by design: handles are cheap
//! clones of shared state and are not `Send`.

use crate::base::EventBase;
use crate::error::Error;
use crate::reactor::core::BaseShared;

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Requested/triggered condition: the timeout elapsed.
pub const EV_TIMEOUT: u16 = 0x01;
/// Requested/triggered condition: the descriptor is readable.
pub const EV_READ: u16 = 0x02;
/// Requested/triggered condition: the descriptor is writable.
pub const EV_WRITE: u16 = 0x04;
/// Requested/triggered condition: the watched signal was delivered.
pub const EV_SIGNAL: u16 = 0x08;
/// Keep the descriptor registered across triggers instead of
/// removing it after the first one.
pub const EV_PERSIST: u16 = 0x10;

/// State bit: a timeout is armed.
pub const EVLIST_TIMEOUT: u16 = 0x01;
/// State bit: the descriptor is registered with a base.
pub const EVLIST_INSERTED: u16 = 0x02;
/// State bit: a signal watcher is armed.
pub const EVLIST_SIGNAL: u16 = 0x04;
/// State bit: the descriptor's callback is currently running.
pub const EVLIST_ACTIVE: u16 = 0x08;
/// State bit reserved for internal registrations.
pub const EVLIST_INTERNAL: u16 = 0x10;
/// State bit: the descriptor has been initialized.
pub const EVLIST_INIT: u16 = 0x80;

/// Largest signal number accepted for signal descriptors, SIGRTMAX
/// on Linux.
pub(crate) const MAX_SIGNAL: RawFd = 64;

pub(crate) type Callback = Box<dyn FnMut(&Event, u16)>;

/// An event descriptor.
///
/// Created with [`Event::new`] (or the [`timer`](Event::timer) /
/// [`signal`](Event::signal) shorthands), armed with
/// [`add`](Event::add), disarmed with [`del`](Event::del). `Event` is
/// a cheap handle; clones refer to the same descriptor.
#[derive(Clone)]
pub struct Event {
    pub(crate) inner: Rc<RefCell<Inner>>,
}

/// Shared descriptor state.
///
/// While the descriptor is inserted, the owning base's watch slab and
/// timer queue hold strong references to this; the caller's handles
/// are not what keeps a live registration alive.
pub(crate) struct Inner {
    /// Watched file descriptor, or the signal number for signal
    /// descriptors, or -1 for pure timers.
    pub(crate) fd: RawFd,
    /// Requested conditions (`EV_*` bits).
    pub(crate) events: u16,
    /// Scheduling priority; stored for compatibility, not consulted
    /// by the backend.
    pub(crate) priority: i32,
    /// Conditions of the most recent trigger; meaningful only while
    /// `EVLIST_ACTIVE` is set.
    pub(crate) result: u16,
    /// `EVLIST_*` state bits.
    pub(crate) flags: u16,
    pub(crate) callback: Option<Callback>,
    /// Non-owning back-reference to the base servicing this
    /// descriptor; set by `add`.
    pub(crate) owner: Weak<BaseShared>,
    /// The armed I/O-or-signal watcher, never both.
    pub(crate) watch: Watch,
    /// The armed timeout, independent of `watch`.
    pub(crate) timer: Option<TimerState>,
    /// Relative duration from the most recent `add`, kept around to
    /// re-arm one-shot timers for persistent descriptors.
    pub(crate) timeout: Option<Duration>,
    /// Bumped by every add/del so dispatch can tell whether a
    /// callback re-registered or deleted its own descriptor.
    pub(crate) epoch: u64,
}

/// The I/O-or-signal side of a descriptor, at most one armed.
pub(crate) enum Watch {
    Idle,
    Io { token: u64 },
    Signal { token: u64 },
}

/// An armed timeout.
pub(crate) struct TimerState {
    pub(crate) deadline: Instant,
    /// Shared with the heap entry; setting it retires the entry.
    pub(crate) cancelled: Rc<Cell<bool>>,
}

/// Result of a [`pending`](Event::pending) query.
pub struct Pending {
    /// The queried conditions that are currently armed (or being
    /// dispatched).
    pub events: u16,
    /// Time left until the armed timeout fires, when `EV_TIMEOUT` was
    /// queried and a timeout is armed. Never negative.
    pub timeout: Option<Duration>,
}

impl Event {
    /// Creates a descriptor watching `fd` for the conditions in
    /// `events`.
    ///
    /// For signal descriptors (`EV_SIGNAL`), `fd` carries the signal
    /// number. Pure timers pass `fd = -1` and no condition bits.
    ///
    /// The callback receives the descriptor handle and the triggered
    /// `EV_*` bits; any context it needs is captured by the closure.
    /// It runs synchronously on the thread calling
    /// [`EventBase::run`], and may delete or re-register its own
    /// descriptor.
    pub fn new<F>(fd: RawFd, events: u16, callback: F) -> Event
    where
        F: FnMut(&Event, u16) + 'static,
    {
        Event {
            inner: Rc::new(RefCell::new(Inner {
                fd,
                events,
                priority: 0,
                result: 0,
                flags: EVLIST_INIT,
                callback: Some(Box::new(callback)),
                owner: Weak::new(),
                watch: Watch::Idle,
                timer: None,
                timeout: None,
                epoch: 0,
            })),
        }
    }

    /// Creates a pure timer descriptor.
    pub fn timer<F>(callback: F) -> Event
    where
        F: FnMut(&Event, u16) + 'static,
    {
        Event::new(-1, 0, callback)
    }

    /// Creates a descriptor watching the given signal number.
    pub fn signal<F>(signo: i32, callback: F) -> Event
    where
        F: FnMut(&Event, u16) + 'static,
    {
        Event::new(signo, EV_SIGNAL, callback)
    }

    /// Registers the descriptor with `base`, arming its watchers.
    ///
    /// A timeout, when given, is a relative duration measured from
    /// this call. At least one of an I/O condition, a signal, or a
    /// timeout must be requested.
    ///
    /// Re-adding an inserted descriptor restarts its timeout
    /// countdown and never duplicates the I/O or signal watcher. On
    /// failure the descriptor is left exactly as it was.
    ///
    /// At most one inserted I/O descriptor per file descriptor: a
    /// second insert on the same fd fails with [`Error::Backend`]
    /// (`EEXIST`).
    pub fn add(&self, base: &EventBase, timeout: Option<Duration>) -> Result<(), Error> {
        base.shared
            .insert(&Rc::downgrade(&base.shared), &self.inner, timeout)
    }

    /// Unregisters the descriptor, stopping every live watcher.
    ///
    /// A no-op when the descriptor is not inserted. Safe to call from
    /// inside the descriptor's own callback; no further dispatch
    /// happens for the cancelled registration.
    pub fn del(&self) -> Result<(), Error> {
        let owner = self.inner.borrow().owner.clone();

        match owner.upgrade() {
            Some(shared) => shared.remove(&self.inner),
            None => {
                debug_assert!(
                    self.inner.borrow().flags & EVLIST_INSERTED == 0,
                    "event descriptor outlived the base it was registered with"
                );
            }
        }

        Ok(())
    }

    /// Reports which of the queried `EV_*` conditions are armed,
    /// without side effects.
    ///
    /// When `EV_TIMEOUT` is queried and a timeout is armed, the
    /// remaining duration is reported as well. While the callback is
    /// running, the triggered conditions count as pending.
    pub fn pending(&self, what: u16) -> Pending {
        let inner = self.inner.borrow();
        let mut armed = 0;

        if inner.flags & EVLIST_INSERTED != 0 {
            match inner.watch {
                Watch::Io { .. } => armed |= inner.events & (EV_READ | EV_WRITE),
                Watch::Signal { .. } => armed |= EV_SIGNAL,
                Watch::Idle => {}
            }
            if inner.timer.is_some() {
                armed |= EV_TIMEOUT;
            }
        }

        if inner.flags & EVLIST_ACTIVE != 0 {
            armed |= inner.result;
        }

        let timeout = if what & EV_TIMEOUT != 0 {
            inner
                .timer
                .as_ref()
                .map(|t| t.deadline.saturating_duration_since(Instant::now()))
        } else {
            None
        };

        Pending {
            events: armed & what,
            timeout,
        }
    }

    /// The watched file descriptor (or signal number).
    pub fn fd(&self) -> RawFd {
        self.inner.borrow().fd
    }

    /// The requested `EV_*` condition bits.
    pub fn events(&self) -> u16 {
        self.inner.borrow().events
    }

    /// The `EVLIST_*` state bits.
    pub fn flags(&self) -> u16 {
        self.inner.borrow().flags
    }

    /// The triggered conditions of the most recent dispatch; only
    /// meaningful while the callback is running.
    pub fn result(&self) -> u16 {
        self.inner.borrow().result
    }

    /// The stored scheduling priority.
    pub fn priority(&self) -> i32 {
        self.inner.borrow().priority
    }

    /// Stores a scheduling priority.
    ///
    /// Kept for compatibility with the legacy surface; the backend
    /// dispatches in readiness order regardless. Fails while the
    /// descriptor is being dispatched.
    pub fn set_priority(&self, priority: i32) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();

        if inner.flags & EVLIST_ACTIVE != 0 {
            return Err(Error::InvalidArgument);
        }

        inner.priority = priority;
        Ok(())
    }
}
