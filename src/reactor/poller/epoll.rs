//! Linux `epoll`-based poller implementation.
//!
//! This module provides the Linux backend for the reactor.
//!
//! Responsibilities:
//! - Register file descriptors with read/write interests
//! - Block waiting for I/O readiness
//! - Demultiplex Unix signals through an internal `signalfd`
//! - Support timer-driven wakeups via poll timeouts
//! - Recreate every kernel resource after a process fork
//!
//! This backend is selected automatically on Linux targets.

use super::common::{Interest, Waker};
use super::unix::{sys_close, sys_read, sys_write};
use crate::reactor::event::Readiness;

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLLERR, EPOLLHUP,
    EPOLLIN, EPOLLOUT, SFD_CLOEXEC, SFD_NONBLOCK, SIG_BLOCK, SIG_UNBLOCK, c_int, epoll_create1,
    epoll_ctl, epoll_event, epoll_wait, eventfd, pthread_sigmask, sigaddset, sigdelset,
    sigemptyset, signalfd, signalfd_siginfo, sigset_t,
};
use std::collections::HashMap;
use std::io;
use std::mem::{self, MaybeUninit};
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

/// Name of this backend, reported through the introspection surface.
pub(crate) const METHOD: &str = "epoll";

/// Reserved token used internally for the wake-up event.
///
/// This value must never collide with tokens produced by the slab;
/// a slab token only reaches this range after billions of removals
/// of the topmost slot.
const WAKE_TOKEN: u64 = u64::MAX;

/// Reserved token used internally for the signal descriptor.
const SIGNAL_TOKEN: u64 = u64::MAX - 1;

/// Linux `epoll` poller.
///
/// This poller owns:
/// - an `epoll` instance,
/// - an internal `eventfd` used as a wake-up signal,
/// - a lazily created `signalfd` fanning signals out to registrations,
/// - a reusable event buffer.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Reusable buffer for epoll events.
    events: Vec<epoll_event>,

    /// Waker wrapping the internal eventfd.
    waker: Waker,

    /// Signal demultiplexing state.
    signals: SignalFd,
}

/// Signal watch bookkeeping shared by the whole poller.
///
/// One `signalfd` serves every watched signal; its mask is the union
/// of all registered signal numbers and grows/shrinks with them.
struct SignalFd {
    /// The signalfd, or -1 while no signal is watched.
    fd: RawFd,

    /// Signals currently covered by the fd and blocked in the thread.
    mask: sigset_t,

    /// Tokens registered for each signal number.
    watchers: HashMap<c_int, Vec<u64>>,
}

impl Waker {
    /// Wake the poller.
    ///
    /// This writes to the internal `eventfd`, causing `epoll_wait`
    /// to return immediately.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        sys_write(self.0, &buf.to_ne_bytes());
    }
}

fn empty_sigset() -> sigset_t {
    unsafe {
        let mut set = MaybeUninit::<sigset_t>::zeroed();
        sigemptyset(set.as_mut_ptr());
        set.assume_init()
    }
}

impl EpollPoller {
    /// Create a new `EpollPoller`.
    ///
    /// This:
    /// - creates the epoll instance,
    /// - creates a non-blocking `eventfd`,
    /// - registers the eventfd into epoll as a persistent wake source.
    ///
    /// On failure nothing is left open.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_fd = unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            sys_close(epoll);
            return Err(err);
        }

        let poller = Self {
            epoll,
            events: Vec::with_capacity(64),
            waker: Waker(wake_fd),
            signals: SignalFd {
                fd: -1,
                mask: empty_sigset(),
                watchers: HashMap::new(),
            },
        };

        if let Err(err) = poller.ctl_add(wake_fd, WAKE_TOKEN, Interest { read: true, write: false })
        {
            // fds are closed by the Drop impl
            return Err(err);
        }

        Ok(poller)
    }

    /// Wake a blocking [`poll`](Self::poll) call.
    pub(crate) fn wake(&self) {
        self.waker.wake();
    }

    fn ctl_add(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut flags = 0;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Register a file descriptor with the poller.
    pub(crate) fn register(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl_add(fd, token, interest)
    }

    /// Remove a file descriptor from the poller.
    pub(crate) fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, ptr::null_mut());
        }
    }

    /// Register a token for a signal number.
    ///
    /// The first watcher of a signal adds it to the signalfd mask and
    /// blocks normal delivery in the calling thread; further watchers
    /// share the existing arrangement.
    pub(crate) fn register_signal(&mut self, signo: c_int, token: u64) -> io::Result<()> {
        let first = self
            .signals
            .watchers
            .get(&signo)
            .is_none_or(|tokens| tokens.is_empty());

        if first {
            unsafe { sigaddset(&mut self.signals.mask, signo) };

            if let Err(err) = self.refresh_signalfd() {
                unsafe { sigdelset(&mut self.signals.mask, signo) };
                return Err(err);
            }

            let rc = unsafe { pthread_sigmask(SIG_BLOCK, &self.signals.mask, ptr::null_mut()) };
            debug_assert_eq!(rc, 0);
        }

        self.signals.watchers.entry(signo).or_default().push(token);

        Ok(())
    }

    /// Remove a token from a signal number.
    ///
    /// The last watcher of a signal shrinks the signalfd mask and
    /// unblocks the signal again.
    pub(crate) fn deregister_signal(&mut self, signo: c_int, token: u64) {
        let Some(tokens) = self.signals.watchers.get_mut(&signo) else {
            return;
        };

        tokens.retain(|t| *t != token);

        if tokens.is_empty() {
            self.signals.watchers.remove(&signo);
            unsafe { sigdelset(&mut self.signals.mask, signo) };

            let mut one = empty_sigset();
            unsafe {
                sigaddset(&mut one, signo);
                pthread_sigmask(SIG_UNBLOCK, &one, ptr::null_mut());
            }

            if self.signals.fd >= 0 {
                // shrink the kernel-side mask; failure only costs spurious reads
                unsafe { signalfd(self.signals.fd, &self.signals.mask, SFD_NONBLOCK | SFD_CLOEXEC) };
            }
        }
    }

    /// Create the signalfd, or update its mask in place.
    fn refresh_signalfd(&mut self) -> io::Result<()> {
        let fd = unsafe { signalfd(self.signals.fd, &self.signals.mask, SFD_NONBLOCK | SFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        if self.signals.fd < 0 {
            if let Err(err) = self.ctl_add(fd, SIGNAL_TOKEN, Interest { read: true, write: false })
            {
                sys_close(fd);
                return Err(err);
            }
            self.signals.fd = fd;
        }

        Ok(())
    }

    /// Tear down and recreate every kernel resource after a fork.
    ///
    /// Epoll instances, eventfds and signalfds are not safely shared
    /// with the parent; the child must call this before polling again.
    /// File descriptor registrations are re-added by the caller.
    pub(crate) fn reinit(&mut self) -> io::Result<()> {
        // invalidate each field as it is closed; an error return
        // below must not leave stale fd numbers for `Drop`
        sys_close(self.epoll);
        self.epoll = -1;
        sys_close(self.waker.0);
        self.waker.0 = -1;
        if self.signals.fd >= 0 {
            sys_close(self.signals.fd);
            self.signals.fd = -1;
        }

        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }
        self.epoll = epoll;

        let wake_fd = unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if wake_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        self.waker = Waker(wake_fd);

        self.ctl_add(wake_fd, WAKE_TOKEN, Interest { read: true, write: false })?;

        if !self.signals.watchers.is_empty() {
            self.refresh_signalfd()?;
        }

        Ok(())
    }

    /// Poll for readiness events.
    ///
    /// Blocks until:
    /// - at least one file descriptor becomes ready,
    /// - a watched signal is delivered,
    /// - the wake event is triggered,
    /// - or the optional timeout expires.
    pub(crate) fn poll(
        &mut self,
        events: &mut Vec<Readiness>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        // round up so a sub-millisecond remainder cannot busy-loop
        let timeout_ms = timeout.map_or(-1, |t| {
            let mut ms = t.as_millis();
            if t.subsec_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        });

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                self.events.set_len(0);
            }
            if err.kind() == io::ErrorKind::Interrupted {
                events.clear();
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        events.clear();

        for ev in &self.events {
            // Wake-up event
            if ev.u64 == WAKE_TOKEN {
                let mut buf = [0u8; 8];
                sys_read(self.waker.0, &mut buf);
                continue;
            }

            // Signal delivery
            if ev.u64 == SIGNAL_TOKEN {
                self.drain_signals(events);
                continue;
            }

            let err = ev.events & ((EPOLLERR | EPOLLHUP) as u32) != 0;

            events.push(Readiness {
                token: ev.u64,
                readable: err || ev.events & (EPOLLIN as u32) != 0,
                writable: err || ev.events & (EPOLLOUT as u32) != 0,
            });
        }

        Ok(())
    }

    /// Read queued `signalfd_siginfo` records and fan them out to the
    /// tokens registered for each delivered signal.
    fn drain_signals(&self, events: &mut Vec<Readiness>) {
        let record = mem::size_of::<signalfd_siginfo>();

        loop {
            let mut info = MaybeUninit::<signalfd_siginfo>::zeroed();
            let n = unsafe {
                libc::read(self.signals.fd, info.as_mut_ptr() as *mut _, record)
            };

            if n != record as isize {
                break;
            }

            let info = unsafe { info.assume_init() };
            let signo = info.ssi_signo as c_int;

            if let Some(tokens) = self.signals.watchers.get(&signo) {
                for &token in tokens {
                    events.push(Readiness {
                        token,
                        readable: true,
                        writable: false,
                    });
                }
            }
        }
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        if self.epoll >= 0 {
            sys_close(self.epoll);
        }
        if self.waker.0 >= 0 {
            sys_close(self.waker.0);
        }

        if self.signals.fd >= 0 {
            sys_close(self.signals.fd);
        }

        if !self.signals.watchers.is_empty() {
            unsafe {
                pthread_sigmask(SIG_UNBLOCK, &self.signals.mask, ptr::null_mut());
            }
        }
    }
}
