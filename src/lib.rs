//! # evshim
//!
//! **evshim** is a compatibility layer exposing a libevent-style
//! event API (one descriptor per registration, a callback on
//! readiness) on top of a minimal epoll reactor core.
//!
//! One [`Event`] descriptor fans out into up to two backend watchers:
//! an I/O *or* signal watcher plus an optional timeout. The layer
//! keeps their lifecycles synchronized and reproduces the legacy
//! semantics for persistence (`EV_PERSIST`), pending-state
//! introspection, priorities, and fork-safety, without owning a
//! scheduler of its own: callbacks run synchronously on whichever
//! thread drives [`EventBase::run`].
//!
//! ## Quick Start
//!
//! ```rust
//! use evshim::{Event, EventBase, LoopMode, EV_TIMEOUT, EVFLAG_AUTO};
//! use std::time::Duration;
//!
//! let base = EventBase::new(EVFLAG_AUTO).unwrap();
//!
//! let tick = Event::timer(|_ev, res| {
//!     assert_eq!(res, EV_TIMEOUT);
//! });
//! tick.add(&base, Some(Duration::from_millis(10))).unwrap();
//!
//! // returns once the one-shot timer has fired and removed itself
//! base.run(LoopMode::UntilDone).unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`event`]: event descriptors, condition and state flags
//! - [`base`]: the loop handle (create, run, stop, fork reinit)
//!
//! The loop is strictly single-threaded; handles are cheap clones of
//! shared state and are not `Send`. Sharing descriptors across
//! threads requires external synchronization the layer does not
//! provide.

mod error;
mod reactor;
mod utils;

pub mod base;
pub mod event;

pub use base::{EVFLAG_AUTO, EventBase, LoopExit, LoopMode, version};
pub use error::Error;
pub use event::{
    EV_PERSIST, EV_READ, EV_SIGNAL, EV_TIMEOUT, EV_WRITE, EVLIST_ACTIVE, EVLIST_INIT,
    EVLIST_INSERTED, EVLIST_INTERNAL, EVLIST_SIGNAL, EVLIST_TIMEOUT, Event, Pending,
};
