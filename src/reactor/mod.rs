//! Reactor core and watcher plumbing.
//!
//! This module implements the engine behind the public surface.
//! It is responsible for:
//! - arming and disarming backend watchers for descriptors,
//! - driving the poll loop,
//! - bridging backend readiness back into descriptor callbacks.
//!
//! Callers do not interact with the reactor directly; they hold an
//! [`EventBase`](crate::EventBase) handle and register
//! [`Event`](crate::Event) descriptors against it.

pub(crate) mod core;
pub(crate) mod event;
pub(crate) mod poller;
pub(crate) mod timer;
