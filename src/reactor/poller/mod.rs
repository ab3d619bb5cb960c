//! Platform-specific I/O poller abstraction.
//!
//! This module provides a unified interface over platform-specific
//! polling mechanisms (epoll on Linux).
//!
//! The poller is used by the reactor to:
//! - wait for I/O readiness, signal delivery, and timer expiry,
//! - wake the blocking poll when the loop is asked to stop,
//! - rebuild its kernel resources after a process fork.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

pub(crate) mod common;
pub(crate) mod unix;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(target_os = "linux")]
pub(crate) use epoll::METHOD;
