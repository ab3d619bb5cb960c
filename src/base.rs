//! The event loop handle.
//!
//! An [`EventBase`] owns one reactor instance: the platform poller
//! and the registrations armed against it. Handles are cheap clones;
//! the backend is torn down when the last clone drops.

use crate::error::Error;
use crate::reactor::core::BaseShared;
use crate::reactor::poller;

use std::rc::Rc;

/// Backend-selection hint accepting whatever backend the platform
/// offers.
pub const EVFLAG_AUTO: u32 = 0;

/// How [`EventBase::run`] should drive the loop.
#[derive(Clone, Copy, Debug)]
pub enum LoopMode {
    /// Keep polling until [`stop`](EventBase::stop) is called or no
    /// registration remains.
    UntilDone,
    /// Block for a single poll turn, dispatch, and return.
    Once,
}

/// Why [`EventBase::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// No registration remains.
    Drained,
    /// [`stop`](EventBase::stop) was called.
    Stopped,
    /// A [`LoopMode::Once`] turn completed.
    Cycled,
}

/// A handle to one running event loop instance.
///
/// The loop is single-threaded: the thread that calls
/// [`run`](EventBase::run) is the thread every callback runs on, and
/// handles are not `Send`.
#[derive(Clone)]
pub struct EventBase {
    pub(crate) shared: Rc<BaseShared>,
}

impl EventBase {
    /// Creates a new loop instance.
    ///
    /// `flags` carries backend-selection hints; [`EVFLAG_AUTO`] picks
    /// the platform default, which is also the only packaged backend.
    /// Fails without leaving any partial state when the backend
    /// cannot be set up.
    pub fn new(flags: u32) -> Result<EventBase, Error> {
        let _ = flags;

        Ok(EventBase {
            shared: Rc::new(BaseShared::new()?),
        })
    }

    /// Rebuilds backend state that does not survive a process fork.
    ///
    /// Must be called in the child, before any other use of the
    /// handle, after `fork()`. The parent's handle is unaffected.
    /// Live registrations carry over to the rebuilt backend.
    pub fn reinit(&self) -> Result<(), Error> {
        self.shared.reinit()
    }

    /// Drives the loop on the calling thread.
    ///
    /// Blocking happens here and only here; callbacks for every
    /// triggered descriptor run synchronously before this returns.
    pub fn run(&self, mode: LoopMode) -> Result<LoopExit, Error> {
        self.shared.run(mode)
    }

    /// Makes [`run`](EventBase::run) return after the current turn.
    ///
    /// Usable from inside a callback; registrations stay armed.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Name of the active polling backend.
    pub fn method(&self) -> &'static str {
        poller::METHOD
    }
}

impl Drop for EventBase {
    fn drop(&mut self) {
        // dropping the last handle under live registrations is a
        // caller lifetime bug
        if Rc::strong_count(&self.shared) == 1 {
            debug_assert_eq!(
                self.shared.live(),
                0,
                "event base dropped with descriptors still inserted"
            );
        }
    }
}

/// Version of the compatibility surface.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
