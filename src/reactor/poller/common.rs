use std::os::fd::RawFd;

/// Readiness conditions a registration subscribes to.
#[derive(Clone, Copy)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

/// Handle to the poller's internal wake-up descriptor.
pub(crate) struct Waker(pub(crate) RawFd);
