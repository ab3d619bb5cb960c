/// A readiness report produced by the poller.
///
/// `Readiness` carries the token of one registration together with
/// the conditions the backend observed for it. It is consumed by the
/// reactor core, which translates it into a descriptor dispatch.
pub(crate) struct Readiness {
    /// Token identifying the registration inside the reactor.
    pub(crate) token: u64,

    /// The registration's descriptor is readable (or a signal fired).
    pub(crate) readable: bool,

    /// The registration's descriptor is writable.
    pub(crate) writable: bool,
}
