use evshim::{
    EV_PERSIST, EV_READ, EV_SIGNAL, EV_TIMEOUT, EV_WRITE, EVFLAG_AUTO, EVLIST_INIT,
    EVLIST_INSERTED, Error, Event, EventBase,
};
use std::os::fd::RawFd;
use std::time::Duration;

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed");
    (fds[0], fds[1])
}

fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

#[test]
fn fresh_descriptor_reports_nothing_pending() {
    let ev = Event::timer(|_, _| {});

    let pending = ev.pending(EV_READ | EV_WRITE | EV_TIMEOUT | EV_SIGNAL);
    assert_eq!(pending.events, 0);
    assert!(pending.timeout.is_none());

    assert!(ev.flags() & EVLIST_INIT != 0);
    assert!(ev.flags() & EVLIST_INSERTED == 0);
}

#[test]
fn add_then_del_round_trips() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let ev = Event::timer(|_, _| {});

    ev.add(&base, Some(Duration::from_secs(5))).unwrap();
    assert!(ev.flags() & EVLIST_INSERTED != 0);
    assert_eq!(ev.pending(EV_TIMEOUT).events, EV_TIMEOUT);

    ev.del().unwrap();
    assert!(ev.flags() & EVLIST_INSERTED == 0);

    let pending = ev.pending(EV_READ | EV_WRITE | EV_TIMEOUT | EV_SIGNAL);
    assert_eq!(pending.events, 0);
    assert!(pending.timeout.is_none());
}

#[test]
fn del_is_a_no_op_on_a_never_inserted_descriptor() {
    let ev = Event::timer(|_, _| {});

    ev.del().unwrap();
    ev.del().unwrap();
}

#[test]
fn add_without_condition_or_timeout_is_rejected() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let ev = Event::new(-1, 0, |_, _| {});

    assert!(matches!(ev.add(&base, None), Err(Error::InvalidArgument)));
    assert!(ev.flags() & EVLIST_INSERTED == 0);
}

#[test]
fn signal_and_io_conditions_are_exclusive() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let ev = Event::new(1, EV_READ | EV_SIGNAL, |_, _| {});

    assert!(matches!(ev.add(&base, None), Err(Error::InvalidArgument)));
}

#[test]
fn bogus_signal_numbers_are_rejected() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();

    for signo in [-3, 0, 4096] {
        let ev = Event::signal(signo, |_, _| {});
        assert!(matches!(ev.add(&base, None), Err(Error::InvalidArgument)));
    }
}

#[test]
fn failed_backend_arm_rolls_the_descriptor_back() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let (rd, wr) = pipe();

    let first = Event::new(rd, EV_READ, |_, _| {});
    first.add(&base, None).unwrap();

    // the backend refuses a second watcher on the same fd
    let second = Event::new(rd, EV_READ, |_, _| {});
    let err = second.add(&base, Some(Duration::from_secs(5)));
    assert!(matches!(err, Err(Error::Backend(_))));

    assert!(second.flags() & EVLIST_INSERTED == 0);
    let pending = second.pending(EV_READ | EV_WRITE | EV_TIMEOUT | EV_SIGNAL);
    assert_eq!(pending.events, 0);
    assert!(pending.timeout.is_none());

    // the failed add must not have disturbed the first registration
    assert!(first.flags() & EVLIST_INSERTED != 0);
    assert_eq!(first.pending(EV_READ).events, EV_READ);

    first.del().unwrap();
    close(rd);
    close(wr);
}

#[test]
fn sigrtmax_is_a_valid_signal_number() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let ev = Event::signal(64, |_, _| {});

    ev.add(&base, None).unwrap();
    assert_eq!(ev.pending(EV_SIGNAL).events, EV_SIGNAL);
    ev.del().unwrap();
}

#[test]
fn remaining_timeout_is_monotone_and_never_negative() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let ev = Event::timer(|_, _| {});

    ev.add(&base, Some(Duration::from_millis(100))).unwrap();

    let first = ev.pending(EV_TIMEOUT).timeout.unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let second = ev.pending(EV_TIMEOUT).timeout.unwrap();

    assert!(second <= first);
    assert!(first <= Duration::from_millis(100));

    ev.del().unwrap();
}

#[test]
fn re_add_restarts_the_countdown() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let ev = Event::new(-1, EV_PERSIST, |_, _| {});

    ev.add(&base, Some(Duration::from_millis(50))).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    ev.add(&base, Some(Duration::from_millis(50))).unwrap();

    let remaining = ev.pending(EV_TIMEOUT).timeout.unwrap();
    assert!(remaining > Duration::from_millis(30));

    ev.del().unwrap();
}

#[test]
fn priority_is_stored_for_compatibility() {
    let ev = Event::timer(|_, _| {});

    assert_eq!(ev.priority(), 0);
    ev.set_priority(3).unwrap();
    assert_eq!(ev.priority(), 3);
}
