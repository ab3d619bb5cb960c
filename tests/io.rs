use evshim::{
    EV_PERSIST, EV_READ, EV_TIMEOUT, EV_WRITE, EVFLAG_AUTO, EVLIST_INSERTED, Event, EventBase,
    LoopExit, LoopMode,
};
use std::cell::Cell;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe(2) failed");
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    let n = unsafe { libc::write(fd, b"x".as_ptr() as *const _, 1) };
    assert_eq!(n, 1);
}

fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

#[test]
fn readable_pipe_beats_its_timeout() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let (rd, wr) = pipe();

    let hits = Rc::new(Cell::new(0u32));
    let seen = Rc::new(Cell::new(0u16));

    let ev = Event::new(rd, EV_READ, {
        let hits = hits.clone();
        let seen = seen.clone();
        move |_, res| {
            hits.set(hits.get() + 1);
            seen.set(res);
        }
    });

    ev.add(&base, Some(Duration::from_secs(1))).unwrap();
    write_byte(wr);

    let started = Instant::now();
    let exit = base.run(LoopMode::UntilDone).unwrap();

    assert_eq!(exit, LoopExit::Drained);
    assert_eq!(hits.get(), 1);
    assert_eq!(seen.get(), EV_READ);
    assert!(ev.flags() & EVLIST_INSERTED == 0);
    assert!(started.elapsed() < Duration::from_secs(1));

    close(rd);
    close(wr);
}

#[test]
fn timeout_fires_when_no_data_arrives() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let (rd, wr) = pipe();

    let seen = Rc::new(Cell::new(0u16));

    let ev = Event::new(rd, EV_READ, {
        let seen = seen.clone();
        move |_, res| seen.set(res)
    });

    ev.add(&base, Some(Duration::from_millis(10))).unwrap();

    let exit = base.run(LoopMode::UntilDone).unwrap();

    assert_eq!(exit, LoopExit::Drained);
    assert_eq!(seen.get(), EV_TIMEOUT);
    assert!(ev.flags() & EVLIST_INSERTED == 0);

    close(rd);
    close(wr);
}

#[test]
fn pipe_write_end_reports_writable() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let (rd, wr) = pipe();

    let seen = Rc::new(Cell::new(0u16));

    let ev = Event::new(wr, EV_WRITE, {
        let seen = seen.clone();
        move |_, res| seen.set(res)
    });

    ev.add(&base, None).unwrap();

    let exit = base.run(LoopMode::UntilDone).unwrap();

    assert_eq!(exit, LoopExit::Drained);
    assert_eq!(seen.get(), EV_WRITE);

    close(rd);
    close(wr);
}

#[test]
fn re_add_does_not_duplicate_the_watch() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let (rd, wr) = pipe();

    let hits = Rc::new(Cell::new(0u32));

    let ev = Event::new(rd, EV_READ | EV_PERSIST, {
        let hits = hits.clone();
        move |_, _| hits.set(hits.get() + 1)
    });

    ev.add(&base, None).unwrap();
    ev.add(&base, None).unwrap();

    write_byte(wr);

    let exit = base.run(LoopMode::Once).unwrap();
    assert_eq!(exit, LoopExit::Cycled);
    assert_eq!(hits.get(), 1);
    assert!(ev.flags() & EVLIST_INSERTED != 0);

    ev.del().unwrap();
    close(rd);
    close(wr);
}

#[test]
fn callback_may_delete_its_own_registration() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let (rd, wr) = pipe();

    let hits = Rc::new(Cell::new(0u32));

    let ev = Event::new(rd, EV_READ | EV_PERSIST, {
        let hits = hits.clone();
        move |ev, _| {
            hits.set(hits.get() + 1);
            ev.del().unwrap();
        }
    });

    ev.add(&base, None).unwrap();
    write_byte(wr);

    let exit = base.run(LoopMode::UntilDone).unwrap();

    assert_eq!(exit, LoopExit::Drained);
    assert_eq!(hits.get(), 1);
    assert!(ev.flags() & EVLIST_INSERTED == 0);

    close(rd);
    close(wr);
}

#[test]
fn callback_may_re_register_its_own_registration() {
    let base = EventBase::new(EVFLAG_AUTO).unwrap();
    let (rd, wr) = pipe();

    let hits = Rc::new(Cell::new(0u32));

    // non-persistent, but the first trigger re-adds from inside the
    // callback; the byte is never drained, so it fires a second time
    let ev = Event::new(rd, EV_READ, {
        let hits = hits.clone();
        let base = base.clone();
        move |ev, _| {
            hits.set(hits.get() + 1);
            if hits.get() == 1 {
                ev.add(&base, None).unwrap();
            }
        }
    });

    ev.add(&base, None).unwrap();
    write_byte(wr);

    let exit = base.run(LoopMode::UntilDone).unwrap();

    assert_eq!(exit, LoopExit::Drained);
    assert_eq!(hits.get(), 2);
    assert!(ev.flags() & EVLIST_INSERTED == 0);

    close(rd);
    close(wr);
}
