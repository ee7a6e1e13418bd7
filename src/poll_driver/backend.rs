//! The two concrete poll backends (`SPEC_FULL.md` §4.1.a): a `poll(2)`
//! driver and a `select(2)` fallback, translating between this crate's
//! `Interest` vocabulary and each syscall's native event mask.

use std::convert::TryInto;
use std::io;
use std::time::Duration;

use crate::syscall;

use super::{Interest, PollFd};

fn millis_timeout(timeout: Option<Duration>) -> libc::c_int {
    timeout
        .map(|d| std::cmp::min(d.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
        .unwrap_or(-1)
}

fn interest_to_poll(interest: Interest) -> libc::c_short {
    let mut mask = 0;
    if interest.is_readable() {
        mask |= libc::POLLIN;
    }
    if interest.is_writable() {
        mask |= libc::POLLOUT;
    }
    if interest.is_priority() {
        mask |= libc::POLLPRI;
    }
    mask as libc::c_short
}

fn poll_to_interest(revents: libc::c_short) -> Interest {
    let revents = revents as libc::c_int;
    let mut interest = Interest::empty();

    if revents & libc::POLLIN != 0 || revents & libc::POLLPRI != 0 {
        interest |= Interest::readable();
    }
    if revents & libc::POLLOUT != 0 {
        interest |= Interest::writable();
    }
    if revents & libc::POLLERR != 0 {
        interest |= Interest::error();
    }
    if revents & libc::POLLHUP != 0 || revents & libc::POLLNVAL != 0 {
        interest |= Interest::hup();
    }

    interest
}

/// `poll(2)`-backed driver, the crate's default (`spec.md` §4.1: "Default
/// implementation uses poll(2) if available").
pub fn poll(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<i32> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|pfd| libc::pollfd {
            fd: pfd.fd,
            events: interest_to_poll(pfd.interest),
            revents: 0,
        })
        .collect();

    let timeout = millis_timeout(timeout);

    let ready = match syscall!(poll(
        pollfds.as_mut_ptr(),
        pollfds.len().try_into().unwrap(),
        timeout,
    )) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
        Err(e) => return Err(e),
    };

    for (pfd, raw) in fds.iter_mut().zip(pollfds.iter()) {
        pfd.revents = poll_to_interest(raw.revents);
    }

    Ok(ready)
}

/// `select(2)`-backed fallback driver (`spec.md` §4.1: "otherwise a
/// select(2)-based fallback that translates between the two event-mask
/// vocabularies"). Used when a caller replaces the default via
/// `set_poll_function` on a platform where `poll(2)` isn't available or
/// isn't desired.
pub fn select(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<i32> {
    let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
    let mut write_set: libc::fd_set = unsafe { std::mem::zeroed() };
    let mut except_set: libc::fd_set = unsafe { std::mem::zeroed() };

    unsafe {
        libc::FD_ZERO(&mut read_set);
        libc::FD_ZERO(&mut write_set);
        libc::FD_ZERO(&mut except_set);
    }

    let mut maxfd = -1;
    for pfd in fds.iter() {
        if pfd.fd < 0 || pfd.fd >= libc::FD_SETSIZE as i32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fd out of range for select(2)",
            ));
        }
        unsafe {
            if pfd.interest.is_readable() {
                libc::FD_SET(pfd.fd, &mut read_set);
            }
            if pfd.interest.is_writable() {
                libc::FD_SET(pfd.fd, &mut write_set);
            }
            if pfd.interest.is_priority() {
                libc::FD_SET(pfd.fd, &mut except_set);
            }
        }
        maxfd = maxfd.max(pfd.fd);
    }

    let mut tv = timeout.map(|d| libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    });

    let tv_ptr = tv
        .as_mut()
        .map(|tv| tv as *mut libc::timeval)
        .unwrap_or(std::ptr::null_mut());

    let ready = match syscall!(select(
        maxfd + 1,
        &mut read_set,
        &mut write_set,
        &mut except_set,
        tv_ptr,
    )) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
        Err(e) => return Err(e),
    };

    for pfd in fds.iter_mut() {
        let mut revents = Interest::empty();
        unsafe {
            if libc::FD_ISSET(pfd.fd, &read_set) {
                revents |= Interest::readable();
            }
            if libc::FD_ISSET(pfd.fd, &write_set) {
                revents |= Interest::writable();
            }
            if libc::FD_ISSET(pfd.fd, &except_set) {
                revents |= Interest::priority();
            }
        }
        pfd.revents = revents;
    }

    Ok(ready)
}
