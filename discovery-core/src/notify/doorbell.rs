//! Socketpair doorbell for waking a blocked thread.
//!
//! The ringing side only issues a non-blocking `send(2)`, which is
//! async-signal-safe, so a [`DoorbellRinger`] may be rung from a signal handler.
//! Rings that arrive while nobody waits stay buffered in the socket and wake
//! the next [`Doorbell::wait`]; several rings coalesce into one wakeup.

use std::io::{self, ErrorKind};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

/// Result of a ring attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingResult {
    /// A wakeup byte was written.
    Rung,
    /// The buffer is full, so a wakeup is already pending.
    AlreadyPending,
    /// The waiting side is gone.
    Closed,
}

/// The waiting end of a doorbell.
#[derive(Debug)]
pub struct Doorbell {
    reader: UnixStream,
}

/// The ringing end of a doorbell. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DoorbellRinger {
    writer: Arc<UnixStream>,
}

/// Reads every pending byte.
///
/// Returns `Ok(true)` if at least one ring was consumed, `Ok(false)` if none was
/// pending, and `BrokenPipe` once every ringer has been dropped.
fn drain_fd(fd: RawFd) -> io::Result<bool> {
    let mut buf = [0u8; 64];
    let mut drained = false;

    loop {
        let ret = unsafe {
            libc::recv(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                libc::MSG_DONTWAIT,
            )
        };

        if ret > 0 {
            drained = true;
            continue;
        }

        if ret == 0 {
            if drained {
                return Ok(true);
            }
            return Err(io::Error::new(ErrorKind::BrokenPipe, "doorbell closed"));
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            ErrorKind::WouldBlock => return Ok(drained),
            ErrorKind::Interrupted => continue,
            _ => return Err(err),
        }
    }
}

fn poll_timeout_ms(deadline: Option<Instant>) -> libc::c_int {
    match deadline {
        None => -1,
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Round up so a sub-millisecond remainder does not turn into a busy poll.
            let millis = remaining.as_nanos().div_ceil(1_000_000);
            millis.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

impl Doorbell {
    /// Creates a connected doorbell pair.
    ///
    /// # Returns
    ///
    /// * `Ok((Doorbell, DoorbellRinger))` on success.
    /// * `Err` if the socketpair cannot be created (e.g. descriptor exhaustion).
    pub fn new() -> io::Result<(Doorbell, DoorbellRinger)> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        Ok((
            Doorbell { reader },
            DoorbellRinger {
                writer: Arc::new(writer),
            },
        ))
    }

    /// Blocks until the doorbell rings or `timeout` elapses.
    ///
    /// # Arguments
    ///
    /// * `timeout` - `None` waits without limit.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if at least one ring was consumed.
    /// * `Ok(false)` if the timeout elapsed first.
    /// * `Err` if polling fails or every ringer is gone.
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let fd = self.reader.as_raw_fd();
        if drain_fd(fd)? {
            return Ok(true);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };

            let ret = unsafe { libc::poll(&mut pfd, 1, poll_timeout_ms(deadline)) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            if ret == 0 {
                return Ok(false);
            }

            if drain_fd(fd)? {
                return Ok(true);
            }
        }
    }

    /// Consumes pending rings without blocking.
    pub fn try_wait(&self) -> io::Result<bool> {
        drain_fd(self.reader.as_raw_fd())
    }
}

impl DoorbellRinger {
    /// Rings the doorbell.
    ///
    /// Async-signal-safe: no allocation, no lock, one `send(2)`.
    pub fn ring(&self) -> RingResult {
        let fd = self.writer.as_raw_fd();
        let buf = [1u8];

        let ret = unsafe {
            libc::send(
                fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                SEND_FLAGS,
            )
        };

        if ret > 0 {
            return RingResult::Rung;
        }

        match io::Error::last_os_error().kind() {
            ErrorKind::WouldBlock => RingResult::AlreadyPending,
            _ => RingResult::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ring_before_wait_is_not_lost() {
        let (doorbell, ringer) = Doorbell::new().unwrap();
        assert_eq!(ringer.ring(), RingResult::Rung);
        assert!(doorbell.wait(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn test_rings_coalesce() {
        let (doorbell, ringer) = Doorbell::new().unwrap();
        ringer.ring();
        ringer.ring();
        ringer.ring();

        assert!(doorbell.try_wait().unwrap());
        assert!(!doorbell.try_wait().unwrap());
    }

    #[test]
    fn test_wait_times_out() {
        let (doorbell, _ringer) = Doorbell::new().unwrap();
        let start = Instant::now();
        assert!(!doorbell.wait(Some(Duration::from_millis(30))).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_ring_from_other_thread_wakes_waiter() {
        let (doorbell, ringer) = Doorbell::new().unwrap();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ringer.ring();
        });

        assert!(doorbell.wait(Some(Duration::from_secs(5))).unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn test_dropped_ringer_closes_doorbell() {
        let (doorbell, ringer) = Doorbell::new().unwrap();
        drop(ringer);

        let err = doorbell.wait(Some(Duration::from_millis(10))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_ring_after_doorbell_dropped_reports_closed() {
        let (doorbell, ringer) = Doorbell::new().unwrap();
        drop(doorbell);
        assert_eq!(ringer.ring(), RingResult::Closed);
    }
}
