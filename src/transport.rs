//! Unix-socket transport to the signald daemon.
//!
//! Connection establishment races one background worker per candidate
//! socket path: each worker retries a non-blocking connect with a fixed
//! backoff until the shared window expires, the first to succeed installs
//! itself, and a shared still-trying counter lets the last loser report
//! the collective failure. This is the only multi-threaded corner of the
//! crate - everything after connect is the single reader thread feeding
//! frames to the session's reactor.
//!
//! Wire format: newline-delimited JSON, UTF-8. One line in, one frame
//! out; the reader never hands out partial lines.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::{Duration, Instant};

use anyhow::Context;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::config::BridgeConfig;
use crate::error::TransportError;
use crate::log::{log_info, log_warn};

/// Resolve socket candidates from the account options and connect.
///
/// The explicit socket path from the options wins; otherwise the standard
/// signald locations are raced.
pub fn connect_for(config: &BridgeConfig) -> anyhow::Result<Transport> {
    let candidates = crate::paths::socket_candidates(config.socket_path.as_deref());
    Transport::connect(&candidates)
        .with_context(|| format!("connect to signald for {}", config.account))
}

// Connect race tuning
const CONNECT_ATTEMPT_TIMEOUT_MS: u64 = 500;
const CONNECT_RETRY_DELAY_MS: u64 = 500;
/// Default total window for the whole race.
pub const CONNECT_WINDOW: Duration = Duration::from_secs(10);

/// Outbound primitive the state machine writes through.
pub trait FrameSender {
    /// Send one frame; the trailing newline is appended here.
    fn send_frame(&mut self, frame: &str) -> Result<(), TransportError>;
}

/// What the reader thread delivers to the session's reactor.
#[derive(Debug)]
pub enum TransportEvent {
    /// One complete newline-delimited frame (without the newline).
    Frame(String),
    /// The connection is over; the text says why.
    Closed(String),
}

/// An established daemon connection.
///
/// Owns the write half of the socket; a background reader thread owns a
/// clone and pushes [`TransportEvent`]s into the channel returned by
/// [`Transport::events`]. Dropping the transport (or calling
/// [`Transport::close`]) shuts the socket down once, which also ends the
/// reader thread.
pub struct Transport {
    stream: UnixStream,
    events: Receiver<TransportEvent>,
    path: PathBuf,
}

impl Transport {
    /// Race the candidate socket paths with the default window.
    pub fn connect(candidates: &[PathBuf]) -> Result<Self, TransportError> {
        Self::connect_within(candidates, CONNECT_WINDOW)
    }

    /// Race the candidate socket paths within `window`.
    pub fn connect_within(
        candidates: &[PathBuf],
        window: Duration,
    ) -> Result<Self, TransportError> {
        let (stream, path) = connect_race(candidates, window)?;
        log_info("transport", "connected", &path.display().to_string());

        let (tx, events) = channel();
        let reader = stream
            .try_clone()
            .map_err(|e| TransportError::ConnectFailed(format!("clone socket: {}", e)))?;
        spawn_reader(reader, tx);

        Ok(Self { stream, events, path })
    }

    /// Channel of inbound frames and the final close notification.
    pub fn events(&self) -> &Receiver<TransportEvent> {
        &self.events
    }

    /// The candidate that won the race.
    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Shut the socket down (both directions), exactly once.
    ///
    /// The reader thread sees EOF and exits; any best-effort goodbye
    /// (unsubscribe) must already have been written.
    pub fn close(self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

impl FrameSender for Transport {
    fn send_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        self.stream.write_all(frame.as_bytes())?;
        self.stream.write_all(b"\n")?;
        Ok(())
    }
}

/// Reader thread: blocking line reads, one event per complete frame.
fn spawn_reader(stream: UnixStream, tx: Sender<TransportEvent>) {
    std::thread::Builder::new()
        .name("sigbridge-reader".to_owned())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => {
                        let _ = tx.send(TransportEvent::Closed("daemon closed connection".into()));
                        break;
                    }
                    Ok(_) => {
                        let frame = line.trim_end_matches(['\r', '\n']);
                        if frame.is_empty() {
                            continue;
                        }
                        if tx.send(TransportEvent::Frame(frame.to_owned())).is_err() {
                            break; // reactor is gone
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(TransportEvent::Closed(format!("read failed: {}", e)));
                        break;
                    }
                }
            }
            log_info("transport", "reader_exit", "reader thread done");
        })
        .ok(); // spawn failure surfaces as a silent dead channel
}

// ── Connect race ─────────────────────────────────────────────────────────

fn connect_race(
    candidates: &[PathBuf],
    window: Duration,
) -> Result<(UnixStream, PathBuf), TransportError> {
    if candidates.is_empty() {
        return Err(TransportError::ConnectFailed("no candidate socket paths".into()));
    }

    let deadline = Instant::now() + window;
    let (tx, rx) = channel();
    let won = Arc::new(AtomicBool::new(false));
    let still_trying = Arc::new(AtomicUsize::new(candidates.len()));

    for path in candidates {
        let path = path.clone();
        let tx = tx.clone();
        let won = Arc::clone(&won);
        let still_trying = Arc::clone(&still_trying);
        std::thread::Builder::new()
            .name("sigbridge-connect".to_owned())
            .spawn(move || connect_worker(path, deadline, tx, &won, &still_trying))
            .ok();
    }
    drop(tx);

    match rx.recv() {
        Ok(Ok(success)) => Ok(success),
        Ok(Err(last_error)) => Err(TransportError::ConnectFailed(last_error)),
        Err(_) => Err(TransportError::ConnectFailed("all connect workers exited".into())),
    }
}

/// One worker: retry connect on a single candidate until the deadline,
/// the first global success, or exhaustion.
fn connect_worker(
    path: PathBuf,
    deadline: Instant,
    tx: Sender<Result<(UnixStream, PathBuf), String>>,
    won: &AtomicBool,
    still_trying: &AtomicUsize,
) {
    let mut last_error = format!("{}: never attempted", path.display());
    loop {
        if won.load(Ordering::Acquire) {
            break;
        }
        match connect_with_timeout(&path, Duration::from_millis(CONNECT_ATTEMPT_TIMEOUT_MS)) {
            Ok(stream) => {
                // First success wins; a slower winner's stream just drops.
                if !won.swap(true, Ordering::AcqRel) {
                    let _ = tx.send(Ok((stream, path)));
                }
                return;
            }
            Err(e) => {
                last_error = format!("{}: {}", path.display(), e);
            }
        }
        if Instant::now() + Duration::from_millis(CONNECT_RETRY_DELAY_MS) >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS));
    }

    // Last worker standing reports the collective failure.
    if still_trying.fetch_sub(1, Ordering::AcqRel) == 1 && !won.load(Ordering::Acquire) {
        log_warn("transport", "connect_exhausted", &last_error);
        let _ = tx.send(Err(last_error));
    }
}

/// Non-blocking connect with a poll-based timeout.
///
/// `UnixStream::connect` has no timeout variant, so this goes through the
/// raw fd: connect in non-blocking mode, poll for writability, check
/// SO_ERROR, then hand the fd to `UnixStream` in blocking mode.
fn connect_with_timeout(path: &Path, timeout: Duration) -> std::io::Result<UnixStream> {
    use std::os::fd::BorrowedFd;

    // SAFETY: plain socket(2); the fd is checked and owned by this
    // function until transferred to UnixStream or closed on error.
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    // Every error path below must close fd.
    let fail = |fd: i32, err: std::io::Error| -> std::io::Result<UnixStream> {
        // SAFETY: fd is the socket created above, not yet owned elsewhere.
        unsafe { libc::close(fd) };
        Err(err)
    };

    // SAFETY: F_GETFL/F_SETFL on a valid fd; flags checked for error.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return fail(fd, std::io::Error::last_os_error());
        }
    }

    // Build sockaddr_un; sun_path size is platform-dependent.
    let path_bytes = path.as_os_str().as_encoded_bytes();
    // SAFETY: all-zero sockaddr_un is a valid initial value.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    if path_bytes.len() >= addr.sun_path.len() {
        return fail(
            fd,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "socket path too long"),
        );
    }
    // SAFETY: length validated against sun_path above; regions disjoint.
    unsafe {
        std::ptr::copy_nonoverlapping(
            path_bytes.as_ptr(),
            addr.sun_path.as_mut_ptr() as *mut u8,
            path_bytes.len(),
        );
    }

    // SAFETY: valid fd and fully initialized sockaddr_un. EINPROGRESS is
    // the expected non-blocking result.
    let ret = unsafe {
        libc::connect(
            fd,
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            return fail(fd, err);
        }

        // Wait for the connect to resolve.
        // SAFETY: fd stays open for the duration of the poll call.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut poll_fds = [PollFd::new(borrowed, PollFlags::POLLOUT)];
        let timeout_ms = timeout.as_millis().min(u16::MAX as u128) as u16;
        match poll(&mut poll_fds, PollTimeout::from(timeout_ms)) {
            Ok(n) if n > 0 => {}
            Ok(_) => {
                return fail(
                    fd,
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout"),
                );
            }
            Err(e) => return fail(fd, std::io::Error::from(e)),
        }

        // POLLOUT also fires on failed connects; SO_ERROR has the truth.
        let mut so_error: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: valid fd, out-params sized correctly; so_error stays 0
        // if getsockopt itself fails, which reads as success - acceptable
        // because poll already reported the fd writable.
        unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut so_error as *mut _ as *mut libc::c_void,
                &mut len,
            );
        }
        if so_error != 0 {
            return fail(fd, std::io::Error::from_raw_os_error(so_error));
        }
    }

    // SAFETY: restore blocking mode before handing over.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return fail(fd, std::io::Error::last_os_error());
        }
    }

    // SAFETY: fd is connected, blocking, and uniquely owned here;
    // UnixStream takes ownership and closes it on drop.
    Ok(unsafe { UnixStream::from_raw_fd(fd) })
}
