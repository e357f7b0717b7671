//! One-shot JSON conduits between launcher and worker.
//!
//! Each execution gets a fresh close-on-exec pipe. The worker writes a single
//! JSON document and exits; the launcher reads to EOF on a background thread
//! so the reconciler never blocks on the pipe while waiting for exit.

use crate::config::types::{Result, SnipboxError};
use crate::core::types::RawWorkerOutcome;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::thread;

/// Fixed descriptor number the worker sees its status pipe on.
pub const WORKER_STATUS_FD: RawFd = 3;

/// Diagnostics drained from the worker's own stderr are capped at this size.
pub const DIAGNOSTIC_LIMIT: usize = 64 * 1024;

/// Create a pipe whose ends are not inherited across exec.
pub fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
            .map_err(|e| SnipboxError::Channel(format!("pipe2: {e}")))
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};
        use std::os::fd::AsRawFd;

        let (read, write) =
            nix::unistd::pipe().map_err(|e| SnipboxError::Channel(format!("pipe: {e}")))?;
        for fd in [read.as_raw_fd(), write.as_raw_fd()] {
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
                .map_err(|e| SnipboxError::Channel(format!("fcntl(FD_CLOEXEC): {e}")))?;
        }
        Ok((read, write))
    }
}

pub fn read_json<T: DeserializeOwned, R: Read>(mut reader: R) -> Result<Option<T>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| SnipboxError::Channel(format!("failed to decode json payload: {e}")))
}

pub fn write_json<T: Serialize, W: Write>(mut writer: W, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| SnipboxError::Channel(format!("failed to encode json payload: {e}")))?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Write the outcome on an inherited descriptor (worker side).
pub fn write_outcome_to_fd(fd: RawFd, outcome: &RawWorkerOutcome) -> Result<()> {
    let file = unsafe { File::from_raw_fd(fd) };
    write_json(file, outcome)
}

/// Receiving end of a result channel.
///
/// The pipe is drained on its own thread; `finish()` joins it once the
/// worker is gone and the write end has closed.
pub struct OutcomeReceiver {
    handle: thread::JoinHandle<Result<Option<RawWorkerOutcome>>>,
}

impl OutcomeReceiver {
    pub fn spawn(read_end: OwnedFd) -> Self {
        let handle = thread::spawn(move || read_json(File::from(read_end)));
        Self { handle }
    }

    pub fn finish(self) -> Result<Option<RawWorkerOutcome>> {
        self.handle
            .join()
            .map_err(|_| SnipboxError::Channel("outcome reader thread panicked".to_string()))?
    }
}

/// Bounded drain of a byte stream on a background thread.
pub fn drain_bounded<R: Read + Send + 'static>(
    mut reader: R,
    limit: usize,
) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let remaining = limit.saturating_sub(out.len());
                    out.extend_from_slice(&buf[..n.min(remaining)]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&out).to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_payload_means_no_outcome() {
        let decoded: Option<RawWorkerOutcome> = read_json(Cursor::new(Vec::new())).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn truncated_payload_is_a_channel_error() {
        let err = read_json::<RawWorkerOutcome, _>(Cursor::new(b"{\"success\":tr".to_vec()))
            .unwrap_err();
        assert!(matches!(err, SnipboxError::Channel(_)));
    }

    #[test]
    fn outcome_crosses_a_real_pipe() {
        let (read_end, write_end) = cloexec_pipe().unwrap();
        let receiver = OutcomeReceiver::spawn(read_end);

        let outcome = RawWorkerOutcome {
            success: true,
            stdout: "hello\n".to_string(),
            ..RawWorkerOutcome::default()
        };
        write_json(File::from(write_end), &outcome).unwrap();

        let received = receiver.finish().unwrap();
        assert_eq!(received, Some(outcome));
    }

    #[test]
    fn closed_pipe_without_payload_yields_none() {
        let (read_end, write_end) = cloexec_pipe().unwrap();
        let receiver = OutcomeReceiver::spawn(read_end);
        drop(write_end);
        assert!(receiver.finish().unwrap().is_none());
    }

    #[test]
    fn drain_respects_limit() {
        let data = vec![b'x'; 10_000];
        let text = drain_bounded(Cursor::new(data), 128).join().unwrap();
        assert_eq!(text.len(), 128);
    }
}
