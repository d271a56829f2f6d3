//! `galena-procid`: extended process identifiers that survive PID reuse.
//!
//! A bare `pid_t` is small and recyclable; long-running systems that record
//! "who owns this" in shared memory need something that still means the same
//! process years later. [`ProcessId`] packs the PID together with the
//! kernel-reported process start time into a single value that fits in a
//! lock-free atomic, so it can be compare-exchanged across processes.
//!
//! Zero bytes are the null identifier, which makes a freshly
//! zero-filled shared mapping a valid "no owner" state without any
//! initialization handshake.
//!
//! # Internal Modules
//!
//! - `process_id`: the packed identifier and the process-wide cached
//!   identity of the caller
//! - `start_time`: per-OS kernel probes (`/proc` on Linux, `proc_pidinfo`
//!   on Darwin) on an async-signal-safe path

#![warn(unsafe_op_in_unsafe_fn)]

mod process_id;
mod start_time;

pub use process_id::ProcessId;

/// The OS refused to, or could not, report a start time for a PID.
///
/// Raised only by [`ProcessId::of`]; [`ProcessId::maybe`] reports the same
/// condition as `None`. The display message carries the offending PID and,
/// when the probe captured one, the OS error text.
#[derive(Debug, thiserror::Error)]
#[error("can't get process start time: pid={pid}{}", os_error_text(.source))]
pub struct StartTimeError {
    pid: libc::pid_t,
    #[source]
    source: Option<std::io::Error>,
}

/// Appends ": <os error>" to the display message when the probe left an
/// error behind.
fn os_error_text(source: &Option<std::io::Error>) -> String {
    match source {
        Some(err) => format!(": {err}"),
        None => String::new(),
    }
}

impl StartTimeError {
    /// Captures `errno` as the error source, when the failed probe set it.
    pub(crate) fn for_pid(pid: libc::pid_t) -> Self {
        let os = std::io::Error::last_os_error();
        Self {
            pid,
            source: (os.raw_os_error().unwrap_or(0) != 0).then_some(os),
        }
    }

    /// The PID the lookup was for.
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// The raw OS error behind the failure, if the OS reported one.
    pub fn os_error(&self) -> Option<i32> {
        self.source.as_ref().and_then(std::io::Error::raw_os_error)
    }
}
