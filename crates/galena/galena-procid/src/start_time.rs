//! Kernel probes for the wall-clock start time of a process.
//!
//! Both platform paths keep to an async-signal-safe discipline, because the
//! probe also runs inside the post-`fork` child handler that refreshes the
//! cached identity of the current process: raw `open`/`read`/`close` (or a
//! single `proc_pidinfo` syscall on Darwin), fixed stack buffers with one
//! bounded size escalation, no heap allocation, no locks, no buffered I/O.
//!
//! A `None` from [`start_time_of`] means the kernel would not confirm a
//! running process behind the PID: not running, zombie or dead state,
//! malformed proc entry, or insufficient privilege. `errno` is cleared on
//! entry so callers that want to report the failure can tell whether the OS
//! left a reason behind.

#[cfg(target_os = "linux")]
pub(crate) use linux::start_time_of;

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub(crate) use darwin::start_time_of;

fn clear_errno() {
    #[cfg(target_os = "linux")]
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe {
        *libc::__errno_location() = 0
    };
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    // SAFETY: __error returns this thread's errno slot.
    unsafe {
        *libc::__error() = 0
    };
}

#[cfg(target_os = "linux")]
mod linux {
    use super::clear_errno;
    use std::ffi::CStr;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Wall-clock second the kernel booted, from the `btime` line of
    /// `/proc/stat`.
    ///
    /// Double-checked atomic rather than `OnceLock`: `get_or_init` may park
    /// the thread, which is off-limits on the async-signal-safe path. A real
    /// system never reports `btime 0`, so zero doubles as the uninitialized
    /// sentinel; racing first readers store the same value.
    static BOOT_TIME: AtomicI64 = AtomicI64::new(0);

    pub(crate) fn start_time_of(pid: libc::pid_t) -> Option<libc::timeval> {
        clear_errno();
        if pid <= 0 {
            return None;
        }
        let boot_sec = boot_time()?;
        let mut path = [0u8; 32];
        let path = proc_stat_path(pid, &mut path);
        with_file_contents(path, |contents| parse_stat(contents, boot_sec))
    }

    fn boot_time() -> Option<libc::time_t> {
        match BOOT_TIME.load(Ordering::Relaxed) {
            0 => {
                let sec = with_file_contents(c"/proc/stat", parse_btime)?;
                BOOT_TIME.store(sec, Ordering::Relaxed);
                Some(sec as libc::time_t)
            }
            sec => Some(sec as libc::time_t),
        }
    }

    /// Formats `/proc/<pid>/stat` into a caller-provided stack buffer.
    fn proc_stat_path(pid: libc::pid_t, buf: &mut [u8; 32]) -> &CStr {
        let mut digits = [0u8; 10];
        let mut ndigits = 0;
        let mut rest = pid as u32; // caller guarantees pid > 0
        loop {
            digits[ndigits] = b'0' + (rest % 10) as u8;
            ndigits += 1;
            rest /= 10;
            if rest == 0 {
                break;
            }
        }

        let mut len = 0;
        for &b in b"/proc/" {
            buf[len] = b;
            len += 1;
        }
        for i in (0..ndigits).rev() {
            buf[len] = digits[i];
            len += 1;
        }
        for &b in b"/stat\0" {
            buf[len] = b;
            len += 1;
        }
        // SAFETY: the buffer holds exactly one nul, at the end.
        unsafe { CStr::from_bytes_with_nul_unchecked(&buf[..len]) }
    }

    /// Reads a whole proc pseudo-file into stack storage and hands it to
    /// `parse`.
    ///
    /// Proc files do not report a size up front, so a full first buffer is
    /// treated as possibly truncated and retried once with a larger one.
    /// Still full after the retry means giving up rather than allocating.
    fn with_file_contents<R>(path: &CStr, parse: impl Fn(&[u8]) -> Option<R>) -> Option<R> {
        // SAFETY: path is a valid nul-terminated string.
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
        if fd < 0 {
            return None;
        }

        let result = (|| {
            let mut small = [0u8; 8 * 1024];
            let n = read_to_eof(fd, &mut small)?;
            if n < small.len() {
                return parse(&small[..n]);
            }
            // SAFETY: fd is open; rewind for the second pass.
            if unsafe { libc::lseek(fd, 0, libc::SEEK_SET) } != 0 {
                return None;
            }
            let mut large = [0u8; 64 * 1024];
            let n = read_to_eof(fd, &mut large)?;
            if n == large.len() {
                return None;
            }
            parse(&large[..n])
        })();

        // SAFETY: fd came from open above.
        unsafe { libc::close(fd) };
        result
    }

    fn read_to_eof(fd: libc::c_int, buf: &mut [u8]) -> Option<usize> {
        let mut total = 0;
        while total < buf.len() {
            // SAFETY: the range is within buf.
            let n = unsafe {
                libc::read(
                    fd,
                    buf[total..].as_mut_ptr().cast(),
                    buf.len() - total,
                )
            };
            if n < 0 {
                if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return None;
            }
            if n == 0 {
                break;
            }
            total += n as usize;
        }
        Some(total)
    }

    /// Extracts fields 3 (state) and 22 (start ticks since boot) from a
    /// `/proc/<pid>/stat` image and converts ticks to an absolute timeval.
    fn parse_stat(contents: &[u8], boot_sec: libc::time_t) -> Option<libc::timeval> {
        let text = std::str::from_utf8(contents).ok()?;

        // comm (field 2) is free-form and may itself contain ')'; the
        // numeric fields resume after the last one.
        let rest = &text[text.rfind(')')? + 1..];
        let mut fields = rest.split_ascii_whitespace();

        match fields.next()? {
            // Z = zombie, X/x = dead: the process no longer runs.
            "Z" | "X" | "x" => return None,
            _ => {}
        }

        // Field 22, counting from the start of the line; 19 tokens past the
        // state field.
        let start_ticks: u64 = fields.nth(18)?.parse().ok()?;

        // SAFETY: sysconf with a valid selector.
        let hz = match unsafe { libc::sysconf(libc::_SC_CLK_TCK) } {
            n if n > 0 => n as u64,
            _ => return None,
        };

        Some(libc::timeval {
            tv_sec: (start_ticks / hz) as libc::time_t + boot_sec,
            tv_usec: ((start_ticks % hz) * (1_000_000 / hz)) as libc::suseconds_t,
        })
    }

    fn parse_btime(contents: &[u8]) -> Option<i64> {
        let text = std::str::from_utf8(contents).ok()?;
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("btime ") {
                return rest.trim().parse().ok();
            }
        }
        None
    }

}

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod darwin {
    use super::clear_errno;
    use std::mem::MaybeUninit;

    // proc_pidinfo flavor selecting the BSD accounting info block.
    const PROC_PIDTBSDINFO: libc::c_int = 3;

    pub(crate) fn start_time_of(pid: libc::pid_t) -> Option<libc::timeval> {
        clear_errno();
        if pid <= 0 {
            return None;
        }
        let mut info = MaybeUninit::<libc::proc_bsdinfo>::zeroed();
        let size = std::mem::size_of::<libc::proc_bsdinfo>() as libc::c_int;
        // SAFETY: buffer and size describe the same proc_bsdinfo allocation.
        let ret = unsafe {
            libc::proc_pidinfo(pid, PROC_PIDTBSDINFO, 0, info.as_mut_ptr().cast(), size)
        };
        if ret != size {
            return None;
        }
        // SAFETY: the kernel filled the whole structure.
        let info = unsafe { info.assume_init() };
        Some(libc::timeval {
            tv_sec: info.pbi_start_tvsec as libc::time_t,
            tv_usec: info.pbi_start_tvusec as libc::suseconds_t,
        })
    }
}
