//! Fork integration: the cached identity of the current process must be
//! refreshed in a forked child, not inherited from the parent.
//!
//! Uses raw `fork` on purpose: spawning a fresh executable would start with
//! a cold cache and prove nothing. The child ships its identity back over a
//! pipe and `_exit`s without running any Rust teardown.

use galena_procid::ProcessId;

fn read_exact_fd(fd: libc::c_int, buf: &mut [u8]) {
    let mut total = 0;
    while total < buf.len() {
        let n = unsafe {
            libc::read(
                fd,
                buf[total..].as_mut_ptr().cast(),
                buf.len() - total,
            )
        };
        assert!(n > 0, "pipe read failed");
        total += n as usize;
    }
}

#[test]
fn forked_child_observes_its_own_identity() {
    // Warm the cache in the parent so the child would inherit a stale value
    // if the post-fork refresh were missing.
    let parent_id = ProcessId::current();
    assert_eq!(parent_id.pid(), std::process::id() as libc::pid_t);

    let mut fds = [0 as libc::c_int; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe failed");

    match unsafe { libc::fork() } {
        -1 => panic!("fork failed"),
        0 => {
            // Child: report our identity and leave without cleanup.
            let bits = ProcessId::current().to_bits().to_le_bytes();
            unsafe {
                libc::write(fds[1], bits.as_ptr().cast(), bits.len());
                libc::_exit(0);
            }
        }
        child_pid => {
            let mut buf = [0u8; 8];
            read_exact_fd(fds[0], &mut buf);
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }

            let child_id = ProcessId::from_bits(u64::from_le_bytes(buf));
            assert_eq!(child_id.pid(), child_pid, "child must see its own pid");
            assert_ne!(child_id, parent_id);

            let mut status = 0;
            assert_eq!(
                unsafe { libc::waitpid(child_pid, &mut status, 0) },
                child_pid
            );

            // The parent's own cached identity is untouched by the fork.
            assert_eq!(ProcessId::current(), parent_id);
        }
    }
}
