//! `pyrite`: multi-process stress driver for the galena lock.
//!
//! The orchestrator creates a file-backed shared region holding a
//! [`ProcessIdLock`] and a counter, then re-spawns itself N times in worker
//! mode (role selected by environment variable, as the e2e tests do). Each
//! worker hammers the lock with plain read-modify-write updates of the
//! counter; the orchestrator asserts that no increment was lost.
//!
//! ```bash
//! pyrite                 # defaults: 10 workers × 10_000 iterations
//! pyrite pyrite.toml     # settings from a TOML file
//! ```

mod config;

use config::PyriteConfig;
use galena_atomic::IpcAtomic;
use galena_lock::ProcessIdLock;
use galena_mmap::SharedRegion;
use std::process::{Command, Stdio};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const ENV_ROLE: &str = "PYRITE_ROLE";
const ENV_PATH: &str = "PYRITE_PATH";
const ENV_ITERS: &str = "PYRITE_ITERS";

const ROLE_WORKER: &str = "worker";

/// Magic number identifying a pyrite region file: ASCII "PYRITE01".
const REGION_MAGIC: u64 = 0x5059_5249_5445_3031;

/// Region format version; bump on incompatible layout changes.
const REGION_VERSION: u64 = 1;

/// The shared region layout. Everything past the identification fields is
/// valid as zero bytes, so the orchestrator only writes `magic` and
/// `version` before workers may attach.
#[repr(C)]
struct StressRegion {
    magic: u64,
    version: u64,
    lock: ProcessIdLock,
    counter: IpcAtomic<u64>,
}

impl StressRegion {
    fn validate(&self) -> Result<(), &'static str> {
        if self.magic != REGION_MAGIC {
            return Err("bad magic");
        }
        if self.version != REGION_VERSION {
            return Err("wrong version");
        }
        Ok(())
    }
}

fn region_view(region: &SharedRegion<StressRegion>) -> &StressRegion {
    // SAFETY: StressRegion is a #[repr(C)] pack of implicit-lifetime types
    // (zero bytes valid) and all concurrent access goes through the
    // atomics inside.
    unsafe { region.get() }
}

fn run_worker() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::var(ENV_PATH)?;
    let iterations: u64 = std::env::var(ENV_ITERS)?.parse()?;

    let region: SharedRegion<StressRegion> = SharedRegion::open(&path)?;
    let shared = region_view(&region);
    shared.validate().map_err(std::io::Error::other)?;

    info!(pid = std::process::id(), iterations, "worker attached");
    let start = Instant::now();

    for i in 0..iterations {
        std::thread::yield_now();
        let _guard = shared.lock.guard();
        let v = shared.counter.load(Ordering::Relaxed);
        shared.counter.store(v + 1, Ordering::Relaxed);

        if (i + 1) % 2_500 == 0 {
            debug!(pid = std::process::id(), done = i + 1, "worker progress");
        }
    }

    info!(
        pid = std::process::id(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "worker done"
    );
    Ok(())
}

fn run_orchestrator(config: PyriteConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut region: SharedRegion<StressRegion> = SharedRegion::create(&config.region_path)?;

    // Stamp the identification fields; the rest of the region is already
    // valid as the zero bytes the kernel gave us.
    // SAFETY: zero bytes are a valid StressRegion and nobody else has
    // attached yet.
    let header = unsafe { region.get_mut() };
    header.magic = REGION_MAGIC;
    header.version = REGION_VERSION;

    info!(
        path = %config.region_path,
        workers = config.workers,
        iterations = config.iterations,
        "region created, spawning workers"
    );

    let exe = std::env::current_exe()?;
    let start = Instant::now();
    let children: Vec<_> = (0..config.workers)
        .map(|_| {
            Command::new(&exe)
                .env(ENV_ROLE, ROLE_WORKER)
                .env(ENV_PATH, &config.region_path)
                .env(ENV_ITERS, config.iterations.to_string())
                .stderr(Stdio::inherit())
                .spawn()
        })
        .collect::<Result<_, _>>()?;

    for mut child in children {
        let status = child.wait()?;
        if !status.success() {
            return Err(format!("worker failed with status: {status}").into());
        }
    }

    let shared = region_view(&region);
    let total = shared.counter.load(Ordering::SeqCst);
    let expected = config.workers * config.iterations;
    let elapsed = start.elapsed();

    info!(
        total,
        expected,
        elapsed_ms = elapsed.as_millis() as u64,
        locks_per_sec = (total as f64 / elapsed.as_secs_f64()) as u64,
        "all workers finished"
    );

    let _ = std::fs::remove_file(&config.region_path);

    if total != expected {
        return Err(format!("lost increments: counter={total}, expected={expected}").into());
    }
    info!("no increments lost");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")),
        )
        .init();

    if std::env::var(ENV_ROLE).as_deref() == Ok(ROLE_WORKER) {
        return run_worker();
    }

    let config = match std::env::args().nth(1) {
        Some(path) => PyriteConfig::load(path)?,
        None => PyriteConfig::default(),
    };
    run_orchestrator(config)
}
