//! CPU affinity
//!
//! Workers can be pinned to cores so a spinning scheduler or a hot worker
//! does not migrate mid-run. Pinning uses `sched_setaffinity` and is only
//! available on Linux; elsewhere the call reports failure and the caller
//! decides whether that is fatal.

use crate::Result;
use anyhow::Context;

/// Pin the current thread to a single CPU core.
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(core: usize) -> Result<()> {
    use libc::{cpu_set_t, sched_setaffinity, CPU_SET, CPU_ZERO};
    use std::mem;

    unsafe {
        let mut cpu_set: cpu_set_t = mem::zeroed();
        CPU_ZERO(&mut cpu_set);
        if core >= 1024 {
            anyhow::bail!("CPU core ID {} is too large (max 1023)", core);
        }
        CPU_SET(core, &mut cpu_set);

        // 0 = current thread
        let result = sched_setaffinity(0, mem::size_of::<cpu_set_t>(), &cpu_set);
        if result != 0 {
            let err = std::io::Error::last_os_error();
            return Err(err).context(format!("Failed to pin thread to core {}", core));
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_core: usize) -> Result<()> {
    anyhow::bail!("CPU affinity is only supported on Linux")
}

/// Parse a comma-separated CPU affinity list, one core per worker.
///
/// Every entry must name a core that exists; the list length must match
/// the worker count (checked by the configuration validator, which knows
/// the worker count).
pub fn parse_cpu_list(spec: &str) -> Result<Vec<usize>> {
    let total_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(usize::MAX);

    let mut cores = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let core: usize = entry
            .parse()
            .with_context(|| format!("Invalid CPU core '{}' in affinity list", entry))?;
        if core >= total_cores {
            anyhow::bail!("Core {} does not exist ({} cores online)", core, total_cores);
        }
        cores.push(core);
    }
    Ok(cores)
}
