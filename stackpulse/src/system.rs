//! Resource readings of the current process
//!
//! CPU time and peak RSS come from `getrusage(RUSAGE_SELF)`. Current RSS and
//! virtual size come from `/proc/self/status`, so they are Linux-only.

#![allow(unsafe_code)] // getrusage() requires unsafe

use anyhow::{bail, Context, Result};
use std::mem::MaybeUninit;
use std::time::Duration;

fn rusage_self() -> Result<libc::rusage> {
    let mut usage = MaybeUninit::<libc::rusage>::zeroed();
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error()).context("getrusage(RUSAGE_SELF) failed");
    }
    // getrusage filled the struct on success
    Ok(unsafe { usage.assume_init() })
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
    let micros = u64::try_from(tv.tv_usec).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(micros)
}

/// User plus system CPU time consumed by the process so far
pub fn cpu_time() -> Result<Duration> {
    let usage = rusage_self()?;
    Ok(timeval_to_duration(usage.ru_utime) + timeval_to_duration(usage.ru_stime))
}

/// Peak resident set size in kilobytes
pub fn max_rss_kb() -> Result<u64> {
    let usage = rusage_self()?;
    let raw = u64::try_from(usage.ru_maxrss).unwrap_or(0);
    // macOS reports bytes, Linux kilobytes
    if cfg!(target_os = "macos") {
        Ok(raw / 1024)
    } else {
        Ok(raw)
    }
}

/// Current resident set size in kilobytes
pub fn current_rss_kb() -> Result<u64> {
    status_field_kb("VmRSS")
}

/// Virtual memory size in kilobytes
pub fn vm_size_kb() -> Result<u64> {
    status_field_kb("VmSize")
}

fn status_field_kb(field: &str) -> Result<u64> {
    let status = std::fs::read_to_string("/proc/self/status").context("Failed to read /proc/self/status")?;
    match parse_status_kb(&status, field) {
        Some(kb) => Ok(kb),
        None => bail!("Field {field} not found in /proc/self/status"),
    }
}

/// Parse a `Name:   1234 kB` line out of a `/proc/<pid>/status` dump
fn parse_status_kb(status: &str, field: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name != field {
            return None;
        }
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Logical CPUs available to the process (at least 1)
#[must_use]
pub fn cpu_count() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tdemo\nVmPeak:\t  20000 kB\nVmSize:\t  18000 kB\nVmRSS:\t    4096 kB\nThreads:\t4\n";

    #[test]
    fn test_parse_status_fields() {
        assert_eq!(parse_status_kb(STATUS, "VmRSS"), Some(4096));
        assert_eq!(parse_status_kb(STATUS, "VmSize"), Some(18000));
        assert_eq!(parse_status_kb(STATUS, "VmSwap"), None);
        // Prefix of another field must not match
        assert_eq!(parse_status_kb(STATUS, "Vm"), None);
    }

    #[test]
    fn test_cpu_time_is_monotonic() {
        let before = cpu_time().unwrap();
        let mut x = 0u64;
        for i in 0..2_000_000u64 {
            x = x.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(x);
        assert!(cpu_time().unwrap() >= before);
    }

    #[test]
    fn test_max_rss_nonzero() {
        assert!(max_rss_kb().unwrap() > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_proc_status_readable() {
        assert!(current_rss_kb().unwrap() > 0);
        assert!(vm_size_kb().unwrap() >= current_rss_kb().unwrap());
    }
}
