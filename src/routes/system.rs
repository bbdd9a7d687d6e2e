//! Host metrics endpoint.
//!
//! `GET /api/system` returns a snapshot of the machine the console runs on
//! together with the supervisor's version, for dashboard polling.
//!
//! ## Data sources
//!
//! | Field          | Source                                  |
//! |----------------|-----------------------------------------|
//! | `hostname`     | `/proc/sys/kernel/hostname`             |
//! | `uptime_secs`  | `/proc/uptime`                          |
//! | `cpu.usage`    | `/proc/stat` (aggregate since boot)     |
//! | `cpu.model`    | `/proc/cpuinfo`                         |
//! | `load_average` | `/proc/loadavg`                         |
//! | `memory`       | `/proc/meminfo`                         |
//! | `disk`         | `statvfs("/")`                          |
//! | `versions.pm2` | supervisor `--version`                  |

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/system`
///
/// A missing source yields zeroes (or `null` for disk) rather than an error,
/// and an unreachable supervisor reports its version as `null`.
pub async fn system(State(state): State<AppState>) -> Json<Value> {
    let hostname = read_proc_file("/proc/sys/kernel/hostname");
    let uptime = read_proc_file("/proc/uptime");
    let stat = read_proc_file("/proc/stat");
    let cpuinfo = read_proc_file("/proc/cpuinfo");
    let loadavg = read_proc_file("/proc/loadavg");
    let meminfo = read_proc_file("/proc/meminfo");

    let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    let memory = parse_meminfo(&meminfo);
    let pm2 = state.supervisor.version().await;

    Json(json!({
        "metrics": {
            "cpu": {
                "usage": parse_cpu_usage(&stat),
                "cores": cores,
                "model": parse_cpu_model(&cpuinfo),
            },
            "memory": memory,
            "disk": disk_usage("/"),
            "uptime_secs": parse_uptime(&uptime),
            "load_average": parse_loadavg(&loadavg),
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "hostname": hostname.trim(),
        },
        "versions": {
            "opsdeck": env!("CARGO_PKG_VERSION"),
            "pm2": pm2,
        },
    }))
}

fn read_proc_file(path: &str) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        return 0;
    }
    (part.saturating_mul(100) + whole / 2) / whole
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_uptime(uptime: &str) -> u64 {
    uptime
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0) as u64
}

/// Busy share of all CPU time from the aggregate `cpu` line, in percent.
/// Idle time includes iowait.
fn parse_cpu_usage(stat: &str) -> u64 {
    let Some(line) = stat.lines().find(|l| l.starts_with("cpu ")) else {
        return 0;
    };
    let ticks: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    let total: u64 = ticks.iter().sum();
    let idle = ticks.get(3).copied().unwrap_or(0) + ticks.get(4).copied().unwrap_or(0);
    percent(total.saturating_sub(idle), total)
}

/// `model name` on x86, `Hardware` on ARM.
fn parse_cpu_model(cpuinfo: &str) -> String {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name") || l.starts_with("Hardware"))
        .and_then(|l| l.split_once(':'))
        .map_or_else(|| "unknown".to_string(), |(_, v)| v.trim().to_string())
}

fn parse_loadavg(loadavg: &str) -> Vec<f64> {
    loadavg
        .split_whitespace()
        .take(3)
        .filter_map(|s| s.parse::<f64>().ok())
        .collect()
}

/// Total, used and free memory in bytes. "Used" excludes reclaimable cache.
fn parse_meminfo(meminfo: &str) -> Value {
    let mut total = 0u64;
    let mut available = None;
    let mut free = 0u64;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb_value(rest) * 1024;
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = Some(parse_kb_value(rest) * 1024);
        } else if let Some(rest) = line.strip_prefix("MemFree:") {
            free = parse_kb_value(rest) * 1024;
        }
    }
    // Kernels before 3.14 have no MemAvailable.
    let free = available.unwrap_or(free).min(total);
    let used = total - free;
    json!({
        "total": total,
        "used": used,
        "free": free,
        "percent": percent(used, total),
    })
}

fn parse_kb_value(s: &str) -> u64 {
    s.split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Usage of the filesystem holding `path`, or `null` if `statvfs` fails.
fn disk_usage(path: &str) -> Value {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let Ok(c_path) = CString::new(path) else {
        return Value::Null;
    };
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: valid C string and a properly aligned out-pointer.
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return Value::Null;
    }
    // SAFETY: statvfs returned 0, so the struct is initialised.
    let stat = unsafe { stat.assume_init() };

    #[allow(clippy::unnecessary_cast, clippy::useless_conversion)]
    let (block, blocks, bfree, bavail) = (
        u64::from(stat.f_frsize),
        u64::from(stat.f_blocks),
        u64::from(stat.f_bfree),
        u64::from(stat.f_bavail),
    );
    let total = blocks * block;
    let used = total - bfree * block;
    let available = bavail * block;

    json!({
        "path": path,
        "total": total,
        "used": used,
        "available": available,
        "percent": percent(used, used + available),
    })
}
