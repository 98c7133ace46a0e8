//! Real-time scheduling for the engine thread (Linux SCHED_FIFO / affinity /
//! mlockall). Applied to the main thread before a run starts; the engine
//! thread inherits policy and affinity when it is spawned.

use crate::cli::RtArgs;
#[cfg(target_os = "linux")]
use crate::cli::RtLock;

#[cfg(target_os = "linux")]
/// Capacity of cpu_set_t in CPU indices (bits).
const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

#[cfg(target_os = "linux")]
fn memlock_limit_hint() -> Option<String> {
    let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
    // SAFETY: getrlimit writes a full rlimit on success.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: rc == 0 above.
    let cur = unsafe { rlim.assume_init() }.rlim_cur;
    if cur == libc::RLIM_INFINITY {
        Some("memlock limit: unlimited".to_string())
    } else {
        Some(format!("memlock limit: {} KiB", cur / 1024))
    }
}

#[cfg(target_os = "linux")]
fn mlockall(flags: libc::c_int) -> std::io::Result<()> {
    // SAFETY: plain syscall, no pointers.
    if unsafe { libc::mlockall(flags) } != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE};
    let retryable = |e: &std::io::Error| {
        matches!(e.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM)
    };
    let result = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => mlockall(MCL_CURRENT),
        RtLock::All => mlockall(MCL_CURRENT | MCL_FUTURE),
    };
    let Err(err) = result else {
        return Ok(());
    };
    // current|future failing for lack of privilege or memory: settle for current
    if lock == RtLock::All && retryable(&err) && mlockall(MCL_CURRENT).is_ok() {
        tracing::warn!(error = %err, "mlockall(current|future) failed, locked current pages only");
        return Ok(());
    }
    let mut msg = format!("mlockall failed: {err}");
    if retryable(&err) {
        if let Some(h) = memlock_limit_hint() {
            msg.push_str(&format!("; {h}"));
        }
        msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
    }
    Err(eyre::eyre!(msg))
}

#[cfg(target_os = "linux")]
fn try_apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
    use libc::{SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param};
    // SAFETY: plain syscalls.
    let (min, max) = unsafe {
        let min = sched_get_priority_min(SCHED_FIFO);
        let max = sched_get_priority_max(SCHED_FIFO);
        if min < 0 || max < 0 { (1, 99) } else { (min, max) }
    };
    let prio_val = prio.unwrap_or(max).clamp(min, max);
    let param = sched_param {
        sched_priority: prio_val,
    };
    // SAFETY: param outlives the call.
    let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // SAFETY: plain syscall.
        let euid = unsafe { libc::geteuid() };
        eyre::bail!(
            "sched_setscheduler(SCHED_FIFO, {prio_val}) failed: {err}; needs CAP_SYS_NICE or root (euid {euid})"
        );
    }
    Ok(prio_val)
}

#[cfg(target_os = "linux")]
fn try_apply_affinity(rt_cpu: Option<usize>) -> eyre::Result<usize> {
    use libc::{CPU_ISSET, CPU_SET, CPU_ZERO, cpu_set_t};
    let target = rt_cpu.unwrap_or(0);
    if target >= MAX_CPUSET_BITS {
        eyre::bail!("requested CPU {target} exceeds cpu_set_t capacity {MAX_CPUSET_BITS}");
    }
    // SAFETY: cpu_set_t is plain data; all pointers are to locals.
    unsafe {
        let mut allowed: cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut allowed);
        if libc::sched_getaffinity(0, std::mem::size_of::<cpu_set_t>(), &mut allowed) != 0 {
            eyre::bail!("sched_getaffinity failed: {}", std::io::Error::last_os_error());
        }
        if (CPU_ISSET(target, &allowed) as libc::c_int) == 0 {
            eyre::bail!("CPU {target} not permitted by current affinity mask");
        }
        let mut desired: cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut desired);
        CPU_SET(target, &mut desired);
        if libc::sched_setaffinity(0, std::mem::size_of::<cpu_set_t>(), &desired) != 0 {
            eyre::bail!("sched_setaffinity failed: {}", std::io::Error::last_os_error());
        }
    }
    Ok(target)
}

/// Apply the requested real-time settings once per process. Failures are
/// logged and the run continues without them.
#[cfg(target_os = "linux")]
pub fn setup_rt_once(args: &RtArgs) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();
    if !args.rt {
        return;
    }
    let lock = args.rt_lock.unwrap_or_else(RtLock::os_default);
    RT_ONCE.get_or_init(|| {
        match try_apply_mem_lock(lock) {
            Ok(()) => tracing::info!(?lock, "rt: memory lock"),
            Err(err) => tracing::warn!(error = %err, "rt: memory lock not applied"),
        }
        match try_apply_fifo_priority(args.rt_prio) {
            Ok(prio) => tracing::info!(prio, "rt: SCHED_FIFO"),
            Err(err) => tracing::warn!(error = %err, "rt: SCHED_FIFO not applied"),
        }
        match try_apply_affinity(args.rt_cpu) {
            Ok(cpu) => tracing::info!(cpu, "rt: pinned"),
            Err(err) => tracing::warn!(error = %err, "rt: affinity not applied"),
        }
    });
}

#[cfg(not(target_os = "linux"))]
pub fn setup_rt_once(args: &RtArgs) {
    if args.rt {
        tracing::warn!("real-time mode is only supported on Linux; ignoring --rt");
    }
}
