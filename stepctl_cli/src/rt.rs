//! Real-time scheduling for the tick loop (Linux SCHED_FIFO / affinity /
//! mlockall; macOS mlockall only).
//!
//! Applied to the calling thread before the session starts; the tick thread
//! spawned afterwards inherits the scheduling policy and CPU mask.

use crate::cli::{RtArgs, RtLock};

/// Effective real-time settings after merging `[runner]` with CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtPlan {
    pub enabled: bool,
    pub prio: Option<i32>,
    pub lock: RtLock,
    pub cpu: Option<usize>,
}

impl RtPlan {
    pub fn resolve(args: &RtArgs, cfg: &stepctl_config::RunnerCfg) -> Self {
        let lock = args.rt_lock.unwrap_or(if cfg.rt_lock {
            RtLock::All
        } else {
            RtLock::os_default()
        });
        Self {
            enabled: args.rt || cfg.rt,
            prio: args.rt_prio.or(cfg.rt_prio),
            lock,
            cpu: args.rt_cpu.or(cfg.rt_cpu),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};
    let flags = match lock {
        RtLock::None => return Ok(()),
        RtLock::Current => MCL_CURRENT,
        RtLock::All => MCL_CURRENT | MCL_FUTURE,
    };
    let rc = unsafe { mlockall(flags) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // Future pages can exceed RLIMIT_MEMLOCK; settle for what is resident.
    if lock == RtLock::All
        && matches!(err.raw_os_error(), Some(c) if c == libc::EPERM || c == libc::ENOMEM)
        && unsafe { mlockall(MCL_CURRENT) } == 0
    {
        tracing::warn!(error = %err, "mlockall(current|future) failed; locked current pages only");
        return Ok(());
    }
    Err(eyre::eyre!(
        "mlockall failed: {err}; needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'"
    ))
}

#[cfg(target_os = "linux")]
fn apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
    use libc::{SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param};
    let (min, max) = unsafe {
        let min = sched_get_priority_min(SCHED_FIFO);
        let max = sched_get_priority_max(SCHED_FIFO);
        if min < 0 || max < 0 { (1, 99) } else { (min, max) }
    };
    let prio_val = prio.unwrap_or(max).clamp(min, max);
    let param = sched_param {
        sched_priority: prio_val,
    };
    let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        eyre::bail!("sched_setscheduler(SCHED_FIFO, {prio_val}) failed: {err}; needs CAP_SYS_NICE or root");
    }
    Ok(prio_val)
}

#[cfg(target_os = "linux")]
fn apply_affinity(cpu: Option<usize>) -> eyre::Result<usize> {
    let set_bits = std::mem::size_of::<libc::cpu_set_t>() * 8;
    let target = cpu.unwrap_or(0);
    if target >= set_bits {
        eyre::bail!("requested CPU {target} exceeds cpu_set_t capacity {set_bits}");
    }
    let mut allowed: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut allowed)
    };
    if rc != 0 {
        eyre::bail!("sched_getaffinity failed: {}", std::io::Error::last_os_error());
    }
    if !unsafe { libc::CPU_ISSET(target, &allowed) } {
        eyre::bail!("CPU {target} not permitted by current affinity mask");
    }
    let mut desired: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::CPU_ZERO(&mut desired);
        libc::CPU_SET(target, &mut desired);
    }
    let rc =
        unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &desired) };
    if rc != 0 {
        eyre::bail!("sched_setaffinity failed: {}", std::io::Error::last_os_error());
    }
    Ok(target)
}

/// Apply `plan` once per process. Failures are logged and the session runs
/// without the corresponding guarantee.
pub fn setup_rt_once(plan: RtPlan) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !plan.enabled {
        return;
    }
    RT_ONCE.get_or_init(|| {
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        match apply_mem_lock(plan.lock) {
            Ok(()) => tracing::info!(lock = ?plan.lock, "rt: memory lock applied"),
            Err(err) => tracing::warn!(error = %err, "rt: memory lock not applied"),
        }
        #[cfg(target_os = "linux")]
        {
            match apply_fifo_priority(plan.prio) {
                Ok(prio) => tracing::info!(prio, "rt: SCHED_FIFO enabled"),
                Err(err) => tracing::warn!(error = %err, "rt: SCHED_FIFO not applied"),
            }
            match apply_affinity(plan.cpu) {
                Ok(cpu) => tracing::info!(cpu, "rt: pinned"),
                Err(err) => tracing::warn!(error = %err, "rt: affinity not applied"),
            }
        }
        #[cfg(not(target_os = "linux"))]
        tracing::warn!(
            prio = ?plan.prio,
            cpu = ?plan.cpu,
            "rt: SCHED_FIFO and affinity unsupported on this OS"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cfg = stepctl_config::RunnerCfg {
            rt: false,
            rt_prio: Some(10),
            rt_cpu: Some(1),
            rt_lock: true,
        };
        let args = RtArgs {
            rt: true,
            rt_prio: Some(50),
            rt_lock: None,
            rt_cpu: None,
        };
        let plan = RtPlan::resolve(&args, &cfg);
        assert!(plan.enabled);
        assert_eq!(plan.prio, Some(50));
        assert_eq!(plan.cpu, Some(1));
        assert_eq!(plan.lock, RtLock::All);
    }

    #[test]
    fn disabled_plan_is_a_no_op() {
        let plan = RtPlan::resolve(&RtArgs::default(), &stepctl_config::RunnerCfg::default());
        assert!(!plan.enabled);
        setup_rt_once(plan);
    }
}
