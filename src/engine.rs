//! Process entry orchestration (C9, ambient): wires the probe, selector,
//! worker pool and watchdog together and maps the result to an exit code.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::Args;
use crate::error::IgnisError;
use crate::loadflag::{LoadFlag, LOAD_HIGH};
use crate::platform::catalog::{CATALOG, FALLBACK_CATALOG};
use crate::platform::{enumerate_functions, select_function};
use crate::report::PerformanceReport;
use crate::topology::{parse_cpu_list, TopologyInfo};
use crate::watchdog::{install_signal_handlers, Watchdog};
use crate::worker::{broadcast, signal_work, spawn_worker, Command};

/// The resolved, validated run configuration derived once from CLI
/// arguments (SPEC_FULL §3 EngineConfig).
pub struct EngineConfig {
    pub timeout: Duration,
    pub load_percent: u8,
    pub period: Duration,
    pub requested_threads: Option<usize>,
    pub cpu_bind: Option<Vec<u32>>,
    pub function_id: u32,
    pub allow_unavailable_payload: bool,
    pub list_functions: bool,
}

impl TryFrom<&Args> for EngineConfig {
    type Error = IgnisError;

    /// §6: if both `--threads` and `--bind` are given, the cpuset length
    /// must match the thread count, or the pair is rejected outright.
    fn try_from(args: &Args) -> Result<Self, IgnisError> {
        let cpu_bind = args.bind.as_deref().map(parse_cpu_list);
        if let (Some(threads), Some(ids)) = (args.threads, cpu_bind.as_ref()) {
            if threads != ids.len() {
                return Err(IgnisError::ThreadBindMismatch {
                    threads,
                    bind_len: ids.len(),
                });
            }
        }
        Ok(Self {
            timeout: Duration::from_secs(args.timeout),
            load_percent: args.load.min(100),
            period: Duration::from_micros(args.period),
            requested_threads: args.threads,
            cpu_bind,
            function_id: args.function,
            allow_unavailable_payload: args.allow_unavailable,
            list_functions: args.list_functions,
        })
    }
}

pub fn print_function_summary(topo: &TopologyInfo) {
    println!(" available load-functions:");
    println!("  ID   | NAME                           | available on this system | payload default setting");
    println!("  {}", "-".repeat(100));
    for (id, platform, _threads, name) in enumerate_functions(&CATALOG) {
        let available = if platform.is_available(topo) { "yes" } else { "no" };
        println!(
            "  {:>4} | {:<30} | {:<24} | {}",
            id,
            name,
            available,
            platform.default_payload_settings_string()
        );
    }
}

/// Runs the full engine: probe, select, spawn workers, drive the watchdog,
/// join, report. Returns `Ok(())` on a clean run or the first fatal
/// `IgnisError` encountered.
pub fn run(config: EngineConfig) -> Result<(), IgnisError> {
    let topo = TopologyInfo::probe()?;
    tracing::info!(
        packages = topo.packages,
        physical_cores_per_package = topo.physical_cores_per_package,
        threads_per_core = topo.threads_per_core,
        total_threads = topo.total_threads,
        vendor = %topo.vendor,
        model = %topo.model_name,
        "topology probe complete"
    );

    if config.list_functions {
        print_function_summary(&topo);
        return Ok(());
    }

    let selected = select_function(
        &topo,
        &CATALOG,
        &FALLBACK_CATALOG,
        config.function_id,
        config.allow_unavailable_payload,
    )?;
    tracing::info!(
        platform = selected.platform.name,
        payload = selected.platform.payload.name(),
        threads_per_core = selected.threads_per_core,
        "selected code path"
    );

    let thread_count = config
        .cpu_bind
        .as_ref()
        .map(|b| b.len())
        .or(config.requested_threads)
        .unwrap_or(topo.total_threads as usize)
        .max(1);

    let core_ids = resolve_core_ids(&config, thread_count);

    let load = Duration::from_micros(
        (config.period.as_micros() as u64 * config.load_percent as u64) / 100,
    );
    let period = if config.load_percent == 100 || load.is_zero() {
        Duration::ZERO
    } else {
        config.period
    };

    let flag = Arc::new(LoadFlag::new(LOAD_HIGH));
    let terminate = Arc::new(AtomicBool::new(false));
    install_signal_handlers(Arc::clone(&terminate));

    let period_micros = config.period.as_micros() as u64;
    let workers: Vec<_> = (0..thread_count)
        .map(|id| {
            spawn_worker(
                id,
                selected.clone(),
                Arc::clone(&flag),
                period_micros,
                core_ids.clone(),
            )
        })
        .collect::<Result<_, IgnisError>>()?;

    broadcast(&workers, Command::Init);
    let start = Instant::now();
    signal_work(&workers, &flag);

    let watchdog = Watchdog {
        period,
        load,
        timeout: config.timeout,
    };
    watchdog.run(Arc::clone(&flag), Arc::clone(&terminate))?;

    let elapsed = start.elapsed();
    let mut reports = Vec::with_capacity(workers.len());
    for w in workers {
        reports.push(w.join()?);
    }

    let routine = selected.platform.payload.compile(
        &selected.payload_settings,
        selected.platform.data_cache_buffer_sizes,
        selected.platform.ram_buffer_size,
        selected.threads_per_core,
        1,
    );
    let report = PerformanceReport::compute(
        &reports,
        elapsed,
        routine.flops_per_iteration,
        routine.bytes_per_iteration,
    );
    report.log();

    Ok(())
}

fn resolve_core_ids(config: &EngineConfig, thread_count: usize) -> Vec<core_affinity::CoreId> {
    if let Some(ids) = &config.cpu_bind {
        return ids.iter().map(|&id| core_affinity::CoreId { id: id as usize }).collect();
    }
    let available = core_affinity::get_core_ids().unwrap_or_default();
    if available.is_empty() {
        return Vec::new();
    }
    (0..thread_count)
        .map(|i| available[i % available.len()])
        .collect()
}
