//! Worker pool (C6) and command channel (C7).
//!
//! Each worker is a plain OS thread running the state machine from §4.4.
//! The command channel (§4.5) is re-architected on top of `Mutex` +
//! `Condvar` per worker rather than a bare spin-on-mutex loop (§9), so idle
//! workers block instead of burning CPU that would otherwise compete with
//! the load the tool exists to generate.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::IgnisError;
use crate::loadflag::{LoadFlag, LOAD_HIGH, LOAD_STOP, LOAD_SWITCH};
use crate::payload::PayloadSetting;
use crate::platform::SelectedConfig;

/// 64-byte-aligned working memory for a worker (§3 ThreadRecord.buffer,
/// §4.3). The payload routines are cache-line sensitive the same way the
/// original's `std::aligned_alloc(64, ...)` (`ThreadWorker.cpp`) is; a plain
/// `Vec<u64>` only guarantees 8-byte alignment, so this allocates and frees
/// the buffer directly against a 64-byte `Layout`.
pub struct AlignedBuffer {
    ptr: NonNull<u64>,
    len: usize,
    layout: Layout,
}

const BUFFER_ALIGN: usize = 64;

impl AlignedBuffer {
    /// A zero-length buffer that owns no allocation, used before a worker's
    /// first `INIT`.
    pub fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            layout: Layout::from_size_align(0, BUFFER_ALIGN).unwrap(),
        }
    }

    /// Allocates `words` 64-bit words, 64-byte aligned, zero-initialized.
    /// Returns `AllocFailure` on a genuine allocator failure (OOM or a size
    /// that overflows `isize`), which is the only way this can now fail.
    pub fn alloc(words: usize) -> Result<Self, IgnisError> {
        if words == 0 {
            return Ok(Self::empty());
        }
        let size_bytes = words
            .checked_mul(std::mem::size_of::<u64>())
            .ok_or(IgnisError::AllocFailure { words })?;
        let layout = Layout::from_size_align(size_bytes, BUFFER_ALIGN)
            .map_err(|_| IgnisError::AllocFailure { words })?;
        // SAFETY: layout has a non-zero size, checked above.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw as *mut u64).ok_or(IgnisError::AllocFailure { words })?;
        Ok(Self { ptr, len: words, layout })
    }
}

impl std::ops::Deref for AlignedBuffer {
    type Target = [u64];
    fn deref(&self) -> &[u64] {
        // SAFETY: `ptr` is valid for `len` u64s for the lifetime of `self`,
        // either freshly allocated and zeroed, or `len == 0` (no reads).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl std::ops::DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u64] {
        // SAFETY: see `Deref`; `self` is uniquely borrowed here.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if self.layout.size() > 0 {
            // SAFETY: `ptr`/`layout` are exactly what `alloc_zeroed` returned.
            unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, self.layout) };
        }
    }
}

// SAFETY: the buffer owns its allocation exclusively; no aliasing across
// threads happens because a `ThreadRecord`'s buffer never leaves its worker.
unsafe impl Send for AlignedBuffer {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Wait,
    Init,
    Work,
    Switch,
    Stop,
}

struct ChannelState {
    comm: Command,
    ack: bool,
    pending_settings: Option<Vec<PayloadSetting>>,
}

/// The controller-visible side of a worker's mutex/condvar pair. Holding
/// only this (never a reference into the worker's owned `ThreadRecord`)
/// is what breaks the worker/config/platform/controller reference cycle
/// described in §9: the controller has weak, message-passing-only handles.
pub struct WorkerChannel {
    state: Mutex<ChannelState>,
    cvar: Condvar,
}

impl WorkerChannel {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                comm: Command::Wait,
                ack: false,
                pending_settings: None,
            }),
            cvar: Condvar::new(),
        }
    }
}

/// Final counters returned when a worker exits, used for the performance
/// report (C11).
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerReport {
    pub iterations: u64,
    pub start_tsc: u64,
    pub stop_tsc: u64,
}

pub struct WorkerHandle {
    pub id: usize,
    channel: Arc<WorkerChannel>,
    join: Option<JoinHandle<Result<WorkerReport, IgnisError>>>,
}

impl WorkerHandle {
    pub fn join(mut self) -> Result<WorkerReport, IgnisError> {
        self.join
            .take()
            .expect("join called twice")
            .join()
            .unwrap_or_else(|_| Err(IgnisError::AllocFailure { words: 0 }))
    }
}

#[cfg(target_arch = "x86_64")]
fn read_tsc() -> u64 {
    // SAFETY: rdtsc has no preconditions beyond x86_64 availability, which
    // the cfg guards.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
fn read_tsc() -> u64 {
    std::time::Instant::now().elapsed().as_nanos() as u64
}

fn pin_to_core(id: usize, core_ids: &[core_affinity::CoreId]) {
    if let Some(core) = core_ids.get(id % core_ids.len().max(1)) {
        if !core_affinity::set_for_current(*core) {
            tracing::warn!(worker = id, core = core.id, "failed to pin worker to core");
        }
    }
}

fn compile_and_init(
    selected: &SelectedConfig,
    settings: &[PayloadSetting],
) -> Result<(AlignedBuffer, u64, u64), IgnisError> {
    let platform = selected.platform;
    let routine = platform.payload.compile(
        settings,
        platform.data_cache_buffer_sizes,
        platform.ram_buffer_size,
        selected.threads_per_core,
        1,
    );
    let mut buf = AlignedBuffer::alloc(routine.buffersize_words)?;
    platform.payload.init_buffer(&mut buf);
    Ok((buf, routine.flops_per_iteration, routine.bytes_per_iteration))
}

fn worker_loop(
    id: usize,
    selected: SelectedConfig,
    flag: Arc<LoadFlag>,
    period_micros: u64,
    channel: Arc<WorkerChannel>,
    core_ids: Vec<core_affinity::CoreId>,
) -> Result<WorkerReport, IgnisError> {
    let mut old = Command::Wait;
    let mut settings = selected.payload_settings.clone();
    let mut buf = AlignedBuffer::empty();
    let mut report = WorkerReport::default();

    loop {
        let comm = {
            let mut guard = channel.state.lock().unwrap();
            while guard.comm == old {
                guard = channel.cvar.wait(guard).unwrap();
            }
            let comm = guard.comm;
            old = comm;
            guard.ack = true;
            if let Some(pending) = guard.pending_settings.take() {
                settings = pending;
            }
            comm
        };
        channel.cvar.notify_one();

        match comm {
            Command::Wait => {}
            Command::Init => {
                pin_to_core(id, &core_ids);
                let (new_buf, _flops, _bytes) = compile_and_init(&selected, &settings)?;
                buf = new_buf;
            }
            Command::Switch => {
                let (new_buf, _flops, _bytes) = compile_and_init(&selected, &settings)?;
                buf = new_buf;
            }
            Command::Stop => {
                return Ok(report);
            }
            Command::Work => {
                report.start_tsc = read_tsc();
                loop {
                    report.iterations =
                        selected.platform.payload.high_load(&mut buf, &flag, report.iterations);
                    selected.platform.payload.low_load(&flag, period_micros);
                    let v = flag.get();
                    if v == LOAD_STOP {
                        report.stop_tsc = read_tsc();
                        return Ok(report);
                    }
                    if v == LOAD_SWITCH {
                        break;
                    }
                }
            }
        }
    }
}

pub fn spawn_worker(
    id: usize,
    selected: SelectedConfig,
    flag: Arc<LoadFlag>,
    period_micros: u64,
    core_ids: Vec<core_affinity::CoreId>,
) -> Result<WorkerHandle, IgnisError> {
    let channel = Arc::new(WorkerChannel::new());
    let thread_channel = Arc::clone(&channel);
    let join = std::thread::Builder::new()
        .name(format!("ignis-worker-{id}"))
        .spawn(move || worker_loop(id, selected, flag, period_micros, thread_channel, core_ids))
        .map_err(|e| IgnisError::FatalInit(format!("spawning worker {id}: {e}")))?;

    Ok(WorkerHandle {
        id,
        channel,
        join: Some(join),
    })
}

/// Generic two-phase broadcast (§4.5): lock every worker, assign `comm`,
/// release, then poll every worker's `ack` and clear it. Only valid when
/// every worker is idle in its outer dispatch loop (WAIT/INIT/SWITCH), not
/// while any worker is inside a WORK loop — see [`switch_payload`] for the
/// mid-WORK case.
pub fn broadcast(workers: &[WorkerHandle], cmd: Command) {
    let mut guards: Vec<_> = workers
        .iter()
        .map(|w| w.channel.state.lock().unwrap())
        .collect();
    for guard in guards.iter_mut() {
        guard.comm = cmd;
    }
    drop(guards);
    for w in workers {
        w.channel.cvar.notify_one();
    }
    for w in workers {
        let mut guard = w.channel.state.lock().unwrap();
        while !guard.ack {
            guard = w.channel.cvar.wait(guard).unwrap();
        }
        guard.ack = false;
    }
}

/// Issues the WORK command to every worker, first setting the shared load
/// flag to HIGH so a worker that races ahead of the watchdog still has a
/// sane value to poll. For duty-cycling runs the watchdog claims the flag
/// on its own first iteration; for degenerate (period=0) runs the
/// watchdog's steady-state write follows immediately after this — see the
/// resolved Open Question in SPEC_FULL.md §9.
pub fn signal_work(workers: &[WorkerHandle], flag: &LoadFlag) {
    flag.set(LOAD_HIGH);
    broadcast(workers, Command::Work);
}

/// Retunes every worker's payload settings while they're mid-WORK (§9).
/// Settings are published under each worker's mutex before `comm` is set,
/// so a worker that wakes to handle SWITCH always sees a consistent
/// snapshot. The shared load flag is also set to SWITCH so any worker
/// currently inside `high_load`/`low_load` notices and returns to its
/// outer dispatch loop, where the already-published SWITCH command is
/// waiting.
pub fn switch_payload(
    workers: &[WorkerHandle],
    flag: &LoadFlag,
    new_settings: Vec<PayloadSetting>,
) {
    for w in workers {
        let mut guard = w.channel.state.lock().unwrap();
        guard.pending_settings = Some(new_settings.clone());
        guard.comm = Command::Switch;
    }
    flag.set(LOAD_SWITCH);
    for w in workers {
        w.channel.cvar.notify_one();
    }
    for w in workers {
        let mut guard = w.channel.state.lock().unwrap();
        while !guard.ack {
            guard = w.channel.cvar.wait(guard).unwrap();
        }
        guard.ack = false;
    }
    // Resume the duty cycle now that every worker has retuned, mirroring
    // the original's call to `signalWork()` immediately after the switch
    // handshake completes.
    flag.set(LOAD_HIGH);
    broadcast(workers, Command::Work);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadflag::LOAD_LOW;
    use crate::platform::catalog::CATALOG;

    fn selected_config() -> SelectedConfig {
        let platform = &CATALOG[0];
        SelectedConfig {
            platform,
            threads_per_core: 1,
            payload_settings: platform.default_payload_settings_owned(),
        }
    }

    #[test]
    fn init_then_work_then_stop_returns_iterations() {
        let flag = Arc::new(LoadFlag::new(LOAD_HIGH));
        let worker = spawn_worker(0, selected_config(), Arc::clone(&flag), 1000, Vec::new()).unwrap();
        broadcast(std::slice::from_ref(&worker), Command::Init);
        signal_work(std::slice::from_ref(&worker), &flag);
        std::thread::sleep(std::time::Duration::from_millis(20));
        flag.set(crate::loadflag::LOAD_STOP);
        let report = worker.join().unwrap();
        assert!(report.iterations > 0);
        assert!(report.stop_tsc >= report.start_tsc || report.stop_tsc == 0);
    }

    #[test]
    fn ack_returns_to_false_before_next_broadcast() {
        let flag = Arc::new(LoadFlag::new(LOAD_LOW));
        let worker = spawn_worker(0, selected_config(), Arc::clone(&flag), 1000, Vec::new()).unwrap();
        broadcast(std::slice::from_ref(&worker), Command::Init);
        {
            let guard = worker.channel.state.lock().unwrap();
            assert!(!guard.ack);
        }
        broadcast(std::slice::from_ref(&worker), Command::Stop);
        let _ = worker.join();
    }

    #[test]
    fn aligned_buffer_is_64_byte_aligned() {
        let buf = AlignedBuffer::alloc(4096).unwrap();
        assert_eq!(buf.as_ptr() as usize % BUFFER_ALIGN, 0);
        assert_eq!(buf.len(), 4096);
    }

    #[test]
    fn aligned_buffer_zero_words_is_empty_and_never_dereferenced() {
        let buf = AlignedBuffer::alloc(0).unwrap();
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn aligned_buffer_is_writable_and_readable() {
        let mut buf = AlignedBuffer::alloc(8).unwrap();
        for (i, word) in buf.iter_mut().enumerate() {
            *word = i as u64;
        }
        assert_eq!(&buf[..], &[0, 1, 2, 3, 4, 5, 6, 7]);
    }
}
