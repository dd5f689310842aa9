//! Watchdog (C8): the single duty-cycle controller.
//!
//! Cancellation is driven by a process-wide `AtomicBool` set from SIGINT/
//! SIGTERM handlers (§9). Rather than relying on a blocking nanosleep being
//! interrupted by a signal landing on this specific thread — which isn't
//! guaranteed once a process has more than one thread — every sleep here
//! is chunked into short, cancellable slices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::time::TimeSpec;
use nix::time::{clock_nanosleep, ClockId, ClockNanosleepFlags};

use crate::error::IgnisError;
use crate::loadflag::{LoadFlag, LOAD_HIGH, LOAD_LOW, LOAD_STOP};

const SLICE: Duration = Duration::from_millis(20);

/// Sleeps for `duration`, checking `terminate` between short slices so
/// cancellation latency is bounded by [`SLICE`] regardless of which OS
/// thread actually receives the signal.
pub fn sleep_with_cancel(duration: Duration, terminate: &AtomicBool) -> Result<(), IgnisError> {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if terminate.load(Ordering::SeqCst) {
            return Ok(());
        }
        let slice = remaining.min(SLICE);
        let ts = TimeSpec::from_duration(slice);
        match clock_nanosleep(ClockId::CLOCK_MONOTONIC, ClockNanosleepFlags::empty(), &ts) {
            Ok(()) => {}
            Err(nix::errno::Errno::EINTR) => {}
            Err(e) => return Err(IgnisError::SleepError(e)),
        }
        remaining = remaining.saturating_sub(slice);
    }
    Ok(())
}

pub struct Watchdog {
    pub period: Duration,
    pub load: Duration,
    pub timeout: Duration,
}

impl Watchdog {
    /// Runs the duty-cycle loop described in §4.6, writing to `flag` and
    /// returning once either the timeout elapses or `terminate` is set.
    pub fn run(&self, flag: Arc<LoadFlag>, terminate: Arc<AtomicBool>) -> Result<(), IgnisError> {
        if self.period.is_zero() {
            return self.run_degenerate(&flag, &terminate);
        }

        let start = Instant::now();
        let mut elapsed_target = Duration::ZERO;

        loop {
            let now = Instant::now();
            let advance = nanos_mod(now.duration_since(start), self.period);
            let load_reduction = proportional(self.load, advance, self.period);
            let idle_reduction = advance.saturating_sub(load_reduction);

            flag.set(LOAD_HIGH);
            self.sleep_or_stop(self.load.saturating_sub(load_reduction), &flag, &terminate)?;
            if terminate.load(Ordering::SeqCst) {
                flag.set(LOAD_STOP);
                return Ok(());
            }

            flag.set(LOAD_LOW);
            let idle = self.period.saturating_sub(self.load);
            self.sleep_or_stop(idle.saturating_sub(idle_reduction), &flag, &terminate)?;

            elapsed_target += self.period;
            if terminate.load(Ordering::SeqCst)
                || (!self.timeout.is_zero() && elapsed_target > self.timeout)
            {
                flag.set(LOAD_STOP);
                return Ok(());
            }
        }
    }

    fn sleep_or_stop(
        &self,
        duration: Duration,
        flag: &LoadFlag,
        terminate: &AtomicBool,
    ) -> Result<(), IgnisError> {
        match sleep_with_cancel(duration, terminate) {
            Ok(()) => Ok(()),
            Err(e) => {
                flag.set(LOAD_STOP);
                Err(e)
            }
        }
    }

    /// P=0 paths (§4.6): the flag never toggles, it simply holds the value
    /// implied by the load percentage (LOW at 0%, HIGH at 100%) for the
    /// whole run. This is also where the resolved Open Question (SPEC_FULL
    /// §9) lives: these degenerate branches are the sole writer of the
    /// initial steady-state value, not worker initialization.
    fn run_degenerate(&self, flag: &LoadFlag, terminate: &AtomicBool) -> Result<(), IgnisError> {
        let steady = if self.load.is_zero() { LOAD_LOW } else { LOAD_HIGH };
        flag.set(steady);

        if self.timeout.is_zero() {
            // Sleep forever in bounded slices until a signal arrives.
            loop {
                if terminate.load(Ordering::SeqCst) {
                    flag.set(LOAD_STOP);
                    return Ok(());
                }
                self.sleep_or_stop(SLICE, flag, terminate)?;
            }
        }

        self.sleep_or_stop(self.timeout, flag, terminate)?;
        flag.set(LOAD_STOP);
        Ok(())
    }
}

fn nanos_mod(value: Duration, modulus: Duration) -> Duration {
    if modulus.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_nanos((value.as_nanos() % modulus.as_nanos()) as u64)
}

fn proportional(numerator_scale: Duration, advance: Duration, period: Duration) -> Duration {
    if period.is_zero() {
        return Duration::ZERO;
    }
    let scaled = numerator_scale.as_nanos() * advance.as_nanos() / period.as_nanos();
    Duration::from_nanos(scaled as u64)
}

/// Installs SIGINT/SIGTERM handlers that set `terminate`. Safe to call
/// once at process start, before the watchdog thread is spawned.
///
/// # Safety
/// Installs a process-wide signal handler via `nix::sys::signal::signal`,
/// which is unsafe because the handler must only perform async-signal-safe
/// operations; ours stores into an `AtomicBool` and nothing else.
pub fn install_signal_handlers(terminate: Arc<AtomicBool>) {
    use std::sync::OnceLock;
    static TERMINATE: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    let _ = TERMINATE.set(terminate);

    extern "C" fn handler(_signum: i32) {
        if let Some(flag) = TERMINATE.get() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    unsafe {
        use nix::sys::signal::{signal, SigHandler, Signal};
        let _ = signal(Signal::SIGINT, SigHandler::Handler(handler));
        let _ = signal(Signal::SIGTERM, SigHandler::Handler(handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_load_zero_stays_low_until_stop() {
        let flag = Arc::new(LoadFlag::new(LOAD_HIGH));
        let terminate = Arc::new(AtomicBool::new(false));
        let wd = Watchdog {
            period: Duration::ZERO,
            load: Duration::ZERO,
            timeout: Duration::from_millis(50),
        };
        let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
        let obs = Arc::clone(&observed);
        let watch_flag = Arc::clone(&flag);
        let sampler = std::thread::spawn(move || {
            for _ in 0..4 {
                obs.lock().unwrap().push(watch_flag.get());
                std::thread::sleep(Duration::from_millis(10));
            }
        });
        wd.run(flag.clone(), terminate).unwrap();
        sampler.join().unwrap();
        assert_eq!(flag.get(), LOAD_STOP);
        assert!(observed.lock().unwrap().iter().all(|&v| v == LOAD_LOW || v == LOAD_STOP));
    }

    #[test]
    fn degenerate_load_full_holds_high_until_stop() {
        let flag = Arc::new(LoadFlag::new(LOAD_LOW));
        let terminate = Arc::new(AtomicBool::new(false));
        let wd = Watchdog {
            period: Duration::ZERO,
            load: Duration::from_millis(50),
            timeout: Duration::from_millis(50),
        };
        wd.run(Arc::clone(&flag), terminate).unwrap();
        assert_eq!(flag.get(), LOAD_STOP);
    }

    #[test]
    fn terminate_flag_stops_promptly() {
        let flag = Arc::new(LoadFlag::new(LOAD_LOW));
        let terminate = Arc::new(AtomicBool::new(false));
        let wd = Watchdog {
            period: Duration::from_millis(200),
            load: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
        };
        let t = Arc::clone(&terminate);
        let watch_flag = Arc::clone(&flag);
        let watch_wd = Watchdog {
            period: wd.period,
            load: wd.load,
            timeout: wd.timeout,
        };
        let handle = std::thread::spawn(move || watch_wd.run(watch_flag, t));
        std::thread::sleep(Duration::from_millis(30));
        let started = Instant::now();
        terminate.store(true, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(flag.get(), LOAD_STOP);
    }

    #[test]
    fn duty_cycle_runs_expected_number_of_cycles() {
        let flag = Arc::new(LoadFlag::new(LOAD_LOW));
        let terminate = Arc::new(AtomicBool::new(false));
        let high_count = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let wd = Watchdog {
            period: Duration::from_millis(20),
            load: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
        };
        let counter = Arc::clone(&high_count);
        let watch_flag = Arc::clone(&flag);
        let sampler = std::thread::spawn(move || loop {
            let v = watch_flag.get();
            if v == LOAD_HIGH {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            if v == LOAD_STOP {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        });
        wd.run(flag, terminate).unwrap();
        sampler.join().unwrap();
        assert!(high_count.load(Ordering::Relaxed) > 0);
    }
}
