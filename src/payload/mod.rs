//! Payload ABI (C3): the abstract contract a hand-written high-load/low-load
//! routine pair satisfies. The code generator that would normally produce
//! this routine from an instruction mix is out of scope; these are plain
//! Rust implementations of the same interface.

pub mod avx;
pub mod sse2;

use std::collections::HashMap;

use crate::loadflag::{LoadFlag, LOAD_HIGH, LOAD_STOP};

/// A single `(instructionGroup, weight)` entry of a payload settings vector.
pub type PayloadSetting = (String, u32);

/// The bound parameters produced by [`Payload::compile`]. In a JIT-backed
/// implementation this would wrap a freshly generated function; here it
/// bundles the resolved per-thread sizing so `high_load`/`low_load` have
/// everything they need without re-deriving it every call.
pub struct CompiledRoutine {
    pub buffersize_words: usize,
    pub flops_per_iteration: u64,
    pub bytes_per_iteration: u64,
}

pub trait Payload: Send + Sync {
    fn name(&self) -> &'static str;

    /// First/last values for the deterministic buffer-init sequence (§4.3).
    fn init_values(&self) -> (f64, f64);

    fn required_features(&self) -> &'static [&'static str];

    fn is_available(&self, host_features: &HashMap<String, bool>) -> bool {
        self.required_features()
            .iter()
            .all(|f| *host_features.get(*f).unwrap_or(&false))
    }

    fn compile(
        &self,
        settings: &[PayloadSetting],
        data_cache_buffer_sizes: &[u64],
        ram_buffer_size: u64,
        threads_per_core: u32,
        line_count: u32,
    ) -> CompiledRoutine {
        let total_bytes: u64 = data_cache_buffer_sizes.iter().sum::<u64>() + ram_buffer_size;
        let per_thread_words = (total_bytes / threads_per_core.max(1) as u64 / 8).max(1024);
        // `settings` weights the instruction-group mix; it does not change
        // the per-iteration sizing here since the mix itself is opaque to
        // this stand-in for a real code generator.
        let _ = settings;
        CompiledRoutine {
            buffersize_words: per_thread_words as usize,
            flops_per_iteration: 2 * per_thread_words as u64 * line_count.max(1) as u64,
            bytes_per_iteration: per_thread_words as u64 * 8,
        }
    }

    /// Fills `buf` with a deterministic geometric progression from
    /// `init_values().0` down to `init_values().1`, in 1024-word blocks.
    fn init_buffer(&self, buf: &mut [u64]) {
        let (first, last) = self.init_values();
        init_buffer_geometric(buf, first, last);
    }

    /// Runs until the shared flag departs from HIGH. Every iteration polls
    /// the flag exactly once, satisfying the Payload ABI's polling
    /// requirement.
    fn high_load(&self, buf: &mut [u64], flag: &LoadFlag, mut iterations: u64) -> u64 {
        loop {
            burn(buf);
            iterations += 1;
            if flag.get() != LOAD_HIGH {
                return iterations;
            }
        }
    }

    /// Idle-phase behavior: polls until the flag becomes HIGH again or
    /// observes STOP/SWITCH.
    fn low_load(&self, flag: &LoadFlag, period_micros: u64) {
        let slice = std::time::Duration::from_micros((period_micros / 100).max(50));
        loop {
            let v = flag.get();
            if v == LOAD_HIGH {
                return;
            }
            if v == LOAD_STOP || v == crate::loadflag::LOAD_SWITCH {
                return;
            }
            std::thread::sleep(slice);
        }
    }
}

/// The arithmetic "burn" shared by every payload here: a handful of
/// floating-point passes over the buffer, enough to keep functional units
/// and cache traffic busy without depending on any particular ISA extension.
fn burn(buf: &mut [u64]) {
    if buf.is_empty() {
        return;
    }
    let len = buf.len();
    for i in 0..len {
        let a = f64::from_bits(buf[i]);
        let b = f64::from_bits(buf[(i + 1) % len]);
        let r = a * b + a - b * 0.5;
        buf[i] = r.to_bits();
    }
}

/// Fills `buf` with a geometric progression between `first` and `last`
/// across 1024-word blocks, repeating the block pattern (prefix for short
/// buffers) for the remainder. Geometric, not linear, because `first` and
/// `last` span several decades of magnitude and a linear ramp would pass
/// through denormals on the way down.
pub fn init_buffer_geometric(buf: &mut [u64], first: f64, last: f64) {
    const BLOCK: usize = 1024;
    let mut block = [0f64; BLOCK];
    let ratio = (last / first).powf(1.0 / (BLOCK - 1) as f64);
    let mut v = first;
    for slot in block.iter_mut() {
        *slot = v;
        v *= ratio;
    }
    for (i, word) in buf.iter_mut().enumerate() {
        *word = block[i % BLOCK].to_bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyPayload;
    impl Payload for DummyPayload {
        fn name(&self) -> &'static str {
            "DUMMY"
        }
        fn init_values(&self) -> (f64, f64) {
            (1.654738925401e-10, 1.654738925401e-15)
        }
        fn required_features(&self) -> &'static [&'static str] {
            &[]
        }
    }

    #[test]
    fn init_buffer_is_deterministic_round_trip() {
        let payload = DummyPayload;
        let mut a = vec![0u64; 2048];
        let mut b = vec![0u64; 2048];
        payload.init_buffer(&mut a);
        payload.init_buffer(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn init_buffer_produces_no_nan_or_denormal() {
        let payload = DummyPayload;
        let mut buf = vec![0u64; 4096];
        payload.init_buffer(&mut buf);
        for word in &buf {
            let v = f64::from_bits(*word);
            assert!(!v.is_nan());
            assert!(v == 0.0 || v.is_normal());
        }
    }

    #[test]
    fn init_buffer_repeats_block_pattern_for_remainder() {
        let payload = DummyPayload;
        let mut buf = vec![0u64; 1024 + 10];
        payload.init_buffer(&mut buf);
        for i in 0..10 {
            assert_eq!(buf[i], buf[1024 + i]);
        }
    }

    #[test]
    fn short_buffer_uses_block_prefix() {
        let payload = DummyPayload;
        let mut short = vec![0u64; 16];
        let mut long = vec![0u64; 1024];
        payload.init_buffer(&mut short);
        payload.init_buffer(&mut long);
        assert_eq!(&short[..], &long[..16]);
    }
}
