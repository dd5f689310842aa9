use super::Payload;

/// The baseline payload: requires only SSE2, available on every x86-64 CPU.
/// Mirrors the original SSE2 payload's buffer-init constants.
pub struct Sse2Payload;

impl Payload for Sse2Payload {
    fn name(&self) -> &'static str {
        "SSE2"
    }

    fn init_values(&self) -> (f64, f64) {
        (1.654738925401e-10, 1.654738925401e-15)
    }

    fn required_features(&self) -> &'static [&'static str] {
        &["sse2"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn available_when_sse2_present() {
        let mut features = HashMap::new();
        features.insert("sse2".to_string(), true);
        assert!(Sse2Payload.is_available(&features));
    }

    #[test]
    fn unavailable_without_sse2() {
        let features = HashMap::new();
        assert!(!Sse2Payload.is_available(&features));
    }
}
