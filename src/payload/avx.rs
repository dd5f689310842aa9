use super::Payload;

/// A wider payload requiring AVX + FMA, used on platforms whose catalog
/// entry targets those extensions, and as the preferred fallback on hosts
/// where the default platform doesn't match.
pub struct AvxPayload;

impl Payload for AvxPayload {
    fn name(&self) -> &'static str {
        "AVX"
    }

    fn init_values(&self) -> (f64, f64) {
        (1.654738925401e-10, 1.654738925401e-15)
    }

    fn required_features(&self) -> &'static [&'static str] {
        &["avx", "fma"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn requires_both_avx_and_fma() {
        let mut features = HashMap::new();
        features.insert("avx".to_string(), true);
        assert!(!AvxPayload.is_available(&features));
        features.insert("fma".to_string(), true);
        assert!(AvxPayload.is_available(&features));
    }
}
