//! Platform catalog (C2) and selector (C4).

pub mod catalog;

use std::sync::Arc;

use crate::error::IgnisError;
use crate::payload::{Payload, PayloadSetting};
use crate::topology::TopologyInfo;

/// An immutable, catalog-resident description of a recognized CPU platform.
pub struct PlatformConfig {
    pub name: &'static str,
    pub family: u32,
    pub models: &'static [u32],
    /// Per-level data-cache buffer sizes, bytes, ordered L1 -> Ln.
    pub data_cache_buffer_sizes: &'static [u64],
    pub ram_buffer_size: u64,
    /// `(threadsPerCore, functionName)` pairs, in catalog order.
    pub thread_map: &'static [(u32, &'static str)],
    pub default_payload_settings: &'static [(&'static str, u32)],
    pub is_default: bool,
    pub payload: &'static dyn Payload,
}

impl PlatformConfig {
    pub fn is_available(&self, topo: &TopologyInfo) -> bool {
        self.payload.is_available(&topo.features)
    }

    pub fn matches_family_model(&self, topo: &TopologyInfo) -> bool {
        self.family == topo.family_id && self.models.contains(&topo.model_id)
    }

    pub fn default_payload_settings_owned(&self) -> Vec<PayloadSetting> {
        self.default_payload_settings
            .iter()
            .map(|(name, weight)| (name.to_string(), *weight))
            .collect()
    }

    pub fn default_payload_settings_string(&self) -> String {
        self.default_payload_settings
            .iter()
            .map(|(name, weight)| format!("{name}={weight}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A chosen `(PlatformConfig, threadsPerCore)` pair plus a mutable
/// per-instance payload settings vector (§3 SelectedConfig).
#[derive(Clone)]
pub struct SelectedConfig {
    pub platform: &'static PlatformConfig,
    pub threads_per_core: u32,
    pub payload_settings: Vec<PayloadSetting>,
}

impl SelectedConfig {
    pub fn payload(&self) -> Arc<&'static dyn Payload> {
        Arc::new(self.platform.payload)
    }
}

/// Flattened `(1-based id, platform, threadsPerCore, functionName)` entries
/// across the catalog, in catalog order. This is the single source of
/// truth for `--function <id>` and `--list-functions`.
pub fn enumerate_functions(
    catalog: &'static [PlatformConfig],
) -> Vec<(u32, &'static PlatformConfig, u32, &'static str)> {
    let mut id = 1;
    let mut out = Vec::new();
    for platform in catalog {
        for &(threads, name) in platform.thread_map {
            out.push((id, platform, threads, name));
            id += 1;
        }
    }
    out
}

/// Implements `selectFunction` (§4.2): resolve `function_id` against the
/// primary catalog, or auto-detect the default/fallback platform when
/// `function_id == 0`.
pub fn select_function(
    topo: &TopologyInfo,
    catalog: &'static [PlatformConfig],
    fallback_catalog: &'static [PlatformConfig],
    function_id: u32,
    allow_unavailable: bool,
) -> Result<SelectedConfig, IgnisError> {
    let entries = enumerate_functions(catalog);

    if function_id > 0 {
        let (id, platform, threads, name) = entries
            .into_iter()
            .find(|(id, ..)| *id == function_id)
            .ok_or(IgnisError::UnknownFunctionId(function_id))?;

        if !platform.is_available(topo) {
            if !allow_unavailable {
                return Err(IgnisError::UnavailablePayload {
                    id,
                    name: name.to_string(),
                });
            }
            tracing::warn!(
                function = name,
                "payload unavailable on this host, proceeding due to --allow-unavailable"
            );
        }

        return Ok(SelectedConfig {
            platform,
            threads_per_core: threads,
            payload_settings: platform.default_payload_settings_owned(),
        });
    }

    let mut default_payload_name: Option<&'static str> = None;
    for platform in catalog {
        if !platform.is_default || !platform.matches_family_model(topo) {
            continue;
        }
        if let Some(&(threads, _name)) = platform
            .thread_map
            .iter()
            .find(|(threads, _)| *threads == topo.threads_per_core)
        {
            return Ok(SelectedConfig {
                platform,
                threads_per_core: threads,
                payload_settings: platform.default_payload_settings_owned(),
            });
        }
        if default_payload_name.is_none() {
            default_payload_name = Some(platform.payload.name());
        }
    }

    if let Some(name) = default_payload_name {
        tracing::warn!(
            payload = name,
            threads_per_core = topo.threads_per_core,
            "no code path for this thread count under the default platform"
        );
    }
    tracing::warn!(
        vendor = %topo.vendor,
        model = %topo.model_name,
        "host is not covered by any catalog platform, falling back"
    );

    for platform in fallback_catalog {
        if !platform.is_available(topo) {
            continue;
        }
        let (threads, name) = platform
            .thread_map
            .iter()
            .find(|(threads, _)| *threads == topo.threads_per_core)
            .copied()
            .unwrap_or(platform.thread_map[0]);

        tracing::warn!(function = name, "using fallback payload");
        return Ok(SelectedConfig {
            platform,
            threads_per_core: threads,
            payload_settings: platform.default_payload_settings_owned(),
        });
    }

    Err(IgnisError::FatalNoPayload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::catalog::{CATALOG, FALLBACK_CATALOG};
    use std::collections::HashMap;

    fn topo_with(family: u32, model: u32, threads_per_core: u32, features: &[&str]) -> TopologyInfo {
        let mut f = HashMap::new();
        for name in features {
            f.insert(name.to_string(), true);
        }
        TopologyInfo {
            packages: 1,
            physical_cores_per_package: 4,
            threads_per_core,
            total_threads: 4 * threads_per_core,
            vendor: "GenuineIntel".into(),
            model_name: "Test CPU".into(),
            family_id: family,
            model_id: model,
            stepping_id: 0,
            features: f,
            caches: Vec::new(),
        }
    }

    #[test]
    fn selector_is_deterministic_between_auto_and_explicit_id() {
        let topo = topo_with(6, 30, 1, &["sse2", "avx", "fma"]);
        let auto = select_function(&topo, &CATALOG, &FALLBACK_CATALOG, 0, false).unwrap();
        let entries = enumerate_functions(&CATALOG);
        let matching_id = entries
            .iter()
            .find(|(_, p, t, _)| std::ptr::eq(*p, auto.platform) && *t == auto.threads_per_core)
            .unwrap()
            .0;
        let explicit =
            select_function(&topo, &CATALOG, &FALLBACK_CATALOG, matching_id, false).unwrap();
        assert!(std::ptr::eq(auto.platform, explicit.platform));
        assert_eq!(auto.threads_per_core, explicit.threads_per_core);
    }

    #[test]
    fn unknown_function_id_is_an_error() {
        let topo = topo_with(6, 30, 1, &["sse2"]);
        let err = select_function(&topo, &CATALOG, &FALLBACK_CATALOG, 9999, false).unwrap_err();
        assert!(matches!(err, IgnisError::UnknownFunctionId(9999)));
    }

    #[test]
    fn falls_back_when_default_platform_lacks_thread_count() {
        // Nehalem-class entry (family 6, model 30) only advertises 1T/2T;
        // a host reporting 3 threads per core matches the family/model but
        // has no threadMap entry, so selection must warn and fall back.
        let topo = topo_with(6, 30, 3, &["sse2"]);
        let sel = select_function(&topo, &CATALOG, &FALLBACK_CATALOG, 0, false).unwrap();
        assert!(FALLBACK_CATALOG.iter().any(|p| std::ptr::eq(p, sel.platform)));
    }

    #[test]
    fn falls_back_when_no_catalog_entry_matches_family_model() {
        let topo = topo_with(21, 1, 1, &["sse2"]);
        let sel = select_function(&topo, &CATALOG, &FALLBACK_CATALOG, 0, false).unwrap();
        assert!(FALLBACK_CATALOG.iter().any(|p| std::ptr::eq(p, sel.platform)));
    }

    #[test]
    fn no_fallback_available_is_fatal() {
        let topo = topo_with(6, 999, 1, &[]);
        let err = select_function(&topo, &CATALOG, &FALLBACK_CATALOG, 0, false).unwrap_err();
        assert!(matches!(err, IgnisError::FatalNoPayload));
    }
}
