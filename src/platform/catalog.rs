//! The fixed platform catalog (C2). Family/model/cache-size values are
//! drawn from known Nehalem- and Sandy-Bridge-class entries; these are
//! representative examples of a platform table, not an exhaustive list.

use super::PlatformConfig;
use crate::payload::avx::AvxPayload;
use crate::payload::sse2::Sse2Payload;

static SSE2_PAYLOAD: Sse2Payload = Sse2Payload;
static AVX_PAYLOAD: AvxPayload = AvxPayload;

static NEHALEM: PlatformConfig = PlatformConfig {
    name: "NHM_COREI",
    family: 6,
    models: &[30, 37, 23],
    data_cache_buffer_sizes: &[32768, 262144, 1572864],
    ram_buffer_size: 104_857_600,
    thread_map: &[(1, "NHM_1T"), (2, "NHM_2T")],
    default_payload_settings: &[("RAM_P", 1), ("L1_LS", 70), ("REG", 2)],
    is_default: true,
    payload: &SSE2_PAYLOAD,
};

static SANDYBRIDGE: PlatformConfig = PlatformConfig {
    name: "SNB_COREI",
    family: 6,
    models: &[42, 45],
    data_cache_buffer_sizes: &[32768, 262144, 8_388_608],
    ram_buffer_size: 209_715_200,
    thread_map: &[(1, "SNB_1T"), (2, "SNB_2T")],
    default_payload_settings: &[("RAM_P", 1), ("L1_LS", 60), ("REG", 4)],
    is_default: false,
    payload: &AVX_PAYLOAD,
};

pub static CATALOG: [PlatformConfig; 2] = [NEHALEM, SANDYBRIDGE];

static FALLBACK_SSE2: PlatformConfig = PlatformConfig {
    name: "FALLBACK_SSE2",
    family: 0,
    models: &[],
    data_cache_buffer_sizes: &[32768, 262144, 1048576],
    ram_buffer_size: 67_108_864,
    thread_map: &[(1, "FALLBACK_SSE2_1T"), (2, "FALLBACK_SSE2_2T")],
    default_payload_settings: &[("RAM_P", 1), ("L1_LS", 50), ("REG", 1)],
    is_default: false,
    payload: &SSE2_PAYLOAD,
};

static FALLBACK_AVX: PlatformConfig = PlatformConfig {
    name: "FALLBACK_AVX",
    family: 0,
    models: &[],
    data_cache_buffer_sizes: &[32768, 262144, 1048576],
    ram_buffer_size: 67_108_864,
    thread_map: &[(1, "FALLBACK_AVX_1T"), (2, "FALLBACK_AVX_2T")],
    default_payload_settings: &[("RAM_P", 1), ("L1_LS", 50), ("REG", 1)],
    is_default: false,
    payload: &AVX_PAYLOAD,
};

pub static FALLBACK_CATALOG: [PlatformConfig; 2] = [FALLBACK_SSE2, FALLBACK_AVX];
