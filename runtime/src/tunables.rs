//! Process-wide tunables, read once from the environment.

use std::sync::OnceLock;

/// CUDA pointwise launch knobs. `-1` means unset; the kernel façade falls
/// back to its built-in defaults. Block count and size are surfaced for the
/// launching runtime — execution happens outside this core.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pub cuda_pointwise_loop_levels: i32,
    pub cuda_pointwise_block_count: i32,
    pub cuda_pointwise_block_size: i32,
}

static TUNABLES: OnceLock<Tunables> = OnceLock::new();

fn env_i32(name: &str) -> i32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(-1)
}

/// The tunables, read from `FUSOR_CUDA_POINTWISE_*` on first use.
pub fn tunables() -> &'static Tunables {
    TUNABLES.get_or_init(|| {
        let t = Tunables {
            cuda_pointwise_loop_levels: env_i32("FUSOR_CUDA_POINTWISE_LOOP_LEVELS"),
            cuda_pointwise_block_count: env_i32("FUSOR_CUDA_POINTWISE_BLOCK_COUNT"),
            cuda_pointwise_block_size: env_i32("FUSOR_CUDA_POINTWISE_BLOCK_SIZE"),
        };
        tracing::debug!(?t, "tunables loaded");
        t
    })
}
