//! Default configuration values

/// Default architecture tag for a session
pub const DEFAULT_ARCH: &str = "x86_64";

/// Delay between a node accepting work and reporting ready (in milliseconds)
pub const NODE_READY_DELAY_MS: u64 = 50;

/// Default number of build slots per simulated host
pub const DEFAULT_SLOTS_PER_HOST: u32 = 2;

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;
