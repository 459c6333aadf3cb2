//! Debug switches read once from the `SAAVY_DEBUG` environment variable.
//!
//! The value is a colon separated key list, e.g. `SAAVY_DEBUG=no-allocators:foo`.

use std::sync::OnceLock;

pub const DEBUG_ENV: &str = "SAAVY_DEBUG";

/// Route Loft allocations through the system allocator.
pub const NO_ALLOCATORS: &str = "no-allocators";

static FLAGS: OnceLock<String> = OnceLock::new();

/// Raw debug string, empty if unset.
pub fn flags() -> &'static str {
    FLAGS.get_or_init(|| std::env::var(DEBUG_ENV).unwrap_or_default())
}

pub fn enabled(key: &str) -> bool {
    key_in(flags(), key)
}

fn key_in(flags: &str, key: &str) -> bool {
    !key.is_empty() && flags.split(':').any(|k| k.trim() == key)
}
