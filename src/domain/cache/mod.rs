//! Cache domain - key-value store with per-entry expiry

mod repository;

pub use repository::{Cache, JsonCache};
pub(crate) use repository::pattern_regex;

#[cfg(test)]
pub use repository::mock::MockCache;
