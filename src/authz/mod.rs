//! Authorization Module
//!
//! Caches per-user authorization decisions in front of a permission lookup.

mod decision;
mod lookup;

pub use decision::{DecisionCache, DecisionCacheConfig, DecisionCacheStats};
pub use lookup::{PermissionLookup, UserId};
