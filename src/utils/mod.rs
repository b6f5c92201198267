//! Utility Module
//!
//! - [`NameId`]: xxh3-hashed names for uniforms, keywords and parameters
//! - [`IntKeyCache`]: sorted parallel-array key → index lookup
//!
//! ```rust,ignore
//! use myth_rhi::utils::{IntKeyCache, NameId};
//!
//! let mut lookup = IntKeyCache::new();
//! lookup.insert(NameId::new("mainColor").raw(), 0);
//! assert_eq!(lookup.get_name(NameId::new("mainColor")), Some(0));
//! ```

pub mod int_key_cache;
pub mod name_id;

pub use int_key_cache::IntKeyCache;
pub use name_id::NameId;
