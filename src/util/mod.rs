//! Internal utilities for the browser cluster scheduler.

pub mod det_hash;
pub mod token;

pub use det_hash::{DetBuildHasher, DetHashMap, DetHashSet};
pub use token::js_token;
