//! Per-entry state machine ([`state`]) and the per-key load coordination built on top of it
//! ([`slot`], crate-internal).

pub mod state;
pub(crate) mod slot;
