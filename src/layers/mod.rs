//! Layer Model Module
//!
//! Two layers (primary and poly) share one clock in seconds but keep
//! separate tick cursors and event buffers:
//! - `buffer`: ordered event sink with a handoff index
//! - `manager`: registry and ambient-timing ownership

mod buffer;
mod manager;

pub use buffer::{Event, EventBuffer, EventKind, EventStream};
pub use manager::{
    ActivationSnapshot, AdvanceKind, Layer, LayerManager, POLY_LAYER, PRIMARY_LAYER,
};
