//! skymesh-core: Pure decode + tracking library for Mode S / ADS-B.
//!
//! No async, no I/O — just algorithms. This crate is the shared core used
//! by `skymesh-node` (the receiver daemon) and `skymesh-alert` (the mesh
//! alert dispatcher).

pub mod bds;
pub mod cpr;
pub mod crc;
pub mod decode;
pub mod frame;
pub mod track;
pub mod types;
pub mod watchlist;

// Re-export commonly used types at crate root
pub use decode::{decode, Decoded};
pub use frame::{parse_hex_uncached, FrameValidator, IcaoCache, ModeFrame, RawFrame};
pub use track::{Aircraft, PositionSource, Tracker, TrackerConfig, TrackerUpdate};
pub use types::*;
pub use watchlist::{AlertEvent, PatternError, Priority, WatchKind, Watchlist, WatchlistEntry};
