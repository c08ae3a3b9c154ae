//! Foliage scattering for exported terrain chunks.
//!
//! Density masks painted by the exporter are decoded into per-layer occupancy maps, a seeded
//! planner turns them into placement candidates, the host's ground probe snaps those onto the
//! terrain, and a per-chunk scheduler streams the resulting instances in and out around the
//! player using a shared instance pool.
//!
//! Both the headless host and the offline bake tool build on this crate.

pub mod bake;
pub mod error;
pub mod export;
pub mod layers;
pub mod mask;
pub mod plan;
pub mod pool;
pub mod resolve;
pub mod scheduler;
pub mod settings;
pub mod spatial;
pub mod streaming;
pub mod terrain;

#[cfg(test)]
pub(crate) mod testing;

pub use bake::*;
pub use error::*;
pub use export::*;
pub use layers::*;
pub use mask::*;
pub use plan::*;
pub use pool::*;
pub use resolve::*;
pub use scheduler::*;
pub use settings::*;
pub use spatial::*;
pub use streaming::*;
pub use terrain::*;

/// Side length of the density masks written by the exporter.
pub const MASK_RESOLUTION: u32 = 64;

/// Number of scatter layers a chunk can carry (black + R/G/B).
pub const MAX_LAYERS: usize = 4;

/// Instances (or probes) processed per scheduler step before yielding back to the frame loop.
pub const DEFAULT_BATCH_SIZE: usize = 50;
