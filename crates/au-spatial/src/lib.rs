//! au-spatial: the binaural spatializer
//!
//! - `hrtf` - sparse HRIR table, grid resampling, partitioned queries
//! - `nearfield` - near-field / high-performance ILD coefficient tables
//! - `source` - per-source anechoic DSP chain
//! - `environment` - B-format virtual-Ambisonic reverberation
//! - `ambisonic` - higher-order virtual-Ambisonic spatialization
//! - `listener` - head transform, stores, directionality
//! - `core` - orchestrator driving one `process_all` per block

pub mod ambisonic;
pub mod core;
pub mod environment;
pub mod hrtf;
pub mod listener;
pub mod nearfield;
pub mod source;

pub use ambisonic::{AmbisonicDsp, AmbisonicNormalization, AmbisonicOrder};
pub use crate::core::{Core, SourceId};
pub use environment::{BFormatChannel, Environment, ReverbOrder, VirtualSpeaker};
pub use hrtf::{HrirEntry, HrirStore, PartitionedHrir, StoreEar};
pub use listener::Listener;
pub use nearfield::{IldStore, NEAR_FIELD_DISTANCE_THRESHOLD_M};
pub use source::{SingleSourceDsp, SpatialContext, SpatializationMode};
