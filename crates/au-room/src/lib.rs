//! au-room: geometric room acoustics for the auralis toolkit
//!
//! Convex polygonal walls with per-octave absorption, shoebox and free-form
//! rooms, and the image-source engine that turns early reflections into
//! virtual sources for the binaural pipeline.

pub mod engine;
pub mod images;
pub mod room;
pub mod wall;

pub use engine::{IsmEngine, VirtualSource};
pub use images::{ImageNode, ImageSourceTree};
pub use room::{Room, RoomGeometry};
pub use wall::{Wall, WallHit, ABSORPTION_BANDS, BORDER_THRESHOLD_M};
