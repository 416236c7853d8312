//! au-core: shared types for the auralis binaural rendering toolkit
//!
//! Everything the DSP crates agree on lives here: the sample type, audio
//! state, 3D geometry with the toolkit's spherical conventions, the
//! left/right pairing container, physical magnitudes, and the result
//! reporting facility.

pub mod audio_state;
pub mod buffer;
pub mod ear;
pub mod error;
pub mod magnitudes;
pub mod profiler;
pub mod quaternion;
pub mod reporter;
pub mod transform;
pub mod vector3;

/// Audio sample type used throughout the toolkit.
pub type Sample = f32;

pub use audio_state::AudioState;
pub use ear::{Ear, EarPair};
pub use error::{CoreError, CoreResult, ResultId, ResultRecord};
pub use magnitudes::Magnitudes;
pub use profiler::Profiler;
pub use quaternion::Quaternion;
pub use reporter::{AssertMode, Reporter, Verbosity};
pub use transform::Transform;
pub use vector3::Vector3;
