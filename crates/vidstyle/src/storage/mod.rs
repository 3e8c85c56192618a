pub mod artifact;
pub mod filesystem;
pub mod staging;

pub use artifact::{frame_file_name, parse_frame_index, ArtifactKind, ArtifactRef, FRAME_PATTERN};
pub use filesystem::ArtifactStore;
pub use staging::{StagedArtifact, StagedFrames};
