pub mod archive;
pub mod artifact;
pub mod executor;

pub use archive::archive;
pub use artifact::{ArtifactDirs, ArtifactStore, Upload};
pub use executor::{CvExecutable, PipelineExecutor};
