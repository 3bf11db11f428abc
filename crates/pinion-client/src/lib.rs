pub use error::Error;
pub use filename::DistFilename;
pub use pinion_types::{IndexFile, WheelPolicy};
pub use registry_client::{RegistryClient, RegistryClientBuilder};

mod error;
mod filename;
mod registry_client;
