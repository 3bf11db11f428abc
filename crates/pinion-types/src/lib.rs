pub use crate::candidate::Candidate;
pub use crate::requirement::{Requirement, RequirementError, RequirementSource};
pub use crate::source::Source;
pub use crate::traits::{BuildContext, BuildError, IndexError, IndexFile, PackageIndex, WheelPolicy};

mod candidate;
mod requirement;
mod source;
mod traits;
