#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod deadline;
pub mod error;
pub mod package;
pub mod requirement;
pub mod runtime;
pub mod tags;

pub use deadline::{check_deadline, Deadline};
pub use error::{PackagingError, MIB};
pub use package::{LockedPackage, PackageSource};
pub use requirement::{
    normalize_dist_name, parse_package_list, parse_requirement, read_requirements_file,
    RequirementOrigin, RequirementSpec,
};
pub use runtime::{Architecture, LambdaRuntime, LambdaTarget, SUPPORTED_RUNTIMES};
pub use tags::{WheelCompatibility, WheelFilename};
