#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod npm;
pub mod paths;
pub mod transform;
pub mod urls;
pub mod version;

pub use config::{Config, ServeConfig};
pub use error::Error;
pub use npm::{
    CompiledPackage, ExportMap, NpmCompiler, NpmError, PackageId, PackageMetadata,
};
pub use transform::{TransformClient, TransformError};
pub use version::VERSION;
