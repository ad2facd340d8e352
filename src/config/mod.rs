pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_manifest, load_manifest_sync};
pub use models::*;
pub use validation::{ManifestValidator, ValidationError, ValidationResult};
