pub mod catalog;
pub mod resolver;
pub mod spec;

pub use catalog::{Catalog, CatalogEntry};
pub use resolver::{resolve, ResolvedVersion, NESTED_INVOCATION_ENV, VERSION_OVERRIDE_ENV};
pub use spec::{Comparison, VersionRange, VersionSpec};
