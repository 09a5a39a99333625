#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backend;
mod evaluate;
mod selector;

pub use self::backend::{
    AnalysisStatus, AuthConfiguration, Credential, Image, ImageBackend, LookupError,
};
pub use self::evaluate::{evaluate_image, ImageVerdict, Reason};
pub use self::selector::{
    select, Metadata, Mode, PolicyReference, PolicySelector, ResourceSelector, ResourceSelectorType,
};

use anyhow::Result;

/// Resolves the labels and annotations of a namespace.
///
/// The production implementation queries the Kubernetes API; tests substitute
/// a fixed map.
#[async_trait::async_trait]
pub trait NamespaceLookup: Send + Sync {
    async fn namespace_metadata(&self, name: &str) -> Result<Metadata>;
}
