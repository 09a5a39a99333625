#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod namespace;
mod workload;

pub use self::namespace::NamespaceClient;
pub use self::workload::extract_images;
