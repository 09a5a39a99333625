#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod admission;
mod args;
mod config;
mod validate;

pub use self::admission::Admission;
pub use self::args::Args;
pub use self::config::{ControllerConfiguration, ValidatorConfiguration};
pub use self::validate::Hook;
