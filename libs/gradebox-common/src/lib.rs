pub mod compare;
pub mod config;
pub mod protocol;
pub mod types;
pub mod value;

pub use compare::{deep_equal, deep_equal_with, CompareOptions};
pub use config::GraderConfig;
pub use types::*;
pub use value::Value;
