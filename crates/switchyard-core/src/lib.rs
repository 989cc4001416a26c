pub mod config;
pub mod error;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod tools;
pub mod utils;

pub use error::{Error, Result};
pub use tools::{Toolkit, ToolkitState};
