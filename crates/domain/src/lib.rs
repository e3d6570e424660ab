pub mod error;
pub mod plan;
pub mod sanitize;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
