//! Utilities dealing with logical resource paths.
//!
//! Includes the [`ResourcePath`] type with its normalization rules, and the
//! [`PathResolver`] which maps path prefixes to fetchable root URLs.

#![warn(missing_docs)]

mod path;
mod resolver;

pub use path::*;
pub use resolver::*;
