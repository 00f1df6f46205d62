//! Common types shared by the tcert workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
