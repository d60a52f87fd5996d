//! # fo-types
//!
//! Shared data model for Fanout: trial identity and outcomes, parameter
//! bindings, resource requests, diagnostics and the error taxonomy.

pub mod diagnostics;
pub mod errors;
pub mod resources;
pub mod trial;

pub use diagnostics::*;
pub use errors::*;
pub use resources::*;
pub use trial::*;
