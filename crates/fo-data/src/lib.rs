//! Partition data collaborators for Fanout.
//!
//! Trials receive a partition identifier; the data behind it is fetched
//! through a [`PartitionSource`]. The identifiers themselves come from a
//! [`PartitionCatalog`].

pub mod catalog;
pub mod sources;

pub use catalog::*;
pub use sources::*;
