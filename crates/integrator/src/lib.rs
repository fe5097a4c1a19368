//! Admission of externally discovered strategies.
//!
//! Descriptors are read from a [`common::DescriptorStore`], checked against a
//! fixed capability shape, and only then built from the compiled-in
//! [`strategy::StrategyCatalog`]. Nothing in a descriptor is ever executed.

pub mod admission;
pub mod store;

pub use admission::{Admission, AutoIntegrator, IntegrationReport, IntegratorSettings};
pub use store::{DescriptorStatus, MemoryDescriptorStore, SqliteDescriptorStore};
