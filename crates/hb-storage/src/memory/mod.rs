//! In-memory storage driver

mod bind_data;
mod catalog;
mod instance;
mod operation;

pub use bind_data::BindDataStore;
pub use catalog::{BundleStore, ChartStore};
pub use instance::InstanceStore;
pub use operation::OperationStore;
