pub mod config;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reconcile;
pub mod store;
pub mod sync;
