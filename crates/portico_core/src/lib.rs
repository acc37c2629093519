//! Server core: routing, listeners and the per-connection worker.

pub mod master;
pub mod router;
pub mod worker;

pub use master::Master;
pub use router::Router;
