//! # Application Layer
//!
//! The reconciliation engine, its connection sessions and the state store.

pub mod engine;
pub mod session;
pub mod store;

pub use engine::ReconciliationEngine;
pub use session::ConnectionSession;
pub use store::{StateStore, WriteScope};
