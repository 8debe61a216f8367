//! Shared data models.

pub mod catalog;
pub mod connection;
pub mod query;
pub mod session;

// Re-export commonly used types
pub use catalog::{ContainerRef, DatabaseRef};
pub use connection::ConnectionProfile;
pub use query::QueryPage;
pub use session::{SelectRequest, SessionInputRequest};
