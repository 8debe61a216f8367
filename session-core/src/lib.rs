//! Query-session core.
//!
//! Owns the lifecycle of one document-database client, lists the account's
//! catalog, runs one query page at a time with cooperative cancellation and
//! orchestrates all of it behind [`SessionController`].

pub mod catalog;
pub mod client;
pub mod controller;
pub mod factory;
pub mod query_session;
pub mod store;

#[cfg(test)]
mod testing;

pub use catalog::CatalogBrowser;
pub use client::{ClientConnector, ClientOptions, CosmosConnector, DocumentClient, FeedPage};
pub use controller::{Command, SessionController, SessionSnapshot};
pub use factory::ClientFactory;
pub use query_session::{Cursor, FetchState, QuerySession};
pub use store::{open_store, ConnectionStore, FileConnectionStore, MemoryConnectionStore};
