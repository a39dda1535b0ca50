//! `PostgreSQL` view store for plogview.
//!
//! This crate provides [`PostgresViewStore`], a [`ViewStore`](plogview_core::ViewStore)
//! keeping view rows in a single table keyed by view, workspace and row key.
//! Every batch is written in one transaction, so an async actualizer's
//! checkpoint row and the view rows it covers commit together.
//!
//! # Example
//!
//! ```ignore
//! use plogview_postgres::PostgresViewStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let views = PostgresViewStore::connect("postgres://localhost/views").await?;
//!     views.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod view_store;

pub use view_store::{DEFAULT_TABLE, PostgresViewStore};
