//! wflink-search: snapshot search against the workflow platform
//!
//! A search is submitted as a condition tree, the resulting snapshot is
//! polled until it completes, and one page of results is fetched. The
//! [`SearchApi`] trait separates the protocol from the REST transport.

pub mod api;
pub mod client;
pub mod error;
pub mod http;
pub mod types;

pub use api::SearchApi;
pub use client::SnapshotSearchClient;
pub use error::SearchError;
pub use http::HttpSearchApi;
pub use types::{
    GroupOperator, Operator, PageRequest, QueryCondition, SearchRequest, SnapshotState,
    SnapshotStatus,
};
