//! Seams between the state machines and the HTTP client.
//!
//! [`ImportPoller`](crate::import::ImportPoller) depends on [`ImportApi`] and
//! [`SearchSession`](crate::query::SearchSession) on [`SearchApi`], never on
//! [`RegistryClient`](crate::client::RegistryClient) directly. The client
//! implements both; tests substitute scripted fakes.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use chemreg::error::ApiError;
//! use chemreg::models::{ImportTask, TaskStatus, UploadFile};
//! use chemreg::traits::ImportApi;
//!
//! struct AlwaysDone;
//!
//! #[async_trait]
//! impl ImportApi for AlwaysDone {
//!     async fn upload(&self, _file: &UploadFile) -> Result<String, ApiError> {
//!         Ok("t1".to_string())
//!     }
//!
//!     async fn task_status(&self, task_id: &str) -> Result<ImportTask, ApiError> {
//!         Ok(ImportTask {
//!             task_id: task_id.to_string(),
//!             status: TaskStatus::Done,
//!             result: None,
//!         })
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{FacetGroup, ImportTask, Paginated, UploadFile};
use crate::query::{FacetQuery, RowQuery};
use crate::record::SubstanceRecord;

/// Server operations behind the import wizard.
#[async_trait]
pub trait ImportApi: Send + Sync {
    /// Upload a spreadsheet and return the id of the import task it started.
    async fn upload(&self, file: &UploadFile) -> Result<String, ApiError>;

    /// Read the current state of an import task.
    async fn task_status(&self, task_id: &str) -> Result<ImportTask, ApiError>;
}

/// Server reads behind the public registry page.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// One page of rows matching `query`.
    async fn rows(&self, query: &RowQuery) -> Result<Paginated<SubstanceRecord>, ApiError>;

    /// Facet counts for the text part of the current search.
    async fn facets(&self, query: &FacetQuery) -> Result<Vec<FacetGroup>, ApiError>;
}
