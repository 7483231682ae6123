pub mod analyzer;
pub mod api;
pub mod builder;
pub mod config;
pub mod corpus;
pub mod diagram;
pub mod error;
pub mod models;
pub mod query;
pub mod rate_limit;
pub mod services;
pub mod store;

pub use analyzer::WorkflowAnalyzer;
pub use builder::{BuildReport, IndexBuilder};
pub use corpus::Corpus;
pub use diagram::{reconstruct, Diagram};
pub use error::{IndexError, Result};
pub use models::{
    Complexity, IndexSnapshot, IndexStats, RawWorkflowDocument, SearchQuery, TriggerType,
    WorkflowRecord,
};
pub use query::{deep_search, QueryEngine};
pub use services::ServiceResolver;
pub use store::{IndexStore, StoreOptions, StoreSource};
