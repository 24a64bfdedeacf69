//! Paginated registry plumbing: wire types, authentication headers, the HTTP
//! page client, and the token source that feeds the pipeline.

pub mod auth;
pub mod client;
pub mod page;
pub mod token_source;

pub use client::{HttpPageSource, PageSource, SourceError};
pub use page::{Cursor, Page, PageItem, Record, RecordMetadata, Totals};
pub use token_source::{SourceSummary, TokenSource, TokenSourceParams};
