//! EDINET filings API: typed client, response models, and filtered search.
//!
//! The flow mirrors how the portal is actually used: resolve a company through the
//! [`CompanyDirectory`](crate::CompanyDirectory), build a
//! [`DocumentFilter`](DocumentFilter), run it through the
//! [`DocumentSearchService`](DocumentSearchService), then download the interesting
//! documents by id.

mod client;
mod schemas;
mod search;

pub use client::EdinetClient;
pub use schemas::{
    DocumentListResponse, DownloadType, FilingMetadata, RequestParameter, ResponseMetadata,
    ResultSet,
};
pub use search::{DocumentFilter, DocumentSearchService, SearchOrder};
