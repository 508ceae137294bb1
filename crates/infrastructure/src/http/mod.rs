pub mod fetcher;

pub use fetcher::{HttpDocumentFetcher, InMemoryDocumentFetcher};
