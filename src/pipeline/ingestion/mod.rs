// Pipeline ingestion: rate-limited fetching with backoff and hard stops

pub mod fetcher;

pub use fetcher::{BlockReason, FetchOutcome, FetchState, RateLimitedFetcher};
