//! Enrichment sub-pipeline: bounded concurrent scraping with per-host rate
//! limiting (`fetcher`) and a deterministic content quality heuristic
//! (`quality`). Spec §4.B/§4.C.
pub mod fetcher;
pub mod quality;

pub use fetcher::{WebFetcher, BLOCKED_DOMAINS};
