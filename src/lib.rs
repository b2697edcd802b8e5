//! Galleria: a resilient multi-source image feed with a local SQLite cache,
//! and a media-library scanner that keeps category totals current.

pub mod config;
pub mod feed;
pub mod scanner;
pub mod storage;
