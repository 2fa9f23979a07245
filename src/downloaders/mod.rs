//! Download handlers
//!
//! Packages come from plain HTTP(S) CDN links; see [`ResumableDownloader`].

mod http;

pub use http::{DownloadError, DownloadTask, HttpClient, ResumableDownloader, RetryPolicy};
