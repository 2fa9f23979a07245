//! gsp - unattended game update downloader and patcher
//!
//! Downloads versioned update archives, classifies their contents and applies
//! them to an existing installation through full-file replacement, in-archive
//! extraction and binary delta patching, then verifies the result against the
//! component manifests.

pub mod app;
pub mod archive;
pub mod config;
pub mod downloaders;
pub mod game;
pub mod hash;
pub mod paths;
pub mod patcher;
pub mod pipeline;
pub mod progress;
pub mod update;
