//! liked-sync library - reconciliation engine shared by all binaries.

pub mod atomic;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod orphan;
pub mod pipeline;
pub mod playlist;
pub mod progress;
pub mod remote;
pub mod report;
pub mod retry;
pub mod review;
pub mod scan;
pub mod scoring;
pub mod terminal;
pub mod version;
