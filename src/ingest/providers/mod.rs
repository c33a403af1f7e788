// src/ingest/providers/mod.rs
//! Platform fetchers.

pub mod feed;
pub mod messaging;
pub mod social;
