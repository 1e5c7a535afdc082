//! Catalog client for the video platform's public web API.
//!
//! Implements [`playback_session::CatalogApi`]: favorites pages, item
//! metadata with parts and seasons, audio play URLs and cover images.

mod client;
mod models;

pub use client::{
    CatalogClient, CatalogConfig, DEFAULT_API_BASE, DEFAULT_PAGE_SIZE, DEFAULT_REFERER,
};
