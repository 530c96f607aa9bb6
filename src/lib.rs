//! Point-in-time by-hash snapshot proxy and index for APT archives.

pub mod auth;
pub mod cache;
pub mod cli;
pub mod daemon;
pub mod error;
pub mod http_client;
pub mod index;
pub mod inrelease;
pub mod proxy;
pub mod sources_list;
pub mod uri;
