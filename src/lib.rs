pub mod accounts;
pub mod api;
pub mod auth;
pub mod buckets;
pub mod config;
pub mod crypto;
pub mod error;
pub mod models;
pub mod sessions;
pub mod storage;
pub mod tracker;
