//! Admitflow Server Library
//!
//! Notification dispatch and MCB sync for admission enquiries. This module
//! exposes the server components for testing purposes.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
