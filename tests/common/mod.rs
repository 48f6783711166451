//! Common test utilities and helpers
//!
//! This module provides shared functionality for all tests.

#![allow(dead_code)]

pub mod app;
pub mod db;
pub mod mock_sender;

pub use app::{bearer, TestApp, ADMIN_TOKEN};
pub use db::TestDb;
pub use fixtures::{
    configure_all_channels, new_enquiry, notification_config, save_provider, settings,
};
pub use mock_sender::{MockSender, Reply};
