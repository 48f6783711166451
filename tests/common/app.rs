//! In-process application state for HTTP tests

use std::sync::Arc;

use actix_web::web;
use admitflow::config::{Config, McbConfig};
use admitflow::routes;
use admitflow::services::{McbSyncAdapter, NotificationDispatcher, RetryPolicy, SenderRegistry};
use admitflow::store::{DynStore, MemoryStore};

use super::fixtures::notification_config;

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Store, services and config shared by the routes under test
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub dispatcher: NotificationDispatcher,
    pub sync: McbSyncAdapter,
    pub config: Config,
}

impl TestApp {
    /// Builds the app state around the given senders, with MCB unconfigured
    pub fn new(senders: SenderRegistry) -> Self {
        Self::with_mcb(senders, McbConfig::default())
    }

    pub fn with_mcb(senders: SenderRegistry, mcb: McbConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: DynStore = store.clone();

        let mut config = Config {
            notification: notification_config(),
            mcb,
            ..Config::default()
        };
        config.security.admin_token = Some(ADMIN_TOKEN.to_string());

        let dispatcher = NotificationDispatcher::new(dyn_store.clone(), senders, &config.notification);
        let sync = McbSyncAdapter::new(
            dyn_store,
            &config.mcb,
            RetryPolicy::for_sync(&config.notification, &config.mcb),
        );

        Self {
            store,
            dispatcher,
            sync,
            config,
        }
    }

    /// Turns the admin API off
    pub fn without_token(mut self) -> Self {
        self.config.security.admin_token = None;
        self
    }

    /// Registers app data and every route, like the server does
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        let store: DynStore = self.store.clone();

        cfg.app_data(web::Data::new(store))
            .app_data(web::Data::new(self.dispatcher.clone()))
            .app_data(web::Data::new(self.sync.clone()))
            .app_data(web::Data::new(self.config.clone()));

        routes::health::configure(cfg);
        routes::enquiries::configure(cfg);
        routes::providers::configure(cfg);
    }
}

/// Authorization header value for the admin API
pub fn bearer() -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", ADMIN_TOKEN))
}
