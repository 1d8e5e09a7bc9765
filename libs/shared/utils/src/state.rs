use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::Database;

use crate::notify::{LogNotifier, NotificationSender, WebhookNotifier};

/// Router state shared by every cell.
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub notifier: Arc<dyn NotificationSender>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database) -> Self {
        let notifier: Arc<dyn NotificationSender> = if config.is_notification_webhook_configured() {
            Arc::new(WebhookNotifier::new(config.notification_webhook_url.clone()))
        } else {
            Arc::new(LogNotifier)
        };
        Self::with_notifier(config, db, notifier)
    }

    pub fn with_notifier(config: AppConfig, db: Database, notifier: Arc<dyn NotificationSender>) -> Self {
        Self { config, db, notifier }
    }
}
