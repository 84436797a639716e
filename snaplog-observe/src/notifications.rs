//! Forward source status notifications to tracing.

use snaplog_core::{NotificationBus, SourceNotification, SourceStatus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, info, warn};

/// The level a notification with `status` is logged at.
pub fn level_for(status: SourceStatus) -> Level {
    match status {
        SourceStatus::Starting => Level::DEBUG,
        SourceStatus::Started | SourceStatus::Finished => Level::INFO,
        SourceStatus::Failed => Level::ERROR,
    }
}

/// Log one notification with its channel and position as fields.
pub fn log_notification(notification: &SourceNotification) {
    let channel = notification.channel_name.as_str();
    let position = notification
        .position
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    let status = notification.status;
    let message = notification.message.as_str();
    let level = level_for(status);
    if level == Level::ERROR {
        error!(channel, ?status, position = %position, "{message}");
    } else if level == Level::INFO {
        info!(channel, ?status, position = %position, "{message}");
    } else {
        debug!(channel, ?status, position = %position, "{message}");
    }
}

/// Log every notification published on `bus` until the bus is dropped.
pub fn spawn_notification_logger(bus: &NotificationBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notification) => log_notification(&notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
