use crate::backup::notifications::{AlertPriority, Notification};
use crate::backup::result_error::result::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use validator::Validate;

/// Writes alerts to the log instead of paging anybody.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LogNotificationConfig {}

impl Notification for LogNotificationConfig {
    fn alert<D: Display>(&self, message: D, priority: AlertPriority) -> Result<()> {
        match priority {
            AlertPriority::High => tracing::error!("[{priority} alert] {message}"),
            AlertPriority::Low => tracing::warn!("[{priority} alert] {message}"),
        }
        Ok(())
    }
}
