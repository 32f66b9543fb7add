use crate::backup::notifications::log::LogNotificationConfig;
use crate::backup::notifications::smtp::SmtpNotificationConfig;
use crate::backup::result_error::result::Result;
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::result;
use validator::{Validate, ValidationErrors};

pub mod log;
pub mod smtp;

/// How urgently somebody has to look at an alert.
#[derive(Clone, Copy, Debug, derive_more::Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertPriority {
    High,
    Low,
}

pub trait Notification {
    fn alert<D: Display>(&self, message: D, priority: AlertPriority) -> Result<()>;
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationConfig {
    Smtp(SmtpNotificationConfig),
    Log(LogNotificationConfig),
}

impl Validate for NotificationConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Smtp(inner) => inner.validate(),
            Self::Log(inner) => inner.validate(),
        }
    }
}

impl Notification for NotificationConfig {
    fn alert<D: Display>(&self, message: D, priority: AlertPriority) -> Result<()> {
        match self {
            Self::Smtp(inner) => inner.alert(message, priority),
            Self::Log(inner) => inner.alert(message, priority),
        }
    }
}

fn default_enable() -> bool {
    true
}

/// The `alerting` config section.
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct AlertingConfig {
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[validate(nested)]
    pub transport: NotificationConfig,
}

impl Notification for AlertingConfig {
    fn alert<D: Display>(&self, message: D, priority: AlertPriority) -> Result<()> {
        if !self.enable {
            tracing::debug!("Alerting disabled, dropping {priority} alert");
            return Ok(());
        }
        self.transport.alert(message, priority)
    }
}

#[cfg(test)]
pub mod recording {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every alert in memory.
    #[derive(Debug, Default)]
    pub struct RecordingNotification {
        pub alerts: Mutex<Vec<(String, AlertPriority)>>,
    }

    impl RecordingNotification {
        pub fn alerts(&self) -> Vec<(String, AlertPriority)> {
            self.alerts.lock().unwrap().clone()
        }
    }

    impl Notification for RecordingNotification {
        fn alert<D: Display>(&self, message: D, priority: AlertPriority) -> Result<()> {
            self.alerts
                .lock()
                .unwrap()
                .push((message.to_string(), priority));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alerting_config_deserialize_log() {
        let config: AlertingConfig = serde_yml::from_str("transport:\n  type: log\n").unwrap();
        assert!(config.enable);
        assert!(matches!(config.transport, NotificationConfig::Log(_)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_alerting_config_rejects_unknown_transport() {
        let result = serde_yml::from_str::<AlertingConfig>("transport:\n  type: opsgenie\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_disabled_alerting_is_ok() {
        let config: AlertingConfig =
            serde_yml::from_str("enable: false\ntransport:\n  type: log\n").unwrap();
        assert!(config.alert("boom", AlertPriority::High).is_ok());
    }

    #[test]
    fn test_priority_display() {
        assert_eq!(AlertPriority::High.to_string(), "High");
        assert_eq!(AlertPriority::Low.to_string(), "Low");
    }
}
