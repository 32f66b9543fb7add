use crate::backup::archive::ArchiveConfig;
use crate::backup::cassandra::cqlsh::{CqlshConfig, CqlshConnector};
use crate::backup::compress::ZipConfig;
use crate::backup::notifications::AlertingConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::runner::{RunReport, Runner};
use crate::backup::validate::{
    validate_cron_str, validate_exclude_patterns, validate_timestamp_format,
    validate_writable_dir,
};
use bon::Builder;
use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use validator::{Validate, ValidationError};

fn default_timestamp_format() -> String {
    "%Y%m%d%H%M%S".to_string()
}

/// The whole config file.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = validate_archive_outside_target))]
pub struct BackupConfig {
    /// Without a schedule the process backs up once and exits.
    #[validate(custom(function = validate_cron_str))]
    pub cron: Option<String>,
    #[validate(nested)]
    pub cassandra: CqlshConfig,
    #[validate(nested)]
    pub backup: BackupTargetConfig,
    #[validate(nested)]
    pub archiving: Option<ArchiveConfig>,
    #[validate(nested)]
    pub alerting: Option<AlertingConfig>,
}

/// Where and how table files are written.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupTargetConfig {
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    target_folder: PathBuf,
    #[serde(default)]
    #[builder(default)]
    empty_target_folder_before_backing_up: bool,
    #[serde(default)]
    #[builder(default)]
    compress_backup: bool,
    #[serde(default)]
    #[builder(default)]
    delete_loose_files_after_compressing: bool,
    /// chrono strftime format of the zip and archive timestamp. Empty means
    /// no timestamp segment in zip names.
    #[serde(default = "default_timestamp_format")]
    #[validate(custom(function = validate_timestamp_format))]
    #[builder(into, default = default_timestamp_format())]
    compress_timestamp_format: String,
    /// `keyspace.table` patterns, `*` matches anything.
    #[serde(default)]
    #[validate(custom(function = validate_exclude_patterns))]
    #[builder(default)]
    exclude_list: Vec<String>,
    /// Number of keyspaces backed up at the same time.
    parallelism: Option<NonZeroUsize>,
    #[serde(default, with = "humantime_serde")]
    progress_interval: Option<Duration>,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    zip: ZipConfig,
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Emptying the target would delete the archives, and every snapshot would
/// copy the previous ones.
fn validate_archive_outside_target(
    config: &BackupConfig,
) -> std::result::Result<(), ValidationError> {
    let Some(archiving) = &config.archiving else {
        return Ok(());
    };

    let target = canonical(config.backup.target_folder());
    let archive = canonical(archiving.folder());
    if archive.starts_with(&target) {
        return Err(ValidationError::new("InvalidArchiveFolder").with_message(
            format!("archive folder {archive:?} must not be inside target folder {target:?}")
                .into(),
        ));
    }
    Ok(())
}

impl BackupConfig {
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let connector = CqlshConnector::new(self.cassandra.clone());
        Runner::builder()
            .connector(&connector)
            .target(&self.backup)
            .maybe_archiving(self.archiving.as_ref())
            .maybe_alerting(self.alerting.as_ref())
            .build()
            .run(now)
    }

    /// Runs on every cron tick, or once when there is no schedule or `once`
    /// is set. Returns on the first failed run.
    pub fn start(&self, once: bool) -> Result<()> {
        let cron = match self.cron.as_deref() {
            Some(cron) if !once => cron,
            _ => {
                let report = self.run_once(Utc::now())?;
                info!("Backed up {} tables", report.tables.len());
                return Ok(());
            }
        };

        let next_tick = |after: &DateTime<Utc>| {
            cron_parser::parse(cron, after).map_err(|_| Error::InvalidCron(cron.to_string()))
        };
        let mut start = next_tick(&Utc::now())?;
        loop {
            let now = Utc::now();
            if now < start {
                info!("Sleeping until {start}");
                std::thread::sleep((start - now).to_std().unwrap_or_default())
            } else {
                let report = self.run_once(now)?;
                info!("Backed up {} tables", report.tables.len());
                start = next_tick(&now)?;
            }
        }
    }
}
