//! Validation functions for configuration values.
//!
//! Provides custom validation functions for directories, cron expressions,
//! timestamp formats and exclude patterns.

use crate::backup::pattern::PatternList;
use chrono::format::{Item, StrftimeItems};
use chrono::Utc;
use sanitize_filename::{is_sanitized, sanitize};
use std::path::Path;
use validator::ValidationError;

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access directory {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

pub fn validate_cron_str<S: AsRef<str>>(cron: S) -> Result<(), ValidationError> {
    let cron = cron.as_ref();
    if cron_parser::parse(cron, &Utc::now()).is_err() {
        return Err(ValidationError::new("InvalidCron")
            .with_message(format!("Invalid cron string: {cron:?}").into()));
    }

    Ok(())
}

/// A strftime format whose output can be used as a file name segment. The
/// empty format is allowed and means "no timestamp".
pub fn validate_timestamp_format<S: AsRef<str>>(format: S) -> Result<(), ValidationError> {
    let format = format.as_ref();
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ValidationError::new("InvalidTimestampFormat")
            .with_message(format!("Invalid timestamp format: {format:?}").into()));
    }

    let sample = Utc::now().format(format).to_string();
    if !sample.is_empty() && !is_sanitized(&sample) {
        return Err(ValidationError::new("InvalidTimestampFormat").with_message(
            format!(
                "Timestamp format {format:?} renders as {sample:?}, which is not a valid file name, try something like {:?}",
                sanitize(&sample)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_exclude_patterns(patterns: &[String]) -> Result<(), ValidationError> {
    PatternList::new(patterns).map(|_| ()).map_err(|e| {
        ValidationError::new("InvalidExcludePattern")
            .with_message(format!("Invalid exclude pattern: {e}").into())
    })
}
