//! Timestamped copies of the backup folder.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithFnName, WithMsg};
use crate::backup::validate::validate_dir_exist_or_created;
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use validator::Validate;
use walkdir::WalkDir;

/// Where archives go and how many are kept.
///
/// `keep_number_of_archives <= 0` disables pruning.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct ArchiveConfig {
    #[validate(custom(function = validate_dir_exist_or_created))]
    #[builder(into)]
    folder: PathBuf,
    #[serde(default)]
    #[builder(default)]
    keep_number_of_archives: i32,
}

/// A full copy of the backup folder taken at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveSnapshot {
    pub path: PathBuf,
    pub files: usize,
}

/// Copies `source` recursively into `archive_root/label`.
///
/// Missing directories are created and existing files at the destination are
/// overwritten, so taking the same snapshot twice is harmless.
#[named]
pub fn snapshot<P1: AsRef<Path>, P2: AsRef<Path>>(
    source: P1,
    archive_root: P2,
    label: &str,
) -> Result<ArchiveSnapshot> {
    let source = source.as_ref();
    let destination = archive_root.as_ref().join(label);
    fs::create_dir_all(&destination)
        .map_err(Error::from)
        .with_msg(format!("Creating archive folder {destination:?} failed"))?;

    let mut files = 0;
    for entry in WalkDir::new(source).follow_links(true).min_depth(1) {
        let entry = entry?;
        let target = destination.join(entry.path().strip_prefix(source)?);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            tracing::trace!("Archiving {:?} -> {:?}", entry.path(), target);
            fs::copy(entry.path(), &target)
                .map_err(Error::from)
                .with_fn_name(function_path!())?;
            files += 1;
        }
    }

    Ok(ArchiveSnapshot {
        path: destination,
        files,
    })
}

/// Deletes everything inside `dir`, files first, then subdirectories. The
/// directory itself is kept.
pub fn empty_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        } else {
            fs::remove_file(entry.path())?;
        }
    }

    for subdir in subdirs {
        fs::remove_dir_all(subdir)?;
    }
    Ok(())
}
