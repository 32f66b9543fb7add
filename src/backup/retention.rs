use crate::backup::result_error::result::Result;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::cmp::Reverse;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Hash, Eq, PartialEq)]
pub struct ItemWithDateTime<R> {
    pub item: R,
    pub date_time: DateTime<Utc>,
}

impl<R> From<(R, DateTime<Utc>)> for ItemWithDateTime<R> {
    fn from(value: (R, DateTime<Utc>)) -> Self {
        Self {
            item: value.0,
            date_time: value.1,
        }
    }
}

impl<R: Debug> Debug for ItemWithDateTime<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}@{}", self.item, self.date_time)
    }
}

/// Items past the `keep` newest ones, newest first. A non-positive `keep`
/// disables pruning and selects nothing.
pub fn get_delete<R, I>(iter: I, keep: i32) -> Vec<R>
where
    I: IntoIterator<Item = ItemWithDateTime<R>>,
{
    let Ok(keep) = usize::try_from(keep) else {
        return Vec::new();
    };
    if keep == 0 {
        return Vec::new();
    }

    iter.into_iter()
        .sorted_by_key(|r| Reverse(r.date_time))
        .skip(keep)
        .map(|r| r.item)
        .collect()
}

/// Creation time, or modification time where the file system does not
/// record creation.
fn created_at(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = fs::metadata(path)?;
    let time = metadata.created().or_else(|_| metadata.modified())?;
    Ok(time.into())
}

/// Snapshot directories directly under `archive_root`.
pub fn list_archives<P: AsRef<Path>>(archive_root: P) -> Result<Vec<ItemWithDateTime<PathBuf>>> {
    let mut archives = Vec::new();
    for entry in fs::read_dir(archive_root.as_ref())? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let path = entry.path();
            let created = created_at(&path)?;
            archives.push(ItemWithDateTime::from((path, created)));
        }
    }
    Ok(archives)
}

/// Deletes all but the `keep` most recently created snapshots and returns the
/// deleted paths.
pub fn prune<P: AsRef<Path>>(archive_root: P, keep: i32) -> Result<Vec<PathBuf>> {
    if keep <= 0 {
        tracing::info!("Archive pruning disabled (keep_number_of_archives = {keep})");
        return Ok(Vec::new());
    }

    let to_delete = get_delete(list_archives(archive_root)?, keep);
    for path in &to_delete {
        tracing::info!("Removing out of retention archive {:?}", path);
        fs::remove_dir_all(path)?;
    }
    Ok(to_delete)
}
