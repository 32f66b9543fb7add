//! One complete backup run.

use crate::backup::archive::{empty_dir, snapshot, ArchiveConfig, ArchiveSnapshot};
use crate::backup::backup_config::BackupTargetConfig;
use crate::backup::cassandra::{CassandraConnector, CassandraSession, TableIdentity};
use crate::backup::counter::RowCounter;
use crate::backup::function_path;
use crate::backup::notifications::{AlertPriority, Notification};
use crate::backup::pattern::PatternList;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithFnName, WithMsg};
use crate::backup::retention::prune;
use crate::backup::row_encoder::RowWriter;
use crate::backup::schema::{keyspace_ddl, table_ddl};
use bon::Builder;
use chrono::{DateTime, Utc};
use function_name::named;
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs::{self, File};
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{error, info, info_span, Span};

/// Archive folder name used when no timestamp format is configured.
static DEFAULT_ARCHIVE_LABEL_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableReport {
    pub identity: TableIdentity,
    pub rows: u64,
    pub bundle: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
    pub archive: Option<ArchiveSnapshot>,
    pub pruned: Vec<PathBuf>,
}

/// Backs up every table that is not excluded, then archives the result.
///
/// The run is all or nothing: the first error stops it, is logged, raises a
/// single `Low` alert and is returned. Files of tables finished before the
/// error stay on disk.
#[derive(Builder)]
pub struct Runner<'a, C: CassandraConnector, N: Notification> {
    connector: &'a C,
    target: &'a BackupTargetConfig,
    archiving: Option<&'a ArchiveConfig>,
    alerting: Option<&'a N>,
}

impl<C: CassandraConnector, N: Notification> Runner<'_, C, N> {
    pub fn run(&self, now: DateTime<Utc>) -> Result<RunReport> {
        self.run_inner(now).map_err(|e| {
            error!("Backup failed: {e}");
            if let Some(alerting) = self.alerting {
                if let Err(alert_error) =
                    alerting.alert(format!("Cassandra backup failed:\n{e}"), AlertPriority::Low)
                {
                    error!("Sending alert failed: {alert_error}");
                }
            }
            e
        })
    }

    fn run_inner(&self, now: DateTime<Utc>) -> Result<RunReport> {
        info!("Starting backup run at {now}");
        let session = self.connector.connect()?;

        let target_folder = self.target.target_folder();
        fs::create_dir_all(target_folder)
            .map_err(Error::from)
            .with_msg(format!("Creating target folder {target_folder:?} failed"))?;
        if *self.target.empty_target_folder_before_backing_up() {
            info!("Emptying target folder {target_folder:?}");
            empty_dir(target_folder)?;
        }

        let excludes = PatternList::new(self.target.exclude_list())?;
        let tables = session
            .list_tables()?
            .into_iter()
            .filter(|identity| {
                let excluded = excludes.matches(&identity.to_string());
                if excluded {
                    info!("Skipping {identity}, it matches the exclude list");
                }
                !excluded
            })
            .collect_vec();
        info!("Backing up {} tables", tables.len());

        let stamp = self.stamp(now);
        let table_reports = match self.target.parallelism() {
            Some(parallelism) if parallelism.get() > 1 => {
                backup_parallel(self.target, &session, tables, stamp.as_deref(), parallelism.get())?
            }
            _ => tables
                .iter()
                .map(|identity| backup_table(self.target, &session, identity, stamp.as_deref()))
                .collect::<Result<Vec<_>>>()?,
        };

        let mut report = RunReport {
            tables: table_reports,
            ..RunReport::default()
        };

        if let Some(archiving) = self.archiving {
            let label = stamp.unwrap_or_else(|| now.format(DEFAULT_ARCHIVE_LABEL_FORMAT).to_string());
            info!("Archiving {target_folder:?} into {:?} as {label}", archiving.folder());
            let archived = snapshot(target_folder, archiving.folder(), &label)?;
            info!("Archived {} files into {:?}", archived.files, archived.path);
            report.archive = Some(archived);
            report.pruned = prune(archiving.folder(), *archiving.keep_number_of_archives())?;
        }

        info!("Backup run finished");
        Ok(report)
    }

    /// The formatted run timestamp, `None` when the format is empty.
    fn stamp(&self, now: DateTime<Utc>) -> Option<String> {
        let format = self.target.compress_timestamp_format();
        if format.is_empty() {
            None
        } else {
            Some(now.format(format).to_string())
        }
    }
}

/// Tables of one keyspace share the `ks.keyspace` file, so each keyspace is
/// handled by a single worker. Reports come back ordered by keyspace.
fn backup_parallel<S: CassandraSession>(
    target: &BackupTargetConfig,
    session: &S,
    tables: Vec<TableIdentity>,
    stamp: Option<&str>,
    parallelism: usize,
) -> Result<Vec<TableReport>> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(parallelism)
        .thread_name(|i| format!("backup-{i}"))
        .build()?;
    let by_keyspace = tables
        .into_iter()
        .sorted_by(|a, b| a.keyspace.cmp(&b.keyspace))
        .chunk_by(|identity| identity.keyspace.clone())
        .into_iter()
        .map(|(_, group)| group.collect_vec())
        .collect_vec();

    let reports = pool.install(|| {
        by_keyspace
            .par_iter()
            .map(|group| {
                group
                    .iter()
                    .map(|identity| backup_table(target, session, identity, stamp))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()
    })?;
    Ok(reports.into_iter().flatten().collect())
}

#[named]
fn backup_table<S: CassandraSession>(
    target: &BackupTargetConfig,
    session: &S,
    identity: &TableIdentity,
    stamp: Option<&str>,
) -> Result<TableReport> {
    let span = info_span!("table", name = %identity);
    let _enter = span.enter();
    info!("Backing up table");

    backup_table_files(target, session, identity, stamp)
        .with_debug_object_and_fn_name(identity.to_string(), function_path!())
}

fn backup_table_files<S: CassandraSession>(
    target: &BackupTargetConfig,
    session: &S,
    identity: &TableIdentity,
    stamp: Option<&str>,
) -> Result<TableReport> {
    let folder = target.target_folder();
    let keyspace_file = folder.join(format!("{}.keyspace", identity.keyspace));
    let table_file = folder.join(format!("{identity}.table"));
    let data_file = folder.join(format!("{identity}.csv"));

    fs::write(&keyspace_file, keyspace_ddl(session, &identity.keyspace)?)?;
    fs::write(&table_file, table_ddl(session, identity)?)?;

    let counter = RowCounter::default();
    let rows = with_progress(&counter, *target.progress_interval(), || {
        export_rows(session, identity, &data_file, &counter)
    })?;
    info!("Wrote {rows} rows");

    let loose_files = [keyspace_file, table_file, data_file];
    let bundle = if *target.compress_backup() {
        let name = match stamp {
            Some(stamp) => format!("{identity}.{stamp}.zip"),
            None => format!("{identity}.zip"),
        };
        let bundle = target.zip().bundle(&loose_files, &folder.join(name))?;
        info!("Compressed into {bundle:?}");

        if *target.delete_loose_files_after_compressing() {
            for file in &loose_files {
                remove_loose_file(file)?;
            }
        }
        Some(bundle)
    } else {
        None
    };

    Ok(TableReport {
        identity: identity.clone(),
        rows,
        bundle,
    })
}

/// The keyspace file is shared by all tables of a keyspace; an earlier table
/// may already have removed it.
fn remove_loose_file(file: &Path) -> Result<()> {
    match fs::remove_file(file) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::from(e)
            .with_msg(format!("Deleting loose file {file:?} failed"))),
        _ => Ok(()),
    }
}

#[named]
fn export_rows<S: CassandraSession>(
    session: &S,
    identity: &TableIdentity,
    path: &Path,
    counter: &RowCounter,
) -> Result<u64> {
    let row_set = session.stream_rows(identity)?;
    let file = File::create(path)
        .map(BufWriter::new)
        .map_err(Error::from)
        .with_msg(format!("Creating {path:?} failed"))?;
    let mut writer = RowWriter::new(file, row_set.columns.len(), counter);
    for row in row_set.rows {
        writer.write_row(&row?)?;
    }

    writer
        .into_inner()
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()
        .map_err(Error::from)
        .with_fn_name(function_path!())?;
    Ok(counter.read())
}

/// Runs `f` while a scoped thread logs the counter every `interval`.
fn with_progress<T, F>(counter: &RowCounter, interval: Option<Duration>, f: F) -> T
where
    F: FnOnce() -> T,
{
    let Some(interval) = interval else {
        return f();
    };

    std::thread::scope(|scope| {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let span = Span::current();
        scope.spawn(move || {
            let _enter = span.enter();
            while let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(interval) {
                info!("{} rows written so far", counter.read());
            }
        });

        let result = f();
        drop(done_tx);
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::cassandra::memory::{MemoryConnector, MemoryTable};
    use crate::backup::cassandra::CqlValue;
    use crate::backup::compress::ZipConfig;
    use crate::backup::notifications::recording::RecordingNotification;
    use crate::backup::schema::{ColumnDescriptor, ColumnKind, TableProperties};
    use chrono::TimeZone;
    use std::io::Read;
    use std::num::NonZeroUsize;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn users_table(keyspace: &str, table: &str) -> MemoryTable {
        MemoryTable::builder()
            .identity(TableIdentity::new(keyspace, table))
            .columns(vec![
                ColumnDescriptor::new("id", "int", ColumnKind::PartitionKey, 0),
                ColumnDescriptor::new("name", "text", ColumnKind::Regular, 0),
            ])
            .properties(TableProperties::default())
            .rows(vec![
                vec![CqlValue::Int(1), CqlValue::Text("a".into())],
                vec![CqlValue::Int(2), CqlValue::Text("b,c".into())],
                vec![CqlValue::Int(3), CqlValue::Null],
            ])
            .build()
    }

    fn connector(tables: Vec<MemoryTable>) -> MemoryConnector {
        MemoryConnector {
            tables,
            reachable: true,
        }
    }

    fn target(folder: &Path) -> BackupTargetConfig {
        BackupTargetConfig::builder()
            .target_folder(folder)
            .compress_timestamp_format("%Y%m%d%H%M%S")
            .build()
    }

    fn run<C: CassandraConnector>(
        connector: &C,
        target: &BackupTargetConfig,
        archiving: Option<&ArchiveConfig>,
        alerts: &RecordingNotification,
    ) -> Result<RunReport> {
        Runner::builder()
            .connector(connector)
            .target(target)
            .maybe_archiving(archiving)
            .alerting(alerts)
            .build()
            .run(now())
    }

    fn file_names(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .sorted()
            .collect()
    }

    #[test]
    fn test_backup_writes_files_and_skips_excluded() {
        let dir = TempDir::new().unwrap();
        let connector = connector(vec![users_table("ks", "users"), users_table("skip", "t")]);
        let target = BackupTargetConfig::builder()
            .target_folder(dir.path())
            .exclude_list(vec!["skip.*".to_string()])
            .build();
        let alerts = RecordingNotification::default();

        let report = run(&connector, &target, None, &alerts).unwrap();

        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].rows, 3);
        assert_eq!(report.tables[0].bundle, None);
        assert_eq!(
            file_names(dir.path()),
            vec!["ks.keyspace", "ks.users.csv", "ks.users.table"]
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("ks.users.csv")).unwrap(),
            "1,a\r\n2,\"b,c\"\r\n3,\r\n"
        );
        assert!(fs::read_to_string(dir.path().join("ks.users.table"))
            .unwrap()
            .starts_with("CREATE TABLE ks.users (\n    id int,\n    name text,\n    PRIMARY KEY (id)\n"));
        assert!(alerts.alerts().is_empty());
    }

    #[test]
    fn test_backup_compresses_with_timestamp() {
        let dir = TempDir::new().unwrap();
        let connector = connector(vec![users_table("ks", "users")]);
        let target = BackupTargetConfig::builder()
            .target_folder(dir.path())
            .compress_backup(true)
            .compress_timestamp_format("%Y%m%d%H%M%S")
            .build();

        let report = run(&connector, &target, None, &RecordingNotification::default()).unwrap();

        let bundle = dir.path().join("ks.users.20240102030405.zip");
        assert_eq!(report.tables[0].bundle, Some(bundle.clone()));
        let mut archive = zip::ZipArchive::new(File::open(&bundle).unwrap()).unwrap();
        let mut csv = String::new();
        archive
            .by_name("ks.users.csv")
            .unwrap()
            .read_to_string(&mut csv)
            .unwrap();
        assert_eq!(csv, "1,a\r\n2,\"b,c\"\r\n3,\r\n");
        assert!(archive.by_name("ks.keyspace").is_ok());
        assert!(archive.by_name("ks.users.table").is_ok());
        // Loose files are kept unless asked otherwise.
        assert!(dir.path().join("ks.users.csv").is_file());
    }

    #[test]
    fn test_backup_compresses_without_timestamp_and_deletes_loose_files() {
        let dir = TempDir::new().unwrap();
        let connector = connector(vec![users_table("ks", "users"), users_table("ks", "orders")]);
        let target = BackupTargetConfig::builder()
            .target_folder(dir.path())
            .compress_backup(true)
            .compress_timestamp_format("")
            .delete_loose_files_after_compressing(true)
            .zip(ZipConfig::builder().level(9).build())
            .build();

        run(&connector, &target, None, &RecordingNotification::default()).unwrap();

        assert_eq!(
            file_names(dir.path()),
            vec!["ks.orders.zip", "ks.users.zip"]
        );
    }

    #[test]
    fn test_backup_empties_target_first() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("old/nested")).unwrap();
        fs::write(dir.path().join("old/nested/stale.csv"), "x").unwrap();
        fs::write(dir.path().join("stale.csv"), "x").unwrap();
        let connector = connector(vec![users_table("ks", "users")]);
        let target = BackupTargetConfig::builder()
            .target_folder(dir.path())
            .empty_target_folder_before_backing_up(true)
            .build();

        run(&connector, &target, None, &RecordingNotification::default()).unwrap();

        assert_eq!(
            file_names(dir.path()),
            vec!["ks.keyspace", "ks.users.csv", "ks.users.table"]
        );
    }

    #[test]
    fn test_missing_schema_aborts_run_with_one_low_alert() {
        let dir = TempDir::new().unwrap();
        let broken = MemoryTable::builder()
            .identity(TableIdentity::new("ks", "broken"))
            .build();
        let connector = connector(vec![
            users_table("ks", "first"),
            broken,
            users_table("ks", "last"),
        ]);
        let target = target(dir.path());
        let alerts = RecordingNotification::default();

        let error = run(&connector, &target, None, &alerts).unwrap_err();

        assert!(matches!(error.root(), Error::SchemaNotFound { table, .. } if table == "broken"));
        assert!(dir.path().join("ks.first.csv").is_file());
        assert!(!dir.path().join("ks.last.csv").exists());
        assert!(!dir.path().join("ks.last.table").exists());

        let alerts = alerts.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].1, AlertPriority::Low);
        assert!(alerts[0].0.contains("Table properties not found for ks.broken"));
    }

    #[test]
    fn test_connection_failure_alerts_once() {
        let dir = TempDir::new().unwrap();
        let connector = MemoryConnector {
            tables: vec![users_table("ks", "users")],
            reachable: false,
        };
        let target = target(dir.path());
        let alerts = RecordingNotification::default();

        let error = run(&connector, &target, None, &alerts).unwrap_err();

        assert!(matches!(error.root(), Error::ConnectionFailure { .. }));
        assert_eq!(alerts.alerts().len(), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_archive_and_prune() {
        let dir = TempDir::new().unwrap();
        let target_folder = dir.path().join("target");
        let archive_folder = dir.path().join("archive");
        fs::create_dir_all(archive_folder.join("old-1")).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::create_dir_all(archive_folder.join("old-2")).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let connector = connector(vec![users_table("ks", "users")]);
        let target = target(&target_folder);
        let archiving = ArchiveConfig::builder()
            .folder(&archive_folder)
            .keep_number_of_archives(2)
            .build();

        let report = run(
            &connector,
            &target,
            Some(&archiving),
            &RecordingNotification::default(),
        )
        .unwrap();

        let archive = report.archive.unwrap();
        assert_eq!(archive.path, archive_folder.join("20240102030405"));
        assert_eq!(archive.files, 3);
        assert!(archive.path.join("ks.users.csv").is_file());
        assert_eq!(report.pruned, vec![archive_folder.join("old-1")]);
        assert_eq!(file_names(&archive_folder), vec!["20240102030405", "old-2"]);
    }

    #[test]
    fn test_archive_label_without_timestamp_format() {
        let dir = TempDir::new().unwrap();
        let connector = connector(vec![users_table("ks", "users")]);
        let target = BackupTargetConfig::builder()
            .target_folder(dir.path().join("target"))
            .compress_timestamp_format("")
            .build();
        let archiving = ArchiveConfig::builder()
            .folder(dir.path().join("archive"))
            .build();

        let report = run(
            &connector,
            &target,
            Some(&archiving),
            &RecordingNotification::default(),
        )
        .unwrap();

        assert_eq!(
            report.archive.unwrap().path,
            dir.path().join("archive/20240102T030405Z")
        );
        assert!(report.pruned.is_empty());
    }

    #[test]
    fn test_parallel_backup() {
        let dir = TempDir::new().unwrap();
        let connector = connector(vec![
            users_table("a", "t1"),
            users_table("a", "t2"),
            users_table("b", "t1"),
            users_table("c", "t1"),
        ]);
        let target = BackupTargetConfig::builder()
            .target_folder(dir.path())
            .compress_backup(true)
            .delete_loose_files_after_compressing(true)
            .compress_timestamp_format("")
            .parallelism(NonZeroUsize::new(3).unwrap())
            .progress_interval(Duration::from_millis(1))
            .build();

        let report = run(&connector, &target, None, &RecordingNotification::default()).unwrap();

        assert_eq!(
            report
                .tables
                .iter()
                .map(|t| (t.identity.to_string(), t.rows))
                .collect_vec(),
            vec![
                ("a.t1".to_string(), 3),
                ("a.t2".to_string(), 3),
                ("b.t1".to_string(), 3),
                ("c.t1".to_string(), 3),
            ]
        );
        assert_eq!(
            file_names(dir.path()),
            vec!["a.t1.zip", "a.t2.zip", "b.t1.zip", "c.t1.zip"]
        );
    }

    #[test]
    fn test_with_progress_returns_result() {
        let counter = RowCounter::default();
        let value = with_progress(&counter, Some(Duration::from_millis(1)), || {
            for _ in 0..5 {
                counter.increment();
                std::thread::sleep(Duration::from_millis(2));
            }
            counter.read()
        });
        assert_eq!(value, 5);
    }
}
