//! # cassandra_backup
//!
//! File based backups of a Cassandra cluster.
//!
//! ## Features
//!
//! - **Schema export**: `CREATE KEYSPACE` and `CREATE TABLE` statements rebuilt from `system_schema`
//! - **Data export**: every row of every table as CRLF terminated CSV
//! - **Exclusion**: wildcard patterns on `keyspace.table`
//! - **Compression**: one zip bundle per table
//! - **Archiving**: timestamped copies of the backup folder with keep-N retention
//! - **Scheduled Backups**: Cron-based automation
//! - **Alerting**: SMTP or log alerts when a run fails
//!
//! ## Quick Start
//!
//! ```no_run
//! use cassandra_backup::backup::backup_config::BackupConfig;
//! use validator::Validate;
//!
//! // Load configuration from YAML file
//! let config: BackupConfig = serde_yml::from_reader(std::fs::File::open("config.yml")?)?;
//! config.validate()?;
//!
//! // Back up once, ignoring any cron schedule
//! config.start(true)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
