use crate::backup::result_error::{WithDebugObjectAndFnName, WithFnName, WithMsg};
use itertools::Itertools;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Regex(#[from] regex::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error(transparent)]
    LettreBuild(#[from] lettre::error::Error),
    #[error(transparent)]
    LettreSmtp(#[from] lettre::transport::smtp::Error),
    #[error("Cannot connect to cassandra at {host}:\n{}", indent::indent_all_with("  ", .reason))]
    ConnectionFailure { host: String, reason: String },
    #[error("Table properties not found for {keyspace}.{table}")]
    SchemaNotFound { keyspace: String, table: String },
    #[error("Keyspace not found: {0}")]
    KeyspaceNotFound(String),
    #[error("Query {query:?} failed:\n{}", indent::indent_all_with("  ", .reason))]
    QueryFailure { query: String, reason: String },
    #[error("Invalid cron string: {0:?}")]
    InvalidCron(String),
    #[error("Smtp send failed: {0}")]
    SmtpSendError(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send + Sync>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + Sync + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> WithFnName<S> for Error {
    fn with_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Walks through context wrappers down to the error that caused them.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.root(),
            e => e,
        }
    }
}
