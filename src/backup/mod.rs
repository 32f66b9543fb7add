pub mod archive;
pub mod backup_config;
pub mod cassandra;
pub mod compress;
pub mod counter;
pub mod notifications;
pub mod pattern;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod row_encoder;
pub mod runner;
pub mod schema;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
