use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithFnName, WithMsg};
use bon::Builder;
use function_name::named;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use validator::Validate;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Default deflate level (balance of speed vs size)
static DEFAULT_COMPRESSION_LEVEL: i64 = 6;

/// Settings for the per-table zip bundle.
#[skip_serializing_none]
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate, Builder)]
#[serde(deny_unknown_fields)]
pub struct ZipConfig {
    /// Deflate level, 0 (fastest) to 9 (smallest).
    #[validate(range(min = 0, max = 9))]
    level: Option<i64>,
}

impl ZipConfig {
    fn options(&self) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.level.unwrap_or(DEFAULT_COMPRESSION_LEVEL)))
    }

    /// Zips `files` into `destination`, each stored under its base name.
    ///
    /// The archive is written to a `.tmp` sibling and renamed into place, so a
    /// failed run never leaves a truncated bundle behind.
    #[named]
    pub fn bundle<P: AsRef<Path>>(&self, files: &[P], destination: &Path) -> Result<PathBuf> {
        let tmp_path = destination.with_extension("zip.tmp");
        tracing::debug!("Writing {} files into {:?}", files.len(), tmp_path);

        self.write_zip(files, &tmp_path)
            .and_then(|_| std::fs::rename(&tmp_path, destination).map_err(Error::from))
            .map(|_| destination.to_path_buf())
            .map_err(|mut e| {
                if let Err(e2) = std::fs::remove_file(&tmp_path) {
                    if e2.kind() != std::io::ErrorKind::NotFound {
                        e = e.chain(e2.into())
                    }
                }
                e.with_msg(format!("Compressing into {destination:?} failed"))
            })
            .with_fn_name(function_path!())
    }

    fn write_zip<P: AsRef<Path>>(&self, files: &[P], zip_path: &Path) -> Result<()> {
        let mut writer = ZipWriter::new(BufWriter::new(File::create(zip_path)?));
        let options = self.options();

        for file in files {
            let file = file.as_ref();
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| std::io::Error::other(format!("{file:?} has no file name")))?;
            writer.start_file(name.to_string(), options)?;
            std::io::copy(&mut File::open(file)?, &mut writer)?;
        }

        writer
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;
        Ok(())
    }
}
