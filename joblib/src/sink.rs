use crate::types::JobId;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

/// Append-only, file-backed output log of a single job.
///
/// Writes go through one `O_APPEND` descriptor (children get duplicates of it), so
/// bytes land at the end of the file and are never rewritten. Readers open the file
/// by path and keep their own offsets.
///
/// The backing file lives in a directory shared by every sink of a pool; both are
/// removed once the last sink and the pool are gone.
#[derive(Debug)]
pub struct OutputSink {
    file: NamedTempFile,
    _dir: Arc<TempDir>,
}

impl OutputSink {
    pub fn create(dir: &Arc<TempDir>, job_id: JobId) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .suffix(".log")
            .append(true)
            .tempfile_in(dir.path())?;
        Ok(Self {
            file,
            _dir: Arc::clone(dir),
        })
    }

    /// Append bytes; they are visible to readers once this returns.
    pub fn append(&self, bytes: &[u8]) -> io::Result<()> {
        let mut file: &File = self.file.as_file();
        file.write_all(bytes)?;
        file.flush()
    }

    pub fn append_line(&self, text: &str) -> io::Result<()> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        if !line.ends_with('\n') {
            line.push('\n');
        }
        self.append(line.as_bytes())
    }

    /// A duplicate of the write descriptor, for a child's stdout or stderr.
    pub fn stdio(&self) -> io::Result<Stdio> {
        Ok(Stdio::from(self.file.as_file().try_clone()?))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Bytes written so far.
    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.as_file().metadata()?.len())
    }
}

/// Directory holding every sink of a pool.
pub(crate) fn log_dir(parent: Option<&Path>) -> io::Result<Arc<TempDir>> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("dash-logs-");
    let dir = match parent {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)?
        }
        None => builder.tempdir()?,
    };
    Ok(Arc::new(dir))
}
