use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Writes numbered local copies: `<seq>_<subject>.<ext>`.
///
/// The sequence is shared by every file written through one archive, so
/// files sort in emission order.
#[derive(Debug)]
pub struct Archive {
    dir: PathBuf,
    next: AtomicUsize,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, subject: &str, extension: &str, contents: &str) -> std::io::Result<PathBuf> {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        let safe: String = subject
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        let path = self.dir.join(format!("{seq}_{safe}.{extension}"));
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}
