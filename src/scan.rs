use crate::ignore_matcher::IgnoreMatcher;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const MAX_FILE_BYTES: u64 = 1024 * 1024;

const SUPPORTED_EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "js", "jsx", "ts", "tsx", "java", "c", "h", "cpp", "cc", "hpp", "cs",
    "rb", "php", "swift", "kt", "scala", "sh", "bash", "sql", "md", "txt", "json", "yaml",
    "yml", "toml", "html", "css", "scss",
];

const MINIFIED_SUFFIXES: &[&str] = &[".min.js", ".min.css", ".bundle.js", ".bundle.css"];

/// A filesystem observation from one scan pass. Not persisted (see SPEC_FULL.md §3).
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mod_time: u64,
    pub hash: String,
    pub content: String,
}

pub struct ScanReport {
    pub files: Vec<FileInfo>,
    pub skipped: Vec<String>,
}

pub struct Scanner<'a> {
    root: PathBuf,
    ignore: &'a IgnoreMatcher,
}

impl<'a> Scanner<'a> {
    pub fn new(root: &Path, ignore: &'a IgnoreMatcher) -> anyhow::Result<Self> {
        if !root.exists() {
            anyhow::bail!("project root does not exist: {}", root.display());
        }
        Ok(Self {
            root: root.to_path_buf(),
            ignore,
        })
    }

    /// Walk the project root, applying the ignore matcher at every directory so that
    /// ignored subtrees are never descended into.
    pub fn scan(&self) -> ScanReport {
        let mut files = Vec::new();
        let mut skipped = Vec::new();

        let walker = walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let rel = self.relative(entry.path());
                !self.ignore.should_ignore(&rel, entry.file_type().is_dir())
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = self.relative(entry.path());
            match self.accept(entry.path(), &rel) {
                Ok(Some(info)) => files.push(info),
                Ok(None) => {}
                Err(reason) => skipped.push(format!("{rel}: {reason}")),
            }
        }

        ScanReport { files, skipped }
    }

    /// Re-evaluate a single relative path, for the incremental watcher path.
    pub fn scan_one(&self, rel_path: &str) -> Option<FileInfo> {
        let full = self.root.join(rel_path);
        if self.ignore.should_ignore(rel_path, full.is_dir()) {
            return None;
        }
        self.accept(&full, rel_path).ok().flatten()
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Returns `Ok(None)` for a silent per-file skip (rejected but not worth a reason),
    /// `Err(reason)` for a reported skip, `Ok(Some(_))` for an accepted file.
    fn accept(&self, full_path: &Path, rel_path: &str) -> Result<Option<FileInfo>, String> {
        let extension = full_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err("unsupported extension".to_string());
        }

        let basename = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if MINIFIED_SUFFIXES.iter().any(|suffix| basename.ends_with(suffix)) {
            return Err("minified file".to_string());
        }

        let metadata = std::fs::metadata(full_path).map_err(|e| e.to_string())?;
        if metadata.len() > MAX_FILE_BYTES {
            return Err(format!("exceeds {} bytes", MAX_FILE_BYTES));
        }

        let bytes = std::fs::read(full_path).map_err(|e| e.to_string())?;
        if bytes.contains(&0) {
            return Err("contains NUL byte".to_string());
        }
        let content = String::from_utf8(bytes.clone()).map_err(|_| "not valid UTF-8".to_string())?;

        let mod_time = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Some(FileInfo {
            path: rel_path.to_string(),
            size: metadata.len(),
            mod_time,
            hash: hash_bytes(&bytes),
            content,
        }))
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn build_ignore(root: &Path) -> IgnoreMatcher {
        IgnoreMatcher::build(root, None, &[".git".to_string()])
    }

    #[test]
    fn accepts_supported_files_and_rejects_the_rest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(dir.path().join("app.min.js"), "minified").unwrap();

        let ignore = build_ignore(dir.path());
        let scanner = Scanner::new(dir.path(), &ignore).unwrap();
        let report = scanner.scan();

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].path, "main.rs");
        assert_eq!(report.skipped.len(), 2);
    }

    #[test]
    fn rejects_files_over_size_cap() {
        let dir = TempDir::new().unwrap();
        let big = vec![b'a'; (MAX_FILE_BYTES + 1) as usize];
        fs::write(dir.path().join("big.rs"), big).unwrap();

        let ignore = build_ignore(dir.path());
        let scanner = Scanner::new(dir.path(), &ignore).unwrap();
        let report = scanner.scan();

        assert!(report.files.is_empty());
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn rejects_non_utf8_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.rs"), [0xff, 0xfe, 0xfd]).unwrap();

        let ignore = build_ignore(dir.path());
        let scanner = Scanner::new(dir.path(), &ignore).unwrap();
        let report = scanner.scan();

        assert!(report.files.is_empty());
    }

    #[test]
    fn fails_fast_on_missing_root() {
        let ignore = IgnoreMatcher::build(Path::new("/nonexistent"), None, &[]);
        let result = Scanner::new(Path::new("/nonexistent/does/not/exist"), &ignore);
        assert!(result.is_err());
    }
}
