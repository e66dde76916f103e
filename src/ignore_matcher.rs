use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

/// Hierarchical gitignore-style filter over relative paths, built once per scan.
///
/// Nested `.gitignore` files are collected bottom-up by [`ignore::gitignore::GitignoreBuilder`],
/// which already implements git's override-by-nesting semantics (a rule in a deeper
/// `.gitignore` overrides one from an ancestor). We add an external gitignore file and a
/// fixed extra-directory list on top of that.
pub struct IgnoreMatcher {
    gitignore: Gitignore,
    extra_dirs: Vec<String>,
}

impl IgnoreMatcher {
    /// Build a matcher for `root`, walking every `.gitignore` beneath it.
    pub fn build(root: &Path, external_gitignore: Option<&Path>, extra_dirs: &[String]) -> Self {
        let mut builder = GitignoreBuilder::new(root);

        for entry in walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_name() == ".gitignore" {
                if let Some(err) = builder.add(entry.path()) {
                    log::warn!("skipping unreadable .gitignore {}: {err}", entry.path().display());
                }
            }
        }

        if let Some(external) = external_gitignore {
            if let Some(err) = builder.add(external) {
                log::warn!("skipping unreadable external gitignore {}: {err}", external.display());
            }
        }

        let gitignore = builder.build().unwrap_or_else(|err| {
            log::warn!("failed to build gitignore matcher: {err}");
            Gitignore::empty()
        });

        Self {
            gitignore,
            extra_dirs: extra_dirs.to_vec(),
        }
    }

    /// `rel_path` is forward-slash normalized, relative to the project root.
    pub fn should_ignore(&self, rel_path: &str, is_dir: bool) -> bool {
        let normalized = rel_path.replace('\\', "/");
        let path = Path::new(&normalized);

        if let Some(basename) = path.file_name().and_then(|n| n.to_str()) {
            if self.extra_dirs.iter().any(|d| d == basename) {
                return true;
            }
        }

        self.gitignore
            .matched_path_or_any_parents(path, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn respects_root_gitignore() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n*.log\n").unwrap();
        fs::create_dir_all(dir.path().join("target")).unwrap();

        let matcher = IgnoreMatcher::build(dir.path(), None, &[]);
        assert!(matcher.should_ignore("target", true));
        assert!(matcher.should_ignore("debug.log", false));
        assert!(!matcher.should_ignore("src/main.rs", false));
    }

    #[test]
    fn nested_gitignore_scoped_to_its_subtree() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/.gitignore"), "local.txt\n").unwrap();

        let matcher = IgnoreMatcher::build(dir.path(), None, &[]);
        assert!(matcher.should_ignore("sub/local.txt", false));
        assert!(!matcher.should_ignore("local.txt", false));
    }

    #[test]
    fn extra_dirs_matched_by_basename() {
        let dir = TempDir::new().unwrap();
        let matcher = IgnoreMatcher::build(dir.path(), None, &[".git".to_string()]);
        assert!(matcher.should_ignore(".git", true));
        assert!(matcher.should_ignore("nested/.git", true));
    }
}
