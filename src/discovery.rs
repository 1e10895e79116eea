//! File discovery.
//!
//! Walks the paths given on the command line and yields one
//! [`FileDescriptor`] per file to format. The walk runs on a blocking thread
//! and feeds a bounded channel, so the returned stream is lazy and discovery
//! never runs far ahead of formatting.

use crate::error::{ParafmtError, Result};
use crate::worker::FileDescriptor;
use futures::stream::Stream;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Ignore file read from the current directory unless overridden.
pub const DEFAULT_IGNORE_FILE: &str = ".parafmtignore";

/// Extensions picked up when walking directories.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "c", "cc", "cpp", "css", "go", "h", "hpp", "html", "java", "js", "json", "jsx", "md", "py",
    "rb", "rs", "sh", "toml", "ts", "tsx", "txt", "yaml", "yml",
];

/// Directories never descended into.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", ".git"];

/// Discovered files buffered ahead of the pipeline.
const DISCOVERY_BUFFER: usize = 256;

/// Patterns from an ignore file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    patterns: Vec<String>,
}

impl IgnoreSet {
    /// Parse ignore file contents: one pattern per line, `#` starts a comment.
    pub fn parse(contents: &str) -> Self {
        let patterns = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let line = line.strip_prefix("./").unwrap_or(line);
                line.trim_end_matches('/').to_string()
            })
            .filter(|line| !line.is_empty())
            .collect();
        Self { patterns }
    }

    /// Load an ignore file. A missing file means nothing is ignored.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let set = Self::parse(&contents);
                debug!(path = %path.display(), patterns = set.patterns.len(), "Loaded ignore file");
                Ok(set)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ParafmtError::Discovery {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether a path relative to the working directory is ignored.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        self.patterns.iter().any(|pattern| {
            if let Some(ext) = pattern.strip_prefix("*.") {
                return relative.extension().is_some_and(|e| e == ext);
            }
            if relative.starts_with(pattern) {
                return true;
            }
            !pattern.contains('/')
                && relative
                    .components()
                    .any(|c| c.as_os_str() == pattern.as_str())
        })
    }
}

/// Inputs to a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Working directory; relative inputs and ignore patterns resolve against it.
    pub cwd: PathBuf,
    /// Files or directories to format. Empty means the working directory.
    pub inputs: Vec<PathBuf>,
    /// Extensions (without the dot) accepted while walking directories.
    pub extensions: Vec<String>,
    pub ignore: IgnoreSet,
}

impl DiscoveryConfig {
    pub fn new(cwd: impl Into<PathBuf>, inputs: Vec<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            inputs,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            ignore: IgnoreSet::default(),
        }
    }
}

struct Walker {
    cwd: PathBuf,
    extensions: Vec<String>,
    ignore: IgnoreSet,
}

impl Walker {
    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.cwd).unwrap_or(path)
    }

    fn ignored(&self, path: &Path) -> bool {
        !self.ignore.is_empty() && self.ignore.is_ignored(self.relative(path))
    }

    fn extension_matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| {
                self.extensions
                    .iter()
                    .any(|accepted| accepted.eq_ignore_ascii_case(e))
            })
    }

    fn skip_dir(&self, entry: &walkdir::DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.')
            || SKIPPED_DIRS.iter().any(|skipped| name == *skipped)
            || self.ignored(entry.path())
    }

    fn descriptor(&self, base: &Path, path: PathBuf) -> FileDescriptor {
        FileDescriptor::new(&self.cwd, base, path)
    }

    fn walk_input(
        self: Arc<Self>,
        input: PathBuf,
    ) -> Box<dyn Iterator<Item = Result<FileDescriptor>> + Send> {
        let path = absolutize(&self.cwd, &input);
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                return Box::new(std::iter::once(Err(ParafmtError::Discovery {
                    path: input,
                    message: e.to_string(),
                })));
            }
        };

        if !metadata.is_dir() {
            if self.ignored(&path) {
                trace!(path = %path.display(), "Ignored");
                return Box::new(std::iter::empty());
            }
            let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
            return Box::new(std::iter::once(Ok(self.descriptor(&base, path))));
        }

        let base = path.clone();
        let walker = Arc::clone(&self);
        let entries = WalkDir::new(&path)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !walker.skip_dir(entry));

        Box::new(entries.filter_map(move |entry| match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    return None;
                }
                if entry.file_name().to_string_lossy().starts_with('.') {
                    return None;
                }
                let file = entry.into_path();
                if !self.extension_matches(&file) || self.ignored(&file) {
                    return None;
                }
                Some(Ok(self.descriptor(&base, file)))
            }
            Err(e) => Some(Err(ParafmtError::Discovery {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| base.clone()),
                message: e.to_string(),
            })),
        }))
    }
}

/// Lexically resolve `input` against `cwd`, dropping `.` and folding `..`.
fn absolutize(cwd: &Path, input: &Path) -> PathBuf {
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        cwd.join(input)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Synchronous walk over every input, in order.
pub fn walk(config: DiscoveryConfig) -> impl Iterator<Item = Result<FileDescriptor>> + Send {
    let inputs = if config.inputs.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        config.inputs
    };
    let walker = Arc::new(Walker {
        cwd: config.cwd,
        extensions: config.extensions,
        ignore: config.ignore,
    });
    inputs
        .into_iter()
        .flat_map(move |input| Arc::clone(&walker).walk_input(input))
}

/// Lazy stream of discovered files.
///
/// Must be called from within a tokio runtime. Dropping the stream stops the
/// walk.
pub fn discover(config: DiscoveryConfig) -> impl Stream<Item = Result<FileDescriptor>> + Send {
    let (tx, rx) = mpsc::channel(DISCOVERY_BUFFER);
    tokio::task::spawn_blocking(move || {
        for item in walk(config) {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x\n").unwrap();
    }

    fn relative_paths(root: &Path, config: DiscoveryConfig) -> Vec<String> {
        let mut paths: Vec<String> = walk(config)
            .map(|r| {
                r.unwrap()
                    .path
                    .strip_prefix(root)
                    .unwrap()
                    .display()
                    .to_string()
            })
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_ignore_patterns() {
        let set = IgnoreSet::parse("# generated\n\nbuild/\n*.min.js\nvendor\n./docs/api\n");
        assert!(set.is_ignored(Path::new("build/out.txt")));
        assert!(set.is_ignored(Path::new("src/vendor/lib.rs")));
        assert!(set.is_ignored(Path::new("app.min.js")));
        assert!(set.is_ignored(Path::new("docs/api/index.md")));
        assert!(!set.is_ignored(Path::new("docs/guide.md")));
        assert!(!set.is_ignored(Path::new("builder.rs")));
    }

    #[test]
    fn test_ext_pattern_matches_last_extension() {
        let set = IgnoreSet::parse("*.json");
        assert!(set.is_ignored(Path::new("a/b/package.json")));
        assert!(!set.is_ignored(Path::new("a/json/readme.md")));
    }

    #[test]
    fn test_missing_ignore_file_is_empty() {
        let tmp = tempdir().unwrap();
        let set = IgnoreSet::load(&tmp.path().join(DEFAULT_IGNORE_FILE)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_walk_filters_and_skips() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        touch(root, "src/main.rs");
        touch(root, "src/notes.txt");
        touch(root, "src/image.png");
        touch(root, ".hidden/secret.rs");
        touch(root, "src/.env.json");
        touch(root, "target/debug/gen.rs");
        touch(root, "node_modules/pkg/index.js");
        touch(root, "vendor/dep.rs");

        let mut config = DiscoveryConfig::new(root, vec![]);
        config.ignore = IgnoreSet::parse("vendor");

        assert_eq!(
            relative_paths(root, config),
            vec!["src/main.rs", "src/notes.txt"]
        );
    }

    #[test]
    fn test_explicit_file_bypasses_extension_filter() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        touch(root, "Makefile");

        let config = DiscoveryConfig::new(root, vec![PathBuf::from("Makefile")]);
        let files: Vec<_> = walk(config).collect::<Result<_>>().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].base, root);
        assert_eq!(files[0].path, root.join("Makefile"));
        assert_eq!(files[0].cwd, root);
    }

    #[test]
    fn test_directory_input_sets_base() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        touch(root, "pkg/src/lib.rs");

        let config = DiscoveryConfig::new(root, vec![PathBuf::from("./pkg")]);
        let files: Vec<_> = walk(config).collect::<Result<_>>().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].base, root.join("pkg"));
        assert_eq!(files[0].display_path(), Path::new("src/lib.rs"));
    }

    #[test]
    fn test_missing_input_is_error() {
        let tmp = tempdir().unwrap();
        let config = DiscoveryConfig::new(tmp.path(), vec![PathBuf::from("nope")]);
        let results: Vec<_> = walk(config).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ParafmtError::Discovery { .. })));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize(Path::new("/work"), Path::new("./a/../b")),
            PathBuf::from("/work/b")
        );
        assert_eq!(
            absolutize(Path::new("/work"), Path::new("/abs/x")),
            PathBuf::from("/abs/x")
        );
    }

    #[tokio::test]
    async fn test_discover_stream_yields_all() {
        let tmp = tempdir().unwrap();
        for i in 0..300 {
            touch(tmp.path(), &format!("f{i}.txt"));
        }
        let config = DiscoveryConfig::new(tmp.path(), vec![]);
        let count = discover(config).filter(|r| futures::future::ready(r.is_ok())).count().await;
        assert_eq!(count, 300);
    }
}
