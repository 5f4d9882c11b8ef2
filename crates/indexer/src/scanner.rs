use context_syntax::LanguageId;
use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};

/// Finds analyzable files under a root (.gitignore aware)
pub struct FileScanner {
    root: PathBuf,
    max_file_size: u64,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size: DEFAULT_MAX_FILE_SIZE_BYTES,
        }
    }

    /// Skip files larger than `bytes`
    #[must_use]
    pub const fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Files with a known language, in walk order
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true);
        builder.filter_entry(move |entry| !is_ignored_scope(&root, entry.path()));

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }

                    let path = entry.path();
                    if LanguageId::detect(path) == LanguageId::Unknown {
                        continue;
                    }

                    if is_noise_file(path) {
                        log::debug!("Skipping noisy artifact {}", path.display());
                        continue;
                    }

                    if let Ok(meta) = entry.metadata() {
                        if meta.len() > self.max_file_size {
                            log::debug!(
                                "Skipping large file {} ({} bytes > {})",
                                path.display(),
                                meta.len(),
                                self.max_file_size
                            );
                            continue;
                        }
                    }

                    files.push(path.to_path_buf());
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        log::info!("Found {} analyzable files under {}", files.len(), self.root.display());
        files
    }
}

/// True when any component of `path` below `root` names an ignored scope
pub(crate) fn is_ignored_scope(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            IGNORED_SCOPES
                .iter()
                .any(|ignored| name.eq_ignore_ascii_case(ignored))
        }
        _ => false,
    })
}

pub(crate) fn is_noise_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| {
            NOISE_FILE_NAMES
                .iter()
                .any(|candidate| name.eq_ignore_ascii_case(candidate))
        })
}

pub(crate) const IGNORED_SCOPES: &[&str] = &[
    // VCS / tooling
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".yarn",
    ".npm",
    // caches / builds
    ".cache",
    "node_modules",
    ".next",
    ".turbo",
    ".parcel-cache",
    ".nuxt",
    ".svelte-kit",
    "build",
    "dist",
    "coverage",
    "target",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "__pycache__",
    // vendored code
    "vendor",
    "third_party",
    "third-party",
];

/// Generated manifests that parse fine but carry no declarations worth caching
const NOISE_FILE_NAMES: &[&str] = &["package-lock.json", "pnpm-lock.yaml", "npm-shrinkwrap.json"];

const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 8 * 1024 * 1024;
