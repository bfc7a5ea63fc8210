//! Bundled single-page UI delivery.
//!
//! # Responsibility
//! - Serve the UI compiled into the binary, or files from one
//!   extension-local assets directory.
//! - Fall back to the UI entry document for anything it will not serve, so
//!   client-side routes of the bundled UI keep working.
//!
//! # Invariants
//! - Names are checked lexically before any lookup.
//! - Canonical resolved paths must stay under the canonical assets directory.
//! - Only regular files are streamed.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Component, Path, PathBuf};

/// File name of the UI entry document.
pub const ENTRY_DOCUMENT: &str = "index.html";

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("html", HTML_CONTENT_TYPE),
    ("htm", HTML_CONTENT_TYPE),
    ("js", "text/javascript; charset=utf-8"),
    ("mjs", "text/javascript; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("txt", "text/plain; charset=utf-8"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("wasm", "application/wasm"),
];

/// Returns the content type for `path` based on its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
        return FALLBACK_CONTENT_TYPE;
    };
    let extension = extension.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == extension)
        .map(|(_, content_type)| *content_type)
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

const EMBEDDED_ENTRY_DOCUMENT: &[u8] = include_bytes!("../ui/index.html");

// Keys are `/`-joined names relative to `ui/assets`.
const EMBEDDED_ASSETS: &[(&str, &[u8])] = &[
    ("app.css", include_bytes!("../ui/assets/app.css")),
    ("app.js", include_bytes!("../ui/assets/app.js")),
];

/// One served file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    /// `true` when the entry document was served in place of the request.
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AssetSource {
    Embedded,
    Directory { ui_dir: PathBuf, assets_dir: PathBuf },
}

/// Serves the UI: `assets/*` files with `index.html` as fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetServer {
    source: AssetSource,
}

impl AssetServer {
    /// Serves `<ui_dir>/index.html` and static files from `<ui_dir>/assets`.
    pub fn new(ui_dir: impl Into<PathBuf>) -> Self {
        let ui_dir = ui_dir.into();
        let assets_dir = ui_dir.join("assets");
        Self {
            source: AssetSource::Directory { ui_dir, assets_dir },
        }
    }

    /// UI compiled into the binary from this crate's `ui/` directory.
    pub fn bundled() -> Self {
        Self {
            source: AssetSource::Embedded,
        }
    }

    /// On-disk UI directory; `None` for the bundled UI.
    pub fn ui_dir(&self) -> Option<&Path> {
        match &self.source {
            AssetSource::Embedded => None,
            AssetSource::Directory { ui_dir, .. } => Some(ui_dir),
        }
    }

    pub fn assets_dir(&self) -> Option<&Path> {
        match &self.source {
            AssetSource::Embedded => None,
            AssetSource::Directory { assets_dir, .. } => Some(assets_dir),
        }
    }

    /// Reads the UI entry document.
    pub fn entry_document(&self) -> Result<AssetResponse, AssetError> {
        let ui_dir = match &self.source {
            AssetSource::Embedded => {
                return Ok(AssetResponse {
                    content_type: HTML_CONTENT_TYPE,
                    bytes: EMBEDDED_ENTRY_DOCUMENT.to_vec(),
                    fallback: false,
                })
            }
            AssetSource::Directory { ui_dir, .. } => ui_dir,
        };
        let path = ui_dir.join(ENTRY_DOCUMENT);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(AssetResponse {
                content_type: HTML_CONTENT_TYPE,
                bytes,
                fallback: false,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AssetError::EntryDocumentMissing(path))
            }
            Err(source) => Err(AssetError::Unreadable { path, source }),
        }
    }

    /// Serves `file_name` from the assets directory or falls back to the
    /// entry document.
    pub fn serve(&self, file_name: &str) -> Result<AssetResponse, AssetError> {
        if let Some(response) = self.lookup(file_name) {
            return Ok(response);
        }

        let mut entry = self.entry_document()?;
        entry.fallback = true;
        Ok(entry)
    }

    fn lookup(&self, file_name: &str) -> Option<AssetResponse> {
        if let AssetSource::Embedded = self.source {
            let key = embedded_key(&sanitize_relative(file_name)?);
            return EMBEDDED_ASSETS
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(name, bytes)| AssetResponse {
                    content_type: content_type_for(Path::new(name)),
                    bytes: bytes.to_vec(),
                    fallback: false,
                });
        }

        let path = self.resolve(file_name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Some(AssetResponse {
                content_type: content_type_for(&path),
                bytes,
                fallback: false,
            }),
            Err(err) => {
                log::warn!(
                    "event=asset_read module=assets status=error path={} error={}",
                    path.display(),
                    err
                );
                None
            }
        }
    }

    /// Maps `file_name` to an existing regular file inside the assets
    /// directory, or `None`. Always `None` for the bundled UI.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        let assets_dir = self.assets_dir()?;
        let relative = sanitize_relative(file_name)?;
        let root = assets_dir.canonicalize().ok()?;
        let candidate = root.join(relative).canonicalize().ok()?;
        if !candidate.starts_with(&root) {
            return None;
        }
        let metadata = std::fs::metadata(&candidate).ok()?;
        metadata.is_file().then_some(candidate)
    }
}

fn embedded_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| component.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexically validates a requested asset name.
///
/// Rejects empty names, NUL bytes, backslashes, drive letters, absolute
/// paths and any `..` segment.
pub fn sanitize_relative(file_name: &str) -> Option<PathBuf> {
    if file_name.is_empty() || file_name.contains('\0') || file_name.contains('\\') {
        return None;
    }
    if file_name.len() >= 2 && file_name.as_bytes()[1] == b':' {
        return None;
    }
    if file_name.starts_with('/') {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(file_name).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(relative)
}

/// Asset delivery errors.
#[derive(Debug)]
pub enum AssetError {
    EntryDocumentMissing(PathBuf),
    Unreadable { path: PathBuf, source: std::io::Error },
}

impl Display for AssetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EntryDocumentMissing(path) => {
                write!(f, "UI entry document missing: {}", path.display())
            }
            Self::Unreadable { path, source } => {
                write!(f, "UI file unreadable `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for AssetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unreadable { source, .. } => Some(source),
            Self::EntryDocumentMissing(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{content_type_for, sanitize_relative, AssetError, AssetServer};
    use std::fs;
    use std::path::{Path, PathBuf};

    fn ui_fixture() -> (tempfile::TempDir, AssetServer) {
        let root = tempfile::tempdir().expect("temp dir");
        let ui_dir = root.path().join("ui");
        fs::create_dir_all(ui_dir.join("assets/js")).expect("assets dir");
        fs::write(ui_dir.join("index.html"), "<html>entry</html>").expect("entry");
        fs::write(ui_dir.join("assets/app.css"), "body{}").expect("css");
        fs::write(ui_dir.join("assets/js/app.js"), "run()").expect("js");
        fs::write(root.path().join("secret.txt"), "secret").expect("secret");
        (root, AssetServer::new(ui_dir))
    }

    #[test]
    fn sanitize_rejects_traversal_and_absolute_names() {
        for name in [
            "",
            "../secret.txt",
            "js/../../secret.txt",
            "/etc/passwd",
            "C:/windows",
            "..\\secret.txt",
            "a\0b",
            ".",
        ] {
            assert!(sanitize_relative(name).is_none(), "{name:?} must be rejected");
        }
        assert_eq!(
            sanitize_relative("./js/app.js"),
            Some(PathBuf::from("js/app.js"))
        );
    }

    #[test]
    fn serves_nested_assets_with_content_type() {
        let (_root, server) = ui_fixture();
        let response = server.serve("js/app.js").expect("asset");
        assert_eq!(response.bytes, b"run()");
        assert_eq!(response.content_type, "text/javascript; charset=utf-8");
        assert!(!response.fallback);
    }

    #[test]
    fn unknown_and_escaping_names_fall_back_to_entry_document() {
        let (_root, server) = ui_fixture();
        for name in ["missing.js", "../../secret.txt", "../index.html", "/etc/passwd", "js"] {
            let response = server.serve(name).expect("fallback");
            assert!(response.fallback, "{name} must fall back");
            assert_eq!(response.bytes, b"<html>entry</html>");
            assert_eq!(response.content_type, "text/html; charset=utf-8");
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_assets_dir_falls_back() {
        let (root, server) = ui_fixture();
        std::os::unix::fs::symlink(
            root.path().join("secret.txt"),
            server.assets_dir().expect("directory source").join("linked.txt"),
        )
        .expect("symlink");
        let response = server.serve("linked.txt").expect("fallback");
        assert!(response.fallback);
    }

    #[test]
    fn missing_entry_document_is_an_error() {
        let root = tempfile::tempdir().expect("temp dir");
        let server = AssetServer::new(root.path());
        let err = server.serve("nothing.css").expect_err("no entry document");
        assert!(matches!(err, AssetError::EntryDocumentMissing(_)));
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(Path::new("a.CSS")), "text/css; charset=utf-8");
        assert_eq!(content_type_for(Path::new("a.bin")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn bundled_ui_is_compiled_in() {
        let server = AssetServer::bundled();
        assert_eq!(server.ui_dir(), None);
        let response = server.entry_document().expect("bundled entry");
        assert!(String::from_utf8_lossy(&response.bytes).contains("<html"));

        let response = server.serve("./app.js").expect("bundled script");
        assert!(!response.fallback);
        assert_eq!(response.content_type, "text/javascript; charset=utf-8");
        assert!(String::from_utf8_lossy(&response.bytes).contains("fetch("));
        assert_eq!(server.resolve("app.js"), None);
    }

    #[test]
    fn bundled_ui_falls_back_for_unknown_and_escaping_names() {
        let server = AssetServer::bundled();
        for name in ["missing.js", "../index.html", "../../Cargo.toml", "/app.js", ""] {
            let response = server.serve(name).expect("fallback");
            assert!(response.fallback, "{name:?} must fall back");
            assert!(String::from_utf8_lossy(&response.bytes).contains("<html"));
        }
    }
}
