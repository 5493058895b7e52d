//! Dynamic library loading for FFI
//!
//! Provides cross-platform dynamic library loading using `libloading`.
//! Handles platform-specific library naming conventions and search paths,
//! and keeps one [`NativeHandle`] per resolved path for the whole process.

use crate::error::{FfiError, FfiResult};
use crate::ffi::events::{BoundaryEvent, EventLogger, NullEventLogger};
use crate::options::BoundaryOptions;
use bindings_config::{ReleasePolicy, TextEncoding};
use libloading::Library;
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard};

type Registry = HashMap<PathBuf, Arc<NativeHandle>>;

/// Open handles keyed by resolved path
fn registry() -> MutexGuard<'static, Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Registry key for a file found on disk; symlinks and `..` resolved
fn canonical(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

/// Read guard held for the duration of every native access through a handle
pub(crate) type HandleGuard<'a> = RwLockReadGuard<'a, Option<Library>>;

/// Loaded native library, shared process-wide
///
/// Every binding, global and buffer derived from a handle checks it is
/// still open before touching native code. [`close`](NativeHandle::close)
/// waits for in-flight calls to finish before unmapping the library.
pub struct NativeHandle {
    path: PathBuf,
    library: RwLock<Option<Library>>,
    encoding: TextEncoding,
    release_policy: ReleasePolicy,
    logger: Arc<dyn EventLogger>,
}

impl NativeHandle {
    /// Open a library with default options
    pub fn open(name: &str) -> FfiResult<Arc<NativeHandle>> {
        LibraryLoader::new().open(name)
    }

    /// Resolved path (or soname handed to the system loader)
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.library
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Default text encoding for bindings made from this handle
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Default double-release policy for buffers acquired through this handle
    pub fn release_policy(&self) -> ReleasePolicy {
        self.release_policy
    }

    pub fn logger(&self) -> &Arc<dyn EventLogger> {
        &self.logger
    }

    /// Hold the library mapped; `UseAfterRelease` once closed
    pub(crate) fn enter(&self) -> FfiResult<HandleGuard<'_>> {
        let guard = self.library.read().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            return Err(FfiError::UseAfterRelease(self.path.clone()));
        }
        Ok(guard)
    }

    /// Address of an exported symbol
    pub fn resolve(&self, symbol: &str) -> FfiResult<*mut c_void> {
        let guard = self.enter()?;
        let library = guard
            .as_ref()
            .ok_or_else(|| FfiError::UseAfterRelease(self.path.clone()))?;

        // Safety: the symbol is only read as an address here
        let address = unsafe { library.get::<*mut c_void>(symbol.as_bytes()) }
            .map(|sym| *sym)
            .map_err(|_| FfiError::SymbolNotFound {
                library: self.path.clone(),
                symbol: symbol.to_string(),
            })?;

        if address.is_null() {
            return Err(FfiError::SymbolNotFound {
                library: self.path.clone(),
                symbol: symbol.to_string(),
            });
        }
        Ok(address)
    }

    /// Release the library; later calls are no-ops
    ///
    /// A failed unload is logged as `CloseFailed`; the handle counts as
    /// closed either way. Bindings derived from this handle fail with `UseAfterRelease`
    /// afterwards. A later `open` of the same path loads it afresh.
    pub fn close(&self) {
        let library = self
            .library
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(library) = library {
            let mut registry = registry();
            let registered = registry
                .get(&self.path)
                .map_or(false, |h| std::ptr::eq(Arc::as_ptr(h), self));
            if registered {
                registry.remove(&self.path);
            }
            drop(registry);

            match library.close() {
                Ok(()) => self.logger.log(BoundaryEvent::LibraryClosed {
                    path: self.path.clone(),
                }),
                Err(e) => self.logger.log(BoundaryEvent::CloseFailed {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }),
            }
        }
    }
}

impl std::fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHandle")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Dynamic library loader with platform-specific path resolution
///
/// # Safety
///
/// Loading dynamic libraries is inherently unsafe. The loaded code runs in the
/// same process and can perform arbitrary operations.
pub struct LibraryLoader {
    /// Library search paths, highest priority first
    search_paths: Vec<PathBuf>,
    /// Library named by configuration
    default_library: Option<String>,
    encoding: TextEncoding,
    release_policy: ReleasePolicy,
    logger: Arc<dyn EventLogger>,
}

impl LibraryLoader {
    /// Create a new library loader with default search paths
    pub fn new() -> Self {
        Self {
            search_paths: Self::default_search_paths(),
            default_library: None,
            encoding: TextEncoding::default(),
            release_policy: ReleasePolicy::default(),
            logger: Arc::new(NullEventLogger),
        }
    }

    /// Loader configured from runtime options; configured search paths
    /// come before the defaults
    pub fn from_options(options: &BoundaryOptions) -> Self {
        let mut search_paths = options.search_paths.clone();
        search_paths.extend(Self::default_search_paths());

        Self {
            search_paths,
            default_library: options.library.clone(),
            encoding: options.encoding,
            release_policy: options.release_policy,
            logger: Arc::clone(&options.logger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Get platform-specific default library search paths
    ///
    /// Returns the current working directory followed by the standard
    /// system library paths for the current platform:
    /// - Linux: /usr/lib, /usr/local/lib, /lib (and lib64 variants)
    /// - macOS: /usr/lib, /usr/local/lib, /opt/homebrew/lib
    /// - Windows: C:\Windows\System32
    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));

            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            paths.push(PathBuf::from("C:\\Windows\\System32"));
            if let Ok(system_root) = std::env::var("SystemRoot") {
                paths.push(PathBuf::from(format!("{}\\System32", system_root)));
            }
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.insert(0, cwd);
        }

        paths
    }

    /// Resolve a library name to a file on disk
    ///
    /// - Paths (absolute or containing a separator) are used as is
    /// - Names are tried verbatim, then as lib{name}.so / lib{name}.dylib /
    ///   {name}.dll in each search path
    fn resolve_library_path(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() || path.components().count() > 1 {
            return path.exists().then(|| canonical(path.to_path_buf()));
        }

        let extensions: &[&str] = if cfg!(target_os = "windows") {
            &["dll"]
        } else if cfg!(target_os = "macos") {
            &["dylib", "so"]
        } else {
            &["so"]
        };

        let prefixes: &[&str] = if cfg!(target_os = "windows") {
            &["", "lib"]
        } else {
            &["lib", ""]
        };

        for search_path in &self.search_paths {
            let verbatim = search_path.join(name);
            if verbatim.is_file() {
                return Some(canonical(verbatim));
            }

            for prefix in prefixes {
                for ext in extensions {
                    let full_path = search_path.join(format!("{}{}.{}", prefix, name, ext));
                    if full_path.is_file() {
                        return Some(canonical(full_path));
                    }
                }
            }
        }

        None
    }

    /// Open a library by name or path
    ///
    /// Returns the registered handle when the same resolved path is already
    /// open. Names that are not found on disk (sonames such as `libc.so.6`)
    /// are handed to the system loader unchanged.
    pub fn open(&self, name: &str) -> FfiResult<Arc<NativeHandle>> {
        let path = self
            .resolve_library_path(name)
            .unwrap_or_else(|| PathBuf::from(name));

        let mut registry = registry();
        if let Some(existing) = registry.get(&path) {
            if existing.is_open() {
                self.logger
                    .log(BoundaryEvent::LibraryReused { path: path.clone() });
                return Ok(Arc::clone(existing));
            }
        }

        // Safety: running a library's initializers is the caller's trust decision
        let library = unsafe { Library::new(&path) }.map_err(|e| FfiError::LoadError {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let handle = Arc::new(NativeHandle {
            path: path.clone(),
            library: RwLock::new(Some(library)),
            encoding: self.encoding,
            release_policy: self.release_policy,
            logger: Arc::clone(&self.logger),
        });
        registry.insert(path.clone(), Arc::clone(&handle));
        drop(registry);

        self.logger.log(BoundaryEvent::LibraryLoaded { path });
        Ok(handle)
    }

    /// Open the library named by configuration
    pub fn open_configured(&self) -> FfiResult<Arc<NativeHandle>> {
        match &self.default_library {
            Some(name) => self.open(name),
            None => Err(FfiError::LoadError {
                name: String::new(),
                reason: "no library configured".to_string(),
            }),
        }
    }

    /// Open the system C library
    pub fn open_c_runtime(&self) -> FfiResult<Arc<NativeHandle>> {
        let name = if cfg!(target_os = "windows") {
            "msvcrt.dll"
        } else if cfg!(target_os = "macos") {
            "/usr/lib/libSystem.B.dylib"
        } else {
            "libc.so.6"
        };
        self.open(name)
    }

    /// Add a custom search path (prepended to search list)
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::events::MemoryEventLogger;

    #[test]
    fn test_default_search_paths_not_empty() {
        let paths = LibraryLoader::default_search_paths();
        assert!(!paths.is_empty());

        // Current directory should be first
        if let Ok(cwd) = std::env::current_dir() {
            assert_eq!(paths[0], cwd);
        }
    }

    #[test]
    fn test_platform_specific_paths() {
        let paths = LibraryLoader::default_search_paths();

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            assert!(paths.iter().any(|p| p == Path::new("/usr/lib")));
        }
        #[cfg(target_os = "windows")]
        {
            assert!(paths
                .iter()
                .any(|p| p.to_string_lossy().contains("System32")));
        }
    }

    #[test]
    fn test_library_not_found() {
        let result = LibraryLoader::new().open("nonexistent_library_xyz");
        assert!(matches!(result, Err(FfiError::LoadError { .. })));
    }

    #[test]
    fn test_add_custom_search_path() {
        let mut loader = LibraryLoader::new();
        let custom_path = PathBuf::from("/custom/path");
        loader.add_search_path(custom_path.clone());

        assert_eq!(loader.search_paths()[0], custom_path);
    }

    #[test]
    fn test_configured_paths_come_first() {
        let options = BoundaryOptions {
            search_paths: vec![PathBuf::from("/opt/bindings")],
            ..BoundaryOptions::default()
        };
        let loader = LibraryLoader::from_options(&options);
        assert_eq!(loader.search_paths()[0], PathBuf::from("/opt/bindings"));
    }

    #[test]
    fn test_open_configured_without_library() {
        let result = LibraryLoader::new().open_configured();
        assert!(matches!(result, Err(FfiError::LoadError { .. })));
    }

    #[test]
    fn test_resolve_bare_name_in_search_path() {
        let fixture = bindings_fixture::library_path();
        let mut loader = LibraryLoader::new();
        loader.add_search_path(fixture.parent().unwrap().to_path_buf());

        let resolved = loader.resolve_library_path("bindings_demo").unwrap();
        assert_eq!(resolved.file_name(), fixture.file_name());
    }

    #[test]
    fn test_open_reuses_registered_handle() {
        let logger = Arc::new(MemoryEventLogger::new());
        let loader = LibraryLoader::new().with_logger(logger.clone());
        let path = bindings_fixture::library_path().to_str().unwrap();

        let first = loader.open(path).unwrap();
        let second = loader.open(path).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(logger
            .events()
            .iter()
            .any(|e| matches!(e, BoundaryEvent::LibraryReused { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_search_path_hit_shares_handle_with_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let fixture = bindings_fixture::library_path();
        let copy = real.join(fixture.file_name().unwrap());
        std::fs::copy(fixture, &copy).unwrap();

        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let mut loader = LibraryLoader::new();
        loader.add_search_path(link);
        let by_name = loader.open("bindings_demo").unwrap();
        let by_path = loader.open(copy.to_str().unwrap()).unwrap();

        assert!(Arc::ptr_eq(&by_name, &by_path));
        assert_eq!(by_name.path(), std::fs::canonicalize(&copy).unwrap());
        by_name.close();
    }

    #[test]
    fn test_resolve_missing_symbol() {
        let handle = NativeHandle::open(bindings_fixture::library_path().to_str().unwrap()).unwrap();
        let result = handle.resolve("no_such_symbol");
        assert!(matches!(result, Err(FfiError::SymbolNotFound { .. })));
    }
}
