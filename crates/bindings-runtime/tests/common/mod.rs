//! Shared helpers for boundary tests against the fixture library

#![allow(dead_code)]

use bindings_runtime::ffi::{EventLogger, LibraryLoader, NativeHandle, NativeSurface};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

// Re-export testing utilities
pub use pretty_assertions::assert_eq;

/// Path of the fixture library as a string
pub fn fixture_path() -> &'static str {
    bindings_fixture::library_path()
        .to_str()
        .expect("fixture path is UTF-8")
}

/// Shared handle to the fixture library
///
/// Never close this one: every test in the binary shares it.
pub fn fixture_handle() -> Arc<NativeHandle> {
    NativeHandle::open(fixture_path()).expect("fixture library loads")
}

pub fn fixture_surface() -> NativeSurface {
    NativeSurface::open(fixture_handle()).expect("fixture surface binds")
}

/// Fixture library copied to a private path
///
/// The copy gets its own registry entry, so tests may close it or give it
/// their own logger without affecting other tests.
pub struct PrivateLibrary {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl PrivateLibrary {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let source = bindings_fixture::library_path();
        let path = dir.path().join(source.file_name().expect("library file name"));
        std::fs::copy(source, &path).expect("copy fixture library");
        Self { dir, path }
    }

    pub fn path_str(&self) -> &str {
        self.path.to_str().expect("temp path is UTF-8")
    }

    pub fn open(&self) -> Arc<NativeHandle> {
        NativeHandle::open(self.path_str()).expect("private library loads")
    }

    pub fn open_with_logger(&self, logger: Arc<dyn EventLogger>) -> Arc<NativeHandle> {
        LibraryLoader::new()
            .with_logger(logger)
            .open(self.path_str())
            .expect("private library loads")
    }
}
