//! Test fixture: the `bindings_demo` native library.
//!
//! The build script compiles `native/bindings_demo.c` into a shared library
//! inside `OUT_DIR`. Nothing here links against it; consumers open it at
//! runtime through the boundary layer.

use std::path::Path;

/// Absolute path of the compiled shared library
pub fn library_path() -> &'static Path {
    Path::new(env!("BINDINGS_FIXTURE_LIB"))
}

/// The library's C header, as consumed by the interface parser
pub const HEADER: &str = include_str!("../native/library.h");

/// Functions declared in [`HEADER`]
pub const FUNCTIONS: &[&str] = &[
    "func_ret_int",
    "func_ret_double",
    "func_ret_str",
    "func_many_args",
    "arr_minus_one",
    "gen_arr",
    "fill_arr",
    "qsort_wrap",
    "comp",
    "upd_arr",
    "free_arr",
    "do_nothing_function",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_was_built() {
        assert!(library_path().is_absolute());
        assert!(library_path().exists());
    }

    #[test]
    fn test_header_declares_every_function() {
        for name in FUNCTIONS {
            assert!(HEADER.contains(&format!("{name}(")) || HEADER.contains(&format!("{name} (")));
        }
    }
}
