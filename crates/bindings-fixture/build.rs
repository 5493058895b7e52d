use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=native/bindings_demo.c");
    println!("cargo:rerun-if-changed=native/library.h");
    println!("cargo:rerun-if-env-changed=CC");

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .expect("OUT_DIR is set by cargo");
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    let (file_name, shared_flag) = match target_os.as_str() {
        "macos" | "ios" => ("libbindings_demo.dylib", "-dynamiclib"),
        "windows" => ("bindings_demo.dll", "-shared"),
        _ => ("libbindings_demo.so", "-shared"),
    };
    let library = out_dir.join(file_name);

    let cc = env::var("CC").unwrap_or_else(|_| "cc".into());
    let mut command = Command::new(&cc);
    command.arg(shared_flag);
    if target_os != "windows" {
        command.arg("-fPIC");
    }
    let status = command
        .arg("-O2")
        .arg("-o")
        .arg(library.display().to_string())
        .arg("native/bindings_demo.c")
        .status()
        .unwrap_or_else(|err| panic!("failed to run C compiler '{cc}': {err}"));
    if !status.success() {
        panic!("failed to compile native/bindings_demo.c (status: {status})");
    }

    println!("cargo:rustc-env=BINDINGS_FIXTURE_LIB={}", library.display());
}
