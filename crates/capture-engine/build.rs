//! Build script for the capture engine
//!
//! With the `ffi` feature enabled, links the C shim that wraps the vendor
//! capture SDK. Point `BMD_SHIM_LIB_DIR` at the directory holding it.

fn main() {
    println!("cargo:rerun-if-env-changed=BMD_SHIM_LIB_DIR");

    if std::env::var_os("CARGO_FEATURE_FFI").is_none() {
        return;
    }

    if let Some(dir) = std::env::var_os("BMD_SHIM_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir.to_string_lossy());
    }
    println!("cargo:rustc-link-lib=dylib=bmd_shim");

    // The vendor SDK hands out CoreFoundation strings on macOS
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        println!("cargo:rustc-link-lib=framework=CoreFoundation");
    }
}
