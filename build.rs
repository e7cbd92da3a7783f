//! Build script: version hash and toolkit checks for GPU whisper builds.
//!
//! whisper-rs-sys fails late and noisily when a toolkit is missing, so the
//! accelerated features are checked here first.

use std::process::Command;

fn main() {
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "cuda") {
        require_tool("nvcc", &["--version"], "CUDA toolkit (nvcc)");
    }
    if cfg!(feature = "vulkan") {
        require_tool("glslc", &["--version"], "Vulkan SDK (glslc)");
    }
    if cfg!(feature = "hipblas") {
        require_tool("hipcc", &["--version"], "ROCm (hipcc)");
    }
    if cfg!(feature = "openblas") {
        require_tool("pkg-config", &["--exists", "openblas"], "OpenBLAS development files");
    }
}

fn require_tool(program: &str, args: &[&str], what: &str) {
    let found = Command::new(program)
        .args(args)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !found {
        println!("cargo::warning={} not found; the whisper build will likely fail", what);
        println!("cargo::warning=Install it or build without the GPU feature");
    }
}
