// build.rs
// Compiles the Vulkan scene program to SPIR-V. GL and DirectX sources are embedded at compile time.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const STAGES: [&str; 3] = ["vert", "frag", "geom"];

fn is_stale(source: &Path, output: &Path) -> bool {
    match (std::fs::metadata(source).and_then(|m| m.modified()), std::fs::metadata(output).and_then(|m| m.modified())) {
        (Ok(source), Ok(output)) => source > output,
        _ => true,
    }
}

fn main() {
    println!("cargo:rerun-if-changed=shaders/vulkan");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: SKIP_SHADERS set, Vulkan shaders not compiled");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        eprintln!("warning: VULKAN_SDK not set, Vulkan shaders not compiled");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        PathBuf::from(&vulkan_sdk).join("Bin").join("glslc.exe")
    } else {
        PathBuf::from(&vulkan_sdk).join("bin").join("glslc")
    };
    if !glslc.exists() {
        panic!("glslc not found at {}", glslc.display());
    }

    let source_dir = PathBuf::from("shaders/vulkan");
    let target_dir = PathBuf::from("../../target/shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: cannot create {}: {}", target_dir.display(), e);
        return;
    }

    let Ok(entries) = std::fs::read_dir(&source_dir) else {
        eprintln!("info: no shader directory at {}", source_dir.display());
        return;
    };

    let mut compiled = 0;
    for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else { continue };
        if !STAGES.contains(&extension) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        // scene.vert -> scene.vert.spv
        let output = target_dir.join(format!("{file_name}.spv"));
        if !is_stale(&path, &output) {
            continue;
        }

        let status = Command::new(&glslc).arg(&path).arg("-o").arg(&output).status();
        match status {
            Ok(status) if status.success() => compiled += 1,
            Ok(status) => panic!("glslc failed for {} ({})", path.display(), status),
            Err(e) => panic!("failed to run glslc for {}: {}", path.display(), e),
        }
    }
    eprintln!("info: compiled {compiled} Vulkan shader(s)");
}
