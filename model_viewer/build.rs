// build.rs
// Compiles the GLSL sources under resources/shaders to SPIR-V in target/shaders

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: &[&str] = &["vert", "frag", "comp"];

/// Compile every shader in `shader_dir` whose output is missing or stale
fn compile_shaders_recursive(shader_dir: &Path, target_dir: &Path, glslc: &Path, compiled: &mut u32) {
    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            compile_shaders_recursive(&path, target_dir, glslc, compiled);
            continue;
        }

        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        if !SHADER_EXTENSIONS.contains(&ext) {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        // mesh.vert -> mesh.vert.spv
        let mut out_name = file_name.to_os_string();
        out_name.push(".spv");
        let out_file = target_dir.join(out_name);

        if is_up_to_date(&path, &out_file) {
            eprintln!("info: Shader {:?} is up to date", file_name);
            continue;
        }

        let status = Command::new(glslc)
            .arg("-I")
            .arg(shader_dir)
            .arg("--target-env=vulkan1.3")
            .arg(&path)
            .arg("-o")
            .arg(&out_file)
            .status();

        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {:?} -> {:?}", file_name, out_file);
                *compiled += 1;
            }
            Ok(s) => panic!("glslc failed for {:?} with exit code {}", path, s.code().unwrap_or(-1)),
            Err(e) => panic!("Failed to run glslc for {:?}: {}", path, e),
        }
    }
}

fn is_up_to_date(source: &Path, output: &Path) -> bool {
    let modified = |path: &Path| std::fs::metadata(path).and_then(|meta| meta.modified()).ok();
    matches!((modified(source), modified(output)), (Some(src), Some(dst)) if dst >= src)
}

/// glslc from the Vulkan SDK, or whatever is on PATH
fn find_glslc() -> PathBuf {
    match env::var("VULKAN_SDK") {
        Ok(sdk) if cfg!(target_os = "windows") => Path::new(&sdk).join("Bin").join("glslc.exe"),
        Ok(sdk) => Path::new(&sdk).join("bin").join("glslc"),
        Err(_) => PathBuf::from("glslc"),
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
    let workspace_root = manifest_dir.parent().unwrap_or(&manifest_dir).to_path_buf();
    let shader_dir = workspace_root.join("resources").join("shaders");
    let target_dir = workspace_root.join("target").join("shaders");

    println!("cargo:rerun-if-changed={}", shader_dir.display());
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let glslc = find_glslc();
    if Command::new(&glslc).arg("--version").output().is_err() {
        println!("cargo:warning=glslc not found; shaders were not compiled");
        eprintln!("hint: Install the Vulkan SDK and set VULKAN_SDK");
        return;
    }

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=Failed to create {}: {}", target_dir.display(), e);
        return;
    }

    let mut compiled = 0;
    compile_shaders_recursive(&shader_dir, &target_dir, &glslc, &mut compiled);
    if compiled > 0 {
        eprintln!("info: Successfully compiled {} shader(s)", compiled);
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
