use std::env;
use std::path::PathBuf;

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    println!("cargo:rerun-if-env-changed=LLAMA_PREBUILT_DIR");
    println!("cargo:rerun-if-env-changed=LLAMA_CPP_DIR");

    // Source tree: `LLAMA_CPP_DIR`, or `third_party/llama.cpp` at the
    // repository root.
    let llama_cpp_dir = env::var("LLAMA_CPP_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest_dir.join("../../third_party/llama.cpp"));

    // Two build modes:
    //
    // * `LLAMA_PREBUILT_DIR` points at an install prefix holding `lib/`
    //   (or `lib64/`) with the static archives and `include/`. Used for
    //   Android / cross builds where the NDK toolchain compiled llama.cpp
    //   in an earlier step.
    // * Otherwise llama.cpp is configured with CMake as a CPU-only static
    //   library.
    let (lib_dir, include_dir) = if let Ok(prebuilt) = env::var("LLAMA_PREBUILT_DIR") {
        let prebuilt = PathBuf::from(&prebuilt);
        assert!(
            prebuilt.exists(),
            "LLAMA_PREBUILT_DIR={} does not exist",
            prebuilt.display()
        );
        (lib_subdir(&prebuilt), prebuilt.join("include"))
    } else {
        assert!(
            llama_cpp_dir.join("CMakeLists.txt").exists(),
            "llama.cpp source not found at {}. Set LLAMA_CPP_DIR or LLAMA_PREBUILT_DIR.",
            llama_cpp_dir.display()
        );

        let dst = cmake::Config::new(&llama_cpp_dir)
            .define("BUILD_SHARED_LIBS", "OFF")
            .define("LLAMA_BUILD_SERVER", "OFF")
            .define("LLAMA_BUILD_TESTS", "OFF")
            .define("LLAMA_BUILD_EXAMPLES", "OFF")
            .define("LLAMA_BUILD_TOOLS", "OFF")
            .define("LLAMA_BUILD_COMMON", "OFF")
            .define("LLAMA_CURL", "OFF")
            .define("GGML_METAL", "OFF")
            .define("GGML_CUDA", "OFF")
            .define("GGML_VULKAN", "OFF")
            .define("GGML_OPENMP", if target_os == "android" { "OFF" } else { "ON" })
            .build();

        (lib_subdir(&dst), dst.join("include"))
    };

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=static=llama");
    for name in ["ggml", "ggml-base", "ggml-cpu"] {
        if lib_dir.join(format!("lib{name}.a")).exists() {
            println!("cargo:rustc-link-lib=static={name}");
        }
    }

    match target_os.as_str() {
        "android" => {
            println!("cargo:rustc-link-lib=c++_shared");
            println!("cargo:rustc-link-lib=log");
        }
        "linux" => {
            println!("cargo:rustc-link-lib=stdc++");
            println!("cargo:rustc-link-lib=m");
            println!("cargo:rustc-link-lib=pthread");
            println!("cargo:rustc-link-lib=gomp");
        }
        "macos" | "ios" => {
            println!("cargo:rustc-link-lib=framework=Accelerate");
            println!("cargo:rustc-link-lib=c++");
        }
        "windows" => {
            println!("cargo:rustc-link-lib=msvcrt");
        }
        _ => {}
    }

    let mut builder = bindgen::Builder::default()
        .header("wrapper.h")
        .clang_arg(format!("-I{}", include_dir.display()));
    let ggml_include = llama_cpp_dir.join("ggml/include");
    if ggml_include.exists() {
        builder = builder.clang_arg(format!("-I{}", ggml_include.display()));
    }

    let bindings = builder
        .allowlist_function("llama_.*")
        .allowlist_type("llama_.*")
        .allowlist_type("ggml_log_level")
        .allowlist_var("LLAMA_.*")
        .derive_default(true)
        .size_t_is_usize(true)
        .generate()
        .expect("Failed to generate bindings");

    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    bindings
        .write_to_file(out.join("bindings.rs"))
        .expect("Failed to write bindings");

    println!("cargo:rerun-if-changed=wrapper.h");
}

fn lib_subdir(prefix: &std::path::Path) -> PathBuf {
    if prefix.join("lib64").exists() {
        prefix.join("lib64")
    } else {
        prefix.join("lib")
    }
}
