fn main() {
    // screencapturekit links against the Swift runtime
    #[cfg(target_os = "macos")]
    {
        let sdk_path = xcrun(&["--show-sdk-path"]);
        let swiftc_path = xcrun(&["--find", "swiftc"]);

        if let Some(toolchain_path) = std::path::Path::new(&swiftc_path)
            .parent()
            .and_then(|p| p.parent())
        {
            let swift_lib_path = toolchain_path.join("lib/swift/macosx");
            println!("cargo:rustc-link-search=native={}", swift_lib_path.display());
        }
        if !sdk_path.is_empty() {
            println!("cargo:rustc-link-search=native={}/usr/lib/swift", sdk_path);
        }
        println!("cargo:rustc-link-lib=dylib=swiftCore");
    }
}

#[cfg(target_os = "macos")]
fn xcrun(args: &[&str]) -> String {
    match std::process::Command::new("xcrun").args(args).output() {
        Ok(output) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        Err(e) => {
            println!("cargo:warning=xcrun {:?} failed: {}", args, e);
            String::new()
        }
    }
}
