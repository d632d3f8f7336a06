//! Build script embedding version metadata.

use std::process::Command;

fn main() {
    // Prefer CONVERGE_VERSION if set (release builds), otherwise git describe.
    if let Ok(version) = std::env::var("CONVERGE_VERSION") {
        println!("cargo:rustc-env=CONVERGE_VERSION={version}");
    } else if let Ok(output) = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        && output.status.success()
    {
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=CONVERGE_VERSION={version}");
    }

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-env-changed=CONVERGE_VERSION");
}
