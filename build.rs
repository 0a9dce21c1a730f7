// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");

    // Packagers may pin the version
    let version = std::env::var("CAMERA_COMPOSITOR_VERSION").unwrap_or_else(|_| git_version());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `git describe` output without the `v` prefix, e.g. "0.1.0" or
/// "0.1.0-5-gabcdef1"; the short hash outside a tagged history
fn git_version() -> String {
    let described = Command::new("git")
        .args(["describe", "--tags", "--always", "--match", "v*"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string());

    match described {
        Some(version) => version
            .strip_prefix('v')
            .map(str::to_string)
            .unwrap_or(version),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}
