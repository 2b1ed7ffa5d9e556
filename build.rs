//! Stamps the git revision into the binary for `--version`.

use std::process::Command;

/// Trimmed stdout of a `git` invocation that succeeded.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    for watched in [".git/HEAD", ".git/refs/tags", ".git/packed-refs"] {
        println!("cargo:rerun-if-changed={watched}");
    }

    let revision = git(&["rev-parse", "--short=10", "HEAD"]).unwrap_or_default();
    let release = git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some();

    println!("cargo:rustc-env=PICTURE_PRESS_REVISION={revision}");
    println!("cargo:rustc-env=PICTURE_PRESS_RELEASE={release}");
}
