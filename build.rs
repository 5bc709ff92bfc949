use std::{process::Command, time::SystemTime};

fn main() {
  let now = SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0);
  println!("cargo:rustc-env=BUILD_TIME={}", now);

  println!("cargo:rerun-if-changed=.git/HEAD");
  println!("cargo:rerun-if-changed=.git/index");

  let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(|| "unknown".into());
  let commit = git(&["rev-parse", "HEAD"]).unwrap_or_else(|| "unknown".into());
  let short = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
  let dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());

  println!("cargo:rustc-env=GIT_BRANCH={}", branch);
  println!("cargo:rustc-env=GIT_COMMIT={}", commit);
  println!("cargo:rustc-env=GIT_COMMIT_SHORT={}", short);
  println!("cargo:rustc-env=GIT_DIRTY={}", dirty);
}

/// Runs git and returns trimmed stdout, or `None` outside a work tree.
fn git(args: &[&str]) -> Option<String> {
  let output = Command::new("git").args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
