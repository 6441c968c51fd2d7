#![allow(dead_code)]

//! Throwaway shell scripts standing in for the generator binary.

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("writing script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).expect("script metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("making script executable");
    }
    path
}

/// A generator that writes `name` into `output_dir` in two chunks and exits.
pub fn card_writer(dir: &Path, output_dir: &Path, name: &str) -> PathBuf {
    let target = output_dir.join(name);
    write_script(
        dir,
        "generator.sh",
        &format!(
            "printf 'PNG-part-1' > '{t}'\nsleep 0.1\nprintf 'PNG-part-2' >> '{t}'\nexit 0",
            t = target.display()
        ),
    )
}
