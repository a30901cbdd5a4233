//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use kiln::core::builder::{BuildRequest, Builder};
use kiln::core::global_config::GlobalConfig;
use kiln::core::resolver::DependencyProbe;
use kiln::infra::dirs::KilnDirs;
use kiln::infra::download::DownloadManager;
use kiln::infra::retry::RetryPolicy;

/// Temporary cache/config/data roots for one test
pub struct TestWorkspace {
    /// Temporary directory holding every kiln directory
    pub dir: TempDir,
}

impl TestWorkspace {
    /// Create a new workspace in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the workspace directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Directories rooted in the workspace
    pub fn dirs(&self) -> KilnDirs {
        KilnDirs::rooted(self.dir.path())
    }

    /// Create a file in the workspace
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Builder with fast retries and a fixed set of present dependencies
    pub fn builder(&self, present: &'static [&'static str]) -> Builder {
        Builder::new(&self.dirs(), &GlobalConfig::default())
            .with_toolchain(None)
            .with_probe(Box::new(Present(present)))
            .with_downloads(DownloadManager::with_policy(RetryPolicy::new(1, 1, 2), 10))
    }

    /// Keg directory of a release build
    pub fn keg(&self, name: &str, version: &str) -> PathBuf {
        self.dir.path().join("data/prefix/Cellar").join(name).join(version)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe reporting a fixed set of dependencies as installed
pub struct Present(pub &'static [&'static str]);

impl DependencyProbe for Present {
    fn is_present(&self, name: &str) -> bool {
        self.0.contains(&name)
    }
}

/// Build request for the given flags
pub fn request(flags: &[&str]) -> BuildRequest {
    BuildRequest {
        flags: flags.iter().map(|f| (*f).to_string()).collect(),
        ..BuildRequest::default()
    }
}

/// Gzipped tarball with every entry under `<top>/`
pub fn tarball(top: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{top}/{name}"), content.as_bytes())
            .expect("Failed to append tar entry");
    }
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .expect("Failed to finish tarball")
}

/// Hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Source tree of the demo package
///
/// `install.sh` installs a tool, a ctags binary and its man page, and records
/// the configure arguments and `MAKEFLAGS` it saw.
pub fn demo_sources() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "configure.sh",
            "#!/bin/sh\necho \"$@\" > configure.args\n",
        ),
        ("main.c", "int main(void)\n{ return 1; }\n/* end */\n"),
        (
            "install.sh",
            "#!/bin/sh\nset -e\nmkdir -p \"$PREFIX/bin\" \"$PREFIX/share/man/man1\" \"$PREFIX/share/doc/demo\"\n\
             cp main.c \"$PREFIX/share/doc/demo/main.c\"\n\
             cp configure.args \"$PREFIX/share/doc/demo/configure.args\"\n\
             echo \"$MAKEFLAGS\" > \"$PREFIX/share/doc/demo/makeflags\"\n\
             echo tool > \"$PREFIX/bin/demo\"\n\
             echo ctags > \"$PREFIX/bin/ctags\"\n\
             echo man > \"$PREFIX/share/man/man1/ctags.1.gz\"\n",
        ),
    ]
}

/// Demo recipe fetching from `urls` (first is primary, the rest mirrors)
pub fn demo_recipe(urls: &[String], checksum: &str) -> String {
    let mirrors: Vec<String> = urls[1..].iter().map(|u| format!("\"{u}\"")).collect();
    format!(
        r#"
[recipe]
name = "demo"
version = "1.0"
url = "{primary}"
mirrors = [{mirrors}]
checksum = "sha256:{checksum}"

[[option]]
name = "with-x"
description = "Include X11 support"

[[option]]
name = "keep-ctags"
description = "Don't remove ctags"

[[option]]
name = "serial"
description = "Build with one job"

[[dependency]]
name = "x11"
when = "with-x"

[[dependency]]
name = "gnutls"
kind = "optional"

[[patches.patch]]
strip = 1
inline = """
--- a/main.c
+++ b/main.c
@@ -1,3 +1,3 @@
 int main(void)
-{{ return 1; }}
+{{ return 0; }}
 /* end */
"""

[build]
configure = ["sh", "configure.sh"]
compile = ["true"]
install = ["sh", "install.sh"]
configure_args = ["--prefix={{prefix}}"]
parallel_unsafe = "serial"

[[build.args]]
when = "with-x"
args = ["--with-x"]
else = ["--without-x"]

[[install.remove]]
when = "!keep-ctags"
paths = ["bin/ctags", "share/man/man1/ctags.1.gz"]

[[caveat]]
text = "demo was installed to {{prefix}}"
"#,
        primary = urls[0],
        mirrors = mirrors.join(", "),
    )
}

/// Run the kiln binary with every directory inside `workspace`
pub fn run_kiln(workspace: &TestWorkspace, args: &[&str]) -> Output {
    let root = workspace.path();
    Command::new(env!("CARGO_BIN_EXE_kiln"))
        .current_dir(&root)
        .env("KILN_CACHE_DIR", root.join("cache"))
        .env("KILN_CONFIG_DIR", root.join("config"))
        .env("KILN_DATA_DIR", root.join("data"))
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("Failed to execute kiln")
}

/// Read a file relative to `dir`
pub fn read(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name)).expect("Failed to read file")
}

/// Log lines written by `tracing` on the current thread
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Start capturing; stops when the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Everything captured so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("log buffer poisoned")).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
