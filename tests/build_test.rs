//! Integration tests for the build pipeline
//!
//! Drives [`Builder`] end to end against a mock HTTP server and a small
//! shell-script package:
//! - Mirror fallback and archive cache reuse
//! - Failed steps keep the scratch tree and the previous keg
//! - Checksum mismatch stops before anything is extracted or patched
//! - Patches are all-or-nothing
//! - Option-dependent configure arguments, dependencies and job counts
//! - Install-tree finalization and receipts

#![cfg(unix)]

mod common;

use std::path::{Path, PathBuf};

use common::{demo_recipe, demo_sources, read, request, sha256_hex, tarball, LogCapture, TestWorkspace};
use kiln::core::builder::BuildRequest;
use kiln::core::recipe::Recipe;
use kiln::error::{ErrorKind, Stage};
use walkdir::WalkDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARCHIVE: &str = "/demo-1.0.tar.gz";

async fn serve(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

fn demo_archive() -> Vec<u8> {
    tarball("demo-1.0", &demo_sources())
}

fn recipe(urls: &[String], data: &[u8]) -> Recipe {
    Recipe::from_toml(&demo_recipe(urls, &sha256_hex(data))).unwrap()
}

/// Every extracted copy of `name` under the scratch root
fn scratch_files(ws: &TestWorkspace, name: &str) -> Vec<PathBuf> {
    WalkDir::new(ws.path().join("cache/build"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_name() == name)
        .map(|e| e.path().to_path_buf())
        .collect()
}

// ============================================
// Fetch
// ============================================

#[tokio::test]
async fn test_mirror_fallback_is_counted_once() {
    let server = MockServer::start().await;
    let data = demo_archive();
    Mock::given(method("GET"))
        .and(path("/missing/demo-1.0.tar.gz"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    serve(&server, ARCHIVE, data.clone()).await;

    let ws = TestWorkspace::new();
    let urls = vec![
        format!("{}/missing/demo-1.0.tar.gz", server.uri()),
        format!("{}{ARCHIVE}", server.uri()),
    ];
    let report = ws.builder(&[]).build(&recipe(&urls, &data), &request(&[])).await.unwrap();

    assert_eq!(report.fetch.mirror_fallbacks, 1);
    assert_eq!(report.fetch.url.as_deref(), Some(urls[1].as_str()));
    assert!(!report.fetch.cached);
}

#[tokio::test]
async fn test_unreachable_primary_falls_back_with_one_warning() {
    let server = MockServer::start().await;
    let data = demo_archive();
    serve(&server, ARCHIVE, data.clone()).await;

    let ws = TestWorkspace::new();
    let urls = vec![
        "http://127.0.0.1:1/demo-1.0.tar.gz".to_string(),
        format!("{}{ARCHIVE}", server.uri()),
    ];
    let logs = LogCapture::default();
    let guard = logs.install();
    let report = ws.builder(&[]).build(&recipe(&urls, &data), &request(&[])).await.unwrap();
    drop(guard);

    assert_eq!(report.fetch.mirror_fallbacks, 1);
    assert_eq!(report.fetch.url.as_deref(), Some(urls[1].as_str()));
    let text = logs.contents();
    assert_eq!(text.matches("Falling back to mirror").count(), 1, "logs: {text}");
    assert!(text.contains(&format!("Falling back to mirror {}", urls[1])));
}

#[tokio::test]
async fn test_checksum_mismatch_stops_before_patch() {
    let server = MockServer::start().await;
    let data = demo_archive();
    serve(&server, ARCHIVE, data).await;

    let ws = TestWorkspace::new();
    let urls = vec![format!("{}{ARCHIVE}", server.uri())];
    let wrong = Recipe::from_toml(&demo_recipe(&urls, &"0".repeat(64))).unwrap();

    let err = ws.builder(&[]).build(&wrong, &request(&[])).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Fetch));
    assert_eq!(err.kind(), Some(ErrorKind::ChecksumMismatch));
    assert!(scratch_files(&ws, "main.c").is_empty());
    assert!(!ws.keg("demo", "1.0").exists());
}

#[tokio::test]
async fn test_unknown_flag_fails_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ws = TestWorkspace::new();
    let urls = vec![format!("{}{ARCHIVE}", server.uri())];
    let err = ws
        .builder(&[])
        .build(&recipe(&urls, b"unused"), &request(&["--no-such-flag"]))
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Resolve));
    assert_eq!(err.kind(), Some(ErrorKind::UnknownOptionRequested));
}

#[tokio::test]
async fn test_second_build_reuses_cached_archive() {
    let server = MockServer::start().await;
    let data = demo_archive();
    Mock::given(method("GET"))
        .and(path(ARCHIVE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let ws = TestWorkspace::new();
    let recipe = recipe(&[format!("{}{ARCHIVE}", server.uri())], &data);
    let builder = ws.builder(&[]);

    let first = builder.build(&recipe, &request(&[])).await.unwrap();
    let second = builder.build(&recipe, &request(&["keep-ctags"])).await.unwrap();

    assert!(!first.fetch.cached);
    assert!(second.fetch.cached);
    assert_ne!(first.scratch, second.scratch);
    // The keg is replaced, not merged
    assert!(ws.keg("demo", "1.0").join("bin/ctags").exists());
    assert!(!ws.keg("demo", "1.0.previous").exists());
}

// ============================================
// Patch
// ============================================

#[tokio::test]
async fn test_failed_patch_leaves_tree_untouched() {
    let server = MockServer::start().await;
    let data = demo_archive();
    serve(&server, ARCHIVE, data.clone()).await;

    let second_patch = r#"
[[patches.patch]]
strip = 1
inline = """
--- a/main.c
+++ b/main.c
@@ -1,2 +1,2 @@
 int main(void)
-this line is not in the file
+replacement
"""
"#;
    let text = demo_recipe(&[format!("{}{ARCHIVE}", server.uri())], &sha256_hex(&data))
        .replace("[build]\n", &format!("{second_patch}\n[build]\n"));
    let recipe = Recipe::from_toml(&text).unwrap();

    let ws = TestWorkspace::new();
    let err = ws.builder(&[]).build(&recipe, &request(&[])).await.unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Patch));
    assert_eq!(err.kind(), Some(ErrorKind::PatchApplicationFailure));

    let copies = scratch_files(&ws, "main.c");
    assert_eq!(copies.len(), 1);
    let main = std::fs::read_to_string(&copies[0]).unwrap();
    assert!(main.contains("return 1;"), "first patch must be rolled back: {main}");
    assert!(!ws.keg("demo", "1.0").exists());
}

#[tokio::test]
async fn test_remote_patch_is_downloaded_and_applied() {
    let server = MockServer::start().await;
    let data = demo_archive();
    serve(&server, ARCHIVE, data.clone()).await;
    let diff = "--- a/main.c\n+++ b/main.c\n@@ -1,3 +1,3 @@\n int main(void)\n-{ return 1; }\n+{ return 0; }\n /* end */\n";
    serve(&server, "/fix.patch", diff.as_bytes().to_vec()).await;

    let text = demo_recipe(&[format!("{}{ARCHIVE}", server.uri())], &sha256_hex(&data));
    let start = text.find("[[patches.patch]]").unwrap();
    let end = text.find("[build]").unwrap();
    let remote = format!("[[patches.patch]]\nurl = \"{}/fix.patch\"\n\n", server.uri());
    let recipe = Recipe::from_toml(&format!("{}{remote}{}", &text[..start], &text[end..])).unwrap();

    let ws = TestWorkspace::new();
    let report = ws.builder(&[]).build(&recipe, &request(&[])).await.unwrap();

    assert_eq!(report.patches.applied, 1);
    assert!(report.patches.fuzzed.is_empty());
    let doc = report.receipt.prefix.join("share/doc/demo");
    assert!(read(&doc, "main.c").contains("return 0;"));
}

// ============================================
// Steps
// ============================================

fn failing_compile(urls: &[String], data: &[u8]) -> Recipe {
    let text = demo_recipe(urls, &sha256_hex(data)).replace(
        "compile = [\"true\"]",
        "compile = [\"sh\", \"-c\", \"echo compile broke >&2; exit 3\"]",
    );
    Recipe::from_toml(&text).unwrap()
}

#[tokio::test]
async fn test_failed_step_stops_build_and_keeps_scratch() {
    let server = MockServer::start().await;
    let data = demo_archive();
    serve(&server, ARCHIVE, data.clone()).await;

    let ws = TestWorkspace::new();
    let recipe = failing_compile(&[format!("{}{ARCHIVE}", server.uri())], &data);
    let err = ws.builder(&[]).build(&recipe, &request(&[])).await.unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::ExternalProcessFailure));
    assert_eq!(err.stage(), Some(Stage::Compile));
    assert!(err.to_string().contains("compile broke"), "{err}");
    assert!(!ws.keg("demo", "1.0").exists());

    // Configure ran, install did not; scratch and logs stay for inspection
    assert_eq!(scratch_files(&ws, "configure.args").len(), 1);
    assert_eq!(scratch_files(&ws, "01.configure.log").len(), 1);
    let compile_log = scratch_files(&ws, "02.compile.log");
    assert_eq!(compile_log.len(), 1);
    assert!(std::fs::read_to_string(&compile_log[0]).unwrap().contains("compile broke"));
    assert!(scratch_files(&ws, "03.install.log").is_empty());
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_keg() {
    let server = MockServer::start().await;
    let data = demo_archive();
    serve(&server, ARCHIVE, data.clone()).await;

    let ws = TestWorkspace::new();
    let urls = vec![format!("{}{ARCHIVE}", server.uri())];
    let builder = ws.builder(&[]);
    builder.build(&recipe(&urls, &data), &request(&[])).await.unwrap();

    let err = builder
        .build(&failing_compile(&urls, &data), &request(&["keep-ctags"]))
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Compile));

    let keg = ws.keg("demo", "1.0");
    assert_eq!(read(&keg, "bin/demo").trim(), "tool");
    assert!(!keg.join("bin/ctags").exists(), "previous variant must be restored");
    assert!(!keg.with_file_name("1.0.previous").exists());
}

// ============================================
// Variants
// ============================================

#[test]
fn test_with_x_controls_x11_dependency() {
    let ws = TestWorkspace::new();
    let recipe = recipe(&["http://localhost/demo-1.0.tar.gz".to_string()], b"unused");

    let with = ws.builder(&[]).prepare(&recipe, &request(&["--with-x"])).unwrap();
    assert!(with.plan.contains("x11"));

    let without = ws.builder(&[]).prepare(&recipe, &request(&[])).unwrap();
    assert!(!without.plan.contains("x11"));
    assert_ne!(with.variant.id(), without.variant.id());
}

#[test]
fn test_missing_optional_dependency_is_reported() {
    let ws = TestWorkspace::new();
    let recipe = recipe(&["http://localhost/demo-1.0.tar.gz".to_string()], b"unused");

    let missing = ws.builder(&[]).prepare(&recipe, &request(&["with-gnutls"])).unwrap();
    assert!(!missing.plan.contains("gnutls"));
    assert_eq!(missing.plan.missing_optional, vec!["gnutls".to_string()]);

    let present = ws.builder(&["gnutls"]).prepare(&recipe, &request(&["with-gnutls"])).unwrap();
    assert!(present.plan.contains("gnutls"));
    assert!(present.plan.missing_optional.is_empty());
}

// ============================================
// End to end
// ============================================

#[tokio::test]
async fn test_build_installs_and_finalizes_keg() {
    let server = MockServer::start().await;
    let data = demo_archive();
    serve(&server, ARCHIVE, data.clone()).await;

    let ws = TestWorkspace::new();
    let recipe = recipe(&[format!("{}{ARCHIVE}", server.uri())], &data);
    let request = BuildRequest {
        jobs: Some(4),
        ..request(&["with-x"])
    };
    let report = ws.builder(&[]).build(&recipe, &request).await.unwrap();

    let keg = ws.keg("demo", "1.0");
    let doc = keg.join("share/doc/demo");
    assert_eq!(report.receipt.prefix, keg);

    // Patched source was installed
    assert!(read(&doc, "main.c").contains("return 0;"));
    // Configure saw baseline then conditional arguments
    assert_eq!(
        read(&doc, "configure.args").trim(),
        format!("--prefix={} --with-x", keg.display())
    );
    assert!(read(&doc, "makeflags").trim().ends_with("-j4"));

    // ctags removed, its now-empty directory pruned
    assert!(keg.join("bin/demo").exists());
    assert!(!keg.join("bin/ctags").exists());
    assert!(!keg.join("share/man").exists());
    assert_eq!(
        report.receipt.removed,
        vec![PathBuf::from("bin/ctags"), PathBuf::from("share/man/man1/ctags.1.gz")]
    );

    let receipt = &report.receipt;
    assert_eq!(receipt.options, vec!["with-x".to_string()]);
    assert!(receipt.dependencies.iter().any(|d| d.name == "x11"));
    assert!(receipt.files.contains(&PathBuf::from("bin/demo")));
    assert_eq!(receipt.caveats, vec![format!("demo was installed to {}", keg.display())]);

    // One log per step
    let logs: Vec<PathBuf> = std::fs::read_dir(report.scratch.join("logs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(logs.len(), 3);
}

#[tokio::test]
async fn test_parallel_unsafe_variant_builds_with_one_job() {
    let server = MockServer::start().await;
    let data = demo_archive();
    serve(&server, ARCHIVE, data.clone()).await;

    let ws = TestWorkspace::new();
    let recipe = recipe(&[format!("{}{ARCHIVE}", server.uri())], &data);
    let request = BuildRequest {
        jobs: Some(8),
        ..request(&["serial", "keep-ctags"])
    };
    let report = ws.builder(&[]).build(&recipe, &request).await.unwrap();

    let doc = report.receipt.prefix.join("share/doc/demo");
    assert!(read(&doc, "makeflags").trim().ends_with("-j1"));
    assert!(read(&doc, "configure.args").contains("--without-x"));
    assert!(report.receipt.prefix.join("bin/ctags").exists());
    assert!(report.receipt.removed.is_empty());
    assert!(Path::new(&report.receipt.prefix).join("share/man/man1/ctags.1.gz").exists());
}
