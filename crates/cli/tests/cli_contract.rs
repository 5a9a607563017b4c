use assert_cmd::cargo::cargo_bin_cmd;
use pdf_engine::{blank_document, PageSize};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const INTERCHANGE: &str = r#"[
  {"pageIndex": 1, "mediaBox": {"x": 0, "y": 0, "width": 612, "height": 792},
   "strokes": [{"tool": "marker", "color": {"red": 1, "green": 0, "blue": 0, "alpha": 1},
                "points": [{"x": 100, "y": 100, "timeOffset": 0, "width": 6, "height": 6,
                            "opacity": 1, "force": 1, "azimuth": 0, "altitude": 1.57},
                           {"x": 300, "y": 120, "timeOffset": 0.3, "width": 6, "height": 6,
                            "opacity": 1, "force": 1, "azimuth": 0, "altitude": 1.57}]}]},
  {"pageIndex": 99, "strokes": []}
]"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self { dir: tempfile::tempdir().expect("temp dir should be created") }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn pdf(&self, name: &str, pages: usize) -> PathBuf {
        let path = self.path(name);
        let bytes = blank_document(&vec![PageSize::default(); pages]).expect("blank pdf");
        fs::write(&path, bytes).expect("fixture should be written");
        path
    }

    fn interchange(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, INTERCHANGE).expect("interchange should be written");
        path
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("butterpaper-ink");
        cmd.env("BUTTERPAPER_INK_DATA_DIR", self.path("prefs"));
        cmd
    }

    fn json(&self, args: &[&std::ffi::OsStr]) -> Value {
        let output = self.cmd().args(args).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).expect("stdout should contain valid json")
    }
}

fn os(path: &Path) -> &std::ffi::OsStr {
    path.as_os_str()
}

#[test]
fn info_emits_stable_json_contract() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 2);

    let mut value = ws.json(&["info".as_ref(), os(&pdf)]);
    value["path"] = Value::String("<FIXTURE>".to_owned());

    let pretty = serde_json::to_string_pretty(&value).expect("value should serialize");
    insta::assert_snapshot!("cli_info_blank_pdf", pretty);
}

#[test]
fn import_embeds_drawings_and_writes_sidecar() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 2);
    let incoming = ws.interchange("incoming.json");

    let report = ws.json(&["import".as_ref(), os(&pdf), "--sidecar".as_ref(), os(&incoming)]);
    insta::assert_json_snapshot!("cli_import_report", report);

    let info = ws.json(&["info".as_ref(), os(&pdf)]);
    assert_eq!(info["pages"][1]["drawing_annotations"], 1);
    assert_eq!(info["pages"][1]["strokes"], 1);
    assert_eq!(info["pages"][0]["drawing_annotations"], 0);

    let sidecar: Value =
        serde_json::from_slice(&fs::read(ws.path("notes.json")).expect("sidecar should exist"))
            .expect("sidecar should be json");
    assert_eq!(sidecar.as_array().map(Vec::len), Some(1));
    assert_eq!(sidecar[0]["pageIndex"], 1);
}

#[test]
fn repeated_import_does_not_duplicate_annotations() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 2);
    let incoming = ws.interchange("incoming.json");

    for _ in 0..2 {
        ws.cmd().arg("import").arg(&pdf).arg("--sidecar").arg(&incoming).assert().success();
    }

    let info = ws.json(&["info".as_ref(), os(&pdf)]);
    assert_eq!(info["pages"][1]["drawing_annotations"], 1);
}

#[test]
fn import_without_interchange_leaves_no_sidecar() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 2);
    let incoming = ws.interchange("incoming.json");

    ws.cmd()
        .arg("import")
        .arg(&pdf)
        .arg("--sidecar")
        .arg(&incoming)
        .arg("--no-interchange")
        .assert()
        .success();

    assert!(!ws.path("notes.json").exists());
}

#[test]
fn import_burn_in_leaves_no_editable_annotation() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 2);
    let incoming = ws.interchange("incoming.json");

    ws.cmd()
        .arg("import")
        .arg(&pdf)
        .arg("--sidecar")
        .arg(&incoming)
        .arg("--burn-in")
        .assert()
        .success();

    let info = ws.json(&["info".as_ref(), os(&pdf)]);
    assert_eq!(info["pages"][1]["drawing_annotations"], 0);
    assert_eq!(info["pages"][1]["strokes"], 0);
    assert!(!ws.path("notes.json").exists());
}

#[test]
fn export_writes_interchange_from_embedded_drawings() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 3);
    let incoming = ws.interchange("incoming.json");
    let exported = ws.path("exported.json");

    ws.cmd()
        .arg("import")
        .arg(&pdf)
        .arg("--sidecar")
        .arg(&incoming)
        .arg("--no-interchange")
        .assert()
        .success();

    ws.cmd()
        .arg("export")
        .arg(&pdf)
        .arg("--output")
        .arg(&exported)
        .assert()
        .success()
        .stdout(predicate::str::contains("exported.json"));

    let value: Value = serde_json::from_slice(&fs::read(&exported).expect("export should exist"))
        .expect("export should be json");
    assert_eq!(value.as_array().map(Vec::len), Some(1));
    assert_eq!(value[0]["pageIndex"], 1);
    assert_eq!(value[0]["strokes"][0]["tool"], "marker");
    assert_eq!(value[0]["strokes"][0]["points"][1]["timeOffset"], 0.3);
}

#[test]
fn flatten_writes_burned_in_copy() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 2);
    let incoming = ws.interchange("incoming.json");
    let flat = ws.path("out/flat.pdf");

    ws.cmd().arg("import").arg(&pdf).arg("--sidecar").arg(&incoming).assert().success();
    ws.cmd().arg("flatten").arg(&pdf).arg("--output").arg(&flat).assert().success();

    let flattened = ws.json(&["info".as_ref(), os(&flat)]);
    assert_eq!(flattened["pages"][1]["drawing_annotations"], 0);

    let original = ws.json(&["info".as_ref(), os(&pdf)]);
    assert_eq!(original["pages"][1]["drawing_annotations"], 1);
}

#[test]
fn preview_writes_png_file() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 2);
    let incoming = ws.interchange("incoming.json");
    let output_path = ws.path("preview.png");

    ws.cmd().arg("import").arg(&pdf).arg("--sidecar").arg(&incoming).assert().success();
    ws.cmd()
        .arg("preview")
        .arg(&pdf)
        .arg("--page")
        .arg("2")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success();

    let image = image::open(&output_path).expect("preview should be readable image").to_rgba8();
    assert_eq!(image.dimensions(), (612, 792));
    assert_eq!(image.get_pixel(200, 110).0, [255, 0, 0, 255]);
    assert_eq!(image.get_pixel(200, 500).0, [255, 255, 255, 255]);
}

#[test]
fn preview_rejects_oversized_scale() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 1);
    let output_path = ws.path("huge.png");

    ws.cmd()
        .arg("preview")
        .arg(&pdf)
        .arg("--scale")
        .arg("1e30")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("too large"))
        .stderr(predicate::str::contains("panicked").not());

    assert!(!output_path.exists());
}

#[test]
fn preview_rejects_page_zero() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 1);

    ws.cmd()
        .arg("preview")
        .arg(&pdf)
        .arg("--page")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("1-based"));
}

#[test]
fn info_fails_for_missing_file() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("info")
        .arg(ws.path("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let ws = Workspace::new();
    let path = ws.path("invalid.pdf");
    fs::write(&path, b"this is not a pdf").expect("fixture should be written");

    ws.cmd()
        .arg("info")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open PDF"));
}

#[test]
fn info_fails_for_encrypted_marker_pdf() {
    let ws = Workspace::new();
    let path = ws.path("encrypted.pdf");
    fs::write(&path, b"%PDF-1.7\n1 0 obj << /Encrypt 2 0 R >> endobj\n%%EOF\n")
        .expect("fixture should be written");

    ws.cmd()
        .arg("info")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encrypted PDFs are not supported"));
}

#[test]
fn import_fails_for_missing_sidecar() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 1);
    let original = fs::read(&pdf).expect("fixture");

    ws.cmd()
        .arg("import")
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to import"));

    assert_eq!(fs::read(&pdf).expect("fixture"), original);
}

#[test]
fn config_persists_changes_used_by_later_commands() {
    let ws = Workspace::new();
    let pdf = ws.pdf("notes.pdf", 2);
    let incoming = ws.interchange("incoming.json");

    let shown = ws.json(&["config".as_ref(), "--write-interchange".as_ref(), "false".as_ref()]);
    assert_eq!(shown["preferences"]["write_interchange"], false);
    assert_eq!(shown["preferences"]["embed_policy"], "editable");
    assert!(shown["path"].as_str().is_some_and(|path| path.ends_with("ink-preferences.json")));
    assert!(ws.path("prefs").join("ink-preferences.json").exists());

    ws.cmd().arg("import").arg(&pdf).arg("--sidecar").arg(&incoming).assert().success();
    assert!(!ws.path("notes.json").exists());

    let reread = ws.json(&["config".as_ref()]);
    assert_eq!(reread["preferences"], shown["preferences"]);
}

#[test]
fn config_rejects_pdf_sidecar_extension() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("config")
        .arg("--sidecar-extension")
        .arg("pdf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid sidecar extension"));

    assert!(!ws.path("prefs").join("ink-preferences.json").exists());
}

#[test]
fn config_fails_on_corrupt_preferences() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.path("prefs")).expect("prefs dir");
    fs::write(ws.path("prefs").join("ink-preferences.json"), b"{not json").expect("fixture");

    ws.cmd()
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn version_prints_package_version() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
