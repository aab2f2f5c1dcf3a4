//! Render pipeline behavior observed through real installs.

mod common;

use common::{INCLUDE_ALL_SPEC, Workspace};

use abcmerge::manifest::Manifest;
use abcmerge::source::LocationType;

#[test]
fn render_records_a_complete_manifest() {
    let ws = Workspace::new();
    ws.set_template(&[
        ("spec.yaml", INCLUDE_ALL_SPEC),
        ("out.txt", "hello, world\n"),
        ("sub/nested.txt", "nested\n"),
    ]);
    ws.commit_template("v1", Some("v1.0.0"));

    let manifest_path = ws.render(&[]);
    let manifest = Manifest::load(&manifest_path).unwrap();

    assert_eq!(manifest.template_location, "../tpl");
    assert_eq!(manifest.location_type, LocationType::LocalGit);
    assert_eq!(manifest.template_version, "v1.0.0");
    assert_eq!(manifest.upgrade_channel, "latest");
    assert!(manifest.template_dir_hash.starts_with("sha256:"));

    let paths: Vec<&str> = manifest.output_files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["out.txt", "spec.yaml", "sub/nested.txt"]);
    for file in &manifest.output_files {
        assert!(file.hash.starts_with("sha256:"), "{}", file.hash);
        assert!(file.reversal_patch.is_none());
    }

    assert_eq!(ws.read_install("out.txt"), "hello, world\n");
    assert_eq!(ws.read_install("sub/nested.txt"), "nested\n");
}

#[test]
fn render_is_deterministic_across_installs() {
    let ws = Workspace::new();
    ws.set_template(&[
        ("spec.yaml", INCLUDE_ALL_SPEC),
        ("out.txt", "same bytes\n"),
        ("deep/tree/file.txt", "leaf\n"),
    ]);
    ws.commit_template("v1", Some("v1.0.0"));

    ws.render_at("one", &[]);
    ws.render_at("two", &[]);

    let read = |install: &str, rel: &str| {
        std::fs::read(ws.root.join(install).join(rel)).unwrap()
    };
    for rel in ["out.txt", "deep/tree/file.txt", "spec.yaml"] {
        assert_eq!(read("one", rel), read("two", rel), "{rel}");
    }

    let one = Manifest::load(&abcmerge::manifest::current_manifest_path(&ws.root.join("one")).unwrap())
        .unwrap();
    let two = Manifest::load(&abcmerge::manifest::current_manifest_path(&ws.root.join("two")).unwrap())
        .unwrap();
    assert_eq!(one.template_dir_hash, two.template_dir_hash);
    assert_eq!(one.output_files, two.output_files);
}

#[test]
fn untagged_template_records_the_head_sha() {
    let ws = Workspace::new();
    ws.set_template(&[("spec.yaml", INCLUDE_ALL_SPEC), ("out.txt", "x\n")]);
    ws.commit_template("v1", None);

    let manifest = Manifest::load(&ws.render(&[])).unwrap();
    assert_eq!(manifest.template_version.len(), 40);
    assert!(
        manifest
            .template_version
            .chars()
            .all(|c| c.is_ascii_hexdigit())
    );
}

#[test]
fn modify_in_place_render_records_reversal_patch() {
    let spec = "\
api_version: 1
steps:
  - action: include
    params:
      paths: [\".\"]
  - action: include
    params:
      paths: [\"config.txt\"]
      from: destination
  - action: append
    params:
      paths: [\"config.txt\"]
      with: \"appended by template\\n\"
";
    let ws = Workspace::new();
    ws.set_template(&[("spec.yaml", spec)]);
    ws.commit_template("v1", Some("v1.0.0"));

    ws.write_install_file("config.txt", "user config\n");
    let manifest = Manifest::load(&ws.render(&[])).unwrap();

    assert_eq!(
        ws.read_install("config.txt"),
        "user config\nappended by template\n"
    );
    let record = manifest.file("config.txt").unwrap();
    let patch_text = record.reversal_patch.as_deref().unwrap();
    assert!(patch_text.contains("+appended by template"), "{patch_text}");

    // Reversal soundness: un-applying the recorded patch restores the
    // pre-existing content.
    let parsed = abcmerge::patch::parse(patch_text).unwrap();
    match abcmerge::patch::apply(
        &abcmerge::patch::reverse(&parsed),
        "user config\nappended by template\n",
    ) {
        abcmerge::patch::ApplyResult::Applied(text) => assert_eq!(text, "user config\n"),
        other => panic!("expected clean apply, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn render_preserves_executable_bits() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::new();
    ws.set_template(&[("spec.yaml", INCLUDE_ALL_SPEC), ("run.sh", "#!/bin/sh\n")]);
    std::fs::set_permissions(
        ws.template_dir().join("run.sh"),
        std::fs::Permissions::from_mode(0o755),
    )
    .unwrap();
    ws.commit_template("v1", Some("v1.0.0"));

    ws.render(&[]);
    let mode = std::fs::metadata(ws.install_file("run.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}
