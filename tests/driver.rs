//! Multi-manifest discovery and sequential driving.

mod common;

use common::{INCLUDE_ALL_SPEC, Workspace};

use chrono::{TimeZone, Utc};

use abcmerge::cancel::CancelToken;
use abcmerge::upgrade::driver::drive;
use abcmerge::upgrade::{UpgradeOptions, UpgradeOutcome};
use abcmerge::utils::FixedClock;

fn clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap())
}

#[test]
fn drives_every_manifest_under_a_root() {
    let ws = Workspace::new();
    ws.set_template(&[("spec.yaml", INCLUDE_ALL_SPEC), ("out.txt", "hello\n")]);
    ws.commit_template("v1", Some("v1.0.0"));

    let alpha = ws.render_at("alpha", &[]);
    let zeta = ws.render_at("zeta", &[]);

    let report = drive(
        &ws.root,
        None,
        &UpgradeOptions::default(),
        None,
        &clock(),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].0, alpha);
    assert_eq!(report.results[1].0, zeta);
    for (_, outcome) in &report.results {
        assert_eq!(*outcome, UpgradeOutcome::AlreadyUpToDate);
    }
    assert!(report.conflict().is_none());
}

#[test]
fn resume_from_skips_preceding_manifests() {
    let ws = Workspace::new();
    ws.set_template(&[("spec.yaml", INCLUDE_ALL_SPEC), ("out.txt", "hello\n")]);
    ws.commit_template("v1", Some("v1.0.0"));

    ws.render_at("alpha", &[]);
    let zeta = ws.render_at("zeta", &[]);

    let report = drive(
        &ws.root,
        Some(&zeta),
        &UpgradeOptions::default(),
        None,
        &clock(),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].0, zeta);
}

#[test]
fn stops_at_the_first_conflict_but_reports_prior_successes() {
    let ws = Workspace::new();
    ws.set_template(&[("spec.yaml", INCLUDE_ALL_SPEC), ("greet.txt", "hello\n")]);
    ws.commit_template("v1", Some("v1.0.0"));

    ws.render_at("alpha", &[]);
    ws.render_at("zeta", &[]);

    // Only zeta's copy diverges from the template's update.
    std::fs::write(ws.root.join("zeta/greet.txt"), "local edit\n").unwrap();
    ws.set_template(&[("spec.yaml", INCLUDE_ALL_SPEC), ("greet.txt", "updated\n")]);
    ws.commit_template("v2", Some("v2.0.0"));

    let report = drive(
        &ws.root,
        None,
        &UpgradeOptions::default(),
        None,
        &clock(),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(matches!(report.results[0].1, UpgradeOutcome::Success { .. }));
    assert!(matches!(
        report.results[1].1,
        UpgradeOutcome::MergeConflict { .. }
    ));
    assert!(report.conflict().is_some());

    // alpha was upgraded in place before the stop.
    assert_eq!(
        std::fs::read_to_string(ws.root.join("alpha/greet.txt")).unwrap(),
        "updated\n"
    );
}
