use std::fs;
use std::path::{Path, PathBuf};

use sensor_merge::catalog::SnapshotCatalog;
use sensor_merge::recency::{Recency, RecencySource};
use sensor_merge::vcs::MemoryVcs;
use sensor_merge::{Pipeline, PipelineConfig, RetentionPolicy};
use tempfile::tempdir;
use time::OffsetDateTime;

fn at(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs).expect("timestamp")
}

fn seed_snapshots(dir: &Path, count: usize) -> Vec<PathBuf> {
    (1..=count)
        .map(|i| {
            let path = dir.join(format!("sensor_f{i}.csv"));
            fs::write(&path, format!("timestamp,value\n{i},v{i}\n")).expect("seed");
            path
        })
        .collect()
}

fn config_for(dir: &Path, retention: RetentionPolicy) -> PipelineConfig {
    PipelineConfig {
        directory: dir.to_path_buf(),
        retention,
        ..PipelineConfig::default()
    }
}

#[test]
fn keep_count_uses_commit_times() {
    let dir = tempdir().expect("tempdir");
    let paths = seed_snapshots(dir.path(), 5);
    // Commit order is the reverse of name order so mtimes cannot explain the result.
    let mut vcs = MemoryVcs::new(dir.path());
    for (i, path) in paths.iter().enumerate() {
        vcs.commit(path, at(1_000 - i as i64));
    }

    let report = Pipeline::new(config_for(dir.path(), RetentionPolicy::Count { keep_count: 2 }))
        .with_vcs(&vcs)
        .run();

    assert!(report.succeeded());
    assert_eq!(report.kept, vec![paths[0].clone(), paths[1].clone()]);
    assert_eq!(
        report.deleted,
        vec![paths[2].clone(), paths[3].clone(), paths[4].clone()]
    );
    assert!(paths[0].exists() && paths[1].exists());
    assert!(!paths[2].exists() && !paths[3].exists() && !paths[4].exists());
}

#[test]
fn keep_count_scenario_descending_recency() {
    let dir = tempdir().expect("tempdir");
    let paths = seed_snapshots(dir.path(), 5);
    let mut vcs = MemoryVcs::new(dir.path());
    for (i, path) in paths.iter().enumerate() {
        vcs.commit(path, at(100 + i as i64));
    }

    let report = Pipeline::new(config_for(dir.path(), RetentionPolicy::Count { keep_count: 2 }))
        .with_vcs(&vcs)
        .run();

    // f5 > f4 > f3 > f2 > f1
    assert_eq!(report.kept, vec![paths[3].clone(), paths[4].clone()]);
    assert_eq!(report.deleted.len(), 3);
}

#[test]
fn vcs_disabled_ignores_commit_times() {
    let dir = tempdir().expect("tempdir");
    let paths = seed_snapshots(dir.path(), 2);
    let mut vcs = MemoryVcs::new(dir.path());
    vcs.commit(&paths[0], at(0)).commit(&paths[1], at(0));

    let config = PipelineConfig {
        use_vcs: false,
        ..config_for(dir.path(), RetentionPolicy::Age { max_age_hours: 1 })
    };
    let report = Pipeline::new(config).with_vcs(&vcs).run();
    assert!(report.succeeded());
    assert!(report.deleted.is_empty(), "fresh mtimes win when vcs is off");
}

#[test]
fn broken_history_falls_back_to_mtime() {
    let dir = tempdir().expect("tempdir");
    let paths = seed_snapshots(dir.path(), 1);
    let mut vcs = MemoryVcs::new(dir.path());
    vcs.break_history(&paths[0]);

    let report = Pipeline::new(config_for(dir.path(), RetentionPolicy::Age { max_age_hours: 1 }))
        .with_vcs(&vcs)
        .with_now(at(0))
        .run();
    assert!(report.succeeded());
    assert!(report.deleted.is_empty());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn unknown_recency_is_never_deleted() {
    let catalog = SnapshotCatalog::from_entries(vec![
        Recency::unknown("sensor_lost.csv"),
        Recency::new("sensor_old.csv", at(0), RecencySource::VcsCommitTime),
        Recency::new("sensor_new.csv", at(10), RecencySource::FilesystemMtime),
    ]);

    for policy in [
        RetentionPolicy::Age { max_age_hours: 0 },
        RetentionPolicy::Count { keep_count: 0 },
        RetentionPolicy::Count { keep_count: 1 },
    ] {
        let plan = policy.partition(&catalog, at(1_000_000));
        assert!(
            plan.delete.iter().all(|entry| !entry.is_unknown()),
            "{policy} deleted an undatable file"
        );
        assert!(plan.keep.iter().any(|entry| entry.is_unknown()));
        assert_eq!(plan.keep.len() + plan.delete.len(), catalog.len());
    }
}

#[test]
fn count_policy_exactness() {
    let entries: Vec<Recency> = (0..7)
        .map(|i| {
            Recency::new(
                format!("sensor_{i}.csv"),
                at(i * 10),
                RecencySource::FilesystemMtime,
            )
        })
        .collect();
    let catalog = SnapshotCatalog::from_entries(entries);

    for keep in 0..7 {
        let plan = RetentionPolicy::Count { keep_count: keep }.partition(&catalog, at(0));
        assert_eq!(plan.delete.len(), 7 - keep);
        let newest_deleted = plan.delete.iter().filter_map(|e| e.timestamp).max();
        let oldest_kept = plan.keep.iter().filter_map(|e| e.timestamp).min();
        if let (Some(deleted), Some(kept)) = (newest_deleted, oldest_kept) {
            assert!(deleted < kept);
        }
    }
}

#[test]
fn age_boundary_is_kept() {
    let hour = 3_600;
    let catalog = SnapshotCatalog::from_entries(vec![
        Recency::new("sensor_edge.csv", at(10 * hour), RecencySource::VcsCommitTime),
        Recency::new("sensor_past.csv", at(10 * hour - 1), RecencySource::VcsCommitTime),
    ]);
    let plan = RetentionPolicy::Age { max_age_hours: 2 }.partition(&catalog, at(12 * hour));
    assert_eq!(plan.keep.len(), 1);
    assert_eq!(plan.keep[0].path, PathBuf::from("sensor_edge.csv"));
    assert_eq!(plan.delete[0].path, PathBuf::from("sensor_past.csv"));
}
