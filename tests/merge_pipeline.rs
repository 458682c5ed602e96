use std::fs;
use std::path::Path;

use sensor_merge::table::read_table;
use sensor_merge::timestamp::parse_reading_time;
use sensor_merge::{Pipeline, PipelineConfig, PipelineState, RetentionPolicy, Warning};
use tempfile::tempdir;
use time::{Duration, OffsetDateTime};

fn seed(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).expect("seed snapshot");
}

fn config_for(dir: &Path) -> PipelineConfig {
    PipelineConfig {
        directory: dir.to_path_buf(),
        use_vcs: false,
        retention: RetentionPolicy::Age { max_age_hours: 24 },
        ..PipelineConfig::default()
    }
}

#[test]
fn overlapping_snapshots_produce_deduplicated_output() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_1.csv", "timestamp,value\n1,A\n2,B\n");
    seed(dir.path(), "sensor_2.csv", "timestamp,value\n2,B\n3,C\n");
    seed(dir.path(), "sensor_3.csv", "timestamp,value\n1,A\n");

    let config = config_for(dir.path());
    let report = Pipeline::new(config.clone()).run();
    assert_eq!(report.state, PipelineState::Done);

    let written = fs::read_to_string(config.output_path()).expect("read output");
    assert_eq!(written, "timestamp,value\n1,A\n2,B\n3,C\n");
    assert_eq!(report.merge.rows_written, 3);
    assert_eq!(report.merge.duplicates_removed, 2);
}

#[test]
fn rerunning_is_byte_identical() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_a.csv", "timestamp,value\n3,x\n1,y\n1,z\n");
    seed(dir.path(), "sensor_b.csv", "timestamp,value\n1,z\n2,w\n1,q\n");

    for carry_forward in [true, false] {
        let config = PipelineConfig {
            carry_forward,
            ..config_for(dir.path())
        };
        let _ = fs::remove_file(config.output_path());
        let first = Pipeline::new(config.clone()).run();
        assert!(first.succeeded());
        let first_bytes = fs::read(config.output_path()).expect("first output");

        let second = Pipeline::new(config.clone()).run();
        assert!(second.succeeded());
        let second_bytes = fs::read(config.output_path()).expect("second output");
        assert_eq!(first_bytes, second_bytes, "carry_forward={carry_forward}");
    }
}

#[test]
fn output_is_ordered_and_free_of_duplicates() {
    let dir = tempdir().expect("tempdir");
    seed(
        dir.path(),
        "sensor_north.csv",
        "timestamp,sensor,reading\n2024-01-01 00:00:05,n,1.5\n2024-01-01 00:00:01,n,1.0\n",
    );
    seed(
        dir.path(),
        "sensor_south.csv",
        "timestamp,sensor,reading\n2024-01-01T00:00:03Z,s,7\n2024-01-01 00:00:01,n,1.0\n",
    );

    let config = config_for(dir.path());
    assert!(Pipeline::new(config.clone()).run().succeeded());
    let table = read_table(&config.output_path()).expect("read output");

    let times: Vec<_> = table
        .rows
        .iter()
        .map(|row| parse_reading_time(&row[0]).expect("valid timestamp"))
        .collect();
    assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));

    let mut unique = table.rows.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), table.rows.len());
    assert_eq!(table.len(), 3);
}

#[test]
fn empty_directory_fails_and_leaves_output_untouched() {
    let dir = tempdir().expect("tempdir");
    let config = config_for(dir.path());
    fs::write(config.output_path(), "timestamp,value\n9,keep\n").expect("seed output");

    let report = Pipeline::new(config.clone()).run();
    assert_eq!(report.state, PipelineState::Failed);
    assert_ne!(report.exit_code(), 0);
    assert_eq!(
        fs::read_to_string(config.output_path()).expect("output"),
        "timestamp,value\n9,keep\n"
    );
}

#[test]
fn snapshots_without_rows_fail() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_a.csv", "timestamp,value\n");
    seed(dir.path(), "sensor_b.csv", "timestamp,value\nnot-a-time,1\n");

    let config = config_for(dir.path());
    let report = Pipeline::new(config.clone()).run();
    assert_eq!(report.state, PipelineState::Failed);
    assert!(!config.output_path().exists());
    assert!(dir.path().join("sensor_a.csv").exists());
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::RowValidation { .. })));
}

#[test]
fn write_failure_skips_retention() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_a.csv", "timestamp,value\n1,A\n");
    let config = PipelineConfig {
        retention: RetentionPolicy::Count { keep_count: 0 },
        ..config_for(dir.path())
    };
    // A directory where the canonical file should go makes the final rename fail.
    fs::create_dir(config.output_path()).expect("block output");

    let report = Pipeline::new(config).run();
    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(
        report.history,
        vec![
            PipelineState::Idle,
            PipelineState::Merging,
            PipelineState::Written,
            PipelineState::Failed,
        ]
    );
    assert!(report.deleted.is_empty());
    assert!(dir.path().join("sensor_a.csv").exists());
}

#[test]
fn unreadable_snapshot_is_skipped_and_kept() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_a.csv", "timestamp,value\n1,A\n");
    seed(dir.path(), "sensor_b.csv", "timestamp,value\n2,B,oops\n");
    let config = PipelineConfig {
        retention: RetentionPolicy::Count { keep_count: 0 },
        ..config_for(dir.path())
    };

    let report = Pipeline::new(config).run();
    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(report.skipped, vec![dir.path().join("sensor_b.csv")]);
    assert_eq!(report.deleted, vec![dir.path().join("sensor_a.csv")]);
    assert_eq!(report.kept, vec![dir.path().join("sensor_b.csv")]);
    assert!(dir.path().join("sensor_b.csv").exists());
}

#[test]
fn carry_forward_preserves_rows_of_purged_snapshots() {
    let dir = tempdir().expect("tempdir");
    let config = PipelineConfig {
        retention: RetentionPolicy::Count { keep_count: 0 },
        ..config_for(dir.path())
    };

    seed(dir.path(), "sensor_1.csv", "timestamp,value\n1,A\n");
    assert!(Pipeline::new(config.clone()).run().succeeded());
    assert!(!dir.path().join("sensor_1.csv").exists());

    seed(dir.path(), "sensor_2.csv", "timestamp,value\n2,B\n");
    let report = Pipeline::new(config.clone()).run();
    assert!(report.succeeded());
    assert_eq!(
        fs::read_to_string(config.output_path()).expect("output"),
        "timestamp,value\n1,A\n2,B\n"
    );
}

#[test]
fn unreadable_canonical_is_not_overwritten() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_1.csv", "timestamp,value\n1,A\n");
    let config = config_for(dir.path());
    fs::write(config.output_path(), "timestamp,value\n1,A,broken\n").expect("seed output");

    let report = Pipeline::new(config.clone()).run();
    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(
        fs::read_to_string(config.output_path()).expect("output"),
        "timestamp,value\n1,A,broken\n"
    );
    assert!(dir.path().join("sensor_1.csv").exists());
}

#[test]
fn age_policy_deletes_expired_snapshots() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_a.csv", "timestamp,value\n1,A\n");
    seed(dir.path(), "sensor_b.csv", "timestamp,value\n2,B\n");
    let config = config_for(dir.path());

    let report = Pipeline::new(config.clone())
        .with_now(OffsetDateTime::now_utc() + Duration::hours(1))
        .run();
    assert!(report.succeeded());
    assert!(report.deleted.is_empty(), "fresh files survive");

    let report = Pipeline::new(config.clone())
        .with_now(OffsetDateTime::now_utc() + Duration::hours(48))
        .run();
    assert!(report.succeeded());
    assert_eq!(report.deleted.len(), 2);
    assert!(config.output_path().exists());
}

#[test]
fn dry_run_deletes_nothing() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_a.csv", "timestamp,value\n1,A\n");
    let config = PipelineConfig {
        retention: RetentionPolicy::Count { keep_count: 0 },
        dry_run: true,
        ..config_for(dir.path())
    };

    let report = Pipeline::new(config).run();
    assert!(report.succeeded());
    assert_eq!(report.planned_deletions, vec![dir.path().join("sensor_a.csv")]);
    assert!(report.deleted.is_empty());
    assert!(dir.path().join("sensor_a.csv").exists());
    assert!(report.summary().contains("Would delete: 1"));
}

#[test]
fn report_serializes_to_json() {
    let dir = tempdir().expect("tempdir");
    seed(dir.path(), "sensor_a.csv", "timestamp,value\n1,A\n");
    let report = Pipeline::new(config_for(dir.path())).run();
    let json = serde_json::to_value(&report).expect("json");
    assert_eq!(json["state"], "Done");
    assert_eq!(json["policy"]["mode"], "age");
    assert_eq!(json["merge"]["rows_written"], 1);
}
