mod common;

use std::fs;

use assert_cmd::Command;
use common::{SAMPLE_FIXTURE, TestWorkspace, fixture_path};
use predicates::str::contains;

fn bin() -> Command {
    Command::cargo_bin("retail-analytics").expect("binary exists")
}

#[test]
fn run_writes_canonical_table_report_and_query_results() {
    let workspace = TestWorkspace::new();
    let out_dir = workspace.path().join("out");
    bin()
        .args([
            "run",
            "-i",
            fixture_path(SAMPLE_FIXTURE).to_str().unwrap(),
            "-o",
            out_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    assert!(out_dir.join("sales.csv").exists());
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join("quality_report.json")).unwrap())
            .expect("report json");
    assert_eq!(report["total_records"], 14);
    assert_eq!(report["dropped_records"], 2);

    let regional = fs::read_to_string(out_dir.join("regional_performance.csv")).unwrap();
    let mut lines = regional.lines();
    assert_eq!(
        lines.next(),
        Some(
            "region,unique_customers,total_orders,total_revenue,total_profit,avg_profit_margin,avg_delivery_days"
        )
    );
    assert!(lines.next().unwrap().starts_with("West,"));

    let yoy = fs::read_to_string(out_dir.join("yoy_growth.csv")).unwrap();
    assert!(yoy.contains("\n2014,907.15,90.72,1,,\n"));
}

#[test]
fn run_preview_prints_result_tables() {
    let workspace = TestWorkspace::new();
    bin()
        .args([
            "run",
            "-i",
            fixture_path(SAMPLE_FIXTURE).to_str().unwrap(),
            "-o",
            workspace.path().join("out").to_str().unwrap(),
            "--preview",
            "--sequential",
        ])
        .assert()
        .success()
        .stdout(contains("== discount_impact =="))
        .stdout(contains("discount_bucket"));
}

#[test]
fn clean_prints_quality_report_and_writes_json() {
    let workspace = TestWorkspace::new();
    let output = workspace.path().join("sales.csv");
    let report = workspace.path().join("report.json");
    bin()
        .args([
            "clean",
            "-i",
            fixture_path(SAMPLE_FIXTURE).to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("total_records"))
        .stdout(contains("check.no_negative_delivery_spans"))
        .stdout(contains("verdict"));
    assert!(fs::read_to_string(&report).unwrap().contains("\"duplicates_removed\": 1"));
    assert_eq!(fs::read_to_string(&output).unwrap().lines().count(), 15);
}

#[test]
fn missing_required_headers_fail_with_diagnostic() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("bad.csv", "Order ID,Sales\nA-1,10\n");
    bin()
        .args([
            "clean",
            "-i",
            input.to_str().unwrap(),
            "-o",
            workspace.path().join("sales.csv").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("required column(s) missing"))
        .stderr(contains("profit"));
}

#[test]
fn config_file_and_flags_are_layered() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "orders.csv",
        "id;day;amount;qty;gain\nA-1;02.01.2017;10;1;2\nA-2;03.01.2017;5;2;-1\n",
    );
    let config = workspace.write(
        "pipeline.yaml",
        "header_aliases:\n  id: order_id\n  day: order_date\n  amount: sales\n  qty: quantity\n  gain: profit\n",
    );
    let output = workspace.path().join("sales.csv");
    bin()
        .args([
            "clean",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
            "--delimiter",
            ";",
            "--date-format",
            "%d.%m.%Y",
        ])
        .assert()
        .success();
    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("A-1,,,,,,,,,2017-01-02,,10,1,0,2,"));
    assert_eq!(written.lines().count(), 3);
}

#[test]
fn unknown_config_keys_are_rejected() {
    let workspace = TestWorkspace::new();
    let config = workspace.write("pipeline.yaml", "paralel_queries: false\n");
    bin()
        .args([
            "run",
            "-i",
            fixture_path(SAMPLE_FIXTURE).to_str().unwrap(),
            "-o",
            workspace.path().join("out").to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("config"));
}

#[test]
fn clean_reads_from_stdin() {
    let workspace = TestWorkspace::new();
    let output = workspace.path().join("sales.csv");
    let input = fs::read_to_string(fixture_path(SAMPLE_FIXTURE)).unwrap();
    bin()
        .args(["clean", "-i", "-", "-o", output.to_str().unwrap()])
        .write_stdin(input)
        .assert()
        .success()
        .stdout(contains("raw_records"));
    assert_eq!(fs::read_to_string(&output).unwrap().lines().count(), 15);
}

#[test]
fn clean_writes_canonical_table_to_stdout_with_dash() {
    bin()
        .args([
            "clean",
            "-i",
            fixture_path(SAMPLE_FIXTURE).to_str().unwrap(),
            "-o",
            "-",
        ])
        .assert()
        .success()
        .stdout(contains("order_id,customer_id"))
        .stdout(contains("total_records"));
    assert!(!std::path::Path::new("-").exists());
}
