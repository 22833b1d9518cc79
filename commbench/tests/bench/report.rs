use super::helpers::{quick_params, run_bench};
use commbench::CommsParams;

#[tokio::test]
async fn test_json_report_written() {
    let params = CommsParams {
        dcheck: true,
        ..quick_params("all_gather_base")
    };
    let report = run_bench(2, params).await.remove(0).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    report.write_json(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["backend"], "local");
    assert_eq!(json["world_size"], 2);
    let sizes = json["sizes"].as_array().unwrap();
    assert_eq!(sizes.len(), 3);
    assert_eq!(sizes[0]["collective"], "all_gather_base");
    assert_eq!(sizes[0]["dtype"], "f32");
    assert_eq!(sizes[0]["validated"], true);
}

#[tokio::test]
async fn test_table_has_row_per_size() {
    let report = run_bench(2, quick_params("scatter")).await.remove(0).unwrap();
    let table = report.render_table();
    assert_eq!(table.lines().filter(|l| l.starts_with("scatter")).count(), 3);
    assert!(table.lines().filter(|l| l.starts_with("scatter")).all(|l| l.trim_end().ends_with('-')));
}
