//! 汇总报表 (日志 / CSV / JSON)

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::{error, info};

use crate::summary::Summary;

/// CSV 表头
pub const CSV_HEADER: [&str; 5] = [
    "Object Type",
    "Object ID",
    "First Seen (s)",
    "Last Seen (s)",
    "Total Time in Frame (s)",
];

/// 报表文件名: `Summary_Results_2024-05-01_13-45-10.csv`
pub fn report_file_name(started_at: &DateTime<Local>) -> String {
    format!(
        "Summary_Results_{}.csv",
        started_at.format("%Y-%m-%d_%H-%M-%S")
    )
}

/// 打印汇总
pub fn log_summary(summary: &Summary) {
    if summary.is_empty() {
        info!("📋 未跟踪到任何目标");
        return;
    }

    info!("📋 ============ 驻留时间汇总 ============");
    for label in &summary.labels {
        info!(
            "🏷️ {}: {} 个目标 (活跃 {}, 退役 {}), 平均 {:.2}s, 最长 {:.2}s",
            label.label,
            label.stats.objects,
            label.stats.active,
            label.stats.retired,
            label.stats.mean_dwell,
            label.stats.longest_dwell
        );
        for obj in &label.objects {
            info!(
                "   #{:<4} 首次 {:>8.2}s  最后 {:>8.2}s  驻留 {:>8.2}s{}",
                obj.id,
                obj.first_seen,
                obj.last_seen,
                obj.total_time,
                if obj.retired { "  (已退役)" } else { "" }
            );
        }
    }
}

/// 导出 CSV 报表到 `dir` (目录不存在时创建), 返回文件路径
pub fn export_csv(
    summary: &Summary,
    actual_duration: Duration,
    started_at: &DateTime<Local>,
    dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("无法创建报表目录 {}", dir.display()))?;
    let path = dir.join(report_file_name(started_at));

    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("无法创建报表 {}", path.display()))?;

    wtr.write_record(CSV_HEADER)?;
    for (label, obj) in summary.rows() {
        wtr.write_record([
            label.to_string(),
            obj.id.to_string(),
            format!("{:.2}", obj.first_seen),
            format!("{:.2}", obj.last_seen),
            format!("{:.2}", obj.total_time),
        ])?;
    }

    // 空行分隔后写总时长 (列数不同, 换一个 Writer)
    let mut file = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("写入报表失败: {}", e.error()))?;
    writeln!(file)?;
    let mut wtr = csv::Writer::from_writer(file);
    wtr.write_record([
        "Total Detection Duration (s)".to_string(),
        format!("{:.2}", actual_duration.as_secs_f64()),
    ])?;
    wtr.flush()?;

    info!("💾 汇总已导出: {}", path.display());
    Ok(path)
}

/// 导出 JSON 汇总
pub fn export_json(summary: &Summary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).with_context(|| format!("无法写入 {}", path.display()))?;
    info!("💾 JSON 汇总已导出: {}", path.display());
    Ok(())
}

/// 运行结束后导出: 逐项执行, 失败只记录日志, 返回失败数
pub fn export_reports(
    summary: &Summary,
    actual_duration: Duration,
    started_at: &DateTime<Local>,
    csv_dir: Option<&Path>,
    json_path: Option<&Path>,
) -> usize {
    let mut failed = 0;
    if let Some(dir) = csv_dir {
        if let Err(e) = export_csv(summary, actual_duration, started_at, dir) {
            error!("❌ CSV 导出失败: {:#}", e);
            failed += 1;
        }
    }
    if let Some(path) = json_path {
        if let Err(e) = export_json(summary, path) {
            error!("❌ JSON 导出失败: {:#}", e);
            failed += 1;
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BBox, Detection, ObjectTracker, TrackerConfig};
    use chrono::TimeZone;

    fn sample_summary() -> Summary {
        let mut tracker = ObjectTracker::new(TrackerConfig::default());
        let car = Detection::new(BBox::new(0.0, 0.0, 100.0, 100.0), "car");
        let dog = Detection::new(BBox::new(300.0, 0.0, 350.0, 50.0), "dog");
        tracker.update(&[car.clone()], 0.0);
        tracker.update(&[car.clone(), dog.clone()], 1.25);
        tracker.update(&[car, dog], 3.5);
        Summary::from_tracker(&tracker)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dwell-report-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_file_name_format() {
        let t = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 10).unwrap();
        assert_eq!(report_file_name(&t), "Summary_Results_2024-05-01_13-45-10.csv");
    }

    #[test]
    fn test_csv_layout() {
        let dir = scratch_dir("csv");
        let _ = fs::remove_dir_all(&dir);
        let t = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 10).unwrap();

        let path = export_csv(&sample_summary(), Duration::from_millis(61_234), &t, &dir).unwrap();
        assert!(path.ends_with("Summary_Results_2024-05-01_13-45-10.csv"));

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "Object Type,Object ID,First Seen (s),Last Seen (s),Total Time in Frame (s)"
        );
        assert_eq!(lines[1], "car,1,0.00,3.50,3.50");
        assert_eq!(lines[2], "dog,2,1.25,3.50,2.25");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "Total Detection Duration (s),61.23");
        assert_eq!(lines.len(), 5);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_json_export() {
        let dir = scratch_dir("json");
        let path = dir.join("summary.json");
        export_json(&sample_summary(), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["labels"][1]["label"], "dog");
        assert_eq!(value["labels"][0]["stats"]["objects"], 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_failed_csv_does_not_skip_json() {
        let dir = scratch_dir("partial");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        // 报表目录位置被普通文件占用, CSV 无法写入
        let blocked = dir.join("reports");
        fs::write(&blocked, "not a directory").unwrap();
        let json = dir.join("summary.json");
        let t = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 10).unwrap();

        let failed = export_reports(
            &sample_summary(),
            Duration::from_secs(5),
            &t,
            Some(&blocked),
            Some(&json),
        );
        assert_eq!(failed, 1);
        assert!(json.exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
