//! 进程内计数器与 Prometheus 文本导出

use std::sync::atomic::{AtomicU64, Ordering};

use crate::database::Database;

static HTTP_REQUESTS: AtomicU64 = AtomicU64::new(0);
static GRADING_REQUESTS: AtomicU64 = AtomicU64::new(0);
static GRADING_FAILURES: AtomicU64 = AtomicU64::new(0);
static EXTRACTION_FAILURES: AtomicU64 = AtomicU64::new(0);
static RATIONALE_REQUESTS: AtomicU64 = AtomicU64::new(0);
static GRADED_TESTS_SAVED: AtomicU64 = AtomicU64::new(0);
static GRADED_TESTS_DELETED: AtomicU64 = AtomicU64::new(0);

pub fn record_http_request() {
    HTTP_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_grading_request() {
    GRADING_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_grading_failure() {
    GRADING_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_extraction_failure() {
    EXTRACTION_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_rationale_request() {
    RATIONALE_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_graded_test_saved() {
    GRADED_TESTS_SAVED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_graded_tests_deleted(count: u64) {
    GRADED_TESTS_DELETED.fetch_add(count, Ordering::Relaxed);
}

fn push_metric(out: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} {}\n", name, kind));
    out.push_str(&format!("{} {}\n", name, value));
}

/// 导出 Prometheus 文本格式；传入数据库时附带已存记录数
pub fn export_prometheus_metrics(db: Option<&Database>) -> String {
    let mut metrics = String::new();

    let counters: [(&str, &str, &AtomicU64); 7] = [
        (
            "gradewise_http_requests_total",
            "HTTP requests received",
            &HTTP_REQUESTS,
        ),
        (
            "gradewise_grading_requests_total",
            "Grading submissions received",
            &GRADING_REQUESTS,
        ),
        (
            "gradewise_grading_failures_total",
            "Grading submissions that ended in an error",
            &GRADING_FAILURES,
        ),
        (
            "gradewise_extraction_failures_total",
            "Uploaded files whose text could not be extracted",
            &EXTRACTION_FAILURES,
        ),
        (
            "gradewise_rationale_requests_total",
            "Grading rationale requests",
            &RATIONALE_REQUESTS,
        ),
        (
            "gradewise_graded_tests_saved_total",
            "Finalized graded tests saved",
            &GRADED_TESTS_SAVED,
        ),
        (
            "gradewise_graded_tests_deleted_total",
            "Graded tests deleted",
            &GRADED_TESTS_DELETED,
        ),
    ];
    for (name, help, counter) in counters {
        push_metric(
            &mut metrics,
            name,
            "counter",
            help,
            counter.load(Ordering::Relaxed),
        );
    }

    if let Some(db) = db {
        match crate::database::GradedTestRepo::count_all(db) {
            Ok(total) => push_metric(
                &mut metrics,
                "gradewise_graded_tests_stored",
                "gauge",
                "Graded tests currently stored",
                total as u64,
            ),
            Err(e) => {
                metrics.push_str("# HELP gradewise_database_error Database health error\n");
                metrics.push_str("# TYPE gradewise_database_error gauge\n");
                metrics.push_str(&format!("gradewise_database_error 1\n# error: {}\n", e));
            }
        }
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_help_and_type_lines() {
        record_grading_request();
        let text = export_prometheus_metrics(None);
        assert!(text.contains("# HELP gradewise_grading_requests_total"));
        assert!(text.contains("# TYPE gradewise_grading_requests_total counter"));
        let line = text
            .lines()
            .find(|l| l.starts_with("gradewise_grading_requests_total "))
            .unwrap();
        let value: u64 = line.split(' ').nth(1).unwrap().parse().unwrap();
        assert!(value >= 1);
        assert!(!text.contains("gradewise_graded_tests_stored"));
    }
}
