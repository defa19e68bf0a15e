// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Windowed statistics over recent test executions.
//!
//! A window is the N most recent records matching the given filters,
//! collected across result sets in date-descending order. The same window
//! backs all three framings; [`StatisticsKind`] only changes the ordering.

use flakeboard_metadata::{ResultSet, StatisticsKind, TestRecord, TestStatistics};
use std::{cmp::Ordering, collections::BTreeMap, sync::Arc, time::Duration};

/// Computes statistics over the `window_size` most recent records matching
/// `target` and `device` (either filter may be omitted).
///
/// `result_sets` must be sorted by date descending, which is the store's
/// standing invariant. Within a set, records are visited newest first.
/// Ties in the requested ordering break by test name ascending.
pub fn statistics(
    result_sets: &[Arc<ResultSet>],
    target: Option<&str>,
    device: Option<&str>,
    kind: StatisticsKind,
    window_size: usize,
) -> Vec<TestStatistics> {
    if window_size == 0 {
        return Vec::new();
    }

    let mut window: Vec<&TestRecord> = Vec::new();
    'sets: for set in result_sets {
        let mut records: Vec<&TestRecord> = set.tests.iter().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        for record in records {
            if let Some(target) = target
                && record.target_name != target
            {
                continue;
            }
            if let Some(device) = device
                && record.device.display_model() != device
            {
                continue;
            }
            window.push(record);
            if window.len() == window_size {
                break 'sets;
            }
        }
    }

    let mut by_route: BTreeMap<&str, Vec<&TestRecord>> = BTreeMap::new();
    for record in window {
        by_route
            .entry(record.route_identifier.as_str())
            .or_default()
            .push(record);
    }

    let mut stats: Vec<TestStatistics> = by_route.into_values().map(aggregate).collect();
    match kind {
        StatisticsKind::Flaky => stats.sort_by(|a, b| {
            b.failure_ratio()
                .partial_cmp(&a.failure_ratio())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.test_name.cmp(&b.test_name))
        }),
        StatisticsKind::Slowest => stats.sort_by(|a, b| {
            b.average_duration
                .cmp(&a.average_duration)
                .then_with(|| a.test_name.cmp(&b.test_name))
        }),
        StatisticsKind::Fastest => stats.sort_by(|a, b| {
            a.average_duration
                .cmp(&b.average_duration)
                .then_with(|| a.test_name.cmp(&b.test_name))
        }),
    }
    stats
}

/// Aggregates one route's window slice. `records` is never empty.
fn aggregate(records: Vec<&TestRecord>) -> TestStatistics {
    let first = records[0];
    let execution_count = records.len();
    let failure_count = records.iter().filter(|r| !r.status.is_success()).count();
    let total: Duration = records.iter().map(|r| r.duration).sum();
    let longest = records.iter().map(|r| r.duration).max().unwrap_or_default();
    let shortest = records.iter().map(|r| r.duration).min().unwrap_or_default();

    TestStatistics {
        route_identifier: first.route_identifier.clone(),
        target_name: first.target_name.clone(),
        group_name: first.group_name.clone(),
        test_name: first.test_name.clone(),
        device_model: first.device.model.clone(),
        device_os: first.device.os_version.clone(),
        execution_count,
        failure_count,
        average_duration: total / execution_count as u32,
        longest_duration: longest,
        shortest_duration: shortest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flakeboard_metadata::{DeviceDescriptor, TestStatus};

    fn record(
        name: &str,
        status: TestStatus,
        day: u32,
        duration_ms: u64,
        target: &str,
    ) -> TestRecord {
        let device = DeviceDescriptor {
            name: "iPhone 14".to_owned(),
            model: "iPhone 14".to_owned(),
            os_version: "17.0".to_owned(),
            identifier: "device-1".to_owned(),
        };
        TestRecord {
            identifier: format!("{name}-{day}-{duration_ms}"),
            route_identifier: TestRecord::compute_route_identifier(
                target,
                "Suite",
                name,
                &device.model,
                &device.os_version,
            ),
            target_name: target.to_owned(),
            group_name: "Suite".to_owned(),
            test_name: name.to_owned(),
            device,
            started_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            duration: Duration::from_millis(duration_ms),
            status,
            summary_ref: format!("summary-{name}-{day}"),
            diagnostics_ref: None,
            bundle_location: "/runs/a.xcresult".into(),
        }
    }

    fn result_set(day: u32, tests: Vec<TestRecord>) -> Arc<ResultSet> {
        Arc::new(ResultSet {
            identifier: format!("run-{day}"),
            source_locations: vec![format!("/runs/{day}.xcresult").into()],
            date: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            total_execution_time: tests.iter().map(|t| t.duration).sum(),
            destinations: "iPhone 14 (17.0)".to_owned(),
            tests,
            passed: Vec::new(),
            uniquely_failed: Vec::new(),
            passed_on_retry: Vec::new(),
            failed_but_retried: Vec::new(),
            repeated_groups: Vec::new(),
            crash_count: 0,
            metadata: None,
        })
    }

    fn sample_sets() -> Vec<Arc<ResultSet>> {
        // Date descending, as the store guarantees.
        vec![
            result_set(
                20,
                vec![
                    record("testFlaky", TestStatus::Failure, 20, 1000, "AppTests"),
                    record("testSteady", TestStatus::Success, 20, 200, "AppTests"),
                ],
            ),
            result_set(
                10,
                vec![
                    record("testFlaky", TestStatus::Success, 10, 3000, "AppTests"),
                    record("testSteady", TestStatus::Success, 10, 400, "AppTests"),
                    record("testOther", TestStatus::Success, 10, 100, "OtherTests"),
                ],
            ),
        ]
    }

    #[test]
    fn flaky_ordering_puts_failures_first() {
        let stats = statistics(&sample_sets(), None, None, StatisticsKind::Flaky, 100);
        assert_eq!(stats.len(), 3);
        assert_eq!(stats[0].test_name, "testFlaky");
        assert_eq!(stats[0].execution_count, 2);
        assert_eq!(stats[0].failure_count, 1);
        assert_eq!(stats[0].failure_ratio(), 0.5);
        // Equal ratios (both zero) break by name.
        assert_eq!(stats[1].test_name, "testOther");
        assert_eq!(stats[2].test_name, "testSteady");
    }

    #[test]
    fn slowest_and_fastest_are_mirror_orders() {
        let slowest = statistics(&sample_sets(), None, None, StatisticsKind::Slowest, 100);
        let fastest = statistics(&sample_sets(), None, None, StatisticsKind::Fastest, 100);

        assert_eq!(slowest[0].test_name, "testFlaky");
        assert_eq!(slowest[0].average_duration, Duration::from_millis(2000));
        assert_eq!(slowest[0].longest_duration, Duration::from_millis(3000));
        assert_eq!(slowest[0].shortest_duration, Duration::from_millis(1000));

        let forward: Vec<&str> = slowest.iter().map(|s| s.test_name.as_str()).collect();
        let mut backward: Vec<&str> = fastest.iter().map(|s| s.test_name.as_str()).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn target_filter_limits_the_window() {
        let stats = statistics(
            &sample_sets(),
            Some("OtherTests"),
            None,
            StatisticsKind::Flaky,
            100,
        );
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].test_name, "testOther");
    }

    #[test]
    fn device_filter_matches_display_model() {
        let stats = statistics(
            &sample_sets(),
            None,
            Some("iPad Pro (17.0)"),
            StatisticsKind::Flaky,
            100,
        );
        assert!(stats.is_empty());

        let stats = statistics(
            &sample_sets(),
            None,
            Some("iPhone 14 (17.0)"),
            StatisticsKind::Flaky,
            100,
        );
        assert_eq!(stats.len(), 3);
    }

    #[test]
    fn window_size_takes_most_recent_records() {
        // Window of 2 covers only the newest result set, so testFlaky has a
        // single (failed) execution in it.
        let stats = statistics(&sample_sets(), None, None, StatisticsKind::Flaky, 2);
        let flaky = stats.iter().find(|s| s.test_name == "testFlaky").unwrap();
        assert_eq!(flaky.execution_count, 1);
        assert_eq!(flaky.failure_count, 1);
        assert_eq!(flaky.failure_ratio(), 1.0);
    }

    #[test]
    fn zero_window_is_empty() {
        assert!(statistics(&sample_sets(), None, None, StatisticsKind::Flaky, 0).is_empty());
    }
}
