// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classification of test records into outcome views.
//!
//! [`classify`] is a pure function: given the same record list it always
//! produces the same partition. Records are grouped by their retry key
//! (group name, test name, device model, device OS); groups of size one
//! are plain passes or unique failures, larger groups are retries.

use flakeboard_metadata::{RetryKey, TestRecord};
use std::collections::BTreeMap;

/// The outcome views derived from a flat record list.
///
/// `passed` and `failed` are umbrella views; `uniquely_failed`,
/// `passed_on_retry` and `failed_but_retried` are mutually exclusive
/// refinements (no record appears in more than one of them).
#[derive(Clone, Debug, Default)]
pub struct Classification {
    /// Every successful execution, including successes on retry.
    pub passed: Vec<TestRecord>,
    /// Every failed execution.
    pub failed: Vec<TestRecord>,
    /// One record per retry key whose every execution failed.
    pub uniquely_failed: Vec<TestRecord>,
    /// The first success of each retried test that eventually passed.
    pub passed_on_retry: Vec<TestRecord>,
    /// The failed executions of retried tests that eventually passed.
    pub failed_but_retried: Vec<TestRecord>,
    /// Retry keys with more than one execution.
    pub repeated_groups: Vec<RetryKey>,
}

/// Partitions `tests` per the retry-key rules.
///
/// Ordering is made deterministic by a stable sort on
/// `(test_name, started_at)` ascending before grouping, so "first success"
/// always means the earliest one.
pub fn classify(tests: &[TestRecord]) -> Classification {
    let mut sorted: Vec<&TestRecord> = tests.iter().collect();
    sorted.sort_by(|a, b| {
        (a.test_name.as_str(), a.started_at).cmp(&(b.test_name.as_str(), b.started_at))
    });

    let mut groups: BTreeMap<RetryKey, Vec<&TestRecord>> = BTreeMap::new();
    for record in sorted {
        groups.entry(record.retry_key()).or_default().push(record);
    }

    let mut classification = Classification::default();
    for (key, records) in groups {
        if let [only] = records.as_slice() {
            if only.status.is_success() {
                classification.passed.push((*only).clone());
            } else {
                classification.failed.push((*only).clone());
                classification.uniquely_failed.push((*only).clone());
            }
            continue;
        }

        classification.repeated_groups.push(key);
        let first_success = records.iter().find(|r| r.status.is_success());
        match first_success {
            Some(first_success) => {
                classification.passed_on_retry.push((*first_success).clone());
                for record in &records {
                    if record.status.is_success() {
                        classification.passed.push((*record).clone());
                    } else {
                        classification.failed.push((*record).clone());
                        classification.failed_but_retried.push((*record).clone());
                    }
                }
            }
            None => {
                // Every execution failed: one representative in
                // uniquely_failed, all of them in failed.
                classification.uniquely_failed.push(records[0].clone());
                for record in &records {
                    classification.failed.push((*record).clone());
                }
            }
        }
    }

    classification
}
