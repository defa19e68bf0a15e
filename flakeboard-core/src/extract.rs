// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extraction of test records from bundle groups.
//!
//! The extractor turns one bundle group into a classified
//! [`ResultSet`]. Per-location work runs concurrently, bounded by the
//! extractor's I/O limit; contributions are merged into one accumulator
//! under a short mutex section so no record is lost or duplicated.
//!
//! Every failure mode here is skippable: an unreadable bundle, an
//! ambiguous set of summaries or an unknown test status reduces what gets
//! extracted, and a group with zero extracted records produces no result
//! set at all.

use crate::{
    classify::classify,
    discovery::BundleGroup,
    invocation_cache::InvocationCache,
    reader::{ActionRecord, BundleReader, InvocationRecord, SessionLogKind, TestPlanGroup,
        TestPlanRunSummary},
};
use camino::Utf8Path;
use flakeboard_metadata::{ResultSet, RunMetadata, TestRecord, TestStatus};
use futures::StreamExt;
use itertools::Itertools;
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};

/// The substring that marks a crash in a failure message. Matches at the
/// start of a message as well as mid-message.
pub const CRASH_NEEDLE: &str = "crashed in ";

/// Turns bundle groups into result sets using a [`BundleReader`] and an
/// [`InvocationCache`].
pub struct Extractor {
    reader: Arc<dyn BundleReader>,
    invocation_cache: Arc<InvocationCache>,
    io_limit: usize,
}

/// Merged contributions from all locations in a group.
#[derive(Debug, Default)]
struct Accumulator {
    tests: Vec<TestRecord>,
    destinations: BTreeSet<String>,
    crash_count: usize,
}

impl Extractor {
    /// Creates an extractor. `io_limit` bounds how many bundle-reader calls
    /// run concurrently (minimum 1).
    pub fn new(
        reader: Arc<dyn BundleReader>,
        invocation_cache: Arc<InvocationCache>,
        io_limit: usize,
    ) -> Self {
        Self {
            reader,
            invocation_cache,
            io_limit: io_limit.max(1),
        }
    }

    /// Extracts and classifies one bundle group.
    ///
    /// Returns `None` when zero test records were extracted across all
    /// locations, or when the run's unique metadata cannot be obtained.
    pub async fn extract(&self, group: &BundleGroup) -> Option<ResultSet> {
        let accumulator = Mutex::new(Accumulator::default());
        {
            // Must be collected eagerly: a lazily-mapped stream makes the
            // enclosing future non-spawnable.
            let location_futures: Vec<_> = group
                .locations()
                .iter()
                .map(|location| self.extract_location(location, &accumulator))
                .collect();
            let mut stream =
                futures::stream::iter(location_futures).buffer_unordered(self.io_limit);
            while stream.next().await.is_some() {}
        }

        let Accumulator {
            tests,
            destinations,
            crash_count,
        } = accumulator
            .into_inner()
            .expect("extraction accumulator lock poisoned");

        if tests.is_empty() {
            tracing::debug!(
                "group at `{}` produced no test records",
                group.latest_location()
            );
            return None;
        }

        // The set identifier comes from the run's own metadata, read from
        // the lexicographically-last location for reproducibility.
        let metadata_location = group.latest_location();
        let invocation = self.invocation_record(metadata_location).await?;
        let Some(metadata_ref) = invocation.metadata_ref.as_deref() else {
            tracing::warn!("bundle at `{metadata_location}` has no metadata reference; skipping group");
            return None;
        };
        let bundle_metadata = match self
            .reader
            .bundle_metadata(metadata_location, metadata_ref)
            .await
        {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!(
                    "failed to read metadata for bundle at `{metadata_location}`: {error}"
                );
                return None;
            }
        };

        let run_metadata = RunMetadata {
            branch: bundle_metadata.branch,
            commit: bundle_metadata.commit,
            custom: bundle_metadata.custom,
        };

        let date = tests.iter().map(|t| t.started_at).min()?;
        let total_execution_time: Duration = tests.iter().map(|t| t.duration).sum();
        let destinations = destinations.iter().join(", ");
        let classification = classify(&tests);

        Some(ResultSet {
            identifier: bundle_metadata.unique_identifier,
            source_locations: group.locations().to_vec(),
            date,
            total_execution_time,
            destinations,
            tests,
            passed: classification.passed,
            uniquely_failed: classification.uniquely_failed,
            passed_on_retry: classification.passed_on_retry,
            failed_but_retried: classification.failed_but_retried,
            repeated_groups: classification.repeated_groups,
            crash_count,
            metadata: (!run_metadata.is_empty()).then_some(run_metadata),
        })
    }

    /// Extracts one location and merges its contribution into the
    /// accumulator.
    async fn extract_location(&self, location: &Utf8Path, accumulator: &Mutex<Accumulator>) {
        let Some(invocation) = self.invocation_record(location).await else {
            // Unreadable bundle: this location contributes nothing.
            return;
        };

        let crash_count = count_crashes(invocation.issues.iter().map(|issue| issue.message.as_str()));

        let mut tests = Vec::new();
        let mut destinations = BTreeSet::new();
        for action in &invocation.actions {
            destinations.insert(action.destination.display_model());
            let Some(tests_ref) = action.tests_ref.as_deref() else {
                continue;
            };
            let summaries = match self.reader.test_plan_summaries(location, tests_ref).await {
                Ok(summaries) => summaries,
                Err(error) => {
                    tracing::warn!(
                        "failed to read test-plan summaries for `{tests_ref}` at `{location}`: {error}"
                    );
                    continue;
                }
            };
            if summaries.len() > 1 {
                // Ambiguous: no way to tell which summary is authoritative.
                tracing::warn!(
                    "reference `{tests_ref}` at `{location}` yielded {} summaries; skipping action",
                    summaries.len()
                );
                continue;
            }
            let Some(summary) = summaries.into_iter().next() else {
                continue;
            };
            flatten_summary(&summary, action, location, &mut tests);
        }

        let mut guard = accumulator
            .lock()
            .expect("extraction accumulator lock poisoned");
        guard.tests.extend(tests);
        guard.destinations.extend(destinations);
        guard.crash_count += crash_count;
    }

    /// Returns the invocation record for a location, via the cache when
    /// possible. A read failure is logged and yields `None`.
    async fn invocation_record(&self, location: &Utf8Path) -> Option<Arc<InvocationRecord>> {
        if let Some(record) = self.invocation_cache.get(location) {
            return Some(record);
        }
        match self.reader.invocation_record(location).await {
            Ok(record) => {
                let record = Arc::new(record);
                self.invocation_cache
                    .insert(location.to_owned(), Arc::clone(&record));
                Some(record)
            }
            Err(error) => {
                tracing::warn!("failed to read invocation record at `{location}`: {error}");
                None
            }
        }
    }

    /// Counts crashes by scanning each record's session logs.
    ///
    /// This is the thorough alternative to the default issue-message
    /// heuristic. It is not wired into [`Extractor::extract`]; callers that
    /// want exhaustive crash detection invoke it separately.
    pub async fn crash_count_from_session_logs(&self, tests: &[TestRecord]) -> usize {
        let mut count = 0;
        for record in tests {
            let Some(diagnostics_ref) = record.diagnostics_ref.as_deref() else {
                continue;
            };
            match self
                .reader
                .session_logs(
                    &record.bundle_location,
                    diagnostics_ref,
                    &[SessionLogKind::Session],
                )
                .await
            {
                Ok(logs) => {
                    count += logs
                        .values()
                        .map(|log| log.matches(CRASH_NEEDLE).count())
                        .sum::<usize>();
                }
                Err(error) => {
                    tracing::debug!(
                        "no session logs for `{}` at `{}`: {error}",
                        record.test_name,
                        record.bundle_location
                    );
                }
            }
        }
        count
    }
}

/// Counts occurrences of [`CRASH_NEEDLE`] across failure messages.
fn count_crashes<'a>(messages: impl Iterator<Item = &'a str>) -> usize {
    messages
        .map(|message| message.matches(CRASH_NEEDLE).count())
        .sum()
}

fn flatten_summary(
    summary: &TestPlanRunSummary,
    action: &ActionRecord,
    location: &Utf8Path,
    out: &mut Vec<TestRecord>,
) {
    let mut path = Vec::new();
    for group in &summary.groups {
        flatten_group(&summary.name, group, &mut path, action, location, out);
    }
}

/// Recursively flattens a group tree into test records. `path` carries the
/// group names from the root down to (and including) the current group.
fn flatten_group(
    target: &str,
    group: &TestPlanGroup,
    path: &mut Vec<String>,
    action: &ActionRecord,
    location: &Utf8Path,
    out: &mut Vec<TestRecord>,
) {
    path.push(group.name.clone());
    let group_path = path.join("/");
    for test in &group.tests {
        let status = match test.status.parse::<TestStatus>() {
            Ok(status) => status,
            Err(error) => {
                // Unknown status: drop this record, not the extraction.
                tracing::debug!("dropping test `{}` at `{location}`: {error}", test.name);
                continue;
            }
        };
        out.push(TestRecord {
            identifier: TestRecord::compute_identifier(location, &test.summary_ref),
            route_identifier: TestRecord::compute_route_identifier(
                target,
                &group_path,
                &test.name,
                &action.destination.model,
                &action.destination.os_version,
            ),
            target_name: target.to_owned(),
            group_name: group.name.clone(),
            test_name: test.name.clone(),
            device: action.destination.clone(),
            started_at: test.started_at.unwrap_or(action.started_at),
            duration: test.duration,
            status,
            summary_ref: test.summary_ref.clone(),
            diagnostics_ref: test.diagnostics_ref.clone(),
            bundle_location: location.to_owned(),
        });
    }
    for subgroup in &group.subgroups {
        flatten_group(target, subgroup, path, action, location, out);
    }
    path.pop();
}
