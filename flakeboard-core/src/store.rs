// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The shared result store and its parse state machine.
//!
//! [`ResultStore`] is the one piece of shared mutable state in the
//! pipeline and the only component external callers touch directly. It is
//! constructed explicitly at process start and shared by `Arc`; readers
//! take a read lock (never blocking other readers), writers take the
//! write lock for the duration of one mutation, and every mutation leaves
//! the result-set list sorted by date descending.
//!
//! A parse pass is fire-and-forget: [`ResultStore::parse`] returns the
//! initial progress immediately and runs the pipeline on a background
//! task, appending result sets incrementally so partial progress is
//! visible to readers throughout. Triggering `parse` while a pass is
//! already running is a no-op that reports current progress.

use crate::{
    discovery::{self, BundleGroup},
    disk_cache,
    extract::Extractor,
    invocation_cache::InvocationCache,
    reader::BundleReader,
    stats,
};
use camino::{Utf8Path, Utf8PathBuf};
use flakeboard_metadata::{ProgressState, ResultSet, StatisticsKind, TestRecord, TestStatistics};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Configuration for parse passes.
#[derive(Clone, Copy, Debug)]
pub struct ParseSettings {
    /// Maximum discovery depth below the root.
    pub depth: u32,
    /// Whether sibling bundles merge into one logical run.
    pub merge: bool,
    /// Bound on concurrent bundle-reader calls within a group.
    pub io_limit: usize,
}

impl Default for ParseSettings {
    fn default() -> Self {
        Self {
            depth: 3,
            merge: false,
            io_limit: 4,
        }
    }
}

/// A discovered group that has not been ingested yet.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PendingGroup {
    /// The result-set identifier, when resolvable from the disk cache
    /// without extraction.
    pub identifier: Option<String>,
    /// The group's bundle locations.
    pub source_locations: Vec<Utf8PathBuf>,
}

#[derive(Debug)]
struct StoreInner {
    /// Sorted by date descending at all times.
    result_sets: Vec<Arc<ResultSet>>,
    progress: ProgressState,
}

/// The concurrency-safe holder of all known result sets and the global
/// progress state machine.
pub struct ResultStore {
    inner: RwLock<StoreInner>,
    extractor: Extractor,
    settings: ParseSettings,
}

impl ResultStore {
    /// Creates a store that extracts through `reader`.
    pub fn new(reader: Arc<dyn BundleReader>, settings: ParseSettings) -> Self {
        let extractor = Extractor::new(
            reader,
            Arc::new(InvocationCache::with_default_capacity()),
            settings.io_limit,
        );
        Self {
            inner: RwLock::new(StoreInner {
                result_sets: Vec::new(),
                progress: ProgressState::Ready,
            }),
            extractor,
            settings,
        }
    }

    /// Returns the current progress state.
    pub fn progress(&self) -> ProgressState {
        self.read().progress
    }

    /// Returns a snapshot of all result sets, sorted by date descending.
    pub fn result_sets(&self) -> Vec<Arc<ResultSet>> {
        self.read().result_sets.clone()
    }

    /// Returns the result set with the given identifier.
    pub fn result_set(&self, identifier: &str) -> Option<Arc<ResultSet>> {
        self.read()
            .result_sets
            .iter()
            .find(|set| set.identifier == identifier)
            .cloned()
    }

    /// Returns the test record with the given identifier, searching all
    /// result sets.
    pub fn test(&self, identifier: &str) -> Option<TestRecord> {
        self.read()
            .result_sets
            .iter()
            .flat_map(|set| set.tests.iter())
            .find(|test| test.identifier == identifier)
            .cloned()
    }

    /// Clears all result sets and returns to [`ProgressState::Ready`],
    /// atomically with respect to readers.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.result_sets.clear();
        inner.progress = ProgressState::Ready;
    }

    /// Triggers a parse pass under `root` and returns immediately with the
    /// initial (or, if a pass is already running, the current) progress.
    ///
    /// Single-flight: the check and the transition to `Parsing` happen
    /// under one write lock, so two racing triggers cannot both start a
    /// pass.
    pub fn parse(self: &Arc<Self>, root: &Utf8Path) -> ProgressState {
        {
            let mut inner = self.write();
            if inner.progress.is_parsing() {
                tracing::debug!("parse already running; reporting current progress");
                return inner.progress;
            }
            inner.progress = ProgressState::Parsing { fraction: 0.0 };
        }

        let store = Arc::clone(self);
        let root = root.to_owned();
        tokio::spawn(async move {
            store.run_parse(&root).await;
        });

        ProgressState::Parsing { fraction: 0.0 }
    }

    /// Runs one parse pass to completion. Failures only reduce what gets
    /// ingested; the pass itself always ends in `Ready`.
    pub(crate) async fn run_parse(&self, root: &Utf8Path) {
        let groups = discovery::discover(root, self.settings.depth, self.settings.merge);
        let pending: Vec<BundleGroup> = groups
            .into_iter()
            .filter(|group| !self.contains_locations(group.locations()))
            .collect();
        let total = pending.len();
        tracing::debug!("parse pass under `{root}`: {total} pending groups");

        let mut completed = 0;
        let mut to_extract = Vec::new();
        // Fast path: adopt every cache hit before any extraction work.
        for group in pending {
            match disk_cache::read(&group) {
                Some(set) => {
                    self.append(Arc::new(set));
                    completed += 1;
                    self.update_progress(completed, total);
                }
                None => to_extract.push(group),
            }
        }

        for group in to_extract {
            if let Some(set) = self.extractor.extract(&group).await {
                let set = Arc::new(set);
                disk_cache::write(&group, &set);
                self.append(set);
            }
            // Skipped groups still count toward completion.
            completed += 1;
            self.update_progress(completed, total);
        }

        self.write().progress = ProgressState::Ready;
    }

    /// Lists discovered groups not yet in the store. Usable mid-parse.
    pub fn discover_pending(&self, root: &Utf8Path) -> Vec<PendingGroup> {
        discovery::discover(root, self.settings.depth, self.settings.merge)
            .into_iter()
            .filter(|group| !self.contains_locations(group.locations()))
            .map(|group| PendingGroup {
                identifier: disk_cache::read(&group).map(|set| set.identifier),
                source_locations: group.locations().to_vec(),
            })
            .collect()
    }

    /// Computes windowed statistics over the store's current snapshot.
    pub fn statistics(
        &self,
        target: Option<&str>,
        device: Option<&str>,
        kind: StatisticsKind,
        window_size: usize,
    ) -> Vec<TestStatistics> {
        let sets = self.result_sets();
        stats::statistics(&sets, target, device, kind, window_size)
    }

    /// Returns true if a result set with exactly this location set is
    /// already in the store.
    fn contains_locations(&self, locations: &[Utf8PathBuf]) -> bool {
        self.read()
            .result_sets
            .iter()
            .any(|set| set.matches_locations(locations))
    }

    /// Appends a result set and re-sorts, as one atomic mutation. Appending
    /// a location set that is already present is a no-op, which makes parse
    /// passes idempotent.
    fn append(&self, set: Arc<ResultSet>) {
        let mut inner = self.write();
        if inner
            .result_sets
            .iter()
            .any(|existing| existing.matches_locations(&set.source_locations))
        {
            return;
        }
        inner.result_sets.push(set);
        inner.result_sets.sort_by(|a, b| b.date.cmp(&a.date));
    }

    fn update_progress(&self, completed: usize, total: usize) {
        let fraction = if total == 0 {
            1.0
        } else {
            completed as f64 / total as f64
        };
        self.write().progress = ProgressState::Parsing { fraction };
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().expect("result store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().expect("result store lock poisoned")
    }
}
