// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem discovery of bundle groups.
//!
//! Discovery walks a directory tree iteratively with an explicit depth
//! counter, records bundle directories without descending into them, and
//! optionally merges sibling bundles into one logical group.

use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeMap, fs, time::SystemTime};

/// The directory extension that marks a test-result bundle.
pub const BUNDLE_EXTENSION: &str = "xcresult";

/// A set of one or more bundle locations representing one logical test run.
///
/// Multiple locations occur when results from several destinations are
/// merged. Identity is the exact set of locations: two groups are the same
/// run iff their location sets are equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleGroup {
    /// Sorted, deduplicated, non-empty.
    locations: Vec<Utf8PathBuf>,
}

impl BundleGroup {
    /// Creates a group from the given locations. Returns `None` if the
    /// iterator is empty.
    pub fn new(locations: impl IntoIterator<Item = Utf8PathBuf>) -> Option<Self> {
        let mut locations: Vec<_> = locations.into_iter().collect();
        locations.sort();
        locations.dedup();
        if locations.is_empty() {
            None
        } else {
            Some(Self { locations })
        }
    }

    /// Returns the locations in this group, sorted.
    pub fn locations(&self) -> &[Utf8PathBuf] {
        &self.locations
    }

    /// Returns the lexicographically-last location.
    ///
    /// Used as the deterministic choice when one location must stand for
    /// the whole group (e.g. reading run metadata).
    pub fn latest_location(&self) -> &Utf8Path {
        self.locations
            .last()
            .expect("bundle group is never empty")
            .as_path()
    }

    /// Returns the directory the group's cache artifact lives beside: the
    /// shared parent of a merged group, or the single bundle's parent.
    ///
    /// Falls back to the location itself for a bundle at the filesystem
    /// root.
    pub fn cache_parent(&self) -> &Utf8Path {
        let latest = self.latest_location();
        latest.parent().unwrap_or(latest)
    }

    /// Returns true if this group covers exactly the given location set.
    pub fn matches_locations(&self, locations: &[Utf8PathBuf]) -> bool {
        // Self is sorted and deduplicated; normalize the other side.
        let mut theirs: Vec<_> = locations.iter().map(|l| l.as_path()).collect();
        theirs.sort();
        theirs.dedup();
        self.locations.len() == theirs.len()
            && self.locations.iter().zip(&theirs).all(|(a, b)| a == b)
    }
}

/// Scans `root` for bundle directories, up to `depth` levels deep.
///
/// A directory with the [`BUNDLE_EXTENSION`] extension is recorded as a
/// bundle and not descended into. `depth == 0` yields nothing. Unreadable
/// directories are skipped. With `merge`, bundles sharing an immediate
/// parent directory form a single group; otherwise each bundle is its own
/// group. Return order is unspecified; use [`sorted_by_parent_created`]
/// for freshness ordering.
pub fn discover(root: &Utf8Path, depth: u32, merge: bool) -> Vec<BundleGroup> {
    if depth == 0 {
        return Vec::new();
    }

    let mut bundles = Vec::new();
    if is_bundle_dir(root) {
        bundles.push(root.to_owned());
    } else {
        // Stack entries carry the depth of the directory's children.
        let mut stack = vec![(root.to_owned(), 1u32)];
        while let Some((dir, child_depth)) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::debug!("skipping unreadable directory `{dir}`: {error}");
                    continue;
                }
            };
            for entry in entries {
                let Ok(entry) = entry else { continue };
                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                    tracing::debug!("skipping non-UTF-8 path under `{dir}`");
                    continue;
                };
                if is_bundle_dir(&path) {
                    bundles.push(path);
                } else if child_depth < depth {
                    stack.push((path, child_depth + 1));
                }
            }
        }
    }

    if merge {
        let mut by_parent: BTreeMap<Utf8PathBuf, Vec<Utf8PathBuf>> = BTreeMap::new();
        for bundle in bundles {
            let parent = bundle
                .parent()
                .map(Utf8Path::to_owned)
                .unwrap_or_else(|| bundle.clone());
            by_parent.entry(parent).or_default().push(bundle);
        }
        by_parent
            .into_values()
            .filter_map(BundleGroup::new)
            .collect()
    } else {
        bundles
            .into_iter()
            .filter_map(|bundle| BundleGroup::new([bundle]))
            .collect()
    }
}

/// Sorts groups by the creation time of each group's parent directory,
/// newest first. Best-effort: groups whose parent metadata cannot be read
/// sort last.
pub fn sorted_by_parent_created(mut groups: Vec<BundleGroup>) -> Vec<BundleGroup> {
    fn parent_created(group: &BundleGroup) -> Option<SystemTime> {
        fs::metadata(group.cache_parent())
            .and_then(|meta| meta.created())
            .ok()
    }

    groups.sort_by(|a, b| parent_created(b).cmp(&parent_created(a)));
    groups
}

fn is_bundle_dir(path: &Utf8Path) -> bool {
    path.extension() == Some(BUNDLE_EXTENSION)
}
