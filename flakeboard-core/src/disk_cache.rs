// Copyright (c) The flakeboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence of result sets beside their source bundles.
//!
//! One artifact per bundle group, stored in a hidden subfolder of the
//! group's parent directory. The artifact is implicitly keyed by
//! colocation and is only valid while every source location it references
//! still exists on disk. Reads that fail for any reason are cache misses;
//! writes are best-effort and never fail the parse pass.

use crate::{discovery::BundleGroup, errors::DiskCacheError};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::Utf8PathBuf;
use flakeboard_metadata::ResultSet;
use serde::{Deserialize, Serialize};
use std::{fs, io::Write};
use xxhash_rust::xxh3::Xxh3;

/// Name of the hidden cache directory created beside bundle groups.
pub const CACHE_DIR_NAME: &str = ".flakeboard";

/// Format version of the cache artifact. Readers treat artifacts with a
/// newer version as misses.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Serialization wrapper for the cache artifact.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct CachedResultSet {
    format_version: u32,
    result_set: ResultSet,
}

/// Returns the artifact path for a group.
///
/// The file name carries a digest of the group's location set so that
/// sibling groups sharing a parent directory get distinct artifacts.
pub fn cache_path(group: &BundleGroup) -> Utf8PathBuf {
    let mut hasher = Xxh3::new();
    for location in group.locations() {
        hasher.update(location.as_str().as_bytes());
        hasher.update(b"\0");
    }
    let digest = format!("{:016x}", hasher.digest());
    group
        .cache_parent()
        .join(CACHE_DIR_NAME)
        .join(format!("resultset-{digest}.json"))
}

/// Persists a result set beside its group's sources. Best-effort: failures
/// are logged and swallowed.
pub fn write(group: &BundleGroup, result_set: &ResultSet) {
    if let Err(error) = write_impl(group, result_set) {
        tracing::warn!(
            "failed to persist cache for result set `{}`: {error}",
            result_set.identifier
        );
    }
}

fn write_impl(group: &BundleGroup, result_set: &ResultSet) -> Result<(), DiskCacheError> {
    let cached = CachedResultSet {
        format_version: CACHE_FORMAT_VERSION,
        result_set: result_set.clone(),
    };
    let json = serde_json::to_string(&cached).map_err(|error| DiskCacheError::Serialize {
        identifier: result_set.identifier.clone(),
        error,
    })?;

    let path = cache_path(group);
    let dir = path.parent().expect("cache path always has a parent");
    fs::create_dir_all(dir).map_err(|error| DiskCacheError::DirCreate {
        path: dir.to_owned(),
        error,
    })?;

    AtomicFile::new(&path, AllowOverwrite)
        .write(|file| file.write_all(json.as_bytes()))
        .map_err(|error| DiskCacheError::Write { path, error })?;

    Ok(())
}

/// Loads the cached result set for a group, if a valid one exists.
///
/// Returns `None` (a cache miss) when the artifact is absent, unreadable,
/// fails to deserialize, carries a newer format version, covers a
/// different location set, or when any referenced source location no
/// longer exists on disk.
pub fn read(group: &BundleGroup) -> Option<ResultSet> {
    for location in group.locations() {
        if !location.exists() {
            tracing::debug!("cache invalid: source `{location}` no longer exists");
            return None;
        }
    }

    let path = cache_path(group);
    let contents = fs::read_to_string(&path).ok()?;
    let cached: CachedResultSet = match serde_json::from_str(&contents) {
        Ok(cached) => cached,
        Err(error) => {
            tracing::debug!("cache artifact at `{path}` is unreadable: {error}");
            return None;
        }
    };

    if cached.format_version > CACHE_FORMAT_VERSION {
        tracing::debug!(
            "cache artifact at `{path}` has format version {} (max supported: {})",
            cached.format_version,
            CACHE_FORMAT_VERSION,
        );
        return None;
    }
    if !cached.result_set.matches_locations(group.locations()) {
        tracing::debug!("cache artifact at `{path}` covers a different location set");
        return None;
    }

    // The set's own locations double-check the group's: both must exist.
    if cached
        .result_set
        .source_locations
        .iter()
        .any(|location| !location.exists())
    {
        return None;
    }

    Some(cached.result_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn make_group(temp: &Utf8TempDir, names: &[&str]) -> BundleGroup {
        let locations: Vec<Utf8PathBuf> = names
            .iter()
            .map(|name| {
                let path = temp.path().join(name);
                fs::create_dir_all(&path).unwrap();
                path
            })
            .collect();
        BundleGroup::new(locations).unwrap()
    }

    fn make_result_set(group: &BundleGroup) -> ResultSet {
        ResultSet {
            identifier: "run-42".to_owned(),
            source_locations: group.locations().to_vec(),
            date: Utc::now(),
            total_execution_time: Duration::from_millis(4500),
            destinations: "iPhone 14 (17.0)".to_owned(),
            tests: Vec::new(),
            passed: Vec::new(),
            uniquely_failed: Vec::new(),
            passed_on_retry: Vec::new(),
            failed_but_retried: Vec::new(),
            repeated_groups: Vec::new(),
            crash_count: 2,
            metadata: None,
        }
    }

    #[test]
    fn round_trip_is_lossless() {
        let temp = Utf8TempDir::new().unwrap();
        let group = make_group(&temp, &["a.xcresult", "b.xcresult"]);
        let result_set = make_result_set(&group);

        write(&group, &result_set);
        assert!(cache_path(&group).exists());

        let restored = read(&group).expect("cache should hit");
        assert_eq!(restored, result_set);
    }

    #[test]
    fn missing_artifact_is_a_miss() {
        let temp = Utf8TempDir::new().unwrap();
        let group = make_group(&temp, &["a.xcresult"]);
        assert!(read(&group).is_none());
    }

    #[test]
    fn deleted_source_is_a_miss() {
        let temp = Utf8TempDir::new().unwrap();
        let group = make_group(&temp, &["a.xcresult", "b.xcresult"]);
        let result_set = make_result_set(&group);
        write(&group, &result_set);

        fs::remove_dir_all(temp.path().join("b.xcresult")).unwrap();
        assert!(read(&group).is_none());
    }

    #[test]
    fn corrupt_artifact_is_a_miss() {
        let temp = Utf8TempDir::new().unwrap();
        let group = make_group(&temp, &["a.xcresult"]);
        let path = cache_path(&group);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        assert!(read(&group).is_none());
    }

    #[test]
    fn newer_format_version_is_a_miss() {
        let temp = Utf8TempDir::new().unwrap();
        let group = make_group(&temp, &["a.xcresult"]);
        let result_set = make_result_set(&group);
        write(&group, &result_set);

        let path = cache_path(&group);
        let bumped = fs::read_to_string(&path)
            .unwrap()
            .replace("\"format-version\":1", "\"format-version\":99");
        fs::write(&path, bumped).unwrap();

        assert!(read(&group).is_none());
    }

    #[test]
    fn sibling_groups_do_not_collide() {
        let temp = Utf8TempDir::new().unwrap();
        let group_a = make_group(&temp, &["a.xcresult"]);
        let group_b = make_group(&temp, &["b.xcresult"]);
        assert_ne!(cache_path(&group_a), cache_path(&group_b));

        let mut set_a = make_result_set(&group_a);
        set_a.identifier = "run-a".to_owned();
        let mut set_b = make_result_set(&group_b);
        set_b.identifier = "run-b".to_owned();
        write(&group_a, &set_a);
        write(&group_b, &set_b);

        assert_eq!(read(&group_a).unwrap().identifier, "run-a");
        assert_eq!(read(&group_b).unwrap().identifier, "run-b");
    }

    #[test]
    fn artifact_for_different_location_set_is_a_miss() {
        let temp = Utf8TempDir::new().unwrap();
        let group = make_group(&temp, &["a.xcresult"]);
        // A set claiming different sources, written to this group's path.
        let other = make_group(&temp, &["c.xcresult"]);
        let foreign_set = make_result_set(&other);

        let cached = CachedResultSet {
            format_version: CACHE_FORMAT_VERSION,
            result_set: foreign_set,
        };
        let path = cache_path(&group);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_string(&cached).unwrap()).unwrap();

        assert!(read(&group).is_none());
    }
}
