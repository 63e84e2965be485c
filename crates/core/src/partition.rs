//! Grouping of `<base>_Part<N>.mp4` files into one continuous recording.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::media::{MediaProbe, duration_or_zero};
use crate::timecode::part_info;

/// Probed durations, so every file is probed at most once per session.
/// Failed probes are remembered as `0.0`.
#[derive(Debug, Default)]
pub struct DurationCache {
    known: HashMap<PathBuf, f64>,
}

impl DurationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn duration<P: MediaProbe + ?Sized>(&mut self, probe: &P, path: &Path) -> f64 {
        if let Some(duration) = self.known.get(path) {
            return *duration;
        }
        let duration = duration_or_zero(probe, path).await;
        self.known.insert(path.to_path_buf(), duration);
        duration
    }
}

/// Part files on disk, keyed by base name then part index.
#[derive(Debug, Default)]
pub struct PartitionIndex {
    sequences: HashMap<String, BTreeMap<u32, PathBuf>>,
}

impl PartitionIndex {
    /// Index every part file directly inside `video_dir`, in name order. An
    /// unreadable directory gives an empty index.
    pub fn scan(video_dir: &Path) -> Self {
        let mut index = Self::default();
        let Ok(entries) = std::fs::read_dir(video_dir) else {
            return index;
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        for path in paths {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                let name = name.to_string();
                index.insert(&name, path);
            }
        }
        index
    }

    /// Register `path` if `filename` follows the part naming. When two files
    /// map to the same part (`_Part1` and `_Part01`) the first one stays.
    pub fn insert(&mut self, filename: &str, path: PathBuf) {
        let Some((base, part)) = part_info(filename) else {
            return;
        };
        match self.sequences.entry(base).or_default().entry(part) {
            Entry::Vacant(slot) => {
                slot.insert(path);
            }
            Entry::Occupied(kept) => warn!(
                "{} duplicates part {} ({}); keeping {}",
                path.display(),
                part,
                filename,
                kept.get().display()
            ),
        }
    }

    #[cfg(test)]
    fn parts(&self, base: &str) -> Option<&BTreeMap<u32, PathBuf>> {
        self.sequences.get(base)
    }

    /// Seconds of the recording that precede part `part` of `base`.
    pub async fn offset_of<P: MediaProbe + ?Sized>(
        &self,
        base: &str,
        part: u32,
        probe: &P,
        cache: &mut DurationCache,
    ) -> f64 {
        let Some(parts) = self.sequences.get(base) else {
            return 0.0;
        };

        let mut durations = BTreeMap::new();
        for (index, path) in parts.range(..part) {
            durations.insert(*index, cache.duration(probe, path).await);
        }
        cumulative_offset(&durations, part)
    }
}

/// Sum of the durations of parts `0..part`. Parts with no entry count as zero.
pub fn cumulative_offset(durations: &BTreeMap<u32, f64>, part: u32) -> f64 {
    durations.range(..part).map(|(_, duration)| duration).sum()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::error::{ExhibitError, Result};

    struct TableProbe {
        durations: HashMap<String, f64>,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl TableProbe {
        fn new(entries: &[(&str, f64)]) -> Self {
            Self {
                durations: entries.iter().map(|(n, d)| (n.to_string(), *d)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaProbe for TableProbe {
        async fn probe_duration(&self, path: &Path) -> Result<f64> {
            self.calls.lock().unwrap().push(path.to_path_buf());
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.durations
                .get(&name)
                .copied()
                .ok_or_else(|| ExhibitError::ProbeFailed {
                    path: path.to_path_buf(),
                    reason: "unknown".into(),
                })
        }
    }

    #[test]
    fn offset_is_sum_of_lower_parts() {
        let durations = BTreeMap::from([(0, 100.0), (1, 150.0), (2, 200.0)]);
        assert_eq!(cumulative_offset(&durations, 2), 250.0);
        assert_eq!(cumulative_offset(&durations, 0), 0.0);
    }

    #[test]
    fn missing_parts_contribute_nothing() {
        let durations = BTreeMap::from([(0, 100.0), (2, 200.0)]);
        assert_eq!(cumulative_offset(&durations, 3), 300.0);
    }

    #[tokio::test]
    async fn scanned_parts_are_probed_once() {
        let dir = TempDir::new().unwrap();
        for name in ["cam_Part0.mp4", "cam_Part1.mp4", "cam_Part2.mp4", "other.mp4"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let index = PartitionIndex::scan(dir.path());
        assert_eq!(index.parts("cam").map(|p| p.len()), Some(3));

        let probe = TableProbe::new(&[
            ("cam_Part0.mp4", 100.0),
            ("cam_Part1.mp4", 150.0),
            ("cam_Part2.mp4", 200.0),
        ]);
        let mut cache = DurationCache::new();

        assert_eq!(index.offset_of("cam", 2, &probe, &mut cache).await, 250.0);
        assert_eq!(index.offset_of("cam", 1, &probe, &mut cache).await, 100.0);
        assert_eq!(probe.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unprobeable_part_counts_as_zero() {
        let mut index = PartitionIndex::default();
        index.insert("cam_Part0.mp4", PathBuf::from("/v/cam_Part0.mp4"));
        index.insert("cam_Part1.mp4", PathBuf::from("/v/cam_Part1.mp4"));

        let probe = TableProbe::new(&[("cam_Part1.mp4", 150.0)]);
        let mut cache = DurationCache::new();

        assert_eq!(index.offset_of("cam", 2, &probe, &mut cache).await, 150.0);
        assert_eq!(index.offset_of("nope", 2, &probe, &mut cache).await, 0.0);
    }

    #[test]
    fn duplicate_part_numbers_keep_the_first_name() {
        let dir = TempDir::new().unwrap();
        for name in ["cam_Part0.mp4", "cam_Part01.mp4", "cam_Part1.mp4"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let index = PartitionIndex::scan(dir.path());
        let parts = index.parts("cam").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[&1], dir.path().join("cam_Part01.mp4"));

        let mut index = PartitionIndex::default();
        index.insert("cam_Part1.mp4", PathBuf::from("/v/cam_Part1.mp4"));
        index.insert("cam_Part01.mp4", PathBuf::from("/v/cam_Part01.mp4"));
        assert_eq!(
            index.parts("cam").unwrap()[&1],
            PathBuf::from("/v/cam_Part1.mp4")
        );
    }
}
