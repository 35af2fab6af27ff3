use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use uuid::Uuid;

use crate::constants::SEGMENT_EXTENSION;
use crate::error::RecorderError;

/// One encoded segment on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub name: String,
    pub ordinal: u64,
}

/// The segment directory for one recording session.
///
/// The random 128-bit base embedded in every filename keeps this session's
/// files apart from leftovers of a crashed prior run sharing the same
/// directory. Lexicographic order of names equals chronological order
/// because ordinals are zero-padded and never wrap.
pub struct SegmentStore {
    dir: PathBuf,
    base: String,
    pattern: Regex,
}

impl SegmentStore {
    pub fn new(dir: PathBuf) -> Result<Self, RecorderError> {
        let base = format!("rec_{}", Uuid::new_v4().simple());
        let pattern = Regex::new(&format!(r"^{}_(\d{{6,}})\.{}$", base, SEGMENT_EXTENSION))
            .map_err(|e| RecorderError::State(e.to_string()))?;
        Ok(Self { dir, base, pattern })
    }

    pub fn ensure_dir(&self) -> Result<(), RecorderError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Output template handed to the segment muxer.
    pub fn output_template(&self) -> String {
        self.dir
            .join(format!("{}_%06d.{}", self.base, SEGMENT_EXTENSION))
            .to_string_lossy()
            .to_string()
    }

    pub fn sidecar_path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{}_{}.wav", self.base, tag))
    }

    pub fn manifest_path(&self, tag: &str) -> PathBuf {
        self.dir.join(format!("{}_concat_{}.txt", self.base, tag))
    }

    /// All segments of this session, in playback order.
    pub fn list(&self) -> Result<Vec<SegmentFile>, RecorderError> {
        let mut segments = Vec::new();
        if !self.dir.exists() {
            return Ok(segments);
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(caps) = self.pattern.captures(name) {
                if let Some(ordinal) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) {
                    segments.push(SegmentFile {
                        name: name.to_string(),
                        path,
                        ordinal,
                    });
                }
            }
        }
        // Numeric sort: identical to name order while ordinals fit their
        // zero padding, and still correct once the muxer widens the field.
        segments.sort_by_key(|s| s.ordinal);
        Ok(segments)
    }

    /// Removes every file belonging to this session: segments, audio
    /// sidecars, and any concat manifest a crashed snapshot left behind.
    pub fn erase(&self) -> Result<(), RecorderError> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with(&self.base) {
                    if let Err(e) = fs::remove_file(&path) {
                        log::warn!("failed to erase {:?}: {}", path, e);
                    }
                }
            }
        }
        // Other sessions may still own files here.
        let _ = fs::remove_dir(&self.dir);
        Ok(())
    }
}
