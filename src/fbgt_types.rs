// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// Bar Runtime Types
///
/// Display identity, projection jobs and the messages that travel from
/// watcher / worker threads to the UI thread.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::fbge_edge::Rect;
use crate::fbgm_menu::{FolderProjector, MenuNode};

// ============================================================================
// Displays
// ============================================================================

/// Stable display name (device name on Windows, e.g. `\\.\DISPLAY1`)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DisplayId(pub String);

impl DisplayId {
    #[cfg(test)]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayInfo {
    pub id: DisplayId,
    pub bounds: Rect,
}

// ============================================================================
// Projection jobs
// ============================================================================

pub type MenuTree = Arc<[MenuNode]>;

/// Refresh sequence numbers, unique across every bar sharing the source.
/// A bar re-attached to the same display never reuses a number still in flight.
#[derive(Clone, Debug, Default)]
pub struct SeqSource(Arc<AtomicU64>);

impl SeqSource {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// One pending projection for one bar
#[derive(Clone, Debug)]
pub struct ProjectionJob {
    pub display: DisplayId,
    pub seq: u64,
    pub root: PathBuf,
    pub max_depth: usize,
}

impl ProjectionJob {
    pub fn run(self, projector: &FolderProjector) -> ProjectionResult {
        let tree = projector.project(&self.root, self.max_depth);
        ProjectionResult {
            display: self.display,
            seq: self.seq,
            root: self.root,
            tree: tree.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProjectionResult {
    pub display: DisplayId,
    pub seq: u64,
    pub root: PathBuf,
    pub tree: MenuTree,
}

// ============================================================================
// UI queue messages
// ============================================================================

#[derive(Clone, Debug)]
pub enum BarMessage {
    /// Debounced folder change from the watch with this generation.
    /// `disarmed` marks the last notice of a watch that has shut itself down.
    ContentChanged { display: DisplayId, generation: u64, disarmed: bool },
    /// Background projection finished
    Projected(ProjectionResult),
    Refresh,
    SetRoot(PathBuf),
    /// Bar button `index` clicked
    Activate { display: DisplayId, index: usize },
    /// Window manager moved appbars on this display
    EdgeChanged(DisplayId),
    /// Bar window asked to close
    Close(DisplayId),
    DisplaysChanged,
    Shutdown,
}
