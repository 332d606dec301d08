// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// Bar Controller
/// One per display. Owns the edge reservation, the rendered menu tree and the
/// folder watch for that display.
///
/// States: Uninitialized -> Docked <-> Refreshing -> Released
///
/// Projection is split into `begin_refresh` (hand out a job) and
/// `finish_refresh` (apply the result) so it can run on a worker thread.
/// Only the result of the latest job is ever rendered.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fbge_edge::{strip_rect, Edge, EdgeReserver, ReservationHandle, WindowId};
use crate::fbgm_menu::{Activation, MenuNode, DEFAULT_MAX_DEPTH};
use crate::fbgo_open::TargetOpener;
use crate::fbgq_queue::UiQueue;
use crate::fbgt_types::{BarMessage, DisplayInfo, MenuTree, ProjectionJob, ProjectionResult, SeqSource};
use crate::fbgw_watch::{ChangeMonitor, WatchNotice, DEFAULT_DEBOUNCE};

/// Platform window that draws one bar
pub trait BarSurface {
    fn window(&self) -> WindowId;

    /// Replace everything on the bar with `tree`
    fn render(&mut self, tree: &[MenuNode]);

    /// Pop up a cascading menu under button `anchor`; returns the picked target
    fn show_cascade(&mut self, anchor: usize, nodes: &[MenuNode]) -> Option<PathBuf>;

    /// Non-fatal notice for the user
    fn notify(&mut self, message: &str);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BarState {
    Uninitialized,
    Docked,
    Refreshing,
    Released,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarOptions {
    pub thickness: i32,
    pub max_depth: usize,
    pub debounce: Duration,
}

impl Default for BarOptions {
    fn default() -> Self {
        Self {
            thickness: 30,
            max_depth: DEFAULT_MAX_DEPTH,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

pub struct BarController<S: BarSurface> {
    display: DisplayInfo,
    surface: S,
    options: BarOptions,
    state: BarState,
    reservation: Option<ReservationHandle>,
    root: Option<PathBuf>,
    tree: MenuTree,
    monitor: ChangeMonitor,
    watch_generation: u64,
    // Set when the watch shut itself down; cleared by an explicit refresh or root change
    live_suspended: bool,
    refresh_seq: u64,
    seqs: SeqSource,
    queue: UiQueue,
}

impl<S: BarSurface> BarController<S> {
    pub fn new(
        display: DisplayInfo,
        surface: S,
        root: Option<PathBuf>,
        options: BarOptions,
        queue: UiQueue,
        seqs: SeqSource,
    ) -> Self {
        Self {
            display,
            surface,
            options,
            state: BarState::Uninitialized,
            reservation: None,
            root,
            tree: Arc::from(Vec::<MenuNode>::new()),
            monitor: ChangeMonitor::new(options.debounce),
            watch_generation: 0,
            live_suspended: false,
            refresh_seq: 0,
            seqs,
            queue,
        }
    }

    pub fn display(&self) -> &DisplayInfo {
        &self.display
    }

    pub fn state(&self) -> BarState {
        self.state
    }

    #[cfg(test)]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    #[cfg(test)]
    pub fn tree(&self) -> &MenuTree {
        &self.tree
    }

    pub fn reservation(&self) -> Option<&ReservationHandle> {
        self.reservation.as_ref()
    }

    #[cfg(test)]
    pub fn is_watching(&self) -> bool {
        self.monitor.is_active()
    }

    #[cfg(test)]
    pub fn watch_generation(&self) -> u64 {
        self.watch_generation
    }

    #[cfg(test)]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Claim the top edge, then start the first projection
    pub fn dock(&mut self, reserver: &mut dyn EdgeReserver) -> Option<ProjectionJob> {
        if self.state != BarState::Uninitialized {
            return None;
        }

        let window = self.surface.window();
        match reserver.reserve(window, self.display.bounds, Edge::Top, self.options.thickness) {
            Ok(handle) => self.reservation = Some(handle),
            Err(e) => {
                warn!(display = %self.display.id, error = %e, "edge reservation failed, floating instead");
                let strip = strip_rect(self.display.bounds, Edge::Top, self.options.thickness);
                if let Err(e) = reserver.float(window, strip) {
                    warn!(display = %self.display.id, error = %e, "could not place floating bar");
                }
            }
        }

        self.state = BarState::Docked;
        info!(display = %self.display.id, reserved = self.reservation.is_some(), "bar docked");
        self.begin_refresh()
    }

    /// Window manager moved other appbars; renegotiate our strip
    pub fn redock(&mut self, reserver: &mut dyn EdgeReserver) {
        let Some(handle) = &self.reservation else {
            return;
        };
        match reserver.reposition(handle) {
            Ok(handle) => self.reservation = Some(handle),
            Err(e) => warn!(display = %self.display.id, error = %e, "appbar reposition failed"),
        }
    }

    /// Start a projection of the current root. Without a root the bar is
    /// cleared on the spot and no job is produced.
    pub fn begin_refresh(&mut self) -> Option<ProjectionJob> {
        if matches!(self.state, BarState::Uninitialized | BarState::Released) {
            return None;
        }

        self.refresh_seq = self.seqs.next();
        let Some(root) = self.root.clone() else {
            self.apply(Arc::from(Vec::<MenuNode>::new()));
            self.state = BarState::Docked;
            return None;
        };

        self.state = BarState::Refreshing;
        debug!(display = %self.display.id, seq = self.refresh_seq, root = %root.display(), "refresh started");
        Some(ProjectionJob {
            display: self.display.id.clone(),
            seq: self.refresh_seq,
            root,
            max_depth: self.options.max_depth,
        })
    }

    /// Apply a finished projection. Returns false for superseded results.
    pub fn finish_refresh(&mut self, result: ProjectionResult) -> bool {
        let current = self.state == BarState::Refreshing
            && result.seq == self.refresh_seq
            && self.root.as_deref() == Some(result.root.as_path());
        if !current {
            debug!(display = %self.display.id, seq = result.seq, latest = self.refresh_seq, "dropping stale projection");
            return false;
        }

        self.apply(result.tree);
        self.state = BarState::Docked;
        if !self.live_suspended {
            self.ensure_watching();
        }
        true
    }

    /// A disarmed notice still re-projects once, but live refresh stays off
    pub fn on_content_changed(&mut self, generation: u64, disarmed: bool) -> Option<ProjectionJob> {
        if generation != self.watch_generation {
            debug!(display = %self.display.id, generation, current = self.watch_generation, "ignoring change from old watch");
            return None;
        }
        if disarmed {
            info!(display = %self.display.id, "live refresh off until the next refresh or root change");
            self.monitor.stop();
            self.live_suspended = true;
        }
        self.begin_refresh()
    }

    /// Explicit refresh; also re-arms a watch that shut itself down
    pub fn refresh(&mut self) -> Option<ProjectionJob> {
        self.live_suspended = false;
        self.begin_refresh()
    }

    /// Stop watching the old root before anything else touches the new one
    pub fn set_root(&mut self, root: Option<PathBuf>) -> Option<ProjectionJob> {
        self.monitor.stop();
        self.live_suspended = false;
        self.root = root;
        self.begin_refresh()
    }

    /// Watch stop, then reservation release; the surface is dropped by the owner afterwards
    pub fn release(&mut self, reserver: &mut dyn EdgeReserver) {
        if self.state == BarState::Released {
            return;
        }
        self.monitor.stop();
        if let Some(handle) = self.reservation.take() {
            if let Err(e) = reserver.release(handle) {
                warn!(display = %self.display.id, error = %e, "edge release failed");
            }
        }
        self.state = BarState::Released;
        info!(display = %self.display.id, "bar released");
    }

    /// Button `index` on the bar was clicked
    pub fn activate(&mut self, index: usize, opener: &dyn TargetOpener) {
        let tree = Arc::clone(&self.tree);
        let Some(node) = tree.get(index) else {
            debug!(display = %self.display.id, index, "click on a button that no longer exists");
            return;
        };

        match node.activation() {
            Activation::Open(path) => self.open(path, opener),
            Activation::Cascade(children) => {
                if let Some(target) = self.surface.show_cascade(index, children) {
                    self.open(&target, opener);
                }
            }
        }
    }

    fn open(&mut self, path: &Path, opener: &dyn TargetOpener) {
        if let Err(e) = opener.open(path) {
            warn!(error = %e, "open failed");
            self.surface.notify(&e.to_string());
        }
    }

    fn apply(&mut self, tree: MenuTree) {
        self.surface.render(&tree);
        self.tree = tree;
    }

    /// (Re)arm the folder watch; also the recovery path after a watch failure
    fn ensure_watching(&mut self) {
        let Some(root) = &self.root else {
            return;
        };
        if self.monitor.is_active() && self.monitor.root() == Some(root.as_path()) {
            return;
        }

        self.watch_generation += 1;
        let generation = self.watch_generation;
        let display = self.display.id.clone();
        let queue = self.queue.clone();
        let started = self.monitor.start(root, move |notice| {
            queue.post(BarMessage::ContentChanged {
                display: display.clone(),
                generation,
                disarmed: notice == WatchNotice::Disarmed,
            });
        });
        if let Err(e) = started {
            warn!(display = %self.display.id, error = %e, "live refresh unavailable");
        }
    }
}

// ============================================================================
// Test doubles shared with the registry tests
// ============================================================================

#[cfg(test)]
pub(crate) mod doubles {
    use super::*;
    use crate::fbgo_open::LaunchError;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub(crate) window: isize,
        pub(crate) renders: Vec<Vec<String>>,
        pub(crate) cascades: Vec<(usize, Vec<String>)>,
        pub(crate) notices: Vec<String>,
        pub(crate) pick: Option<PathBuf>,
    }

    impl RecordingSurface {
        pub(crate) fn new(window: isize) -> Self {
            Self { window, ..Default::default() }
        }

        pub(crate) fn last_render(&self) -> Vec<String> {
            self.renders.last().cloned().unwrap_or_default()
        }
    }

    impl BarSurface for RecordingSurface {
        fn window(&self) -> WindowId {
            WindowId(self.window)
        }

        fn render(&mut self, tree: &[MenuNode]) {
            self.renders.push(tree.iter().map(|n| n.display_name.clone()).collect());
        }

        fn show_cascade(&mut self, anchor: usize, nodes: &[MenuNode]) -> Option<PathBuf> {
            self.cascades.push((anchor, nodes.iter().map(|n| n.display_name.clone()).collect()));
            self.pick.clone()
        }

        fn notify(&mut self, message: &str) {
            self.notices.push(message.to_string());
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingOpener {
        pub(crate) opened: Rc<RefCell<Vec<PathBuf>>>,
        pub(crate) fail: bool,
    }

    impl TargetOpener for RecordingOpener {
        fn open(&self, path: &Path) -> Result<(), LaunchError> {
            if self.fail {
                return Err(LaunchError::Missing(path.to_path_buf()));
            }
            self.opened.borrow_mut().push(path.to_path_buf());
            Ok(())
        }
    }
}
