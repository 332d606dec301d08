// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// Bar Registry
/// Process-wide set of live bars, one per display. Every root change and
/// refresh command fans out from here; UI-queue messages are routed here.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::fbgb_bar::{BarController, BarOptions, BarSurface};
use crate::fbge_edge::EdgeReserver;
use crate::fbgm_menu::FolderProjector;
use crate::fbgo_open::TargetOpener;
use crate::fbgq_queue::UiQueue;
use crate::fbgt_types::{BarMessage, DisplayId, DisplayInfo, ProjectionJob, ProjectionResult, SeqSource};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Project on the UI thread
    Inline,
    /// Project on a worker thread, result comes back as `BarMessage::Projected`
    Background,
}

/// What the event loop should do after a message
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Displays changed; the platform layer must re-enumerate and call `sync_displays`
    Rescan,
    Exit,
}

pub struct BarRegistry<S: BarSurface, R: EdgeReserver> {
    bars: Vec<BarController<S>>,
    reserver: R,
    projector: Arc<FolderProjector>,
    opener: Box<dyn TargetOpener>,
    queue: UiQueue,
    // Shared by every bar so a re-attached display never reuses an in-flight seq
    seqs: SeqSource,
    options: BarOptions,
    mode: ProjectionMode,
    root: Option<PathBuf>,
    shut_down: bool,
}

impl<S: BarSurface, R: EdgeReserver> BarRegistry<S, R> {
    pub fn new(
        reserver: R,
        projector: FolderProjector,
        opener: Box<dyn TargetOpener>,
        queue: UiQueue,
        options: BarOptions,
        mode: ProjectionMode,
        root: Option<PathBuf>,
    ) -> Self {
        Self {
            bars: Vec::new(),
            reserver,
            projector: Arc::new(projector),
            opener,
            queue,
            seqs: SeqSource::default(),
            options,
            mode,
            root,
            shut_down: false,
        }
    }

    #[cfg(test)]
    pub fn root(&self) -> Option<&std::path::Path> {
        self.root.as_deref()
    }

    pub fn bars(&self) -> &[BarController<S>] {
        &self.bars
    }

    pub fn bar(&self, display: &DisplayId) -> Option<&BarController<S>> {
        self.bars.iter().find(|bar| &bar.display().id == display)
    }

    #[cfg(test)]
    pub fn reserver(&self) -> &R {
        &self.reserver
    }

    fn bar_mut(&mut self, display: &DisplayId) -> Option<&mut BarController<S>> {
        self.bars.iter_mut().find(|bar| &bar.display().id == display)
    }

    /// Create, dock and populate a bar for `display`
    pub fn attach(&mut self, display: DisplayInfo, surface: S) {
        if self.bar(&display.id).is_some() {
            let id = &display.id;
            warn!(display = %id, "display already has a bar");
            return;
        }

        let mut bar = BarController::new(
            display,
            surface,
            self.root.clone(),
            self.options,
            self.queue.clone(),
            self.seqs.clone(),
        );
        let job = bar.dock(&mut self.reserver);
        self.bars.push(bar);
        self.schedule(job);
    }

    /// Release and drop the bar on `display`. The reservation goes before the window.
    pub fn detach(&mut self, display: &DisplayId) -> bool {
        let Some(index) = self.bars.iter().position(|bar| &bar.display().id == display) else {
            return false;
        };
        let mut bar = self.bars.remove(index);
        bar.release(&mut self.reserver);
        drop(bar);
        true
    }

    /// Match the bar set to the connected displays (startup and hot-plug)
    pub fn sync_displays<F, E>(&mut self, displays: &[DisplayInfo], mut make_surface: F)
    where
        F: FnMut(&DisplayInfo) -> Result<S, E>,
        E: fmt::Display,
    {
        // Gone or resized displays lose their bar; resized ones get a fresh one below
        let stale: Vec<DisplayId> = self
            .bars
            .iter()
            .filter(|bar| !displays.contains(bar.display()))
            .map(|bar| bar.display().id.clone())
            .collect();
        for id in stale {
            info!(display = %id, "display removed or changed");
            self.detach(&id);
        }

        for display in displays {
            if self.bar(&display.id).is_some() {
                continue;
            }
            match make_surface(display) {
                Ok(surface) => self.attach(display.clone(), surface),
                Err(e) => {
                    let id = &display.id;
                    error!(display = %id, error = %e, "failed to create bar window")
                }
            }
        }
    }

    /// Broadcast a new root to every bar
    pub fn set_root(&mut self, root: Option<PathBuf>) {
        info!(root = ?root, "root folder changed");
        self.root = root;
        let jobs: Vec<Option<ProjectionJob>> = self
            .bars
            .iter_mut()
            .map(|bar| bar.set_root(self.root.clone()))
            .collect();
        for job in jobs {
            self.schedule(job);
        }
    }

    pub fn refresh_all(&mut self) {
        let jobs: Vec<Option<ProjectionJob>> = self.bars.iter_mut().map(|bar| bar.refresh()).collect();
        for job in jobs {
            self.schedule(job);
        }
    }

    /// Release every bar; safe to call more than once
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for mut bar in self.bars.drain(..) {
            bar.release(&mut self.reserver);
        }
        info!("all bars released");
    }

    pub fn handle(&mut self, message: BarMessage) -> Flow {
        if self.shut_down {
            return Flow::Exit;
        }

        match message {
            BarMessage::ContentChanged { display, generation, disarmed } => {
                let job = self
                    .bar_mut(&display)
                    .and_then(|bar| bar.on_content_changed(generation, disarmed));
                self.schedule(job);
            }
            BarMessage::Projected(result) => self.deliver(result),
            BarMessage::Refresh => self.refresh_all(),
            BarMessage::SetRoot(root) => self.set_root(Some(root)),
            BarMessage::Activate { display, index } => {
                let opener = self.opener.as_ref();
                if let Some(bar) = self.bars.iter_mut().find(|bar| bar.display().id == display) {
                    bar.activate(index, opener);
                }
            }
            BarMessage::EdgeChanged(display) => {
                let reserver = &mut self.reserver;
                if let Some(bar) = self.bars.iter_mut().find(|bar| bar.display().id == display) {
                    bar.redock(reserver);
                }
            }
            BarMessage::Close(display) => {
                self.detach(&display);
            }
            BarMessage::DisplaysChanged => return Flow::Rescan,
            BarMessage::Shutdown => {
                self.shutdown();
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    fn deliver(&mut self, result: ProjectionResult) {
        match self.bar_mut(&result.display) {
            Some(bar) => {
                bar.finish_refresh(result);
            }
            None => debug!(display = %result.display, "projection for a detached bar"),
        }
    }

    fn schedule(&mut self, job: Option<ProjectionJob>) {
        let Some(job) = job else {
            return;
        };

        if self.mode == ProjectionMode::Background {
            let projector = Arc::clone(&self.projector);
            let queue = self.queue.clone();
            let spawned = thread::Builder::new()
                .name("folderbar-project".to_string())
                .spawn({
                    let job = job.clone();
                    move || queue.post(BarMessage::Projected(job.run(&projector)))
                });
            match spawned {
                Ok(_) => return,
                Err(e) => warn!(error = %e, "projection thread unavailable, projecting inline"),
            }
        }

        let result = job.run(&self.projector);
        self.deliver(result);
    }
}

impl<S: BarSurface, R: EdgeReserver> Drop for BarRegistry<S, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
