// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// Screen-edge reservation
/// Claims a strip of a display edge from the window manager and pins the bar
/// window to exactly that strip.
///
/// Responsibilities:
/// - Geometry types shared by every backend (Rect, Edge, WindowId)
/// - The `EdgeReserver` capability used by bar controllers
/// - `AppBarReservation`: the register / query / set / move / remove protocol,
///   generic over the `AppBarShell` that actually talks to the window manager

use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// SECTION 1: Geometry
// ============================================================================

/// Screen rectangle in virtual-desktop pixels
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self { left, top, width, height }
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    #[cfg(test)]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.left < other.right()
            && other.left < self.right()
            && self.top < other.bottom()
            && other.top < self.bottom()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Edge {
    Top,
    Bottom,
    Left,
    Right,
}

/// Opaque native window handle (HWND on Windows)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WindowId(pub isize);

/// The strip of `display` along `edge` that is `thickness` pixels deep
pub fn strip_rect(display: Rect, edge: Edge, thickness: i32) -> Rect {
    match edge {
        Edge::Top => Rect::new(display.left, display.top, display.width, thickness),
        Edge::Bottom => Rect::new(display.left, display.bottom() - thickness, display.width, thickness),
        Edge::Left => Rect::new(display.left, display.top, thickness, display.height),
        Edge::Right => Rect::new(display.right() - thickness, display.top, thickness, display.height),
    }
}

/// Re-apply the requested thickness after the window manager moved the
/// inner side of a proposed strip
fn pin_thickness(adjusted: Rect, edge: Edge, thickness: i32) -> Rect {
    match edge {
        Edge::Top => Rect::new(adjusted.left, adjusted.top, adjusted.width, thickness),
        Edge::Bottom => Rect::new(adjusted.left, adjusted.bottom() - thickness, adjusted.width, thickness),
        Edge::Left => Rect::new(adjusted.left, adjusted.top, thickness, adjusted.height),
        Edge::Right => Rect::new(adjusted.right() - thickness, adjusted.top, thickness, adjusted.height),
    }
}

// ============================================================================
// SECTION 2: Reservation capability
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReservationError {
    #[error("window manager refused appbar registration for window {0:?}")]
    Refused(WindowId),
    #[error("failed to move window {window:?} into {rect:?}")]
    Geometry { window: WindowId, rect: Rect },
    #[error("window {0:?} already holds an edge reservation")]
    AlreadyReserved(WindowId),
    #[error("window {0:?} holds no edge reservation")]
    NotReserved(WindowId),
}

/// Proof of a live reservation; hand it back to `release`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationHandle {
    pub window: WindowId,
    pub display: Rect,
    pub edge: Edge,
    pub thickness: i32,
    /// Rectangle the window manager committed (may differ from the window geometry)
    pub assigned: Rect,
}

pub trait EdgeReserver {
    fn reserve(
        &mut self,
        window: WindowId,
        display: Rect,
        edge: Edge,
        thickness: i32,
    ) -> Result<ReservationHandle, ReservationError>;

    /// Renegotiate an existing reservation after the window manager moved things
    fn reposition(&mut self, handle: &ReservationHandle) -> Result<ReservationHandle, ReservationError>;

    fn release(&mut self, handle: ReservationHandle) -> Result<(), ReservationError>;

    /// Degraded placement: topmost window at `rect`, no space reserved
    fn float(&mut self, window: WindowId, rect: Rect) -> Result<(), ReservationError>;
}

// ============================================================================
// SECTION 3: Appbar protocol
// ============================================================================

/// Raw appbar messages plus the window move, one method per message
pub trait AppBarShell {
    fn register(&mut self, window: WindowId) -> bool;
    fn query_pos(&mut self, window: WindowId, edge: Edge, proposed: Rect) -> Rect;
    fn set_pos(&mut self, window: WindowId, edge: Edge, proposed: Rect) -> Rect;
    fn remove(&mut self, window: WindowId);
    fn move_window(&mut self, window: WindowId, rect: Rect, topmost: bool) -> bool;
}

pub struct AppBarReservation<P: AppBarShell> {
    shell: P,
    registered: HashSet<WindowId>,
}

impl<P: AppBarShell> AppBarReservation<P> {
    pub fn new(shell: P) -> Self {
        Self { shell, registered: HashSet::new() }
    }

    #[cfg(test)]
    pub fn shell(&self) -> &P {
        &self.shell
    }

    /// QUERYPOS, thickness fixup, SETPOS, then pin the window to the exact strip
    fn negotiate(
        &mut self,
        window: WindowId,
        display: Rect,
        edge: Edge,
        thickness: i32,
    ) -> Result<ReservationHandle, ReservationError> {
        let proposed = strip_rect(display, edge, thickness);
        let queried = self.shell.query_pos(window, edge, proposed);
        let assigned = self.shell.set_pos(window, edge, pin_thickness(queried, edge, thickness));
        if assigned != proposed {
            debug!(?window, ?proposed, ?assigned, "window manager adjusted appbar strip");
        }

        // The bar always covers the full strip the caller asked for
        if !self.shell.move_window(window, proposed, true) {
            return Err(ReservationError::Geometry { window, rect: proposed });
        }

        Ok(ReservationHandle { window, display, edge, thickness, assigned })
    }
}

impl<P: AppBarShell> EdgeReserver for AppBarReservation<P> {
    fn reserve(
        &mut self,
        window: WindowId,
        display: Rect,
        edge: Edge,
        thickness: i32,
    ) -> Result<ReservationHandle, ReservationError> {
        if self.registered.contains(&window) {
            return Err(ReservationError::AlreadyReserved(window));
        }
        if !self.shell.register(window) {
            return Err(ReservationError::Refused(window));
        }
        self.registered.insert(window);

        match self.negotiate(window, display, edge, thickness) {
            Ok(handle) => {
                info!(?window, ?edge, assigned = ?handle.assigned, "edge reserved");
                Ok(handle)
            }
            Err(e) => {
                self.shell.remove(window);
                self.registered.remove(&window);
                Err(e)
            }
        }
    }

    fn reposition(&mut self, handle: &ReservationHandle) -> Result<ReservationHandle, ReservationError> {
        if !self.registered.contains(&handle.window) {
            return Err(ReservationError::NotReserved(handle.window));
        }
        self.negotiate(handle.window, handle.display, handle.edge, handle.thickness)
    }

    fn release(&mut self, handle: ReservationHandle) -> Result<(), ReservationError> {
        if !self.registered.remove(&handle.window) {
            return Err(ReservationError::NotReserved(handle.window));
        }
        self.shell.remove(handle.window);
        info!(window = ?handle.window, "edge released");
        Ok(())
    }

    fn float(&mut self, window: WindowId, rect: Rect) -> Result<(), ReservationError> {
        if self.shell.move_window(window, rect, true) {
            warn!(?window, ?rect, "bar floating without edge reservation");
            Ok(())
        } else {
            Err(ReservationError::Geometry { window, rect })
        }
    }
}

// ============================================================================
// SECTION 4: Model window manager (tests)
// ============================================================================

#[cfg(test)]
pub(crate) mod model {
    use super::*;
    use std::collections::HashMap;

    /// Window manager that stacks appbars on the same edge the way the shell does
    #[derive(Default)]
    pub(crate) struct ModelShell {
        pub(crate) registered: HashSet<WindowId>,
        pub(crate) claims: HashMap<WindowId, (Edge, Rect)>,
        pub(crate) windows: HashMap<WindowId, Rect>,
        pub(crate) refuse: bool,
        pub(crate) fail_moves: bool,
    }

    impl ModelShell {
        fn push_clear(&self, window: WindowId, edge: Edge, mut rect: Rect) -> Rect {
            loop {
                let blocker = self.claims.iter().find(|(w, (e, r))| {
                    **w != window && *e == edge && r.intersects(&rect)
                });
                match blocker {
                    Some((_, (_, r))) => match edge {
                        Edge::Top => rect.top = r.bottom(),
                        Edge::Bottom => rect.height = r.top - rect.top,
                        Edge::Left => rect.left = r.right(),
                        Edge::Right => rect.width = r.left - rect.left,
                    },
                    None => return rect,
                }
            }
        }
    }

    impl AppBarShell for ModelShell {
        fn register(&mut self, window: WindowId) -> bool {
            !self.refuse && self.registered.insert(window)
        }

        fn query_pos(&mut self, window: WindowId, edge: Edge, proposed: Rect) -> Rect {
            self.push_clear(window, edge, proposed)
        }

        fn set_pos(&mut self, window: WindowId, edge: Edge, proposed: Rect) -> Rect {
            let rect = self.push_clear(window, edge, proposed);
            self.claims.insert(window, (edge, rect));
            rect
        }

        fn remove(&mut self, window: WindowId) {
            self.registered.remove(&window);
            self.claims.remove(&window);
        }

        fn move_window(&mut self, window: WindowId, rect: Rect, _topmost: bool) -> bool {
            if self.fail_moves {
                return false;
            }
            self.windows.insert(window, rect);
            true
        }
    }
}
