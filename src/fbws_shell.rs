// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

#![cfg(windows)]

//! Win32 shell for FolderBar
//!
//! Hosts the platform side of the bars:
//! - `Win32AppBar`: SHAppBarMessage / SetWindowPos behind `AppBarShell`
//! - `Win32Surface`: one topmost tool window per monitor with a button per node
//! - a hidden dispatcher window that owns the tray icon and wakes the loop
//! - the message loop that drains the UI queue into the registry
//!
//! Window procedures never touch bar state. They post a `BarMessage`; the loop
//! hands it to the registry after `DispatchMessageW` returns.

use std::collections::HashMap;
use std::ffi::{c_void, OsString};
use std::mem::size_of;
use std::os::windows::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, warn};
use windows::core::{w, Result as WinResult, HSTRING, PCWSTR};
use windows::Win32::Foundation::{BOOL, HINSTANCE, HWND, LPARAM, LRESULT, POINT, RECT, TRUE, WPARAM};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, GetSysColorBrush, COLOR_BTNFACE, HDC, HMONITOR, MONITORINFOEXW,
};
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, CoUninitialize, COINIT_APARTMENTTHREADED};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Shell::{
    SHAppBarMessage, SHBrowseForFolderW, SHGetPathFromIDListW, Shell_NotifyIconW, ABE_BOTTOM, ABE_LEFT, ABE_RIGHT,
    ABE_TOP, ABM_NEW, ABM_QUERYPOS, ABM_REMOVE, ABM_SETPOS, ABN_POSCHANGED, APPBARDATA, BIF_NEWDIALOGSTYLE,
    BIF_RETURNONLYFSDIRS, BROWSEINFOW, NIF_ICON, NIF_INFO, NIF_MESSAGE, NIF_TIP, NIIF_WARNING, NIM_ADD, NIM_DELETE,
    NIM_MODIFY, NOTIFYICONDATAW,
};
use windows::Win32::UI::WindowsAndMessaging::{
    AppendMenuW, CreatePopupMenu, CreateWindowExW, DefWindowProcW, DestroyMenu, DestroyWindow, DispatchMessageW,
    GetCursorPos, GetMessageW, GetWindowRect, LoadCursorW, LoadIconW, PostMessageW, RegisterClassW,
    SetForegroundWindow, SetWindowPos, ShowWindow, TrackPopupMenu, TranslateMessage, BS_PUSHBUTTON, HMENU,
    HWND_TOPMOST, IDC_ARROW, IDI_APPLICATION, MF_GRAYED, MF_POPUP, MF_SEPARATOR, MF_STRING, MSG, SWP_NOACTIVATE,
    SW_SHOWNOACTIVATE, TPM_LEFTALIGN, TPM_NONOTIFY, TPM_RETURNCMD, TPM_RIGHTBUTTON, TPM_TOPALIGN, WINDOW_EX_STYLE,
    WINDOW_STYLE, WM_APP, WM_CLOSE, WM_COMMAND, WM_DISPLAYCHANGE, WM_LBUTTONUP, WM_RBUTTONUP, WNDCLASSW, WS_CHILD,
    WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_OVERLAPPED, WS_POPUP, WS_VISIBLE,
};

use crate::fbgb_bar::BarSurface;
use crate::fbge_edge::{AppBarReservation, AppBarShell, Edge, Rect, WindowId};
use crate::fbgf_config::{self, Settings, KEY_DEFAULT_FOLDER};
use crate::fbgm_menu::{FolderProjector, MenuNode, NodeKind};
use crate::fbgo_open::SystemOpener;
use crate::fbgq_queue::UiQueue;
use crate::fbgr_registry::{BarRegistry, Flow, ProjectionMode};
use crate::fbgt_types::{BarMessage, DisplayId, DisplayInfo};

// ============================================================================================
// Constants and shared window state
// ============================================================================================

const WM_APP_WAKE: u32 = WM_APP + 1;
const WM_APP_TRAY: u32 = WM_APP + 2;
const WM_APP_APPBAR: u32 = WM_APP + 3;

const TRAY_SELECT: usize = 1;
const TRAY_REFRESH: usize = 2;
const TRAY_EXIT: usize = 3;

const BUTTON_ID_BASE: usize = 100;
const BUTTON_WIDTH: i32 = 150;
const BUTTON_GAP: i32 = 5;
const BUTTON_INSET: i32 = 5;
const FIRST_BUTTON_X: i32 = 10;

const BAR_CLASS: PCWSTR = w!("FolderBarWindow");
const DISPATCH_CLASS: PCWSTR = w!("FolderBarDispatch");

lazy_static::lazy_static! {
    static ref UI_QUEUE: Mutex<Option<UiQueue>> = Mutex::new(None);

    // Bar HWND → display it covers, for routing button clicks
    static ref BAR_WINDOWS: Mutex<HashMap<isize, DisplayId>> = Mutex::new(HashMap::new());
}

static TRAY_WINDOW: AtomicIsize = AtomicIsize::new(0);

fn post(message: BarMessage) {
    if let Some(queue) = UI_QUEUE.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
        queue.post(message);
    }
}

fn display_of(hwnd: HWND) -> Option<DisplayId> {
    BAR_WINDOWS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&(hwnd.0 as isize))
        .cloned()
}

fn hwnd_of(window: WindowId) -> HWND {
    HWND(window.0 as *mut c_void)
}

fn to_rect(rc: RECT) -> Rect {
    Rect::new(rc.left, rc.top, rc.right - rc.left, rc.bottom - rc.top)
}

fn from_rect(rect: Rect) -> RECT {
    RECT { left: rect.left, top: rect.top, right: rect.right(), bottom: rect.bottom() }
}

fn wide_array<const N: usize>(text: &str) -> [u16; N] {
    let mut out = [0u16; N];
    for (slot, unit) in out.iter_mut().take(N - 1).zip(text.encode_utf16()) {
        *slot = unit;
    }
    out
}

// ============================================================================================
// Appbar protocol
// ============================================================================================

pub struct Win32AppBar;

impl Win32AppBar {
    fn data(window: WindowId, edge: Edge, rect: Rect) -> APPBARDATA {
        APPBARDATA {
            cbSize: size_of::<APPBARDATA>() as u32,
            hWnd: hwnd_of(window),
            uCallbackMessage: WM_APP_APPBAR,
            uEdge: match edge {
                Edge::Top => ABE_TOP,
                Edge::Bottom => ABE_BOTTOM,
                Edge::Left => ABE_LEFT,
                Edge::Right => ABE_RIGHT,
            },
            rc: from_rect(rect),
            ..Default::default()
        }
    }
}

impl AppBarShell for Win32AppBar {
    fn register(&mut self, window: WindowId) -> bool {
        let mut abd = Self::data(window, Edge::Top, Rect::new(0, 0, 0, 0));
        unsafe { SHAppBarMessage(ABM_NEW, &mut abd) != 0 }
    }

    fn query_pos(&mut self, window: WindowId, edge: Edge, proposed: Rect) -> Rect {
        let mut abd = Self::data(window, edge, proposed);
        unsafe { SHAppBarMessage(ABM_QUERYPOS, &mut abd) };
        to_rect(abd.rc)
    }

    fn set_pos(&mut self, window: WindowId, edge: Edge, proposed: Rect) -> Rect {
        let mut abd = Self::data(window, edge, proposed);
        unsafe { SHAppBarMessage(ABM_SETPOS, &mut abd) };
        to_rect(abd.rc)
    }

    fn remove(&mut self, window: WindowId) {
        let mut abd = Self::data(window, Edge::Top, Rect::new(0, 0, 0, 0));
        unsafe { SHAppBarMessage(ABM_REMOVE, &mut abd) };
    }

    fn move_window(&mut self, window: WindowId, rect: Rect, _topmost: bool) -> bool {
        unsafe {
            SetWindowPos(hwnd_of(window), HWND_TOPMOST, rect.left, rect.top, rect.width, rect.height, SWP_NOACTIVATE)
                .is_ok()
        }
    }
}

// ============================================================================================
// Bar window
// ============================================================================================

pub struct Win32Surface {
    hwnd: isize,
    instance: HINSTANCE,
    height: i32,
    buttons: Vec<isize>,
}

impl Win32Surface {
    pub fn create(display: &DisplayInfo, height: i32, instance: HINSTANCE) -> WinResult<Self> {
        let b = display.bounds;
        let hwnd = unsafe {
            CreateWindowExW(
                WS_EX_TOOLWINDOW | WS_EX_TOPMOST,
                BAR_CLASS,
                w!("FolderBar"),
                WS_POPUP,
                b.left,
                b.top,
                b.width,
                height,
                None,
                None,
                instance,
                None,
            )?
        };

        BAR_WINDOWS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hwnd.0 as isize, display.id.clone());
        unsafe {
            let _ = ShowWindow(hwnd, SW_SHOWNOACTIVATE);
        }
        debug!(display = %display.id, "bar window created");

        Ok(Self { hwnd: hwnd.0 as isize, instance, height, buttons: Vec::new() })
    }

    fn hwnd(&self) -> HWND {
        HWND(self.hwnd as *mut c_void)
    }

    fn clear_buttons(&mut self) {
        for button in self.buttons.drain(..) {
            unsafe {
                let _ = DestroyWindow(HWND(button as *mut c_void));
            }
        }
    }
}

/// Build a popup menu for `nodes`; command id N opens `targets[N - 1]`
unsafe fn build_menu(nodes: &[MenuNode], targets: &mut Vec<PathBuf>) -> WinResult<HMENU> {
    let menu = CreatePopupMenu()?;
    if nodes.is_empty() {
        AppendMenuW(menu, MF_STRING | MF_GRAYED, 0, w!("(empty)"))?;
    }
    for node in nodes {
        let label = HSTRING::from(node.display_name.as_str());
        if node.kind == NodeKind::SubmenuFolder {
            let submenu = build_menu(&node.children, targets)?;
            AppendMenuW(menu, MF_POPUP, submenu.0 as usize, &label)?;
        } else {
            targets.push(node.target_path.clone());
            AppendMenuW(menu, MF_STRING, targets.len(), &label)?;
        }
    }
    Ok(menu)
}

impl BarSurface for Win32Surface {
    fn window(&self) -> WindowId {
        WindowId(self.hwnd)
    }

    fn render(&mut self, tree: &[MenuNode]) {
        self.clear_buttons();

        let mut x = FIRST_BUTTON_X;
        for (index, node) in tree.iter().enumerate() {
            let label = HSTRING::from(node.display_name.as_str());
            let created = unsafe {
                CreateWindowExW(
                    WINDOW_EX_STYLE(0),
                    w!("BUTTON"),
                    &label,
                    WS_CHILD | WS_VISIBLE | WINDOW_STYLE(BS_PUSHBUTTON as u32),
                    x,
                    BUTTON_INSET,
                    BUTTON_WIDTH,
                    self.height - 2 * BUTTON_INSET,
                    self.hwnd(),
                    HMENU((BUTTON_ID_BASE + index) as *mut c_void),
                    self.instance,
                    None,
                )
            };
            match created {
                Ok(button) => self.buttons.push(button.0 as isize),
                Err(e) => warn!(label = %node.display_name, error = %e, "failed to create bar button"),
            }
            x += BUTTON_WIDTH + BUTTON_GAP;
        }
    }

    fn show_cascade(&mut self, anchor: usize, nodes: &[MenuNode]) -> Option<PathBuf> {
        let button = HWND(*self.buttons.get(anchor)? as *mut c_void);
        let mut targets = Vec::new();

        unsafe {
            let mut rc = RECT::default();
            GetWindowRect(button, &mut rc).ok()?;

            let menu = match build_menu(nodes, &mut targets) {
                Ok(menu) => menu,
                Err(e) => {
                    warn!(error = %e, "failed to build cascade menu");
                    return None;
                }
            };

            let _ = SetForegroundWindow(self.hwnd());
            let picked = TrackPopupMenu(
                menu,
                TPM_RETURNCMD | TPM_NONOTIFY | TPM_LEFTALIGN | TPM_TOPALIGN,
                rc.left,
                rc.bottom,
                0,
                self.hwnd(),
                None,
            );
            let _ = DestroyMenu(menu);

            let command = picked.0 as usize;
            (command > 0).then(|| targets.get(command - 1).cloned()).flatten()
        }
    }

    fn notify(&mut self, message: &str) {
        show_balloon("FolderBar", message);
    }
}

impl Drop for Win32Surface {
    fn drop(&mut self) {
        BAR_WINDOWS.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.hwnd);
        unsafe {
            // Child buttons go with the parent
            let _ = DestroyWindow(self.hwnd());
        }
    }
}

unsafe extern "system" fn bar_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    match msg {
        WM_COMMAND => {
            let id = wparam.0 & 0xffff;
            let notification = (wparam.0 >> 16) & 0xffff;
            if notification == 0 && id >= BUTTON_ID_BASE {
                if let Some(display) = display_of(hwnd) {
                    post(BarMessage::Activate { display, index: id - BUTTON_ID_BASE });
                }
            }
            LRESULT(0)
        }
        WM_APP_APPBAR => {
            if wparam.0 as u32 == ABN_POSCHANGED {
                if let Some(display) = display_of(hwnd) {
                    post(BarMessage::EdgeChanged(display));
                }
            }
            LRESULT(0)
        }
        WM_CLOSE => {
            // The registry releases the edge, then drops the surface which destroys us
            if let Some(display) = display_of(hwnd) {
                post(BarMessage::Close(display));
            }
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

// ============================================================================================
// Displays
// ============================================================================================

unsafe extern "system" fn collect_monitor(monitor: HMONITOR, _hdc: HDC, _clip: *mut RECT, data: LPARAM) -> BOOL {
    let displays = &mut *(data.0 as *mut Vec<DisplayInfo>);
    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = size_of::<MONITORINFOEXW>() as u32;

    if GetMonitorInfoW(monitor, &mut info.monitorInfo).as_bool() {
        let len = info.szDevice.iter().position(|&c| c == 0).unwrap_or(info.szDevice.len());
        displays.push(DisplayInfo {
            id: DisplayId(String::from_utf16_lossy(&info.szDevice[..len])),
            bounds: to_rect(info.monitorInfo.rcMonitor),
        });
    }
    TRUE
}

pub fn enumerate_displays() -> Vec<DisplayInfo> {
    let mut displays: Vec<DisplayInfo> = Vec::new();
    unsafe {
        let _ = EnumDisplayMonitors(None, None, Some(collect_monitor), LPARAM(&mut displays as *mut _ as isize));
    }
    info!(count = displays.len(), "displays enumerated");
    displays
}

// ============================================================================================
// Tray icon and dispatcher window
// ============================================================================================

fn tray_data(hwnd: HWND) -> NOTIFYICONDATAW {
    NOTIFYICONDATAW {
        cbSize: size_of::<NOTIFYICONDATAW>() as u32,
        hWnd: hwnd,
        uID: 1,
        ..Default::default()
    }
}

unsafe fn add_tray_icon(hwnd: HWND) -> WinResult<()> {
    let mut data = tray_data(hwnd);
    data.uFlags = NIF_MESSAGE | NIF_ICON | NIF_TIP;
    data.uCallbackMessage = WM_APP_TRAY;
    data.hIcon = LoadIconW(None, IDI_APPLICATION)?;
    data.szTip = wide_array("Top Bar");
    Shell_NotifyIconW(NIM_ADD, &data).ok()
}

unsafe fn remove_tray_icon(hwnd: HWND) {
    let data = tray_data(hwnd);
    let _ = Shell_NotifyIconW(NIM_DELETE, &data);
}

fn show_balloon(title: &str, text: &str) {
    let raw = TRAY_WINDOW.load(Ordering::Acquire);
    if raw == 0 {
        return;
    }
    let mut data = tray_data(HWND(raw as *mut c_void));
    data.uFlags = NIF_INFO;
    data.szInfo = wide_array(text);
    data.szInfoTitle = wide_array(title);
    data.dwInfoFlags = NIIF_WARNING;
    unsafe {
        let _ = Shell_NotifyIconW(NIM_MODIFY, &data);
    }
}

unsafe fn browse_for_folder(owner: HWND) -> Option<PathBuf> {
    let info = BROWSEINFOW {
        hwndOwner: owner,
        lpszTitle: w!("Select the folder to show on the bar"),
        ulFlags: BIF_RETURNONLYFSDIRS | BIF_NEWDIALOGSTYLE,
        ..Default::default()
    };

    let pidl = SHBrowseForFolderW(&info);
    if pidl.is_null() {
        return None;
    }

    let mut buf = [0u16; 260];
    let ok = SHGetPathFromIDListW(pidl, &mut buf).as_bool();
    CoTaskMemFree(Some(pidl as *const c_void));

    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    (ok && len > 0).then(|| PathBuf::from(OsString::from_wide(&buf[..len])))
}

unsafe fn show_tray_menu(hwnd: HWND) {
    let Ok(menu) = CreatePopupMenu() else {
        return;
    };
    let _ = AppendMenuW(menu, MF_STRING, TRAY_SELECT, w!("Select Folder"));
    let _ = AppendMenuW(menu, MF_STRING, TRAY_REFRESH, w!("Refresh"));
    let _ = AppendMenuW(menu, MF_SEPARATOR, 0, PCWSTR::null());
    let _ = AppendMenuW(menu, MF_STRING, TRAY_EXIT, w!("Exit"));

    let mut pt = POINT::default();
    let _ = GetCursorPos(&mut pt);
    let _ = SetForegroundWindow(hwnd);
    let command = TrackPopupMenu(menu, TPM_RETURNCMD | TPM_NONOTIFY | TPM_RIGHTBUTTON, pt.x, pt.y, 0, hwnd, None);
    let _ = DestroyMenu(menu);

    match command.0 as usize {
        TRAY_SELECT => {
            if let Some(path) = browse_for_folder(hwnd) {
                post(BarMessage::SetRoot(path));
            }
        }
        TRAY_REFRESH => post(BarMessage::Refresh),
        TRAY_EXIT => post(BarMessage::Shutdown),
        _ => {}
    }
}

unsafe extern "system" fn dispatch_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    match msg {
        // Only here to make GetMessageW return; the loop drains the queue
        WM_APP_WAKE => LRESULT(0),
        WM_APP_TRAY => {
            let event = (lparam.0 as u32) & 0xffff;
            if event == WM_RBUTTONUP || event == WM_LBUTTONUP {
                show_tray_menu(hwnd);
            }
            LRESULT(0)
        }
        WM_DISPLAYCHANGE => {
            post(BarMessage::DisplaysChanged);
            DefWindowProcW(hwnd, msg, wparam, lparam)
        }
        WM_CLOSE => LRESULT(0),
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

unsafe fn register_classes(instance: HINSTANCE) -> WinResult<()> {
    let cursor = LoadCursorW(None, IDC_ARROW)?;

    let bar = WNDCLASSW {
        lpfnWndProc: Some(bar_proc),
        hInstance: instance,
        hCursor: cursor,
        hbrBackground: GetSysColorBrush(COLOR_BTNFACE),
        lpszClassName: BAR_CLASS,
        ..Default::default()
    };
    let dispatch = WNDCLASSW {
        lpfnWndProc: Some(dispatch_proc),
        hInstance: instance,
        lpszClassName: DISPATCH_CLASS,
        ..Default::default()
    };

    if RegisterClassW(&bar) == 0 || RegisterClassW(&dispatch) == 0 {
        return Err(windows::core::Error::from_win32());
    }
    Ok(())
}

// ============================================================================================
// Entry point
// ============================================================================================

fn persist_root(config_path: &Path, root: &Path) {
    if let Err(e) = fbgf_config::write_setting(config_path, KEY_DEFAULT_FOLDER, &root.to_string_lossy()) {
        warn!(error = %e, "could not save root folder");
    }
}

/// Run the bars until the tray's Exit command
pub fn run(settings: Settings, config_path: PathBuf) -> WinResult<()> {
    unsafe {
        CoInitializeEx(None, COINIT_APARTMENTTHREADED).ok()?;
        let instance: HINSTANCE = GetModuleHandleW(None)?.into();
        register_classes(instance)?;

        let dispatcher = CreateWindowExW(
            WINDOW_EX_STYLE(0),
            DISPATCH_CLASS,
            w!("FolderBar"),
            WS_OVERLAPPED,
            0,
            0,
            0,
            0,
            None,
            None,
            instance,
            None,
        )?;
        let dispatcher_raw = dispatcher.0 as isize;
        TRAY_WINDOW.store(dispatcher_raw, Ordering::Release);

        let (queue, rx) = UiQueue::channel();
        let queue = queue.with_waker(move || {
            let _ = PostMessageW(HWND(dispatcher_raw as *mut c_void), WM_APP_WAKE, WPARAM(0), LPARAM(0));
        });
        *UI_QUEUE.lock().unwrap_or_else(PoisonError::into_inner) = Some(queue.clone());

        if let Err(e) = add_tray_icon(dispatcher) {
            warn!(error = %e, "tray icon unavailable");
        }

        let height = settings.bar_height;
        let make_surface = |display: &DisplayInfo| Win32Surface::create(display, height, instance);

        let mut registry = BarRegistry::new(
            AppBarReservation::new(Win32AppBar),
            FolderProjector::new(settings.policy()),
            Box::new(SystemOpener),
            queue,
            settings.bar_options(),
            ProjectionMode::Background,
            settings.root.clone(),
        );
        registry.sync_displays(&enumerate_displays(), make_surface);
        info!(bars = registry.bars().len(), "folder bar running");

        let mut msg = MSG::default();
        'pump: loop {
            if GetMessageW(&mut msg, None, 0, 0).0 <= 0 {
                break;
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);

            while let Ok(message) = rx.try_recv() {
                if let BarMessage::SetRoot(root) = &message {
                    persist_root(&config_path, root);
                }
                match registry.handle(message) {
                    Flow::Continue => {}
                    Flow::Rescan => registry.sync_displays(&enumerate_displays(), make_surface),
                    Flow::Exit => break 'pump,
                }
            }
        }

        // Reservations are released before any bar window is destroyed
        registry.shutdown();
        drop(registry);

        *UI_QUEUE.lock().unwrap_or_else(PoisonError::into_inner) = None;
        remove_tray_icon(dispatcher);
        TRAY_WINDOW.store(0, Ordering::Release);
        if let Err(e) = DestroyWindow(dispatcher) {
            error!(error = %e, "failed to destroy dispatcher window");
        }
        CoUninitialize();
    }
    info!("folder bar stopped");
    Ok(())
}
