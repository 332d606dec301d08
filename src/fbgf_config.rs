// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// Settings File I/O
/// Reads and writes the appSettings-style XML file at
/// <local data dir>/folderbar/folderbar.config
///
/// Responsibilities:
/// - Config path resolution
/// - Deploying a default file when none exists (an existing file is never replaced)
/// - Parsing <add key=".." value=".."/> entries into Settings
/// - Updating a single key in place (used when the root folder changes)

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fbgb_bar::BarOptions;
use crate::fbgm_menu::{ProjectionPolicy, DEFAULT_MAX_DEPTH, DEFAULT_SUBMENU_MARKER};

// ============================================================================
// SECTION 1: Keys and defaults
// ============================================================================

pub const KEY_DEFAULT_FOLDER: &str = "DefaultFolder";
pub const KEY_SHOW_HIDDEN: &str = "ShowHiddenFiles";
pub const KEY_BLACKLIST: &str = "BlacklistExtensions";
pub const KEY_BAR_HEIGHT: &str = "BarHeight";
pub const KEY_SUBMENU_MARKER: &str = "SubmenuMarker";
pub const KEY_MAX_DEPTH: &str = "MaxDepth";
pub const KEY_DEBOUNCE: &str = "DebounceMillis";

const DEFAULT_BLACKLIST: &str = ".lnk,.exe,.url,.bat,.cmd,.ps1";
const DEFAULT_BAR_HEIGHT: i32 = 30;
const DEFAULT_DEBOUNCE_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config XML error: {0}")]
    Xml(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub root: Option<PathBuf>,
    pub show_hidden: bool,
    pub blacklist: Vec<String>,
    pub bar_height: i32,
    pub submenu_marker: String,
    pub max_depth: usize,
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: None,
            show_hidden: false,
            blacklist: split_list(DEFAULT_BLACKLIST),
            bar_height: DEFAULT_BAR_HEIGHT,
            submenu_marker: DEFAULT_SUBMENU_MARKER.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl Settings {
    pub fn policy(&self) -> ProjectionPolicy {
        ProjectionPolicy::new(&self.blacklist, &self.submenu_marker, self.show_hidden)
    }

    pub fn bar_options(&self) -> BarOptions {
        BarOptions {
            thickness: self.bar_height,
            max_depth: self.max_depth,
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }

    fn from_entries(entries: &[(String, String)]) -> Self {
        let mut settings = Settings::default();
        for (key, raw) in entries {
            let value = expand_env(raw);
            match key.as_str() {
                KEY_DEFAULT_FOLDER => {
                    let trimmed = value.trim();
                    settings.root = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
                }
                KEY_SHOW_HIDDEN => parse_into(key, &value, &mut settings.show_hidden),
                KEY_BLACKLIST => settings.blacklist = split_list(&value),
                KEY_BAR_HEIGHT => {
                    parse_into(key, &value, &mut settings.bar_height);
                    if settings.bar_height <= 0 {
                        warn!(height = settings.bar_height, "bar height must be positive, using default");
                        settings.bar_height = DEFAULT_BAR_HEIGHT;
                    }
                }
                KEY_SUBMENU_MARKER => settings.submenu_marker = value,
                KEY_MAX_DEPTH => parse_into(key, &value, &mut settings.max_depth),
                KEY_DEBOUNCE => parse_into(key, &value, &mut settings.debounce_ms),
                _ => debug!(%key, "ignoring unknown setting"),
            }
        }
        settings
    }
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(%key, %value, "invalid setting value, keeping default"),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand %NAME% references; unknown names are left as written
fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match env::var(name) {
                    Ok(expanded) => out.push_str(&expanded),
                    Err(_) => {
                        out.push('%');
                        out.push_str(name);
                        out.push('%');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// ============================================================================
// SECTION 2: Path resolution
// ============================================================================

pub fn config_path() -> PathBuf {
    let mut path = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    path.push("folderbar");
    path.push("folderbar.config");
    path
}

// ============================================================================
// SECTION 3: XML read / write
// ============================================================================

fn default_entries() -> Vec<(String, String)> {
    vec![
        (KEY_DEFAULT_FOLDER.to_string(), String::new()),
        (KEY_SHOW_HIDDEN.to_string(), "false".to_string()),
        (KEY_BLACKLIST.to_string(), DEFAULT_BLACKLIST.to_string()),
    ]
}

fn parse_entries(xml: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut in_app_settings = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"appSettings" => in_app_settings = true,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"appSettings" => in_app_settings = false,
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if in_app_settings && e.name().as_ref() == b"add" => {
                let mut key: Option<String> = None;
                let mut value = String::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| ConfigError::Xml(format!("attribute error: {}", e)))?;
                    let text = attr
                        .unescape_value()
                        .map_err(|e| ConfigError::Xml(format!("bad attribute value: {}", e)))?
                        .into_owned();
                    match attr.key.as_ref() {
                        b"key" => key = Some(text),
                        b"value" => value = text,
                        _ => {}
                    }
                }
                match key {
                    Some(key) => entries.push((key, value)),
                    None => warn!("setting without key attribute ignored"),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ConfigError::Xml(format!("parse error at {}: {}", reader.buffer_position(), e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

fn render_entries(entries: &[(String, String)]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<configuration>\n  <appSettings>\n");
    for (key, value) in entries {
        xml.push_str(&format!("    <add key=\"{}\" value=\"{}\" />\n", escape(key.as_str()), escape(value.as_str())));
    }
    xml.push_str("  </appSettings>\n</configuration>\n");
    xml
}

pub fn parse_settings(xml: &str) -> Result<Settings, ConfigError> {
    parse_entries(xml).map(|entries| Settings::from_entries(&entries))
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io { path: path.to_path_buf(), source }
}

/// Write the default file unless one is already there
pub fn ensure_config_file(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::write(path, render_entries(&default_entries())).map_err(io_error(path))?;
    info!(path = %path.display(), "created default settings");
    Ok(())
}

pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    ensure_config_file(path)?;
    let xml = fs::read_to_string(path).map_err(io_error(path))?;
    parse_settings(&xml)
}

/// Settings from the standard location; defaults when the file is unusable
pub fn load_or_default() -> Settings {
    let path = config_path();
    match load_from(&path) {
        Ok(settings) => {
            debug!(path = %path.display(), ?settings, "settings loaded");
            settings
        }
        Err(e) => {
            warn!(error = %e, "settings unavailable, using defaults");
            Settings::default()
        }
    }
}

/// Update or insert one key, keeping every other entry as written
pub fn write_setting(path: &Path, key: &str, value: &str) -> Result<(), ConfigError> {
    ensure_config_file(path)?;
    let xml = fs::read_to_string(path).map_err(io_error(path))?;
    let mut entries = parse_entries(&xml)?;

    match entries.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => entries.push((key.to_string(), value.to_string())),
    }

    fs::write(path, render_entries(&entries)).map_err(io_error(path))?;
    debug!(%key, %value, "setting saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_app_settings_layout() {
        let xml = r#"
            <configuration>
              <appSettings>
                <add key="DefaultFolder" value="C:\Users\me\Desktop\bar" />
                <add key="ShowHiddenFiles" value="true" />
                <add key="BlacklistExtensions" value=".lnk, .exe ,,.url" />
                <add key="Unknown" value="whatever" />
              </appSettings>
            </configuration>
        "#;

        let settings = parse_settings(xml).unwrap();
        assert_eq!(settings.root, Some(PathBuf::from(r"C:\Users\me\Desktop\bar")));
        assert!(settings.show_hidden);
        assert_eq!(settings.blacklist, vec![".lnk", ".exe", ".url"]);
        assert_eq!(settings.bar_height, 30);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let xml = r#"
            <configuration><appSettings>
                <add key="BarHeight" value="-4" />
                <add key="MaxDepth" value="deep" />
                <add key="DefaultFolder" value="  " />
            </appSettings></configuration>
        "#;

        let settings = parse_settings(xml).unwrap();
        assert_eq!(settings.bar_height, 30);
        assert_eq!(settings.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(settings.root, None);
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(parse_settings("<configuration><appSettings><add key=\"a\" value=\"b\"></configuration>").is_err());
    }

    #[test]
    fn test_env_expansion() {
        env::set_var("FOLDERBAR_TEST_HOME", "/home/tester");
        assert_eq!(expand_env("%FOLDERBAR_TEST_HOME%/bar"), "/home/tester/bar");
        assert_eq!(expand_env("%FOLDERBAR_NOT_SET_ANYWHERE%/x"), "%FOLDERBAR_NOT_SET_ANYWHERE%/x");
        assert_eq!(expand_env("100% sure"), "100% sure");
        assert_eq!(expand_env("%%"), "%%");
    }

    #[test]
    fn test_default_file_created_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("folderbar.config");

        let settings = load_from(&path).unwrap();
        assert_eq!(settings, Settings::default());

        fs::write(&path, render_entries(&[(KEY_BAR_HEIGHT.to_string(), "40".to_string())])).unwrap();
        assert_eq!(load_from(&path).unwrap().bar_height, 40);
    }

    #[test]
    fn test_write_setting_updates_and_inserts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folderbar.config");

        write_setting(&path, KEY_DEFAULT_FOLDER, "/srv/a & b").unwrap();
        write_setting(&path, KEY_MAX_DEPTH, "3").unwrap();

        let settings = load_from(&path).unwrap();
        assert_eq!(settings.root, Some(PathBuf::from("/srv/a & b")));
        assert_eq!(settings.max_depth, 3);
        assert_eq!(settings.blacklist, split_list(DEFAULT_BLACKLIST));
    }

    #[test]
    fn test_policy_and_options() {
        let settings = Settings { debounce_ms: 80, bar_height: 24, ..Settings::default() };
        assert!(settings.policy().is_blacklisted(Path::new("x.LNK")));
        assert_eq!(settings.bar_options().thickness, 24);
        assert_eq!(settings.bar_options().debounce, Duration::from_millis(80));
    }
}
