// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Scale Invariant

/// Folder-to-menu projection
/// Turns a directory into the immutable MenuNode tree a bar renders
///
/// Policies applied per entry:
/// - Directories ending in the submenu marker become cascading submenus
/// - Blacklisted file extensions are hidden from labels, never from paths
/// - Hidden entries are skipped unless configured otherwise
/// - Recursion stops at `max_depth` levels (symlink cycles included)

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_SUBMENU_MARKER: &str = "-menuitem";
pub const DEFAULT_MAX_DEPTH: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
    SubmenuFolder,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuNode {
    pub display_name: String,
    pub target_path: PathBuf,
    pub kind: NodeKind,
    pub children: Vec<MenuNode>,
}

/// What clicking a node does
#[derive(Debug, PartialEq, Eq)]
pub enum Activation<'a> {
    Open(&'a Path),
    Cascade(&'a [MenuNode]),
}

impl MenuNode {
    pub fn activation(&self) -> Activation<'_> {
        match self.kind {
            NodeKind::SubmenuFolder => Activation::Cascade(&self.children),
            NodeKind::File | NodeKind::Folder => Activation::Open(&self.target_path),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProjectionPolicy {
    /// Lowercase extensions without the leading dot
    blacklist: HashSet<String>,
    pub submenu_marker: String,
    pub show_hidden: bool,
}

impl Default for ProjectionPolicy {
    fn default() -> Self {
        Self::new([".lnk", ".exe", ".url", ".bat", ".cmd", ".ps1"], DEFAULT_SUBMENU_MARKER, false)
    }
}

impl ProjectionPolicy {
    pub fn new<I, S>(blacklist: I, submenu_marker: &str, show_hidden: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blacklist = blacklist
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            blacklist,
            submenu_marker: submenu_marker.to_string(),
            show_hidden,
        }
    }

    pub fn is_blacklisted(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.blacklist.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Label with the marker removed, or None when the folder is not a submenu
    fn submenu_label<'a>(&self, name: &'a str) -> Option<&'a str> {
        if self.submenu_marker.is_empty() {
            return None;
        }
        name.strip_suffix(self.submenu_marker.as_str())
            .filter(|label| !label.is_empty())
    }
}

#[derive(Clone, Debug, Default)]
pub struct FolderProjector {
    policy: ProjectionPolicy,
}

impl FolderProjector {
    pub fn new(policy: ProjectionPolicy) -> Self {
        Self { policy }
    }

    #[cfg(test)]
    pub fn policy(&self) -> &ProjectionPolicy {
        &self.policy
    }

    /// Snapshot `root` into menu nodes, `max_depth` levels deep
    pub fn project(&self, root: &Path, max_depth: usize) -> Vec<MenuNode> {
        self.project_level(root, 1, max_depth)
    }

    fn project_level(&self, dir: &Path, level: usize, max_depth: usize) -> Vec<MenuNode> {
        if level > max_depth {
            return Vec::new();
        }

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot enumerate folder");
                return Vec::new();
            }
        };

        let mut nodes = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if let Some(node) = self.project_entry(&entry.path(), level, max_depth) {
                nodes.push(node);
            }
        }

        nodes.sort_by(compare_labels);
        nodes
    }

    fn project_entry(&self, path: &Path, level: usize, max_depth: usize) -> Option<MenuNode> {
        let name = path.file_name()?.to_string_lossy().into_owned();

        // Follows symlinks; a dangling link or a racing delete drops the entry
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "entry vanished during projection");
                return None;
            }
        };

        if !self.policy.show_hidden && is_hidden(&name, &metadata) {
            return None;
        }

        if metadata.is_dir() {
            if let Some(label) = self.policy.submenu_label(&name) {
                return Some(MenuNode {
                    display_name: label.to_string(),
                    target_path: path.to_path_buf(),
                    kind: NodeKind::SubmenuFolder,
                    children: self.project_level(path, level + 1, max_depth),
                });
            }
            return Some(MenuNode {
                display_name: name,
                target_path: path.to_path_buf(),
                kind: NodeKind::Folder,
                children: Vec::new(),
            });
        }

        let display_name = if self.policy.is_blacklisted(path) {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or(name)
        } else {
            name
        };

        Some(MenuNode {
            display_name,
            target_path: path.to_path_buf(),
            kind: NodeKind::File,
            children: Vec::new(),
        })
    }
}

fn compare_labels(a: &MenuNode, b: &MenuNode) -> Ordering {
    a.display_name
        .to_lowercase()
        .cmp(&b.display_name.to_lowercase())
        .then_with(|| a.target_path.cmp(&b.target_path))
}

#[cfg(windows)]
fn is_hidden(name: &str, metadata: &fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    name.starts_with('.') || metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(windows))]
fn is_hidden(name: &str, _metadata: &fs::Metadata) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn projector() -> FolderProjector {
        FolderProjector::new(ProjectionPolicy::new([".lnk", ".exe"], DEFAULT_SUBMENU_MARKER, false))
    }

    #[test]
    fn test_docs_scenario() {
        let docs = TempDir::new().unwrap();
        touch(&docs.path().join("report.lnk"));
        touch(&docs.path().join("proj-menuitem").join("a.txt"));

        let tree = projector().project(docs.path(), 5);

        assert_eq!(
            tree,
            vec![
                MenuNode {
                    display_name: "proj".into(),
                    target_path: docs.path().join("proj-menuitem"),
                    kind: NodeKind::SubmenuFolder,
                    children: vec![MenuNode {
                        display_name: "a.txt".into(),
                        target_path: docs.path().join("proj-menuitem").join("a.txt"),
                        kind: NodeKind::File,
                        children: vec![],
                    }],
                },
                MenuNode {
                    display_name: "report".into(),
                    target_path: docs.path().join("report.lnk"),
                    kind: NodeKind::File,
                    children: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_blacklist_is_case_insensitive_and_keeps_path() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("Setup.EXE"));
        touch(&dir.path().join("notes.txt"));

        let tree = projector().project(dir.path(), 1);
        let setup = tree.iter().find(|n| n.display_name == "Setup").unwrap();
        assert_eq!(setup.target_path, dir.path().join("Setup.EXE"));
        assert!(tree.iter().any(|n| n.display_name == "notes.txt"));
    }

    #[test]
    fn test_blacklist_accepts_bare_extensions() {
        let policy = ProjectionPolicy::new(["url", " .Bat "], DEFAULT_SUBMENU_MARKER, false);
        assert!(policy.is_blacklisted(Path::new("x/site.URL")));
        assert!(policy.is_blacklisted(Path::new("x/run.bat")));
        assert!(!policy.is_blacklisted(Path::new("x/.bat")));
    }

    #[test]
    fn test_folder_kinds() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("plain")).unwrap();
        fs::create_dir(dir.path().join("tools-menuitem")).unwrap();
        fs::create_dir(dir.path().join("-menuitem")).unwrap();

        let tree = projector().project(dir.path(), 3);
        let kind_of = |label: &str| tree.iter().find(|n| n.display_name == label).unwrap().kind;

        assert_eq!(kind_of("plain"), NodeKind::Folder);
        assert_eq!(kind_of("tools"), NodeKind::SubmenuFolder);
        assert_eq!(kind_of("-menuitem"), NodeKind::Folder);
    }

    #[test]
    fn test_blacklist_ignores_folders() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("archive.exe")).unwrap();

        let tree = projector().project(dir.path(), 1);
        assert_eq!(tree[0].display_name, "archive.exe");
        assert_eq!(tree[0].kind, NodeKind::Folder);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b.lnk"));
        touch(&dir.path().join("A.txt"));
        touch(&dir.path().join("x-menuitem").join("y-menuitem").join("z.exe"));

        let p = projector();
        assert_eq!(p.project(dir.path(), 8), p.project(dir.path(), 8));
    }

    #[test]
    fn test_depth_bound_truncates_chain() {
        let dir = TempDir::new().unwrap();
        let mut deep = dir.path().to_path_buf();
        for i in 0..6 {
            deep.push(format!("level{}-menuitem", i));
        }
        touch(&deep.join("leaf.txt"));

        let tree = projector().project(dir.path(), 3);
        let mut depth = 0;
        let mut level = &tree;
        while let Some(node) = level.first() {
            depth += 1;
            level = &node.children;
        }
        assert_eq!(depth, 3);
        assert!(projector().project(dir.path(), 0).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_bounded() {
        let dir = TempDir::new().unwrap();
        let loop_dir = dir.path().join("loop-menuitem");
        fs::create_dir(&loop_dir).unwrap();
        std::os::unix::fs::symlink(&loop_dir, loop_dir.join("again-menuitem")).unwrap();

        let tree = projector().project(dir.path(), 4);
        assert_eq!(tree[0].children[0].children[0].children[0].children.len(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_entry_is_skipped() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("kept.txt"));
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("broken")).unwrap();

        let tree = projector().project(dir.path(), 1);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].display_name, "kept.txt");
    }

    #[test]
    fn test_hidden_entries() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join(".secret"));
        touch(&dir.path().join("shown.txt"));

        assert_eq!(projector().project(dir.path(), 1).len(), 1);

        let all = FolderProjector::new(ProjectionPolicy::new([".lnk"], DEFAULT_SUBMENU_MARKER, true));
        assert_eq!(all.project(dir.path(), 1).len(), 2);
    }

    #[test]
    fn test_missing_root_projects_empty() {
        let dir = TempDir::new().unwrap();
        assert!(projector().project(&dir.path().join("nope"), 4).is_empty());
    }

    #[test]
    fn test_activation() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("m-menuitem").join("f.txt"));
        fs::create_dir(dir.path().join("plain")).unwrap();

        let tree = projector().project(dir.path(), 2);
        assert_eq!(tree[0].activation(), Activation::Cascade(&tree[0].children));
        assert_eq!(tree[1].activation(), Activation::Open(&dir.path().join("plain")));
    }
}
