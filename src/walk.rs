//! Snapshot tree walking and diffing
//!
//! Produces the pruned tree of entries a destination needs written. A full
//! walk lists every blob of one snapshot; an incremental walk keeps only the
//! blobs whose content id differs from the baseline snapshot at the same
//! path. Paths that exist only in the baseline are not reported: mirroring is
//! add-or-update, never delete.
//!
//! Entries that cannot be materialized as plain files are dropped with a
//! warning: names that are not valid UTF-8, names that could leave their
//! directory (`.`, `..`, or containing a separator or NUL), symbolic links
//! and submodules.

use anyhow::{Context, Result};
use git2::{ErrorCode, ObjectType, Repository, Tree};

use crate::error::Error;
use crate::storage::ContentId;

/// Names never walked, at any depth
pub const IGNORED_NAMES: [&str; 4] = [".git", ".gitignore", "LICENSE", "README.md"];

pub fn is_ignored(name: &str) -> bool {
    IGNORED_NAMES.contains(&name)
}

const SYMLINK_MODE: i32 = 0o120000;

/// True when `name` names exactly one entry inside its parent directory
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
}

/// A retained entry. Tree nodes always have at least one child, except the
/// root of an empty result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkNode {
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub id: ContentId,
    pub children: Vec<WalkNode>,
}

impl WalkNode {
    fn root(id: ContentId, children: Vec<WalkNode>) -> Self {
        WalkNode {
            path: String::new(),
            name: String::new(),
            kind: EntryKind::Tree,
            id,
            children,
        }
    }

    /// Number of blobs at or below this node
    pub fn blob_count(&self) -> usize {
        match self.kind {
            EntryKind::Blob => 1,
            EntryKind::Tree => self.children.iter().map(WalkNode::blob_count).sum(),
        }
    }

    fn collect_blob_paths(&self, paths: &mut Vec<String>) {
        match self.kind {
            EntryKind::Blob => paths.push(self.path.clone()),
            EntryKind::Tree => {
                for child in &self.children {
                    child.collect_blob_paths(paths);
                }
            }
        }
    }
}

/// Output of a walk: the retained tree and how many blobs it targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkResult {
    pub root: WalkNode,
    pub total: usize,
}

impl WalkResult {
    /// A result with nothing to write
    pub fn empty(root_id: ContentId) -> Self {
        WalkResult {
            root: WalkNode::root(root_id, Vec::new()),
            total: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Paths of all retained blobs, sorted
    pub fn blob_paths(&self) -> Vec<String> {
        let mut paths = Vec::with_capacity(self.total);
        self.root.collect_blob_paths(&mut paths);
        paths.sort();
        paths
    }
}

/// Accumulator threaded through the recursion
#[derive(Debug, Default)]
struct WalkCounter {
    blobs: usize,
}

/// List every non-ignored blob of the snapshot `tree_id`
pub fn walk_full(repo: &Repository, tree_id: ContentId) -> Result<WalkResult> {
    let tree = find_tree(repo, tree_id)?;
    let mut counter = WalkCounter::default();
    let children = walk_tree(repo, &tree, None, "", &mut counter)?;
    tracing::debug!("Full walk of {} targets {} file(s)", tree_id, counter.blobs);
    Ok(WalkResult {
        root: WalkNode::root(tree_id, children),
        total: counter.blobs,
    })
}

/// List the blobs of `head` that are new or changed relative to `baseline`
pub fn walk_incremental(
    repo: &Repository,
    head: ContentId,
    baseline: ContentId,
) -> Result<WalkResult> {
    if head == baseline {
        tracing::debug!("Checkpoint {} unchanged, nothing to walk", head);
        return Ok(WalkResult::empty(head));
    }

    let tree = find_tree(repo, head)?;
    let baseline_tree = if baseline.is_empty_tree() {
        None
    } else {
        Some(find_tree(repo, baseline)?)
    };

    let mut counter = WalkCounter::default();
    let children = walk_tree(repo, &tree, baseline_tree.as_ref(), "", &mut counter)?;
    tracing::debug!(
        "Incremental walk {}..{} targets {} file(s)",
        baseline,
        head,
        counter.blobs
    );
    Ok(WalkResult {
        root: WalkNode::root(head, children),
        total: counter.blobs,
    })
}

fn find_tree(repo: &Repository, id: ContentId) -> Result<Tree<'_>> {
    match repo.find_tree(id.oid()) {
        Ok(tree) => Ok(tree),
        Err(e) if e.code() == ErrorCode::NotFound => Err(Error::UnknownCheckpoint(id).into()),
        Err(e) => Err(Error::from(e)).with_context(|| format!("Failed to read tree {}", id)),
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Walk `tree` against the optional `baseline` tree at the same path,
/// returning the retained children
fn walk_tree(
    repo: &Repository,
    tree: &Tree<'_>,
    baseline: Option<&Tree<'_>>,
    prefix: &str,
    counter: &mut WalkCounter,
) -> Result<Vec<WalkNode>> {
    let mut retained = Vec::new();

    for entry in tree.iter() {
        let name = match entry.name() {
            Some(name) => name.to_string(),
            None => {
                tracing::warn!(
                    "Skipping entry with non UTF-8 name {:?} in {:?}",
                    String::from_utf8_lossy(entry.name_bytes()),
                    prefix
                );
                continue;
            }
        };
        if is_ignored(&name) {
            continue;
        }
        if !is_plain_name(&name) {
            tracing::warn!("Skipping entry {:?} in {:?}: not a plain file name", name, prefix);
            continue;
        }
        let kind = match (entry.kind(), entry.filemode()) {
            (_, SYMLINK_MODE) => {
                tracing::warn!("Skipping symbolic link {}", join_path(prefix, &name));
                continue;
            }
            (Some(ObjectType::Blob), _) => EntryKind::Blob,
            (Some(ObjectType::Tree), _) => EntryKind::Tree,
            (other, _) => {
                // Submodule commits have no content in this repository.
                tracing::debug!("Skipping {} entry {}", describe(other), join_path(prefix, &name));
                continue;
            }
        };

        let baseline_entry = baseline.and_then(|b| b.get_name_bytes(entry.name_bytes()));
        if baseline_entry
            .as_ref()
            .is_some_and(|previous| previous.id() == entry.id())
        {
            continue;
        }

        let path = join_path(prefix, &name);
        match kind {
            EntryKind::Blob => {
                counter.blobs += 1;
                retained.push(WalkNode {
                    path,
                    name,
                    kind,
                    id: entry.id().into(),
                    children: Vec::new(),
                });
            }
            EntryKind::Tree => {
                let subtree = repo
                    .find_tree(entry.id())
                    .map_err(Error::from)
                    .with_context(|| format!("Failed to read tree {}", path))?;
                let baseline_subtree = match baseline_entry {
                    Some(previous) if previous.kind() == Some(ObjectType::Tree) => Some(
                        repo.find_tree(previous.id())
                            .map_err(Error::from)
                            .with_context(|| format!("Failed to read baseline tree {}", path))?,
                    ),
                    _ => None,
                };
                let children =
                    walk_tree(repo, &subtree, baseline_subtree.as_ref(), &path, counter)?;
                if children.is_empty() {
                    continue;
                }
                retained.push(WalkNode {
                    path,
                    name,
                    kind,
                    id: entry.id().into(),
                    children,
                });
            }
        }
    }

    Ok(retained)
}

fn describe(kind: Option<ObjectType>) -> &'static str {
    match kind {
        Some(ObjectType::Commit) => "submodule",
        Some(ObjectType::Tag) => "tag",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use git2::{build::TreeUpdateBuilder, FileMode, Oid};
    use tempfile::TempDir;

    use super::*;

    fn test_repo() -> (TempDir, Repository) {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init_bare(temp.path()).unwrap();
        (temp, repo)
    }

    /// Build a tree holding `files` (path, content)
    fn build_tree(repo: &Repository, files: &[(&str, &str)]) -> ContentId {
        let empty = repo.treebuilder(None).unwrap().write().unwrap();
        let base = repo.find_tree(empty).unwrap();
        let mut builder = TreeUpdateBuilder::new();
        for (path, content) in files {
            let blob: Oid = repo.blob(content.as_bytes()).unwrap();
            builder.upsert(*path, blob, FileMode::Blob);
        }
        builder.create_updated(repo, &base).unwrap().into()
    }

    #[test]
    fn test_full_walk_skips_ignored_names() {
        let (_temp, repo) = test_repo();
        let tree = build_tree(
            &repo,
            &[("README.md", "readme"), ("src/a.txt", "1"), ("src/b.txt", "2")],
        );

        let result = walk_full(&repo, tree).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.blob_paths(), vec!["src/a.txt", "src/b.txt"]);

        let src = &result.root.children[0];
        assert_eq!(src.kind, EntryKind::Tree);
        assert_eq!(src.path, "src");
        assert_eq!(src.children[0].name, "a.txt");
    }

    #[test]
    fn test_incremental_walk_keeps_changed_blob() {
        let (_temp, repo) = test_repo();
        let before = build_tree(
            &repo,
            &[("README.md", "readme"), ("src/a.txt", "1"), ("src/b.txt", "2")],
        );
        let after = build_tree(
            &repo,
            &[("README.md", "readme"), ("src/a.txt", "9"), ("src/b.txt", "2")],
        );

        let result = walk_incremental(&repo, after, before).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.blob_paths(), vec!["src/a.txt"]);
    }

    #[test]
    fn test_incremental_walk_same_checkpoint_is_empty() {
        let (_temp, repo) = test_repo();
        let tree = build_tree(&repo, &[("src/a.txt", "1")]);

        let result = walk_incremental(&repo, tree, tree).unwrap();
        assert!(result.is_empty());
        assert!(result.root.children.is_empty());
    }

    #[test]
    fn test_empty_baseline_matches_full_walk() {
        let (_temp, repo) = test_repo();
        let tree = build_tree(
            &repo,
            &[
                ("LICENSE", "MIT"),
                ("a.txt", "a"),
                ("deep/er/still/b.txt", "b"),
                ("deep/c.txt", "c"),
            ],
        );

        let full = walk_full(&repo, tree).unwrap();
        let incremental = walk_incremental(&repo, tree, ContentId::empty_tree()).unwrap();
        assert_eq!(full.blob_paths(), incremental.blob_paths());
        assert_eq!(full.total, incremental.total);
        assert_eq!(full.total, 3);
    }

    #[test]
    fn test_directory_of_ignored_entries_is_pruned() {
        let (_temp, repo) = test_repo();
        let tree = build_tree(
            &repo,
            &[
                ("docs/LICENSE", "MIT"),
                ("docs/inner/README.md", "readme"),
                ("nested/a/b/c.txt", "c"),
            ],
        );

        let result = walk_full(&repo, tree).unwrap();
        assert_eq!(result.blob_paths(), vec!["nested/a/b/c.txt"]);
        assert_eq!(result.root.children.len(), 1);
        assert_eq!(result.root.children[0].name, "nested");
    }

    #[test]
    fn test_unchanged_directory_is_pruned() {
        let (_temp, repo) = test_repo();
        let before = build_tree(&repo, &[("lib/x.txt", "x"), ("bin/y.txt", "y")]);
        let after = build_tree(&repo, &[("lib/x.txt", "x"), ("bin/y.txt", "y2")]);

        let result = walk_incremental(&repo, after, before).unwrap();
        assert_eq!(result.root.children.len(), 1);
        assert_eq!(result.root.children[0].path, "bin");
        assert_eq!(result.blob_paths(), vec!["bin/y.txt"]);
    }

    #[test]
    fn test_deletions_are_not_reported() {
        let (_temp, repo) = test_repo();
        let before = build_tree(&repo, &[("keep.txt", "k"), ("gone.txt", "g")]);
        let after = build_tree(&repo, &[("keep.txt", "k"), ("new.txt", "n")]);

        let result = walk_incremental(&repo, after, before).unwrap();
        assert_eq!(result.blob_paths(), vec!["new.txt"]);
    }

    #[test]
    fn test_tree_replacing_blob_is_walked_from_scratch() {
        let (_temp, repo) = test_repo();
        let before = build_tree(&repo, &[("conf", "flat")]);
        let after = build_tree(&repo, &[("conf/a.txt", "a"), ("conf/b.txt", "b")]);

        let result = walk_incremental(&repo, after, before).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.blob_paths(), vec!["conf/a.txt", "conf/b.txt"]);
    }

    /// Write a tree object byte by byte, with names libgit2 would refuse
    fn raw_tree(repo: &Repository, entries: &[(&str, &[u8], Oid)]) -> ContentId {
        let mut data = Vec::new();
        for (mode, name, id) in entries {
            data.extend_from_slice(mode.as_bytes());
            data.push(b' ');
            data.extend_from_slice(name);
            data.push(0);
            data.extend_from_slice(id.as_bytes());
        }
        repo.odb()
            .unwrap()
            .write(ObjectType::Tree, &data)
            .unwrap()
            .into()
    }

    #[test]
    fn test_is_plain_name() {
        assert!(is_plain_name("a.txt"));
        assert!(is_plain_name(".hidden"));
        assert!(!is_plain_name(""));
        assert!(!is_plain_name("."));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("a/b"));
        assert!(!is_plain_name("a\\b"));
        assert!(!is_plain_name("a\0b"));
    }

    #[test]
    fn test_parent_directory_entry_is_skipped() {
        let (_temp, repo) = test_repo();
        let inner = build_tree(&repo, &[("evil.txt", "x")]);
        let blob = repo.blob(b"ok").unwrap();
        let root = raw_tree(
            &repo,
            &[
                ("40000", &b".."[..], inner.oid()),
                ("100644", &b"a\\b"[..], blob),
                ("100644", &b"ok.txt"[..], blob),
            ],
        );

        let result = walk_full(&repo, root).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.blob_paths(), vec!["ok.txt"]);

        let incremental = walk_incremental(&repo, root, ContentId::empty_tree()).unwrap();
        assert_eq!(incremental.blob_paths(), vec!["ok.txt"]);
    }

    #[test]
    fn test_symlink_and_non_utf8_names_are_skipped() {
        let (_temp, repo) = test_repo();
        let blob = repo.blob(b"content").unwrap();
        let target = repo.blob(b"/etc/passwd").unwrap();
        let root = raw_tree(
            &repo,
            &[
                ("100644", &b"caf\xe9.txt"[..], blob),
                ("120000", &b"link"[..], target),
                ("100644", &b"plain.txt"[..], blob),
            ],
        );

        let result = walk_full(&repo, root).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.blob_paths(), vec!["plain.txt"]);
    }

    #[test]
    fn test_unknown_baseline() {
        let (_temp, repo) = test_repo();
        let tree = build_tree(&repo, &[("a.txt", "a")]);
        let missing = ContentId::parse("9daeafb9864cf43055ae93beb0afd6c7d144bfa4").unwrap();

        let err = walk_incremental(&repo, tree, missing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnknownCheckpoint(id)) if *id == missing
        ));
    }
}
