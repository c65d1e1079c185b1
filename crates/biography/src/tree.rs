use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::BiographyError;
use crate::paths::{SectionOutline, validate_new_path, validate_path_format};
use crate::section::Section;

/// How a caller addresses a section: exact slash path, or title resolved by
/// depth-first search. The empty path addresses the root.
#[derive(Debug, Clone, Copy)]
pub enum SectionRef<'a> {
    Path(&'a str),
    Title(&'a str),
}

/// Seconds a save waits for in-flight mutations before giving up.
const PENDING_WRITES_TIMEOUT: Duration = Duration::from_secs(30);

/// The biography document for one user.
///
/// Concurrency contract: every mutating operation serializes on a single
/// tree-wide write guard; reads clone out of a read lock and never wait on
/// writers beyond the short critical section. A pending-writes counter
/// gates `save` so a snapshot never captures a partial mutation.
pub struct Biography {
    user_id: String,
    base_dir: PathBuf,
    root: RwLock<Section>,
    /// Version of the snapshot this tree was loaded from; bumped by `save`.
    version: AtomicU32,
    write_guard: Mutex<()>,
    pending_writes: watch::Sender<usize>,
}

impl Biography {
    pub fn new(user_id: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        let user_id = user_id.into();
        let root = Section::new(format!("Biography of {user_id}"), "");
        let (pending_writes, _) = watch::channel(0);
        Self {
            user_id,
            base_dir: base_dir.into(),
            root: RwLock::new(root),
            version: AtomicU32::new(0),
            write_guard: Mutex::new(()),
            pending_writes,
        }
    }

    /// Load the latest snapshot under `base_dir`, or a specific version.
    /// A missing store yields a fresh tree at version 0.
    pub fn load(
        user_id: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        version: Option<u32>,
    ) -> Result<Self> {
        let biography = Self::new(user_id, base_dir);

        let target = match version {
            Some(v) => v,
            None => latest_version(&biography.base_dir),
        };
        if target == 0 {
            return Ok(biography);
        }

        let path = biography.snapshot_path(target);
        let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let mut root: Section = serde_json::from_str(&raw)?;
        sort_recursively(&mut root);

        *biography.root.write().expect("tree lock poisoned") = root;
        biography.version.store(target, Ordering::SeqCst);
        info!(user = %biography.user_id, version = target, "biography loaded");
        Ok(biography)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Title-only snapshot for pure plan validation.
    pub fn outline(&self) -> SectionOutline {
        SectionOutline::from_section(&self.root.read().expect("tree lock poisoned"))
    }

    /// Titles-only nested listing used in planner prompts.
    pub fn sections_overview(&self) -> String {
        fn walk(section: &Section, depth: usize, out: &mut String) {
            if depth > 0 {
                out.push_str(&"  ".repeat(depth - 1));
                out.push_str("- ");
                out.push_str(&section.title);
                out.push('\n');
            }
            for child in &section.subsections {
                walk(child, depth + 1, out);
            }
        }
        let mut out = String::new();
        walk(&self.root.read().expect("tree lock poisoned"), 0, &mut out);
        if out.is_empty() {
            out.push_str("(the biography has no sections yet)\n");
        }
        out
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Fetch a section copy. Path lookup is exact; title lookup is DFS.
    /// With `hide_citations`, the copy has `[MEM_…]` tokens stripped.
    pub fn get_section(
        &self,
        locator: SectionRef<'_>,
        hide_citations: bool,
    ) -> Result<Option<Section>, BiographyError> {
        let root = self.root.read().expect("tree lock poisoned");
        let found = match locator {
            SectionRef::Path(path) => {
                validate_path_format(path)?;
                if path.is_empty() {
                    Some(&*root)
                } else {
                    let parts: Vec<&str> = path.split('/').collect();
                    root.descend(&parts)
                }
            }
            SectionRef::Title(title) => root.find_by_title(title),
        };

        Ok(found.map(|section| {
            if hide_citations {
                section.with_hidden_citations()
            } else {
                section.clone()
            }
        }))
    }

    pub fn render_markdown(&self, hide_citations: bool) -> String {
        self.root
            .read()
            .expect("tree lock poisoned")
            .to_markdown(1, hide_citations)
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Run one mutation under the tree-wide write guard, tracking it in the
    /// pending-writes counter that gates saves.
    async fn with_write<T>(&self, mutate: impl FnOnce(&mut Section) -> T) -> T {
        self.pending_writes.send_modify(|n| *n += 1);
        let guard = self.write_guard.lock().await;
        let result = {
            let mut root = self.root.write().expect("tree lock poisoned");
            mutate(&mut root)
        };
        drop(guard);
        self.pending_writes.send_modify(|n| *n -= 1);
        result
    }

    /// Add a new section at `path`, creating missing intermediate parents
    /// with empty content. Re-adding an existing path with empty content is
    /// a no-op; with content, the existing section's content is updated.
    pub async fn add_section(
        &self,
        path: &str,
        content: &str,
    ) -> Result<Section, BiographyError> {
        if path.is_empty() {
            return Err(BiographyError::InvalidPath {
                path: String::new(),
                reason: "cannot add the root section".to_string(),
            });
        }

        let path = path.to_string();
        let content = content.to_string();
        self.with_write(move |root| {
            // Validate against the live outline inside the critical section
            // so concurrent creators cannot race numbering checks.
            validate_new_path(&SectionOutline::from_section(root), &path)?;

            let parts: Vec<&str> = path.split('/').collect();
            let mut cursor = root;
            for part in &parts[..parts.len() - 1] {
                if cursor.child(part).is_none() {
                    cursor.subsections.push(Section::new(*part, ""));
                    cursor.sort_subsections();
                }
                cursor = cursor.child_mut(part).expect("parent just ensured");
            }

            let leaf_title = parts[parts.len() - 1];
            if let Some(existing) = cursor.child_mut(leaf_title) {
                if !content.is_empty() {
                    existing.set_content(content);
                }
                return Ok(existing.clone());
            }

            cursor.subsections.push(Section::new(leaf_title, content));
            cursor.sort_subsections();
            let created = cursor.child(leaf_title).expect("leaf just inserted").clone();
            debug!(path = %path, "section added");
            Ok(created)
        })
        .await
    }

    /// Update content and/or title of an existing section.
    pub async fn update_section(
        &self,
        locator: SectionRef<'_>,
        content: Option<&str>,
        new_title: Option<&str>,
    ) -> Result<Section, BiographyError> {
        let locator_owned = match locator {
            SectionRef::Path(p) => SectionRefOwned::Path(p.to_string()),
            SectionRef::Title(t) => SectionRefOwned::Title(t.to_string()),
        };
        let content = content.map(str::to_string);
        let new_title = new_title.map(str::to_string);

        self.with_write(move |root| {
            let target_title = match &locator_owned {
                SectionRefOwned::Path(path) => {
                    validate_path_format(path)?;
                    if path.is_empty() {
                        root.title.clone()
                    } else {
                        let parts: Vec<&str> = path.split('/').collect();
                        root.descend(&parts)
                            .map(|section| section.title.clone())
                            .ok_or_else(|| BiographyError::MissingSection(path.clone()))?
                    }
                }
                SectionRefOwned::Title(title) => root
                    .find_by_title(title)
                    .map(|section| section.title.clone())
                    .ok_or_else(|| BiographyError::MissingSection(title.clone()))?,
            };

            if let Some(content) = content {
                let section = root
                    .find_by_title_mut(&target_title)
                    .expect("target resolved above");
                section.set_content(content);
            }

            if let Some(new_title) = new_title {
                if new_title != target_title {
                    match root.find_parent_of_mut(&target_title) {
                        Some(parent) => {
                            let section = parent
                                .child_mut(&target_title)
                                .expect("parent contains target");
                            section.title = new_title.clone();
                            section.last_edit = chrono::Utc::now();
                            parent.sort_subsections();
                        }
                        None => {
                            // The root has no parent to re-sort.
                            root.title = new_title.clone();
                        }
                    }
                    let section = root
                        .find_by_title(&new_title)
                        .expect("retitled section present");
                    return Ok(section.clone());
                }
            }

            Ok(root
                .find_by_title(&target_title)
                .expect("target resolved above")
                .clone())
        })
        .await
    }

    /// Delete a leaf section, or clear the content of a section that has
    /// children while preserving the structural node (descendants stay
    /// addressable).
    pub async fn delete_section(&self, locator: SectionRef<'_>) -> Result<(), BiographyError> {
        let locator_owned = match locator {
            SectionRef::Path(p) => SectionRefOwned::Path(p.to_string()),
            SectionRef::Title(t) => SectionRefOwned::Title(t.to_string()),
        };

        self.with_write(move |root| {
            let target_title = match &locator_owned {
                SectionRefOwned::Path(path) => {
                    if path.is_empty() {
                        return Err(BiographyError::CannotDeleteRoot);
                    }
                    validate_path_format(path)?;
                    let parts: Vec<&str> = path.split('/').collect();
                    root.descend(&parts)
                        .map(|section| section.title.clone())
                        .ok_or_else(|| BiographyError::MissingSection(path.clone()))?
                }
                SectionRefOwned::Title(title) => root
                    .find_by_title(title)
                    .map(|section| section.title.clone())
                    .ok_or_else(|| BiographyError::MissingSection(title.clone()))?,
            };

            if target_title == root.title {
                return Err(BiographyError::CannotDeleteRoot);
            }

            let parent = root
                .find_parent_of_mut(&target_title)
                .ok_or(BiographyError::CannotDeleteRoot)?;

            let has_children = parent
                .child(&target_title)
                .is_some_and(|section| !section.subsections.is_empty());

            if has_children {
                let section = parent
                    .child_mut(&target_title)
                    .expect("parent contains target");
                section.set_content("");
            } else {
                parent.subsections.retain(|child| child.title != target_title);
            }
            debug!(title = %target_title, cleared = has_children, "section deleted");
            Ok(())
        })
        .await
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    fn snapshot_path(&self, version: u32) -> PathBuf {
        self.base_dir.join(format!("biography_{version}.json"))
    }

    /// Write the next versioned snapshot (`max(existing) + 1`), optionally
    /// with a rendered markdown sibling. Waits for pending writes to drain
    /// first so the snapshot is never mid-mutation.
    pub async fn save(&self, save_markdown: bool) -> Result<u32> {
        let mut pending = self.pending_writes.subscribe();
        let drained = tokio::time::timeout(
            PENDING_WRITES_TIMEOUT,
            pending.wait_for(|count| *count == 0),
        )
        .await;
        if drained.is_err() {
            warn!("timed out waiting for pending writes before save");
            return Err(BiographyError::PendingWritesTimeout.into());
        }

        let guard = self.write_guard.lock().await;
        let root = self.root.read().expect("tree lock poisoned").clone();

        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("create {}", self.base_dir.display()))?;
        let next = latest_version(&self.base_dir) + 1;

        write_json_atomic(&self.snapshot_path(next), &root)?;
        if save_markdown {
            let markdown = root.to_markdown(1, true);
            fs::write(self.base_dir.join(format!("biography_{next}.md")), markdown)?;
        }

        self.version.store(next, Ordering::SeqCst);
        drop(guard);
        info!(user = %self.user_id, version = next, "biography saved");
        Ok(next)
    }
}

enum SectionRefOwned {
    Path(String),
    Title(String),
}

fn sort_recursively(section: &mut Section) {
    section.sort_subsections();
    for child in &mut section.subsections {
        sort_recursively(child);
    }
}

/// Highest version among `biography_<V>.json` files in the directory;
/// 0 when none exist.
fn latest_version(dir: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_prefix("biography_")?
                .strip_suffix(".json")?
                .parse::<u32>()
                .ok()
        })
        .max()
        .unwrap_or(0)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "snapshot.json".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let rendered = serde_json::to_string_pretty(value)?;
    if let Err(err) = fs::write(&tmp_path, rendered) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
