//! Pure path and numbering validation.
//!
//! Everything here is a function of a path string and a lightweight outline
//! of the tree — no locks, no tree access. The orchestrator validates plans
//! against an outline snapshot before dispatching writers; the mutators
//! apply only validated operations.
//!
//! Path grammar (slash-joined numbered titles, at most three levels below
//! root):
//!
//! ```text
//! 1 Early Life
//! 1 Early Life/1.1 Childhood
//! 1 Early Life/1.1 Childhood/1.1.2 School Years
//! ```
//!
//! A segment may also be a bare number (`"1"`, `"1.1"`). Sibling numbering
//! is sequential: creating `"3 …"` requires siblings `1` and `2` to exist.

use crate::BiographyError;
use crate::section::{Section, title_number};

/// Maximum depth below root.
pub const MAX_DEPTH: usize = 3;

/// Title-only skeleton of the tree, cheap to snapshot under a read guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionOutline {
    pub title: String,
    pub children: Vec<SectionOutline>,
}

impl SectionOutline {
    pub fn from_section(section: &Section) -> Self {
        Self {
            title: section.title.clone(),
            children: section
                .subsections
                .iter()
                .map(SectionOutline::from_section)
                .collect(),
        }
    }

    fn child(&self, title: &str) -> Option<&SectionOutline> {
        self.children.iter().find(|child| child.title == title)
    }

    fn find_by_title(&self, title: &str) -> Option<&SectionOutline> {
        if self.title == title {
            return Some(self);
        }
        self.children
            .iter()
            .find_map(|child| child.find_by_title(title))
    }

    fn child_numbers(&self) -> Vec<u32> {
        self.children
            .iter()
            .filter_map(|child| title_number(&child.title))
            .filter_map(|number| number.last().copied())
            .collect()
    }
}

/// What a validated plan intends to do to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    TitleUpdate,
}

/// Check the pure format rules: depth, numeric prefixes, and parent-prefix
/// matching. An empty path addresses the root and is valid.
pub fn validate_path_format(path: &str) -> Result<(), BiographyError> {
    if path.is_empty() {
        return Ok(());
    }

    let invalid = |reason: &str| BiographyError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() > MAX_DEPTH {
        return Err(invalid("maximum depth is three levels below root"));
    }

    let first = title_number(parts[0]).ok_or_else(|| invalid("segment lacks a numeric prefix"))?;
    if first.len() != 1 {
        return Err(invalid("first-level sections use a single number prefix"));
    }

    let mut parent = first;
    for part in &parts[1..] {
        let child = title_number(part).ok_or_else(|| invalid("segment lacks a numeric prefix"))?;
        if child.len() != parent.len() + 1 || child[..parent.len()] != parent[..] {
            return Err(invalid("child number must extend its parent's prefix"));
        }
        parent = child;
    }

    Ok(())
}

/// Validate that creating every missing segment of `path` keeps sibling
/// numbering sequential (no holes): a segment numbered `N` requires
/// siblings `1..N-1` to already exist at its level.
pub fn validate_new_path(root: &SectionOutline, path: &str) -> Result<(), BiographyError> {
    validate_path_format(path)?;
    if path.is_empty() {
        return Ok(());
    }

    let mut cursor = root;
    let mut walked: Vec<&str> = Vec::new();

    for part in path.split('/') {
        walked.push(part);
        match cursor.child(part) {
            Some(existing) => cursor = existing,
            None => {
                let number = title_number(part)
                    .and_then(|prefix| prefix.last().copied())
                    .unwrap_or(0);
                let siblings = cursor.child_numbers();
                for required in 1..number {
                    if !siblings.contains(&required) {
                        return Err(BiographyError::NonSequentialNumbering {
                            path: walked.join("/"),
                            missing: required,
                        });
                    }
                }
                // Every deeper segment is also new; validate it against an
                // empty sibling set.
                cursor = EMPTY_OUTLINE;
            }
        }
    }

    Ok(())
}

static EMPTY_OUTLINE: &SectionOutline = &SectionOutline {
    title: String::new(),
    children: Vec::new(),
};

/// Validate an orchestrator plan before it is dispatched to a writer.
///
/// `path` takes precedence when both a path and a title are supplied, but
/// the pair must agree (the path's last segment equals the title).
pub fn validate_plan_target(
    root: &SectionOutline,
    action: PlanAction,
    path: Option<&str>,
    title: Option<&str>,
) -> Result<(), BiographyError> {
    if let (Some(path), Some(title)) = (path, title) {
        let last = path.rsplit('/').next().unwrap_or(path);
        if !path.is_empty() && last != title {
            return Err(BiographyError::ConflictingLocator {
                path: path.to_string(),
                title: title.to_string(),
            });
        }
    }

    match action {
        PlanAction::Create => {
            let path = path.filter(|p| !p.is_empty()).ok_or_else(|| {
                BiographyError::InvalidPath {
                    path: String::new(),
                    reason: "create plans require a non-empty path".to_string(),
                }
            })?;
            validate_new_path(root, path)
        }
        PlanAction::Update | PlanAction::TitleUpdate => match (path, title) {
            (Some(path), _) => {
                validate_path_format(path)?;
                let exists = path.is_empty()
                    || path
                        .split('/')
                        .try_fold(root, |cursor, part| cursor.child(part))
                        .is_some();
                if exists {
                    Ok(())
                } else {
                    Err(BiographyError::MissingSection(path.to_string()))
                }
            }
            (None, Some(title)) => {
                if root.find_by_title(title).is_some() {
                    Ok(())
                } else {
                    Err(BiographyError::MissingSection(title.to_string()))
                }
            }
            (None, None) => Err(BiographyError::MissingSection(
                "no path or title supplied".to_string(),
            )),
        },
    }
}

/// Report sibling sets with numbering holes anywhere in the outline.
/// A well-maintained tree returns an empty list (checked in tests before
/// snapshots).
pub fn numbering_holes(root: &SectionOutline) -> Vec<String> {
    let mut holes = Vec::new();
    collect_holes(root, &mut holes);
    holes
}

fn collect_holes(outline: &SectionOutline, holes: &mut Vec<String>) {
    let mut numbers = outline.child_numbers();
    numbers.sort_unstable();
    for (index, number) in numbers.iter().enumerate() {
        if *number != (index + 1) as u32 {
            holes.push(outline.title.clone());
            break;
        }
    }
    for child in &outline.children {
        collect_holes(child, holes);
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn outline(titles: &[(&str, &[&str])]) -> SectionOutline {
        // One level of nesting is enough for most cases here.
        SectionOutline {
            title: "Biography of test".to_string(),
            children: titles
                .iter()
                .map(|(title, children)| SectionOutline {
                    title: title.to_string(),
                    children: children
                        .iter()
                        .map(|child| SectionOutline {
                            title: child.to_string(),
                            children: Vec::new(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn accepts_well_formed_paths() {
        for path in [
            "",
            "1 Early Life",
            "1",
            "1 Early Life/1.1 Childhood",
            "2 Career/2.1",
            "1 Early Life/1.1 Childhood/1.1.2 School Years",
        ] {
            assert!(validate_path_format(path).is_ok(), "path {path:?} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_paths() {
        for path in [
            "Early Life",                      // no numeric prefix
            "1.1 Childhood",                   // first level must be a single number
            "1 Early Life/2.1 Wrong Parent",   // prefix does not extend parent
            "1 Early Life/1.1.1 Too Deep",     // skips a level
            "1 A/1.1 B/1.1.1 C/1.1.1.1 D",     // beyond max depth
        ] {
            assert!(validate_path_format(path).is_err(), "path {path:?} should be invalid");
        }
    }

    #[test]
    fn sequential_numbering_rejects_holes() {
        let root = outline(&[("1 Early Life", &[])]);

        // Scenario: adding "3 Career" when only "1 Early Life" exists.
        let err = validate_new_path(&root, "3 Career").unwrap_err();
        assert_eq!(
            err,
            BiographyError::NonSequentialNumbering {
                path: "3 Career".to_string(),
                missing: 2,
            }
        );

        assert!(validate_new_path(&root, "2 Career").is_ok());
    }

    #[test]
    fn sequential_numbering_checks_nested_levels() {
        let root = outline(&[("1 Early Life", &["1.1 Childhood"])]);

        assert!(validate_new_path(&root, "1 Early Life/1.2 Schooling").is_ok());
        assert!(validate_new_path(&root, "1 Early Life/1.3 Schooling").is_err());
    }

    #[test]
    fn new_intermediate_parents_validate_against_empty_sibling_set() {
        let root = outline(&[("1 Early Life", &[])]);
        // "2 Career" does not exist yet; its first child must be numbered .1.
        assert!(validate_new_path(&root, "2 Career/2.1 First Job").is_ok());
        assert!(validate_new_path(&root, "2 Career/2.2 Second Job").is_err());
    }

    #[test]
    fn existing_path_revalidates_fine() {
        let root = outline(&[("1 Early Life", &["1.1 Childhood"])]);
        assert!(validate_new_path(&root, "1 Early Life/1.1 Childhood").is_ok());
    }

    #[test]
    fn plan_create_requires_path() {
        let root = outline(&[]);
        let err = validate_plan_target(&root, PlanAction::Create, None, Some("1 X")).unwrap_err();
        assert!(matches!(err, BiographyError::InvalidPath { .. }));
    }

    #[test]
    fn plan_update_by_title_uses_dfs() {
        let root = outline(&[("1 Early Life", &["1.1 Childhood"])]);
        assert!(
            validate_plan_target(&root, PlanAction::Update, None, Some("1.1 Childhood")).is_ok()
        );
        assert!(
            validate_plan_target(&root, PlanAction::Update, None, Some("1.2 Nope")).is_err()
        );
    }

    #[test]
    fn plan_with_disagreeing_path_and_title_is_rejected() {
        let root = outline(&[("1 Early Life", &[])]);
        let err = validate_plan_target(
            &root,
            PlanAction::Update,
            Some("1 Early Life"),
            Some("2 Career"),
        )
        .unwrap_err();
        assert!(matches!(err, BiographyError::ConflictingLocator { .. }));
    }

    #[test]
    fn holes_detector_flags_missing_sibling() {
        let with_hole = outline(&[("1 A", &[]), ("3 C", &[])]);
        assert_eq!(numbering_holes(&with_hole), vec!["Biography of test".to_string()]);

        let sequential = outline(&[("1 A", &[]), ("2 B", &[])]);
        assert!(numbering_holes(&sequential).is_empty());
    }
}
