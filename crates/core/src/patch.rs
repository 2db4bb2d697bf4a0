// crates/core/src/patch.rs

//! Additive-edit checking for generated source.
//!
//! An edit is additive when every original line survives byte-identical and in order,
//! and new lines appear only directly before an insertion marker or at end of file.

use std::fmt::Write as _;

use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedLine {
    /// 1-based line number in the original.
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("edit is not additive; removed or modified original lines:\n{}", format_removed(.removed))]
    NonAdditive { removed: Vec<RemovedLine> },

    #[error("line {line} is inserted outside an insertion point (only before a marker or at end of file): {text}")]
    MisplacedInsertion { line: usize, text: String },

    #[error("insertion marker '{0}' not found")]
    MarkerMissing(String),

    #[error("insertion marker '{0}' appears more than once")]
    MarkerDuplicated(String),

    #[error("edit adds another '{0}' insertion marker; each marker must stay unique")]
    MarkerAdded(String),
}

fn format_removed(removed: &[RemovedLine]) -> String {
    let mut out = String::new();
    for r in removed {
        let _ = writeln!(out, "  {:>4} | {}", r.line, r.text);
    }
    out
}

/// Unified diff with `original`/`updated`-style headers.
pub fn unified_diff(original: &str, updated: &str, from: &str, to: &str) -> String {
    TextDiff::from_lines(original, updated)
        .unified_diff()
        .context_radius(3)
        .header(from, to)
        .to_string()
}

/// Lines that exist in `original` but not in `proposed`, per an LCS line diff.
pub fn removed_lines(original: &str, proposed: &str) -> Vec<RemovedLine> {
    let diff = TextDiff::from_lines(original, proposed);
    let mut removed = Vec::new();
    for change in diff.iter_all_changes() {
        if change.tag() == ChangeTag::Delete {
            removed.push(RemovedLine {
                line: change.old_index().map_or(0, |i| i + 1),
                text: change.value().trim_end_matches(['\r', '\n']).to_string(),
            });
        }
    }
    removed
}

/// Verify that `proposed` only adds to `original`.
///
/// `markers` are the insertion markers of the file; a line of `original` containing one
/// of them may be preceded by any number of new lines. Files without markers accept
/// appends at end of file only.
pub fn check_additive(original: &str, proposed: &str, markers: &[&str]) -> Result<(), PatchError> {
    for marker in markers {
        match original.lines().filter(|l| l.contains(marker)).count() {
            0 => return Err(PatchError::MarkerMissing(marker.to_string())),
            1 => {}
            _ => return Err(PatchError::MarkerDuplicated(marker.to_string())),
        }
        if proposed.lines().filter(|l| l.contains(marker)).count() != 1 {
            return Err(PatchError::MarkerAdded(marker.to_string()));
        }
    }

    let removed = removed_lines(original, proposed);
    if !removed.is_empty() {
        return Err(PatchError::NonAdditive { removed });
    }

    let orig: Vec<&str> = original.lines().collect();
    let prop: Vec<&str> = proposed.lines().collect();
    let is_marker = |line: &str| markers.iter().any(|m| line.contains(m));

    let mut j = 0;
    for o in &orig {
        if is_marker(o) {
            while j < prop.len() && prop[j] != *o {
                j += 1;
            }
        }
        match prop.get(j) {
            Some(p) if p == o => j += 1,
            Some(p) => {
                return Err(PatchError::MisplacedInsertion {
                    line: j + 1,
                    text: p.to_string(),
                })
            }
            // every original line exists in `proposed` (no deletions), so alignment
            // can only run out when lines were reordered around a marker
            None => {
                return Err(PatchError::NonAdditive {
                    removed: vec![RemovedLine {
                        line: 0,
                        text: o.to_string(),
                    }],
                })
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARK: &str = "// @mark";

    const ORIGINAL: &str = "\
fn table() {
    a();
    // @mark
}
";

    #[test]
    fn insertion_before_marker_and_at_eof_is_additive() {
        let proposed = "\
fn table() {
    a();
    b();
    // @mark
}

fn b() {}
";
        assert_eq!(check_additive(ORIGINAL, proposed, &[MARK]), Ok(()));
    }

    #[test]
    fn identical_content_is_additive() {
        assert_eq!(check_additive(ORIGINAL, ORIGINAL, &[MARK]), Ok(()));
    }

    #[test]
    fn modified_line_is_reported() {
        let proposed = "\
fn table() {
    a(1);
    // @mark
}
";
        match check_additive(ORIGINAL, proposed, &[MARK]) {
            Err(PatchError::NonAdditive { removed }) => {
                assert_eq!(
                    removed,
                    vec![RemovedLine {
                        line: 2,
                        text: "    a();".into()
                    }]
                );
            }
            other => panic!("expected NonAdditive, got {other:?}"),
        }
    }

    #[test]
    fn deleted_line_is_reported() {
        let proposed = "fn table() {\n    // @mark\n}\n";
        let err = check_additive(ORIGINAL, proposed, &[MARK]).unwrap_err();
        assert!(err.to_string().contains("a();"), "{err}");
    }

    #[test]
    fn insertion_in_the_middle_is_misplaced() {
        let proposed = "\
fn table() {
    z();
    a();
    // @mark
}
";
        assert_eq!(
            check_additive(ORIGINAL, proposed, &[MARK]),
            Err(PatchError::MisplacedInsertion {
                line: 2,
                text: "    z();".into()
            })
        );
    }

    #[test]
    fn files_without_markers_only_accept_appends() {
        let original = "use a;\n";
        assert!(check_additive(original, "use a;\nuse b;\n", &[]).is_ok());
        assert!(matches!(
            check_additive(original, "use b;\nuse a;\n", &[]),
            Err(PatchError::MisplacedInsertion { line: 1, .. })
        ));
    }

    #[test]
    fn marker_must_exist_exactly_once() {
        assert_eq!(
            check_additive("fn a() {}\n", "fn a() {}\n", &[MARK]),
            Err(PatchError::MarkerMissing(MARK.into()))
        );
        let twice = format!("{MARK}\n{MARK}\n");
        assert_eq!(
            check_additive(&twice, &twice, &[MARK]),
            Err(PatchError::MarkerDuplicated(MARK.into()))
        );
    }

    #[test]
    fn inserted_marker_copy_is_rejected() {
        let before_marker = "\
fn table() {
    a();
    // @mark
    // @mark
}
";
        assert_eq!(
            check_additive(ORIGINAL, before_marker, &[MARK]),
            Err(PatchError::MarkerAdded(MARK.into()))
        );

        let at_eof = format!("{ORIGINAL}\nfn b() {{}}\n{MARK}\n");
        assert_eq!(
            check_additive(ORIGINAL, &at_eof, &[MARK]),
            Err(PatchError::MarkerAdded(MARK.into()))
        );
    }

    #[test]
    fn unified_diff_has_headers_and_additions() {
        let diff = unified_diff("a\n", "a\nb\n", "original", "updated");
        assert!(diff.starts_with("--- original\n+++ updated\n"), "{diff}");
        assert!(diff.contains("+b"));
    }
}
