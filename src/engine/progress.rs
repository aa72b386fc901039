// src/engine/progress.rs

use super::{graph::PageGraph, jump::PageKind, ledger::Ledger};

/// Percentage (0..=100) of displayable pages seen in the ledger's retry.
///
/// Markers are skipped and a cluster counts as a single page, seen once any
/// page inside it has been seen.
pub fn calculate_progress(graph: &PageGraph, ledger: &Ledger) -> i64 {
    let seen = ledger.seen_pages();
    let mut valid = 0usize;
    let mut visited = 0usize;

    let mut in_cluster = false;
    let mut cluster_seen = false;
    for page in graph.pages() {
        match page.kind {
            PageKind::Cluster => {
                in_cluster = true;
                cluster_seen = seen.contains(&page.id);
            }
            PageKind::EndOfCluster => {
                if in_cluster {
                    valid += 1;
                    if cluster_seen {
                        visited += 1;
                    }
                }
                in_cluster = false;
            }
            PageKind::EndOfBranch => {}
            _ if in_cluster => cluster_seen |= seen.contains(&page.id),
            _ => {
                valid += 1;
                if seen.contains(&page.id) {
                    visited += 1;
                }
            }
        }
    }
    // An unterminated cluster runs to the end of the lesson.
    if in_cluster {
        valid += 1;
        if cluster_seen {
            visited += 1;
        }
    }

    if valid == 0 {
        return 0;
    }
    (visited as f64 * 100.0 / valid as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::test_support::chain;
    use crate::engine::ledger::test_support::{attempt, view};
    use PageKind::*;

    #[test]
    fn test_progress_counts_displayable_pages() {
        let graph = PageGraph::load(
            1,
            chain(&[(1, BranchTable), (2, TrueFalse), (3, TrueFalse), (4, EndOfBranch)]),
            vec![],
        );
        let ledger = Ledger::new(0, vec![attempt(1, 2, None, true, 20)], vec![view(1, 1, false, 10)]);
        // 2 of 3 displayable pages
        assert_eq!(calculate_progress(&graph, &ledger), 67);
        assert_eq!(calculate_progress(&graph, &Ledger::default()), 0);
    }

    #[test]
    fn test_cluster_counts_once() {
        let graph = PageGraph::load(
            1,
            chain(&[
                (1, TrueFalse),
                (2, Cluster),
                (3, TrueFalse),
                (4, TrueFalse),
                (5, EndOfCluster),
            ]),
            vec![],
        );
        let ledger = Ledger::new(0, vec![attempt(1, 4, None, true, 10)], vec![]);
        assert_eq!(calculate_progress(&graph, &ledger), 50);
    }

    #[test]
    fn test_empty_lesson_has_no_progress() {
        let graph = PageGraph::default();
        assert_eq!(calculate_progress(&graph, &Ledger::default()), 0);
    }
}
