// src/engine/ledger.rs

//! Snapshot of one learner's history within one retry.

use std::collections::HashSet;

use crate::models::attempt::{Attempt, BranchView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

/// Attempts and branch views of a single (lesson, user, retry).
///
/// Rows are append-only; both lists are kept sorted by time seen, then id.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    retry: i64,
    attempts: Vec<Attempt>,
    branch_views: Vec<BranchView>,
}

impl Ledger {
    pub fn new(retry: i64, mut attempts: Vec<Attempt>, mut branch_views: Vec<BranchView>) -> Self {
        attempts.retain(|a| a.retry == retry);
        branch_views.retain(|v| v.retry == retry);
        attempts.sort_by(|a, b| a.timeseen.cmp(&b.timeseen).then(a.id.cmp(&b.id)));
        branch_views.sort_by(|a, b| a.timeseen.cmp(&b.timeseen).then(a.id.cmp(&b.id)));
        Self {
            retry,
            attempts,
            branch_views,
        }
    }

    pub fn retry(&self) -> i64 {
        self.retry
    }

    pub fn record_attempt(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    pub fn record_branch_view(&mut self, view: BranchView) {
        self.branch_views.push(view);
    }

    /// Attempts ordered by time, optionally for one page only.
    pub fn attempts_for(&self, page_id: Option<i64>) -> Vec<&Attempt> {
        self.attempts
            .iter()
            .filter(|a| page_id.is_none_or(|id| a.page_id == id))
            .collect()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn attempt_count(&self, page_id: i64) -> usize {
        self.attempts.iter().filter(|a| a.page_id == page_id).count()
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.len()
    }

    pub fn has_attempted(&self, page_id: i64) -> bool {
        self.attempts.iter().any(|a| a.page_id == page_id)
    }

    pub fn has_correct_attempt(&self, page_id: i64) -> bool {
        self.attempts.iter().any(|a| a.page_id == page_id && a.correct)
    }

    pub fn branch_views(&self, order: SortOrder) -> Vec<&BranchView> {
        let mut views: Vec<&BranchView> = self.branch_views.iter().collect();
        if order == SortOrder::NewestFirst {
            views.reverse();
        }
        views
    }

    /// Pages with an attempt or a branch view in this retry.
    pub fn seen_pages(&self) -> HashSet<i64> {
        self.attempts
            .iter()
            .map(|a| a.page_id)
            .chain(self.branch_views.iter().map(|v| v.page_id))
            .collect()
    }

    /// The page of the most recent attempt or branch view.
    pub fn last_seen_page(&self) -> Option<i64> {
        let attempt = self.attempts.iter().map(|a| (a.timeseen, 1, a.id, a.page_id));
        let view = self
            .branch_views
            .iter()
            .map(|v| (v.timeseen, 0, v.id, v.page_id));
        attempt.chain(view).max().map(|(_, _, _, page_id)| page_id)
    }

    /// Question pages in the order they were answered, consecutive repeats
    /// collapsed. Branch tables are not part of it: their views carry the
    /// destination instead.
    pub fn replay_path(&self) -> Vec<i64> {
        let mut path: Vec<i64> = Vec::with_capacity(self.attempts.len());
        for attempt in &self.attempts {
            if path.last() != Some(&attempt.page_id) {
                path.push(attempt.page_id);
            }
        }
        path
    }

    /// The earliest view of a branch table in this retry.
    pub fn first_branch_view(&self, page_id: i64) -> Option<&BranchView> {
        self.branch_views.iter().find(|v| v.page_id == page_id)
    }

    /// The first attempt recorded after `view`.
    pub fn first_attempt_after(&self, view: &BranchView) -> Option<&Attempt> {
        self.attempts.iter().find(|a| a.timeseen > view.timeseen)
    }

    pub fn set_branch_view_destination(&mut self, view_id: i64, next_page_id: i64) {
        if let Some(view) = self.branch_views.iter_mut().find(|v| v.id == view_id) {
            view.next_page_id = next_page_id;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_attempts_are_ordered_by_time() {
        let ledger = Ledger::new(
            0,
            vec![
                attempt(3, 10, None, false, 30),
                attempt(1, 11, None, true, 10),
                attempt(2, 10, None, true, 20),
            ],
            vec![],
        );
        let ids: Vec<i64> = ledger.attempts_for(None).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(ledger.attempt_count(10), 2);
        assert!(ledger.has_correct_attempt(10));
        assert!(!ledger.has_attempted(12));
    }

    #[test]
    fn test_other_retries_are_dropped() {
        let mut old = attempt(1, 10, None, true, 10);
        old.retry = 1;
        let ledger = Ledger::new(0, vec![old], vec![]);
        assert_eq!(ledger.total_attempts(), 0);
    }

    #[test]
    fn test_replay_path_lists_answered_pages_only() {
        let ledger = Ledger::new(
            0,
            vec![
                attempt(1, 2, None, false, 20),
                attempt(2, 2, None, true, 25),
                attempt(3, 3, None, true, 40),
            ],
            vec![view(1, 1, false, 10), view(2, 1, false, 30)],
        );
        assert_eq!(ledger.replay_path(), vec![2, 3]);
        assert_eq!(ledger.last_seen_page(), Some(3));
        assert_eq!(ledger.seen_pages().len(), 3);
        let newest = ledger.branch_views(SortOrder::NewestFirst);
        assert_eq!(newest[0].id, 2);

        let first = ledger.first_branch_view(1).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(ledger.first_attempt_after(first).map(|a| a.id), Some(1));
    }

    #[test]
    fn test_last_seen_page_includes_branch_views() {
        let mut ledger = Ledger::new(0, vec![attempt(1, 2, None, true, 20)], vec![]);
        ledger.record_branch_view(view(2, 1, false, 30));
        assert_eq!(ledger.last_seen_page(), Some(1));

        ledger.set_branch_view_destination(2, 3);
        assert_eq!(ledger.first_branch_view(1).unwrap().next_page_id, 3);
    }
}
