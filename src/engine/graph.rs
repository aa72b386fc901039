// src/engine/graph.rs

//! The page chain of one lesson.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{
    LessonError, LessonResult,
    jump::PageKind,
};
use crate::models::page::{Answer, Page};

/// New links for one page, produced by load-time repair or by authoring splices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkPatch {
    pub page_id: i64,
    pub prev_page_id: i64,
    pub next_page_id: i64,
}

/// Links for a page about to be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splice {
    pub prev_page_id: i64,
    pub next_page_id: i64,
}

/// All pages of a lesson, ordered by their linkage.
#[derive(Debug, Clone, Default)]
pub struct PageGraph {
    lesson_id: i64,
    order: Vec<i64>,
    pages: HashMap<i64, Page>,
    answers: HashMap<i64, Vec<Answer>>,
    repairs: Vec<LinkPatch>,
}

impl PageGraph {
    /// Builds the graph from stored rows.
    ///
    /// Order comes from the links only, starting at the page whose
    /// `prev_page_id` is 0. Broken links are repaired in memory and reported
    /// through [`PageGraph::repairs`].
    pub fn load(lesson_id: i64, pages: Vec<Page>, answers: Vec<Answer>) -> Self {
        let mut by_id: HashMap<i64, Page> = pages.into_iter().map(|p| (p.id, p)).collect();

        let mut heads: Vec<i64> = by_id
            .values()
            .filter(|p| p.prev_page_id == 0)
            .map(|p| p.id)
            .collect();
        heads.sort_unstable();
        if heads.len() > 1 {
            tracing::warn!(
                "Lesson {} has {} pages claiming to be first: {:?}",
                lesson_id,
                heads.len(),
                heads
            );
        }
        let head = heads
            .first()
            .copied()
            .or_else(|| by_id.keys().min().copied());

        let mut order = Vec::with_capacity(by_id.len());
        let mut visited = HashSet::new();
        let mut cursor = head;
        while let Some(id) = cursor {
            visited.insert(id);
            order.push(id);
            let next = by_id.get(&id).map(|p| p.next_page_id).unwrap_or(0);
            cursor = if next == 0 {
                None
            } else if !by_id.contains_key(&next) {
                tracing::warn!(
                    "Lesson {}: page {} links to missing page {}",
                    lesson_id,
                    id,
                    next
                );
                None
            } else if visited.contains(&next) {
                tracing::warn!(
                    "Lesson {}: page {} closes a cycle back to page {}",
                    lesson_id,
                    id,
                    next
                );
                None
            } else {
                Some(next)
            };
        }

        let mut orphans: Vec<i64> = by_id
            .keys()
            .filter(|id| !visited.contains(id))
            .copied()
            .collect();
        if !orphans.is_empty() {
            orphans.sort_unstable();
            tracing::warn!(
                "Lesson {}: appending unreachable pages {:?} to the end of the chain",
                lesson_id,
                orphans
            );
            order.extend(orphans);
        }

        let mut repairs = Vec::new();
        for (i, id) in order.iter().enumerate() {
            let prev = if i == 0 { 0 } else { order[i - 1] };
            let next = order.get(i + 1).copied().unwrap_or(0);
            if let Some(page) = by_id.get_mut(id) {
                if page.prev_page_id != prev || page.next_page_id != next {
                    tracing::warn!(
                        "Lesson {}: repairing links of page {} ({} <- -> {}) to ({} <- -> {})",
                        lesson_id,
                        id,
                        page.prev_page_id,
                        page.next_page_id,
                        prev,
                        next
                    );
                    page.prev_page_id = prev;
                    page.next_page_id = next;
                    repairs.push(LinkPatch {
                        page_id: *id,
                        prev_page_id: prev,
                        next_page_id: next,
                    });
                }
            }
        }

        let mut grouped: HashMap<i64, Vec<Answer>> = HashMap::new();
        for answer in answers {
            grouped.entry(answer.page_id).or_default().push(answer);
        }
        for list in grouped.values_mut() {
            list.sort_by_key(|a| a.id);
        }

        Self {
            lesson_id,
            order,
            pages: by_id,
            answers: grouped,
            repairs,
        }
    }

    pub fn lesson_id(&self) -> i64 {
        self.lesson_id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Link fixes applied while loading.
    pub fn repairs(&self) -> &[LinkPatch] {
        &self.repairs
    }

    /// Pages in chain order.
    pub fn pages(&self) -> impl Iterator<Item = &Page> + '_ {
        self.order.iter().filter_map(|id| self.pages.get(id))
    }

    pub fn contains(&self, page_id: i64) -> bool {
        self.pages.contains_key(&page_id)
    }

    pub fn get(&self, page_id: i64) -> LessonResult<&Page> {
        self.pages
            .get(&page_id)
            .ok_or(LessonError::PageNotFound(page_id))
    }

    pub fn first_page(&self) -> Option<&Page> {
        self.order.first().and_then(|id| self.pages.get(id))
    }

    pub fn last_page(&self) -> Option<&Page> {
        self.order.last().and_then(|id| self.pages.get(id))
    }

    /// Answers of a page, ordered by id.
    pub fn answers(&self, page_id: i64) -> &[Answer] {
        self.answers.get(&page_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first_answer(&self, page_id: i64) -> Option<&Answer> {
        self.answers(page_id).first()
    }

    /// Looks an answer up by id across the whole lesson.
    pub fn answer(&self, answer_id: i64) -> Option<&Answer> {
        self.answers
            .values()
            .flat_map(|list| list.iter())
            .find(|a| a.id == answer_id)
    }

    /// Pages strictly after `page_id`, up to (not including) the first page
    /// whose type is in `ends`.
    pub fn sub_pages_of(&self, page_id: i64, ends: &[PageKind]) -> LessonResult<Vec<&Page>> {
        let mut cursor = self.get(page_id)?.next_page_id;
        let mut pages = Vec::new();
        while cursor != 0 {
            let page = self.get(cursor)?;
            if ends.contains(&page.kind) {
                break;
            }
            pages.push(page);
            cursor = page.next_page_id;
        }
        Ok(pages)
    }

    /// The page where [`PageGraph::sub_pages_of`] would stop, if any.
    pub fn following(&self, page_id: i64, kinds: &[PageKind]) -> LessonResult<Option<&Page>> {
        let mut cursor = self.get(page_id)?.next_page_id;
        while cursor != 0 {
            let page = self.get(cursor)?;
            if kinds.contains(&page.kind) {
                return Ok(Some(page));
            }
            cursor = page.next_page_id;
        }
        Ok(None)
    }

    /// Walks backwards from the page before `page_id`. Returns true when a
    /// page of one of `types` is met before one of `ends` or the lesson start.
    pub fn is_sub_page_of_type(
        &self,
        page_id: i64,
        types: &[PageKind],
        ends: &[PageKind],
    ) -> LessonResult<bool> {
        let mut cursor = self.get(page_id)?.prev_page_id;
        while cursor != 0 {
            let page = self.get(cursor)?;
            if ends.contains(&page.kind) {
                return Ok(false);
            }
            if types.contains(&page.kind) {
                return Ok(true);
            }
            cursor = page.prev_page_id;
        }
        Ok(false)
    }

    /// The nearest page of `kind` at or above `page_id`.
    pub fn enclosing(&self, page_id: i64, kind: PageKind) -> LessonResult<&Page> {
        let mut cursor = page_id;
        while cursor != 0 {
            let page = self.get(cursor)?;
            if page.kind == kind {
                return Ok(page);
            }
            cursor = page.prev_page_id;
        }
        Err(LessonError::NoEnclosingStructure {
            page_id,
            structure: kind.name(),
        })
    }

    /// True when `target` is reached by walking forward from `page_id`.
    pub fn is_after(&self, page_id: i64, target: i64) -> LessonResult<bool> {
        let mut cursor = self.get(page_id)?.next_page_id;
        while cursor != 0 {
            if cursor == target {
                return Ok(true);
            }
            cursor = self.get(cursor)?.next_page_id;
        }
        Ok(false)
    }

    /// Links for a page inserted after `after_page_id` (0 inserts first).
    pub fn plan_insert_after(&self, after_page_id: i64) -> LessonResult<Splice> {
        if after_page_id == 0 {
            return Ok(Splice {
                prev_page_id: 0,
                next_page_id: self.first_page().map(|p| p.id).unwrap_or(0),
            });
        }
        let after = self.get(after_page_id)?;
        Ok(Splice {
            prev_page_id: after.id,
            next_page_id: after.next_page_id,
        })
    }

    /// Neighbour patches once the spliced page exists as `new_page_id`.
    pub fn link_in(&self, splice: Splice, new_page_id: i64) -> Vec<LinkPatch> {
        let mut patches = Vec::new();
        if let Some(prev) = self.pages.get(&splice.prev_page_id) {
            patches.push(LinkPatch {
                page_id: prev.id,
                prev_page_id: prev.prev_page_id,
                next_page_id: new_page_id,
            });
        }
        if let Some(next) = self.pages.get(&splice.next_page_id) {
            patches.push(LinkPatch {
                page_id: next.id,
                prev_page_id: new_page_id,
                next_page_id: next.next_page_id,
            });
        }
        patches
    }

    /// Patches that close the gap left by deleting `page_id`.
    pub fn plan_remove(&self, page_id: i64) -> LessonResult<Vec<LinkPatch>> {
        self.get(page_id)?;
        let order: Vec<i64> = self
            .order
            .iter()
            .copied()
            .filter(|id| *id != page_id)
            .collect();
        Ok(self.diff_links(&order))
    }

    /// Patches that move `page_id` right after `after_page_id` (0 moves it first).
    pub fn plan_move(&self, page_id: i64, after_page_id: i64) -> LessonResult<Vec<LinkPatch>> {
        self.get(page_id)?;
        if page_id == after_page_id {
            return Err(LessonError::InvalidInput(
                "a page cannot be moved after itself".to_string(),
            ));
        }
        let mut order: Vec<i64> = self
            .order
            .iter()
            .copied()
            .filter(|id| *id != page_id)
            .collect();
        let position = if after_page_id == 0 {
            0
        } else {
            order
                .iter()
                .position(|id| *id == after_page_id)
                .map(|i| i + 1)
                .ok_or(LessonError::PageNotFound(after_page_id))?
        };
        order.insert(position, page_id);
        Ok(self.diff_links(&order))
    }

    fn diff_links(&self, order: &[i64]) -> Vec<LinkPatch> {
        let mut patches = Vec::new();
        for (i, id) in order.iter().enumerate() {
            let prev = if i == 0 { 0 } else { order[i - 1] };
            let next = order.get(i + 1).copied().unwrap_or(0);
            if let Some(page) = self.pages.get(id) {
                if page.prev_page_id != prev || page.next_page_id != next {
                    patches.push(LinkPatch {
                        page_id: *id,
                        prev_page_id: prev,
                        next_page_id: next,
                    });
                }
            }
        }
        patches
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use PageKind::*;

    fn ids(pages: &[&Page]) -> Vec<i64> {
        pages.iter().map(|p| p.id).collect()
    }

    #[test]
    fn test_order_comes_from_links_not_ids() {
        let pages = vec![
            page(5, 9, 0, TrueFalse),
            page(9, 0, 2, BranchTable),
            page(2, 9, 5, Essay),
        ];
        let graph = PageGraph::load(1, pages, vec![]);
        let order: Vec<i64> = graph.pages().map(|p| p.id).collect();
        assert_eq!(order, vec![9, 2, 5]);
        assert_eq!(graph.first_page().unwrap().id, 9);
        assert_eq!(graph.last_page().unwrap().id, 5);
        assert!(graph.repairs().is_empty());
    }

    #[test]
    fn test_forward_walk_visits_every_page_once() {
        let graph = PageGraph::load(
            1,
            chain(&[(1, BranchTable), (2, TrueFalse), (3, TrueFalse), (4, EndOfBranch)]),
            vec![],
        );
        let mut seen = HashSet::new();
        let mut cursor = graph.first_page().unwrap().id;
        while cursor != 0 {
            assert!(seen.insert(cursor), "page {} visited twice", cursor);
            cursor = graph.get(cursor).unwrap().next_page_id;
        }
        assert_eq!(seen.len(), graph.len());
    }

    #[test]
    fn test_mismatched_back_pointer_is_repaired() {
        let pages = vec![
            page(1, 0, 2, BranchTable),
            page(2, 7, 3, TrueFalse),
            page(3, 2, 0, TrueFalse),
        ];
        let graph = PageGraph::load(1, pages, vec![]);
        assert_eq!(graph.get(2).unwrap().prev_page_id, 1);
        assert_eq!(
            graph.repairs(),
            &[LinkPatch {
                page_id: 2,
                prev_page_id: 1,
                next_page_id: 3
            }]
        );
    }

    #[test]
    fn test_cycle_and_orphan_are_healed() {
        let pages = vec![
            page(1, 0, 2, BranchTable),
            page(2, 1, 1, TrueFalse),
            page(3, 99, 0, Essay),
        ];
        let graph = PageGraph::load(1, pages, vec![]);
        let order: Vec<i64> = graph.pages().map(|p| p.id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(graph.get(2).unwrap().next_page_id, 3);
        assert_eq!(graph.get(3).unwrap().prev_page_id, 2);
        assert_eq!(graph.repairs().len(), 2);
    }

    #[test]
    fn test_unknown_page_is_not_found() {
        let graph = PageGraph::load(1, chain(&[(1, Essay)]), vec![]);
        assert!(matches!(graph.get(42), Err(LessonError::PageNotFound(42))));
    }

    #[test]
    fn test_sub_pages_stop_at_end_types() {
        let graph = PageGraph::load(
            1,
            chain(&[
                (1, BranchTable),
                (2, TrueFalse),
                (3, Essay),
                (4, EndOfBranch),
                (5, TrueFalse),
            ]),
            vec![],
        );
        let inner = graph.sub_pages_of(1, &[BranchTable, EndOfBranch]).unwrap();
        assert_eq!(ids(&inner), vec![2, 3]);
        assert_eq!(graph.following(1, &[EndOfBranch]).unwrap().unwrap().id, 4);
        assert!(graph.sub_pages_of(5, &[EndOfBranch]).unwrap().is_empty());
    }

    #[test]
    fn test_is_sub_page_of_type_walks_backwards() {
        let graph = PageGraph::load(
            1,
            chain(&[
                (1, Cluster),
                (2, BranchTable),
                (3, TrueFalse),
                (4, EndOfBranch),
                (5, TrueFalse),
                (6, EndOfCluster),
            ]),
            vec![],
        );
        let ends = [EndOfBranch, Cluster];
        assert!(graph.is_sub_page_of_type(3, &[BranchTable], &ends).unwrap());
        assert!(!graph.is_sub_page_of_type(2, &[BranchTable], &ends).unwrap());
        assert!(!graph.is_sub_page_of_type(5, &[BranchTable], &ends).unwrap());
    }

    #[test]
    fn test_enclosing_reports_missing_structure() {
        let graph = PageGraph::load(1, chain(&[(1, TrueFalse), (2, TrueFalse)]), vec![]);
        assert!(matches!(
            graph.enclosing(2, Cluster),
            Err(LessonError::NoEnclosingStructure { page_id: 2, .. })
        ));
    }

    #[test]
    fn test_insert_remove_and_move_splices() {
        let graph = PageGraph::load(1, chain(&[(1, Essay), (2, Essay), (3, Essay)]), vec![]);

        let splice = graph.plan_insert_after(1).unwrap();
        assert_eq!(
            splice,
            Splice {
                prev_page_id: 1,
                next_page_id: 2
            }
        );
        let patches = graph.link_in(splice, 10);
        assert!(patches.contains(&LinkPatch {
            page_id: 1,
            prev_page_id: 0,
            next_page_id: 10
        }));
        assert!(patches.contains(&LinkPatch {
            page_id: 2,
            prev_page_id: 10,
            next_page_id: 3
        }));

        let patches = graph.plan_remove(2).unwrap();
        assert_eq!(
            patches,
            vec![
                LinkPatch {
                    page_id: 1,
                    prev_page_id: 0,
                    next_page_id: 3
                },
                LinkPatch {
                    page_id: 3,
                    prev_page_id: 1,
                    next_page_id: 0
                },
            ]
        );

        let patches = graph.plan_move(3, 0).unwrap();
        assert_eq!(patches.len(), 3);
        assert!(patches.contains(&LinkPatch {
            page_id: 3,
            prev_page_id: 0,
            next_page_id: 1
        }));
        assert!(graph.plan_move(3, 3).is_err());
    }
}
