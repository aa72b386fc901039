// src/engine/navigation.rs

//! Next-page resolution.
//!
//! A [`Navigator`] is a pure function of the lesson settings, the page graph,
//! the learner's ledger for the current retry and a random source.

use rand::{Rng, seq::IndexedRandom, seq::SliceRandom};

use super::{
    LessonError, LessonResult,
    graph::PageGraph,
    jump::{Destination, Jump, PageKind},
    ledger::{Ledger, SortOrder},
};
use crate::models::{
    lesson::{Lesson, NextPageDefault},
    page::Page,
};

const BRANCH_ENDS: [PageKind; 2] = [PageKind::BranchTable, PageKind::EndOfBranch];

pub struct Navigator<'a> {
    lesson: &'a Lesson,
    graph: &'a PageGraph,
    ledger: &'a Ledger,
    can_manage: bool,
    reviewing: bool,
}

impl<'a> Navigator<'a> {
    pub fn new(lesson: &'a Lesson, graph: &'a PageGraph, ledger: &'a Ledger) -> Self {
        Self {
            lesson,
            graph,
            ledger,
            can_manage: false,
            reviewing: false,
        }
    }

    /// Teachers walk the chain literally instead of through random selection.
    pub fn managing(mut self, can_manage: bool) -> Self {
        self.can_manage = can_manage;
        self
    }

    /// Replays the ledger's path instead of resolving jumps.
    pub fn reviewing(mut self, reviewing: bool) -> Self {
        self.reviewing = reviewing;
        self
    }

    /// Resolves `jump` taken from `page_id` to a displayable destination.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        page_id: i64,
        jump: Jump,
        rng: &mut R,
    ) -> LessonResult<Destination> {
        let page = self.graph.get(page_id)?;
        let replayed = if self.reviewing {
            self.replay_next(page)
        } else {
            None
        };
        if let Some(destination) = replayed {
            return Ok(destination);
        }
        let destination = self.calculate_new_page_on_jump(page, jump, rng)?;
        self.settle(destination, rng)
    }

    /// Interprets a jump code relative to `page`.
    pub fn calculate_new_page_on_jump<R: Rng + ?Sized>(
        &self,
        page: &Page,
        jump: Jump,
        rng: &mut R,
    ) -> LessonResult<Destination> {
        match jump {
            Jump::Page(id) => {
                let target = self.graph.get(id)?;
                if target.kind == PageKind::Cluster && !self.can_manage {
                    self.cluster_jump(target.id, rng)
                } else {
                    Ok(Destination::Page(target.id))
                }
            }
            Jump::ThisPage => Ok(Destination::Page(page.id)),
            Jump::NextPage => Ok(self.get_next_page(page.next_page_id, rng)),
            Jump::PreviousPage => Ok(Destination::from_page_id(page.prev_page_id)),
            Jump::EndOfLesson => Ok(Destination::EndOfLesson),
            Jump::UnseenBranchPage => {
                if self.can_manage {
                    Ok(Destination::from_page_id(page.next_page_id))
                } else {
                    self.unseen_question_jump(page.id, rng)
                }
            }
            Jump::RandomPage => self.random_question_jump(page.id, rng),
            Jump::RandomBranch => self.unseen_branch_jump(rng),
            Jump::ClusterJump => {
                if self.can_manage {
                    Ok(Destination::from_page_id(page.next_page_id))
                } else {
                    self.cluster_jump(page.id, rng)
                }
            }
        }
    }

    /// NEXT_PAGE: flash-card selection when configured, otherwise the
    /// literal `next_page_id`.
    pub fn get_next_page<R: Rng + ?Sized>(&self, next_page_id: i64, rng: &mut R) -> Destination {
        if self.lesson.nextpagedefault != NextPageDefault::Normal {
            let mut candidates: Vec<&Page> = self.graph.pages().collect();
            candidates.shuffle(rng);
            let seen = self.ledger.seen_pages();
            let found = candidates.into_iter().find(|p| match self.lesson.nextpagedefault {
                NextPageDefault::Unseen => !seen.contains(&p.id),
                NextPageDefault::Unanswered => !self.ledger.has_correct_attempt(p.id),
                NextPageDefault::Normal => false,
            });
            if let Some(page) = found {
                if self.lesson.maxpages > 0
                    && self.ledger.total_attempts() >= self.lesson.maxpages as usize
                {
                    return Destination::EndOfLesson;
                }
                return Destination::Page(page.id);
            }
        }

        if next_page_id > 0 && self.graph.contains(next_page_id) {
            Destination::Page(next_page_id)
        } else {
            Destination::EndOfLesson
        }
    }

    /// UNSEEN_BRANCH_PAGE: an unseen page of the enclosing branch table, or
    /// the branch exit once everything has been seen.
    pub fn unseen_question_jump<R: Rng + ?Sized>(
        &self,
        page_id: i64,
        rng: &mut R,
    ) -> LessonResult<Destination> {
        let seen = self.ledger.seen_pages();
        let branch = self.graph.enclosing(page_id, PageKind::BranchTable)?;
        let inner = self.graph.sub_pages_of(branch.id, &BRANCH_ENDS)?;

        let unseen: Vec<&&Page> = inner.iter().filter(|p| !seen.contains(&p.id)).collect();
        if let Some(page) = unseen.choose(rng) {
            return Ok(Destination::Page(page.id));
        }

        let exit = match inner.last() {
            Some(last) => last.next_page_id,
            None => branch.next_page_id,
        };
        Ok(Destination::from_page_id(exit))
    }

    /// RANDOM_PAGE: any page of the enclosing branch table.
    pub fn random_question_jump<R: Rng + ?Sized>(
        &self,
        page_id: i64,
        rng: &mut R,
    ) -> LessonResult<Destination> {
        let branch = self.graph.enclosing(page_id, PageKind::BranchTable)?;
        let inner = self.graph.sub_pages_of(branch.id, &BRANCH_ENDS)?;
        Ok(match inner.choose(rng) {
            Some(page) => Destination::Page(page.id),
            None => Destination::from_page_id(branch.next_page_id),
        })
    }

    /// RANDOM_BRANCH: a branch table after the flagged one that has not been
    /// viewed since.
    pub fn unseen_branch_jump<R: Rng + ?Sized>(&self, rng: &mut R) -> LessonResult<Destination> {
        let mut seen = Vec::new();
        let mut start = None;
        for view in self.ledger.branch_views(SortOrder::NewestFirst) {
            if view.flag {
                start = Some(view.page_id);
                break;
            }
            seen.push(view.page_id);
        }
        let start = start.ok_or_else(|| {
            LessonError::DataIntegrity(
                "no branch view is flagged as the random branch trigger".to_string(),
            )
        })?;

        let mut unseen = Vec::new();
        let mut cursor = self.graph.get(start)?.next_page_id;
        while cursor != 0 {
            let page = self.graph.get(cursor)?;
            if page.kind == PageKind::BranchTable && !seen.contains(&page.id) {
                unseen.push(page.id);
            }
            cursor = page.next_page_id;
        }

        Ok(match unseen.choose(rng) {
            Some(id) => Destination::Page(*id),
            None => Destination::EndOfLesson,
        })
    }

    /// CLUSTER_JUMP from `page_id`.
    pub fn cluster_jump<R: Rng + ?Sized>(
        &self,
        page_id: i64,
        rng: &mut R,
    ) -> LessonResult<Destination> {
        self.cluster_jump_at(page_id, rng, 0)
    }

    fn cluster_jump_at<R: Rng + ?Sized>(
        &self,
        page_id: i64,
        rng: &mut R,
        depth: usize,
    ) -> LessonResult<Destination> {
        if depth > self.graph.len() {
            return Err(LessonError::DataIntegrity(format!(
                "cluster exits starting at page {} never leave the clusters",
                page_id
            )));
        }

        let seen = self.ledger.seen_pages();
        let start = self.graph.enclosing(page_id, PageKind::Cluster)?;
        let members = self.graph.sub_pages_of(start.id, &[PageKind::EndOfCluster])?;

        let mut candidates: Vec<&Page> = Vec::new();
        for page in members {
            if page.kind == PageKind::EndOfBranch
                || self.graph.is_sub_page_of_type(
                    page.id,
                    &[PageKind::BranchTable],
                    &[PageKind::EndOfBranch, PageKind::Cluster],
                )?
            {
                continue;
            }
            if page.kind == PageKind::BranchTable {
                // A branch table only counts while none of its pages were seen.
                let inner = self.graph.sub_pages_of(page.id, &BRANCH_ENDS)?;
                if !inner.is_empty() && inner.iter().all(|p| !seen.contains(&p.id)) {
                    candidates.push(page);
                }
            } else if !seen.contains(&page.id) {
                candidates.push(page);
            }
        }

        if let Some(choice) = candidates.choose(rng) {
            if choice.kind == PageKind::BranchTable {
                let inner = self.graph.sub_pages_of(choice.id, &BRANCH_ENDS)?;
                return Ok(match inner.choose(rng) {
                    Some(page) => Destination::Page(page.id),
                    None => Destination::Page(choice.id),
                });
            }
            return Ok(Destination::Page(choice.id));
        }

        // Everything has been seen: leave through the end of cluster marker.
        let Some(end) = self.graph.following(start.id, &[PageKind::EndOfCluster])? else {
            return Ok(Destination::EndOfLesson);
        };
        let exit = self
            .graph
            .first_answer(end.id)
            .map(|a| a.jumpto)
            .unwrap_or(Jump::NextPage);

        let target = match exit {
            Jump::NextPage | Jump::ClusterJump => Destination::from_page_id(end.next_page_id),
            Jump::ThisPage | Jump::EndOfLesson => Destination::EndOfLesson,
            Jump::PreviousPage => Destination::from_page_id(start.prev_page_id),
            Jump::Page(id) => {
                if self.graph.contains(id) {
                    Destination::Page(id)
                } else {
                    tracing::warn!(
                        "End of cluster {} exits to missing page {}",
                        end.id,
                        id
                    );
                    Destination::EndOfLesson
                }
            }
            other => self.calculate_new_page_on_jump(end, other, rng)?,
        };

        if let Destination::Page(id) = target {
            if self.graph.get(id)?.kind == PageKind::Cluster {
                return self.cluster_jump_at(id, rng, depth + 1);
            }
        }
        Ok(target)
    }

    /// The configured exit of an end-of-branch or end-of-cluster marker.
    pub fn marker_exit<R: Rng + ?Sized>(
        &self,
        marker: &Page,
        rng: &mut R,
    ) -> LessonResult<Destination> {
        let jump = self
            .graph
            .first_answer(marker.id)
            .map(|a| a.jumpto)
            .unwrap_or(Jump::NextPage);
        match jump {
            Jump::NextPage => Ok(Destination::from_page_id(marker.next_page_id)),
            Jump::ThisPage => Err(LessonError::DataIntegrity(format!(
                "marker page {} jumps to itself",
                marker.id
            ))),
            Jump::PreviousPage => Ok(Destination::from_page_id(marker.prev_page_id)),
            other => self.calculate_new_page_on_jump(marker, other, rng),
        }
    }

    /// Follows clusters and end markers until a displayable page is reached.
    pub fn settle<R: Rng + ?Sized>(
        &self,
        destination: Destination,
        rng: &mut R,
    ) -> LessonResult<Destination> {
        let mut current = destination;
        for _ in 0..=self.graph.len() {
            let Destination::Page(id) = current else {
                return Ok(current);
            };
            let page = self.graph.get(id)?;
            current = match page.kind {
                PageKind::Cluster if self.can_manage => {
                    Destination::from_page_id(page.next_page_id)
                }
                PageKind::Cluster => self.cluster_jump(page.id, rng)?,
                PageKind::EndOfBranch | PageKind::EndOfCluster => self.marker_exit(page, rng)?,
                _ => return Ok(current),
            };
        }
        Err(LessonError::DataIntegrity(format!(
            "navigation from {:?} does not reach a displayable page",
            destination
        )))
    }

    /// Review mode: where the learner went after `page`.
    ///
    /// Question pages continue after their last run in the replay path; the
    /// position in the path only moves forward.
    /// Branch tables follow the destination recorded on their first view.
    /// `None` when the ledger says nothing about the page.
    pub fn replay_next(&self, page: &Page) -> Option<Destination> {
        let path = self.ledger.replay_path();
        if let Some(i) = path.iter().rposition(|id| *id == page.id) {
            return Some(
                path.get(i + 1)
                    .map(|id| Destination::Page(*id))
                    .unwrap_or(Destination::EndOfLesson),
            );
        }

        let view = self.ledger.first_branch_view(page.id)?;
        match Destination::try_from(view.next_page_id) {
            Ok(Destination::Page(id)) if !self.graph.contains(id) => None,
            Ok(destination) => Some(destination),
            // Views stored before their destination was resolved
            Err(_) => self
                .ledger
                .first_attempt_after(view)
                .map(|a| Destination::Page(a.page_id)),
        }
    }
}

/// Whether `jump` taken from `page_id` counts as moving forward.
///
/// Reserved codes are always correct except THIS_PAGE; a literal target is
/// correct only if it lies strictly after `page_id`.
pub fn jumpto_is_correct(graph: &PageGraph, page_id: i64, jump: Jump) -> LessonResult<bool> {
    match jump {
        Jump::ThisPage => Ok(false),
        Jump::Page(target) => graph.is_after(page_id, target),
        _ => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::engine::graph::test_support::{answer, chain};
    use crate::engine::ledger::test_support::{attempt, view};
    use crate::models::page::Answer;
    use PageKind::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn graph(kinds: &[(i64, PageKind)], answers: Vec<Answer>) -> PageGraph {
        PageGraph::load(1, chain(kinds), answers)
    }

    /// A(1, branch table) -> B(2) -> C(3) -> D(4, end of branch)
    fn branch_lesson() -> PageGraph {
        graph(
            &[(1, BranchTable), (2, TrueFalse), (3, TrueFalse), (4, EndOfBranch)],
            vec![
                answer(10, 1, Jump::NextPage, 0),
                answer(20, 2, Jump::NextPage, 1),
                answer(30, 3, Jump::NextPage, 1),
                answer(40, 4, Jump::Page(1), 0),
            ],
        )
    }

    /// 1 content, 2 cluster, 3..5 questions, 6 end of cluster, 7 question
    fn cluster_lesson(exit: Jump) -> PageGraph {
        graph(
            &[
                (1, BranchTable),
                (2, Cluster),
                (3, MultiChoice),
                (4, MultiChoice),
                (5, MultiChoice),
                (6, EndOfCluster),
                (7, TrueFalse),
            ],
            vec![answer(60, 6, exit, 0)],
        )
    }

    #[test]
    fn test_next_page_from_branch_table_is_first_inner_page() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(
            nav.resolve(1, Jump::NextPage, &mut rng()).unwrap(),
            Destination::Page(2)
        );
    }

    #[test]
    fn test_unseen_branch_page_returns_remaining_page() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        let ledger = Ledger::new(0, vec![attempt(1, 2, Some(20), true, 20)], vec![view(1, 1, false, 10)]);
        let nav = Navigator::new(&lesson, &graph, &ledger);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(
                nav.resolve(1, Jump::UnseenBranchPage, &mut rng).unwrap(),
                Destination::Page(3)
            );
        }
    }

    #[test]
    fn test_unseen_branch_page_exit_is_deterministic_once_all_seen() {
        let lesson = Lesson::default();
        let graph = graph(
            &[
                (1, BranchTable),
                (2, TrueFalse),
                (3, TrueFalse),
                (4, EndOfBranch),
                (5, Essay),
            ],
            vec![answer(40, 4, Jump::NextPage, 0)],
        );
        let ledger = Ledger::new(
            0,
            vec![attempt(1, 2, None, true, 20), attempt(2, 3, None, true, 30)],
            vec![view(1, 1, false, 10)],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger);
        let mut outcomes = HashSet::new();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            outcomes.insert(nav.resolve(3, Jump::UnseenBranchPage, &mut rng).unwrap());
        }
        assert_eq!(outcomes.into_iter().collect::<Vec<_>>(), vec![Destination::Page(5)]);
    }

    #[test]
    fn test_unseen_branch_page_with_empty_branch_uses_next_page() {
        let lesson = Lesson::default();
        let graph = graph(&[(1, BranchTable), (2, BranchTable)], vec![]);
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(
            nav.unseen_question_jump(1, &mut rng()).unwrap(),
            Destination::Page(2)
        );
    }

    #[test]
    fn test_unseen_branch_page_without_branch_is_reported() {
        let lesson = Lesson::default();
        let graph = graph(&[(1, TrueFalse), (2, TrueFalse)], vec![]);
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert!(matches!(
            nav.resolve(2, Jump::UnseenBranchPage, &mut rng()),
            Err(LessonError::NoEnclosingStructure { .. })
        ));
    }

    #[test]
    fn test_random_page_stays_inside_branch() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let dest = nav.random_question_jump(3, &mut rng).unwrap();
            assert!(matches!(dest, Destination::Page(2) | Destination::Page(3)));
        }
    }

    #[test]
    fn test_previous_page_and_this_page() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(
            nav.resolve(3, Jump::PreviousPage, &mut rng()).unwrap(),
            Destination::Page(2)
        );
        assert_eq!(
            nav.resolve(1, Jump::PreviousPage, &mut rng()).unwrap(),
            Destination::EndOfLesson
        );
        assert_eq!(
            nav.resolve(2, Jump::ThisPage, &mut rng()).unwrap(),
            Destination::Page(2)
        );
        assert_eq!(
            nav.resolve(2, Jump::EndOfLesson, &mut rng()).unwrap(),
            Destination::EndOfLesson
        );
    }

    #[test]
    fn test_end_of_branch_follows_its_exit_jump() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        // C -> NEXT_PAGE lands on D, whose answer leads back to the branch table.
        assert_eq!(
            nav.resolve(3, Jump::NextPage, &mut rng()).unwrap(),
            Destination::Page(1)
        );
    }

    #[test]
    fn test_marker_jumping_to_itself_is_reported() {
        let lesson = Lesson::default();
        let graph = graph(
            &[(1, TrueFalse), (2, EndOfBranch)],
            vec![answer(20, 2, Jump::ThisPage, 0)],
        );
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert!(matches!(
            nav.resolve(1, Jump::NextPage, &mut rng()),
            Err(LessonError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_last_page_next_is_end_of_lesson() {
        let lesson = Lesson::default();
        let graph = graph(&[(1, TrueFalse), (2, Essay)], vec![]);
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(
            nav.resolve(2, Jump::NextPage, &mut rng()).unwrap(),
            Destination::EndOfLesson
        );
    }

    #[test]
    fn test_cluster_jump_picks_unseen_pages_only() {
        let lesson = Lesson::default();
        let graph = cluster_lesson(Jump::NextPage);
        let ledger = Ledger::new(
            0,
            vec![attempt(1, 3, None, true, 10), attempt(2, 5, None, false, 20)],
            vec![],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(
                nav.resolve(5, Jump::ClusterJump, &mut rng).unwrap(),
                Destination::Page(4)
            );
        }
    }

    #[test]
    fn test_exhausted_cluster_never_returns_inner_page() {
        let lesson = Lesson::default();
        let ledger = Ledger::new(
            0,
            vec![
                attempt(1, 3, None, true, 10),
                attempt(2, 4, None, true, 20),
                attempt(3, 5, None, true, 30),
            ],
            vec![],
        );
        for exit in [
            Jump::NextPage,
            Jump::EndOfLesson,
            Jump::Page(7),
            Jump::Page(99),
            Jump::PreviousPage,
        ] {
            let graph = cluster_lesson(exit);
            let nav = Navigator::new(&lesson, &graph, &ledger);
            for seed in 0..10 {
                let mut rng = StdRng::seed_from_u64(seed);
                let dest = nav.resolve(4, Jump::ClusterJump, &mut rng).unwrap();
                assert!(
                    !matches!(dest, Destination::Page(2..=6)),
                    "exit {:?} led back into the cluster: {:?}",
                    exit,
                    dest
                );
            }
        }
    }

    #[test]
    fn test_literal_jump_into_cluster_is_resolved() {
        let lesson = Lesson::default();
        let graph = cluster_lesson(Jump::NextPage);
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        let dest = nav.resolve(1, Jump::Page(2), &mut rng()).unwrap();
        assert!(matches!(dest, Destination::Page(3..=5)));
        // Falling into the cluster through NEXT_PAGE is resolved the same way.
        let dest = nav.resolve(1, Jump::NextPage, &mut rng()).unwrap();
        assert!(matches!(dest, Destination::Page(3..=5)));
    }

    #[test]
    fn test_cluster_with_unseen_branch_table_enters_it() {
        let lesson = Lesson::default();
        let graph = graph(
            &[
                (1, Cluster),
                (2, BranchTable),
                (3, TrueFalse),
                (4, TrueFalse),
                (5, EndOfBranch),
                (6, EndOfCluster),
                (7, Essay),
            ],
            vec![answer(50, 5, Jump::ClusterJump, 0), answer(60, 6, Jump::NextPage, 0)],
        );
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger);
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let dest = nav.cluster_jump(1, &mut rng).unwrap();
            assert!(matches!(dest, Destination::Page(3) | Destination::Page(4)));
        }

        // Any seen page inside the branch table removes it from the draw.
        let ledger = Ledger::new(0, vec![attempt(1, 3, None, true, 10)], vec![]);
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(
            nav.cluster_jump(3, &mut rng()).unwrap(),
            Destination::Page(7)
        );
    }

    #[test]
    fn test_cluster_exit_into_another_cluster_recurses() {
        let lesson = Lesson::default();
        let graph = graph(
            &[
                (1, Cluster),
                (2, TrueFalse),
                (3, EndOfCluster),
                (4, Cluster),
                (5, TrueFalse),
                (6, EndOfCluster),
            ],
            vec![answer(30, 3, Jump::Page(4), 0), answer(60, 6, Jump::NextPage, 0)],
        );
        let ledger = Ledger::new(0, vec![attempt(1, 2, None, true, 10)], vec![]);
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(
            nav.cluster_jump(2, &mut rng()).unwrap(),
            Destination::Page(5)
        );
    }

    #[test]
    fn test_cluster_exit_back_into_itself_is_reported() {
        let lesson = Lesson::default();
        let graph = graph(
            &[(1, Cluster), (2, TrueFalse), (3, EndOfCluster)],
            vec![answer(30, 3, Jump::Page(1), 0)],
        );
        let ledger = Ledger::new(0, vec![attempt(1, 2, None, true, 10)], vec![]);
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert!(matches!(
            nav.cluster_jump(2, &mut rng()),
            Err(LessonError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_teacher_walks_clusters_literally() {
        let lesson = Lesson::default();
        let graph = cluster_lesson(Jump::NextPage);
        let ledger = Ledger::default();
        let nav = Navigator::new(&lesson, &graph, &ledger).managing(true);
        assert_eq!(
            nav.resolve(3, Jump::ClusterJump, &mut rng()).unwrap(),
            Destination::Page(4)
        );
        assert_eq!(
            nav.resolve(1, Jump::NextPage, &mut rng()).unwrap(),
            Destination::Page(3)
        );
    }

    #[test]
    fn test_random_branch_skips_viewed_branch_tables() {
        let lesson = Lesson::default();
        let graph = graph(
            &[
                (1, BranchTable),
                (2, BranchTable),
                (3, EndOfBranch),
                (4, BranchTable),
                (5, EndOfBranch),
            ],
            vec![],
        );
        let ledger = Ledger::new(0, vec![], vec![view(1, 1, true, 10), view(2, 2, false, 20)]);
        let nav = Navigator::new(&lesson, &graph, &ledger);
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(
                nav.unseen_branch_jump(&mut rng).unwrap(),
                Destination::Page(4)
            );
        }

        let ledger = Ledger::new(
            0,
            vec![],
            vec![view(1, 1, true, 10), view(2, 2, false, 20), view(3, 4, false, 30)],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(
            nav.unseen_branch_jump(&mut rng()).unwrap(),
            Destination::EndOfLesson
        );
    }

    #[test]
    fn test_random_branch_without_flag_is_reported() {
        let lesson = Lesson::default();
        let graph = graph(&[(1, BranchTable)], vec![]);
        let ledger = Ledger::new(0, vec![], vec![view(1, 1, false, 10)]);
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert!(nav.unseen_branch_jump(&mut rng()).is_err());
    }

    #[test]
    fn test_flash_card_unseen_picks_unseen_page() {
        let lesson = Lesson {
            nextpagedefault: NextPageDefault::Unseen,
            ..Lesson::default()
        };
        let graph = graph(&[(1, TrueFalse), (2, TrueFalse), (3, TrueFalse)], vec![]);
        let ledger = Ledger::new(
            0,
            vec![attempt(1, 1, None, true, 10), attempt(2, 3, None, false, 20)],
            vec![],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger);
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert_eq!(nav.get_next_page(2, &mut rng), Destination::Page(2));
        }
    }

    #[test]
    fn test_flash_card_unanswered_includes_wrongly_answered_pages() {
        let lesson = Lesson {
            nextpagedefault: NextPageDefault::Unanswered,
            ..Lesson::default()
        };
        let graph = graph(&[(1, TrueFalse), (2, TrueFalse)], vec![]);
        let ledger = Ledger::new(
            0,
            vec![attempt(1, 1, None, true, 10), attempt(2, 2, None, false, 20)],
            vec![],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(nav.get_next_page(0, &mut rng()), Destination::Page(2));
    }

    #[test]
    fn test_flash_card_max_pages_ends_lesson() {
        let lesson = Lesson {
            nextpagedefault: NextPageDefault::Unseen,
            maxpages: 2,
            ..Lesson::default()
        };
        let graph = graph(&[(1, TrueFalse), (2, TrueFalse), (3, TrueFalse)], vec![]);
        let ledger = Ledger::new(
            0,
            vec![attempt(1, 1, None, true, 10), attempt(2, 1, None, false, 20)],
            vec![],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(nav.get_next_page(2, &mut rng()), Destination::EndOfLesson);
    }

    #[test]
    fn test_flash_card_falls_back_to_chain_when_all_seen() {
        let lesson = Lesson {
            nextpagedefault: NextPageDefault::Unseen,
            ..Lesson::default()
        };
        let graph = graph(&[(1, TrueFalse), (2, TrueFalse)], vec![]);
        let ledger = Ledger::new(
            0,
            vec![attempt(1, 1, None, true, 10), attempt(2, 2, None, true, 20)],
            vec![],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger);
        assert_eq!(nav.get_next_page(2, &mut rng()), Destination::Page(2));
        assert_eq!(nav.get_next_page(0, &mut rng()), Destination::EndOfLesson);
    }

    #[test]
    fn test_review_replays_original_path() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        // Original path: A, C, B (C chosen first from the branch table).
        let mut first = view(1, 1, false, 10);
        first.next_page_id = 3;
        let ledger = Ledger::new(
            0,
            vec![attempt(1, 3, None, true, 20), attempt(2, 2, None, true, 30)],
            vec![first],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger).reviewing(true);
        assert_eq!(
            nav.resolve(1, Jump::NextPage, &mut rng()).unwrap(),
            Destination::Page(3)
        );
        assert_eq!(
            nav.resolve(3, Jump::NextPage, &mut rng()).unwrap(),
            Destination::Page(2)
        );
        assert_eq!(
            nav.resolve(2, Jump::NextPage, &mut rng()).unwrap(),
            Destination::EndOfLesson
        );
    }

    /// Follows NEXT_PAGE in review mode from `start` and returns the pages shown.
    fn review_walk(nav: &Navigator<'_>, start: i64) -> Vec<i64> {
        let mut shown = vec![start];
        let mut current = start;
        for _ in 0..10 {
            match nav.resolve(current, Jump::NextPage, &mut rng()).unwrap() {
                Destination::Page(id) => {
                    shown.push(id);
                    current = id;
                }
                Destination::EndOfLesson => return shown,
            }
        }
        panic!("review does not end: {:?}", shown);
    }

    #[test]
    fn test_review_through_revisited_branch_table_reaches_every_branch() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        // A -> B, back to A -> C
        let mut to_b = view(1, 1, false, 10);
        to_b.next_page_id = 2;
        let mut to_c = view(2, 1, false, 30);
        to_c.next_page_id = 3;
        let ledger = Ledger::new(
            0,
            vec![attempt(1, 2, None, true, 20), attempt(2, 3, None, true, 40)],
            vec![to_b, to_c],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger).reviewing(true);
        assert_eq!(review_walk(&nav, 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_review_of_page_answered_twice_does_not_loop() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        // B, C, then B again before the end
        let ledger = Ledger::new(
            0,
            vec![
                attempt(1, 2, None, false, 20),
                attempt(2, 3, None, true, 30),
                attempt(3, 2, None, true, 40),
            ],
            vec![view(1, 1, false, 10)],
        );
        let nav = Navigator::new(&lesson, &graph, &ledger).reviewing(true);
        // The view has no stored destination: the first answered page follows it.
        assert_eq!(review_walk(&nav, 1), vec![1, 2]);
        assert_eq!(review_walk(&nav, 3), vec![3, 2]);
    }

    #[test]
    fn test_review_of_unvisited_page_navigates_normally() {
        let lesson = Lesson::default();
        let graph = branch_lesson();
        let ledger = Ledger::new(0, vec![attempt(1, 3, None, true, 20)], vec![]);
        let nav = Navigator::new(&lesson, &graph, &ledger).reviewing(true);
        assert_eq!(
            nav.resolve(1, Jump::NextPage, &mut rng()).unwrap(),
            Destination::Page(2)
        );
    }

    #[test]
    fn test_jumpto_is_correct() {
        let graph = branch_lesson();
        for jump in Jump::RESERVED {
            if jump != Jump::ThisPage {
                assert!(jumpto_is_correct(&graph, 3, jump).unwrap(), "{:?}", jump);
            }
        }
        assert!(!jumpto_is_correct(&graph, 2, Jump::ThisPage).unwrap());
        assert!(jumpto_is_correct(&graph, 2, Jump::Page(4)).unwrap());
        assert!(!jumpto_is_correct(&graph, 3, Jump::Page(2)).unwrap());
        assert!(!jumpto_is_correct(&graph, 3, Jump::Page(3)).unwrap());
    }
}
