//! Coalesced work for one rebuild key.

use std::collections::BTreeSet;
use std::fmt;

use time::Date;

use super::request::{RebuildKey, RebuildRequest, RebuildTarget};

/// Board-scoped work. Flags are OR-ed and id sets unioned as requests merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardWork {
    pub uri: String,
    /// Sticky: once set, every derived artifact is rebuilt and stale ones pruned.
    pub build_all: bool,
    /// Every index page plus the catalog.
    pub index: bool,
    pub pages: BTreeSet<u32>,
    pub threads: BTreeSet<u64>,
    pub catalog: bool,
    pub rules: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanScope {
    FrontPage,
    Board(BoardWork),
    Overboard { sfw: bool },
    Multiboard { boards: Vec<String> },
    Log { date: Date },
    NotFound,
    Login,
    GenericThumb,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub key: RebuildKey,
    pub scope: PlanScope,
}

impl RebuildPlan {
    pub fn from_request(request: RebuildRequest) -> Self {
        let key = request.key();
        let scope = match request.target {
            RebuildTarget::FrontPage => PlanScope::FrontPage,
            RebuildTarget::Board { .. }
            | RebuildTarget::BoardPage { .. }
            | RebuildTarget::Thread { .. }
            | RebuildTarget::Catalog { .. }
            | RebuildTarget::Rules { .. } => {
                let mut work = BoardWork::default();
                merge_board(&mut work, request.target, request.build_all);
                PlanScope::Board(work)
            }
            RebuildTarget::Overboard { sfw } => PlanScope::Overboard { sfw },
            RebuildTarget::Multiboard { boards } => PlanScope::Multiboard { boards },
            RebuildTarget::Log { date } => PlanScope::Log { date },
            RebuildTarget::NotFound => PlanScope::NotFound,
            RebuildTarget::Login => PlanScope::Login,
            RebuildTarget::GenericThumb => PlanScope::GenericThumb,
            RebuildTarget::All => PlanScope::All,
        };
        Self { key, scope }
    }

    /// Fold another request for the same key into this plan.
    pub fn absorb(&mut self, request: RebuildRequest) {
        debug_assert_eq!(self.key, request.key());
        match (&mut self.scope, request.target) {
            (PlanScope::Board(work), target) => merge_board(work, target, request.build_all),
            (PlanScope::Multiboard { boards }, RebuildTarget::Multiboard { boards: more }) => {
                let union: BTreeSet<String> = boards.drain(..).chain(more).collect();
                boards.extend(union);
            }
            _ => {}
        }
    }
}

fn merge_board(work: &mut BoardWork, target: RebuildTarget, build_all: bool) {
    work.build_all |= build_all;
    match target {
        RebuildTarget::Board { uri } => {
            work.uri = uri;
            work.index = true;
        }
        RebuildTarget::BoardPage { uri, page } => {
            work.uri = uri;
            work.pages.insert(page);
        }
        RebuildTarget::Thread { uri, thread_id } => {
            work.uri = uri;
            work.threads.insert(thread_id);
        }
        RebuildTarget::Catalog { uri } => {
            work.uri = uri;
            work.catalog = true;
        }
        RebuildTarget::Rules { uri } => {
            work.uri = uri;
            work.rules = true;
        }
        _ => {}
    }
}

impl fmt::Display for RebuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            PlanScope::Board(work) => write!(
                f,
                "RebuildPlan {{ key: {}, build_all: {}, index: {}, pages: {}, threads: {}, \
                 catalog: {}, rules: {} }}",
                self.key,
                work.build_all,
                work.index,
                work.pages.len(),
                work.threads.len(),
                work.catalog,
                work.rules,
            ),
            _ => write!(f, "RebuildPlan {{ key: {} }}", self.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_request(target: RebuildTarget, build_all: bool) -> RebuildRequest {
        RebuildRequest { target, build_all }
    }

    #[test]
    fn build_all_is_sticky_and_ids_union() {
        let mut plan = RebuildPlan::from_request(board_request(
            RebuildTarget::Thread {
                uri: "a".to_string(),
                thread_id: 1,
            },
            true,
        ));
        plan.absorb(board_request(
            RebuildTarget::Thread {
                uri: "a".to_string(),
                thread_id: 2,
            },
            false,
        ));
        plan.absorb(board_request(
            RebuildTarget::BoardPage {
                uri: "a".to_string(),
                page: 3,
            },
            false,
        ));

        let PlanScope::Board(work) = &plan.scope else {
            panic!("board plan expected");
        };
        assert!(work.build_all);
        assert_eq!(work.threads, BTreeSet::from([1, 2]));
        assert_eq!(work.pages, BTreeSet::from([3]));
        assert!(!work.index);
        assert_eq!(work.uri, "a");
    }

    #[test]
    fn absorbed_index_request_keeps_the_catalog() {
        let mut first = RebuildPlan::from_request(board_request(
            RebuildTarget::Catalog {
                uri: "a".to_string(),
            },
            false,
        ));
        first.absorb(RebuildRequest::board_all("a"));

        let PlanScope::Board(work) = &first.scope else {
            panic!("board plan expected");
        };
        assert!(work.build_all && work.index && work.catalog);
        assert_eq!(
            first.to_string(),
            "RebuildPlan { key: board:a, build_all: true, index: true, pages: 0, threads: 0, \
             catalog: true, rules: false }"
        );
    }
}
