//! Query narrowing ladder
//!
//! Staged fallback search used by sources whose result volume depends on
//! how specific the query is:
//!
//! ```text
//! ById --0 hits--> ByTitle --too many--> ByTitleAuthor --too many--> ByTitleAuthorDate
//! ```
//!
//! The ladder is a fixed, deterministic state machine. `transition` is a
//! pure function of (stage, hit count, limit) so it can be exercised
//! without network access. When the ladder is exhausted the smallest
//! non-empty result set seen is returned, flagged as over-broad if it is
//! still above the limit.

use crate::types::{SourceError, TrialQuery};
use std::future::Future;
use tracing::debug;

/// One rung of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NarrowingStage {
    ById,
    ByTitle,
    ByTitleAuthor,
    ByTitleAuthorDate,
}

impl NarrowingStage {
    /// Next (narrower or fallback) stage
    pub fn next(self) -> Option<Self> {
        match self {
            NarrowingStage::ById => Some(NarrowingStage::ByTitle),
            NarrowingStage::ByTitle => Some(NarrowingStage::ByTitleAuthor),
            NarrowingStage::ByTitleAuthor => Some(NarrowingStage::ByTitleAuthorDate),
            NarrowingStage::ByTitleAuthorDate => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NarrowingStage::ById => "by_id",
            NarrowingStage::ByTitle => "by_title",
            NarrowingStage::ByTitleAuthor => "by_title_author",
            NarrowingStage::ByTitleAuthorDate => "by_title_author_date",
        }
    }
}

/// Ladder step decided from one stage's hit count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Hit count acceptable, stop here
    Accept,
    /// Try the given stage next
    Advance(NarrowingStage),
    /// No further stage can help; fall back to the best result seen
    Exhausted,
}

/// Pure transition function
///
/// - `ById`: zero hits falls back to the title search, any hit is accepted.
/// - Later stages: zero hits exhausts the ladder (narrowing removed
///   everything), a count within `max_hits` is accepted, an excessive count
///   advances to the next narrower stage.
pub fn transition(stage: NarrowingStage, hit_count: usize, max_hits: usize) -> Transition {
    match stage {
        NarrowingStage::ById if hit_count == 0 => Transition::Advance(NarrowingStage::ByTitle),
        NarrowingStage::ById => Transition::Accept,
        _ if hit_count == 0 => Transition::Exhausted,
        _ if hit_count <= max_hits => Transition::Accept,
        other => match other.next() {
            Some(next) => Transition::Advance(next),
            None => Transition::Exhausted,
        },
    }
}

/// Provider search-term syntax for building stage terms
#[derive(Debug, Clone, Copy)]
pub struct TermSyntax {
    /// Field tag appended to the title words (e.g. "[Title]")
    pub title_tag: &'static str,
    /// Field tag appended to the author name (e.g. "[Author]")
    pub author_tag: &'static str,
    /// Field tag appended to the year (e.g. "[dp]")
    pub date_tag: &'static str,
    /// Boolean conjunction between clauses
    pub conjunction: &'static str,
}

/// NCBI E-utilities syntax (PubMed, PMC)
pub const NCBI_SYNTAX: TermSyntax = TermSyntax {
    title_tag: "[Title]",
    author_tag: "[Author]",
    date_tag: "[dp]",
    conjunction: " AND ",
};

/// Plain syntax without field tags
pub const PLAIN_SYNTAX: TermSyntax = TermSyntax {
    title_tag: "",
    author_tag: "",
    date_tag: "",
    conjunction: " ",
};

/// Search term for `stage`, or `None` when the query lacks its inputs
///
/// The last stage narrows by year when a start date is known, otherwise
/// by the first intervention name.
pub fn stage_term(stage: NarrowingStage, query: &TrialQuery, syntax: &TermSyntax) -> Option<String> {
    let title = || {
        query
            .title_text()
            .map(|t| format!("{}{}", strip_quotes(t), syntax.title_tag))
    };
    let author = || {
        query
            .first_author()
            .map(|a| format!("{}{}", strip_quotes(a), syntax.author_tag))
    };

    match stage {
        NarrowingStage::ById => {
            let id = query.trial_id.trim();
            (!id.is_empty()).then(|| id.to_string())
        }
        NarrowingStage::ByTitle => title(),
        NarrowingStage::ByTitleAuthor => {
            let parts = [title()?, author()?];
            Some(parts.join(syntax.conjunction))
        }
        NarrowingStage::ByTitleAuthorDate => {
            let narrowing = match query.start_year() {
                Some(year) => format!("{}{}", year, syntax.date_tag),
                None => {
                    let name = query.interventions.iter().map(|i| i.trim()).find(|i| !i.is_empty())?;
                    format!("\"{}\"", strip_quotes(name))
                }
            };
            let mut parts = vec![title()?];
            parts.extend(author());
            parts.push(narrowing);
            Some(parts.join(syntax.conjunction))
        }
    }
}

fn strip_quotes(text: &str) -> String {
    text.replace('"', "")
}

/// One stage's search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage<T> {
    /// Total hits reported by the provider
    pub total: usize,
    /// Retrieved items (possibly a bounded prefix of `total`)
    pub items: T,
}

/// Final ladder result
#[derive(Debug, Clone, PartialEq)]
pub struct LadderOutcome<T> {
    /// Stage that produced `page`
    pub stage: NarrowingStage,
    pub page: SearchPage<T>,
    /// Ladder exhausted while still above the hit limit
    pub over_broad: bool,
    /// Stages actually queried, in order
    pub visited: Vec<NarrowingStage>,
}

/// Drive the ladder
///
/// `search` is called once per stage that has a term. Transport errors
/// propagate immediately. Returns `Ok(None)` when no stage found anything.
pub async fn run_ladder<T, F, Fut>(
    query: &TrialQuery,
    syntax: &TermSyntax,
    max_hits: usize,
    mut search: F,
) -> Result<Option<LadderOutcome<T>>, SourceError>
where
    F: FnMut(NarrowingStage, String) -> Fut,
    Fut: Future<Output = Result<SearchPage<T>, SourceError>>,
{
    let mut stage = Some(NarrowingStage::ById);
    let mut best: Option<(NarrowingStage, SearchPage<T>)> = None;
    let mut visited = Vec::new();

    while let Some(current) = stage {
        let Some(term) = stage_term(current, query, syntax) else {
            debug!(stage = current.as_str(), "Skipping stage (missing query inputs)");
            stage = current.next();
            continue;
        };

        visited.push(current);
        let page = search(current, term).await?;
        let total = page.total;
        let step = transition(current, total, max_hits);

        debug!(
            stage = current.as_str(),
            hits = total,
            max_hits,
            step = ?step,
            "Narrowing ladder step"
        );

        if step == Transition::Accept {
            return Ok(Some(LadderOutcome {
                stage: current,
                page,
                over_broad: false,
                visited,
            }));
        }

        let better = total > 0 && best.as_ref().map_or(true, |(_, b)| total < b.total);
        if better {
            best = Some((current, page));
        }

        stage = match step {
            Transition::Advance(next) => Some(next),
            _ => None,
        };
    }

    Ok(best.map(|(stage, page)| LadderOutcome {
        stage,
        over_broad: page.total > max_hits,
        page,
        visited,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_query() -> TrialQuery {
        let mut query = TrialQuery::new("NCT04043065")
            .with_title("A Leap to Understand Peptides")
            .with_author("Smith J")
            .with_intervention("LL-37");
        query.start_date = Some("2019-08-01".to_string());
        query
    }

    /// Run the ladder against synthetic hit counts per stage
    async fn run_synthetic(
        query: &TrialQuery,
        counts: &[(NarrowingStage, usize)],
        max_hits: usize,
    ) -> Option<LadderOutcome<usize>> {
        let counts: HashMap<_, _> = counts.iter().copied().collect();
        run_ladder(query, &NCBI_SYNTAX, max_hits, |stage, _term| {
            let total = counts.get(&stage).copied().unwrap_or(0);
            async move { Ok(SearchPage { total, items: total }) }
        })
        .await
        .unwrap()
    }

    #[test]
    fn test_transition_by_id() {
        assert_eq!(
            transition(NarrowingStage::ById, 0, 10),
            Transition::Advance(NarrowingStage::ByTitle)
        );
        assert_eq!(transition(NarrowingStage::ById, 3, 10), Transition::Accept);
        assert_eq!(transition(NarrowingStage::ById, 500, 10), Transition::Accept);
    }

    #[test]
    fn test_transition_narrowing() {
        assert_eq!(
            transition(NarrowingStage::ByTitle, 50, 10),
            Transition::Advance(NarrowingStage::ByTitleAuthor)
        );
        assert_eq!(
            transition(NarrowingStage::ByTitleAuthor, 50, 10),
            Transition::Advance(NarrowingStage::ByTitleAuthorDate)
        );
        assert_eq!(
            transition(NarrowingStage::ByTitleAuthorDate, 50, 10),
            Transition::Exhausted
        );
        assert_eq!(transition(NarrowingStage::ByTitle, 10, 10), Transition::Accept);
        assert_eq!(transition(NarrowingStage::ByTitle, 0, 10), Transition::Exhausted);
    }

    #[test]
    fn test_stage_terms() {
        let query = full_query();
        assert_eq!(
            stage_term(NarrowingStage::ById, &query, &NCBI_SYNTAX).unwrap(),
            "NCT04043065"
        );
        assert_eq!(
            stage_term(NarrowingStage::ByTitleAuthor, &query, &NCBI_SYNTAX).unwrap(),
            "A Leap to Understand Peptides[Title] AND Smith J[Author]"
        );
        assert_eq!(
            stage_term(NarrowingStage::ByTitleAuthorDate, &query, &NCBI_SYNTAX).unwrap(),
            "A Leap to Understand Peptides[Title] AND Smith J[Author] AND 2019[dp]"
        );
    }

    #[test]
    fn test_date_stage_falls_back_to_intervention() {
        let mut query = full_query();
        query.start_date = None;
        assert_eq!(
            stage_term(NarrowingStage::ByTitleAuthorDate, &query, &PLAIN_SYNTAX).unwrap(),
            "A Leap to Understand Peptides Smith J \"LL-37\""
        );
    }

    #[test]
    fn test_missing_inputs_skip_stage() {
        let query = TrialQuery::new("NCT1").with_title("Title only");
        assert!(stage_term(NarrowingStage::ByTitleAuthor, &query, &NCBI_SYNTAX).is_none());
        assert!(stage_term(NarrowingStage::ByTitleAuthorDate, &query, &NCBI_SYNTAX).is_none());
    }

    #[tokio::test]
    async fn test_id_hit_accepted_immediately() {
        let outcome = run_synthetic(&full_query(), &[(NarrowingStage::ById, 2)], 10)
            .await
            .unwrap();
        assert_eq!(outcome.stage, NarrowingStage::ById);
        assert_eq!(outcome.visited, vec![NarrowingStage::ById]);
        assert!(!outcome.over_broad);
    }

    #[tokio::test]
    async fn test_full_ladder_narrows_to_acceptable() {
        let outcome = run_synthetic(
            &full_query(),
            &[
                (NarrowingStage::ByTitle, 400),
                (NarrowingStage::ByTitleAuthor, 40),
                (NarrowingStage::ByTitleAuthorDate, 4),
            ],
            10,
        )
        .await
        .unwrap();

        assert_eq!(outcome.stage, NarrowingStage::ByTitleAuthorDate);
        assert_eq!(outcome.page.total, 4);
        assert_eq!(outcome.visited.len(), 4);
        assert!(!outcome.over_broad);
    }

    #[tokio::test]
    async fn test_exhausted_returns_smallest_flagged() {
        let outcome = run_synthetic(
            &full_query(),
            &[
                (NarrowingStage::ByTitle, 400),
                (NarrowingStage::ByTitleAuthor, 40),
                (NarrowingStage::ByTitleAuthorDate, 0),
            ],
            10,
        )
        .await
        .unwrap();

        assert_eq!(outcome.stage, NarrowingStage::ByTitleAuthor);
        assert_eq!(outcome.page.total, 40);
        assert!(outcome.over_broad);
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let outcome = run_synthetic(&full_query(), &[], 10).await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_title_only_query_stops_after_title() {
        let query = TrialQuery::new("NCT1").with_title("Broad title");
        let outcome = run_synthetic(&query, &[(NarrowingStage::ByTitle, 90)], 10)
            .await
            .unwrap();
        assert_eq!(outcome.stage, NarrowingStage::ByTitle);
        assert!(outcome.over_broad);
        assert_eq!(
            outcome.visited,
            vec![NarrowingStage::ById, NarrowingStage::ByTitle]
        );
    }

    #[tokio::test]
    async fn test_search_error_propagates() {
        let result: Result<Option<LadderOutcome<()>>, _> =
            run_ladder(&full_query(), &NCBI_SYNTAX, 10, |_, _| async {
                Err(SourceError::Network("down".into()))
            })
            .await;
        assert!(matches!(result, Err(SourceError::Network(_))));
    }
}
