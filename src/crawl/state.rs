//! The frontier's state table.
//!
//! Everything the crawl needs to resume lives in [`FrontierState`], which is
//! plain data: it serializes into checkpoints and is owned by one
//! [`Frontier`](super::Frontier) at a time.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::util::{host_of_origin, host_within};

/// Traversal state of one website, keyed by origin. Websites absent from the
/// table are unseen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DomainState {
    /// Linked from `count` distinct stored items, not yet promoted.
    Mentioned { count: u32 },
    /// Waiting for feed resolution.
    Promoted { depth: u32 },
    /// Feed confirmed and queued for crawling.
    Crawling { depth: u32, feed_url: String },
    /// Done: every page fetched, never crawlable, or past the depth limit.
    Exhausted { depth: u32 },
}

impl DomainState {
    /// True once the website left the mention-counting phase.
    pub fn is_scheduled(&self) -> bool {
        !matches!(self, DomainState::Mentioned { .. })
    }
}

/// A website waiting for feed resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub domain: String,
    /// Input to the feed templates: the origin, or the seed URL for the seed.
    pub query: String,
    pub depth: u32,
}

/// A feed being crawled and where to pick it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCursor {
    pub domain: String,
    pub feed_url: String,
    pub depth: u32,
    /// Continuation token of the next page; `None` before the first page.
    pub continuation: Option<String>,
    pub pages: u32,
}

/// Policy fixed for the lifetime of one logical crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// 0 = unlimited.
    pub depth_limit: u32,
    pub expansion_threshold: u32,
}

impl CrawlSettings {
    pub fn crawls_depth(&self, depth: u32) -> bool {
        self.depth_limit == 0 || depth <= self.depth_limit
    }
}

/// Stored-item report from the write coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub item_id: i64,
    pub is_new: bool,
    /// Depth of the feed the item came from.
    pub depth: u32,
    /// Distinct origins the item links to.
    pub domains: Vec<String>,
}

/// Which websites may be promoted.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    /// When set, only hosts equal to or under one of these domains.
    pub follow: Option<Vec<String>>,
    /// Exact hosts never promoted.
    pub ignore: Vec<String>,
}

impl DomainFilter {
    pub fn allows(&self, origin: &str) -> bool {
        let Some(host) = host_of_origin(origin) else {
            return false;
        };
        if self.ignore.iter().any(|h| h.eq_ignore_ascii_case(&host)) {
            return false;
        }
        match &self.follow {
            Some(domains) => domains.iter().any(|d| host_within(&host, d)),
            None => true,
        }
    }
}

/// A set of item ids kept as inclusive runs.
///
/// The store hands out ids in increasing order, so the ids of one crawl
/// collapse into a handful of runs and snapshots stay small however many
/// items were counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(i64, i64)>", into = "Vec<(i64, i64)>")]
pub struct IdRanges {
    /// start -> end, inclusive, non-adjacent.
    runs: BTreeMap<i64, i64>,
}

impl IdRanges {
    pub fn contains(&self, id: i64) -> bool {
        self.runs.range(..=id).next_back().is_some_and(|(_, &end)| id <= end)
    }

    /// Add `id`; false if it was already present.
    pub fn insert(&mut self, id: i64) -> bool {
        if self.contains(id) {
            return false;
        }
        let (mut start, mut end) = (id, id);
        if let Some((&s, &e)) = self.runs.range(..id).next_back() {
            if e.checked_add(1) == Some(id) {
                start = s;
            }
        }
        if let Some(e) = id.checked_add(1).and_then(|next| self.runs.remove(&next)) {
            end = e;
        }
        self.runs.insert(start, end);
        true
    }

    /// Number of ids in the set.
    pub fn len(&self) -> u64 {
        self.runs.iter().map(|(s, e)| e.abs_diff(*s) + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of stored runs.
    pub fn runs(&self) -> usize {
        self.runs.len()
    }
}

impl From<Vec<(i64, i64)>> for IdRanges {
    fn from(mut runs: Vec<(i64, i64)>) -> Self {
        runs.sort_unstable();
        let mut merged = BTreeMap::new();
        let mut last: Option<(i64, i64)> = None;
        for (start, end) in runs.into_iter().filter(|(s, e)| s <= e) {
            match &mut last {
                Some((_, last_end)) if start <= last_end.saturating_add(1) => *last_end = (*last_end).max(end),
                _ => {
                    if let Some((s, e)) = last.replace((start, end)) {
                        merged.insert(s, e);
                    }
                }
            }
        }
        if let Some((s, e)) = last {
            merged.insert(s, e);
        }
        Self { runs: merged }
    }
}

impl From<IdRanges> for Vec<(i64, i64)> {
    fn from(set: IdRanges) -> Self {
        set.runs.into_iter().collect()
    }
}

/// Resumable frontier state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierState {
    pub seed: String,
    pub settings: CrawlSettings,
    pub domains: BTreeMap<String, DomainState>,
    /// Websites waiting for resolution, in discovery order.
    pub promoted: VecDeque<Promotion>,
    /// Feeds being crawled, in discovery order.
    pub crawling: VecDeque<FeedCursor>,
    /// Every feed URL scheduled in this crawl; no feed is crawled twice.
    pub feeds: BTreeSet<String>,
    /// Stored items whose links were already counted.
    pub accounted: IdRanges,
}

/// Progress counters derived from the state table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrontierProgress {
    pub discovered: usize,
    pub scheduled: usize,
    pub crawling: usize,
    pub finished: usize,
    pub explored: f64,
}

impl FrontierState {
    /// Fresh state with the seed's website promoted at depth 0.
    pub fn new(seed: &str, seed_domain: &str, settings: CrawlSettings) -> Self {
        let mut domains = BTreeMap::new();
        domains.insert(seed_domain.to_string(), DomainState::Promoted { depth: 0 });
        let promoted = VecDeque::from([Promotion {
            domain: seed_domain.to_string(),
            query: seed.to_string(),
            depth: 0,
        }]);
        Self {
            seed: seed.to_string(),
            settings,
            domains,
            promoted,
            crawling: VecDeque::new(),
            feeds: BTreeSet::new(),
            accounted: IdRanges::default(),
        }
    }

    /// Shallowest depth with pending work, if any.
    pub fn next_depth(&self) -> Option<u32> {
        self.promoted
            .iter()
            .map(|p| p.depth)
            .chain(self.crawling.iter().map(|c| c.depth))
            .min()
    }

    pub fn is_complete(&self) -> bool {
        self.promoted.is_empty() && self.crawling.is_empty()
    }

    /// Count the links of a stored item.
    ///
    /// Each website gains at most one mention per item id, so duplicate
    /// deliveries and re-runs over the same store do not inflate counts.
    /// Links to websites that already have a feed are ignored. Returns the
    /// promotions this report triggered.
    pub fn account(&mut self, outcome: &ItemOutcome, filter: &DomainFilter) -> Vec<Promotion> {
        if !self.accounted.insert(outcome.item_id) {
            return Vec::new();
        }

        let threshold = self.settings.expansion_threshold.max(1);
        let mut promotions = Vec::new();

        for domain in &outcome.domains {
            let entry = self
                .domains
                .entry(domain.clone())
                .or_insert(DomainState::Mentioned { count: 0 });
            let DomainState::Mentioned { count } = &mut *entry else {
                continue;
            };
            *count += 1;

            if *count >= threshold && filter.allows(domain) {
                let depth = outcome.depth + 1;
                *entry = DomainState::Promoted { depth };
                let promotion = Promotion {
                    domain: domain.clone(),
                    query: domain.clone(),
                    depth,
                };
                tracing::debug!(domain = %domain, depth, "Promoting website");
                self.promoted.push_back(promotion.clone());
                promotions.push(promotion);
            }
        }
        promotions
    }

    pub fn progress(&self) -> FrontierProgress {
        let discovered = self.domains.len();
        let scheduled = self.domains.values().filter(|s| s.is_scheduled()).count();
        let crawling = self
            .domains
            .values()
            .filter(|s| matches!(s, DomainState::Crawling { .. }))
            .count();
        let finished = self
            .domains
            .values()
            .filter(|s| matches!(s, DomainState::Exhausted { .. }))
            .count();
        let explored = if scheduled == 0 {
            0.0
        } else {
            finished as f64 / scheduled as f64
        };
        FrontierProgress {
            discovered,
            scheduled,
            crawling,
            finished,
            explored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state(threshold: u32) -> FrontierState {
        FrontierState::new(
            "https://seed.example/feed",
            "https://seed.example",
            CrawlSettings {
                depth_limit: 1,
                expansion_threshold: threshold,
            },
        )
    }

    fn outcome(item_id: i64, domains: &[&str]) -> ItemOutcome {
        ItemOutcome {
            item_id,
            is_new: true,
            depth: 0,
            domains: domains.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_new_state_promotes_seed() {
        let s = state(1);
        assert_eq!(s.next_depth(), Some(0));
        assert_eq!(s.domains["https://seed.example"], DomainState::Promoted { depth: 0 });
        assert_eq!(s.promoted[0].query, "https://seed.example/feed");
    }

    #[test]
    fn test_threshold_boundary() {
        let mut s = state(3);
        let filter = DomainFilter::default();

        assert!(s.account(&outcome(1, &["https://a.example"]), &filter).is_empty());
        assert!(s.account(&outcome(2, &["https://a.example"]), &filter).is_empty());
        assert_eq!(s.domains["https://a.example"], DomainState::Mentioned { count: 2 });

        let promoted = s.account(&outcome(3, &["https://a.example"]), &filter);
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].depth, 1);
        assert_eq!(s.domains["https://a.example"], DomainState::Promoted { depth: 1 });

        // Further mentions never promote again.
        assert!(s.account(&outcome(4, &["https://a.example"]), &filter).is_empty());
        assert_eq!(s.promoted.iter().filter(|p| p.domain == "https://a.example").count(), 1);
    }

    #[test]
    fn test_duplicate_item_counted_once() {
        let mut s = state(2);
        let filter = DomainFilter::default();
        s.account(&outcome(7, &["https://a.example"]), &filter);
        s.account(&outcome(7, &["https://a.example"]), &filter);
        assert_eq!(s.domains["https://a.example"], DomainState::Mentioned { count: 1 });
    }

    #[test]
    fn test_known_feed_domains_ignored() {
        let mut s = state(1);
        let filter = DomainFilter::default();
        s.account(&outcome(1, &["https://seed.example"]), &filter);
        assert_eq!(s.domains["https://seed.example"], DomainState::Promoted { depth: 0 });
        assert_eq!(s.promoted.len(), 1);
    }

    #[test]
    fn test_filtered_domains_counted_not_promoted() {
        let mut s = state(1);
        let filter = DomainFilter {
            follow: Some(vec!["example.org".into()]),
            ignore: vec!["ads.example.org".into()],
        };
        let promoted = s.account(
            &outcome(1, &["https://blog.example.org", "https://ads.example.org", "https://other.example"]),
            &filter,
        );
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].domain, "https://blog.example.org");
        assert_eq!(s.domains["https://ads.example.org"], DomainState::Mentioned { count: 1 });
        assert_eq!(s.domains["https://other.example"], DomainState::Mentioned { count: 1 });
    }

    #[test]
    fn test_progress_ratio() {
        let mut s = state(1);
        s.domains.insert("https://a.example".into(), DomainState::Exhausted { depth: 1 });
        s.domains.insert("https://b.example".into(), DomainState::Mentioned { count: 1 });
        let p = s.progress();
        assert_eq!(p.discovered, 3);
        assert_eq!(p.scheduled, 2);
        assert_eq!(p.finished, 1);
        assert!((p.explored - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_state_serde_tagging() {
        let json = serde_json::to_value(DomainState::Crawling {
            depth: 2,
            feed_url: "https://a.example/feed".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "crawling");
        assert_eq!(json["depth"], 2);
    }

    #[test]
    fn test_crawls_depth() {
        let limited = CrawlSettings { depth_limit: 1, expansion_threshold: 1 };
        assert!(limited.crawls_depth(1));
        assert!(!limited.crawls_depth(2));
        let unlimited = CrawlSettings { depth_limit: 0, expansion_threshold: 1 };
        assert!(unlimited.crawls_depth(40));
    }

    #[test]
    fn test_id_ranges_merge_neighbours() {
        let mut ids = IdRanges::default();
        for id in [5, 7, 6, 1, 2, 9] {
            assert!(ids.insert(id));
        }
        assert!(!ids.insert(6));
        assert_eq!(ids.len(), 6);
        assert_eq!(ids.runs(), 3);
        assert!(ids.contains(7));
        assert!(!ids.contains(3));
        assert!(!ids.contains(8));
        assert_eq!(Vec::from(ids), vec![(1, 2), (5, 7), (9, 9)]);
    }

    #[test]
    fn test_accounted_ids_serialize_as_runs() {
        let mut s = state(1);
        let filter = DomainFilter::default();
        for id in 1..=5000 {
            s.account(&outcome(id, &[]), &filter);
        }
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["accounted"], serde_json::json!([[1, 5000]]));
        let back: FrontierState = serde_json::from_value(json).unwrap();
        assert_eq!(back.accounted.len(), 5000);
        assert_eq!(back, s);
    }

    proptest::proptest! {
        #[test]
        fn prop_id_ranges_behave_like_a_set(ids in proptest::collection::vec(-20i64..20, 0..80)) {
            let mut ranges = IdRanges::default();
            let mut model = BTreeSet::new();
            for id in &ids {
                proptest::prop_assert_eq!(ranges.insert(*id), model.insert(*id));
            }
            proptest::prop_assert_eq!(ranges.len(), model.len() as u64);
            for id in -22i64..22 {
                proptest::prop_assert_eq!(ranges.contains(id), model.contains(&id));
            }
        }

        /// Mention counts equal the number of distinct items linking to a
        /// website, however often each item is redelivered.
        #[test]
        fn prop_counts_ignore_redelivery(
            reports in proptest::collection::vec((0i64..12, proptest::collection::btree_set(0usize..4, 0..4)), 0..60)
        ) {
            let domains = ["https://a.example", "https://b.example", "https://c.example", "https://d.example"];
            let mut s = state(u32::MAX);
            let filter = DomainFilter::default();
            let mut expected: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
            let mut first_seen: BTreeMap<i64, Vec<usize>> = BTreeMap::new();

            for (item_id, picks) in &reports {
                // A redelivered item carries the links of its first delivery.
                let picks = first_seen.entry(*item_id).or_insert_with(|| picks.iter().copied().collect()).clone();
                let linked: Vec<&str> = picks.iter().map(|i| domains[*i]).collect();
                for d in &linked {
                    expected.entry(*d).or_default().insert(*item_id);
                }
                s.account(&outcome(*item_id, &linked), &filter);
            }

            for (domain, items) in expected {
                proptest::prop_assert_eq!(
                    &s.domains[domain],
                    &DomainState::Mentioned { count: items.len() as u32 }
                );
            }
        }
    }
}
