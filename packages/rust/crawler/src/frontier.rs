//! Per-job crawl frontier: what is queued, what has been visited, and what
//! is in scope.

use std::collections::{HashSet, VecDeque};

use tracing::trace;
use url::Url;

use crate::normalize::percent_decode;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Decides whether a discovered URL belongs to the crawl.
///
/// A URL is in scope when its percent-decoded string starts with the decoded
/// base URL and it has the same scheme, host and port as the base. The origin check rejects
/// look-alike hosts such as `https://example.com.evil.net` for a base of
/// `https://example.com`.
#[derive(Debug, Clone)]
pub struct Scope {
    prefix: String,
    origin: Option<url::Origin>,
}

impl Scope {
    pub fn new(base_url: &str) -> Self {
        Self {
            prefix: percent_decode(base_url).into_owned(),
            origin: Url::parse(base_url).ok().map(|u| u.origin()),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        if !percent_decode(url).starts_with(&self.prefix) {
            return false;
        }
        match &self.origin {
            Some(origin) => Url::parse(url).is_ok_and(|u| &u.origin() == origin),
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// Pending and visited URL sets for one crawl job, bounded by a page budget.
///
/// A URL is never both pending and visited, and is handed out by
/// [`Frontier::next`] at most once.
#[derive(Debug)]
pub struct Frontier {
    scope: Scope,
    limit: usize,
    pending: VecDeque<String>,
    queued: HashSet<String>,
    visited: HashSet<String>,
}

impl Frontier {
    /// Start a frontier with `seed` pending. The seed itself is not scope-checked.
    pub fn new(seed: &str, limit: usize) -> Self {
        Self {
            scope: Scope::new(seed),
            limit,
            pending: VecDeque::from([seed.to_string()]),
            queued: HashSet::from([seed.to_string()]),
            visited: HashSet::new(),
        }
    }

    /// More URLs are pending and the budget is not spent.
    pub fn has_work(&self) -> bool {
        !self.pending.is_empty() && self.visited.len() < self.limit
    }

    /// Take one pending URL that has not been visited.
    pub fn next(&mut self) -> Option<String> {
        while let Some(url) = self.pending.pop_front() {
            self.queued.remove(&url);
            if !self.visited.contains(&url) {
                return Some(url);
            }
        }
        None
    }

    /// Record that `url` was fetched or attempted. Call this on failures too.
    pub fn mark_visited(&mut self, url: &str) {
        if self.queued.remove(url) {
            self.pending.retain(|u| u != url);
        }
        self.visited.insert(url.to_string());
    }

    /// Queue `url` if it is in scope, not visited and not already queued.
    pub fn offer(&mut self, url: &str) -> bool {
        if self.visited.contains(url) || self.queued.contains(url) {
            return false;
        }
        if !self.scope.contains(url) {
            trace!(%url, "out of scope");
            return false;
        }
        self.queued.insert(url.to_string());
        self.pending.push_back(url.to_string());
        true
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com";

    #[test]
    fn scope_requires_prefix_and_origin() {
        let scope = Scope::new(BASE);
        assert!(scope.contains("https://example.com"));
        assert!(scope.contains("https://example.com/docs/intro"));
        assert!(!scope.contains("http://example.com/docs"));
        assert!(!scope.contains("https://other.com/https://example.com"));
        assert!(!scope.contains("https://example.com.evil.net/page"));
        assert!(!scope.contains("https://example.com:8443/page"));
    }

    #[test]
    fn scope_with_path_base() {
        let scope = Scope::new("https://example.com/docs");
        assert!(scope.contains("https://example.com/docs/guide"));
        assert!(!scope.contains("https://example.com/blog"));
    }

    #[test]
    fn scope_compares_decoded_forms() {
        let scope = Scope::new("https://example.com/caf%C3%A9/");
        assert!(scope.contains("https://example.com/café/x"));
        assert!(scope.contains("https://example.com/caf%C3%A9/y"));
        assert!(!scope.contains("https://example.com/cafe/x"));

        let scope = Scope::new("https://example.com/café/");
        assert!(scope.contains("https://example.com/caf%C3%A9/z"));
    }

    #[test]
    fn seed_is_first_and_only_once() {
        let mut frontier = Frontier::new(BASE, 10);
        assert!(frontier.has_work());
        assert_eq!(frontier.next().as_deref(), Some(BASE));
        frontier.mark_visited(BASE);
        assert!(!frontier.offer(BASE));
        assert_eq!(frontier.next(), None);
        assert!(!frontier.has_work());
    }

    #[test]
    fn offer_rejects_out_of_scope_and_duplicates() {
        let mut frontier = Frontier::new(BASE, 10);
        assert!(frontier.offer("https://example.com/a"));
        assert!(!frontier.offer("https://example.com/a"));
        assert!(!frontier.offer("https://elsewhere.org/a"));
        assert_eq!(frontier.pending_count(), 2);
    }

    #[test]
    fn budget_stops_the_loop() {
        let mut frontier = Frontier::new(BASE, 2);
        for i in 0..5 {
            frontier.offer(&format!("https://example.com/p{i}"));
        }

        let mut visited = Vec::new();
        while frontier.has_work() {
            let url = frontier.next().unwrap();
            frontier.mark_visited(&url);
            visited.push(url);
        }
        assert_eq!(visited.len(), 2);
        assert_eq!(frontier.visited_count(), 2);
        assert!(frontier.pending_count() > 0);
    }

    #[test]
    fn zero_limit_has_no_work() {
        let frontier = Frontier::new(BASE, 0);
        assert!(!frontier.has_work());
    }

    #[test]
    fn no_url_visited_twice_when_offered_by_many_pages() {
        let mut frontier = Frontier::new(BASE, 100);
        let mut seen = HashSet::new();
        while frontier.has_work() {
            let url = frontier.next().unwrap();
            assert!(seen.insert(url.clone()), "{url} handed out twice");
            frontier.mark_visited(&url);
            // Every page links to the same three pages and back to the seed.
            for link in ["/x", "/y", "/z", ""] {
                frontier.offer(&format!("{BASE}{link}"));
            }
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn marking_a_pending_url_removes_it_from_pending() {
        let mut frontier = Frontier::new(BASE, 10);
        frontier.offer("https://example.com/a");
        frontier.mark_visited("https://example.com/a");
        assert_eq!(frontier.visited_count(), 1);
        assert_eq!(frontier.pending_count(), 1);
        assert!(!frontier.offer("https://example.com/a"));
    }
}
