//! Revision deduplication and currency broker
//!
//! The broker sits between successive extraction passes and any number of
//! subscribers. Passes must be fed newest dump first: under that ordering the
//! first revision ever encountered for a page is the page's current revision,
//! so a single "current candidate" is enough to find it.
//!
//! For every revision:
//! 1. A revision id seen before (same revision in an older dump) is dropped.
//! 2. On a page change, the held candidate of the previous page is flushed to
//!    the current-only subscribers. The new page becomes the candidate holder
//!    only if it has never been seen in an earlier (newer) pass.
//! 3. Within a page, a higher revision id replaces the candidate.
//! 4. The revision is forwarded to every subscriber that wants all revisions.
//!
//! The ordering precondition is not checked; feeding older dumps first makes
//! stale revisions look current.

use crate::config::DedupConfig;
use crate::processor::{ProcessingError, RevisionProcessor};
use crate::types::{PageId, Revision, RevisionId, SiteInfo};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Largest id count a seen set can represent (ids must fit in `u32`)
pub const MAX_DEDUP_CAPACITY: u64 = u32::MAX as u64 + 1;

/// Errors raised when constructing a broker
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid {set} capacity {requested}: must be between 1 and {max}")]
    Capacity {
        set: &'static str,
        requested: u64,
        max: u64,
    },
}

/// Validated capacity hints of the seen-page and seen-revision sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupCapacity {
    pages: u64,
    revisions: u64,
}

impl DedupCapacity {
    pub fn new(pages: u64, revisions: u64) -> Result<Self, BrokerError> {
        let check = |set: &'static str, requested: u64| {
            if requested == 0 || requested > MAX_DEDUP_CAPACITY {
                Err(BrokerError::Capacity {
                    set,
                    requested,
                    max: MAX_DEDUP_CAPACITY,
                })
            } else {
                Ok(requested)
            }
        };
        Ok(Self {
            pages: check("page", pages)?,
            revisions: check("revision", revisions)?,
        })
    }

    pub fn from_config(config: &DedupConfig) -> Result<Self, BrokerError> {
        Self::new(config.page_capacity, config.revision_capacity)
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn revisions(&self) -> u64 {
        self.revisions
    }
}

impl Default for DedupCapacity {
    fn default() -> Self {
        let config = DedupConfig::default();
        Self {
            pages: config.page_capacity,
            revisions: config.revision_capacity,
        }
    }
}

/// Monotonically growing set of numeric ids
struct SeenSet {
    name: &'static str,
    bits: RoaringBitmap,
    capacity: u64,
    capacity_warned: bool,
}

impl SeenSet {
    fn new(name: &'static str, capacity: u64) -> Self {
        Self {
            name,
            bits: RoaringBitmap::new(),
            capacity,
            capacity_warned: false,
        }
    }

    /// Insert an id; returns whether it was new
    fn insert(&mut self, id: u32) -> bool {
        if u64::from(id) >= self.capacity && !self.capacity_warned {
            warn!(
                set = self.name,
                id,
                capacity = self.capacity,
                "Id exceeds the configured capacity hint; raise it for accurate sizing"
            );
            self.capacity_warned = true;
        }
        self.bits.insert(id)
    }

    fn contains(&self, id: u32) -> bool {
        self.bits.contains(id)
    }

    fn len(&self) -> u64 {
        self.bits.len()
    }
}

/// Tracker of the most current revision of the page being scanned
#[derive(Debug)]
enum CandidateState {
    /// No page in progress (start of a pass)
    NoCandidate,
    /// Page in progress whose current revision was found in a newer pass
    Resolved { page_id: PageId },
    /// Page in progress, first seen in this pass
    Holding { page_id: PageId, revision: Box<Revision> },
}

impl CandidateState {
    fn page_id(&self) -> Option<PageId> {
        match self {
            CandidateState::NoCandidate => None,
            CandidateState::Resolved { page_id } | CandidateState::Holding { page_id, .. } => {
                Some(*page_id)
            }
        }
    }
}

/// Statistics collected over a broker's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    /// Revisions handed to the broker
    pub revisions_received: u64,
    /// Revisions dropped because an earlier pass already delivered them
    pub duplicates_discarded: u64,
    /// Revisions dropped because of unusable page or revision ids
    pub invalid_dropped: u64,
    /// Current revisions emitted (one per page)
    pub current_emitted: u64,
    /// Subscriber failures that were logged and skipped
    pub subscriber_errors: u64,
    /// Passes completed
    pub passes: u64,
}

struct Subscription<'a> {
    processor: Box<dyn RevisionProcessor + 'a>,
    content_model: Option<String>,
    only_current: bool,
}

impl Subscription<'_> {
    fn accepts(&self, content_model: &str) -> bool {
        self.content_model
            .as_deref()
            .map_or(true, |model| model == content_model)
    }
}

/// Fans deduplicated revisions out to subscribers
pub struct RevisionBroker<'a> {
    subscriptions: Vec<Subscription<'a>>,
    seen_pages: SeenSet,
    seen_revisions: SeenSet,
    state: CandidateState,
    stats: BrokerStats,
}

impl<'a> RevisionBroker<'a> {
    pub fn new(capacity: DedupCapacity) -> Self {
        Self {
            subscriptions: Vec::new(),
            seen_pages: SeenSet::new("page", capacity.pages()),
            seen_revisions: SeenSet::new("revision", capacity.revisions()),
            state: CandidateState::NoCandidate,
            stats: BrokerStats::default(),
        }
    }

    /// Register a subscriber
    ///
    /// `content_model` restricts delivery to revisions of that model;
    /// `only_current` restricts it to the current revision of each page.
    pub fn register_subscriber(
        &mut self,
        processor: impl RevisionProcessor + 'a,
        content_model: Option<&str>,
        only_current: bool,
    ) {
        self.register_boxed(Box::new(processor), content_model, only_current);
    }

    pub fn register_boxed(
        &mut self,
        processor: Box<dyn RevisionProcessor + 'a>,
        content_model: Option<&str>,
        only_current: bool,
    ) {
        self.subscriptions.push(Subscription {
            processor,
            content_model: content_model.map(str::to_string),
            only_current,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    /// Number of distinct pages seen so far
    pub fn pages_seen(&self) -> u64 {
        self.seen_pages.len()
    }

    /// Number of distinct revisions seen so far
    pub fn revisions_seen(&self) -> u64 {
        self.seen_revisions.len()
    }

    /// Whether a revision id was already delivered
    pub fn is_revision_seen(&self, revision_id: RevisionId) -> bool {
        u32::try_from(revision_id).map_or(false, |id| self.seen_revisions.contains(id))
    }

    /// Deliver the held candidate to current-only subscribers
    fn flush_candidate(&mut self) -> Result<(), ProcessingError> {
        let state = std::mem::replace(&mut self.state, CandidateState::NoCandidate);
        if let CandidateState::Holding { revision, .. } = state {
            self.stats.current_emitted += 1;
            for subscription in self
                .subscriptions
                .iter_mut()
                .filter(|s| s.only_current && s.accepts(&revision.content_model))
            {
                let result = subscription.processor.process_revision(&revision);
                Self::check(&mut self.stats, result, &revision)?;
            }
        }
        Ok(())
    }

    /// Propagate aborts, log and count every other subscriber failure
    fn check(
        stats: &mut BrokerStats,
        result: Result<(), ProcessingError>,
        revision: &Revision,
    ) -> Result<(), ProcessingError> {
        match result {
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                stats.subscriber_errors += 1;
                warn!(
                    page_id = revision.page_id,
                    revision_id = revision.revision_id,
                    error = %e,
                    "Subscriber failed to process revision"
                );
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Like `check`, for pass boundaries
    fn check_pass(
        stats: &mut BrokerStats,
        result: Result<(), ProcessingError>,
        stage: &str,
    ) -> Result<(), ProcessingError> {
        match result {
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                stats.subscriber_errors += 1;
                warn!(stage, error = %e, "Subscriber failed at pass boundary");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn valid_ids(revision: &Revision) -> Option<(u32, u32)> {
        if revision.page_id == 0 || revision.revision_id == 0 {
            return None;
        }
        let page = u32::try_from(revision.page_id).ok()?;
        let rev = u32::try_from(revision.revision_id).ok()?;
        Some((page, rev))
    }
}

impl RevisionProcessor for RevisionBroker<'_> {
    fn start_pass(&mut self, site: &SiteInfo) -> Result<(), ProcessingError> {
        for subscription in &mut self.subscriptions {
            let result = subscription.processor.start_pass(site);
            Self::check_pass(&mut self.stats, result, "start")?;
        }
        Ok(())
    }

    fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError> {
        self.stats.revisions_received += 1;

        let Some((page_id, revision_id)) = Self::valid_ids(revision) else {
            self.stats.invalid_dropped += 1;
            warn!(
                page_id = revision.page_id,
                revision_id = revision.revision_id,
                title = %revision.title,
                "Dropping revision with invalid id"
            );
            return Ok(());
        };

        if !self.seen_revisions.insert(revision_id) {
            self.stats.duplicates_discarded += 1;
            return Ok(());
        }

        if self.state.page_id() != Some(revision.page_id) {
            self.flush_candidate()?;
            self.state = if self.seen_pages.insert(page_id) {
                CandidateState::Holding {
                    page_id: revision.page_id,
                    revision: Box::new(revision.clone()),
                }
            } else {
                CandidateState::Resolved {
                    page_id: revision.page_id,
                }
            };
        } else if let CandidateState::Holding { revision: held, .. } = &mut self.state {
            if revision.revision_id > held.revision_id {
                (**held).clone_from(revision);
            }
        }

        for subscription in self
            .subscriptions
            .iter_mut()
            .filter(|s| !s.only_current && s.accepts(&revision.content_model))
        {
            let result = subscription.processor.process_revision(revision);
            Self::check(&mut self.stats, result, revision)?;
        }
        Ok(())
    }

    fn finish_pass(&mut self) -> Result<(), ProcessingError> {
        self.flush_candidate()?;
        self.stats.passes += 1;
        debug!(
            pages = self.seen_pages.len(),
            revisions = self.seen_revisions.len(),
            "Finished pass"
        );
        for subscription in &mut self.subscriptions {
            let result = subscription.processor.finish_pass();
            Self::check_pass(&mut self.stats, result, "finish")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::content_model;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records (page, revision) pairs it receives
    #[derive(Clone, Default)]
    struct Recorder {
        received: Rc<RefCell<Vec<(u64, u64)>>>,
        passes: Rc<RefCell<u32>>,
    }

    impl Recorder {
        fn revisions(&self) -> Vec<u64> {
            self.received.borrow().iter().map(|(_, r)| *r).collect()
        }
    }

    impl RevisionProcessor for Recorder {
        fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError> {
            self.received
                .borrow_mut()
                .push((revision.page_id, revision.revision_id));
            Ok(())
        }

        fn finish_pass(&mut self) -> Result<(), ProcessingError> {
            *self.passes.borrow_mut() += 1;
            Ok(())
        }
    }

    fn rev(page_id: u64, revision_id: u64) -> Revision {
        Revision {
            page_id,
            revision_id,
            title: format!("Q{}", page_id),
            content_model: content_model::WIKIBASE_ITEM.to_string(),
            ..Revision::default()
        }
    }

    fn rev_with_model(page_id: u64, revision_id: u64, model: &str) -> Revision {
        Revision {
            content_model: model.to_string(),
            ..rev(page_id, revision_id)
        }
    }

    fn feed(broker: &mut RevisionBroker<'_>, revisions: &[Revision]) {
        broker.start_pass(&SiteInfo::default()).unwrap();
        for r in revisions {
            broker.process_revision(r).unwrap();
        }
        broker.finish_pass().unwrap();
    }

    fn broker_with(current: &Recorder, all: &Recorder) -> RevisionBroker<'static> {
        let mut broker = RevisionBroker::new(DedupCapacity::new(1000, 1000).unwrap());
        broker.register_subscriber(current.clone(), None, true);
        broker.register_subscriber(all.clone(), None, false);
        broker
    }

    #[test]
    fn test_newest_pass_first_yields_newest_current() {
        let current = Recorder::default();
        let all = Recorder::default();
        let mut broker = broker_with(&current, &all);

        // 2024-02-01 dump, then 2024-01-01 dump
        feed(&mut broker, &[rev(1, 10)]);
        feed(&mut broker, &[rev(1, 7), rev(1, 9)]);

        assert_eq!(current.revisions(), vec![10]);
        assert_eq!(all.revisions(), vec![10, 7, 9]);
        assert_eq!(broker.stats().current_emitted, 1);
        assert_eq!(*all.passes.borrow(), 2);
    }

    #[test]
    fn test_oldest_pass_first_demonstrates_precondition() {
        let current = Recorder::default();
        let all = Recorder::default();
        let mut broker = broker_with(&current, &all);

        feed(&mut broker, &[rev(1, 7), rev(1, 9)]);
        feed(&mut broker, &[rev(1, 10)]);

        assert_eq!(current.revisions(), vec![9]);
    }

    #[test]
    fn test_replaying_a_pass_is_idempotent() {
        let current = Recorder::default();
        let all = Recorder::default();
        let mut broker = broker_with(&current, &all);
        let pass = [rev(1, 5), rev(1, 6), rev(2, 8)];

        feed(&mut broker, &pass);
        let after_first = all.revisions();
        feed(&mut broker, &pass);

        assert_eq!(all.revisions(), after_first);
        assert_eq!(current.revisions(), vec![6, 8]);
        assert_eq!(broker.stats().duplicates_discarded, 3);
    }

    #[test]
    fn test_unordered_revisions_within_page() {
        let current = Recorder::default();
        let all = Recorder::default();
        let mut broker = broker_with(&current, &all);

        feed(&mut broker, &[rev(3, 12), rev(3, 15), rev(3, 11), rev(4, 2)]);
        assert_eq!(current.revisions(), vec![15, 2]);
    }

    #[test]
    fn test_last_page_flushed_by_finish_pass() {
        let current = Recorder::default();
        let all = Recorder::default();
        let mut broker = broker_with(&current, &all);

        broker.start_pass(&SiteInfo::default()).unwrap();
        broker.process_revision(&rev(9, 90)).unwrap();
        assert!(current.revisions().is_empty());
        broker.finish_pass().unwrap();
        assert_eq!(current.revisions(), vec![90]);
    }

    #[test]
    fn test_content_model_and_currency_filters_compose() {
        let items_current = Recorder::default();
        let properties_all = Recorder::default();
        let everything = Recorder::default();
        let mut broker = RevisionBroker::new(DedupCapacity::new(1000, 1000).unwrap());
        broker.register_subscriber(items_current.clone(), Some(content_model::WIKIBASE_ITEM), true);
        broker.register_subscriber(
            properties_all.clone(),
            Some(content_model::WIKIBASE_PROPERTY),
            false,
        );
        broker.register_subscriber(everything.clone(), None, false);

        feed(
            &mut broker,
            &[
                rev_with_model(1, 11, content_model::WIKIBASE_ITEM),
                rev_with_model(1, 12, content_model::WIKIBASE_ITEM),
                rev_with_model(2, 21, content_model::WIKIBASE_PROPERTY),
                rev_with_model(2, 22, content_model::WIKIBASE_PROPERTY),
                rev_with_model(3, 31, content_model::WIKITEXT),
            ],
        );

        assert_eq!(items_current.revisions(), vec![12]);
        assert_eq!(properties_all.revisions(), vec![21, 22]);
        assert_eq!(everything.revisions(), vec![11, 12, 21, 22, 31]);
    }

    #[test]
    fn test_page_resolved_by_newer_pass_emits_no_current() {
        let current = Recorder::default();
        let all = Recorder::default();
        let mut broker = broker_with(&current, &all);

        feed(&mut broker, &[rev(1, 20), rev(2, 30)]);
        feed(&mut broker, &[rev(1, 15), rev(1, 18), rev(3, 5)]);

        assert_eq!(current.revisions(), vec![20, 30, 5]);
        assert_eq!(all.revisions(), vec![20, 30, 15, 18, 5]);
    }

    #[test]
    fn test_invalid_ids_are_dropped() {
        let current = Recorder::default();
        let all = Recorder::default();
        let mut broker = broker_with(&current, &all);

        feed(
            &mut broker,
            &[rev(0, 5), rev(4, 0), rev(u64::from(u32::MAX) + 7, 3), rev(4, 6)],
        );

        assert_eq!(all.revisions(), vec![6]);
        assert_eq!(broker.stats().invalid_dropped, 3);
        assert!(broker.is_revision_seen(6));
        assert!(!broker.is_revision_seen(5));
    }

    #[test]
    fn test_failing_subscriber_does_not_starve_others() {
        struct Failing;
        impl RevisionProcessor for Failing {
            fn process_revision(&mut self, _: &Revision) -> Result<(), ProcessingError> {
                Err(ProcessingError::Failed("boom".to_string()))
            }
        }

        let all = Recorder::default();
        let mut broker = RevisionBroker::new(DedupCapacity::new(100, 100).unwrap());
        broker.register_subscriber(Failing, None, false);
        broker.register_subscriber(all.clone(), None, false);

        feed(&mut broker, &[rev(1, 1), rev(2, 2)]);
        assert_eq!(all.revisions(), vec![1, 2]);
        assert_eq!(broker.stats().subscriber_errors, 2);
    }

    #[test]
    fn test_failing_pass_boundary_does_not_starve_others() {
        struct FailingBoundaries;
        impl RevisionProcessor for FailingBoundaries {
            fn start_pass(&mut self, _: &SiteInfo) -> Result<(), ProcessingError> {
                Err(ProcessingError::Failed("cannot start".to_string()))
            }

            fn process_revision(&mut self, _: &Revision) -> Result<(), ProcessingError> {
                Ok(())
            }

            fn finish_pass(&mut self) -> Result<(), ProcessingError> {
                Err(ProcessingError::Failed("cannot finish".to_string()))
            }
        }

        let current = Recorder::default();
        let mut broker = RevisionBroker::new(DedupCapacity::new(100, 100).unwrap());
        broker.register_subscriber(FailingBoundaries, None, false);
        broker.register_subscriber(current.clone(), None, true);

        feed(&mut broker, &[rev(1, 1)]);
        assert_eq!(current.revisions(), vec![1]);
        assert_eq!(*current.passes.borrow(), 1);
        assert_eq!(broker.stats().subscriber_errors, 2);
    }

    #[test]
    fn test_abort_at_finish_pass_propagates() {
        struct AbortOnFinish;
        impl RevisionProcessor for AbortOnFinish {
            fn process_revision(&mut self, _: &Revision) -> Result<(), ProcessingError> {
                Ok(())
            }

            fn finish_pass(&mut self) -> Result<(), ProcessingError> {
                Err(ProcessingError::Aborted("deadline".to_string()))
            }
        }

        let mut broker = RevisionBroker::new(DedupCapacity::new(100, 100).unwrap());
        broker.register_subscriber(AbortOnFinish, None, false);
        broker.start_pass(&SiteInfo::default()).unwrap();
        assert!(broker.finish_pass().unwrap_err().is_abort());
    }

    #[test]
    fn test_abort_propagates() {
        struct Aborting;
        impl RevisionProcessor for Aborting {
            fn process_revision(&mut self, _: &Revision) -> Result<(), ProcessingError> {
                Err(ProcessingError::Aborted("deadline".to_string()))
            }
        }

        let mut broker = RevisionBroker::new(DedupCapacity::new(100, 100).unwrap());
        broker.register_subscriber(Aborting, None, false);
        let err = broker.process_revision(&rev(1, 1)).unwrap_err();
        assert!(err.is_abort());
    }

    #[test]
    fn test_capacity_validation() {
        assert!(DedupCapacity::new(0, 10).is_err());
        assert!(DedupCapacity::new(10, MAX_DEDUP_CAPACITY + 1).is_err());
        let capacity = DedupCapacity::new(MAX_DEDUP_CAPACITY, 1).unwrap();
        assert_eq!(capacity.pages(), MAX_DEDUP_CAPACITY);
    }

    #[test]
    fn test_ids_beyond_capacity_hint_are_still_tracked() {
        let all = Recorder::default();
        let mut broker = RevisionBroker::new(DedupCapacity::new(10, 10).unwrap());
        broker.register_subscriber(all.clone(), None, false);

        feed(&mut broker, &[rev(50, 500)]);
        feed(&mut broker, &[rev(50, 500)]);
        assert_eq!(all.revisions(), vec![500]);
        assert_eq!(broker.pages_seen(), 1);
    }
}
