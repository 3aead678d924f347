use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{FeedStatus, MediaPolicy, MediaSessionController, MediaTransport};
use crate::scheduler::Scheduler;
use crate::telemetry::{TelemetrySink, TracingTelemetry};

/// One controller per feed id, all sharing a scheduler and telemetry sink.
pub struct FeedRegistry<Tr, Sch, T = TracingTelemetry> {
    make_transport: Box<dyn Fn(&str) -> Tr + Send + Sync>,
    scheduler: Sch,
    telemetry: T,
    policy: MediaPolicy,
    feeds: Mutex<BTreeMap<String, MediaSessionController<Tr, Sch, T>>>,
}

impl<Tr, Sch, T> FeedRegistry<Tr, Sch, T>
where
    Tr: MediaTransport,
    Sch: Scheduler + Clone,
    T: TelemetrySink + Clone,
{
    pub fn new(
        make_transport: impl Fn(&str) -> Tr + Send + Sync + 'static,
        scheduler: Sch,
        telemetry: T,
        policy: MediaPolicy,
    ) -> Self {
        Self {
            make_transport: Box::new(make_transport),
            scheduler,
            telemetry,
            policy,
            feeds: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start `feed_id` on `url`, or switch its source if it already exists
    /// with a different one.
    pub fn open(&self, feed_id: &str, url: &str) -> MediaSessionController<Tr, Sch, T> {
        let (controller, created) = {
            let mut feeds = self.feeds();
            match feeds.get(feed_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let controller = MediaSessionController::new(
                        feed_id,
                        (self.make_transport)(feed_id),
                        self.scheduler.clone(),
                        self.telemetry.clone(),
                        self.policy,
                    );
                    feeds.insert(feed_id.to_string(), controller.clone());
                    (controller, true)
                }
            }
        };

        let session = controller.session();
        if created || session.source_url.as_deref() != Some(url) || !session.state.has_session() {
            controller.set_source(url);
        }
        controller
    }

    pub fn get(&self, feed_id: &str) -> Option<MediaSessionController<Tr, Sch, T>> {
        self.feeds().get(feed_id).cloned()
    }

    /// Tear down and forget a feed.
    pub fn close(&self, feed_id: &str) -> bool {
        let removed = self.feeds().remove(feed_id);
        removed.is_some_and(|controller| {
            controller.teardown();
            true
        })
    }

    pub fn statuses(&self) -> Vec<(String, FeedStatus)> {
        self.feeds()
            .iter()
            .map(|(feed_id, controller)| (feed_id.clone(), controller.status()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.feeds().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tear down every feed, e.g. when the dashboard view closes.
    pub fn close_all(&self) {
        let feeds = std::mem::take(&mut *self.feeds());
        for controller in feeds.into_values() {
            controller.teardown();
        }
    }

    fn feeds(&self) -> MutexGuard<'_, BTreeMap<String, MediaSessionController<Tr, Sch, T>>> {
        self.feeds
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
