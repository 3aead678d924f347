use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use super::{
    FeedStatus, MediaFault, MediaPolicy, MediaSession, MediaState, MediaTransport, SessionEpoch,
};
use crate::fault::FaultClass;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetry};

/// Transport calls decided under the state lock and run after it is released,
/// so a transport may call back into the controller synchronously.
#[derive(Debug)]
enum Effect {
    Load { url: String, epoch: SessionEpoch },
    ResumeLoading(SessionEpoch),
    Destroy,
}

struct Inner {
    session: MediaSession,
    reconnect_timer: Option<TaskHandle>,
}

struct Core<Tr, Sch, T> {
    inner: Mutex<Inner>,
    transport: Tr,
    scheduler: Sch,
    telemetry: T,
    policy: MediaPolicy,
}

/// Drives a single feed's decode session through faults and reconnects.
///
/// Clones share the same session.
pub struct MediaSessionController<Tr, Sch, T = TracingTelemetry> {
    core: Arc<Core<Tr, Sch, T>>,
}

impl<Tr, Sch, T> Clone for MediaSessionController<Tr, Sch, T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<Tr, Sch, T> MediaSessionController<Tr, Sch, T>
where
    Tr: MediaTransport,
    Sch: Scheduler,
    T: TelemetrySink,
{
    pub fn new(
        feed_id: impl Into<String>,
        transport: Tr,
        scheduler: Sch,
        telemetry: T,
        policy: MediaPolicy,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                inner: Mutex::new(Inner {
                    session: MediaSession::new(feed_id.into()),
                    reconnect_timer: None,
                }),
                transport,
                scheduler,
                telemetry,
                policy,
            }),
        }
    }

    pub fn feed_id(&self) -> String {
        self.core.lock().session.feed_id.clone()
    }

    pub fn session(&self) -> MediaSession {
        self.core.lock().session.clone()
    }

    pub fn state(&self) -> MediaState {
        self.core.lock().session.state.clone()
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus::from(&self.core.lock().session.state)
    }

    /// Epoch the transport must tag its callbacks with.
    pub fn epoch(&self) -> SessionEpoch {
        self.core.lock().session.epoch
    }

    /// Begin playing `url`, replacing any existing session.
    pub fn start(&self, url: impl Into<String>) -> SessionEpoch {
        let url = url.into();
        let (epoch, effects) = {
            let mut inner = self.core.lock();
            let mut effects = self.core.release_session(&mut inner);
            inner.session.source_url = Some(url.clone());
            inner.session.reconnect_attempts = 0;
            inner.session.current_backoff_ms = 0;
            inner.session.classification = None;
            inner.session.soft_resume_attempted = false;
            inner.session.state = MediaState::Initializing;
            let epoch = inner.session.epoch;
            effects.push(Effect::Load { url, epoch });
            (epoch, effects)
        };
        tracing::debug!(epoch = epoch.value(), "media session starting");
        self.core.apply(effects);
        epoch
    }

    /// Switch to a different source. Pending reconnects are cancelled.
    pub fn set_source(&self, url: impl Into<String>) -> SessionEpoch {
        self.start(url)
    }

    /// Destroy the session and stop all retries.
    pub fn teardown(&self) {
        let effects = {
            let mut inner = self.core.lock();
            let effects = self.core.release_session(&mut inner);
            inner.session.state = MediaState::Stopped;
            effects
        };
        self.core.apply(effects);
    }

    /// Playback confirmed for the session tagged `epoch`.
    ///
    /// Returns false when the callback is stale or the feed is not active.
    pub fn on_playing(&self, epoch: SessionEpoch) -> bool {
        let recovered = {
            let mut inner = self.core.lock();
            if inner.session.epoch != epoch || !inner.session.state.has_session() {
                return false;
            }
            if let Some(handle) = inner.reconnect_timer.take() {
                self.core.scheduler.cancel(handle);
            }
            let session = &mut inner.session;
            let recovered = session.reconnect_attempts > 0 || session.soft_resume_attempted;
            session.reconnect_attempts = 0;
            session.soft_resume_attempted = false;
            session.current_backoff_ms = 0;
            session.state = MediaState::Playing;
            recovered.then(|| session.feed_id.clone())
        };

        if let Some(feed_id) = recovered {
            self.core
                .telemetry
                .record(TelemetryEvent::MediaRecovered { feed_id });
        }
        true
    }

    /// Handle a fault from the session tagged `epoch` and return the new state.
    ///
    /// Stale faults, faults on an inactive feed and faults arriving while a
    /// reconnect is already scheduled leave the state unchanged.
    pub fn on_fault(&self, epoch: SessionEpoch, fault: &MediaFault) -> MediaState {
        let class = fault.class();
        let mut events = Vec::new();
        let (state, effects) = {
            let mut inner = self.core.lock();
            let accepting = matches!(
                inner.session.state,
                MediaState::Initializing | MediaState::Playing | MediaState::SoftResuming
            );
            if inner.session.epoch != epoch || !accepting {
                tracing::trace!(epoch = epoch.value(), "ignoring media fault");
                return inner.session.state.clone();
            }

            inner.session.classification = Some(class);
            events.push(TelemetryEvent::MediaFault {
                feed_id: inner.session.feed_id.clone(),
                class,
                status: fault.status,
            });

            let effects = match class {
                FaultClass::Unrecoverable => {
                    let effects = self.core.release_session(&mut inner);
                    inner.session.state = MediaState::Unrecoverable {
                        feed_id: inner.session.feed_id.clone(),
                        status: fault.status,
                    };
                    tracing::warn!(
                        feed_id = %inner.session.feed_id,
                        status = ?fault.status,
                        "media feed is unrecoverable: {}",
                        fault.message
                    );
                    effects
                }
                FaultClass::RetryableNetwork | FaultClass::RetryableServer
                    if inner.session.state == MediaState::Playing
                        && !inner.session.soft_resume_attempted =>
                {
                    inner.session.soft_resume_attempted = true;
                    inner.session.state = MediaState::SoftResuming;
                    vec![Effect::ResumeLoading(inner.session.epoch)]
                }
                FaultClass::RetryableNetwork | FaultClass::RetryableServer => {
                    self.schedule_reconnect(&mut inner, &mut events)
                }
            };
            (inner.session.state.clone(), effects)
        };

        for event in events {
            self.core.telemetry.record(event);
        }
        self.core.apply(effects);
        state
    }

    /// Start over after the feed was exhausted. Returns false in any other state.
    pub fn retry(&self) -> bool {
        let effects = {
            let mut inner = self.core.lock();
            if inner.session.state != MediaState::Exhausted {
                return false;
            }
            let Some(url) = inner.session.source_url.clone() else {
                return false;
            };
            inner.session.epoch = inner.session.epoch.next();
            inner.session.reconnect_attempts = 0;
            inner.session.current_backoff_ms = 0;
            inner.session.soft_resume_attempted = false;
            inner.session.state = MediaState::Initializing;
            vec![Effect::Load {
                url,
                epoch: inner.session.epoch,
            }]
        };
        tracing::info!("manual media retry requested");
        self.core.apply(effects);
        true
    }

    fn schedule_reconnect(
        &self,
        inner: &mut Inner,
        events: &mut Vec<TelemetryEvent>,
    ) -> Vec<Effect> {
        let attempts = inner.session.reconnect_attempts;
        if attempts >= self.core.policy.max_attempts {
            let effects = self.core.release_session(inner);
            inner.session.state = MediaState::Exhausted;
            events.push(TelemetryEvent::MediaExhausted {
                feed_id: inner.session.feed_id.clone(),
                attempts,
            });
            return effects;
        }

        let delay_ms = self.core.policy.backoff.delay_ms_for_attempt(attempts);
        inner.session.reconnect_attempts = attempts + 1;
        inner.session.current_backoff_ms = delay_ms;
        inner.session.state = MediaState::Reconnecting { delay_ms };

        let epoch = inner.session.epoch;
        let core = Arc::downgrade(&self.core);
        let handle = self.core.scheduler.schedule(
            Duration::from_millis(delay_ms),
            Box::new(move || reconnect_due(&core, epoch)),
        );
        inner.reconnect_timer = Some(handle);

        events.push(TelemetryEvent::MediaReconnectScheduled {
            feed_id: inner.session.feed_id.clone(),
            attempt: attempts + 1,
            delay_ms,
        });
        Vec::new()
    }
}

impl<Tr, Sch, T> Core<Tr, Sch, T>
where
    Tr: MediaTransport,
    Sch: Scheduler,
    T: TelemetrySink,
{
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Cancel the pending reconnect and invalidate the current epoch.
    fn release_session(&self, inner: &mut Inner) -> Vec<Effect> {
        if let Some(handle) = inner.reconnect_timer.take() {
            self.scheduler.cancel(handle);
        }
        inner.session.epoch = inner.session.epoch.next();
        if inner.session.state.has_session() {
            vec![Effect::Destroy]
        } else {
            Vec::new()
        }
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Load { url, epoch } => self.transport.load(&url, epoch),
                Effect::ResumeLoading(epoch) => self.transport.resume_loading(epoch),
                Effect::Destroy => self.transport.destroy(),
            }
        }
    }
}

/// Timer body: recreate the session if it is still the one that faulted.
fn reconnect_due<Tr, Sch, T>(core: &Weak<Core<Tr, Sch, T>>, epoch: SessionEpoch)
where
    Tr: MediaTransport,
    Sch: Scheduler,
    T: TelemetrySink,
{
    let Some(core) = core.upgrade() else {
        return;
    };
    let effects = {
        let mut inner = core.lock();
        if inner.session.epoch != epoch
            || !matches!(inner.session.state, MediaState::Reconnecting { .. })
        {
            return;
        }
        let Some(url) = inner.session.source_url.clone() else {
            return;
        };
        inner.reconnect_timer = None;
        let mut effects = core.release_session(&mut inner);
        inner.session.state = MediaState::Initializing;
        tracing::debug!(
            feed_id = %inner.session.feed_id,
            attempt = inner.session.reconnect_attempts,
            "reconnecting media session"
        );
        effects.push(Effect::Load {
            url,
            epoch: inner.session.epoch,
        });
        effects
    };
    core.apply(effects);
}
