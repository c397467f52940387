//! Test harness: an engine wired to in-memory collaborators, with every
//! render, analytics and metric emission captured for assertions.

use crate::bus::{Payload, Subscription, Topic};
use crate::collaborators::{ActiveSessionCell, ReleaseLog, RenderSurfaces, SurfaceHandle, SurfaceRegistry};
use crate::engine::{Collaborators, Engine, EngineOptions};
use crate::events::{AnalyticsEvent, PerformanceMetric, RenderRequest, SessionId};
use crate::reconstruct::ReconstructionHandler;
use crate::store::{self, SessionStreamStore};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub(crate) struct Harness {
    pub engine: Engine,
    pub active: Arc<ActiveSessionCell>,
    pub surfaces: Arc<SurfaceRegistry>,
    pub outbound: Arc<ReleaseLog>,
    pub reconstruction: Arc<ReconstructionHandler>,
    renders: Arc<Mutex<Vec<RenderRequest>>>,
    analytics: Arc<Mutex<Vec<AnalyticsEvent>>>,
    metrics: Arc<Mutex<Vec<PerformanceMetric>>>,
    topics: Arc<Mutex<Vec<&'static str>>>,
}

impl Harness {
    pub fn with_active(active: Option<&str>) -> Self {
        Self::with_options(active, EngineOptions::default())
    }

    pub fn with_grace(active: Option<&str>, tool_grace: Duration) -> Self {
        Self::with_options(
            active,
            EngineOptions {
                tool_grace,
                ..EngineOptions::default()
            },
        )
    }

    pub fn with_options(active: Option<&str>, options: EngineOptions) -> Self {
        let active = Arc::new(ActiveSessionCell::new(active.map(SessionId::from)));
        let surfaces = Arc::new(SurfaceRegistry::new());
        let outbound = Arc::new(ReleaseLog::new());
        let engine = Engine::new(
            options,
            Collaborators {
                active: active.clone(),
                surfaces: surfaces.clone(),
                outbound: outbound.clone(),
            },
        );

        let renders: Arc<Mutex<Vec<RenderRequest>>> = Arc::default();
        let analytics: Arc<Mutex<Vec<AnalyticsEvent>>> = Arc::default();
        let metrics: Arc<Mutex<Vec<PerformanceMetric>>> = Arc::default();
        let topics: Arc<Mutex<Vec<&'static str>>> = Arc::default();

        let sink = renders.clone();
        engine.bus().on(Topic::Render, move |e| {
            if let Payload::Render(request) = &e.data {
                sink.lock().unwrap().push(request.clone());
            }
            Ok(())
        });
        let sink = analytics.clone();
        engine.bus().on(Topic::Analytics, move |e| {
            if let Payload::Analytics(event) = &e.data {
                sink.lock().unwrap().push(event.clone());
            }
            Ok(())
        });
        let sink = metrics.clone();
        engine.bus().on(Topic::Metric, move |e| {
            if let Payload::Metric(metric) = &e.data {
                sink.lock().unwrap().push(metric.clone());
            }
            Ok(())
        });
        let sink = topics.clone();
        engine.bus().on(Subscription::All, move |e| {
            sink.lock().unwrap().push(e.topic.name());
            Ok(())
        });

        let reconstruction = Arc::clone(engine.reconstruction());
        Self {
            engine,
            active,
            surfaces,
            outbound,
            reconstruction,
            renders,
            analytics,
            metrics,
            topics,
        }
    }

    pub fn deliver(&self, message: serde_json::Value) {
        self.engine.deliver(message);
    }

    pub fn store(&self) -> MutexGuard<'_, SessionStreamStore> {
        store::lock(self.engine.store())
    }

    /// Make `session` active the way the UI does: the old view is torn down
    pub fn switch_to(&self, session: &str) {
        self.surfaces.clear();
        self.active.set(Some(SessionId::from(session)));
    }

    pub fn surface_of(&self, session: &str) -> Option<SurfaceHandle> {
        self.surfaces.current(&SessionId::from(session))
    }

    /// View renders for a session (session-list updates excluded)
    pub fn renders_for(&self, session: &str) -> Vec<RenderRequest> {
        let id = SessionId::from(session);
        self.renders
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.session_id() == &id)
            .filter(|r| !matches!(r, RenderRequest::SessionListChanged { .. }))
            .cloned()
            .collect()
    }

    pub fn all_renders(&self) -> Vec<RenderRequest> {
        self.renders.lock().unwrap().clone()
    }

    pub fn analytics_names(&self) -> Vec<&'static str> {
        self.analytics.lock().unwrap().iter().map(|e| e.name).collect()
    }

    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        self.metrics.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        self.topics.lock().unwrap().clone()
    }
}
