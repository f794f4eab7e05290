//! Common test utilities for scheduler integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use facetrack_rs::detection::{BlankSource, Detections, Frame, FrameSource, RawDetection};
use facetrack_rs::pipeline::{CollectingSink, PipelineEvent, TokioClock};
use facetrack_rs::{BBox, Detector, Error, FrameScheduler, PipelineConfig, Result};

/// One scripted detector response
pub struct Scripted {
    pub latency_ms: u64,
    pub outcome: std::result::Result<Vec<RawDetection>, String>,
}

impl Scripted {
    pub fn ok(latency_ms: u64, entities: Vec<RawDetection>) -> Self {
        Self {
            latency_ms,
            outcome: Ok(entities),
        }
    }

    pub fn fail(latency_ms: u64, message: &str) -> Self {
        Self {
            latency_ms,
            outcome: Err(message.to_string()),
        }
    }
}

/// How `ready()` behaves
#[derive(Clone, Copy, Debug)]
pub enum Readiness {
    Immediate,
    Fail,
    Hang,
}

type Script = Box<dyn Fn(usize) -> Scripted + Send + Sync>;

/// Detector driven by a closure from call index to response
pub struct ScriptedDetector {
    script: Script,
    readiness: Readiness,
    calls: AtomicUsize,
    started_at: Mutex<Vec<u64>>,
    origin: tokio::time::Instant,
}

impl ScriptedDetector {
    pub fn new(script: impl Fn(usize) -> Scripted + Send + Sync + 'static) -> Arc<Self> {
        Self::with_readiness(Readiness::Immediate, script)
    }

    pub fn with_readiness(
        readiness: Readiness,
        script: impl Fn(usize) -> Scripted + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            readiness,
            calls: AtomicUsize::new(0),
            started_at: Mutex::new(Vec::new()),
            origin: tokio::time::Instant::now(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Virtual-time offsets (ms) at which each detect call started
    pub fn started_at(&self) -> Vec<u64> {
        self.started_at.lock().unwrap().clone()
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn ready(&self) -> Result<()> {
        match self.readiness {
            Readiness::Immediate => Ok(()),
            Readiness::Fail => Err(Error::Detector("model failed to load".to_string())),
            Readiness::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn detect(&self, frame: &Frame, _config: &PipelineConfig) -> Result<Detections> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.started_at
            .lock()
            .unwrap()
            .push(self.origin.elapsed().as_millis() as u64);

        let step = (self.script)(index);
        if step.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.latency_ms)).await;
        }
        match step.outcome {
            Ok(entities) => Ok(Detections {
                entities,
                dimensions: frame.dimensions(),
            }),
            Err(message) => Err(Error::Detector(message)),
        }
    }
}

pub fn face(x: f32, y: f32) -> RawDetection {
    RawDetection::new(BBox::new(x, y, 40.0, 40.0), 0.9)
}

pub fn source() -> Box<dyn FrameSource> {
    Box::new(BlankSource::new(640, 480))
}

/// Scheduler on a tokio clock starting at 0 ms
pub fn scheduler(
    config: PipelineConfig,
    detector: Arc<ScriptedDetector>,
    sink: &CollectingSink,
) -> FrameScheduler {
    FrameScheduler::with_clock(
        config,
        detector,
        Arc::new(sink.clone()),
        Arc::new(TokioClock::with_epoch(0)),
    )
    .expect("valid config")
}

pub async fn advance_to(origin: tokio::time::Instant, ms: u64) {
    tokio::time::sleep_until(origin + Duration::from_millis(ms)).await;
}

/// Ids carried by entity:detected / entity:updated events, in order
pub fn entity_ids(events: &[PipelineEvent]) -> Vec<Vec<u64>> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::EntityDetected(p) | PipelineEvent::EntityUpdated(p) => {
                Some(p.entities.iter().map(|t| t.id).collect())
            }
            _ => None,
        })
        .collect()
}
