//! Frame source adapter contract and a synthetic test-pattern source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capture::{LatestFrameSlot, PixelLayout, Plane, RawFrame, Rotation};
use crate::config::{LensFacing, Resolution};
use crate::error::{PipelineError, Result};
use crate::SourceConfig;

/// Delivery callback handed to a [`FrameSource`] when a session opens.
///
/// Delivering never blocks: a frame that has not been picked up yet is
/// replaced by the newer one.
#[derive(Debug, Clone)]
pub struct FrameSink {
    slot: LatestFrameSlot,
}

impl FrameSink {
    pub fn new(slot: LatestFrameSlot) -> Self {
        Self { slot }
    }

    pub fn deliver(&self, frame: RawFrame) {
        self.slot.offer(frame);
    }
}

/// An open capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: u64,
    pub lens: LensFacing,
    pub requested: Resolution,
}

/// Camera hardware abstraction.
pub trait FrameSource: Send {
    /// Start delivering frames from `lens` at, or near, `requested`.
    fn open(&mut self, lens: LensFacing, requested: Resolution, sink: FrameSink) -> Result<Session>;

    /// Stop delivering frames for `session`.
    fn close(&mut self, session: Session);
}

struct Producer {
    session: Session,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Generates YUV 4:2:0 test-pattern frames on its own thread.
pub struct SyntheticSource {
    config: SourceConfig,
    producer: Option<Producer>,
    next_session: u64,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            producer: None,
            next_session: 1,
        }
    }

    fn stop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.running.store(false, Ordering::Release);
            if producer.handle.join().is_err() {
                warn!(session = producer.session.id, "synthetic producer panicked");
            }
            info!(session = producer.session.id, "synthetic session closed");
        }
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, lens: LensFacing, requested: Resolution, sink: FrameSink) -> Result<Session> {
        self.stop();

        let degrees = match lens {
            LensFacing::Back => self.config.back_rotation,
            LensFacing::Front => self.config.front_rotation,
        };
        let rotation = Rotation::from_degrees(degrees)
            .ok_or_else(|| PipelineError::Session(format!("sensor rotation {degrees} is not a quarter turn")))?;
        let sensor = self.config.sensor_override.unwrap_or(requested);
        let interval = Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64);

        let session = Session {
            id: self.next_session,
            lens,
            requested,
        };
        self.next_session += 1;

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name(format!("synthetic-source-{}", session.id))
            .spawn(move || {
                let mut sequence = 0u64;
                while flag.load(Ordering::Acquire) {
                    let started = Instant::now();
                    sink.deliver(test_pattern(sensor, rotation, sequence));
                    sequence += 1;
                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
                debug!(frames = sequence, "synthetic producer stopped");
            })
            .map_err(|e| PipelineError::Session(e.to_string()))?;

        info!(
            session = session.id,
            ?lens,
            %requested,
            %sensor,
            rotation = rotation.degrees(),
            "synthetic session opened"
        );
        self.producer = Some(Producer {
            session,
            running,
            handle,
        });
        Ok(session)
    }

    fn close(&mut self, session: Session) {
        match &self.producer {
            Some(producer) if producer.session.id == session.id => self.stop(),
            _ => debug!(session = session.id, "close for inactive session ignored"),
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Diagonal luma ramp that drifts with `sequence`, over four chroma quadrants.
pub fn test_pattern(size: Resolution, rotation: Rotation, sequence: u64) -> RawFrame {
    let (w, h) = (size.width as usize, size.height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let shift = (sequence % 256) as usize;

    let mut y = vec![0u8; w * h];
    for (j, row) in y.chunks_exact_mut(w.max(1)).enumerate() {
        for (i, px) in row.iter_mut().enumerate() {
            *px = ((i + j + shift) % 256) as u8;
        }
    }
    let mut u = vec![0u8; cw * ch];
    let mut v = vec![0u8; cw * ch];
    for j in 0..ch {
        for i in 0..cw {
            let (right, bottom) = (i >= cw / 2, j >= ch / 2);
            u[j * cw + i] = if right { 200 } else { 64 };
            v[j * cw + i] = if bottom { 200 } else { 64 };
        }
    }

    RawFrame {
        sequence,
        width: size.width,
        height: size.height,
        layout: PixelLayout::Yuv420,
        planes: vec![Plane::new(y, w, 1), Plane::new(u, cw, 1), Plane::new(v, cw, 1)],
        rotation,
        timestamp: Instant::now(),
    }
}
