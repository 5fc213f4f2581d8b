//! Frame-loop simulation driving raster thread mergers.
//!
//! A platform loop and a raster loop share one task queue registry. Every
//! frame is a task posted to the raster queue; while the queues are merged
//! the platform thread picks it up. Each simulated call site behaves like a
//! platform-view embedder: on frames where it shows platform views it leases
//! the merge (or extends its lease when already merged), and at the end of
//! every frame it counts its lease down.

use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tmerge_core::{MergerConfig, MergerError, MergerRegistry, RasterThreadMerger};
use tmerge_queues::{current_task_queue_id, MessageLoop, MessageLoopTaskQueues};
use tmerge_types::{LeaseTerm, QueueId, RasterThreadStatus};

/// Upper bound on `frames` for one run. Every frame is kept in the trace.
pub const MAX_FRAMES: u32 = 1_000_000;

/// Settings for one simulation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub frames: u32,
    pub callers: u32,
    /// Call site `k` shows platform views on frames where
    /// `(frame + k) % view_interval == 0`.
    pub view_interval: u32,
    pub merger: MergerConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frames: 30,
            callers: 2,
            view_interval: 12,
            merger: MergerConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Defaults, overlaid with the TOML file at `path` when given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn lease_term(&self) -> LeaseTerm {
        self.merger.default_lease_term
    }

    fn shows_views(&self, caller: u32, frame: u32) -> bool {
        (u64::from(frame) + u64::from(caller)) % u64::from(self.view_interval) == 0
    }
}

/// What happened during one frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FrameRecord {
    pub frame: u32,
    pub thread: String,
    pub on_platform_thread: bool,
    pub merged_now: bool,
    pub unmerged_now: bool,
    pub merged_after: bool,
}

/// Summary of a simulation run.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub frames: u32,
    pub callers: u32,
    pub lease_term: LeaseTerm,
    pub frames_on_platform_thread: u32,
    pub merges: u32,
    pub unmerges: u32,
    /// Whether a lease was still outstanding when the last frame ended.
    pub merged_at_end: bool,
    pub trace: Vec<FrameRecord>,
}

/// Run the frame loop described by `config`.
pub fn run(config: &SimulationConfig) -> anyhow::Result<SimulationReport> {
    ensure!(config.callers > 0, "at least one caller is required");
    ensure!(config.view_interval > 0, "view interval must be positive");
    ensure!(config.lease_term() > 0, "lease term must be positive");
    ensure!(
        config.frames <= MAX_FRAMES,
        "at most {MAX_FRAMES} frames per run, got {}",
        config.frames
    );

    let queues = Arc::new(MessageLoopTaskQueues::new());
    let platform = MessageLoop::spawn("platform", queues.clone())?;
    let raster = MessageLoop::spawn("raster", queues.clone())?;
    let registry = MergerRegistry::with_config(queues.clone(), config.merger.clone());

    let mergers: Arc<Vec<RasterThreadMerger>> = Arc::new(
        (0..config.callers)
            .map(|_| registry.merger(platform.queue_id(), raster.queue_id()))
            .collect(),
    );

    let mut trace = Vec::new();
    for frame in 0..config.frames {
        let (tx, rx) = mpsc::channel();
        let frame_mergers = mergers.clone();
        let frame_config = config.clone();
        let platform_id = platform.queue_id();
        raster.task_runner().post_task(move || {
            let _ = tx.send(draw_frame(frame, platform_id, &frame_mergers, &frame_config));
        })?;
        let record = rx
            .recv()
            .with_context(|| format!("frame {frame} was dropped by the raster queue"))??;
        debug!(frame, thread = %record.thread, merged = record.merged_after, "frame drawn");
        trace.push(record);
    }

    let merged_at_end = mergers.first().is_some_and(|m| m.is_merged());
    let mut unmerges = trace.iter().filter(|r| r.unmerged_now).count() as u32;
    for merger in mergers.iter() {
        unmerges += release_lease(merger)?;
    }

    Ok(SimulationReport {
        frames: config.frames,
        callers: config.callers,
        lease_term: config.lease_term(),
        frames_on_platform_thread: trace.iter().filter(|r| r.on_platform_thread).count() as u32,
        merges: trace.iter().filter(|r| r.merged_now).count() as u32,
        unmerges,
        merged_at_end,
        trace,
    })
}

fn draw_frame(
    frame: u32,
    platform_id: QueueId,
    mergers: &[RasterThreadMerger],
    config: &SimulationConfig,
) -> Result<FrameRecord, MergerError> {
    let mut merged_now = false;
    for (caller, merger) in (0u32..).zip(mergers) {
        if !config.shows_views(caller, frame) {
            continue;
        }
        if merger.is_merged() {
            merger.extend_lease_to(config.lease_term());
        } else {
            merged_now |= merger.merge_with_default_lease()?;
        }
    }

    let thread = thread::current().name().unwrap_or("unnamed").to_string();
    let on_platform_thread = current_task_queue_id() == Some(platform_id);

    let mut unmerged_now = false;
    for merger in mergers {
        unmerged_now |= merger.decrement_lease_status()? == RasterThreadStatus::UnmergedNow;
    }

    Ok(FrameRecord {
        frame,
        thread,
        on_platform_thread,
        merged_now,
        unmerged_now,
        merged_after: mergers.first().is_some_and(|m| m.is_merged()),
    })
}

/// Count a merger's remaining lease down so nothing is leaked at shutdown.
/// Returns how many unmerges that caused.
fn release_lease(merger: &RasterThreadMerger) -> Result<u32, MergerError> {
    let mut unmerges = 0;
    while merger.lease_term().is_some() {
        match merger.decrement_lease_status()? {
            RasterThreadStatus::UnmergedNow => unmerges += 1,
            RasterThreadStatus::RemainsMerged => {}
            RasterThreadStatus::RemainsUnmerged => break,
        }
    }
    Ok(unmerges)
}
