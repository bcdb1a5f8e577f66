//! Frame pipeline
//!
//! Segmentation runs on a dedicated worker thread: it takes the newest
//! camera frame, runs the segmenter, colours the result into a
//! `PersonMask` and hands it to the render thread. The hand-off channel has
//! no capacity, so the next inference only starts once the render thread has
//! taken the previous mask. The worker stops when its running flag is
//! cleared, which happens on `stop()` or drop.
//!
//! The render thread applies each mask with `apply_mask`: draw the mask
//! view, scatter the particles, and leave the cloud dirty for upload.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use rand::Rng;

use crate::camera::FrameSource;
use crate::effects::{MaskView, ParticleCloud};
use crate::error::{GlowError, Result};
use crate::ml::{MaskColors, PersonMask, SegmentationConfig, Segmenter};

/// How often a blocked hand-off rechecks the running flag
const HANDOFF_POLL: Duration = Duration::from_millis(50);

/// Mask produced by one inference
#[derive(Clone, Debug)]
pub struct MaskFrame {
    pub mask: PersonMask,
    /// Camera frame the mask was computed from
    pub frame_number: u64,
    pub inference_time: Duration,
    pub person_pixels: usize,
}

/// Worker lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerStatus {
    /// Loading the model
    Loading = 0,
    Running = 1,
    /// Model could not be loaded
    Failed = 2,
    Stopped = 3,
}

impl WorkerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Loading,
            1 => WorkerStatus::Running,
            2 => WorkerStatus::Failed,
            _ => WorkerStatus::Stopped,
        }
    }
}

#[derive(Default)]
struct WorkerCounters {
    status: AtomicU8,
    segmented: AtomicU64,
    failures: AtomicU64,
    last_inference_us: AtomicU64,
}

impl WorkerCounters {
    fn set_status(&self, status: WorkerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// Point-in-time copy of the worker counters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorkerStats {
    pub status: WorkerStatus,
    /// Frames segmented successfully
    pub segmented: u64,
    /// Inference calls that returned an error
    pub failures: u64,
    pub last_inference: Duration,
}

/// Worker parameters
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub segmentation: SegmentationConfig,
    pub mask_colors: MaskColors,
    /// Pause between iterations
    pub loop_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            mask_colors: MaskColors::default(),
            loop_delay: Duration::from_millis(1),
        }
    }
}

/// Cancellable segmentation loop
pub struct SegmentationWorker {
    receiver: Receiver<MaskFrame>,
    running: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl SegmentationWorker {
    /// Start the worker
    ///
    /// `load_segmenter` runs on the worker thread so model loading does not
    /// block the caller.
    pub fn spawn<S, F>(source: S, load_segmenter: F, settings: WorkerSettings) -> Result<Self>
    where
        S: FrameSource + 'static,
        F: FnOnce() -> Result<Box<dyn Segmenter>> + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded::<MaskFrame>(0);
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(WorkerCounters::default());

        let running_clone = running.clone();
        let counters_clone = counters.clone();

        let thread_handle = std::thread::Builder::new()
            .name("segmentation".to_string())
            .spawn(move || {
                Self::worker_thread(source, load_segmenter, settings, sender, running_clone, counters_clone);
            })
            .map_err(|e| GlowError::Inference(format!("failed to spawn segmentation thread: {}", e)))?;

        Ok(Self {
            receiver,
            running,
            counters,
            thread_handle: Some(thread_handle),
        })
    }

    fn worker_thread<S, F>(
        source: S,
        load_segmenter: F,
        settings: WorkerSettings,
        sender: Sender<MaskFrame>,
        running: Arc<AtomicBool>,
        counters: Arc<WorkerCounters>,
    ) where
        S: FrameSource,
        F: FnOnce() -> Result<Box<dyn Segmenter>>,
    {
        log::info!("Segmentation worker started");

        let mut segmenter = match load_segmenter() {
            Ok(s) => {
                counters.set_status(WorkerStatus::Running);
                s
            }
            Err(e) => {
                log::error!("Segmentation disabled: {}", e);
                counters.set_status(WorkerStatus::Failed);
                return;
            }
        };

        let mut last_frame = 0u64;

        'frames: while running.load(Ordering::Acquire) {
            let frame = match source.latest_frame() {
                Some(frame) if frame.frame_number != last_frame => frame,
                _ => {
                    std::thread::sleep(settings.loop_delay);
                    continue;
                }
            };
            last_frame = frame.frame_number;

            let started = Instant::now();
            match segmenter.segment(&frame, &settings.segmentation) {
                Ok(segmentation) => {
                    let inference_time = started.elapsed();
                    counters.segmented.fetch_add(1, Ordering::Relaxed);
                    counters
                        .last_inference_us
                        .store(inference_time.as_micros() as u64, Ordering::Relaxed);

                    let mut item = MaskFrame {
                        person_pixels: segmentation.person_pixels(),
                        mask: PersonMask::from_segmentation(&segmentation, &settings.mask_colors),
                        frame_number: frame.frame_number,
                        inference_time,
                    };

                    loop {
                        match sender.send_timeout(item, HANDOFF_POLL) {
                            Ok(()) => break,
                            Err(SendTimeoutError::Timeout(back)) => {
                                if !running.load(Ordering::Acquire) {
                                    break 'frames;
                                }
                                item = back;
                            }
                            Err(SendTimeoutError::Disconnected(_)) => break 'frames,
                        }
                    }
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Inference error on frame {}: {}", frame.frame_number, e);
                }
            }

            std::thread::sleep(settings.loop_delay);
        }

        counters.set_status(WorkerStatus::Stopped);
        log::info!("Segmentation worker stopped");
    }

    /// Take the pending mask, if the worker has one ready
    pub fn try_recv(&self) -> Option<MaskFrame> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next mask
    pub fn recv_timeout(&self, timeout: Duration) -> Option<MaskFrame> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            status: WorkerStatus::from_u8(self.counters.status.load(Ordering::Acquire)),
            segmented: self.counters.segmented.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            last_inference: Duration::from_micros(self.counters.last_inference_us.load(Ordering::Relaxed)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Cancel the loop and wait for the thread to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SegmentationWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outcome of applying one mask
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    pub frame_number: u64,
    /// Particles moved onto the mask
    pub moved: usize,
    pub person_pixels: usize,
    pub inference_time: Duration,
}

/// Apply a mask to the scene state
pub fn apply_mask<R: Rng + ?Sized>(
    frame: &MaskFrame,
    cloud: &mut ParticleCloud,
    view: &mut MaskView,
    rng: &mut R,
) -> FrameReport {
    view.draw(&frame.mask);
    let moved = cloud.scatter(&frame.mask, rng);
    FrameReport {
        frame_number: frame.frame_number,
        moved,
        person_pixels: frame.person_pixels,
        inference_time: frame.inference_time,
    }
}

/// Run startup in order: acquire the camera, then build the scene
///
/// A failed acquisition returns before `initialize` runs, so no scene state
/// is built for an unusable camera.
pub fn bootstrap<C, G, A, I>(acquire: A, initialize: I) -> Result<(C, G)>
where
    A: FnOnce() -> Result<C>,
    I: FnOnce(&C) -> Result<G>,
{
    let camera = acquire()?;
    let graph = initialize(&camera)?;
    Ok((camera, graph))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraFrame;
    use crate::ml::Segmentation;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    /// Produces a fresh 8x6 frame on every call
    struct CountingSource {
        next: AtomicU64,
    }

    impl CountingSource {
        fn new() -> Self {
            Self { next: AtomicU64::new(1) }
        }
    }

    impl FrameSource for CountingSource {
        fn latest_frame(&self) -> Option<CameraFrame> {
            let n = self.next.fetch_add(1, Ordering::Relaxed);
            Some(CameraFrame::new(vec![128; 8 * 6 * 4], 8, 6, n))
        }
    }

    struct EmptySource;

    impl FrameSource for EmptySource {
        fn latest_frame(&self) -> Option<CameraFrame> {
            None
        }
    }

    /// Marks every pixel as person
    struct EverywhereSegmenter;

    impl Segmenter for EverywhereSegmenter {
        fn segment(&mut self, frame: &CameraFrame, _config: &SegmentationConfig) -> Result<Segmentation> {
            Ok(Segmentation {
                data: vec![1; (frame.width * frame.height) as usize],
                width: frame.width,
                height: frame.height,
            })
        }
    }

    struct FailingSegmenter;

    impl Segmenter for FailingSegmenter {
        fn segment(&mut self, _frame: &CameraFrame, _config: &SegmentationConfig) -> Result<Segmentation> {
            Err(GlowError::Inference("model exploded".into()))
        }
    }

    fn wait_for(worker: &SegmentationWorker, pred: impl Fn(&WorkerStats) -> bool) -> WorkerStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = worker.stats();
            if pred(&stats) || Instant::now() > deadline {
                return stats;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_worker_produces_masks() {
        let worker = SegmentationWorker::spawn(
            CountingSource::new(),
            || Ok(Box::new(EverywhereSegmenter) as Box<dyn Segmenter>),
            WorkerSettings::default(),
        )
        .unwrap();

        let first = worker.recv_timeout(Duration::from_secs(5)).expect("no mask");
        let second = worker.recv_timeout(Duration::from_secs(5)).expect("no mask");

        // Mask matches the 8x6 frame
        assert_eq!((first.mask.width, first.mask.height), (8, 6));
        assert_eq!(first.person_pixels, 48);
        assert!(first.mask.data.chunks(4).all(|px| px[3] == 255));
        assert!(second.frame_number > first.frame_number);
        assert_eq!(worker.stats().status, WorkerStatus::Running);
    }

    #[test]
    fn test_worker_stops_while_blocked_on_handoff() {
        let mut worker = SegmentationWorker::spawn(
            CountingSource::new(),
            || Ok(Box::new(EverywhereSegmenter) as Box<dyn Segmenter>),
            WorkerSettings::default(),
        )
        .unwrap();

        let stats = wait_for(&worker, |s| s.segmented >= 1);
        assert!(stats.segmented >= 1);

        let started = Instant::now();
        worker.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!worker.is_running());
        assert_eq!(worker.stats().status, WorkerStatus::Stopped);
    }

    #[test]
    fn test_worker_counts_inference_failures() {
        let mut worker = SegmentationWorker::spawn(
            CountingSource::new(),
            || Ok(Box::new(FailingSegmenter) as Box<dyn Segmenter>),
            WorkerSettings::default(),
        )
        .unwrap();

        let stats = wait_for(&worker, |s| s.failures >= 3);
        assert!(stats.failures >= 3);
        assert_eq!(stats.segmented, 0);
        assert!(worker.try_recv().is_none());
        worker.stop();
    }

    #[test]
    fn test_worker_reports_model_load_failure() {
        let worker = SegmentationWorker::spawn(
            CountingSource::new(),
            || Err(GlowError::Model("missing".into())),
            WorkerSettings::default(),
        )
        .unwrap();

        let stats = wait_for(&worker, |s| s.status == WorkerStatus::Failed);
        assert_eq!(stats.status, WorkerStatus::Failed);
        assert!(worker.recv_timeout(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn test_worker_idles_without_frames() {
        let mut worker = SegmentationWorker::spawn(
            EmptySource,
            || Ok(Box::new(EverywhereSegmenter) as Box<dyn Segmenter>),
            WorkerSettings::default(),
        )
        .unwrap();

        assert!(worker.recv_timeout(Duration::from_millis(100)).is_none());
        assert_eq!(worker.stats().segmented, 0);
        worker.stop();
    }

    #[test]
    fn test_apply_mask_updates_view_and_cloud() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut cloud = ParticleCloud::new(200, &mut rng);
        cloud.take_dirty();
        let mut view = MaskView::new();

        let frame = MaskFrame {
            mask: PersonMask::uniform(10, 10, [0, 0, 0, 255]),
            frame_number: 12,
            inference_time: Duration::from_millis(4),
            person_pixels: 100,
        };

        let report = apply_mask(&frame, &mut cloud, &mut view, &mut rng);
        assert_eq!(report.moved, 200);
        assert_eq!(report.frame_number, 12);
        assert_eq!(view.generation(), 1);
        assert_eq!(view.image().dimensions(), (10, 10));
        assert!(cloud.is_dirty());
    }

    #[test]
    fn test_bootstrap_skips_scene_when_camera_denied() {
        let built = Cell::new(false);
        let result: Result<((), ())> = bootstrap(
            || Err(GlowError::CameraAccess("permission denied".into())),
            |_| {
                built.set(true);
                Ok(())
            },
        );

        assert!(matches!(result, Err(GlowError::CameraAccess(_))));
        assert!(!built.get());
    }

    #[test]
    fn test_bootstrap_builds_scene_after_camera() {
        let (camera, scene) = bootstrap(|| Ok(640u32), |width| Ok(*width * 2)).unwrap();
        assert_eq!(camera, 640);
        assert_eq!(scene, 1280);
    }
}
