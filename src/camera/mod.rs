//! Camera capture module
//!
//! Provides cross-platform camera capture using the nokhwa crate.
//! Opening the device is confirmed before `open` returns, so access failures
//! surface to the caller. Frames are then captured on a background thread
//! and the latest frame is available to any reader through a `CameraFeed`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;

use crate::error::{GlowError, Result};

/// Camera frame data
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame number, starting at 1
    pub frame_number: u64,
    /// Frame timestamp
    pub timestamp: Instant,
}

impl CameraFrame {
    /// Build a frame from raw RGBA data
    pub fn new(data: Vec<u8>, width: u32, height: u32, frame_number: u64) -> Self {
        Self {
            data,
            width,
            height,
            frame_number,
            timestamp: Instant::now(),
        }
    }

    /// RGBA pixel at (x, y), black when out of range
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * self.width + x) * 4) as usize;
        match self.data.get(idx..idx + 4) {
            Some(p) => [p[0], p[1], p[2], p[3]],
            None => [0; 4],
        }
    }
}

/// Anything that can hand out the most recent video frame
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<CameraFrame>;
}

/// Information about an available camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    /// Camera index
    pub index: u32,
    /// Camera name
    pub name: String,
}

/// Shared read side of the capture triple buffer
#[derive(Clone)]
pub struct CameraFeed {
    frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
    /// Index of the latest complete frame
    latest_frame_idx: Arc<AtomicU64>,
    frame_count: Arc<AtomicU64>,
}

impl CameraFeed {
    fn new() -> Self {
        Self {
            frames: [
                Arc::new(Mutex::new(None)),
                Arc::new(Mutex::new(None)),
                Arc::new(Mutex::new(None)),
            ],
            latest_frame_idx: Arc::new(AtomicU64::new(0)),
            frame_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish a captured frame, overwriting the oldest slot
    fn publish(&self, write_idx: u64, frame: CameraFrame) {
        let slot = (write_idx % 3) as usize;
        *self.frames[slot].lock() = Some(frame);
        self.latest_frame_idx.store(write_idx, Ordering::Release);
    }

    /// Number of frames captured so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }
}

impl FrameSource for CameraFeed {
    fn latest_frame(&self) -> Option<CameraFrame> {
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.frames[slot].lock().clone()
    }
}

/// Camera capture interface
pub struct CameraCapture {
    feed: CameraFeed,
    /// Whether capture is running
    running: Arc<AtomicBool>,
    /// Capture thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Negotiated camera resolution
    width: u32,
    height: u32,
}

impl CameraCapture {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(camera_list) => camera_list
                .iter()
                .enumerate()
                .map(|(idx, info)| CameraInfo {
                    index: idx as u32,
                    name: info.human_name().to_string(),
                })
                .collect(),
            Err(e) => {
                log::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    /// Open a camera and start capturing
    ///
    /// Blocks until the device has either opened its stream or failed to.
    /// A denied or missing device yields `GlowError::CameraAccess`.
    pub fn open(camera_index: u32, timeout: Duration) -> Result<Self> {
        let feed = CameraFeed::new();
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(u32, u32), String>>(1);

        let feed_clone = feed.clone();
        let running_clone = running.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(camera_index, feed_clone, running_clone, ready_tx);
            })
            .map_err(|e| GlowError::CameraAccess(format!("failed to spawn capture thread: {}", e)))?;

        let mut capture = Self {
            feed,
            running,
            thread_handle: Some(thread_handle),
            width: 0,
            height: 0,
        };

        match ready_rx.recv_timeout(timeout) {
            Ok(Ok((width, height))) => {
                capture.width = width;
                capture.height = height;
                Ok(capture)
            }
            Ok(Err(e)) => {
                capture.stop();
                Err(GlowError::CameraAccess(e))
            }
            Err(_) => {
                capture.running.store(false, Ordering::Release);
                // The thread may be stuck inside the driver; leave it detached.
                capture.thread_handle = None;
                Err(GlowError::CameraAccess(format!(
                    "camera {} did not open within {:?}",
                    camera_index, timeout
                )))
            }
        }
    }

    /// Open the device, trying progressively less specific formats
    fn open_device(camera_index: u32) -> std::result::Result<Camera, String> {
        let index = CameraIndex::Index(camera_index);

        let attempts = [
            RequestedFormatType::AbsoluteHighestResolution,
            RequestedFormatType::HighestResolution(nokhwa::utils::Resolution::new(640, 480)),
            RequestedFormatType::None,
        ];

        let mut last_error = String::from("no format attempted");
        for format_type in attempts {
            let requested = RequestedFormat::new::<RgbAFormat>(format_type);
            match Camera::new(index.clone(), requested) {
                Ok(camera) => return Ok(camera),
                Err(e) => {
                    log::warn!("Failed to open camera {} with {:?}: {:?}", camera_index, format_type, e);
                    last_error = format!("{:?}", e);
                }
            }
        }

        Err(format!("failed to open camera {}: {}", camera_index, last_error))
    }

    /// Camera capture thread
    fn capture_thread(
        camera_index: u32,
        feed: CameraFeed,
        running: Arc<AtomicBool>,
        ready: crossbeam_channel::Sender<std::result::Result<(u32, u32), String>>,
    ) {
        log::info!("Starting camera capture thread (camera {})", camera_index);

        let mut camera = match Self::open_device(camera_index) {
            Ok(c) => c,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        if let Err(e) = camera.open_stream() {
            let _ = ready.send(Err(format!("failed to open camera stream: {:?}", e)));
            return;
        }

        let resolution = camera.resolution();
        log::info!(
            "Camera opened: {} ({}x{})",
            camera.info().human_name(),
            resolution.width(),
            resolution.height()
        );
        let _ = ready.send(Ok((resolution.width(), resolution.height())));

        let mut write_idx: u64 = 0;

        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        let frame_number = feed.frame_count.fetch_add(1, Ordering::Relaxed) + 1;
                        let camera_frame = CameraFrame::new(
                            image.into_raw(),
                            frame.resolution().width(),
                            frame.resolution().height(),
                            frame_number,
                        );

                        feed.publish(write_idx, camera_frame);
                        write_idx = write_idx.wrapping_add(1);
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            log::warn!("Failed to stop camera stream: {:?}", e);
        }
        log::info!("Camera capture thread stopped");
    }

    /// Cloneable handle to the captured frames
    pub fn feed(&self) -> CameraFeed {
        self.feed.clone()
    }

    /// Negotiated camera resolution
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.feed.frame_count()
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(value: u8, frame_number: u64) -> CameraFrame {
        CameraFrame::new(vec![value; 4 * 4 * 4], 4, 4, frame_number)
    }

    #[test]
    fn test_feed_starts_empty() {
        let feed = CameraFeed::new();
        assert!(feed.latest_frame().is_none());
        assert_eq!(feed.frame_count(), 0);
    }

    #[test]
    fn test_feed_returns_latest_published_frame() {
        let feed = CameraFeed::new();
        for i in 0..5u64 {
            feed.publish(i, solid_frame(i as u8, i + 1));
        }

        let frame = feed.latest_frame().unwrap();
        assert_eq!(frame.frame_number, 5);
        assert_eq!(frame.pixel(0, 0), [4, 4, 4, 4]);
    }

    #[test]
    fn test_feed_clones_share_frames() {
        let feed = CameraFeed::new();
        let reader = feed.clone();
        feed.publish(0, solid_frame(9, 1));
        assert_eq!(reader.latest_frame().map(|f| f.frame_number), Some(1));
    }

    #[test]
    fn test_pixel_out_of_range_is_black() {
        let frame = solid_frame(200, 1);
        assert_eq!(frame.pixel(3, 3), [200; 4]);
        assert_eq!(frame.pixel(0, 4), [0; 4]);
    }
}
