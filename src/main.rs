//! Person Glow - Main Entry Point
//!
//! Webcam person segmentation driving a cloud of glowing particles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use person_glow::camera::CameraCapture;
use person_glow::config::GlowConfig;
use person_glow::App;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// Application state machine
enum AppState {
    /// Initial state before window is created
    Uninitialized,
    /// Window, camera and scene are ready
    Running { window: Arc<Window>, app: App },
    /// Startup failed; waiting for the loop to exit
    Failed,
}

/// Main application handler implementing winit's ApplicationHandler trait
struct PersonGlowApp {
    config: GlowConfig,
    state: AppState,
    next_redraw_at: Instant,
}

impl PersonGlowApp {
    fn new(config: GlowConfig) -> Self {
        Self {
            config,
            state: AppState::Uninitialized,
            next_redraw_at: Instant::now(),
        }
    }
}

impl ApplicationHandler for PersonGlowApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        // Only initialize if we haven't already
        if !matches!(self.state, AppState::Uninitialized) {
            return;
        }

        log::info!("Creating window...");

        let window_attributes = WindowAttributes::default()
            .with_title(self.config.window.title.clone())
            .with_inner_size(LogicalSize::new(self.config.window.width, self.config.window.height));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                self.state = AppState::Failed;
                event_loop.exit();
                return;
            }
        };

        log::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        match App::new(window.clone(), &self.config) {
            Ok(app) => {
                log::info!("Person Glow ready!");
                log::info!("Press ESC to exit, F11 for fullscreen, M for overlay, S to save the mask");
                self.state = AppState::Running { window, app };
            }
            Err(e) => {
                log::error!("Startup failed: {}", e);
                self.state = AppState::Failed;
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        // Only handle events if we're running
        let AppState::Running { window, app } = &mut self.state else {
            return;
        };

        // Let the overlay handle the event first
        let overlay_consumed = app.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                event_loop.exit();
            }

            // Keyboard input (only if the overlay doesn't want it)
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key_code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } if !overlay_consumed => match key_code {
                KeyCode::Escape => {
                    log::info!("Escape pressed, exiting...");
                    event_loop.exit();
                }
                KeyCode::F11 => {
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                        log::info!("Exiting fullscreen");
                    } else {
                        window.set_fullscreen(Some(winit::window::Fullscreen::Borderless(None)));
                        log::info!("Entering fullscreen");
                    }
                }
                KeyCode::KeyM => app.toggle_overlay(),
                KeyCode::KeyS => app.save_mask_snapshot(),
                _ => {}
            },

            WindowEvent::Resized(physical_size) => {
                app.resize(physical_size);
            }

            WindowEvent::RedrawRequested => {
                app.update();

                match app.render() {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        log::warn!("Surface lost, reconfiguring...");
                        app.recover_surface();
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("Out of GPU memory!");
                        event_loop.exit();
                    }
                    Err(e) => {
                        log::warn!("Surface error: {:?}", e);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let AppState::Running { window, .. } = &mut self.state else {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        };

        // Drive redraws at target FPS
        let frame_duration = Duration::from_nanos(1_000_000_000u64 / self.config.window.target_fps as u64);
        let wake_early = Duration::from_micros(1000);
        let wake_at = self
            .next_redraw_at
            .checked_sub(wake_early)
            .unwrap_or(self.next_redraw_at);
        let now = Instant::now();

        if now >= wake_at {
            // Spin-wait for precise timing
            while Instant::now() < self.next_redraw_at {
                std::hint::spin_loop();
            }

            window.request_redraw();
            self.next_redraw_at += frame_duration;

            // Reset if too far behind
            let max_behind = frame_duration * 2;
            let now_after = Instant::now();
            if now_after > self.next_redraw_at + max_behind {
                self.next_redraw_at = now_after + frame_duration;
            }
        }

        event_loop.set_control_flow(ControlFlow::WaitUntil(wake_at));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Dropping the app stops the worker and the camera
        if matches!(self.state, AppState::Running { .. }) {
            self.state = AppState::Uninitialized;
        }
    }
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Person Glow v{}", env!("CARGO_PKG_VERSION"));

    let config = match GlowConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let cameras = CameraCapture::list_cameras();
    if cameras.is_empty() {
        log::warn!("No cameras found");
    }
    for camera in &cameras {
        log::info!("Camera {}: {}", camera.index, camera.name);
    }

    // Create event loop
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Wait);

    // Create and run application
    let mut app = PersonGlowApp::new(config);
    event_loop.run_app(&mut app).expect("Event loop error");

    if matches!(app.state, AppState::Failed) {
        std::process::exit(1);
    }
}
