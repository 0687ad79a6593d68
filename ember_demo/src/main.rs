/// Ember demo - clears the window every frame through the render core

mod scene;

use std::sync::Arc;
use ember_engine::ember::gpu::DrawableSize;
use ember_engine::ember::{Config, Error, RenderCore, Result};
use ember_engine::{engine_error, engine_info};
use ember_engine_renderer_vulkan::{VulkanDevice, VulkanSwapchain};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::scene::Scene;

const LOG_SOURCE: &str = "ember::demo";

/// Render state created once the window exists
///
/// Field order matters: the core (and the surface it owns) goes before the window.
struct Renderer {
    core: RenderCore<VulkanSwapchain>,
    scene: Scene,
    window: Arc<Window>,
}

impl Renderer {
    fn new(event_loop: &ActiveEventLoop, config: Config) -> Result<Self> {
        let attributes = Window::default_attributes()
            .with_title(config.app_name.clone())
            .with_inner_size(PhysicalSize::new(config.window_extent.width, config.window_extent.height));
        let window = Arc::new(event_loop.create_window(attributes).map_err(|e| {
            engine_error!(LOG_SOURCE, "Failed to create window: {}", e);
            Error::InitializationFailed(format!("Failed to create window: {}", e))
        })?);

        let device = Arc::new(VulkanDevice::new(window.as_ref(), &config)?);
        let swapchain = VulkanSwapchain::new(Arc::clone(&device), window.drawable_size())?;
        engine_info!(LOG_SOURCE, "Swapchain format: {:?}", swapchain.format());

        let mut core = RenderCore::new(device, swapchain, config)?;
        let scene = Scene::new(&mut core)?;
        engine_info!(
            LOG_SOURCE,
            "Uploaded triangle: {} vertices, {} indices",
            scene.mesh().vertex_count,
            scene.mesh().index_count
        );

        Ok(Self { core, scene, window })
    }

    fn redraw(&mut self) -> Result<()> {
        if self.core.resize_requested() {
            // Nothing in the scene depends on the surface size
            self.core.resize_if_requested(self.window.as_ref(), |_, _| Ok(()))?;
        }
        // An obsolete surface only marks the resize; it is handled next redraw
        self.core.draw_frame(&mut self.scene)?;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.core.shutdown() {
            engine_error!(LOG_SOURCE, "Shutdown reported an error: {}", e);
        }
        let stats = self.core.stats();
        engine_info!(
            LOG_SOURCE,
            "{} frames presented, {} aborted, {} surface recreations, {} descriptor pools",
            stats.frames_presented,
            stats.frames_aborted,
            stats.surface_recreations,
            stats.descriptor_pools_created
        );
        ember_engine_renderer_vulkan::print_validation_stats_report();
    }
}

#[derive(Default)]
struct App {
    renderer: Option<Renderer>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        let config = Config {
            app_name: "Ember Demo".to_string(),
            ..Config::default()
        };
        match Renderer::new(event_loop, config) {
            Ok(renderer) => {
                engine_info!(LOG_SOURCE, "Initialization complete, entering main loop");
                self.renderer = Some(renderer);
            }
            Err(e) => {
                engine_error!(LOG_SOURCE, "Failed to create renderer: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                engine_info!(LOG_SOURCE, "Close requested, shutting down");
                renderer.shutdown();
                self.renderer = None;
                event_loop.exit();
            }
            WindowEvent::Resized(_) => {
                renderer.core.request_resize();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = renderer.redraw() {
                    engine_error!(LOG_SOURCE, "Render error: {}", e);
                    renderer.shutdown();
                    self.renderer = None;
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            renderer.window.request_redraw();
        }
    }
}

fn main() {
    engine_info!(LOG_SOURCE, "Starting Ember demo");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            engine_error!(LOG_SOURCE, "Failed to create event loop: {}", e);
            std::process::exit(1);
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    if let Err(e) = event_loop.run_app(&mut app) {
        engine_error!(LOG_SOURCE, "Event loop error: {}", e);
        std::process::exit(1);
    }
}
