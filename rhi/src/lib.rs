use anyhow::Result;
use log::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowBuilder};

use config::RendererSettings;
use renderer::Renderer;
use window::PresentationWindow;

pub mod config;
pub mod error;
pub mod renderer;
pub mod vulkan;
pub mod window;

#[derive(Debug)]
pub struct Engine {
    window: Arc<Window>,
    renderer: Renderer,
    event_loop: EventLoop<()>,
}

impl Engine {
    pub fn new(settings: RendererSettings) -> Result<Engine> {
        // Window
        let event_loop = EventLoop::new()?;
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(settings.application_name.as_str())
                .with_inner_size(LogicalSize::new(1024, 768))
                .build(&event_loop)?,
        );

        let presentation = if settings.headless {
            None
        } else {
            Some(Arc::clone(&window) as Arc<dyn PresentationWindow>)
        };
        let renderer = unsafe { Renderer::new(&settings, presentation)? };

        Ok(Engine {
            window,
            renderer,
            event_loop,
        })
    }

    pub fn run(self) -> Result<()> {
        let Engine {
            window,
            mut renderer,
            event_loop,
        } = self;
        let failure = Rc::new(RefCell::new(None));
        let failed = Rc::clone(&failure);

        event_loop.run(move |event, elwt| match event {
            // Request a redraw when all events were processed.
            Event::AboutToWait => window.request_redraw(),
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::RedrawRequested if !elwt.exiting() => {
                    if let Err(error) = unsafe { renderer.render() } {
                        *failed.borrow_mut() = Some(error);
                        elwt.exit();
                    }
                }
                WindowEvent::Resized(size) => {
                    debug!("Window resized to {}x{}.", size.width, size.height);
                    if let Err(error) = unsafe { renderer.resize() } {
                        *failed.borrow_mut() = Some(error);
                        elwt.exit();
                    }
                }
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(KeyCode::KeyV),
                            state: ElementState::Pressed,
                            repeat: false,
                            ..
                        },
                    ..
                } => {
                    let vsync = !renderer.vsync();
                    if let Err(error) = unsafe { renderer.set_vsync(vsync) } {
                        *failed.borrow_mut() = Some(error);
                        elwt.exit();
                    }
                }
                WindowEvent::CloseRequested => elwt.exit(),
                _ => {}
            },
            Event::LoopExiting => unsafe {
                if let Err(error) = renderer.device_wait_idle() {
                    warn!("Device did not become idle before shutdown: {}", error);
                }
                renderer.destroy();
            },
            _ => {}
        })?;

        let failure = failure.borrow_mut().take();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
