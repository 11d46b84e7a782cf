//! Application event loop.
//!
//! [`run`] opens the window and drives the viewer from winit events. Loads
//! run as async tasks (tokio natively, the browser's executor on the web)
//! and report back to the event loop as [`ViewerEvent`]s, so the model
//! registry and every GPU call stay on the event-loop thread.
//!
//! Each frame:
//! 1. Advance the orbit camera
//! 2. Draw the sky box
//! 3. Draw the current model, initialising its GPU resources on first use
//! 4. Present the frame

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
};

use cgmath::{Deg, Rad};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

use crate::{
    camera::OrbitCamera,
    config::{self, MODELS, SKY_BOXES, ViewerConfig},
    context::Context,
    data_structures::document::Document,
    pipelines::{
        cube_map::{CubeMap, CubeMapBuilder},
        sky_box::SkyBoxRenderer,
    },
    render::{ModelHandle, ModelRenderer},
    resources::{
        LoadedModel, ModelLoader,
        fetch::{AssetFetcher, fetch_image},
    },
};

/// Lines of a `LineDelta` scroll converted to pixels.
const PIXELS_PER_LINE: f32 = 100.0;

pub(crate) enum ViewerEvent {
    #[cfg(target_arch = "wasm32")]
    Initialized(Box<Viewer>),
    ModelLoaded {
        url: String,
        document: Document,
    },
    SkyBoxLoaded {
        url: String,
        image: image::RgbaImage,
    },
    BrdfLoaded(image::RgbaImage),
    LoadFailed {
        url: String,
        error: String,
    },
}

impl std::fmt::Debug for ViewerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(target_arch = "wasm32")]
            Self::Initialized(_) => f.write_str("Initialized"),
            Self::ModelLoaded { url, .. } => f.debug_struct("ModelLoaded").field("url", url).finish(),
            Self::SkyBoxLoaded { url, .. } => {
                f.debug_struct("SkyBoxLoaded").field("url", url).finish()
            }
            Self::BrdfLoaded(_) => f.write_str("BrdfLoaded"),
            Self::LoadFailed { url, error } => f
                .debug_struct("LoadFailed")
                .field("url", url)
                .field("error", error)
                .finish(),
        }
    }
}

/// Everything that needs the window's GPU context.
pub(crate) struct Viewer {
    ctx: Context,
    camera: OrbitCamera,
    renderer: ModelRenderer,
    sky_box: SkyBoxRenderer,
    cube_maps: CubeMapBuilder,
    environment: Option<CubeMap>,
    registry: HashMap<String, ModelHandle>,
    current: Option<ModelHandle>,
    cursor: (f32, f32),
    is_surface_configured: bool,
}

impl Viewer {
    async fn new(window: Arc<Window>, config: &ViewerConfig) -> anyhow::Result<Self> {
        let ctx = Context::new(window).await?;
        let fov: Rad<f32> = Deg(config.fov).into();
        let camera = OrbitCamera::new(ctx.config.width, ctx.config.height, fov);
        let renderer = ModelRenderer::new(&ctx.device, &ctx.queue, ctx.config.format);
        let mut sky_box = SkyBoxRenderer::new(&ctx.device, ctx.config.format);
        sky_box.set_fov(fov.0);
        sky_box.set_aspect(camera.aspect());
        let cube_maps = CubeMapBuilder::new(&ctx.device);
        Ok(Self {
            ctx,
            camera,
            renderer,
            sky_box,
            cube_maps,
            environment: None,
            registry: HashMap::new(),
            current: None,
            cursor: (0.0, 0.0),
            is_surface_configured: false,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.ctx.resize(width, height);
        self.camera.resize(width, height);
        self.sky_box.set_aspect(self.camera.aspect());
        self.is_surface_configured = true;
    }

    fn set_sky_box(&mut self, url: &str, image: &image::RgbaImage, size: u32) {
        let size = size.min(self.ctx.device.limits().max_texture_dimension_2d);
        match self.cube_maps.bake(
            &self.ctx.device,
            &self.ctx.queue,
            self.renderer.mipmaps(),
            image,
            size,
        ) {
            Ok(cube_map) => {
                self.sky_box.set_cube_map(&self.ctx.device, &cube_map);
                self.environment = Some(cube_map);
                log::info!("Sky box {} ready", url);
            }
            Err(e) => log::error!("Could not build the environment from {}: {}", url, e),
        }
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        self.ctx.window.request_redraw();

        // Rendering requires the surface to be configured
        if !self.is_surface_configured {
            return Ok(());
        }
        self.camera.update();

        let output = self.ctx.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        self.renderer.begin_frame();
        self.sky_box.prepare(&self.ctx.queue, self.camera.view());
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.ctx.depth_view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            // Nothing is drawn until the first environment exists.
            if let Some(environment) = &self.environment {
                self.sky_box.draw(&mut render_pass);
                if let Some(handle) = self.current {
                    self.renderer.render(
                        &self.ctx.device,
                        &self.ctx.queue,
                        &mut render_pass,
                        handle,
                        self.camera.projection(),
                        self.camera.model_view(),
                        environment,
                    );
                }
            }
        }

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

pub(crate) struct App {
    #[cfg(not(target_arch = "wasm32"))]
    async_runtime: tokio::runtime::Runtime,
    proxy: EventLoopProxy<ViewerEvent>,
    config: ViewerConfig,
    loader: Arc<ModelLoader>,
    fetcher: Arc<AssetFetcher>,
    viewer: Option<Viewer>,
    model_index: usize,
    sky_box_index: usize,
    /// The model that should be on screen once it has loaded.
    requested_model: String,
    loading: HashSet<String>,
}

impl App {
    fn new(event_loop: &EventLoop<ViewerEvent>, config: ViewerConfig) -> anyhow::Result<Self> {
        let proxy = event_loop.create_proxy();
        #[cfg(not(target_arch = "wasm32"))]
        let async_runtime = tokio::runtime::Runtime::new()?;
        let fetcher = Arc::new(AssetFetcher::new(config.asset_root.clone()));
        let loader = Arc::new(ModelLoader::new(fetcher.clone()));
        Ok(Self {
            #[cfg(not(target_arch = "wasm32"))]
            async_runtime,
            proxy,
            model_index: ViewerConfig::catalog_model(&config.model).unwrap_or(config::DEFAULT_MODEL),
            sky_box_index: ViewerConfig::catalog_sky_box(&config.sky_box)
                .unwrap_or(config::DEFAULT_SKY_BOX),
            requested_model: config.model.clone(),
            config,
            loader,
            fetcher,
            viewer: None,
            loading: HashSet::new(),
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        self.async_runtime.spawn(future);
    }

    #[cfg(target_arch = "wasm32")]
    fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        wasm_bindgen_futures::spawn_local(future);
    }

    fn start(&mut self) {
        let model = self.config.model.clone();
        let sky_box = self.config.sky_box.clone();
        self.request_model(&model);
        self.request_sky_box(&sky_box);
        self.request_brdf();
    }

    /// Shows `url`, loading it first unless it was loaded before.
    fn request_model(&mut self, url: &str) {
        self.requested_model = url.to_string();
        if let Some(viewer) = &mut self.viewer
            && let Some(&handle) = viewer.registry.get(url)
        {
            viewer.current = Some(handle);
            return;
        }
        if !self.loading.insert(url.to_string()) {
            return;
        }
        let loader = Arc::clone(&self.loader);
        let proxy = self.proxy.clone();
        let wait_for_textures = self.config.wait_for_textures();
        let url = url.to_string();
        self.spawn(async move {
            match loader.load(&url, wait_for_textures).await {
                Ok(LoadedModel {
                    document,
                    pending_images,
                }) => {
                    send(
                        &proxy,
                        ViewerEvent::ModelLoaded {
                            url: url.clone(),
                            document,
                        },
                    );
                    if let Some(images) = pending_images {
                        images.await;
                        log::info!("All images of {} settled", url);
                    }
                }
                Err(e) => {
                    log::error!("Loading {} failed: {:#}", url, e);
                    send(
                        &proxy,
                        ViewerEvent::LoadFailed {
                            url,
                            error: format!("{:#}", e),
                        },
                    );
                }
            }
        });
    }

    fn request_sky_box(&mut self, url: &str) {
        let fetcher = Arc::clone(&self.fetcher);
        let proxy = self.proxy.clone();
        let url = url.to_string();
        self.spawn(async move {
            let event = match fetch_image(fetcher.as_ref(), &url).await {
                Ok(image) => ViewerEvent::SkyBoxLoaded { url, image },
                Err(e) => {
                    log::error!("Loading sky box {} failed: {}", url, e);
                    ViewerEvent::LoadFailed {
                        url,
                        error: e.to_string(),
                    }
                }
            };
            send(&proxy, event);
        });
    }

    fn request_brdf(&mut self) {
        let fetcher = Arc::clone(&self.fetcher);
        let proxy = self.proxy.clone();
        let url = self.config.brdf.clone();
        self.spawn(async move {
            match fetch_image(fetcher.as_ref(), &url).await {
                Ok(image) => send(&proxy, ViewerEvent::BrdfLoaded(image)),
                Err(e) => log::warn!("Using the default BRDF, {} failed: {}", url, e),
            }
        });
    }

    fn cycle_model(&mut self, step: isize) {
        let count = MODELS.len() as isize;
        self.model_index = (self.model_index as isize + step).rem_euclid(count) as usize;
        let entry = MODELS[self.model_index];
        log::info!("Switching to {}", entry.title);
        self.request_model(entry.url);
    }

    fn cycle_sky_box(&mut self) {
        self.sky_box_index = (self.sky_box_index + 1) % SKY_BOXES.len();
        let entry = SKY_BOXES[self.sky_box_index];
        log::info!("Switching sky box to {}", entry.title);
        self.request_sky_box(entry.url);
    }
}

fn send(proxy: &EventLoopProxy<ViewerEvent>, event: ViewerEvent) {
    if proxy.send_event(event).is_err() {
        log::warn!("Event loop closed before a load completed");
    }
}

impl ApplicationHandler<ViewerEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }
        #[allow(unused_mut)]
        let mut window_attributes = Window::default_attributes().with_title("glTF PBR Viewer");

        #[cfg(target_arch = "wasm32")]
        {
            use wasm_bindgen::JsCast;
            use winit::platform::web::WindowAttributesExtWebSys;

            const CANVAS_ID: &str = "canvas";

            let window = wgpu::web_sys::window().unwrap_throw();
            let document = window.document().unwrap_throw();
            let canvas = document.get_element_by_id(CANVAS_ID).unwrap_throw();
            let html_canvas_element = canvas.unchecked_into();
            window_attributes = window_attributes.with_canvas(Some(html_canvas_element));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Could not create a window: {}", e);
                event_loop.exit();
                return;
            }
        };

        #[cfg(not(target_arch = "wasm32"))]
        {
            let config = self.config.clone();
            match self.async_runtime.block_on(Viewer::new(window, &config)) {
                Ok(mut viewer) => {
                    let size = viewer.ctx.window.inner_size();
                    viewer.resize(size.width, size.height);
                    self.viewer = Some(viewer);
                    self.start();
                }
                Err(e) => {
                    log::error!("Could not set up the GPU: {:#}", e);
                    event_loop.exit();
                }
            }
        }

        #[cfg(target_arch = "wasm32")]
        {
            let proxy = self.proxy.clone();
            let config = self.config.clone();
            wasm_bindgen_futures::spawn_local(async move {
                match Viewer::new(window, &config).await {
                    Ok(viewer) => send(&proxy, ViewerEvent::Initialized(Box::new(viewer))),
                    Err(e) => log::error!("Could not set up the GPU: {:#}", e),
                }
            });
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            #[cfg(target_arch = "wasm32")]
            ViewerEvent::Initialized(viewer) => {
                // This is the message from our wasm `spawn_local`
                let mut viewer = *viewer;
                let size = viewer.ctx.window.inner_size();
                viewer.resize(size.width, size.height);
                viewer.ctx.window.request_redraw();
                self.viewer = Some(viewer);
                self.start();
            }
            ViewerEvent::ModelLoaded { url, document } => {
                self.loading.remove(&url);
                let Some(viewer) = &mut self.viewer else {
                    return;
                };
                let handle = viewer.renderer.register_model(document);
                viewer.registry.insert(url.clone(), handle);
                if url == self.requested_model {
                    viewer.current = Some(handle);
                }
            }
            ViewerEvent::SkyBoxLoaded { url, image } => {
                if let Some(viewer) = &mut self.viewer {
                    viewer.set_sky_box(&url, &image, self.config.cube_map_size);
                }
            }
            ViewerEvent::BrdfLoaded(image) => {
                if let Some(viewer) = &mut self.viewer
                    && let Err(e) =
                        viewer
                            .renderer
                            .set_brdf(&viewer.ctx.device, &viewer.ctx.queue, &image)
                {
                    log::error!("Could not upload the BRDF lookup image: {}", e);
                }
            }
            ViewerEvent::LoadFailed { url, error } => {
                self.loading.remove(&url);
                log::debug!("{} stays unavailable: {}", url, error);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        if self.viewer.is_none() {
            return;
        }
        if let WindowEvent::KeyboardInput { event, .. } = &event {
            if event.state == ElementState::Pressed && !event.repeat {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::KeyN) => self.cycle_model(1),
                    PhysicalKey::Code(KeyCode::KeyP) => self.cycle_model(-1),
                    PhysicalKey::Code(KeyCode::KeyS) => self.cycle_sky_box(),
                    PhysicalKey::Code(KeyCode::Escape) => event_loop.exit(),
                    _ => {}
                }
            }
            return;
        }
        let Some(viewer) = &mut self.viewer else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => viewer.resize(size.width, size.height),
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => {
                    let (x, y) = viewer.cursor;
                    viewer.camera.begin_drag(x, y);
                }
                ElementState::Released => viewer.camera.end_drag(),
            },
            WindowEvent::CursorMoved { position, .. } => {
                viewer.cursor = (position.x as f32, position.y as f32);
                viewer.camera.cursor_moved(position.x as f32, position.y as f32);
            }
            WindowEvent::CursorLeft { .. } => viewer.camera.end_drag(),
            WindowEvent::MouseWheel { delta, .. } => {
                let pixels = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -y * PIXELS_PER_LINE,
                    MouseScrollDelta::PixelDelta(position) => -position.y as f32,
                };
                viewer.camera.scroll(pixels);
            }
            WindowEvent::RedrawRequested => match viewer.render() {
                Ok(()) => {}
                // Reconfigure the surface if it's lost or outdated
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    log::warn!("Surface lost, reconfiguring");
                    viewer.ctx.reconfigure();
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    log::error!("Out of memory, exiting");
                    event_loop.exit();
                }
                Err(e) => log::warn!("Skipped a frame: {}", e),
            },
            _ => {}
        }
    }
}

/// Opens the viewer window and runs until it is closed.
pub fn run(config: ViewerConfig) -> anyhow::Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if let Err(e) = env_logger::try_init() {
            println!("Warning: Could not initialize logger: {}", e);
        };
    }

    #[cfg(target_arch = "wasm32")]
    {
        console_log::init_with_level(log::Level::Info).unwrap_throw();
    }

    let event_loop: EventLoop<ViewerEvent> = EventLoop::with_user_event().build()?;
    let mut app = App::new(&event_loop, config)?;
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn run_web() -> Result<(), JsValue> {
    run(ViewerConfig::default()).map_err(|e| JsValue::from_str(&format!("{:#}", e)))
}
