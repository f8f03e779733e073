// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use ash::vk;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use vkstart::handle::{FramebufferHandle, RenderPassHandle};
use vkstart::renderpass::present_color_attachment;
use vkstart::{
    create_framebuffers, create_renderpass, AnyGraphicsDevice, Context, HeadlessSurface,
    InitOptions, RenderpassData, StartupConfig, WindowSurface,
};
use vkstart_core::init_tracing;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

const SURFACE_ID: &str = "main";
const DEFAULT_CONFIG: &str = "vkstart.toml";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Bootstraps a Vulkan context and reports what it negotiated",
    long_about = None
)]
struct Args {
    /// Config file (defaults to ./vkstart.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Mode::Window)]
    mode: Mode,
    /// Request the Khronos validation layer
    #[arg(long)]
    validation: bool,
    /// Accept any device with a graphics queue, software rasterizers included
    #[arg(long)]
    any_device: bool,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Open a window and keep the swapchain sized to it
    Window,
    /// Offscreen surface via VK_EXT_headless_surface
    Headless,
    /// No surfaces at all
    None,
}

fn load_options(args: &Args) -> Result<InitOptions> {
    let cfg = match &args.config {
        Some(path) => StartupConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            StartupConfig::load(DEFAULT_CONFIG).unwrap_or_else(|e| {
                warn!("{DEFAULT_CONFIG}: {e}; using defaults");
                StartupConfig::default()
            })
        }
        None => StartupConfig::default(),
    };

    let mut options = cfg.into_options().context("config")?;
    options.enable_validation |= args.validation;
    if args.any_device {
        options = options.with_device_selection(AnyGraphicsDevice);
    }
    Ok(options)
}

/// Render pass and framebuffers for the "main" swapchain, dropped before
/// the context.
struct Targets {
    framebuffers: Vec<FramebufferHandle>,
    render_pass: RenderPassHandle,
    ctx: Context,
}

impl Targets {
    fn new(ctx: Context) -> Result<Self> {
        let mut targets = Targets {
            framebuffers: Vec::new(),
            render_pass: RenderPassHandle::default(),
            ctx,
        };
        targets.rebuild()?;
        Ok(targets)
    }

    fn rebuild(&mut self) -> Result<()> {
        self.framebuffers.clear();
        self.render_pass.destroy();

        let Some(sc) = self.ctx.swapchain(SURFACE_ID) else {
            return Ok(());
        };
        let Some(details) = sc.details().filter(|_| sc.is_presentable()) else {
            warn!(surface = SURFACE_ID, "surface is not presentable; no render targets");
            return Ok(());
        };

        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let data = RenderpassData {
            color_attachments: vec![present_color_attachment(details.format.format)],
            subpasses: vec![vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_ref)],
            ..Default::default()
        };

        let device = self.ctx.device();
        self.render_pass = create_renderpass(device, &data, true)?;
        self.framebuffers = create_framebuffers(
            device,
            self.render_pass.raw(),
            &sc.image_views(),
            &[],
            details.extent,
        )?;
        info!(framebuffers = self.framebuffers.len(), "render targets ready");
        Ok(())
    }

    fn resize(&mut self, extent: vk::Extent2D) -> Result<()> {
        // Framebuffers reference the views the recreation is about to destroy.
        self.framebuffers.clear();
        self.ctx.recreate_swapchain(SURFACE_ID, extent)?;
        self.rebuild()
    }
}

fn log_summary(ctx: &Context) {
    let info = ctx.physical_device();
    info!(
        device = %info.name,
        kind = ?info.properties.device_type,
        depth = ?info.depth_format,
        stencil = info.depth_has_stencil,
        validation = ctx.debug_enabled(),
        "context summary"
    );
    for (role, q) in ctx.queues() {
        info!(?role, family = q.family_index, "queue");
    }
    for sc in ctx.swapchains() {
        match sc.details() {
            Some(d) => info!(
                surface = sc.id(),
                format = ?d.format.format,
                present_mode = ?d.present_mode,
                width = d.extent.width,
                height = d.extent.height,
                images = sc.image_count(),
                "swapchain"
            ),
            None => info!(surface = sc.id(), "surface without swapchain"),
        }
    }
}

fn run_offscreen(mut options: InitOptions, mode: Mode, extent: vk::Extent2D) -> Result<()> {
    if mode == Mode::Headless {
        options = options.with_surface(HeadlessSurface::new(SURFACE_ID, extent));
    }
    let ctx = Context::new(options).context("bootstrap")?;
    log_summary(&ctx);
    let targets = Targets::new(ctx)?;
    targets.ctx.wait_idle()?;
    Ok(())
}

struct App {
    options: Option<InitOptions>,
    extent: vk::Extent2D,
    // Dropped before the window it draws into.
    targets: Option<Targets>,
    window: Option<Window>,
    failure: Option<anyhow::Error>,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Some(options) = self.options.take() else {
            return Ok(());
        };
        let window = event_loop.create_window(
            Window::default_attributes()
                .with_title("vkstart probe")
                .with_inner_size(PhysicalSize::new(self.extent.width, self.extent.height)),
        )?;
        let size = window.inner_size();
        self.extent = vk::Extent2D {
            width: size.width.max(1),
            height: size.height.max(1),
        };

        // SAFETY: `targets` (and the context inside it) is dropped before
        // `window`; see the field order of `App`.
        let surface = unsafe { WindowSurface::new(SURFACE_ID, &window, self.extent) }?;
        let ctx = Context::new(options.with_surface(surface)).context("bootstrap")?;
        log_summary(&ctx);

        self.window = Some(window);
        self.targets = Some(Targets::new(ctx)?);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.failure = Some(e);
        self.targets = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Err(e) = self.start(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.targets = None;
                self.window = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    info!("minimized; keeping current swapchain");
                    return;
                }
                self.extent = vk::Extent2D {
                    width: size.width,
                    height: size.height,
                };
                if let Some(targets) = &mut self.targets {
                    if let Err(e) = targets.resize(self.extent) {
                        self.fail(event_loop, e);
                        return;
                    }
                    info!(width = size.width, height = size.height, "swapchain recreated");
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    init_tracing("info,vkstart=debug");
    let args = Args::parse();
    let options = load_options(&args)?;
    let extent = vk::Extent2D {
        width: args.width.max(1),
        height: args.height.max(1),
    };

    if args.mode != Mode::Window {
        return run_offscreen(options, args.mode, extent);
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        options: Some(options),
        extent,
        targets: None,
        window: None,
        failure: None,
    };
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
