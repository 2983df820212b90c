//! Device-backed end-to-end tests.
//!
//! Every test brings the stack up over the headless backend and skips
//! cleanly when no Vulkan driver or device is available (CI without a GPU).

use velum_graphics::vk;
use velum_graphics::{
    App, AttachmentKind, Barrier, Bindings, Buffer, BufferRegions, Commands, Compute,
    Fences, Framebuffers, Gpu, Graphics, Headless, Images, QueueType, Renderpass, Semaphores,
    Submit,
};

const TEST_WIDTH: u32 = 640;
const TEST_HEIGHT: u32 = 480;
const TEST_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

fn shader_path(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn test_app() -> Option<App> {
    let _ = env_logger::builder().is_test(true).try_init();
    match App::with_validation(Box::new(Headless), false) {
        Ok(app) => Some(app),
        Err(err) => {
            eprintln!("skipping GPU test: {err}");
            None
        }
    }
}

macro_rules! require_app {
    () => {
        match test_app() {
            Some(app) => app,
            None => return,
        }
    };
}

fn render_gpu(app: &App) -> Gpu {
    let mut config = app.gpu(0).unwrap();
    config.queue(QueueType::RENDER).unwrap();
    config.create(None).unwrap()
}

fn compute_gpu(app: &App) -> Gpu {
    let mut config = app.gpu(0).unwrap();
    config.queue(QueueType::COMPUTE).unwrap();
    config.create(None).unwrap()
}

fn storage_buffer(gpu: &Gpu, size: u64) -> Buffer {
    let mut buffer = Buffer::new(gpu);
    buffer.size(size, 0).unwrap();
    buffer
        .usage(
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
        )
        .unwrap();
    buffer
        .memory(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
        .unwrap();
    buffer.queue_access(0).unwrap();
    buffer.create().unwrap();
    buffer
}

fn storage_bindings(gpu: &Gpu, regions: BufferRegions) -> Bindings {
    let mut bindings = Bindings::new(gpu);
    bindings.slot(0, vk::DescriptorType::STORAGE_BUFFER).unwrap();
    bindings.create(1).unwrap();
    bindings.buffer(0, regions).unwrap();
    bindings.update().unwrap();
    bindings
}

#[test]
fn gpu_with_queue_unions() {
    let app = require_app!();
    let mut config = app.gpu(0).unwrap();
    config.queue(QueueType::TRANSFER).unwrap();
    config.queue(QueueType::GRAPHICS | QueueType::COMPUTE).unwrap();
    config.queue(QueueType::COMPUTE).unwrap();
    let gpu = config.create(None).unwrap();
    assert_eq!(gpu.queue_count(), 3);
    assert_eq!(gpu.find_queue(QueueType::RENDER), Some(1));
    gpu.wait_idle().unwrap();
}

#[test]
fn gpu_without_queues_is_rejected() {
    let app = require_app!();
    let config = app.gpu(0).unwrap();
    assert!(config.create(None).is_err());
}

#[test]
fn commands_lifecycle() {
    let app = require_app!();
    let gpu = render_gpu(&app);
    let mut commands = Commands::new(&gpu, 0, 3).unwrap();
    for idx in 0..3 {
        commands.begin(idx).unwrap();
        commands.end(idx).unwrap();
    }
    commands.reset_all().unwrap();
    commands.free();
}

#[test]
fn buffer_round_trip() {
    let app = require_app!();
    let gpu = render_gpu(&app);

    let size = 256u64;
    let buffer = storage_buffer(&gpu, size);

    let data: Vec<u8> = (0..size as usize).map(|i| i as u8).collect();
    buffer.upload(0, &data).unwrap();

    let mut out = vec![0u8; size as usize];
    buffer.download(0, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn buffer_range_is_checked() {
    let app = require_app!();
    let gpu = render_gpu(&app);
    let buffer = storage_buffer(&gpu, 16);
    assert!(buffer.upload(8, &[0u8; 16]).is_err());
}

#[test]
fn compute_doubling() {
    let app = require_app!();
    let gpu = compute_gpu(&app);

    let n = 20usize;
    let size = (n * std::mem::size_of::<f32>()) as u64;
    let buffer = storage_buffer(&gpu, size);

    let data: Vec<f32> = (0..n).map(|i| i as f32).collect();
    buffer.upload(0, &data).unwrap();

    let regions = BufferRegions::new(&buffer, 1, size, &[]).unwrap();
    let bindings = storage_bindings(&gpu, regions);

    let mut compute = Compute::new(&gpu, shader_path("double.comp.spv"));
    compute.bindings(&bindings).unwrap();
    compute.create().unwrap();

    let commands = Commands::new(&gpu, 0, 1).unwrap();
    commands.begin(0).unwrap();
    commands.bind_compute(0, &compute, &bindings, 0).unwrap();
    commands.dispatch(0, n as u32, 1, 1).unwrap();
    commands.end(0).unwrap();
    commands.submit_sync(0).unwrap();

    let mut out = vec![0f32; n];
    buffer.download(0, &mut out).unwrap();
    for i in 0..n {
        assert_eq!(out[i], 2.0 * data[i]);
    }
}

/// A bound resource count other than 1 or dset_count is an error, whether
/// the reference was stored before or after create().
#[test]
fn binding_count_mismatch_is_rejected() {
    let app = require_app!();
    let gpu = compute_gpu(&app);
    let buffer = storage_buffer(&gpu, 64);
    let regions = BufferRegions::new(&buffer, 3, 16, &[0, 16, 32]).unwrap();

    // Bound early: rejected once the set count is known.
    let mut bindings = Bindings::new(&gpu);
    bindings.slot(0, vk::DescriptorType::STORAGE_BUFFER).unwrap();
    bindings.buffer(0, regions.clone()).unwrap();
    assert!(bindings.create(2).is_err());

    // Bound late: rejected on the spot.
    let mut bindings = Bindings::new(&gpu);
    bindings.slot(0, vk::DescriptorType::STORAGE_BUFFER).unwrap();
    bindings.create(2).unwrap();
    assert!(bindings.buffer(0, regions).is_err());
}

#[test]
fn compute_without_bindings_is_rejected() {
    let app = require_app!();
    let gpu = compute_gpu(&app);
    let mut compute = Compute::new(&gpu, shader_path("double.comp.spv"));
    assert!(compute.create().is_err());
}

/// Two compute pipelines chained with a semaphore: x -> 2x -> 2x + 1.
#[test]
fn pipelined_compute_ordering() {
    let app = require_app!();
    let gpu = compute_gpu(&app);

    let n = 20usize;
    let size = (n * std::mem::size_of::<f32>()) as u64;
    let buffer = storage_buffer(&gpu, size);

    let data: Vec<f32> = (0..n).map(|i| i as f32).collect();
    buffer.upload(0, &data).unwrap();

    let regions = BufferRegions::new(&buffer, 1, size, &[]).unwrap();
    let bindings1 = storage_bindings(&gpu, regions.clone());
    let bindings2 = storage_bindings(&gpu, regions);

    let mut double = Compute::new(&gpu, shader_path("double.comp.spv"));
    double.bindings(&bindings1).unwrap();
    double.create().unwrap();

    let mut add_one = Compute::new(&gpu, shader_path("add_one.comp.spv"));
    add_one.bindings(&bindings2).unwrap();
    add_one.create().unwrap();

    let cmds1 = Commands::new(&gpu, 0, 1).unwrap();
    cmds1.begin(0).unwrap();
    cmds1.bind_compute(0, &double, &bindings1, 0).unwrap();
    cmds1.dispatch(0, n as u32, 1, 1).unwrap();
    cmds1.end(0).unwrap();

    let cmds2 = Commands::new(&gpu, 0, 1).unwrap();
    cmds2.begin(0).unwrap();
    cmds2.bind_compute(0, &add_one, &bindings2, 0).unwrap();
    cmds2.dispatch(0, n as u32, 1, 1).unwrap();
    cmds2.end(0).unwrap();

    let semaphores = Semaphores::new(&gpu, 1).unwrap();

    let mut submit1 = Submit::new();
    submit1.commands(&cmds1, 0).unwrap();
    submit1.signal(&semaphores, 0).unwrap();
    submit1.send(&gpu, 0, None).unwrap();

    let mut submit2 = Submit::new();
    submit2.commands(&cmds2, 0).unwrap();
    submit2
        .wait(&semaphores, 0, vk::PipelineStageFlags::COMPUTE_SHADER)
        .unwrap();
    submit2.send(&gpu, 0, None).unwrap();

    gpu.wait_idle().unwrap();

    let mut out = vec![0f32; n];
    buffer.download(0, &mut out).unwrap();
    for i in 0..n {
        assert_eq!(out[i], 2.0 * i as f32 + 1.0);
    }
}

#[test]
fn submit_signals_fence() {
    let app = require_app!();
    let gpu = compute_gpu(&app);
    let cmds = Commands::new(&gpu, 0, 1).unwrap();
    cmds.begin(0).unwrap();
    cmds.end(0).unwrap();

    let fences = Fences::new(&gpu, 1, false).unwrap();
    let mut submit = Submit::new();
    submit.commands(&cmds, 0).unwrap();
    submit.send(&gpu, 0, Some((&fences, 0))).unwrap();
    fences.wait(0).unwrap();
    assert!(fences.is_signaled(0).unwrap());
}

/// Offscreen color target + renderpass clearing to the given color, with the
/// attachment left in TRANSFER_SRC layout for readback.
fn offscreen_target(gpu: &Gpu, clear: [f32; 4]) -> (Renderpass, Framebuffers, Images) {
    let mut images = Images::new(gpu, vk::ImageType::TYPE_2D, 1);
    images.format(TEST_FORMAT).unwrap();
    images.size(TEST_WIDTH, TEST_HEIGHT, 1).unwrap();
    images
        .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
        .unwrap();
    images.queue_access(0).unwrap();
    images.create().unwrap();

    let mut renderpass = Renderpass::new(gpu);
    renderpass.clear(vk::ClearValue {
        color: vk::ClearColorValue { float32: clear },
    });
    renderpass
        .attachment(
            0,
            AttachmentKind::Color,
            TEST_FORMAT,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
    renderpass
        .attachment_layout(
            0,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )
        .unwrap();
    renderpass
        .attachment_ops(
            0,
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::STORE,
        )
        .unwrap();
    renderpass.subpass(0, &[0]).unwrap();
    renderpass.dependency(0, vk::SUBPASS_EXTERNAL, 0).unwrap();
    renderpass
        .dependency_stages(
            0,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )
        .unwrap();
    renderpass
        .dependency_access(
            0,
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
        .unwrap();
    renderpass.create().unwrap();

    let mut framebuffers = Framebuffers::new(gpu);
    framebuffers.attachment(0, &images).unwrap();
    framebuffers.create(&renderpass).unwrap();

    (renderpass, framebuffers, images)
}

/// Copies the rendered attachment into a linear staging image and downloads
/// the pixels (4 bytes per pixel, B8G8R8A8 order).
fn read_back(gpu: &Gpu, images: &Images) -> Vec<u8> {
    let mut staging = Images::new(gpu, vk::ImageType::TYPE_2D, 1);
    staging.format(TEST_FORMAT).unwrap();
    staging.size(TEST_WIDTH, TEST_HEIGHT, 1).unwrap();
    staging.tiling(vk::ImageTiling::LINEAR).unwrap();
    staging.usage(vk::ImageUsageFlags::TRANSFER_DST).unwrap();
    staging
        .memory(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
        .unwrap();
    staging.create().unwrap();

    let cmds = Commands::new(gpu, 0, 1).unwrap();
    cmds.begin(0).unwrap();
    let to_dst = Barrier::new()
        .stages(
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )
        .images(&staging)
        .images_layout(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .images_access(vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE);
    cmds.barrier(0, &to_dst).unwrap();
    cmds.copy_image(0, images, 0, &staging, 0).unwrap();
    let to_host = Barrier::new()
        .stages(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
        )
        .images(&staging)
        .images_layout(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::GENERAL,
        )
        .images_access(vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::HOST_READ);
    cmds.barrier(0, &to_host).unwrap();
    cmds.end(0).unwrap();
    cmds.submit_sync(0).unwrap();

    let mut rgba = vec![0u8; (TEST_WIDTH * TEST_HEIGHT * 4) as usize];
    staging.download(0, &mut rgba).unwrap();
    rgba
}

#[test]
fn blank_canvas_clear_color() {
    let app = require_app!();
    let gpu = render_gpu(&app);
    let (renderpass, framebuffers, images) = offscreen_target(&gpu, [0.4, 0.6, 0.8, 1.0]);

    let cmds = Commands::new(&gpu, 0, 1).unwrap();
    cmds.begin(0).unwrap();
    cmds.begin_renderpass(0, &renderpass, &framebuffers).unwrap();
    cmds.end_renderpass(0).unwrap();
    cmds.end(0).unwrap();
    cmds.submit_sync(0).unwrap();

    let rgba = read_back(&gpu, &images);
    for pixel in rgba.chunks_exact(4) {
        // Clear components 0.4/0.6/0.8 are all >= 100 in 8-bit terms.
        assert!(pixel[0] >= 100 && pixel[1] >= 100 && pixel[2] >= 100);
    }
}

#[test]
fn triangle_barycentre_color() {
    let app = require_app!();
    let gpu = render_gpu(&app);
    let (renderpass, framebuffers, images) = offscreen_target(&gpu, [0.0, 0.0, 0.0, 1.0]);

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Vertex {
        pos: [f32; 3],
        color: [f32; 4],
    }
    let vertices = [
        Vertex {
            pos: [-1.0, 1.0, 0.0],
            color: [1.0, 0.0, 0.0, 1.0],
        },
        Vertex {
            pos: [1.0, 1.0, 0.0],
            color: [0.0, 1.0, 0.0, 1.0],
        },
        Vertex {
            pos: [0.0, -1.0, 0.0],
            color: [0.0, 0.0, 1.0, 1.0],
        },
    ];
    let size = std::mem::size_of_val(&vertices) as u64;

    let mut buffer = Buffer::new(&gpu);
    buffer.size(size, std::mem::size_of::<Vertex>() as u64).unwrap();
    buffer.usage(vk::BufferUsageFlags::VERTEX_BUFFER).unwrap();
    buffer
        .memory(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
        .unwrap();
    buffer.create().unwrap();
    buffer.upload(0, &vertices).unwrap();
    let regions = BufferRegions::new(&buffer, 1, size, &[]).unwrap();

    let mut bindings = Bindings::new(&gpu);
    bindings.create(1).unwrap();
    bindings.update().unwrap();

    let mut graphics = Graphics::new(&gpu);
    graphics.renderpass(&renderpass, 0).unwrap();
    graphics
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .unwrap();
    graphics.polygon_mode(vk::PolygonMode::FILL).unwrap();
    graphics
        .shader(
            vk::ShaderStageFlags::VERTEX,
            shader_path("passthrough.vert.spv"),
        )
        .unwrap();
    graphics
        .shader(
            vk::ShaderStageFlags::FRAGMENT,
            shader_path("color.frag.spv"),
        )
        .unwrap();
    graphics
        .vertex_binding(0, std::mem::size_of::<Vertex>() as u64)
        .unwrap();
    graphics
        .vertex_attr(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
        .unwrap();
    graphics
        .vertex_attr(0, 1, vk::Format::R32G32B32A32_SFLOAT, 12)
        .unwrap();
    graphics.bindings(&bindings).unwrap();
    graphics.create().unwrap();

    let cmds = Commands::new(&gpu, 0, 1).unwrap();
    cmds.begin(0).unwrap();
    cmds.begin_renderpass(0, &renderpass, &framebuffers).unwrap();
    cmds.viewport(
        0,
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: TEST_WIDTH as f32,
            height: TEST_HEIGHT as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
    )
    .unwrap();
    cmds.bind_vertex_buffer(0, &regions, 0).unwrap();
    cmds.bind_graphics(0, &graphics, &bindings, 0).unwrap();
    cmds.draw(0, 0, 3).unwrap();
    cmds.end_renderpass(0).unwrap();
    cmds.end(0).unwrap();
    cmds.submit_sync(0).unwrap();

    let rgba = read_back(&gpu, &images);
    // The barycentre (0, +1/3 in NDC) maps to pixel (320, 320); the
    // interpolated color there is the mean of the three vertex colors.
    let x = (TEST_WIDTH / 2) as usize;
    let y = (TEST_HEIGHT * 2 / 3) as usize;
    let pixel = &rgba[(y * TEST_WIDTH as usize + x) * 4..][..4];
    for channel in &pixel[..3] {
        assert!(
            (*channel as i32 - 85).abs() <= 3,
            "barycentre channel {channel} differs from 85"
        );
    }
}

/// P10: after rebinding a buffer and calling update(), dispatches read the
/// new reference.
#[test]
fn descriptor_rebind_update() {
    let app = require_app!();
    let gpu = compute_gpu(&app);

    let n = 8usize;
    let size = (n * std::mem::size_of::<f32>()) as u64;
    let buffer_a = storage_buffer(&gpu, size);
    let buffer_b = storage_buffer(&gpu, size);

    let ones = vec![1.0f32; n];
    let twos = vec![2.0f32; n];
    buffer_a.upload(0, &ones).unwrap();
    buffer_b.upload(0, &twos).unwrap();

    let regions_a = BufferRegions::new(&buffer_a, 1, size, &[]).unwrap();
    let regions_b = BufferRegions::new(&buffer_b, 1, size, &[]).unwrap();

    let mut bindings = storage_bindings(&gpu, regions_a);
    let mut compute = Compute::new(&gpu, shader_path("double.comp.spv"));
    compute.bindings(&bindings).unwrap();
    compute.create().unwrap();

    let cmds = Commands::new(&gpu, 0, 1).unwrap();
    let run = |cmds: &Commands, bindings: &Bindings| {
        cmds.reset(0).unwrap();
        cmds.begin(0).unwrap();
        cmds.bind_compute(0, &compute, bindings, 0).unwrap();
        cmds.dispatch(0, n as u32, 1, 1).unwrap();
        cmds.end(0).unwrap();
        cmds.submit_sync(0).unwrap();
    };

    run(&cmds, &bindings);

    // Rebind to buffer B; the set must be reconciled before the next use.
    bindings.buffer(0, regions_b).unwrap();
    bindings.update().unwrap();
    run(&cmds, &bindings);

    let mut out_a = vec![0f32; n];
    let mut out_b = vec![0f32; n];
    buffer_a.download(0, &mut out_a).unwrap();
    buffer_b.download(0, &mut out_b).unwrap();
    assert_eq!(out_a, vec![2.0f32; n]);
    assert_eq!(out_b, vec![4.0f32; n]);
}

#[test]
fn images_and_sampler() {
    let app = require_app!();
    let gpu = render_gpu(&app);

    let mut images = Images::new(&gpu, vk::ImageType::TYPE_2D, 1);
    images.format(vk::Format::R8G8B8A8_UNORM).unwrap();
    images.size(16, 16, 1).unwrap();
    images.usage(vk::ImageUsageFlags::SAMPLED).unwrap();
    images.queue_access(0).unwrap();
    images.create().unwrap();

    let mut sampler = velum_graphics::Sampler::new(&gpu);
    sampler.min_filter(vk::Filter::LINEAR).unwrap();
    sampler.mag_filter(vk::Filter::LINEAR).unwrap();
    sampler
        .address_mode(
            velum_graphics::TextureAxis::U,
            vk::SamplerAddressMode::CLAMP_TO_EDGE,
        )
        .unwrap();
    sampler.create().unwrap();
    // Setters after create are rejected.
    assert!(sampler.min_filter(vk::Filter::NEAREST).is_err());
}

#[test]
fn barrier_buffer_to_image_upload() {
    let app = require_app!();
    let gpu = render_gpu(&app);

    let img_size = 16u32;
    let mut images = Images::new(&gpu, vk::ImageType::TYPE_2D, 1);
    images.format(vk::Format::R8G8B8A8_UNORM).unwrap();
    images.size(img_size, img_size, 1).unwrap();
    images
        .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_DST)
        .unwrap();
    images.queue_access(0).unwrap();
    images.create().unwrap();

    let size = (img_size * img_size * 4) as u64;
    let mut staging = Buffer::new(&gpu);
    staging.size(size, 0).unwrap();
    staging.usage(vk::BufferUsageFlags::TRANSFER_SRC).unwrap();
    staging
        .memory(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
        .unwrap();
    staging.create().unwrap();
    let data: Vec<u8> = (0..size as usize).map(|i| (i % 256) as u8).collect();
    staging.upload(0, &data).unwrap();

    let barrier = Barrier::new()
        .stages(
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )
        .images(&images)
        .images_layout(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .images_access(vk::AccessFlags::empty(), vk::AccessFlags::TRANSFER_WRITE);

    let cmds = Commands::new(&gpu, 0, 1).unwrap();
    cmds.begin(0).unwrap();
    cmds.barrier(0, &barrier).unwrap();
    cmds.copy_buffer_to_image(0, &staging, &images, 0).unwrap();
    cmds.end(0).unwrap();
    cmds.submit_sync(0).unwrap();
}
