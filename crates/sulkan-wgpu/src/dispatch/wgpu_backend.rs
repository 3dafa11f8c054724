//! wgpu implementation of the compute backend
//!
//! Compute sources are compiled through the GLSL front end. wgpu tracks
//! image usage per pass, so the layout transitions and the barrier between
//! consecutive dispatches are implied by recording each dispatch in its own
//! compute pass.

use super::backend::{BackendError, ComputeBackend, ImageBinding};

/// Format of every pooled storage image
pub const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Texture usage flags of pooled storage images
pub const IMAGE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::STORAGE_BINDING
    .union(wgpu::TextureUsages::TEXTURE_BINDING)
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST);

/// A compute pipeline and the layout its bind groups are built against
#[derive(Debug)]
pub struct WgpuPipeline {
    label: String,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
}

/// A pooled storage image
#[derive(Debug)]
pub struct WgpuImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl WgpuImage {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// Compute backend recording into a [`wgpu::CommandEncoder`]
#[derive(Debug, Clone)]
pub struct WgpuBackend {
    device: wgpu::Device,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Runs `create` inside a validation error scope
    fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, wgpu::Error> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }
}

impl ComputeBackend for WgpuBackend {
    type Pipeline = WgpuPipeline;
    type Image = WgpuImage;
    type Frame = wgpu::CommandEncoder;

    fn create_pipeline(&mut self, path: &str, source: &str, bindings: &[ImageBinding]) -> Result<Self::Pipeline, BackendError> {
        let module = self
            .scoped(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(path),
                    source: wgpu::ShaderSource::Glsl {
                        shader: source.into(),
                        stage: wgpu::naga::ShaderStage::Compute,
                        defines: Default::default(),
                    },
                })
            })
            .map_err(|e| BackendError::Compile {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let entries = bindings
            .iter()
            .enumerate()
            .map(|(slot, binding)| wgpu::BindGroupLayoutEntry {
                binding: slot as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: if binding.writable { wgpu::StorageTextureAccess::WriteOnly } else { wgpu::StorageTextureAccess::ReadOnly },
                    format: IMAGE_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            })
            .collect::<Vec<_>>();

        let (pipeline, bind_group_layout) = self
            .scoped(|device| {
                let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(path),
                    entries: &entries,
                });
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(path),
                    bind_group_layouts: &[&bind_group_layout],
                    push_constant_ranges: &[],
                });
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(path),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some("main"),
                    compilation_options: Default::default(),
                    cache: None,
                });
                (pipeline, bind_group_layout)
            })
            .map_err(|e| BackendError::Pipeline(e.to_string()))?;

        Ok(WgpuPipeline {
            label: path.to_string(),
            pipeline,
            bind_group_layout,
        })
    }

    fn create_image(&mut self, label: &str, width: u32, height: u32) -> Result<Self::Image, BackendError> {
        let texture = self
            .scoped(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: IMAGE_FORMAT,
                    usage: IMAGE_USAGE,
                    view_formats: &[],
                })
            })
            .map_err(|e| BackendError::Image {
                label: label.to_string(),
                message: e.to_string(),
            })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuImage { texture, view })
    }

    fn image_extent(&self, image: &Self::Image) -> (u32, u32) {
        (image.texture.width(), image.texture.height())
    }

    fn dispatch(&mut self, frame: &mut Self::Frame, pipeline: &Self::Pipeline, images: &[&Self::Image], groups: [u32; 3]) -> Result<(), BackendError> {
        let entries = images
            .iter()
            .enumerate()
            .map(|(slot, image)| wgpu::BindGroupEntry {
                binding: slot as u32,
                resource: wgpu::BindingResource::TextureView(&image.view),
            })
            .collect::<Vec<_>>();
        let bind_group = self
            .scoped(|device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&pipeline.label),
                    layout: &pipeline.bind_group_layout,
                    entries: &entries,
                })
            })
            .map_err(|e| BackendError::Dispatch(e.to_string()))?;

        let mut compute_pass = frame.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(&pipeline.label),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline.pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), BackendError> {
        self.device.poll(wgpu::PollType::Wait).map(|_| ()).map_err(|e| BackendError::Idle(e.to_string()))
    }
}
