//! wgpu device, queue, and compute pipeline table.

use std::sync::Arc;
use std::sync::mpsc;

use wgpu::util::DeviceExt;

use guided_core::{FilterError, FilterResult};

use crate::shaders;

/// The fixed pipeline set; one entry per shader source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    InclusiveScan,
    AddGroupSums,
    Transpose,
    BoxFilterSat,
    BoxFilter,
    Mult,
    Pown,
    GfAb,
    GfVarIp,
    GfAbIp,
    GfQ,
    SeparateRgbFloat,
    SeparateRgbUchar,
    CombineRgbFloat,
    CombineRgbUchar,
    DepthToFloat,
}

struct Pipelines {
    inclusive_scan: wgpu::ComputePipeline,
    add_group_sums: wgpu::ComputePipeline,
    transpose: wgpu::ComputePipeline,
    box_filter_sat: wgpu::ComputePipeline,
    box_filter: wgpu::ComputePipeline,
    mult: wgpu::ComputePipeline,
    pown: wgpu::ComputePipeline,
    gf_ab: wgpu::ComputePipeline,
    gf_var_ip: wgpu::ComputePipeline,
    gf_ab_ip: wgpu::ComputePipeline,
    gf_q: wgpu::ComputePipeline,
    separate_rgb_float: wgpu::ComputePipeline,
    separate_rgb_uchar: wgpu::ComputePipeline,
    combine_rgb_float: wgpu::ComputePipeline,
    combine_rgb_uchar: wgpu::ComputePipeline,
    depth_to_float: wgpu::ComputePipeline,
}

/// GPU context holding device, queue, and the compiled pipelines.
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    pipelines: Pipelines,
}

impl GpuContext {
    /// Check if a compute-capable adapter is present.
    pub fn is_available() -> bool {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .is_some()
        })
    }

    /// Create a context with default settings.
    pub fn new() -> FilterResult<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> FilterResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(FilterError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("guided_gpu_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| FilterError::DeviceCreation(e.to_string()))?;

        let pipelines = create_pipelines(&device);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            limits,
            pipelines,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.adapter_info.name
    }

    pub fn max_workgroup_size(&self) -> u32 {
        self.limits.max_compute_invocations_per_workgroup
    }

    /// Create a storage buffer usable as kernel input and output.
    /// Sizes round up to whole words.
    pub fn create_buffer(&self, bytes: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("storage_buffer"),
            size: bytes.div_ceil(4) * 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Queue-ordered upload; `data` need not be word-aligned.
    pub fn upload(&self, buf: &wgpu::Buffer, data: &[u8]) {
        if data.len() % 4 == 0 {
            self.queue.write_buffer(buf, 0, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(data.len().div_ceil(4) * 4, 0);
            self.queue.write_buffer(buf, 0, &padded);
        }
    }

    /// Blocking download through a staging buffer.
    pub fn download(&self, buf: &wgpu::Buffer, out: &mut [u8]) -> FilterResult<()> {
        let size = (out.len().div_ceil(4) * 4) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(buf, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| FilterError::OperationFailed("map channel closed".into()))?
            .map_err(|e| FilterError::OperationFailed(format!("map failed: {e}")))?;

        let data = slice.get_mapped_range();
        out.copy_from_slice(&data[..out.len()]);
        drop(data);
        staging.unmap();
        Ok(())
    }

    /// Record and submit one dispatch. `params` is the raw 32-byte
    /// uniform block; `buffers` bind at 1..=n in order. Non-blocking.
    pub fn dispatch(
        &self,
        kind: PipelineKind,
        params: [u32; 8],
        buffers: &[&wgpu::Buffer],
        groups: [u32; 3],
    ) -> wgpu::SubmissionIndex {
        let pipeline = self.pipeline(kind);

        let params_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("params_uniform"),
                contents: bytemuck::cast_slice(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let layout = pipeline.get_bind_group_layout(0);
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: params_buf.as_entire_binding(),
        }];
        for (i, buf) in buffers.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: buf.as_entire_binding(),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("dispatch_bind_group"),
            layout: &layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("compute_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("compute_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }
        self.queue.submit(std::iter::once(encoder.finish()))
    }

    /// Block until all submitted work has completed.
    pub fn wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    fn pipeline(&self, kind: PipelineKind) -> &wgpu::ComputePipeline {
        match kind {
            PipelineKind::InclusiveScan => &self.pipelines.inclusive_scan,
            PipelineKind::AddGroupSums => &self.pipelines.add_group_sums,
            PipelineKind::Transpose => &self.pipelines.transpose,
            PipelineKind::BoxFilterSat => &self.pipelines.box_filter_sat,
            PipelineKind::BoxFilter => &self.pipelines.box_filter,
            PipelineKind::Mult => &self.pipelines.mult,
            PipelineKind::Pown => &self.pipelines.pown,
            PipelineKind::GfAb => &self.pipelines.gf_ab,
            PipelineKind::GfVarIp => &self.pipelines.gf_var_ip,
            PipelineKind::GfAbIp => &self.pipelines.gf_ab_ip,
            PipelineKind::GfQ => &self.pipelines.gf_q,
            PipelineKind::SeparateRgbFloat => &self.pipelines.separate_rgb_float,
            PipelineKind::SeparateRgbUchar => &self.pipelines.separate_rgb_uchar,
            PipelineKind::CombineRgbFloat => &self.pipelines.combine_rgb_float,
            PipelineKind::CombineRgbUchar => &self.pipelines.combine_rgb_uchar,
            PipelineKind::DepthToFloat => &self.pipelines.depth_to_float,
        }
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("device", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}

fn create_pipelines(device: &wgpu::Device) -> Pipelines {
    let create = |source: &str, label: &str| -> wgpu::ComputePipeline {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: None,
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        })
    };

    Pipelines {
        inclusive_scan: create(shaders::INCLUSIVE_SCAN, "inclusive_scan"),
        add_group_sums: create(shaders::ADD_GROUP_SUMS, "add_group_sums"),
        transpose: create(shaders::TRANSPOSE, "transpose"),
        box_filter_sat: create(shaders::BOX_FILTER_SAT, "box_filter_sat"),
        box_filter: create(shaders::BOX_FILTER, "box_filter"),
        mult: create(shaders::MULT, "mult"),
        pown: create(shaders::POWN, "pown"),
        gf_ab: create(shaders::GF_AB, "gf_ab"),
        gf_var_ip: create(shaders::GF_VAR_IP, "gf_var_ip"),
        gf_ab_ip: create(shaders::GF_AB_IP, "gf_ab_ip"),
        gf_q: create(shaders::GF_Q, "gf_q"),
        separate_rgb_float: create(shaders::SEPARATE_RGB_FLOAT, "separate_rgb_float"),
        separate_rgb_uchar: create(shaders::SEPARATE_RGB_UCHAR, "separate_rgb_uchar"),
        combine_rgb_float: create(shaders::COMBINE_RGB_FLOAT, "combine_rgb_float"),
        combine_rgb_uchar: create(shaders::COMBINE_RGB_UCHAR, "combine_rgb_uchar"),
        depth_to_float: create(shaders::DEPTH_TO_FLOAT, "depth_to_float"),
    }
}
