//! Programs and kernel instances for the scale shader.
//!
//! A [`GpuProgram`] owns the compiled shader module, its bind group
//! layout and the compute pipeline for the `scal` entry point.  Binding
//! a kernel creates the per-lane uniform and bind group and fixes the
//! workgroup grid, so that launching a lane only records and submits a
//! single compute pass.

use std::num::NonZeroU64;
use std::path::PathBuf;

use bytemuck::{Pod, Zeroable};
use wgpu::{self, util::DeviceExt, ShaderModuleDescriptor, ShaderSource};

use crate::device::KernelArgs;
use crate::error::DeviceError;
use crate::kernel::ENTRY_POINT;

use super::{buffer::GpuBuffer, context::GpuContext};

/// Invocations per workgroup; must match `@workgroup_size` in the shader.
pub const WORKGROUP_SIZE: u32 = 64;

/// Uniform block of the scale shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Zeroable, Pod)]
struct Params {
    n: u32,
    row_stride: u32,
    scale: f32,
    _pad: u32,
}

/// A compiled scale program.
pub struct GpuProgram {
    pub path: Option<PathBuf>,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// One lane's kernel instance.
pub struct GpuKernel {
    pub label: String,
    pub groups: (u32, u32),
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    _params: wgpu::Buffer,
}

/// Calculate an (x, y) workgroup grid that covers `total_groups`
/// workgroups without exceeding the per-dimension limit.
pub fn split_workgroups(total_groups: u32, limit: u32) -> (u32, u32) {
    if total_groups <= limit {
        (total_groups, 1)
    } else {
        let x = limit;
        let y = total_groups.div_ceil(limit);
        (x, y)
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    let min_binding_size = NonZeroU64::new(std::mem::size_of::<f32>() as u64);
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size,
        },
        count: None,
    }
}

impl GpuProgram {
    /// Compile `source` and build the pipeline for the `scal` entry point.
    ///
    /// Validation errors are captured with an error scope and returned
    /// as text.
    pub fn compile(
        context: &GpuContext,
        source: &str,
        path: Option<PathBuf>,
    ) -> Result<Self, String> {
        context.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = context.device.create_shader_module(ShaderModuleDescriptor {
            label: Some("scal_shader"),
            source: ShaderSource::Wgsl(source.into()),
        });
        let layout = context
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("scal_bind_group_layout"),
                entries: &[
                    storage_entry(0, true),
                    storage_entry(1, false),
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: NonZeroU64::new(std::mem::size_of::<Params>() as u64),
                        },
                        count: None,
                    },
                ],
            });
        let pipeline_layout = context
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("scal_pipeline_layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
        let pipeline = context
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("scal_pipeline"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(ENTRY_POINT),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        if let Some(err) = pollster::block_on(context.device.pop_error_scope()) {
            return Err(err.to_string());
        }
        Ok(Self {
            path,
            layout,
            pipeline,
        })
    }

    /// Instantiate the kernel over a buffer pair.
    pub fn bind(
        &self,
        context: &GpuContext,
        label: &str,
        input: &GpuBuffer,
        output: &GpuBuffer,
        args: KernelArgs,
    ) -> Result<GpuKernel, DeviceError> {
        let n = u32::try_from(args.element_count).map_err(|_| DeviceError::BufferTooLarge {
            bytes: (args.element_count * std::mem::size_of::<f32>()) as u64,
            limit: u64::from(u32::MAX),
        })?;
        let limits = context.device.limits();
        let total_groups = n.div_ceil(WORKGROUP_SIZE);
        let groups = split_workgroups(total_groups, limits.max_compute_workgroups_per_dimension);
        let params = Params {
            n,
            row_stride: groups.0 * WORKGROUP_SIZE,
            scale: args.scale,
            _pad: 0,
        };
        let params_buffer = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("scal_params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        context.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });
        if let Some(err) = pollster::block_on(context.device.pop_error_scope()) {
            return Err(DeviceError::Validation(err.to_string()));
        }
        Ok(GpuKernel {
            label: label.to_string(),
            groups,
            pipeline: self.pipeline.clone(),
            bind_group,
            _params: params_buffer,
        })
    }
}

impl GpuKernel {
    /// Record one dispatch of the kernel and submit it.
    pub fn submit(&self, context: &GpuContext) -> wgpu::SubmissionIndex {
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&self.label),
            });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, &self.bind_group, &[]);
            let (groups_x, groups_y) = self.groups;
            if groups_x > 0 {
                cpass.dispatch_workgroups(groups_x, groups_y, 1);
            }
        }
        context.queue.submit([encoder.finish()])
    }
}
