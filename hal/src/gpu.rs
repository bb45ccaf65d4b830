use std::sync::Arc;

use wgpu::{Backends, Device, Instance, PowerPreference, Queue, RequestAdapterOptions};

use crate::shaders::BIN_COUNT;
use crate::{Error, Result};

/// One enumerated adapter, as shown by `--list-adapters`.
#[derive(Debug, Clone)]
pub struct AdapterEntry {
    pub index: usize,
    pub name: String,
    pub backend: String,
    pub device_type: String,
}

/// Enumerate every adapter wgpu can see, in stable index order.
pub fn list_adapters() -> Vec<AdapterEntry> {
    let instance = Instance::new(wgpu::InstanceDescriptor {
        backends: Backends::all(),
        ..Default::default()
    });

    instance
        .enumerate_adapters(Backends::all())
        .into_iter()
        .enumerate()
        .map(|(index, adapter)| {
            let info = adapter.get_info();
            AdapterEntry {
                index,
                name: info.name,
                backend: format!("{:?}", info.backend),
                device_type: format!("{:?}", info.device_type),
            }
        })
        .collect()
}

/// Shared GPU context: device, queue and the dispatch granularity the
/// equalization kernels were compiled for.
#[derive(Debug)]
pub struct GpuContext {
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    adapter_name: String,
    workgroup_size: u32,
    max_workgroups_per_dim: u32,
    supports_timestamps: bool,
}

impl GpuContext {
    /// Create a context on the adapter at `adapter_index`, or on the best
    /// available high-performance adapter when `None`.
    pub fn new(adapter_index: Option<usize>) -> Result<Self> {
        let instance = Instance::new(wgpu::InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let adapter = match adapter_index {
            Some(index) => {
                let mut adapters = instance.enumerate_adapters(Backends::all());
                if index >= adapters.len() {
                    return Err(Error::backend_not_available(format!(
                        "adapter index {index} out of range ({} available)",
                        adapters.len()
                    )));
                }
                adapters.swap_remove(index)
            }
            None => pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            }))
            .ok_or_else(|| Error::backend_not_available("no suitable adapter found"))?,
        };

        let info = adapter.get_info();
        let supports_timestamps = adapter
            .features()
            .contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if supports_timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("histeq device"),
                required_features,
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| Error::DeviceError(format!("device request failed: {e}")))?;

        let limits = device.limits();

        // The per-group scratch histogram must fit in workgroup storage.
        let scratch_bytes = BIN_COUNT * std::mem::size_of::<u32>() as u32;
        if scratch_bytes > limits.max_compute_workgroup_storage_size {
            return Err(Error::ConfigError(format!(
                "workgroup scratch histogram needs {scratch_bytes} B, device allows {} B",
                limits.max_compute_workgroup_storage_size
            )));
        }

        let capped = limits
            .max_compute_workgroup_size_x
            .min(limits.max_compute_invocations_per_workgroup)
            .clamp(1, 256);
        // Round down to a power of two for even bin coverage in the scratch loops.
        let workgroup_size = 1u32 << (31 - capped.leading_zeros());

        log::info!(
            "using adapter '{}' ({:?}), workgroup size {}, timestamps {}",
            info.name,
            info.backend,
            workgroup_size,
            if supports_timestamps { "on" } else { "off" }
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name: info.name,
            workgroup_size,
            max_workgroups_per_dim: limits.max_compute_workgroups_per_dimension,
            supports_timestamps,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Worker count per group, derived from device limits at setup time.
    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    /// Maximum workgroups a single dispatch dimension accepts.
    pub fn max_workgroups_per_dim(&self) -> u32 {
        self.max_workgroups_per_dim
    }

    /// Whether the device can report per-dispatch elapsed time.
    pub fn supports_timestamps(&self) -> bool {
        self.supports_timestamps
    }

    /// Compile one entry point of the equalization program.
    ///
    /// Shader and pipeline creation run inside a validation error scope so a
    /// broken build surfaces the driver's log instead of a delayed panic.
    pub fn create_compute_pipeline(
        &self,
        source: &str,
        entry_point: &str,
    ) -> Result<wgpu::ComputePipeline> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("histeq kernels"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: None,
                module: &module,
                entry_point,
                compilation_options: Default::default(),
                cache: None,
            });

        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::KernelError(format!(
                "building '{entry_point}' failed: {err}"
            )));
        }

        Ok(pipeline)
    }

    /// Submit one encoder on the single ordered command stream.
    pub fn submit(&self, encoder: wgpu::CommandEncoder) -> wgpu::SubmissionIndex {
        self.queue.submit(Some(encoder.finish()))
    }

    /// Block until all submitted work has completed.
    pub fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}
