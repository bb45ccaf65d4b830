//! Buffer creation and synchronous readback helpers.

use wgpu::util::DeviceExt;
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

use crate::gpu::GpuContext;
use crate::{Error, Result};

/// Create a GPU buffer initialized from host bytes.
pub fn create_buffer_init(ctx: &GpuContext, label: &str, data: &[u8], usage: BufferUsages) -> Buffer {
    ctx.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: data,
            usage,
        })
}

/// Create an uninitialized GPU buffer of exactly `size` bytes.
pub fn create_buffer_uninit(ctx: &GpuContext, label: &str, size: u64, usage: BufferUsages) -> Buffer {
    ctx.device.create_buffer(&BufferDescriptor {
        label: Some(label),
        size,
        usage,
        mapped_at_creation: false,
    })
}

/// Copy `size` bytes out of `buffer` and block until they are host-visible.
///
/// This is one of the two host-side blocking points of a pipeline run (the
/// other is the initial upload).
pub fn read_buffer<T: bytemuck::Pod>(ctx: &GpuContext, buffer: &Buffer, size: usize) -> Result<Vec<T>> {
    let aligned_size = ((size + 3) & !3) as u64;

    let staging = ctx.device.create_buffer(&BufferDescriptor {
        label: Some("readback staging"),
        size: aligned_size,
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback"),
        });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, aligned_size);
    ctx.submit(encoder);

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    ctx.wait_idle();

    rx.recv()
        .map_err(|_| Error::DeviceError("readback channel closed".to_string()))?
        .map_err(|e| Error::DeviceError(format!("buffer mapping failed: {e}")))?;

    let data = slice.get_mapped_range();
    // pod_collect copies, so the staging slice's alignment never matters.
    let out = bytemuck::pod_collect_to_vec(&data[..size]);
    drop(data);
    staging.unmap();
    Ok(out)
}
