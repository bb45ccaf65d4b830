//! The four-stage equalization pipeline and its orchestrator.
//!
//! Stage order is fixed: intensity histogram -> cumulative histogram ->
//! normalize/scale -> back-projection. All dispatches go through the one
//! device queue, so each stage observes the completed output of its
//! predecessor without extra synchronization. The global histogram is the
//! only contended buffer; groups merge into it with per-bin atomic adds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wgpu::BufferUsages;

use crate::buffers;
use crate::gpu::GpuContext;
use crate::shaders::{
    self, BIN_COUNT, ENTRY_BACK_PROJECT, ENTRY_CUMULATIVE, ENTRY_HISTOGRAM, ENTRY_NORMALIZE,
};
use crate::{Error, Result};

const TABLE_BYTES: u64 = BIN_COUNT as u64 * 4;

fn entry(binding: u32, buf: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buf.as_entire_binding(),
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct EqualizeParams {
    pixel_count: u32,
    word_count: u32,
    scale: f32,
    _pad: u32,
}

/// The four compiled entry points, resolved once after a successful build.
pub struct CompiledKernels {
    pub histogram: wgpu::ComputePipeline,
    pub cumulative: wgpu::ComputePipeline,
    pub normalize: wgpu::ComputePipeline,
    pub back_project: wgpu::ComputePipeline,
}

impl CompiledKernels {
    pub fn build(ctx: &GpuContext) -> Result<Self> {
        let source = shaders::pipeline_source(ctx.workgroup_size());
        Ok(Self {
            histogram: ctx.create_compute_pipeline(&source, ENTRY_HISTOGRAM)?,
            cumulative: ctx.create_compute_pipeline(&source, ENTRY_CUMULATIVE)?,
            normalize: ctx.create_compute_pipeline(&source, ENTRY_NORMALIZE)?,
            back_project: ctx.create_compute_pipeline(&source, ENTRY_BACK_PROJECT)?,
        })
    }
}

/// Orchestration progress for one run. Any failure lands in `Failed`; there
/// is no per-stage retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    BuffersAllocated,
    HistogramComputed,
    CumulativeComputed,
    Normalized,
    BackProjected,
    ResultsRetrieved,
    Failed,
}

/// Where the stage timings came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSource {
    /// Device timestamp queries, scaled by the queue's timestamp period.
    DeviceTimestamps,
    /// Host wall clock around each submit-and-wait; includes sync overhead.
    HostWallClock,
}

#[derive(Debug, Clone)]
pub struct StageTimings {
    pub histogram: Duration,
    pub cumulative: Duration,
    pub normalize: Duration,
    pub back_project: Duration,
    pub source: TimingSource,
}

/// Everything a run produces: the equalized frame plus the intermediate
/// tables for diagnostics.
#[derive(Debug, Clone)]
pub struct EqualizeReport {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub histogram: Vec<u32>,
    pub cumulative: Vec<u32>,
    pub remap: Vec<u32>,
    pub timings: StageTimings,
}

/// Owns the device buffers for a run and sequences the four dispatches.
pub struct EqualizePipeline {
    ctx: Arc<GpuContext>,
    kernels: CompiledKernels,
    state: RunState,
}

impl EqualizePipeline {
    pub fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        let kernels = CompiledKernels::build(&ctx)?;
        Ok(Self {
            ctx,
            kernels,
            state: RunState::Idle,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Equalize one grayscale frame. Blocks on the initial upload and the
    /// final readback; everything in between is bulk dispatches.
    pub fn run(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<EqualizeReport> {
        self.state = RunState::Idle;
        match self.run_inner(width, height, pixels) {
            Ok(report) => Ok(report),
            Err(e) => {
                self.state = RunState::Failed;
                Err(e)
            }
        }
    }

    fn advance(&mut self, next: RunState) {
        log::debug!("pipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn run_inner(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<EqualizeReport> {
        if width == 0 || height == 0 {
            return Err(Error::invalid_input("image dimensions must be nonzero"));
        }
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(Error::invalid_input(format!(
                "pixel buffer holds {} samples, {width}x{height} needs {expected}",
                pixels.len()
            )));
        }

        let pixel_count = pixels.len() as u32;
        let word_count = pixel_count.div_ceil(4);
        let mut padded = pixels.to_vec();
        padded.resize(word_count as usize * 4, 0);

        let params = EqualizeParams {
            pixel_count,
            word_count,
            scale: BIN_COUNT as f32 / pixel_count as f32,
            _pad: 0,
        };

        // Buffer lifecycle: everything below is owned by this run and
        // dropped when it returns, success or failure.
        let src = buffers::create_buffer_init(
            &self.ctx,
            "source image",
            &padded,
            BufferUsages::STORAGE,
        );
        let dst = buffers::create_buffer_uninit(
            &self.ctx,
            "equalized image",
            padded.len() as u64,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        );
        let hist = buffers::create_buffer_uninit(
            &self.ctx,
            "histogram",
            TABLE_BYTES,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        );
        let cum = buffers::create_buffer_uninit(
            &self.ctx,
            "cumulative histogram",
            TABLE_BYTES,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        );
        let remap = buffers::create_buffer_uninit(
            &self.ctx,
            "remapping table",
            TABLE_BYTES,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        );
        let params_buf = buffers::create_buffer_init(
            &self.ctx,
            "equalize params",
            bytemuck::bytes_of(&params),
            BufferUsages::UNIFORM,
        );

        // Histogram and cumulative buffers must start at zero: stage 1 only
        // ever adds, and a reused device could hand back stale memory.
        let mut setup = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("buffer setup"),
            });
        setup.clear_buffer(&hist, 0, None);
        setup.clear_buffer(&cum, 0, None);
        self.ctx.submit(setup);
        self.advance(RunState::BuffersAllocated);

        let profiling = self.profiling_resources();

        // Bind groups carry exactly the bindings each entry point uses.
        let device = &self.ctx.device;
        let bind = |label, pipeline: &wgpu::ComputePipeline, entries: &[wgpu::BindGroupEntry]| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &pipeline.get_bind_group_layout(0),
                entries,
            })
        };
        let hist_bg = bind(
            "histogram bind group",
            &self.kernels.histogram,
            &[entry(0, &src), entry(1, &hist), entry(5, &params_buf)],
        );
        let cum_bg = bind(
            "cumulative bind group",
            &self.kernels.cumulative,
            &[entry(1, &hist), entry(2, &cum)],
        );
        let norm_bg = bind(
            "normalize bind group",
            &self.kernels.normalize,
            &[entry(2, &cum), entry(3, &remap), entry(5, &params_buf)],
        );
        let bp_bg = bind(
            "back-project bind group",
            &self.kernels.back_project,
            &[
                entry(0, &src),
                entry(3, &remap),
                entry(4, &dst),
                entry(5, &params_buf),
            ],
        );

        let image_groups = word_count.div_ceil(self.ctx.workgroup_size());
        if image_groups > self.ctx.max_workgroups_per_dim() {
            return Err(Error::ConfigError(format!(
                "image needs {image_groups} workgroups, device dispatch limit is {}",
                self.ctx.max_workgroups_per_dim()
            )));
        }
        let bind_groups = [hist_bg, cum_bg, norm_bg, bp_bg];
        let meta: [(u32, &str, RunState); 4] = [
            (image_groups, "intensity histogram", RunState::HistogramComputed),
            (1, "cumulative histogram", RunState::CumulativeComputed),
            (1, "normalize and scale", RunState::Normalized),
            (image_groups, "back-projection", RunState::BackProjected),
        ];

        let mut wall_clock = [Duration::ZERO; 4];
        for (i, (groups, label, reached)) in meta.into_iter().enumerate() {
            let pipeline = match i {
                0 => &self.kernels.histogram,
                1 => &self.kernels.cumulative,
                2 => &self.kernels.normalize,
                _ => &self.kernels.back_project,
            };
            let query = profiling.as_ref().map(|(qs, _)| (qs, 2 * i as u32));
            let t0 = Instant::now();
            self.dispatch_stage(pipeline, &bind_groups[i], groups, label, query);
            if profiling.is_none() {
                // Without device timestamps the queue has to drain before
                // time can be attributed to a single stage.
                self.ctx.wait_idle();
                wall_clock[i] = t0.elapsed();
            }
            self.advance(reached);
        }

        let timings = self.collect_timings(profiling, wall_clock)?;

        // Readback: the second host-visible blocking point.
        let mut out: Vec<u8> = buffers::read_buffer(&self.ctx, &dst, padded.len())?;
        out.truncate(pixel_count as usize);
        let histogram: Vec<u32> = buffers::read_buffer(&self.ctx, &hist, TABLE_BYTES as usize)?;
        let cumulative: Vec<u32> = buffers::read_buffer(&self.ctx, &cum, TABLE_BYTES as usize)?;
        let remap_table: Vec<u32> = buffers::read_buffer(&self.ctx, &remap, TABLE_BYTES as usize)?;
        self.advance(RunState::ResultsRetrieved);

        Ok(EqualizeReport {
            width,
            height,
            pixels: out,
            histogram,
            cumulative,
            remap: remap_table,
            timings,
        })
    }

    /// Timestamp query set plus resolve buffer, when the device supports it.
    fn profiling_resources(&self) -> Option<(wgpu::QuerySet, wgpu::Buffer)> {
        if !self.ctx.supports_timestamps() {
            return None;
        }
        let query_set = self.ctx.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("stage timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 8,
        });
        let resolve = buffers::create_buffer_uninit(
            &self.ctx,
            "timestamp resolve",
            8 * std::mem::size_of::<u64>() as u64,
            BufferUsages::QUERY_RESOLVE | BufferUsages::COPY_SRC,
        );
        Some((query_set, resolve))
    }

    fn dispatch_stage(
        &self,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        workgroups: u32,
        label: &str,
        query: Option<(&wgpu::QuerySet, u32)>,
    ) {
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let timestamp_writes = query.map(|(query_set, base)| wgpu::ComputePassTimestampWrites {
                query_set,
                beginning_of_pass_write_index: Some(base),
                end_of_pass_write_index: Some(base + 1),
            });
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        self.ctx.submit(encoder);
    }

    fn collect_timings(
        &self,
        profiling: Option<(wgpu::QuerySet, wgpu::Buffer)>,
        wall_clock: [Duration; 4],
    ) -> Result<StageTimings> {
        let Some((query_set, resolve)) = profiling else {
            return Ok(StageTimings {
                histogram: wall_clock[0],
                cumulative: wall_clock[1],
                normalize: wall_clock[2],
                back_project: wall_clock[3],
                source: TimingSource::HostWallClock,
            });
        };

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("timestamp resolve"),
            });
        encoder.resolve_query_set(&query_set, 0..8, &resolve, 0);
        self.ctx.submit(encoder);

        let ticks: Vec<u64> = buffers::read_buffer(&self.ctx, &resolve, 64)?;
        let period = self.ctx.queue.get_timestamp_period() as f64;
        let elapsed = |i: usize| {
            let ns = ticks[2 * i + 1].saturating_sub(ticks[2 * i]) as f64 * period;
            Duration::from_nanos(ns as u64)
        };

        Ok(StageTimings {
            histogram: elapsed(0),
            cumulative: elapsed(1),
            normalize: elapsed(2),
            back_project: elapsed(3),
            source: TimingSource::DeviceTimestamps,
        })
    }
}
