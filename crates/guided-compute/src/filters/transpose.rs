//! Tiled matrix transpose.

use std::sync::Arc;

use guided_core::{FilterError, FilterResult, Staging, geometry};

use crate::backend::{Arg, BufferId, ComputeDevice, Event, Kernel, KernelCall};
use crate::stage::{Slot, stage_input};

/// Buffer slots exposed by [`Transpose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransposeMemory {
    DIn,
    DOut,
}

/// Transposes a `width x height` array; each work-item moves a 4x4
/// block, tiled into the largest square work-group that divides both
/// block grids. Both dimensions must be multiples of 4.
pub struct Transpose {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    width: u32,
    height: u32,
    staging: Staging,
    h_in: Vec<f32>,
    h_out: Vec<f32>,
    d_in: Slot,
    d_out: Slot,
    call: Option<KernelCall>,
}

impl Transpose {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize) -> Self {
        Self {
            dev,
            queue,
            width: 0,
            height: 0,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out: Vec::new(),
            d_in: Slot::default(),
            d_out: Slot::default(),
            call: None,
        }
    }

    pub fn set_buffer(&mut self, mem: TransposeMemory, buf: BufferId) {
        match mem {
            TransposeMemory::DIn => self.d_in.assign(buf),
            TransposeMemory::DOut => self.d_out.assign(buf),
        }
    }

    pub fn buffer(&self, mem: TransposeMemory) -> Option<BufferId> {
        match mem {
            TransposeMemory::DIn => self.d_in.get(),
            TransposeMemory::DOut => self.d_out.get(),
        }
    }

    pub fn init(&mut self, width: u32, height: u32, staging: Staging) -> FilterResult<()> {
        if width == 0 || height == 0 {
            return Err(FilterError::InvalidDimensions(width, height));
        }
        if width % 4 != 0 || height % 4 != 0 {
            return Err(FilterError::NotMultipleOf {
                what: "transpose dimensions",
                of: 4,
                got: if width % 4 != 0 { width } else { height },
            });
        }

        self.width = width;
        self.height = height;
        self.staging = staging;

        let buffer_len = (width * height) as usize;
        self.h_in = if staging.wants_input() {
            vec![0f32; buffer_len]
        } else {
            Vec::new()
        };
        self.h_out = if staging.wants_output() {
            vec![0f32; buffer_len]
        } else {
            Vec::new()
        };

        let d_in = self.d_in.resolve(&*self.dev, buffer_len * 4)?;
        let d_out = self.d_out.resolve(&*self.dev, buffer_len * 4)?;

        let side = geometry::transpose_tile_side(width, height);
        self.call = Some(KernelCall {
            kernel: Kernel::Transpose,
            global: [width / 4, height / 4],
            local: [side, side],
            args: vec![Arg::Buf(d_in), Arg::Buf(d_out)],
        });
        Ok(())
    }

    pub fn write(&mut self, data: Option<&[f32]>, wait: &[Event]) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        if let Some(data) = data {
            stage_input(&mut self.h_in, data)?;
        }
        let d_in = self.d_in.get().ok_or(FilterError::Uninitialized)?;
        let ev = self
            .dev
            .write_bytes(d_in, bytemuck::cast_slice(&self.h_in), wait)?;
        Ok(Some(ev))
    }

    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self.d_out.get().ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_out, bytemuck::cast_slice_mut(&mut self.h_out), wait)?;
        Ok(Some(&self.h_out))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let call = self.call.as_ref().ok_or(FilterError::Uninitialized)?;
        self.dev.enqueue(self.queue, call, wait)
    }
}
