//! Windowed-mean filters: SAT-backed and direct.

use std::sync::Arc;

use guided_core::{FilterError, FilterResult, Staging};

use crate::backend::{Arg, BufferId, ComputeDevice, Event, Kernel, KernelCall};
use crate::stage::{Slot, stage_input};

use super::sat::{Sat, SatMemory};

/// Buffer slots exposed by the box filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxMemory {
    DIn,
    DOut,
}

const TILE: u32 = 16;

fn check_tile_capability(dev: &dyn ComputeDevice) -> FilterResult<()> {
    if dev.max_workgroup_size() < TILE * TILE {
        return Err(FilterError::WorkgroupUnsupported(TILE, TILE));
    }
    Ok(())
}

/// Box filter over a summed-area table: builds the SAT, then one
/// corner-difference kernel per output pixel. O(1) per pixel in the
/// window radius, which is the whole point over [`BoxFilter`].
///
/// Edge windows clamp to the image and divide by the true in-bounds
/// sample count, so borders stay unbiased.
pub struct BoxFilterSat {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    width: u32,
    height: u32,
    scaling: f32,
    staging: Staging,
    h_in: Vec<f32>,
    h_out: Vec<f32>,
    sat: Sat,
    d_out: Slot,
    call: Option<KernelCall>,
}

impl BoxFilterSat {
    /// `transposed` selects the table layout the corner kernel reads;
    /// the transposed flavor skips the SAT's final transpose-back pass.
    pub fn new(
        dev: Arc<dyn ComputeDevice>,
        queue: usize,
        transposed: bool,
    ) -> FilterResult<Self> {
        check_tile_capability(dev.as_ref())?;
        Ok(Self {
            dev: Arc::clone(&dev),
            queue,
            width: 0,
            height: 0,
            scaling: 1.0,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out: Vec::new(),
            sat: Sat::new(dev, queue, transposed),
            d_out: Slot::default(),
            call: None,
        })
    }

    pub fn set_buffer(&mut self, mem: BoxMemory, buf: BufferId) {
        match mem {
            BoxMemory::DIn => self.sat.set_buffer(SatMemory::DIn, buf),
            BoxMemory::DOut => self.d_out.assign(buf),
        }
    }

    pub fn buffer(&self, mem: BoxMemory) -> Option<BufferId> {
        match mem {
            BoxMemory::DIn => self.sat.buffer(SatMemory::DIn),
            BoxMemory::DOut => self.d_out.get(),
        }
    }

    pub fn init(
        &mut self,
        width: u32,
        height: u32,
        radius: i32,
        scaling: f32,
        staging: Staging,
    ) -> FilterResult<()> {
        if width == 0 || height == 0 {
            return Err(FilterError::InvalidDimensions(width, height));
        }
        if width % TILE != 0 {
            return Err(FilterError::NotMultipleOf { what: "width", of: TILE, got: width });
        }
        if height % TILE != 0 {
            return Err(FilterError::NotMultipleOf { what: "height", of: TILE, got: height });
        }

        self.width = width;
        self.height = height;
        self.scaling = scaling;
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

        self.sat.init(width, height, scaling, Staging::None)?;
        let d_sat = self
            .sat
            .buffer(SatMemory::DOut)
            .ok_or(FilterError::Uninitialized)?;
        let d_out = self.d_out.resolve(self.dev.as_ref(), buffer_len * 4)?;

        let kernel = if self.sat.transposed() {
            Kernel::BoxFilterSatTransposed
        } else {
            Kernel::BoxFilterSat
        };
        self.call = Some(KernelCall {
            kernel,
            global: [height, width],
            local: [TILE, TILE],
            args: vec![
                Arg::Buf(d_sat),
                Arg::Buf(d_out),
                Arg::I32(radius),
                Arg::F32(1.0 / scaling),
            ],
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
        let d_in = self.buffer(BoxMemory::DIn).ok_or(FilterError::Uninitialized)?;
        let ev = self
            .dev
            .write_bytes(d_in, bytemuck::cast_slice(&self.h_in), wait)?;
        Ok(Some(ev))
    }

    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_out, bytemuck::cast_slice_mut(&mut self.h_out), wait)?;
        Ok(Some(&self.h_out))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let call = self.call.as_ref().ok_or(FilterError::Uninitialized)?;
        let ev = self.sat.run(wait)?;
        self.dev.enqueue(self.queue, call, &[ev])
    }

    pub fn radius(&self) -> FilterResult<i32> {
        self.call.as_ref().ok_or(FilterError::Uninitialized)?.i32(2)
    }

    pub fn set_radius(&mut self, radius: i32) -> FilterResult<()> {
        let call = self.call.as_mut().ok_or(FilterError::Uninitialized)?;
        call.args[2] = Arg::I32(radius);
        Ok(())
    }

    pub fn scaling(&self) -> f32 {
        self.scaling
    }

    /// Updates the SAT pre-scale and the matching inverse-scale argument.
    pub fn set_scaling(&mut self, scaling: f32) -> FilterResult<()> {
        let call = self.call.as_mut().ok_or(FilterError::Uninitialized)?;
        call.args[3] = Arg::F32(1.0 / scaling);
        self.sat.set_scaling(scaling);
        self.scaling = scaling;
        Ok(())
    }
}

/// Direct windowed mean, O(r^2) per pixel. Cheaper than [`BoxFilterSat`]
/// only for very small radii; kept mainly as a reference path.
pub struct BoxFilter {
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

impl BoxFilter {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize) -> FilterResult<Self> {
        check_tile_capability(dev.as_ref())?;
        Ok(Self {
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
        })
    }

    pub fn set_buffer(&mut self, mem: BoxMemory, buf: BufferId) {
        match mem {
            BoxMemory::DIn => self.d_in.assign(buf),
            BoxMemory::DOut => self.d_out.assign(buf),
        }
    }

    pub fn buffer(&self, mem: BoxMemory) -> Option<BufferId> {
        match mem {
            BoxMemory::DIn => self.d_in.get(),
            BoxMemory::DOut => self.d_out.get(),
        }
    }

    pub fn init(
        &mut self,
        width: u32,
        height: u32,
        radius: i32,
        staging: Staging,
    ) -> FilterResult<()> {
        if width == 0 || height == 0 {
            return Err(FilterError::InvalidDimensions(width, height));
        }
        if width % TILE != 0 {
            return Err(FilterError::NotMultipleOf { what: "width", of: TILE, got: width });
        }
        if height % TILE != 0 {
            return Err(FilterError::NotMultipleOf { what: "height", of: TILE, got: height });
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

        let d_in = self.d_in.resolve(self.dev.as_ref(), buffer_len * 4)?;
        let d_out = self.d_out.resolve(self.dev.as_ref(), buffer_len * 4)?;

        self.call = Some(KernelCall {
            kernel: Kernel::BoxFilter,
            global: [width, height],
            local: [TILE, TILE],
            args: vec![Arg::Buf(d_in), Arg::Buf(d_out), Arg::I32(radius)],
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

    pub fn radius(&self) -> FilterResult<i32> {
        self.call.as_ref().ok_or(FilterError::Uninitialized)?.i32(2)
    }

    pub fn set_radius(&mut self, radius: i32) -> FilterResult<()> {
        let call = self.call.as_mut().ok_or(FilterError::Uninitialized)?;
        call.args[2] = Arg::I32(radius);
        Ok(())
    }
}
