//! Frame layout stages: packed RGB <-> planar, depth promotion.

use std::sync::Arc;

use guided_core::{FilterError, FilterResult, Staging};

use crate::backend::{Arg, BufferId, ComputeDevice, Event, Kernel, KernelCall};
use crate::stage::{Slot, stage_input};

/// Input element type for [`SeparateRgb`]; output planes are always f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparateKind {
    FloatToFloat,
    /// 8-bit channels, normalized to [0, 1] on the way out.
    UcharToFloat,
}

/// Output element type for [`CombineRgb`]; input planes are always f32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineKind {
    FloatToFloat,
    /// Quantized back to 8-bit: clamp(round(v * 255)).
    FloatToUchar,
}

/// Buffer slots for [`SeparateRgb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparateMemory {
    DIn,
    DOutR,
    DOutG,
    DOutB,
}

/// Buffer slots for [`CombineRgb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMemory {
    DInR,
    DInG,
    DInB,
    DOut,
}

/// Buffer slots for [`DepthToFloat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthMemory {
    DIn,
    DOut,
}

/// Largest group size out of `3 * wgm` that divides the launch width.
fn channel_local(pixels: u32, wgm: u32) -> u32 {
    let mut local = 3 * wgm;
    while local > 1 && pixels % local != 0 {
        local /= 2;
    }
    local.max(1)
}

/// Splits a packed RGBRGB... frame into three planes.
pub struct SeparateRgb {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    kind: SeparateKind,
    pixels: u32,
    staging: Staging,
    h_in: Vec<u8>,
    h_out_r: Vec<f32>,
    h_out_g: Vec<f32>,
    h_out_b: Vec<f32>,
    d_in: Slot,
    d_out_r: Slot,
    d_out_g: Slot,
    d_out_b: Slot,
    call: Option<KernelCall>,
}

impl SeparateRgb {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize, kind: SeparateKind) -> Self {
        Self {
            dev,
            queue,
            kind,
            pixels: 0,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out_r: Vec::new(),
            h_out_g: Vec::new(),
            h_out_b: Vec::new(),
            d_in: Slot::default(),
            d_out_r: Slot::default(),
            d_out_g: Slot::default(),
            d_out_b: Slot::default(),
            call: None,
        }
    }

    pub fn kind(&self) -> SeparateKind {
        self.kind
    }

    pub fn pixels(&self) -> u32 {
        self.pixels
    }

    pub fn set_buffer(&mut self, mem: SeparateMemory, buf: BufferId) {
        match mem {
            SeparateMemory::DIn => self.d_in.assign(buf),
            SeparateMemory::DOutR => self.d_out_r.assign(buf),
            SeparateMemory::DOutG => self.d_out_g.assign(buf),
            SeparateMemory::DOutB => self.d_out_b.assign(buf),
        }
    }

    pub fn buffer(&self, mem: SeparateMemory) -> Option<BufferId> {
        match mem {
            SeparateMemory::DIn => self.d_in.get(),
            SeparateMemory::DOutR => self.d_out_r.get(),
            SeparateMemory::DOutG => self.d_out_g.get(),
            SeparateMemory::DOutB => self.d_out_b.get(),
        }
    }

    pub fn init(&mut self, pixels: u32, staging: Staging) -> FilterResult<()> {
        if pixels == 0 {
            return Err(FilterError::InvalidDimensions(pixels, 1));
        }
        if pixels % 3 != 0 {
            return Err(FilterError::NotMultipleOf { what: "pixel count", of: 3, got: pixels });
        }

        self.pixels = pixels;
        self.staging = staging;

        let elem = match self.kind {
            SeparateKind::FloatToFloat => 4,
            SeparateKind::UcharToFloat => 1,
        };
        let in_bytes = 3 * pixels as usize * elem;
        self.h_in = if staging.wants_input() {
            vec![0u8; in_bytes]
        } else {
            Vec::new()
        };
        let plane_len = pixels as usize;
        if staging.wants_output() {
            self.h_out_r = vec![0f32; plane_len];
            self.h_out_g = vec![0f32; plane_len];
            self.h_out_b = vec![0f32; plane_len];
        } else {
            self.h_out_r = Vec::new();
            self.h_out_g = Vec::new();
            self.h_out_b = Vec::new();
        }

        let d_in = self.d_in.resolve(self.dev.as_ref(), in_bytes)?;
        let d_r = self.d_out_r.resolve(self.dev.as_ref(), plane_len * 4)?;
        let d_g = self.d_out_g.resolve(self.dev.as_ref(), plane_len * 4)?;
        let d_b = self.d_out_b.resolve(self.dev.as_ref(), plane_len * 4)?;

        let kernel = match self.kind {
            SeparateKind::FloatToFloat => Kernel::SeparateRgbFloat,
            SeparateKind::UcharToFloat => Kernel::SeparateRgbUchar,
        };
        self.call = Some(KernelCall {
            kernel,
            global: [pixels, 1],
            local: [channel_local(pixels, self.dev.wg_multiple()), 1],
            args: vec![Arg::Buf(d_in), Arg::Buf(d_r), Arg::Buf(d_g), Arg::Buf(d_b)],
        });
        Ok(())
    }

    /// Stages and uploads a packed byte frame (`UcharToFloat` kind).
    pub fn write(&mut self, data: Option<&[u8]>, wait: &[Event]) -> FilterResult<Option<Event>> {
        if self.kind != SeparateKind::UcharToFloat {
            return Err(FilterError::OperationFailed(
                "input frame is not byte-packed".into(),
            ));
        }
        self.write_bytes(data, wait)
    }

    /// Stages and uploads a packed float frame (`FloatToFloat` kind).
    pub fn write_f32(
        &mut self,
        data: Option<&[f32]>,
        wait: &[Event],
    ) -> FilterResult<Option<Event>> {
        if self.kind != SeparateKind::FloatToFloat {
            return Err(FilterError::OperationFailed(
                "input frame is not float-packed".into(),
            ));
        }
        self.write_bytes(data.map(bytemuck::cast_slice), wait)
    }

    fn write_bytes(&mut self, data: Option<&[u8]>, wait: &[Event]) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        if let Some(data) = data {
            stage_input(&mut self.h_in, data)?;
        }
        let d_in = self.d_in.get().ok_or(FilterError::Uninitialized)?;
        let ev = self.dev.write_bytes(d_in, &self.h_in, wait)?;
        Ok(Some(ev))
    }

    /// Blocking readback of the three planes in R, G, B order.
    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<[&[f32]; 3]>> {
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_r = self.d_out_r.get().ok_or(FilterError::Uninitialized)?;
        let d_g = self.d_out_g.get().ok_or(FilterError::Uninitialized)?;
        let d_b = self.d_out_b.get().ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_r, bytemuck::cast_slice_mut(&mut self.h_out_r), wait)?;
        self.dev
            .read_bytes(d_g, bytemuck::cast_slice_mut(&mut self.h_out_g), &[])?;
        self.dev
            .read_bytes(d_b, bytemuck::cast_slice_mut(&mut self.h_out_b), &[])?;
        Ok(Some([&self.h_out_r, &self.h_out_g, &self.h_out_b]))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let call = self.call.as_ref().ok_or(FilterError::Uninitialized)?;
        self.dev.enqueue(self.queue, call, wait)
    }
}

/// Packs three planes back into an interleaved RGB frame.
pub struct CombineRgb {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    kind: CombineKind,
    pixels: u32,
    staging: Staging,
    h_in_r: Vec<f32>,
    h_in_g: Vec<f32>,
    h_in_b: Vec<f32>,
    h_out: Vec<u8>,
    d_in_r: Slot,
    d_in_g: Slot,
    d_in_b: Slot,
    d_out: Slot,
    call: Option<KernelCall>,
}

impl CombineRgb {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize, kind: CombineKind) -> Self {
        Self {
            dev,
            queue,
            kind,
            pixels: 0,
            staging: Staging::None,
            h_in_r: Vec::new(),
            h_in_g: Vec::new(),
            h_in_b: Vec::new(),
            h_out: Vec::new(),
            d_in_r: Slot::default(),
            d_in_g: Slot::default(),
            d_in_b: Slot::default(),
            d_out: Slot::default(),
            call: None,
        }
    }

    pub fn kind(&self) -> CombineKind {
        self.kind
    }

    pub fn pixels(&self) -> u32 {
        self.pixels
    }

    pub fn set_buffer(&mut self, mem: CombineMemory, buf: BufferId) {
        match mem {
            CombineMemory::DInR => self.d_in_r.assign(buf),
            CombineMemory::DInG => self.d_in_g.assign(buf),
            CombineMemory::DInB => self.d_in_b.assign(buf),
            CombineMemory::DOut => self.d_out.assign(buf),
        }
    }

    pub fn buffer(&self, mem: CombineMemory) -> Option<BufferId> {
        match mem {
            CombineMemory::DInR => self.d_in_r.get(),
            CombineMemory::DInG => self.d_in_g.get(),
            CombineMemory::DInB => self.d_in_b.get(),
            CombineMemory::DOut => self.d_out.get(),
        }
    }

    pub fn init(&mut self, pixels: u32, staging: Staging) -> FilterResult<()> {
        if pixels == 0 {
            return Err(FilterError::InvalidDimensions(pixels, 1));
        }
        if pixels % 3 != 0 {
            return Err(FilterError::NotMultipleOf { what: "pixel count", of: 3, got: pixels });
        }

        self.pixels = pixels;
        self.staging = staging;

        let plane_len = pixels as usize;
        if staging.wants_input() {
            self.h_in_r = vec![0f32; plane_len];
            self.h_in_g = vec![0f32; plane_len];
            self.h_in_b = vec![0f32; plane_len];
        } else {
            self.h_in_r = Vec::new();
            self.h_in_g = Vec::new();
            self.h_in_b = Vec::new();
        }
        let elem = match self.kind {
            CombineKind::FloatToFloat => 4,
            CombineKind::FloatToUchar => 1,
        };
        let out_bytes = 3 * plane_len * elem;
        self.h_out = if staging.wants_output() {
            vec![0u8; out_bytes]
        } else {
            Vec::new()
        };

        let d_r = self.d_in_r.resolve(self.dev.as_ref(), plane_len * 4)?;
        let d_g = self.d_in_g.resolve(self.dev.as_ref(), plane_len * 4)?;
        let d_b = self.d_in_b.resolve(self.dev.as_ref(), plane_len * 4)?;
        let d_out = self.d_out.resolve(self.dev.as_ref(), out_bytes)?;

        let kernel = match self.kind {
            CombineKind::FloatToFloat => Kernel::CombineRgbFloat,
            CombineKind::FloatToUchar => Kernel::CombineRgbUchar,
        };
        self.call = Some(KernelCall {
            kernel,
            global: [pixels, 1],
            local: [channel_local(pixels, self.dev.wg_multiple()), 1],
            args: vec![Arg::Buf(d_r), Arg::Buf(d_g), Arg::Buf(d_b), Arg::Buf(d_out)],
        });
        Ok(())
    }

    pub fn write(
        &mut self,
        mem: CombineMemory,
        data: Option<&[f32]>,
        wait: &[Event],
    ) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        let (slot, host) = match mem {
            CombineMemory::DInR => (&self.d_in_r, &mut self.h_in_r),
            CombineMemory::DInG => (&self.d_in_g, &mut self.h_in_g),
            CombineMemory::DInB => (&self.d_in_b, &mut self.h_in_b),
            CombineMemory::DOut => {
                return Err(FilterError::OperationFailed(
                    "DOut is not an input slot".into(),
                ));
            }
        };
        if let Some(data) = data {
            stage_input(host, data)?;
        }
        let buf = slot.get().ok_or(FilterError::Uninitialized)?;
        let ev = self.dev.write_bytes(buf, bytemuck::cast_slice(host), wait)?;
        Ok(Some(ev))
    }

    /// Blocking readback of the packed byte frame (`FloatToUchar` kind).
    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<&[u8]>> {
        if self.kind != CombineKind::FloatToUchar {
            return Err(FilterError::OperationFailed(
                "output frame is not byte-packed".into(),
            ));
        }
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self.d_out.get().ok_or(FilterError::Uninitialized)?;
        self.dev.read_bytes(d_out, &mut self.h_out, wait)?;
        Ok(Some(&self.h_out))
    }

    /// Blocking readback of the packed float frame (`FloatToFloat` kind).
    pub fn read_f32(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        if self.kind != CombineKind::FloatToFloat {
            return Err(FilterError::OperationFailed(
                "output frame is not float-packed".into(),
            ));
        }
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self.d_out.get().ok_or(FilterError::Uninitialized)?;
        self.dev.read_bytes(d_out, &mut self.h_out, wait)?;
        Ok(Some(bytemuck::cast_slice(&self.h_out)))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let call = self.call.as_ref().ok_or(FilterError::Uninitialized)?;
        self.dev.enqueue(self.queue, call, wait)
    }
}

/// Promotes u16 depth samples to f32, applying a scale factor.
pub struct DepthToFloat {
    dev: Arc<dyn ComputeDevice>,
    queue: usize,
    staging: Staging,
    h_in: Vec<u16>,
    h_out: Vec<f32>,
    d_in: Slot,
    d_out: Slot,
    call: Option<KernelCall>,
}

impl DepthToFloat {
    pub fn new(dev: Arc<dyn ComputeDevice>, queue: usize) -> Self {
        Self {
            dev,
            queue,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out: Vec::new(),
            d_in: Slot::default(),
            d_out: Slot::default(),
            call: None,
        }
    }

    pub fn set_buffer(&mut self, mem: DepthMemory, buf: BufferId) {
        match mem {
            DepthMemory::DIn => self.d_in.assign(buf),
            DepthMemory::DOut => self.d_out.assign(buf),
        }
    }

    pub fn buffer(&self, mem: DepthMemory) -> Option<BufferId> {
        match mem {
            DepthMemory::DIn => self.d_in.get(),
            DepthMemory::DOut => self.d_out.get(),
        }
    }

    pub fn init(&mut self, len: u32, scaling: f32, staging: Staging) -> FilterResult<()> {
        if len == 0 {
            return Err(FilterError::InvalidDimensions(len, 1));
        }
        if len % 4 != 0 {
            return Err(FilterError::NotMultipleOf { what: "length", of: 4, got: len });
        }

        self.staging = staging;
        let buffer_len = len as usize;
        self.h_in = if staging.wants_input() {
            vec![0u16; buffer_len]
        } else {
            Vec::new()
        };
        self.h_out = if staging.wants_output() {
            vec![0f32; buffer_len]
        } else {
            Vec::new()
        };

        let d_in = self.d_in.resolve(self.dev.as_ref(), buffer_len * 2)?;
        let d_out = self.d_out.resolve(self.dev.as_ref(), buffer_len * 4)?;

        self.call = Some(KernelCall {
            kernel: Kernel::DepthToFloat,
            global: [len / 4, 1],
            local: [self.dev.wg_multiple(), 1],
            args: vec![Arg::Buf(d_in), Arg::Buf(d_out), Arg::F32(scaling)],
        });
        Ok(())
    }

    pub fn write(&mut self, data: Option<&[u16]>, wait: &[Event]) -> FilterResult<Option<Event>> {
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

    pub fn scaling(&self) -> FilterResult<f32> {
        self.call.as_ref().ok_or(FilterError::Uninitialized)?.f32(2)
    }

    pub fn set_scaling(&mut self, scaling: f32) -> FilterResult<()> {
        let call = self.call.as_mut().ok_or(FilterError::Uninitialized)?;
        call.args[2] = Arg::F32(scaling);
        Ok(())
    }
}
