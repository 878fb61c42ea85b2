//! Camera-frame pipelines composed from the basic stages.

use std::sync::Arc;

use guided_core::{FilterError, FilterResult, Staging};

use crate::backend::{ComputeDevice, Event};
use crate::stage::stage_input;
use crate::channels::{
    CombineKind, CombineMemory, CombineRgb, DepthMemory, DepthToFloat, SeparateKind,
    SeparateMemory, SeparateRgb,
};
use crate::filters::{DEFAULT_BOX_SCALING, GuidedFilter, GuidedKind, GuidedMemory};

/// Depth promotion scale: raw u16 millimeters into filtering range.
pub const DEFAULT_DEPTH_SCALING: f32 = 1e-3;

/// SAT pre-scale for depth frames; depth magnitudes run larger than
/// normalized color, so the prefix sums need more headroom.
pub const DEPTH_BOX_SCALING: f32 = 1e-6;

/// Output layout of [`GuidedFilterRgb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbOutput {
    /// Three f32 planes.
    Separated,
    /// One packed RGBRGB... f32 frame.
    InterleavedFloat,
}

/// Filters a byte-packed RGB frame: channel separation feeding three
/// self-guided filters, one per plane, optionally packed back together.
///
/// The separation runs on queue 0 and its event gates the first filter;
/// the rest follow queue submission order.
pub struct GuidedFilterRgb {
    dev: Arc<dyn ComputeDevice>,
    output: RgbOutput,
    staging: Staging,
    h_in: Vec<u8>,
    h_out_r: Vec<f32>,
    h_out_g: Vec<f32>,
    h_out_b: Vec<f32>,
    h_out_packed: Vec<f32>,
    separate: SeparateRgb,
    gf_r: GuidedFilter,
    gf_g: GuidedFilter,
    gf_b: GuidedFilter,
    combine: Option<CombineRgb>,
}

impl GuidedFilterRgb {
    pub fn new(dev: Arc<dyn ComputeDevice>, output: RgbOutput) -> Self {
        let combine = match output {
            RgbOutput::Separated => None,
            RgbOutput::InterleavedFloat => Some(CombineRgb::new(
                Arc::clone(&dev),
                0,
                CombineKind::FloatToFloat,
            )),
        };
        Self {
            dev: Arc::clone(&dev),
            output,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out_r: Vec::new(),
            h_out_g: Vec::new(),
            h_out_b: Vec::new(),
            h_out_packed: Vec::new(),
            separate: SeparateRgb::new(Arc::clone(&dev), 0, SeparateKind::UcharToFloat),
            gf_r: GuidedFilter::new(Arc::clone(&dev), GuidedKind::SelfGuided, [0, 1]),
            gf_g: GuidedFilter::new(Arc::clone(&dev), GuidedKind::SelfGuided, [0, 1]),
            gf_b: GuidedFilter::new(dev, GuidedKind::SelfGuided, [0, 1]),
            combine,
        }
    }

    pub fn output(&self) -> RgbOutput {
        self.output
    }

    pub fn init(
        &mut self,
        width: u32,
        height: u32,
        radius: i32,
        eps: f32,
        staging: Staging,
    ) -> FilterResult<()> {
        if width == 0 || height == 0 {
            return Err(FilterError::InvalidDimensions(width, height));
        }
        let pixels = width * height;
        self.staging = staging;

        self.h_in = if staging.wants_input() {
            vec![0u8; 3 * pixels as usize]
        } else {
            Vec::new()
        };
        if staging.wants_output() {
            match self.output {
                RgbOutput::Separated => {
                    self.h_out_r = vec![0f32; pixels as usize];
                    self.h_out_g = vec![0f32; pixels as usize];
                    self.h_out_b = vec![0f32; pixels as usize];
                }
                RgbOutput::InterleavedFloat => {
                    self.h_out_packed = vec![0f32; 3 * pixels as usize];
                }
            }
        } else {
            self.h_out_r = Vec::new();
            self.h_out_g = Vec::new();
            self.h_out_b = Vec::new();
            self.h_out_packed = Vec::new();
        }

        self.separate.init(pixels, Staging::None)?;

        let planes = [
            self.separate.buffer(SeparateMemory::DOutR),
            self.separate.buffer(SeparateMemory::DOutG),
            self.separate.buffer(SeparateMemory::DOutB),
        ];
        for (gf, plane) in [&mut self.gf_r, &mut self.gf_g, &mut self.gf_b]
            .into_iter()
            .zip(planes)
        {
            gf.set_buffer(GuidedMemory::DIn, plane.ok_or(FilterError::Uninitialized)?);
            gf.init(
                width,
                height,
                radius,
                eps,
                false,
                DEFAULT_BOX_SCALING,
                1.0,
                Staging::None,
            )?;
        }

        if let Some(combine) = &mut self.combine {
            let outs = [
                self.gf_r.buffer(GuidedMemory::DOut),
                self.gf_g.buffer(GuidedMemory::DOut),
                self.gf_b.buffer(GuidedMemory::DOut),
            ];
            combine.set_buffer(CombineMemory::DInR, outs[0].ok_or(FilterError::Uninitialized)?);
            combine.set_buffer(CombineMemory::DInG, outs[1].ok_or(FilterError::Uninitialized)?);
            combine.set_buffer(CombineMemory::DInB, outs[2].ok_or(FilterError::Uninitialized)?);
            combine.init(pixels, Staging::None)?;
        }
        Ok(())
    }

    /// Stages and uploads a packed byte frame.
    pub fn write(&mut self, data: Option<&[u8]>, wait: &[Event]) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        if let Some(data) = data {
            stage_input(&mut self.h_in, data)?;
        }
        let d_in = self
            .separate
            .buffer(SeparateMemory::DIn)
            .ok_or(FilterError::Uninitialized)?;
        let ev = self.dev.write_bytes(d_in, &self.h_in, wait)?;
        Ok(Some(ev))
    }

    /// Blocking readback of the three filtered planes (`Separated` kind).
    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<[&[f32]; 3]>> {
        if self.output != RgbOutput::Separated {
            return Err(FilterError::OperationFailed(
                "output frame is interleaved".into(),
            ));
        }
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let outs = [
            self.gf_r.buffer(GuidedMemory::DOut).ok_or(FilterError::Uninitialized)?,
            self.gf_g.buffer(GuidedMemory::DOut).ok_or(FilterError::Uninitialized)?,
            self.gf_b.buffer(GuidedMemory::DOut).ok_or(FilterError::Uninitialized)?,
        ];
        self.dev
            .read_bytes(outs[0], bytemuck::cast_slice_mut(&mut self.h_out_r), wait)?;
        self.dev
            .read_bytes(outs[1], bytemuck::cast_slice_mut(&mut self.h_out_g), &[])?;
        self.dev
            .read_bytes(outs[2], bytemuck::cast_slice_mut(&mut self.h_out_b), &[])?;
        Ok(Some([&self.h_out_r, &self.h_out_g, &self.h_out_b]))
    }

    /// Blocking readback of the packed frame (`InterleavedFloat` kind).
    pub fn read_packed(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        let combine = self.combine.as_ref().ok_or_else(|| {
            FilterError::OperationFailed("output frame is not interleaved".into())
        })?;
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = combine
            .buffer(CombineMemory::DOut)
            .ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_out, bytemuck::cast_slice_mut(&mut self.h_out_packed), wait)?;
        Ok(Some(&self.h_out_packed))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let sep = self.separate.run(wait)?;
        self.gf_r.run(&[sep])?;
        self.gf_g.run(&[])?;
        let ev = self.gf_b.run(&[])?;
        match &self.combine {
            Some(combine) => combine.run(&[ev]),
            None => Ok(ev),
        }
    }

    pub fn set_radius(&mut self, radius: i32) -> FilterResult<()> {
        for gf in [&mut self.gf_r, &mut self.gf_g, &mut self.gf_b] {
            gf.set_radius(radius)?;
        }
        Ok(())
    }

    pub fn set_eps(&mut self, eps: f32) -> FilterResult<()> {
        for gf in [&mut self.gf_r, &mut self.gf_g, &mut self.gf_b] {
            gf.set_eps(eps)?;
        }
        Ok(())
    }
}

/// Filters a raw u16 depth frame: promotion to scaled f32, then one
/// self-guided filter with zero samples pinned (invalid readings stay
/// invalid) and the promotion scale undone on output.
pub struct GuidedFilterDepth {
    dev: Arc<dyn ComputeDevice>,
    d_scaling: f32,
    staging: Staging,
    h_in: Vec<u16>,
    h_out: Vec<f32>,
    depth: DepthToFloat,
    gf: GuidedFilter,
}

impl GuidedFilterDepth {
    pub fn new(dev: Arc<dyn ComputeDevice>) -> Self {
        Self {
            dev: Arc::clone(&dev),
            d_scaling: DEFAULT_DEPTH_SCALING,
            staging: Staging::None,
            h_in: Vec::new(),
            h_out: Vec::new(),
            depth: DepthToFloat::new(Arc::clone(&dev), 0),
            gf: GuidedFilter::new(dev, GuidedKind::SelfGuided, [0, 1]),
        }
    }

    pub fn init(
        &mut self,
        width: u32,
        height: u32,
        radius: i32,
        eps: f32,
        d_scaling: f32,
        staging: Staging,
    ) -> FilterResult<()> {
        if width == 0 || height == 0 {
            return Err(FilterError::InvalidDimensions(width, height));
        }
        let pixels = width * height;
        self.d_scaling = d_scaling;
        self.staging = staging;

        self.h_in = if staging.wants_input() {
            vec![0u16; pixels as usize]
        } else {
            Vec::new()
        };
        self.h_out = if staging.wants_output() {
            vec![0f32; pixels as usize]
        } else {
            Vec::new()
        };

        self.depth.init(pixels, d_scaling, Staging::None)?;
        let promoted = self
            .depth
            .buffer(DepthMemory::DOut)
            .ok_or(FilterError::Uninitialized)?;
        self.gf.set_buffer(GuidedMemory::DIn, promoted);
        self.gf.init(
            width,
            height,
            radius,
            eps,
            true,
            DEPTH_BOX_SCALING,
            1.0 / d_scaling,
            Staging::None,
        )?;
        Ok(())
    }

    pub fn write(&mut self, data: Option<&[u16]>, wait: &[Event]) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        if let Some(data) = data {
            stage_input(&mut self.h_in, data)?;
        }
        let d_in = self
            .depth
            .buffer(DepthMemory::DIn)
            .ok_or(FilterError::Uninitialized)?;
        let ev = self
            .dev
            .write_bytes(d_in, bytemuck::cast_slice(&self.h_in), wait)?;
        Ok(Some(ev))
    }

    pub fn read(&mut self, wait: &[Event]) -> FilterResult<Option<&[f32]>> {
        if !self.staging.wants_output() {
            return Ok(None);
        }
        let d_out = self
            .gf
            .buffer(GuidedMemory::DOut)
            .ok_or(FilterError::Uninitialized)?;
        self.dev
            .read_bytes(d_out, bytemuck::cast_slice_mut(&mut self.h_out), wait)?;
        Ok(Some(&self.h_out))
    }

    pub fn run(&self, wait: &[Event]) -> FilterResult<Event> {
        let ev = self.depth.run(wait)?;
        self.gf.run(&[ev])
    }

    pub fn set_radius(&mut self, radius: i32) -> FilterResult<()> {
        self.gf.set_radius(radius)
    }

    pub fn set_eps(&mut self, eps: f32) -> FilterResult<()> {
        self.gf.set_eps(eps)
    }

    pub fn d_scaling(&self) -> f32 {
        self.d_scaling
    }

    /// Updates the promotion scale and the matching inverse on the
    /// filter output so round-tripped magnitudes stay in raw units.
    pub fn set_d_scaling(&mut self, d_scaling: f32) -> FilterResult<()> {
        self.depth.set_scaling(d_scaling)?;
        self.gf.set_output_scaling(1.0 / d_scaling)?;
        self.d_scaling = d_scaling;
        Ok(())
    }
}
