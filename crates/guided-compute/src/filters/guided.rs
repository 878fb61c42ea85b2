//! Guided image filter (He et al.), self- and cross-guided.

use std::sync::Arc;

use guided_core::{FilterError, FilterResult, Staging};

use crate::backend::{Arg, BufferId, ComputeDevice, Event, Kernel, KernelCall};
use crate::stage::{Slot, stage_input};

use super::boxfilter::{BoxFilterSat, BoxMemory};

/// SAT pre-scale applied inside the internal box filters. Keeps the
/// running prefix sums inside f32 range for frame-sized images.
pub const DEFAULT_BOX_SCALING: f32 = 1e-4;

/// Guide/source relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidedKind {
    /// The image is its own guide (I == p).
    SelfGuided,
    /// A separate guide image steers the filtering (I != p).
    CrossGuided,
}

/// Buffer slots exposed by [`GuidedFilter`].
///
/// `DIn` is the source for the self-guided kind and the guide for the
/// cross-guided kind; `DInP` is the cross-guided source (it aliases
/// `DIn` when self-guided). `DA`/`DB` expose the per-pixel coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidedMemory {
    DIn,
    DInP,
    DOut,
    DA,
    DB,
}

struct SelfPlan {
    squared: KernelCall,
    mean_p: BoxFilterSat,
    mean_p2: BoxFilterSat,
    ab: KernelCall,
    mean_a: BoxFilterSat,
    mean_b: BoxFilterSat,
    q: KernelCall,
}

struct CrossPlan {
    mult_ii: KernelCall,
    mult_ip: KernelCall,
    mean_i: BoxFilterSat,
    mean_p: BoxFilterSat,
    corr_i: BoxFilterSat,
    corr_ip: BoxFilterSat,
    var: KernelCall,
    ab: KernelCall,
    mean_a: BoxFilterSat,
    mean_b: BoxFilterSat,
    q: KernelCall,
}

enum Plan {
    SelfGuided(SelfPlan),
    CrossGuided(CrossPlan),
}

/// Edge-preserving smoothing driven by local variance statistics.
///
/// The five windowed means are split across the two logical queues so
/// independent box filters overlap; the cross-queue edges (squared means
/// into the coefficient kernel, coefficients into `mean_b`, `mean_b`
/// into the final blend) are carried by event wait-lists.
pub struct GuidedFilter {
    dev: Arc<dyn ComputeDevice>,
    kind: GuidedKind,
    queues: [usize; 2],
    width: u32,
    height: u32,
    eps: f32,
    staging: Staging,
    h_in_i: Vec<f32>,
    h_in_p: Vec<f32>,
    h_out: Vec<f32>,
    d_in: Slot,
    d_in_p: Slot,
    d_out: Slot,
    d_a: Slot,
    d_b: Slot,
    plan: Option<Plan>,
}

impl GuidedFilter {
    pub fn new(dev: Arc<dyn ComputeDevice>, kind: GuidedKind, queues: [usize; 2]) -> Self {
        Self {
            dev,
            kind,
            queues,
            width: 0,
            height: 0,
            eps: 0.0,
            staging: Staging::None,
            h_in_i: Vec::new(),
            h_in_p: Vec::new(),
            h_out: Vec::new(),
            d_in: Slot::default(),
            d_in_p: Slot::default(),
            d_out: Slot::default(),
            d_a: Slot::default(),
            d_b: Slot::default(),
            plan: None,
        }
    }

    pub fn kind(&self) -> GuidedKind {
        self.kind
    }

    fn slot(&self, mem: GuidedMemory) -> &Slot {
        match mem {
            GuidedMemory::DIn => &self.d_in,
            GuidedMemory::DInP => match self.kind {
                GuidedKind::SelfGuided => &self.d_in,
                GuidedKind::CrossGuided => &self.d_in_p,
            },
            GuidedMemory::DOut => &self.d_out,
            GuidedMemory::DA => &self.d_a,
            GuidedMemory::DB => &self.d_b,
        }
    }

    pub fn set_buffer(&mut self, mem: GuidedMemory, buf: BufferId) {
        match mem {
            GuidedMemory::DIn => self.d_in.assign(buf),
            GuidedMemory::DInP => match self.kind {
                GuidedKind::SelfGuided => self.d_in.assign(buf),
                GuidedKind::CrossGuided => self.d_in_p.assign(buf),
            },
            GuidedMemory::DOut => self.d_out.assign(buf),
            GuidedMemory::DA => self.d_a.assign(buf),
            GuidedMemory::DB => self.d_b.assign(buf),
        }
    }

    pub fn buffer(&self, mem: GuidedMemory) -> Option<BufferId> {
        self.slot(mem).get()
    }

    /// Builds the kernel plan. `zero_out` forces the output to zero
    /// wherever the source sample is zero (invalid depth readings);
    /// `output_scaling` multiplies the blended result and only applies
    /// to the self-guided kind.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        width: u32,
        height: u32,
        radius: i32,
        eps: f32,
        zero_out: bool,
        box_scaling: f32,
        output_scaling: f32,
        staging: Staging,
    ) -> FilterResult<()> {
        if width == 0 || height == 0 {
            return Err(FilterError::InvalidDimensions(width, height));
        }
        let len = width * height;
        if len % 4 != 0 {
            return Err(FilterError::NotMultipleOf { what: "pixel count", of: 4, got: len });
        }

        self.width = width;
        self.height = height;
        self.eps = eps;
        self.staging = staging;

        let buffer_len = len as usize;
        if staging.wants_input() {
            self.h_in_i = vec![0f32; buffer_len];
            self.h_in_p = match self.kind {
                GuidedKind::SelfGuided => Vec::new(),
                GuidedKind::CrossGuided => vec![0f32; buffer_len],
            };
        } else {
            self.h_in_i = Vec::new();
            self.h_in_p = Vec::new();
        }
        self.h_out = if staging.wants_output() {
            vec![0f32; buffer_len]
        } else {
            Vec::new()
        };

        let bytes = buffer_len * 4;
        let d_in = self.d_in.resolve(self.dev.as_ref(), bytes)?;
        let d_out = self.d_out.resolve(self.dev.as_ref(), bytes)?;
        let d_a = self.d_a.resolve(self.dev.as_ref(), bytes)?;
        let d_b = self.d_b.resolve(self.dev.as_ref(), bytes)?;

        let quarter = len / 4;
        let ew_local = [self.dev.wg_multiple(), 1];
        let [q0, q1] = self.queues;

        let box_on = |queue: usize, d_src: BufferId| -> FilterResult<BoxFilterSat> {
            let mut bf = BoxFilterSat::new(Arc::clone(&self.dev), queue, true)?;
            bf.set_buffer(BoxMemory::DIn, d_src);
            bf.init(width, height, radius, box_scaling, Staging::None)?;
            Ok(bf)
        };

        self.plan = Some(match self.kind {
            GuidedKind::SelfGuided => {
                let d_p2 = self.dev.alloc(bytes)?;

                let mean_p = box_on(q0, d_in)?;
                let mean_p2 = box_on(q1, d_p2)?;
                let mean_a = box_on(q0, d_a)?;
                let mean_b = box_on(q1, d_b)?;

                let d_mean_p = mean_p.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
                let d_mean_p2 = mean_p2.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
                let d_mean_a = mean_a.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
                let d_mean_b = mean_b.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;

                Plan::SelfGuided(SelfPlan {
                    squared: KernelCall {
                        kernel: Kernel::Pown,
                        global: [quarter, 1],
                        local: ew_local,
                        args: vec![Arg::Buf(d_in), Arg::Buf(d_p2), Arg::I32(2)],
                    },
                    mean_p,
                    mean_p2,
                    ab: KernelCall {
                        kernel: Kernel::GfAb,
                        global: [quarter, 1],
                        local: ew_local,
                        args: vec![
                            Arg::Buf(d_mean_p),
                            Arg::Buf(d_mean_p2),
                            Arg::Buf(d_a),
                            Arg::Buf(d_b),
                            Arg::F32(eps),
                        ],
                    },
                    mean_a,
                    mean_b,
                    q: KernelCall {
                        kernel: Kernel::GfQ,
                        global: [quarter, 1],
                        local: ew_local,
                        args: vec![
                            Arg::Buf(d_in),
                            Arg::Buf(d_mean_a),
                            Arg::Buf(d_mean_b),
                            Arg::Buf(d_out),
                            Arg::I32(zero_out as i32),
                            Arg::F32(output_scaling),
                        ],
                    },
                })
            }
            GuidedKind::CrossGuided => {
                let d_in_p = self.d_in_p.resolve(self.dev.as_ref(), bytes)?;
                let d_ii = self.dev.alloc(bytes)?;
                let d_ip = self.dev.alloc(bytes)?;
                let d_var = self.dev.alloc(bytes)?;
                let d_cov = self.dev.alloc(bytes)?;

                let mean_i = box_on(q0, d_in)?;
                let mean_p = box_on(q0, d_in_p)?;
                let corr_i = box_on(q1, d_ii)?;
                let corr_ip = box_on(q1, d_ip)?;
                let mean_a = box_on(q0, d_a)?;
                let mean_b = box_on(q1, d_b)?;

                let d_mean_i = mean_i.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
                let d_mean_p = mean_p.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
                let d_corr_i = corr_i.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
                let d_corr_ip = corr_ip.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
                let d_mean_a = mean_a.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;
                let d_mean_b = mean_b.buffer(BoxMemory::DOut).ok_or(FilterError::Uninitialized)?;

                Plan::CrossGuided(CrossPlan {
                    mult_ii: KernelCall {
                        kernel: Kernel::Mult,
                        global: [quarter, 1],
                        local: ew_local,
                        args: vec![Arg::Buf(d_in), Arg::Buf(d_in), Arg::Buf(d_ii)],
                    },
                    mult_ip: KernelCall {
                        kernel: Kernel::Mult,
                        global: [quarter, 1],
                        local: ew_local,
                        args: vec![Arg::Buf(d_in), Arg::Buf(d_in_p), Arg::Buf(d_ip)],
                    },
                    mean_i,
                    mean_p,
                    corr_i,
                    corr_ip,
                    var: KernelCall {
                        kernel: Kernel::GfVarIp,
                        global: [quarter, 1],
                        local: ew_local,
                        args: vec![
                            Arg::Buf(d_corr_i),
                            Arg::Buf(d_corr_ip),
                            Arg::Buf(d_mean_i),
                            Arg::Buf(d_mean_p),
                            Arg::Buf(d_var),
                            Arg::Buf(d_cov),
                        ],
                    },
                    ab: KernelCall {
                        kernel: Kernel::GfAbIp,
                        global: [quarter, 1],
                        local: ew_local,
                        args: vec![
                            Arg::Buf(d_var),
                            Arg::Buf(d_cov),
                            Arg::Buf(d_mean_i),
                            Arg::Buf(d_mean_p),
                            Arg::Buf(d_a),
                            Arg::Buf(d_b),
                            Arg::F32(eps),
                        ],
                    },
                    mean_a,
                    mean_b,
                    q: KernelCall {
                        kernel: Kernel::GfQ,
                        global: [quarter, 1],
                        local: ew_local,
                        args: vec![
                            Arg::Buf(d_in),
                            Arg::Buf(d_mean_a),
                            Arg::Buf(d_mean_b),
                            Arg::Buf(d_out),
                            Arg::I32(zero_out as i32),
                            Arg::F32(1.0),
                        ],
                    },
                })
            }
        });
        Ok(())
    }

    /// Stages host data into `DIn` or `DInP` and uploads it.
    pub fn write(
        &mut self,
        mem: GuidedMemory,
        data: Option<&[f32]>,
        wait: &[Event],
    ) -> FilterResult<Option<Event>> {
        if !self.staging.wants_input() {
            return Ok(None);
        }
        let buf = self.slot(mem).get().ok_or(FilterError::Uninitialized)?;
        let host = match (self.kind, mem) {
            (GuidedKind::SelfGuided, GuidedMemory::DIn | GuidedMemory::DInP)
            | (GuidedKind::CrossGuided, GuidedMemory::DIn) => &mut self.h_in_i,
            (GuidedKind::CrossGuided, GuidedMemory::DInP) => &mut self.h_in_p,
            _ => {
                return Err(FilterError::OperationFailed(format!(
                    "{mem:?} is not an input slot"
                )));
            }
        };
        if let Some(data) = data {
            stage_input(host, data)?;
        }
        let ev = self.dev.write_bytes(buf, bytemuck::cast_slice(host), wait)?;
        Ok(Some(ev))
    }

    /// Blocking transfer from the output device buffer into staging.
    /// No-op without output staging. Readback is always blocking;
    /// there is no asynchronous variant.
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
        let plan = self.plan.as_ref().ok_or(FilterError::Uninitialized)?;
        let [q0, q1] = self.queues;
        match plan {
            Plan::SelfGuided(p) => {
                self.dev.enqueue(q1, &p.squared, wait)?;
                p.mean_p.run(wait)?;
                let ev_p2 = p.mean_p2.run(&[])?;
                let ev_ab = self.dev.enqueue(q0, &p.ab, &[ev_p2])?;
                p.mean_a.run(&[])?;
                let ev_mb = p.mean_b.run(&[ev_ab])?;
                self.dev.enqueue(q0, &p.q, &[ev_mb])
            }
            Plan::CrossGuided(p) => {
                p.mean_i.run(wait)?;
                p.mean_p.run(wait)?;
                self.dev.enqueue(q1, &p.mult_ii, wait)?;
                p.corr_i.run(&[])?;
                self.dev.enqueue(q1, &p.mult_ip, &[])?;
                let ev_cip = p.corr_ip.run(&[])?;
                self.dev.enqueue(q0, &p.var, &[ev_cip])?;
                let ev_ab = self.dev.enqueue(q0, &p.ab, &[])?;
                p.mean_a.run(&[])?;
                let ev_mb = p.mean_b.run(&[ev_ab])?;
                self.dev.enqueue(q0, &p.q, &[ev_mb])
            }
        }
    }

    fn boxes_mut(&mut self) -> FilterResult<Vec<&mut BoxFilterSat>> {
        match self.plan.as_mut().ok_or(FilterError::Uninitialized)? {
            Plan::SelfGuided(p) => Ok(vec![
                &mut p.mean_p,
                &mut p.mean_p2,
                &mut p.mean_a,
                &mut p.mean_b,
            ]),
            Plan::CrossGuided(p) => Ok(vec![
                &mut p.mean_i,
                &mut p.mean_p,
                &mut p.corr_i,
                &mut p.corr_ip,
                &mut p.mean_a,
                &mut p.mean_b,
            ]),
        }
    }

    pub fn set_radius(&mut self, radius: i32) -> FilterResult<()> {
        for bf in self.boxes_mut()? {
            bf.set_radius(radius)?;
        }
        Ok(())
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    pub fn set_eps(&mut self, eps: f32) -> FilterResult<()> {
        match self.plan.as_mut().ok_or(FilterError::Uninitialized)? {
            Plan::SelfGuided(p) => p.ab.args[4] = Arg::F32(eps),
            Plan::CrossGuided(p) => p.ab.args[6] = Arg::F32(eps),
        }
        self.eps = eps;
        Ok(())
    }

    /// Updates the SAT pre-scale of every internal box filter.
    pub fn set_box_scaling(&mut self, scaling: f32) -> FilterResult<()> {
        for bf in self.boxes_mut()? {
            bf.set_scaling(scaling)?;
        }
        Ok(())
    }

    pub fn set_output_scaling(&mut self, scaling: f32) -> FilterResult<()> {
        match self.plan.as_mut().ok_or(FilterError::Uninitialized)? {
            Plan::SelfGuided(p) => p.q.args[5] = Arg::F32(scaling),
            Plan::CrossGuided(p) => p.q.args[5] = Arg::F32(scaling),
        }
        Ok(())
    }

    pub fn set_zeroing(&mut self, zero_out: bool) -> FilterResult<()> {
        match self.plan.as_mut().ok_or(FilterError::Uninitialized)? {
            Plan::SelfGuided(p) => p.q.args[4] = Arg::I32(zero_out as i32),
            Plan::CrossGuided(p) => p.q.args[4] = Arg::I32(zero_out as i32),
        }
        Ok(())
    }
}
