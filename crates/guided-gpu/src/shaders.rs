//! WGSL shader sources for the compute pipelines.
//!
//! Every kernel binds a 32-byte uniform parameter block at binding 0 and
//! its working buffers at bindings 1..=n, in the order the host records
//! them. Scalar f32/i32 parameters travel as raw words and are bitcast
//! on the host side.

/// Per-row inclusive prefix sum with pre-scale. One group of 64 threads
/// covers 512 elements; group totals land in the sums buffer when the
/// row spans more than one group.
pub const INCLUSIVE_SCAN: &str = r#"
struct Params {
    n4: u32,
    groups: u32,
    scaling: f32,
    _p0: u32,
    _p1: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<storage, read_write> sums: array<f32>;

var<workgroup> totals: array<f32, 64>;

@compute @workgroup_size(64)
fn main(@builtin(workgroup_id) wg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let width = 4u * params.n4;
    let row = wg.y;
    let base = row * width;
    let start = wg.x * 512u + lid.x * 8u;

    var vals: array<f32, 8>;
    var acc = 0.0;
    for (var k = 0u; k < 8u; k = k + 1u) {
        let idx = start + k;
        if idx < width {
            acc = acc + input[base + idx] * params.scaling;
        }
        vals[k] = acc;
    }
    totals[lid.x] = acc;
    workgroupBarrier();

    for (var stride = 1u; stride < 64u; stride = stride * 2u) {
        var v = totals[lid.x];
        if lid.x >= stride {
            v = v + totals[lid.x - stride];
        }
        workgroupBarrier();
        totals[lid.x] = v;
        workgroupBarrier();
    }

    let carry = totals[lid.x] - acc;
    for (var k = 0u; k < 8u; k = k + 1u) {
        let idx = start + k;
        if idx < width {
            output[base + idx] = vals[k] + carry;
        }
    }
    if params.groups > 1u && lid.x == 63u {
        sums[row * params.groups + wg.x] = totals[63u];
    }
}
"#;

/// Adds the scanned group totals onto every element of groups 1 onward.
/// Workgroup x covers scan group x + 1; four elements per thread.
pub const ADD_GROUP_SUMS: &str = r#"
struct Params {
    n4: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
    _p3: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> sums: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(128)
fn main(@builtin(workgroup_id) wg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>) {
    let width = 4u * params.n4;
    let groups = nwg.x + 1u;
    let row = wg.y;
    let g = wg.x + 1u;
    let carry = sums[row * groups + g - 1u];
    let start = g * 512u + lid.x * 4u;
    for (var k = 0u; k < 4u; k = k + 1u) {
        let idx = start + k;
        if idx < width {
            output[row * width + idx] = output[row * width + idx] + carry;
        }
    }
}
"#;

/// 4x4-block matrix transpose; one block per thread.
pub const TRANSPOSE: &str = r#"
struct Params {
    w4: u32,
    h4: u32,
    _p0: u32,
    _p1: u32,
    _p2: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.w4 || gid.y >= params.h4 {
        return;
    }
    let width = 4u * params.w4;
    let height = 4u * params.h4;
    for (var i = 0u; i < 4u; i = i + 1u) {
        for (var j = 0u; j < 4u; j = j + 1u) {
            let x = 4u * gid.x + j;
            let y = 4u * gid.y + i;
            output[x * height + y] = input[y * width + x];
        }
    }
}
"#;

/// Windowed mean via SAT corner differencing. The window clamps to the
/// image and divides by the true in-bounds count; `transposed` selects
/// the table layout. Launch grid is (rows, cols).
pub const BOX_FILTER_SAT: &str = r#"
struct Params {
    rows: u32,
    cols: u32,
    radius: i32,
    inv_scaling: f32,
    transposed: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> sat: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

fn lookup(x: i32, y: i32) -> f32 {
    if x < 0 || y < 0 {
        return 0.0;
    }
    if params.transposed != 0u {
        return sat[u32(x) * params.rows + u32(y)];
    }
    return sat[u32(y) * params.cols + u32(x)];
}

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.rows || gid.y >= params.cols {
        return;
    }
    let y = i32(gid.x);
    let x = i32(gid.y);
    let x0 = max(x - params.radius, 0);
    let x1 = min(x + params.radius, i32(params.cols) - 1);
    let y0 = max(y - params.radius, 0);
    let y1 = min(y + params.radius, i32(params.rows) - 1);

    let sum = lookup(x1, y1) - lookup(x0 - 1, y1) - lookup(x1, y0 - 1)
        + lookup(x0 - 1, y0 - 1);
    let count = f32((x1 - x0 + 1) * (y1 - y0 + 1));
    output[gid.x * params.cols + gid.y] = sum * params.inv_scaling / count;
}
"#;

/// Direct windowed mean; same clamped-count edge rule, no SAT.
pub const BOX_FILTER: &str = r#"
struct Params {
    cols: u32,
    rows: u32,
    radius: i32,
    _p0: u32,
    _p1: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.cols || gid.y >= params.rows {
        return;
    }
    let x = i32(gid.x);
    let y = i32(gid.y);
    let x0 = max(x - params.radius, 0);
    let x1 = min(x + params.radius, i32(params.cols) - 1);
    let y0 = max(y - params.radius, 0);
    let y1 = min(y + params.radius, i32(params.rows) - 1);

    var sum = 0.0;
    for (var yy = y0; yy <= y1; yy = yy + 1) {
        for (var xx = x0; xx <= x1; xx = xx + 1) {
            sum = sum + input[u32(yy) * params.cols + u32(xx)];
        }
    }
    let count = f32((x1 - x0 + 1) * (y1 - y0 + 1));
    output[gid.y * params.cols + gid.x] = sum / count;
}
"#;

/// Elementwise product, four lanes per thread.
pub const MULT: &str = r#"
struct Params {
    quarter: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
    _p3: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> a: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> b: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read_write> output: array<vec4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.quarter {
        return;
    }
    output[i] = a[i] * b[i];
}
"#;

/// Elementwise integer power, four lanes per thread.
pub const POWN: &str = r#"
struct Params {
    quarter: u32,
    n: i32,
    _p0: u32,
    _p1: u32,
    _p2: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> output: array<vec4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.quarter {
        return;
    }
    let v = input[i];
    var acc = vec4<f32>(1.0);
    for (var k = 0; k < params.n; k = k + 1) {
        acc = acc * v;
    }
    output[i] = acc;
}
"#;

/// Self-guided coefficients: a = var/(var + eps), b = (1 - a) * mean_p.
pub const GF_AB: &str = r#"
struct Params {
    quarter: u32,
    eps: f32,
    _p0: u32,
    _p1: u32,
    _p2: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> mean_p: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> mean_p2: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read_write> out_a: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read_write> out_b: array<vec4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.quarter {
        return;
    }
    let mp = mean_p[i];
    let variance = mean_p2[i] - mp * mp;
    let a = variance / (variance + vec4<f32>(params.eps));
    out_a[i] = a;
    out_b[i] = (vec4<f32>(1.0) - a) * mp;
}
"#;

/// Cross-guided variance and covariance from the four box means.
pub const GF_VAR_IP: &str = r#"
struct Params {
    quarter: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
    _p3: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> corr_i: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> corr_ip: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> mean_i: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read> mean_p: array<vec4<f32>>;
@group(0) @binding(5) var<storage, read_write> out_var: array<vec4<f32>>;
@group(0) @binding(6) var<storage, read_write> out_cov: array<vec4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.quarter {
        return;
    }
    let mi = mean_i[i];
    out_var[i] = corr_i[i] - mi * mi;
    out_cov[i] = corr_ip[i] - mi * mean_p[i];
}
"#;

/// Cross-guided coefficients: a = cov/(var + eps), b = mean_p - a * mean_i.
pub const GF_AB_IP: &str = r#"
struct Params {
    quarter: u32,
    eps: f32,
    _p0: u32,
    _p1: u32,
    _p2: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> in_var: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> in_cov: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> mean_i: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read> mean_p: array<vec4<f32>>;
@group(0) @binding(5) var<storage, read_write> out_a: array<vec4<f32>>;
@group(0) @binding(6) var<storage, read_write> out_b: array<vec4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.quarter {
        return;
    }
    let a = in_cov[i] / (in_var[i] + vec4<f32>(params.eps));
    out_a[i] = a;
    out_b[i] = mean_p[i] - a * mean_i[i];
}
"#;

/// Final blend q = (mean_a * src + mean_b) * scaling, optionally pinned
/// to zero wherever the source sample is zero.
pub const GF_Q: &str = r#"
struct Params {
    quarter: u32,
    zero_out: u32,
    scaling: f32,
    _p0: u32,
    _p1: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> src: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> mean_a: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> mean_b: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read_write> output: array<vec4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.quarter {
        return;
    }
    let s = src[i];
    var q = (mean_a[i] * s + mean_b[i]) * params.scaling;
    if params.zero_out != 0u {
        q = select(q, vec4<f32>(0.0), s == vec4<f32>(0.0));
    }
    output[i] = q;
}
"#;

/// Packed f32 RGB frame into three planes; one pixel per thread.
pub const SEPARATE_RGB_FLOAT: &str = r#"
struct Params {
    pixels: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
    _p3: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> out_r: array<f32>;
@group(0) @binding(3) var<storage, read_write> out_g: array<f32>;
@group(0) @binding(4) var<storage, read_write> out_b: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let px = gid.x;
    if px >= params.pixels {
        return;
    }
    out_r[px] = input[3u * px];
    out_g[px] = input[3u * px + 1u];
    out_b[px] = input[3u * px + 2u];
}
"#;

/// Packed byte RGB frame into three normalized f32 planes. The input
/// binds as words; bytes are extracted by shifting.
pub const SEPARATE_RGB_UCHAR: &str = r#"
struct Params {
    pixels: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
    _p3: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<u32>;
@group(0) @binding(2) var<storage, read_write> out_r: array<f32>;
@group(0) @binding(3) var<storage, read_write> out_g: array<f32>;
@group(0) @binding(4) var<storage, read_write> out_b: array<f32>;

fn byte_at(i: u32) -> f32 {
    let word = input[i / 4u];
    let b = (word >> (8u * (i % 4u))) & 0xffu;
    return f32(b) / 255.0;
}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let px = gid.x;
    if px >= params.pixels {
        return;
    }
    out_r[px] = byte_at(3u * px);
    out_g[px] = byte_at(3u * px + 1u);
    out_b[px] = byte_at(3u * px + 2u);
}
"#;

/// Three f32 planes back into a packed f32 frame.
pub const COMBINE_RGB_FLOAT: &str = r#"
struct Params {
    pixels: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
    _p3: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> in_r: array<f32>;
@group(0) @binding(2) var<storage, read> in_g: array<f32>;
@group(0) @binding(3) var<storage, read> in_b: array<f32>;
@group(0) @binding(4) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let px = gid.x;
    if px >= params.pixels {
        return;
    }
    output[3u * px] = in_r[px];
    output[3u * px + 1u] = in_g[px];
    output[3u * px + 2u] = in_b[px];
}
"#;

/// Three f32 planes quantized into a packed byte frame. Each thread
/// packs four pixels (three whole output words), so no two threads
/// touch the same word.
pub const COMBINE_RGB_UCHAR: &str = r#"
struct Params {
    pixels: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
    _p3: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> in_r: array<f32>;
@group(0) @binding(2) var<storage, read> in_g: array<f32>;
@group(0) @binding(3) var<storage, read> in_b: array<f32>;
@group(0) @binding(4) var<storage, read_write> output: array<u32>;

fn quantize(v: f32) -> u32 {
    return u32(clamp(round(v * 255.0), 0.0, 255.0));
}

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let quad = gid.x;
    let p0 = 4u * quad;
    if p0 >= params.pixels {
        return;
    }
    var bytes: array<u32, 12>;
    for (var k = 0u; k < 4u; k = k + 1u) {
        let px = min(p0 + k, params.pixels - 1u);
        bytes[3u * k] = quantize(in_r[px]);
        bytes[3u * k + 1u] = quantize(in_g[px]);
        bytes[3u * k + 2u] = quantize(in_b[px]);
    }
    for (var w = 0u; w < 3u; w = w + 1u) {
        output[3u * quad + w] = bytes[4u * w]
            | (bytes[4u * w + 1u] << 8u)
            | (bytes[4u * w + 2u] << 16u)
            | (bytes[4u * w + 3u] << 24u);
    }
}
"#;

/// u16 depths to scaled f32. Each thread unpacks two input words into
/// four output samples.
pub const DEPTH_TO_FLOAT: &str = r#"
struct Params {
    quarter: u32,
    scaling: f32,
    _p0: u32,
    _p1: u32,
    _p2: vec4<u32>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<u32>;
@group(0) @binding(2) var<storage, read_write> output: array<vec4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if i >= params.quarter {
        return;
    }
    let w0 = input[2u * i];
    let w1 = input[2u * i + 1u];
    output[i] = vec4<f32>(
        f32(w0 & 0xffffu),
        f32(w0 >> 16u),
        f32(w1 & 0xffffu),
        f32(w1 >> 16u),
    ) * params.scaling;
}
"#;
