//! Stage tests: scan, transpose, SAT, box filters, math, channels.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use guided_compute::channels::{CombineMemory, DepthToFloat, SeparateRgb};
use guided_compute::filters::{BoxFilter, BoxFilterSat, BoxMemory, Sat, Scan, Transpose};
use guided_compute::math::{Mult, MultMemory, Pown};
use guided_compute::{
    Backend, CombineKind, CombineRgb, ComputeDevice, FilterError, SeparateKind, Staging,
    create_device, describe_backends,
};

fn device() -> Arc<dyn ComputeDevice> {
    create_device(Backend::Cpu).unwrap()
}

/// Deterministic values in [0, 1).
fn pseudo_random(seed: u32, n: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2654435761).max(1);
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 8) as f32 / (1u32 << 24) as f32
        })
        .collect()
}

fn serial_box_mean(input: &[f32], width: usize, height: usize, radius: i64) -> Vec<f32> {
    let mut out = vec![0f32; width * height];
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let x0 = (x - radius).max(0) as usize;
            let x1 = (x + radius).min(width as i64 - 1) as usize;
            let y0 = (y - radius).max(0) as usize;
            let y1 = (y + radius).min(height as i64 - 1) as usize;
            let mut sum = 0f64;
            for yy in y0..=y1 {
                for xx in x0..=x1 {
                    sum += input[yy * width + xx] as f64;
                }
            }
            let count = (x1 - x0 + 1) * (y1 - y0 + 1);
            out[y as usize * width + x as usize] = (sum / count as f64) as f32;
        }
    }
    out
}

#[test]
fn test_cpu_backend_available() {
    assert!(Backend::Cpu.is_available());
}

#[test]
fn test_describe_backends() {
    let desc = describe_backends();
    println!("{}", desc);
    assert!(desc.contains("CPU"));
}

#[test]
fn test_scan_matches_serial_prefix_sum() {
    let dev = device();
    let (width, height) = (640u32, 4u32);
    let data = pseudo_random(7, (width * height) as usize);

    let mut scan = Scan::new(dev, 0);
    scan.init(width, height, 1.0, Staging::Io).unwrap();
    scan.write(Some(&data), &[]).unwrap();
    let done = scan.run(&[]).unwrap();
    let out = scan.read(&[done]).unwrap().unwrap();

    for row in 0..height as usize {
        let mut acc = 0f32;
        for col in 0..width as usize {
            acc += data[row * width as usize + col];
            let got = out[row * width as usize + col];
            let tol = 1e-4 * acc.max(1.0);
            assert!(
                (got - acc).abs() <= tol,
                "row {} col {}: {} vs {}",
                row,
                col,
                got,
                acc
            );
        }
    }
}

#[test]
fn test_scan_applies_prescale() {
    let dev = device();
    let data = vec![1.0f32; 64];

    let mut scan = Scan::new(dev, 0);
    scan.init(64, 1, 0.5, Staging::Io).unwrap();
    scan.write(Some(&data), &[]).unwrap();
    let done = scan.run(&[]).unwrap();
    let out = scan.read(&[done]).unwrap().unwrap();

    for (i, v) in out.iter().enumerate() {
        let expected = 0.5 * (i + 1) as f32;
        assert!((v - expected).abs() < 1e-4, "at {}: {} vs {}", i, v, expected);
    }
}

#[test]
fn test_scan_scaling_setter() {
    let dev = device();
    let data = vec![2.0f32; 64];

    let mut scan = Scan::new(dev, 0);
    scan.init(64, 1, 1.0, Staging::Io).unwrap();
    scan.write(Some(&data), &[]).unwrap();
    scan.set_scaling(0.25);
    let done = scan.run(&[]).unwrap();
    let out = scan.read(&[done]).unwrap().unwrap();
    assert_abs_diff_eq!(out[63], 32.0, epsilon = 1e-3);
}

#[test]
fn test_scan_rejects_bad_width() {
    let dev = device();
    let mut scan = Scan::new(Arc::clone(&dev), 0);
    match scan.init(6, 2, 1.0, Staging::None) {
        Err(FilterError::NotMultipleOf { of: 4, .. }) => {}
        other => panic!("expected NotMultipleOf, got {:?}", other.err()),
    }

    let mut scan = Scan::new(dev, 0);
    // One sums row must itself fit a single scan group.
    match scan.init(262148, 2, 1.0, Staging::None) {
        Err(FilterError::RowTooWide { .. }) => {}
        other => panic!("expected RowTooWide, got {:?}", other.err()),
    }
}

#[test]
fn test_scan_rejects_wrong_length_write() {
    let dev = device();
    let mut scan = Scan::new(dev, 0);
    scan.init(64, 2, 1.0, Staging::Io).unwrap();
    let short = vec![1.0f32; 64];
    match scan.write(Some(&short), &[]) {
        Err(FilterError::BufferSizeMismatch { expected, actual }) => {
            assert_eq!(expected, 128);
            assert_eq!(actual, 64);
        }
        other => panic!("expected BufferSizeMismatch, got {:?}", other.err()),
    }
}

#[test]
fn test_scan_staging_direction_no_ops() {
    let dev = device();
    let data = vec![1.0f32; 128];

    // No staging at all: both transfers are silent no-ops.
    let mut scan = Scan::new(Arc::clone(&dev), 0);
    scan.init(64, 2, 1.0, Staging::None).unwrap();
    assert!(scan.write(Some(&data), &[]).unwrap().is_none());
    assert!(scan.read(&[]).unwrap().is_none());

    // Input-only: write uploads, read is a no-op.
    let mut scan = Scan::new(Arc::clone(&dev), 0);
    scan.init(64, 2, 1.0, Staging::I).unwrap();
    assert!(scan.write(Some(&data), &[]).unwrap().is_some());
    assert!(scan.read(&[]).unwrap().is_none());

    // Output-only: write is a no-op, so the device input stays zeroed
    // and the scan of it reads back as zeros.
    let mut scan = Scan::new(dev, 0);
    scan.init(64, 2, 1.0, Staging::O).unwrap();
    assert!(scan.write(Some(&data), &[]).unwrap().is_none());
    let done = scan.run(&[]).unwrap();
    let out = scan.read(&[done]).unwrap().unwrap();
    assert!(out.iter().all(|&v| v == 0.0));
}

#[test]
fn test_transpose_matches_serial() {
    let dev = device();
    let (width, height) = (64usize, 32usize);
    let data = pseudo_random(11, width * height);

    let mut tr = Transpose::new(dev, 0);
    tr.init(width as u32, height as u32, Staging::Io).unwrap();
    tr.write(Some(&data), &[]).unwrap();
    let done = tr.run(&[]).unwrap();
    let out = tr.read(&[done]).unwrap().unwrap();

    for y in 0..height {
        for x in 0..width {
            assert_eq!(out[x * height + y], data[y * width + x], "at ({}, {})", x, y);
        }
    }
}

#[test]
fn test_transpose_involution() {
    let dev = device();
    let (width, height) = (48u32, 80u32);
    let data = pseudo_random(13, (width * height) as usize);

    let mut t1 = Transpose::new(Arc::clone(&dev), 0);
    t1.init(width, height, Staging::I).unwrap();
    let mut t2 = Transpose::new(dev, 0);
    t2.set_buffer(
        guided_compute::filters::TransposeMemory::DIn,
        t1.buffer(guided_compute::filters::TransposeMemory::DOut)
            .unwrap(),
    );
    t2.init(height, width, Staging::O).unwrap();

    t1.write(Some(&data), &[]).unwrap();
    let ev = t1.run(&[]).unwrap();
    let ev = t2.run(&[ev]).unwrap();
    let out = t2.read(&[ev]).unwrap().unwrap();

    assert_eq!(out, &data[..], "double transpose must restore the input");
}

#[test]
fn test_sat_matches_serial() {
    let dev = device();
    let (width, height) = (64usize, 32usize);
    let data = pseudo_random(17, width * height);

    let mut sat = Sat::new(dev, 0, false);
    sat.init(width as u32, height as u32, 1.0, Staging::Io).unwrap();
    sat.write(Some(&data), &[]).unwrap();
    let done = sat.run(&[]).unwrap();
    let out = sat.read(&[done]).unwrap().unwrap();

    // Serial SAT in f64.
    let mut reference = vec![0f64; width * height];
    for y in 0..height {
        let mut row_acc = 0f64;
        for x in 0..width {
            row_acc += data[y * width + x] as f64;
            let above = if y > 0 { reference[(y - 1) * width + x] } else { 0.0 };
            reference[y * width + x] = row_acc + above;
        }
    }

    for (i, (&got, &want)) in out.iter().zip(reference.iter()).enumerate() {
        let tol = 1e-4 * (want.abs() as f32).max(1.0);
        assert!(
            (got - want as f32).abs() <= tol,
            "at {}: {} vs {}",
            i,
            got,
            want
        );
    }
}

#[test]
fn test_sat_transposed_layout() {
    let dev = device();
    let (width, height) = (32usize, 16usize);
    let data = pseudo_random(19, width * height);

    let mut plain = Sat::new(Arc::clone(&dev), 0, false);
    plain.init(width as u32, height as u32, 1.0, Staging::Io).unwrap();
    plain.write(Some(&data), &[]).unwrap();
    let ev = plain.run(&[]).unwrap();
    let row_major: Vec<f32> = plain.read(&[ev]).unwrap().unwrap().to_vec();

    let mut tr = Sat::new(dev, 0, true);
    tr.init(width as u32, height as u32, 1.0, Staging::Io).unwrap();
    tr.write(Some(&data), &[]).unwrap();
    let ev = tr.run(&[]).unwrap();
    let transposed = tr.read(&[ev]).unwrap().unwrap();

    for y in 0..height {
        for x in 0..width {
            let a = transposed[x * height + y];
            let b = row_major[y * width + x];
            assert!((a - b).abs() <= 1e-3 * b.abs().max(1.0), "at ({}, {})", x, y);
        }
    }
}

#[test]
fn test_box_filter_sat_matches_serial_mean() {
    let dev = device();
    let (width, height) = (64usize, 48usize);
    let radius = 3;
    let data = pseudo_random(23, width * height);
    let reference = serial_box_mean(&data, width, height, radius as i64);

    let mut bf = BoxFilterSat::new(dev, 0, true).unwrap();
    bf.init(width as u32, height as u32, radius, 1e-4, Staging::Io)
        .unwrap();
    bf.write(Some(&data), &[]).unwrap();
    let done = bf.run(&[]).unwrap();
    let out = bf.read(&[done]).unwrap().unwrap();

    for (i, (&got, &want)) in out.iter().zip(reference.iter()).enumerate() {
        assert!((got - want).abs() < 1e-3, "at {}: {} vs {}", i, got, want);
    }
}

#[test]
fn test_box_filter_edges_use_true_count() {
    // Constant input stays constant everywhere only if edge windows
    // divide by the in-bounds sample count.
    let dev = device();
    let (width, height) = (32usize, 32usize);
    let data = vec![1.0f32; width * height];

    let mut bf = BoxFilterSat::new(dev, 0, true).unwrap();
    bf.init(width as u32, height as u32, 5, 1e-4, Staging::Io).unwrap();
    bf.write(Some(&data), &[]).unwrap();
    let done = bf.run(&[]).unwrap();
    let out = bf.read(&[done]).unwrap().unwrap();

    for (i, &v) in out.iter().enumerate() {
        assert!((v - 1.0).abs() < 5e-4, "at {}: {}", i, v);
    }
}

#[test]
fn test_box_filter_direct_matches_serial_mean() {
    let dev = device();
    let (width, height) = (48usize, 32usize);
    let radius = 2;
    let data = pseudo_random(29, width * height);
    let reference = serial_box_mean(&data, width, height, radius as i64);

    let mut bf = BoxFilter::new(dev, 0).unwrap();
    bf.init(width as u32, height as u32, radius, Staging::Io).unwrap();
    bf.write(Some(&data), &[]).unwrap();
    let done = bf.run(&[]).unwrap();
    let out = bf.read(&[done]).unwrap().unwrap();

    for (i, (&got, &want)) in out.iter().zip(reference.iter()).enumerate() {
        assert!((got - want).abs() < 1e-4, "at {}: {} vs {}", i, got, want);
    }
}

#[test]
fn test_box_radius_setter_no_realloc() {
    let dev = device();
    let (width, height) = (32usize, 32usize);
    let data = pseudo_random(31, width * height);

    let mut bf = BoxFilterSat::new(dev, 0, true).unwrap();
    bf.init(width as u32, height as u32, 1, 1e-4, Staging::Io).unwrap();
    let d_out = bf.buffer(BoxMemory::DOut).unwrap();

    bf.write(Some(&data), &[]).unwrap();
    let done = bf.run(&[]).unwrap();
    let small: Vec<f32> = bf.read(&[done]).unwrap().unwrap().to_vec();

    bf.set_radius(4).unwrap();
    assert_eq!(bf.buffer(BoxMemory::DOut), Some(d_out));
    let done = bf.run(&[]).unwrap();
    let large = bf.read(&[done]).unwrap().unwrap();

    let reference = serial_box_mean(&data, width, height, 4);
    assert_ne!(&small[..], large);
    for (i, (&got, &want)) in large.iter().zip(reference.iter()).enumerate() {
        assert!((got - want).abs() < 1e-3, "at {}: {} vs {}", i, got, want);
    }
}

#[test]
fn test_mult_elementwise() {
    let dev = device();
    let a = pseudo_random(37, 64);
    let b = pseudo_random(41, 64);

    let mut mult = Mult::new(dev, 0);
    mult.init(64, Staging::Io).unwrap();
    mult.write(MultMemory::DInA, Some(&a), &[]).unwrap();
    mult.write(MultMemory::DInB, Some(&b), &[]).unwrap();
    let done = mult.run(&[]).unwrap();
    let out = mult.read(&[done]).unwrap().unwrap();

    for i in 0..64 {
        assert_eq!(out[i], a[i] * b[i], "at {}", i);
    }
}

#[test]
fn test_pown_squares_and_repatches() {
    let dev = device();
    let data: Vec<f32> = (0..16).map(|i| i as f32 - 8.0).collect();

    let mut pown = Pown::new(dev, 0);
    pown.init(16, 2, Staging::Io).unwrap();
    pown.write(Some(&data), &[]).unwrap();
    let done = pown.run(&[]).unwrap();
    let squared: Vec<f32> = pown.read(&[done]).unwrap().unwrap().to_vec();
    for i in 0..16 {
        assert_eq!(squared[i], data[i] * data[i], "at {}", i);
    }

    pown.set_n(3).unwrap();
    let done = pown.run(&[]).unwrap();
    let cubed = pown.read(&[done]).unwrap().unwrap();
    for i in 0..16 {
        assert_eq!(cubed[i], data[i] * data[i] * data[i], "at {}", i);
    }
}

#[test]
fn test_rgb_uchar_round_trip() {
    let dev = device();
    let pixels = 48u32;
    let frame: Vec<u8> = (0..3 * pixels as usize).map(|i| (i * 7 % 256) as u8).collect();

    let mut sep = SeparateRgb::new(Arc::clone(&dev), 0, SeparateKind::UcharToFloat);
    sep.init(pixels, Staging::I).unwrap();

    let mut com = CombineRgb::new(dev, 0, CombineKind::FloatToUchar);
    for (mem, plane) in [
        (CombineMemory::DInR, guided_compute::channels::SeparateMemory::DOutR),
        (CombineMemory::DInG, guided_compute::channels::SeparateMemory::DOutG),
        (CombineMemory::DInB, guided_compute::channels::SeparateMemory::DOutB),
    ] {
        com.set_buffer(mem, sep.buffer(plane).unwrap());
    }
    com.init(pixels, Staging::O).unwrap();

    sep.write(Some(&frame), &[]).unwrap();
    let ev = sep.run(&[]).unwrap();
    let ev = com.run(&[ev]).unwrap();
    let out = com.read(&[ev]).unwrap().unwrap();

    assert_eq!(out, &frame[..], "quantize(v / 255) must restore every byte");
}

#[test]
fn test_separate_uchar_normalizes() {
    let dev = device();
    let pixels = 12u32;
    let mut frame = vec![0u8; 3 * pixels as usize];
    frame[0] = 255; // R of pixel 0
    frame[4] = 51; // G of pixel 1

    let mut sep = SeparateRgb::new(dev, 0, SeparateKind::UcharToFloat);
    sep.init(pixels, Staging::Io).unwrap();
    sep.write(Some(&frame), &[]).unwrap();
    let ev = sep.run(&[]).unwrap();
    let [r, g, _b] = sep.read(&[ev]).unwrap().unwrap();

    assert_eq!(r[0], 1.0);
    assert!((g[1] - 0.2).abs() < 1e-6);
}

#[test]
fn test_rgb_float_round_trip() {
    let dev = device();
    let pixels = 24u32;
    let frame = pseudo_random(43, 3 * pixels as usize);

    let mut sep = SeparateRgb::new(Arc::clone(&dev), 0, SeparateKind::FloatToFloat);
    sep.init(pixels, Staging::I).unwrap();
    let mut com = CombineRgb::new(dev, 0, CombineKind::FloatToFloat);
    com.set_buffer(
        CombineMemory::DInR,
        sep.buffer(guided_compute::channels::SeparateMemory::DOutR).unwrap(),
    );
    com.set_buffer(
        CombineMemory::DInG,
        sep.buffer(guided_compute::channels::SeparateMemory::DOutG).unwrap(),
    );
    com.set_buffer(
        CombineMemory::DInB,
        sep.buffer(guided_compute::channels::SeparateMemory::DOutB).unwrap(),
    );
    com.init(pixels, Staging::O).unwrap();

    sep.write_f32(Some(&frame), &[]).unwrap();
    let ev = sep.run(&[]).unwrap();
    let ev = com.run(&[ev]).unwrap();
    let out = com.read_f32(&[ev]).unwrap().unwrap();

    assert_eq!(out, &frame[..]);
}

#[test]
fn test_depth_to_float_applies_scaling() {
    let dev = device();
    let depths: Vec<u16> = (0..16).map(|i| (i * 500) as u16).collect();

    let mut promote = DepthToFloat::new(dev, 0);
    promote.init(16, 1e-3, Staging::Io).unwrap();
    promote.write(Some(&depths), &[]).unwrap();
    let ev = promote.run(&[]).unwrap();
    let out: Vec<f32> = promote.read(&[ev]).unwrap().unwrap().to_vec();
    for i in 0..16 {
        let want = depths[i] as f32 * 1e-3;
        assert!((out[i] - want).abs() < 1e-6, "at {}: {} vs {}", i, out[i], want);
    }

    promote.set_scaling(2e-3).unwrap();
    let ev = promote.run(&[]).unwrap();
    let doubled = promote.read(&[ev]).unwrap().unwrap();
    for i in 0..16 {
        assert_abs_diff_eq!(doubled[i], 2.0 * out[i], epsilon = 1e-6);
    }
}

#[test]
fn test_separate_rejects_bad_pixel_count() {
    let dev = device();
    let mut sep = SeparateRgb::new(dev, 0, SeparateKind::UcharToFloat);
    match sep.init(16, Staging::None) {
        Err(FilterError::NotMultipleOf { of: 3, .. }) => {}
        other => panic!("expected NotMultipleOf, got {:?}", other.err()),
    }
}
