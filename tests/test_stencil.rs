// tests/test_stencil.rs — Per-pixel stage semantics on whole images.
//
// `reference_edges` is the oracle the GPU tests compare against, so its
// results on small hand-checked images are pinned down here.

use logedge::image::Image;
use logedge::kernel::LAPLACIAN_3X3;
use logedge::stencil::{convolve_step, passthrough, reference_edges, zero_crossing, Neighborhood};

fn column_values(img: &Image<f32>, y: usize) -> Vec<f32> {
    img.row(y).to_vec()
}

#[test]
fn flat_field_has_full_mask_and_no_edges() {
    for level in 0..=255u8 {
        let src = Image::<u8>::filled(5, 5, level);
        let (mask, edges) = reference_edges(&src, &LAPLACIAN_3X3);
        assert!(mask.pixels().all(|(_, _, v)| v == 1.0), "level {level}");
        assert!(edges.pixels().all(|(_, _, v)| v == 0.0), "level {level}");
    }
}

#[test]
fn flat_field_is_exact_for_generated_kernels() {
    // A normalized LoG sums to ~1, so a flat field responds with its level.
    let w = logedge::kernel::log_kernel(3, 1.0).unwrap().to_3x3().unwrap();
    for level in [1u8, 2, 3, 128, 200] {
        let (mask, _) = reference_edges(&Image::<u8>::filled(4, 4, level), &w);
        assert!(mask.pixels().all(|(_, _, v)| v == 1.0), "level {level}");
    }
}

#[test]
fn dim_step_marks_one_column() {
    // Same step as below at a low, non-dyadic contrast.
    let src = Image::<u8>::from_fn(5, 5, |x, _| if x < 2 { 3 } else { 4 });
    let (mask, edges) = reference_edges(&src, &LAPLACIAN_3X3);
    for y in 0..5 {
        assert_eq!(column_values(&mask, y), vec![1.0, 1.0, 0.0, 1.0, 1.0], "mask row {y}");
        assert_eq!(column_values(&edges, y), vec![0.0, 0.0, 1.0, 0.0, 0.0], "edges row {y}");
    }
}

#[test]
fn vertical_step_marks_one_column() {
    // Columns 0,1 dark; 2,3,4 bright.
    let src = Image::<u8>::from_fn(5, 5, |x, _| if x < 2 { 0 } else { 255 });
    let (mask, edges) = reference_edges(&src, &LAPLACIAN_3X3);
    for y in 0..5 {
        assert_eq!(column_values(&mask, y), vec![1.0, 1.0, 0.0, 1.0, 1.0], "mask row {y}");
        assert_eq!(column_values(&edges, y), vec![0.0, 0.0, 1.0, 0.0, 0.0], "edges row {y}");
    }
}

#[test]
fn single_bright_pixel_is_its_own_edge() {
    let src = Image::<u8>::from_fn(5, 5, |x, y| if (x, y) == (2, 2) { 255 } else { 0 });
    let (mask, edges) = reference_edges(&src, &LAPLACIAN_3X3);
    for (x, y, v) in mask.pixels() {
        assert_eq!(v, if (x, y) == (2, 2) { 0.0 } else { 1.0 }, "mask ({x},{y})");
    }
    for (x, y, v) in edges.pixels() {
        assert_eq!(v, if (x, y) == (2, 2) { 1.0 } else { 0.0 }, "edges ({x},{y})");
    }
}

#[test]
fn outputs_match_input_size() {
    let src = Image::<u8>::from_fn(13, 7, |x, y| ((x * 31 + y * 17) % 2 * 255) as u8);
    let (mask, edges) = reference_edges(&src, &LAPLACIAN_3X3);
    assert_eq!((mask.width(), mask.height()), (13, 7));
    assert_eq!((edges.width(), edges.height()), (13, 7));
    assert!(mask.pixels().all(|(_, _, v)| v == 0.0 || v == 1.0));
    assert!(edges.pixels().all(|(_, _, v)| v == 0.0 || v == 1.0));
}

#[test]
fn edges_only_where_mask_is_zero() {
    let src = Image::<u8>::from_fn(16, 16, |x, y| if (x / 4 + y / 4) % 2 == 0 { 255 } else { 0 });
    let (mask, edges) = reference_edges(&src, &LAPLACIAN_3X3);
    for (x, y, e) in edges.pixels() {
        if e == 1.0 {
            assert_eq!(mask.get(x, y), 0.0, "edge at ({x},{y}) over a 1 in the mask");
        }
    }
}

#[test]
fn threshold_truth_table() {
    // center, any neighbour == 1  ->  edge
    let cases = [(0.0, false, 0.0), (0.0, true, 1.0), (1.0, false, 0.0), (1.0, true, 0.0)];
    for (center, touch, want) in cases {
        let mut n = Neighborhood::flat(0.0);
        n.0[4] = center;
        if touch {
            n.0[0] = 1.0;
        }
        assert_eq!(zero_crossing(&n), want, "center {center}, touch {touch}");
    }
}

#[test]
fn step_is_inclusive_at_zero() {
    let zero_response = Neighborhood::flat(0.5);
    assert_eq!(convolve_step(&zero_response, &LAPLACIAN_3X3), 1.0);
    let mut negative = Neighborhood::flat(0.0);
    negative.0[4] = 0.01;
    assert_eq!(convolve_step(&negative, &LAPLACIAN_3X3), 0.0);
}

#[test]
fn passthrough_keeps_rgb() {
    assert_eq!(passthrough([1.0, 0.0, 1.0, 0.25]), [1.0, 0.0, 1.0, 1.0]);
}
