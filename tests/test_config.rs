// tests/test_config.rs — EdgeConfig deserialization.

use logedge::config::{EdgeConfig, KernelSource};
use logedge::gpu::image::PixelFormat;
use logedge::kernel::{KernelError, LAPLACIAN_3X3};

#[test]
fn empty_object_is_default() {
    let cfg: EdgeConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg, EdgeConfig::default());
    assert_eq!(cfg.kernel, KernelSource::Laplacian);
    assert_eq!(cfg.clear_color, [0.0, 1.0, 1.0, 1.0]);
    assert_eq!(cfg.intermediate_format, PixelFormat::Float32);
}

#[test]
fn log_kernel_source() {
    let cfg: EdgeConfig =
        serde_json::from_str(r#"{ "kernel": { "log": { "size": 3, "sigma": 1.0 } } }"#).unwrap();
    assert_eq!(cfg.kernel, KernelSource::Log { size: 3, sigma: 1.0 });
    let w = cfg.kernel.weights().unwrap();
    let sum: f32 = w.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5, "sum {sum}");
}

#[test]
fn custom_kernel_and_format() {
    let json = r#"{
        "kernel": { "custom": [0, 1, 0, 1, -4, 1, 0, 1, 0] },
        "clear_color": [0.0, 0.0, 0.0, 1.0],
        "intermediate_format": "unorm8"
    }"#;
    let cfg: EdgeConfig = serde_json::from_str(json).unwrap();
    assert_eq!(cfg.kernel.weights().unwrap(), [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0]);
    assert_eq!(cfg.intermediate_format, PixelFormat::Unorm8);
    let c = cfg.clear_color();
    assert_eq!((c.r, c.g, c.b, c.a), (0.0, 0.0, 0.0, 1.0));
}

#[test]
fn laplacian_by_name() {
    let cfg: EdgeConfig = serde_json::from_str(r#"{ "kernel": "laplacian" }"#).unwrap();
    assert_eq!(cfg.kernel.weights().unwrap(), LAPLACIAN_3X3);
}

#[test]
fn invalid_inputs_are_rejected() {
    assert!(serde_json::from_str::<EdgeConfig>(r#"{ "kernel": "sobel" }"#).is_err());
    assert!(serde_json::from_str::<EdgeConfig>(r#"{ "kernel": { "custom": [1, 2, 3] } }"#).is_err());

    let cfg: EdgeConfig =
        serde_json::from_str(r#"{ "kernel": { "log": { "size": 3, "sigma": -2.0 } } }"#).unwrap();
    assert_eq!(cfg.kernel.weights(), Err(KernelError::NonPositiveSigma(-2.0)));
}
