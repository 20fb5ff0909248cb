use npu_eval::error::{ErrorClass, EvalError};
use npu_eval::kernel::cache::TilingCache;
use npu_eval::kernel::elewise::ElewiseTiling;
use npu_eval::kernel::split::SplitTiling;
use npu_eval::kernel::{KernelRegistry, LaunchParam, TilingContext};
use npu_eval::tensor::HostData;
use npu_graph::dtype::{DType, Format};
use npu_graph::hardware::SocGeneration;
use npu_graph::param::{ActivationKind, ElewiseKind, OpKind, OpParam};
use npu_graph::shape::{Shape, TensorDesc};

fn desc(dtype: DType, dims: &[usize]) -> TensorDesc {
    TensorDesc::new(dtype, Shape::fixed(dims))
}

fn ctx(generation: SocGeneration) -> TilingContext {
    TilingContext {
        generation,
        core_count: generation.default_core_count(),
    }
}

fn add(dtype: DType, dims: &[usize]) -> LaunchParam {
    let d = desc(dtype, dims);
    LaunchParam::new(OpParam::Elewise { kind: ElewiseKind::Add }, vec![d.clone(), d.clone()], vec![d])
}

fn matmul(b_format: Format, m: usize, k: usize, n: usize) -> LaunchParam {
    let a = desc(DType::F16, &[m, k]);
    let b = desc(DType::F16, &[k, n]).with_format(b_format);
    let out = desc(DType::F16, &[m, n]);
    let param = OpParam::MatMul {
        transpose_b: false,
        with_bias: false,
    };
    LaunchParam::new(param, vec![a, b], vec![out])
}

fn masked_softmax(batch: usize, cols: usize) -> LaunchParam {
    let x = desc(DType::F32, &[batch, 2, cols]);
    let lens = desc(DType::I32, &[batch]);
    LaunchParam::new(OpParam::Softmax { masked: true }, vec![x.clone(), lens], vec![x])
}

#[test]
fn builtin_registry() {
    let registry = KernelRegistry::with_builtin_kernels();
    assert_eq!(registry.len(), 8);
    assert_eq!(registry.candidates(OpKind::MatMul).count(), 2);
    assert_eq!(registry.candidates(OpKind::Elewise).count(), 2);
    assert!(registry.get("softmax").is_some());
    assert!(registry.get("conv2d").is_none());
}

#[test]
fn select_elewise() {
    let registry = KernelRegistry::with_builtin_kernels();

    let selection = registry.select(&add(DType::F16, &[2, 3]), &ctx(SocGeneration::Gen2)).unwrap();
    assert_eq!(selection.kernel, "elewise_float");
    assert_eq!(selection.binary.name, "elewise_f16");
    assert_eq!(selection.tiling.block_dim, 1);
    assert_eq!(selection.tiling.workspace_bytes, 0);

    let selection = registry.select(&add(DType::I32, &[2, 3]), &ctx(SocGeneration::Gen1)).unwrap();
    assert_eq!(selection.kernel, "elewise_int");
    assert_eq!(selection.binary.name, "elewise_i32");
}

#[test]
fn bf16_needs_newer_generation() {
    let registry = KernelRegistry::with_builtin_kernels();
    let param = add(DType::BF16, &[4]);

    let selection = registry.select(&param, &ctx(SocGeneration::Gen2)).unwrap();
    assert_eq!(selection.binary.name, "elewise_bf16");

    let err = registry.select(&param, &ctx(SocGeneration::Gen1)).unwrap_err();
    assert!(matches!(err, EvalError::NoKernel { candidates: 2, .. }), "{:?}", err);
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(!err.is_retryable());
}

#[test]
fn nz_weights() {
    let registry = KernelRegistry::with_builtin_kernels();

    let nd = registry.select(&matmul(Format::Nd, 32, 64, 32), &ctx(SocGeneration::Gen1)).unwrap();
    assert_eq!(nd.kernel, "matmul_nd");

    let param = matmul(Format::Nz, 32, 64, 32);
    let nz = registry.select(&param, &ctx(SocGeneration::Gen1)).unwrap();
    assert_eq!(nz.kernel, "matmul_nz");
    assert_eq!(nz.binary.name, "matmul_nz");

    let err = registry.select(&param, &ctx(SocGeneration::Gen2)).unwrap_err();
    assert!(matches!(err, EvalError::NoKernel { candidates: 2, .. }), "{:?}", err);

    // panels need a multiple of the block size
    let err = registry
        .select(&matmul(Format::Nz, 32, 64, 24), &ctx(SocGeneration::Gen1))
        .unwrap_err();
    assert!(matches!(err, EvalError::NoKernel { .. }), "{:?}", err);
}

#[test]
fn fused_swiglu_only_on_newer_generation() {
    let registry = KernelRegistry::with_builtin_kernels();
    let param = LaunchParam::new(
        OpParam::Activation {
            kind: ActivationKind::Swiglu,
        },
        vec![desc(DType::F16, &[4, 16])],
        vec![desc(DType::F16, &[4, 8])],
    );

    let selection = registry.select(&param, &ctx(SocGeneration::Gen2)).unwrap();
    assert_eq!(selection.binary.name, "swiglu");
    assert!(registry.select(&param, &ctx(SocGeneration::Gen1)).is_err());
}

#[test]
fn tiling_is_deterministic() {
    let registry = KernelRegistry::with_builtin_kernels();
    let param = matmul(Format::Nd, 100, 32, 48);

    let a = registry.select(&param, &ctx(SocGeneration::Gen2)).unwrap();
    let b = registry.select(&param, &ctx(SocGeneration::Gen2)).unwrap();
    assert_eq!(a.tiling, b.tiling);
    assert_eq!(a.binary.name, b.binary.name);
}

#[test]
fn elewise_core_split() {
    let registry = KernelRegistry::with_builtin_kernels();

    let selection = registry.select(&add(DType::F32, &[10_000]), &ctx(SocGeneration::Gen2)).unwrap();
    assert_eq!(selection.tiling.block_dim, 20);

    let tiling: ElewiseTiling = bytemuck::pod_read_unaligned(&selection.tiling.data);
    assert_eq!(tiling.split.cores, 20);
    assert_eq!(tiling.split.per_core, 500);
    assert_eq!(tiling.split.remainder, 0);

    // small tensors are not spread over every core
    let selection = registry.select(&add(DType::F32, &[1000]), &ctx(SocGeneration::Gen2)).unwrap();
    assert_eq!(selection.tiling.block_dim, 4);
}

#[test]
fn split_variants() {
    let registry = KernelRegistry::with_builtin_kernels();
    let split = |dims: &[usize], out: &[usize]| {
        let param = LaunchParam::new(
            OpParam::Split { axis: -1, parts: 3 },
            vec![desc(DType::F16, dims)],
            vec![desc(DType::F16, out); 3],
        );
        registry.select(&param, &ctx(SocGeneration::Gen1)).unwrap()
    };

    let contiguous = split(&[1, 12], &[1, 4]);
    assert_eq!(contiguous.binary.name, "split_contiguous");

    let strided = split(&[4, 12], &[4, 4]);
    assert_eq!(strided.binary.name, "split_strided");
    let tiling: SplitTiling = bytemuck::pod_read_unaligned(&strided.tiling.data);
    assert_eq!(tiling.outer, 4);
    assert_eq!(tiling.parts, 3);
    assert_eq!(tiling.chunk_bytes, 4 * 2);
}

#[test]
fn masked_softmax_lengths() {
    let registry = KernelRegistry::with_builtin_kernels();
    let ctx = ctx(SocGeneration::Gen2);

    let missing = registry.select(&masked_softmax(2, 8), &ctx).unwrap_err();
    assert!(matches!(missing, EvalError::TilingFailed { kernel: "softmax", .. }), "{:?}", missing);

    let wrong_count = masked_softmax(2, 8).with_host_data(1, HostData::from_i32(&[3]));
    assert!(matches!(registry.select(&wrong_count, &ctx), Err(EvalError::TilingFailed { .. })));

    let too_long = masked_softmax(2, 8).with_host_data(1, HostData::from_i32(&[3, 9]));
    assert!(matches!(registry.select(&too_long, &ctx), Err(EvalError::TilingFailed { .. })));

    let valid = masked_softmax(2, 8).with_host_data(1, HostData::from_i32(&[3, 8]));
    let selection = registry.select(&valid, &ctx).unwrap();
    assert_eq!(selection.binary.name, "softmax_masked");
    assert_eq!(selection.tiling.block_dim, 4);
    assert_eq!(selection.tiling.workspace_bytes, 4 * 8 * 4);
}

#[test]
fn cache_hits_and_misses() {
    let registry = KernelRegistry::with_builtin_kernels();
    let cache = TilingCache::new();
    let ctx = ctx(SocGeneration::Gen2);

    let first = cache.select(&registry, &add(DType::F16, &[8, 8]), &ctx).unwrap();
    let second = cache.select(&registry, &add(DType::F16, &[8, 8]), &ctx).unwrap();
    assert_eq!(first.tiling, second.tiling);

    let stats = cache.stats();
    assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));

    cache.select(&registry, &add(DType::F16, &[8, 9]), &ctx).unwrap();
    let stats = cache.stats();
    assert_eq!((stats.entries, stats.hits, stats.misses), (2, 1, 2));

    // failures are not cached
    assert!(cache.select(&registry, &masked_softmax(2, 8), &ctx).is_err());
    assert_eq!(cache.stats().entries, 2);

    cache.clear();
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn operand_dtypes_must_match() {
    let registry = KernelRegistry::with_builtin_kernels();

    let with_bias = |bias: DType| {
        let param = OpParam::MatMul {
            transpose_b: false,
            with_bias: true,
        };
        let inputs = vec![desc(DType::F16, &[1, 2]), desc(DType::F16, &[2, 2]), desc(bias, &[2])];
        LaunchParam::new(param, inputs, vec![desc(DType::F16, &[1, 2])])
    };
    let gen2 = ctx(SocGeneration::Gen2);
    let selection = registry.select(&with_bias(DType::F16), &gen2).unwrap();
    assert_eq!(selection.binary.name, "matmul_nd_bias");

    // the kernel would read an f32 bias as f16 values
    let err = registry.select(&with_bias(DType::F32), &gen2).unwrap_err();
    assert!(matches!(err, EvalError::NoKernel { candidates: 2, .. }), "{:?}", err);

    let norm = |gamma: DType| {
        let x = desc(DType::F16, &[4, 8]);
        LaunchParam::new(OpParam::rms_norm(1e-6), vec![x.clone(), desc(gamma, &[8])], vec![x])
    };
    for generation in [SocGeneration::Gen1, SocGeneration::Gen2] {
        assert!(registry.select(&norm(DType::F16), &ctx(generation)).is_ok());
        let err = registry.select(&norm(DType::F32), &ctx(generation)).unwrap_err();
        assert!(matches!(err, EvalError::NoKernel { candidates: 1, .. }), "{:?}", err);
    }
}

#[test]
fn size_overflow_fails_tiling() {
    let registry = KernelRegistry::with_builtin_kernels();
    let ctx = ctx(SocGeneration::Gen2);
    let huge = [1 << 33, 1 << 33, 6];

    let err = registry.select(&add(DType::F16, &huge), &ctx).unwrap_err();
    assert!(
        matches!(err, EvalError::TilingFailed { kernel: "elewise_float", .. }),
        "{:?}",
        err
    );
    assert_eq!(err.class(), ErrorClass::Configuration);

    let x = desc(DType::F16, &huge);
    let part = desc(DType::F16, &[1 << 33, 1 << 33, 2]);
    let split = LaunchParam::new(OpParam::Split { axis: -1, parts: 3 }, vec![x], vec![part; 3]);
    let err = registry.select(&split, &ctx).unwrap_err();
    assert!(matches!(err, EvalError::TilingFailed { kernel: "split", .. }), "{:?}", err);
}
