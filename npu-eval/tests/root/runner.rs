use std::sync::Arc;

use ndarray::{s, ArrayD, IxDyn};

use npu_eval::alloc::pool::BlockPool;
use npu_eval::error::{ErrorClass, EvalError, TensorRef};
use npu_eval::executor::OperationExecutor;
use npu_eval::host::{array_to_bytes, bytes_to_array};
use npu_eval::runner::{Context, Runner};
use npu_eval::tensor::{DeviceTensor, HostData, VariantPack};
use npu_eval::tester::{assert_tensors_match, Tolerance};
use npu_graph::dtype::DType;
use npu_graph::error::GraphError;
use npu_graph::hardware::SocGeneration;
use npu_graph::operation::Operation;
use npu_graph::ops::{
    ElewiseOperation, FusedQkvOperation, LinearOperation, MlpActivation, MlpOperation, Precision,
    ResidualMlpOperation, SoftmaxOperation,
};
use npu_graph::shape;
use npu_graph::shape::{Shape, TensorDesc};

use crate::util::{context, context_with, cpu_gelu, cpu_matmul, cpu_rms_norm, random_array, rng};

fn f32_desc(dims: &[usize]) -> TensorDesc {
    TensorDesc::new(DType::F32, Shape::fixed(dims))
}

fn descs_of(arrays: &[ArrayD<f32>]) -> Vec<TensorDesc> {
    arrays.iter().map(|a| f32_desc(a.shape())).collect()
}

fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

fn mlp_inputs(activation: MlpActivation, h: usize, f: usize) -> Vec<ArrayD<f32>> {
    let mut rng = rng();
    let up_cols = match activation {
        MlpActivation::Swiglu => 2 * f,
        MlpActivation::Gelu => f,
    };
    vec![
        random_array(&mut rng, &[2, 3, h]),
        random_array(&mut rng, &[h, up_cols]),
        random_array(&mut rng, &[f, h]),
    ]
}

fn cpu_mlp(activation: MlpActivation, x: &ArrayD<f32>, w_up: &ArrayD<f32>, w_down: &ArrayD<f32>) -> ArrayD<f32> {
    let up = cpu_matmul(x, w_up);
    let act = match activation {
        MlpActivation::Swiglu => {
            let f = w_down.shape()[0];
            let gate = up.slice(s![.., .., 0..f]).mapv(silu);
            let lin = up.slice(s![.., .., f..2 * f]).to_owned();
            (gate * lin).into_dyn()
        }
        MlpActivation::Gelu => up.mapv(cpu_gelu),
    };
    cpu_matmul(&act, w_down)
}

#[test]
fn add_f16() {
    for generation in SocGeneration::ALL {
        let desc = TensorDesc::new(DType::F16, shape![1, 2]);
        let op = Arc::new(ElewiseOperation::add());
        let mut executor = OperationExecutor::new(context(generation), op, &[desc.clone(), desc]).unwrap();

        let input = ArrayD::from_elem(IxDyn(&[1, 2]), 2.0);
        let outputs = executor.evaluate(&[input.clone(), input]).unwrap();

        let expected = ArrayD::from_elem(IxDyn(&[1, 2]), 4.0);
        assert_tensors_match(&[expected], &outputs, Tolerance::EXACT, false);
        assert_eq!(executor.runner().selected_variants(), vec!["elewise_f16"]);
        assert_eq!(executor.mem_usage().hypo_total_bytes, 0);
    }
}

#[test]
fn fused_qkv() {
    let mut rng = rng();
    let x = random_array(&mut rng, &[2, 4, 16]);
    let w = random_array(&mut rng, &[16, 24]);

    let op = Arc::new(FusedQkvOperation::new(Precision::Fp32));
    let inputs = [x, w];
    let mut executor = OperationExecutor::new(context(SocGeneration::Gen1), op, &descs_of(&inputs)).unwrap();
    let outputs = executor.evaluate(&inputs).unwrap();

    let full = cpu_matmul(&inputs[0], &inputs[1]);
    let expected = (0..3)
        .map(|i| full.slice(s![.., .., 8 * i..8 * (i + 1)]).to_owned().into_dyn())
        .collect::<Vec<_>>();

    assert_eq!(outputs[0].shape(), &[2, 4, 8]);
    assert_tensors_match(&expected, &outputs, Tolerance::for_dtype(DType::F32), false);
    assert_eq!(executor.runner().selected_variants(), vec!["matmul_nd", "split_strided"]);
}

#[test]
fn mlp_generations_agree() {
    let activation = MlpActivation::Swiglu;
    let inputs = mlp_inputs(activation, 8, 6);
    let expected = cpu_mlp(activation, &inputs[0], &inputs[1], &inputs[2]);

    let mut variants = vec![];
    for generation in SocGeneration::ALL {
        let op = Arc::new(MlpOperation::new(activation, Precision::Fp32));
        let mut executor = OperationExecutor::new(context(generation), op, &descs_of(&inputs)).unwrap();
        let outputs = executor.evaluate(&inputs).unwrap();

        assert_tensors_match(&[expected.clone()], &outputs, Tolerance::for_dtype(DType::F32), false);
        variants.push(executor.runner().selected_variants());
    }

    assert_eq!(
        variants[0],
        vec!["matmul_nd", "split_strided", "silu", "elewise_f32", "matmul_nd"]
    );
    assert_eq!(variants[1], vec!["matmul_nd", "swiglu", "matmul_nd"]);
}

#[test]
fn nested_residual_mlp() {
    let eps = 1e-5;
    let mut inputs = mlp_inputs(MlpActivation::Gelu, 8, 16);
    let gamma = random_array(&mut rng(), &[8]);
    inputs.insert(1, gamma);

    let normed = cpu_rms_norm(&inputs[0], &inputs[1], eps);
    let expected = &inputs[0] + &cpu_mlp(MlpActivation::Gelu, &normed, &inputs[2], &inputs[3]);

    let mlp = MlpOperation::new(MlpActivation::Gelu, Precision::Fp32);
    let op = Arc::new(ResidualMlpOperation::new(eps, mlp));
    let mut executor = OperationExecutor::new(context(SocGeneration::Gen1), op, &descs_of(&inputs)).unwrap();
    let outputs = executor.evaluate(&inputs).unwrap();

    assert_tensors_match(&[expected], &outputs, Tolerance::for_dtype(DType::F32), false);
    assert_eq!(
        executor.runner().selected_variants(),
        vec!["rms_norm", "matmul_nd", "gelu", "matmul_nd", "elewise_f32"]
    );

    // normed and mlp_out of the outer graph, up and act of the nested one
    let usage = executor.mem_usage();
    assert_eq!(usage.hypo_total_bytes, 2 * 192 + 2 * 384);
    assert!(usage.hypo_peak_bytes > 0 && usage.hypo_peak_bytes <= usage.hypo_total_bytes);

    let trace = executor.runner().last_trace().unwrap();
    assert_eq!(trace.entries().len(), 4);
    assert!(trace.entries().iter().all(|e| e.life_end.is_some()));
    assert_eq!(executor.runner().pool().used_blocks(), 0);
}

#[test]
fn repeated_executions_reuse_blocks() {
    let inputs = mlp_inputs(MlpActivation::Gelu, 8, 16);
    let op = Arc::new(MlpOperation::new(MlpActivation::Gelu, Precision::Fp32));
    let mut executor = OperationExecutor::new(context(SocGeneration::Gen2), op, &descs_of(&inputs)).unwrap();

    let addrs = |executor: &OperationExecutor| {
        let trace = executor.runner().last_trace().unwrap();
        trace.entries().iter().map(|e| e.addr).collect::<Vec<_>>()
    };

    let first = executor.evaluate(&inputs).unwrap();
    let first_addrs = addrs(&executor);
    let second = executor.evaluate(&inputs).unwrap();

    assert_eq!(first, second);
    assert_eq!(first_addrs, addrs(&executor));
    assert_eq!(executor.runner().pool().free_blocks(), 2);
}

#[test]
fn failure_releases_blocks() {
    let mut rng = rng();
    let inputs = [
        random_array(&mut rng, &[4, 8, 16]),
        random_array(&mut rng, &[16, 32]),
        random_array(&mut rng, &[32, 16]),
    ];

    // room for the first intermediate, not for the second
    let ctx = context_with(SocGeneration::Gen1, |config| config.pool_bytes = 8192);
    let op = Arc::new(MlpOperation::new(MlpActivation::Gelu, Precision::Fp32));
    let mut executor = OperationExecutor::new(ctx, op, &descs_of(&inputs)).unwrap();

    let err = executor.evaluate(&inputs).unwrap_err();
    assert!(matches!(err, EvalError::InNode { node: 1, .. }), "{:?}", err);
    assert!(matches!(err.root_cause(), EvalError::OutOfMemory { .. }), "{:?}", err);
    assert_eq!(err.class(), ErrorClass::ResourceExhausted);
    assert!(err.is_retryable());

    let pool = executor.runner().pool();
    assert_eq!(pool.used_blocks(), 0);
    assert_eq!(pool.free_blocks(), 1);
}

#[test]
fn shared_pool() {
    let inputs = mlp_inputs(MlpActivation::Gelu, 8, 16);
    let ctx = context(SocGeneration::Gen2);
    let pool = Arc::new(BlockPool::new(&ctx.device, 1024 * 1024).unwrap());
    let ctx = ctx.with_shared_pool(pool.clone());

    let op = Arc::new(MlpOperation::new(MlpActivation::Gelu, Precision::Fp32));
    let mut a = OperationExecutor::new(ctx.clone(), op.clone(), &descs_of(&inputs)).unwrap();
    let mut b = OperationExecutor::new(ctx, op, &descs_of(&inputs)).unwrap();

    assert!(Arc::ptr_eq(a.runner().pool(), &pool));
    assert_eq!(a.evaluate(&inputs).unwrap(), b.evaluate(&inputs).unwrap());
    assert_eq!(pool.used_blocks(), 0);
}

fn masked_softmax_expected(x: &ArrayD<f32>, lens: &[usize]) -> ArrayD<f32> {
    let mut expected = x.clone();
    for (b, &len) in lens.iter().enumerate() {
        for mut row in expected.slice_mut(s![b, .., ..]).rows_mut() {
            let max = row.iter().take(len).fold(f32::NEG_INFINITY, |a, &v| a.max(v));
            let sum: f32 = row.iter().take(len).map(|v| (v - max).exp()).sum();
            for (c, v) in row.iter_mut().enumerate() {
                *v = if c < len { (*v - max).exp() / sum } else { 0.0 };
            }
        }
    }
    expected
}

#[test]
fn masked_softmax_executor() {
    let x = random_array(&mut rng(), &[2, 3, 4]);
    let lens_desc = TensorDesc::new(DType::I32, shape![2]);
    let descs = [f32_desc(&[2, 3, 4]), lens_desc];

    let op: Arc<dyn Operation> = Arc::new(SoftmaxOperation { masked: true });
    let ctx = context(SocGeneration::Gen2);

    let err = OperationExecutor::new(ctx.clone(), op.clone(), &descs).unwrap_err();
    assert!(matches!(err.root_cause(), EvalError::MissingHostData { input: 1, .. }), "{:?}", err);

    let host_data = vec![None, Some(HostData::from_i32(&[2, 4]))];
    let mut executor = OperationExecutor::with_host_data(ctx, op, &descs, host_data).unwrap();
    assert_eq!(executor.runner().selected_variants(), vec!["softmax_masked"]);
    assert!(executor.mem_usage().workspace_bytes > 0);

    let lens = ArrayD::from_shape_vec(IxDyn(&[2]), vec![2.0, 4.0]).unwrap();
    let outputs = executor.evaluate(&[x.clone(), lens]).unwrap();
    let expected = masked_softmax_expected(&x, &[2, 4]);
    assert_tensors_match(&[expected], &outputs, Tolerance::for_dtype(DType::F32), false);

    executor.set_host_data(1, HostData::from_i32(&[1, 3])).unwrap();
    let lens = ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0, 3.0]).unwrap();
    let outputs = executor.evaluate(&[x.clone(), lens]).unwrap();
    let expected = masked_softmax_expected(&x, &[1, 3]);
    assert_tensors_match(&[expected], &outputs, Tolerance::for_dtype(DType::F32), false);
}

#[test]
fn runner_workspace() {
    let ctx = context(SocGeneration::Gen2);
    let x_desc = f32_desc(&[2, 3, 4]);
    let x = random_array(&mut rng(), &[2, 3, 4]);

    let x_tensor = DeviceTensor::alloc(&ctx.device, x_desc.clone()).unwrap();
    x_tensor.copy_from_host(&array_to_bytes(DType::F32, &x)).unwrap();
    let out_tensor = DeviceTensor::alloc(&ctx.device, x_desc).unwrap();
    let pack = VariantPack::new(vec![x_tensor], vec![out_tensor.clone()]);

    let mut runner = Runner::create(Arc::new(SoftmaxOperation { masked: false }), &ctx).unwrap();
    let workspace_bytes = runner.setup(&pack, &ctx).unwrap();
    assert_eq!(workspace_bytes, 6 * 4 * 4);

    let err = runner.execute(&pack, None, 0, &ctx).unwrap_err();
    assert!(
        matches!(err, EvalError::WorkspaceTooSmall { required: 96, actual: 0, .. }),
        "{:?}",
        err
    );

    let workspace = ctx.device.reserve(workspace_bytes).unwrap();
    let err = runner.execute(&pack, Some(&workspace), 64, &ctx).unwrap_err();
    assert!(matches!(err, EvalError::WorkspaceTooSmall { actual: 64, .. }), "{:?}", err);

    runner.execute(&pack, Some(&workspace), workspace_bytes, &ctx).unwrap();
    ctx.stream.synchronize().unwrap();

    let actual = bytes_to_array(out_tensor.desc(), &out_tensor.read_to_host().unwrap());
    let expected = masked_softmax_expected(&x, &[4, 4]);
    assert_tensors_match(&[expected], &[actual], Tolerance::for_dtype(DType::F32), false);
}

#[test]
fn execute_requires_matching_setup() {
    let ctx = context(SocGeneration::Gen1);
    let desc = TensorDesc::new(DType::F16, shape![2, 3]);
    let other = TensorDesc::new(DType::F16, shape![2, 4]);

    let pack_for = |desc: &TensorDesc| {
        let tensor = || DeviceTensor::alloc(&ctx.device, desc.clone()).unwrap();
        VariantPack::new(vec![tensor(), tensor()], vec![tensor()])
    };
    let pack = pack_for(&desc);

    let mut runner = Runner::create(Arc::new(ElewiseOperation::add()), &ctx).unwrap();
    let err = runner.execute(&pack, None, 0, &ctx).unwrap_err();
    assert!(matches!(err, EvalError::NotSetUp { .. }), "{:?}", err);

    assert_eq!(runner.setup(&pack, &ctx).unwrap(), 0);
    runner.execute(&pack, None, 0, &ctx).unwrap();

    let err = runner.execute(&pack_for(&other), None, 0, &ctx).unwrap_err();
    assert!(matches!(err, EvalError::NotSetUp { .. }), "{:?}", err);

    // setup again for the new shape
    runner.setup(&pack_for(&other), &ctx).unwrap();
    runner.execute(&pack_for(&other), None, 0, &ctx).unwrap();
    ctx.stream.synchronize().unwrap();
}

#[test]
fn pack_mismatch() {
    let ctx = context(SocGeneration::Gen2);
    let desc = TensorDesc::new(DType::F16, shape![1, 2]);
    let wrong = TensorDesc::new(DType::F16, shape![1, 3]);
    let mut runner = Runner::create(Arc::new(ElewiseOperation::add()), &ctx).unwrap();

    let pack = VariantPack::new(
        vec![DeviceTensor::unbound(desc.clone()), DeviceTensor::unbound(desc.clone())],
        vec![DeviceTensor::unbound(wrong)],
    );
    let err = runner.setup(&pack, &ctx).unwrap_err();
    assert!(
        matches!(err, EvalError::PackMismatch { tensor: TensorRef::Output(0), .. }),
        "{:?}",
        err
    );
    assert_eq!(err.class(), ErrorClass::Shape);

    let pack = VariantPack::new(vec![DeviceTensor::unbound(desc.clone())], vec![]);
    let err = runner.setup(&pack, &ctx).unwrap_err();
    assert!(matches!(err, EvalError::PackMismatch { tensor: TensorRef::Count, .. }), "{:?}", err);

    // unbound tensors are fine for setup, not for execution
    let pack = VariantPack::new(
        vec![DeviceTensor::unbound(desc.clone()), DeviceTensor::unbound(desc.clone())],
        vec![DeviceTensor::unbound(desc)],
    );
    runner.setup(&pack, &ctx).unwrap();
    let err = runner.execute(&pack, None, 0, &ctx).unwrap_err();
    assert!(
        matches!(err, EvalError::UnboundTensor { tensor: TensorRef::Input(0), .. }),
        "{:?}",
        err
    );
}

#[test]
fn unsupported_generation() {
    let ctx = context(SocGeneration::Gen1);
    let err = Runner::create(Arc::new(LinearOperation::new(Precision::Bf16, false)), &ctx).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Configuration);
    assert!(!err.is_retryable());

    let ctx: Context = context(SocGeneration::Gen2);
    assert!(Runner::create(Arc::new(LinearOperation::new(Precision::Bf16, false)), &ctx).is_ok());
}

#[test]
fn profiled_execution() {
    let inputs = mlp_inputs(MlpActivation::Swiglu, 8, 6);
    let op = Arc::new(MlpOperation::new(MlpActivation::Swiglu, Precision::Fp32));
    let mut executor = OperationExecutor::new(context(SocGeneration::Gen2), op, &descs_of(&inputs)).unwrap();

    executor.set_profile(true);
    let profiled = executor.evaluate(&inputs).unwrap();
    let profile = executor.last_profile().unwrap();
    assert_eq!(profile.kernels.len(), 3);
    assert!(profile.kernels[1].contains("mlp.swiglu"), "{}", profile);

    executor.set_profile(false);
    let plain = executor.evaluate(&inputs).unwrap();
    assert!(executor.last_profile().is_none());
    assert_eq!(profiled, plain);
}

#[test]
fn wrong_host_array() {
    let desc = TensorDesc::new(DType::F32, shape![2, 2]);
    let op = Arc::new(ElewiseOperation::add());
    let mut executor = OperationExecutor::new(context(SocGeneration::Gen2), op, &[desc.clone(), desc]).unwrap();

    let good = ArrayD::zeros(IxDyn(&[2, 2]));
    let bad = ArrayD::zeros(IxDyn(&[2, 3]));
    let err = executor.evaluate(&[good, bad]).unwrap_err();
    assert!(
        matches!(err, EvalError::PackMismatch { tensor: TensorRef::Input(1), .. }),
        "{:?}",
        err
    );
}

#[test]
fn linear_bias_dtype_mismatch() {
    let descs = [
        TensorDesc::new(DType::F16, shape![1, 2]),
        TensorDesc::new(DType::F16, shape![2, 2]),
        TensorDesc::new(DType::F32, shape![2]),
    ];

    // rejected up front on both generations, before any kernel is selected
    for generation in [SocGeneration::Gen1, SocGeneration::Gen2] {
        let op = Arc::new(LinearOperation::new(Precision::Fp16, true));
        let err = OperationExecutor::new(context(generation), op, &descs).unwrap_err();
        assert!(
            matches!(err.root_cause(), EvalError::Graph(GraphError::InvalidInput { input: 2, .. })),
            "{:?}",
            err
        );
        assert_eq!(err.class(), ErrorClass::Shape);
    }
}

#[test]
fn qkv_size_overflow() {
    let ctx = context(SocGeneration::Gen1);
    let huge = TensorDesc::new(DType::F16, shape![1 << 33, 1 << 33, 8]);
    let w = TensorDesc::new(DType::F16, shape![8, 24]);
    let pack = VariantPack::new(
        vec![DeviceTensor::unbound(huge.clone()), DeviceTensor::unbound(w)],
        vec![DeviceTensor::unbound(huge); 3],
    );

    let mut runner = Runner::create(Arc::new(FusedQkvOperation::new(Precision::Fp16)), &ctx).unwrap();
    let err = runner.setup(&pack, &ctx).unwrap_err();
    assert!(
        matches!(err.root_cause(), EvalError::Graph(GraphError::SizeOverflow { .. })),
        "{:?}",
        err
    );
    assert!(runner.mem_usage().is_none());
}

#[test]
fn failed_setup_forgets_previous_state() {
    let ctx = context(SocGeneration::Gen2);
    let x = random_array(&mut rng(), &[2, 3, 4]);
    let x_desc = f32_desc(&[2, 3, 4]);
    let lens = ArrayD::from_shape_vec(IxDyn(&[2]), vec![2.0, 4.0]).unwrap();

    let x_tensor = DeviceTensor::alloc(&ctx.device, x_desc.clone()).unwrap();
    x_tensor.copy_from_host(&array_to_bytes(DType::F32, &x)).unwrap();
    let lens_tensor = DeviceTensor::alloc(&ctx.device, TensorDesc::new(DType::I32, shape![2])).unwrap();
    lens_tensor.copy_from_host(&array_to_bytes(DType::I32, &lens)).unwrap();
    let out_tensor = DeviceTensor::alloc(&ctx.device, x_desc).unwrap();

    let pack_with = |lens: &[i32]| {
        let lens_tensor = lens_tensor.clone().with_host_data(HostData::from_i32(lens));
        VariantPack::new(vec![x_tensor.clone(), lens_tensor], vec![out_tensor.clone()])
    };
    let valid = pack_with(&[2, 4]);

    let mut runner = Runner::create(Arc::new(SoftmaxOperation { masked: true }), &ctx).unwrap();
    let workspace_bytes = runner.setup(&valid, &ctx).unwrap();
    let workspace = ctx.device.reserve(workspace_bytes).unwrap();

    let err = runner.setup(&pack_with(&[5, 4]), &ctx).unwrap_err();
    assert!(matches!(err.root_cause(), EvalError::TilingFailed { .. }), "{:?}", err);
    assert!(runner.mem_usage().is_none());

    let err = runner.execute(&valid, Some(&workspace), workspace_bytes, &ctx).unwrap_err();
    assert!(matches!(err, EvalError::NotSetUp { .. }), "{:?}", err);

    assert_eq!(runner.setup(&valid, &ctx).unwrap(), workspace_bytes);
    runner.execute(&valid, Some(&workspace), workspace_bytes, &ctx).unwrap();
    ctx.stream.synchronize().unwrap();

    let actual = bytes_to_array(out_tensor.desc(), &out_tensor.read_to_host().unwrap());
    let expected = masked_softmax_expected(&x, &[2, 4]);
    assert_tensors_match(&[expected], &[actual], Tolerance::for_dtype(DType::F32), false);
}

#[test]
fn rejected_host_data_keeps_previous() {
    let x = random_array(&mut rng(), &[2, 3, 4]);
    let descs = [f32_desc(&[2, 3, 4]), TensorDesc::new(DType::I32, shape![2])];
    let op = Arc::new(SoftmaxOperation { masked: true });
    let host_data = vec![None, Some(HostData::from_i32(&[2, 4]))];
    let mut executor = OperationExecutor::with_host_data(context(SocGeneration::Gen2), op, &descs, host_data).unwrap();

    let err = executor.set_host_data(2, HostData::from_i32(&[1, 1])).unwrap_err();
    assert!(
        matches!(err, EvalError::PackMismatch { tensor: TensorRef::Input(2), .. }),
        "{:?}",
        err
    );

    let err = executor.set_host_data(1, HostData::from_i32(&[5, 4])).unwrap_err();
    assert!(matches!(err.root_cause(), EvalError::TilingFailed { .. }), "{:?}", err);

    let lens = ArrayD::from_shape_vec(IxDyn(&[2]), vec![2.0, 4.0]).unwrap();
    let outputs = executor.evaluate(&[x.clone(), lens]).unwrap();
    let expected = masked_softmax_expected(&x, &[2, 4]);
    assert_tensors_match(&[expected], &outputs, Tolerance::for_dtype(DType::F32), false);
}
