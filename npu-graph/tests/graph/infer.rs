use npu_graph::dtype::DType;
use npu_graph::error::GraphError;
use npu_graph::graph::{KernelGraph, Reshape};
use npu_graph::operation::Operation;
use npu_graph::ops::{
    ElewiseOperation, FusedQkvOperation, LinearOperation, MlpActivation, MlpOperation, Precision, ResidualMlpOperation,
    RmsNormOperation,
};
use npu_graph::param::OpParam;
use npu_graph::shape;
use npu_graph::shape::{Shape, TensorDesc, MAX_RANK};

fn f16(shape: Shape) -> TensorDesc {
    TensorDesc::new(DType::F16, shape)
}

#[test]
fn add_f16() {
    let op = ElewiseOperation::add();
    let outputs = op.infer_shape(&[f16(shape![1, 2]), f16(shape![1, 2])]).unwrap();
    assert_eq!(outputs, vec![f16(shape![1, 2])]);
}

#[test]
fn add_wrong_count() {
    let op = ElewiseOperation::add();
    let result = op.infer_shape(&[f16(shape![1, 2])]);
    assert!(matches!(
        result,
        Err(GraphError::WrongInputCount {
            expected: 2,
            actual: 1,
            ..
        })
    ));
}

#[test]
fn add_incompatible() {
    let op = ElewiseOperation::add();
    let result = op.infer_shape(&[f16(shape![2, 3]), f16(shape![2, 4])]);
    assert!(matches!(result, Err(GraphError::InvalidInput { input: 1, .. })));
}

#[test]
fn rank_limit() {
    assert!(Shape::new(vec![1; MAX_RANK]).is_ok());
    assert_eq!(
        Shape::new(vec![1; MAX_RANK + 1]),
        Err(GraphError::RankTooLarge {
            rank: MAX_RANK + 1,
            max: MAX_RANK
        })
    );
}

#[test]
fn qkv_shapes() {
    let op = FusedQkvOperation::new(Precision::Fp16);
    let (b, s, h, k) = (2, 5, 16, 8);
    let outputs = op.infer_shape(&[f16(shape![b, s, h]), f16(shape![h, 3 * k])]).unwrap();
    assert_eq!(outputs, vec![f16(shape![b, s, k]); 3]);
}

#[test]
fn qkv_rejects_bad_weight() {
    let op = FusedQkvOperation::new(Precision::Fp16);
    let result = op.infer_shape(&[f16(shape![2, 5, 16]), f16(shape![16, 25])]);
    assert!(matches!(result, Err(GraphError::InvalidInput { input: 1, .. })));

    let result = op.infer_shape(&[f16(shape![10, 16]), f16(shape![16, 24])]);
    assert!(matches!(result, Err(GraphError::InvalidInput { input: 0, .. })));
}

#[test]
fn merge_leading_reshape() {
    let reshape = Reshape::merge_leading();
    let shape = shape![2, 5, 16];

    let merged = reshape.apply(&shape).unwrap();
    // the batch and sequence axes are merged, not overwritten
    assert_eq!(merged, shape![10, 16]);
    assert_eq!(merged.checked_numel(), shape.checked_numel());

    // pure: applying twice to the same input gives the same result
    assert_eq!(reshape.apply(&shape).unwrap(), merged);
}

#[test]
fn reshape_changing_numel() {
    let reshape = Reshape::new("drop_first", |shape| Some(Shape::fixed(&shape.dims()[1..])));
    let result = reshape.apply(&shape![2, 3]);
    assert!(matches!(result, Err(GraphError::ReshapeElementCount { name: "drop_first", .. })));
}

#[test]
fn graph_infer_applies_reshape() {
    let mut graph = KernelGraph::new(2, 1, 0);
    let (x, w, y) = (graph.input(0), graph.input(1), graph.output(0));
    let matmul = OpParam::MatMul {
        transpose_b: false,
        with_bias: false,
    };
    graph.push(matmul, &[x, w], &[y]).reshape_input(0, Reshape::merge_leading());

    let shapes = graph.infer_shapes(&[f16(shape![2, 3, 4]), f16(shape![4, 6])]).unwrap();
    assert_eq!(shapes.get(y), &f16(shape![6, 6]));
    assert_eq!(graph.node_input_descs(0, &shapes).unwrap()[0], f16(shape![6, 4]));
    // the slot itself keeps its original shape
    assert_eq!(shapes.get(x), &f16(shape![2, 3, 4]));
}

#[test]
fn linear_input_count() {
    assert_eq!(LinearOperation::new(Precision::Fp16, false).input_num(), 2);
    assert_eq!(LinearOperation::new(Precision::Fp16, true).input_num(), 3);

    let op = LinearOperation::new(Precision::Fp16, true);
    let outputs = op
        .infer_shape(&[f16(shape![3, 4]), f16(shape![4, 5]), f16(shape![5])])
        .unwrap();
    assert_eq!(outputs, vec![f16(shape![3, 5])]);

    let result = op.infer_shape(&[f16(shape![3, 4]), f16(shape![4, 5])]);
    assert!(matches!(result, Err(GraphError::WrongInputCount { ref op, .. }) if op == "Linear"));
}

#[test]
fn linear_precision_mismatch() {
    let op = LinearOperation::new(Precision::Fp32, false);
    let result = op.infer_shape(&[f16(shape![3, 4]), f16(shape![4, 5])]);
    assert!(matches!(result, Err(GraphError::InvalidInput { input: 0, .. })));
}

#[test]
fn parameter_dtype_mismatch() {
    let f32_desc = |shape| TensorDesc::new(DType::F32, shape);

    let linear = LinearOperation::new(Precision::Fp16, true);
    let result = linear.infer_shape(&[f16(shape![1, 2]), f16(shape![2, 2]), f32_desc(shape![2])]);
    assert!(
        matches!(result, Err(GraphError::InvalidInput { ref op, input: 2, .. }) if op == "Linear"),
        "{:?}",
        result
    );

    let norm = RmsNormOperation { eps: 1e-6 };
    assert!(norm.infer_shape(&[f16(shape![4, 8]), f16(shape![8])]).is_ok());
    let result = norm.infer_shape(&[f16(shape![4, 8]), f32_desc(shape![8])]);
    assert!(matches!(result, Err(GraphError::InvalidInput { input: 1, .. })), "{:?}", result);

    let residual = ResidualMlpOperation::new(1e-6, MlpOperation::new(MlpActivation::Gelu, Precision::Fp16));
    let inputs = [f16(shape![1, 4, 8]), f32_desc(shape![8]), f16(shape![8, 16]), f16(shape![16, 8])];
    assert!(residual.infer_shape(&inputs).is_err());
}

#[test]
fn reshape_size_overflow() {
    let result = Reshape::merge_leading().apply(&shape![1 << 33, 1 << 33, 8]);
    assert!(matches!(result, Err(GraphError::SizeOverflow { .. })), "{:?}", result);

    // shape inference alone does not multiply the dimensions
    let op = FusedQkvOperation::new(Precision::Fp16);
    let outputs = op
        .infer_shape(&[f16(shape![1 << 33, 1 << 33, 8]), f16(shape![8, 24])])
        .unwrap();
    assert_eq!(outputs[0], f16(shape![1 << 33, 1 << 33, 8]));
    assert_eq!(outputs[0].size_bytes(), Err(GraphError::SizeOverflow { shape: shape![1 << 33, 1 << 33, 8] }));
}

#[test]
fn mlp_shapes() {
    let (h, i) = (8, 12);
    let x = f16(shape![2, 3, h]);

    let swiglu = MlpOperation::new(MlpActivation::Swiglu, Precision::Fp16);
    let outputs = swiglu
        .infer_shape(&[x.clone(), f16(shape![h, 2 * i]), f16(shape![i, h])])
        .unwrap();
    assert_eq!(outputs, vec![x.clone()]);

    let gelu = MlpOperation::new(MlpActivation::Gelu, Precision::Fp16);
    let outputs = gelu.infer_shape(&[x.clone(), f16(shape![h, i]), f16(shape![i, h])]).unwrap();
    assert_eq!(outputs, vec![x.clone()]);

    let residual = ResidualMlpOperation::new(1e-6, swiglu);
    let outputs = residual
        .infer_shape(&[x.clone(), f16(shape![h]), f16(shape![h, 2 * i]), f16(shape![i, h])])
        .unwrap();
    assert_eq!(outputs, vec![x]);
}

#[test]
fn infer_deterministic() {
    let op = ResidualMlpOperation::new(1e-6, MlpOperation::new(MlpActivation::Swiglu, Precision::Fp16));
    let inputs = [f16(shape![1, 4, 8]), f16(shape![8]), f16(shape![8, 16]), f16(shape![8, 8])];

    let first = op.infer_shape(&inputs).unwrap();
    for _ in 0..8 {
        assert_eq!(op.infer_shape(&inputs).unwrap(), first);
    }
}
