use bytemuck::{Pod, Zeroable};

use npu_graph::dtype::DType;
use npu_graph::hardware::SocGeneration;
use npu_graph::param::{ElewiseKind, OpKind, OpParam};
use npu_graph::shape::MAX_RANK;
use npu_sys::stream::{KernelBinary, KernelCall};

use crate::error::EvalResult;
use crate::kernel::tiling::{tiling_u32, CoreSplit};
use crate::kernel::{
    all_nd, checked_numel, entry_dtype, expect_len, float_key, float_supported, inputs_share_dtype, tiling_failed, KernelDef,
    LaunchParam, Tiling, TilingContext,
};

/// Minimum number of elements worth giving to a separate core.
const MIN_ELEMENTS_PER_CORE: usize = 256;

pub const ELEWISE_FLOAT: KernelDef = KernelDef {
    name: "elewise_float",
    kind: OpKind::Elewise,
    can_support: can_support_float,
    tiling: tiling_float,
    variants: &[
        KernelBinary {
            name: "elewise_f16",
            entry: elewise_entry,
        },
        KernelBinary {
            name: "elewise_bf16",
            entry: elewise_entry,
        },
        KernelBinary {
            name: "elewise_f32",
            entry: elewise_entry,
        },
        KernelBinary {
            name: "cast",
            entry: elewise_entry,
        },
    ],
};

pub const ELEWISE_INT: KernelDef = KernelDef {
    name: "elewise_int",
    kind: OpKind::Elewise,
    can_support: can_support_int,
    tiling: tiling_int,
    variants: &[
        KernelBinary {
            name: "elewise_i32",
            entry: elewise_entry,
        },
        KernelBinary {
            name: "elewise_i64",
            entry: elewise_entry,
        },
    ],
};

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct ElewiseTiling {
    pub op: u32,
    pub in_dtype: u32,
    pub out_dtype: u32,
    pub scale: f32,
    pub rank: u32,
    pub split: CoreSplit,
    pub dims: [u32; MAX_RANK],
    pub a_strides: [u32; MAX_RANK],
    pub b_strides: [u32; MAX_RANK],
}

const OP_ADD: u32 = 0;
const OP_SUB: u32 = 1;
const OP_MUL: u32 = 2;
const OP_MULS: u32 = 3;
const OP_CAST: u32 = 4;

fn kind(param: &LaunchParam) -> Option<ElewiseKind> {
    match param.param {
        OpParam::Elewise { kind } => Some(kind),
        _ => None,
    }
}

fn can_support_float(param: &LaunchParam, generation: SocGeneration) -> bool {
    let Some(kind) = kind(param) else { return false };
    if !all_nd(param) {
        return false;
    }

    match kind {
        ElewiseKind::Add | ElewiseKind::Sub | ElewiseKind::Mul | ElewiseKind::Muls(_) => {
            inputs_share_dtype(param) && float_supported(param.inputs[0].dtype, generation)
        }
        ElewiseKind::Cast(to) => {
            let from = param.inputs[0].dtype;
            (from != DType::BF16 && to != DType::BF16) || generation.supports_bf16()
        }
    }
}

fn can_support_int(param: &LaunchParam, _: SocGeneration) -> bool {
    let Some(kind) = kind(param) else { return false };
    let int = matches!(param.inputs[0].dtype, DType::I32 | DType::I64);

    match kind {
        ElewiseKind::Add | ElewiseKind::Sub | ElewiseKind::Mul | ElewiseKind::Muls(_) => {
            int && inputs_share_dtype(param) && all_nd(param)
        }
        ElewiseKind::Cast(_) => false,
    }
}

fn tiling_float(param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Tiling> {
    let key = match kind(param) {
        Some(ElewiseKind::Cast(_)) => 3,
        _ => float_key(param.inputs[0].dtype),
    };
    build_tiling(ELEWISE_FLOAT.name, param, ctx, key)
}

fn tiling_int(param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Tiling> {
    let key = match param.inputs[0].dtype {
        DType::I32 => 0,
        _ => 1,
    };
    build_tiling(ELEWISE_INT.name, param, ctx, key)
}

fn build_tiling(name: &'static str, param: &LaunchParam, ctx: &TilingContext, key: usize) -> EvalResult<Tiling> {
    let kind = kind(param).ok_or_else(|| tiling_failed(name, "not an elementwise launch"))?;
    let out = &param.outputs[0];

    let (op, scale) = match kind {
        ElewiseKind::Add => (OP_ADD, 0.0),
        ElewiseKind::Sub => (OP_SUB, 0.0),
        ElewiseKind::Mul => (OP_MUL, 0.0),
        ElewiseKind::Muls(scale) => (OP_MULS, scale.into_inner()),
        ElewiseKind::Cast(_) => (OP_CAST, 0.0),
    };

    let numel = checked_numel(name, out)?;
    let total = tiling_u32(name, "element count", numel)?;
    let units = (numel + MIN_ELEMENTS_PER_CORE - 1) / MIN_ELEMENTS_PER_CORE;
    let split = CoreSplit::new(total, ctx.core_count.min(tiling_u32(name, "unit count", units.max(1))?));

    let mut tiling = ElewiseTiling {
        op,
        in_dtype: param.inputs[0].dtype.code(),
        out_dtype: out.dtype.code(),
        scale,
        rank: out.rank() as u32,
        split,
        dims: [0; MAX_RANK],
        a_strides: [0; MAX_RANK],
        b_strides: [0; MAX_RANK],
    };

    let a_strides = param.inputs[0].shape.broadcast_strides(&out.shape);
    let b_strides = match param.inputs.get(1) {
        Some(b) => b.shape.broadcast_strides(&out.shape),
        None => vec![0; out.rank()],
    };
    for axis in 0..out.rank() {
        tiling.dims[axis] = tiling_u32(name, "dimension", out.shape.dims()[axis])?;
        tiling.a_strides[axis] = tiling_u32(name, "stride", a_strides[axis])?;
        tiling.b_strides[axis] = tiling_u32(name, "stride", b_strides[axis])?;
    }

    Ok(Tiling {
        block_dim: split.cores,
        key,
        data: bytemuck::bytes_of(&tiling).to_vec(),
        workspace_bytes: 0,
    })
}

fn elewise_entry(call: &mut KernelCall) -> Result<(), String> {
    let t: ElewiseTiling = call.tiling()?;
    let in_dtype = entry_dtype(t.in_dtype)?;
    let out_dtype = entry_dtype(t.out_dtype)?;
    let rank = t.rank as usize;

    expect_len("output", &call.outputs[0], t.split.total() as usize * out_dtype.size_bytes())?;
    let int = !in_dtype.is_float() && t.op != OP_CAST;

    for i in t.split.range(call.block_idx) {
        let mut rem = i;
        let (mut ia, mut ib) = (0, 0);
        for axis in (0..rank).rev() {
            let d = t.dims[axis] as usize;
            let c = rem % d;
            rem /= d;
            ia += c * t.a_strides[axis] as usize;
            ib += c * t.b_strides[axis] as usize;
        }

        let a = &call.inputs[0];
        if int {
            let x = in_dtype.read_i64(a, ia);
            let y = match t.op {
                OP_ADD => x.wrapping_add(in_dtype.read_i64(&call.inputs[1], ib)),
                OP_SUB => x.wrapping_sub(in_dtype.read_i64(&call.inputs[1], ib)),
                OP_MUL => x.wrapping_mul(in_dtype.read_i64(&call.inputs[1], ib)),
                OP_MULS => (x as f64 * t.scale as f64).round() as i64,
                op => return Err(format!("invalid int op {}", op)),
            };
            out_dtype.write_i64(&mut call.outputs[0], i, y);
        } else {
            let x = in_dtype.read_f32(a, ia);
            let y = match t.op {
                OP_ADD => x + in_dtype.read_f32(&call.inputs[1], ib),
                OP_SUB => x - in_dtype.read_f32(&call.inputs[1], ib),
                OP_MUL => x * in_dtype.read_f32(&call.inputs[1], ib),
                OP_MULS => x * t.scale,
                OP_CAST => {
                    if in_dtype.is_float() {
                        x
                    } else {
                        out_dtype.write_i64(&mut call.outputs[0], i, in_dtype.read_i64(a, ia));
                        continue;
                    }
                }
                op => return Err(format!("invalid float op {}", op)),
            };
            out_dtype.write_f32(&mut call.outputs[0], i, y);
        }
    }

    Ok(())
}
