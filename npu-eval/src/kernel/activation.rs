use bytemuck::{Pod, Zeroable};

use npu_graph::hardware::SocGeneration;
use npu_graph::param::{ActivationKind, OpKind, OpParam};
use npu_sys::stream::{KernelBinary, KernelCall};

use crate::error::EvalResult;
use crate::kernel::tiling::{tiling_u32, CoreSplit};
use crate::kernel::{
    all_nd, checked_numel, entry_dtype, expect_len, float_supported, tiling_failed, KernelDef, LaunchParam, Tiling, TilingContext,
};

pub const ACTIVATION: KernelDef = KernelDef {
    name: "activation",
    kind: OpKind::Activation,
    can_support,
    tiling,
    variants: &[
        KernelBinary {
            name: "relu",
            entry: activation_entry,
        },
        KernelBinary {
            name: "gelu",
            entry: activation_entry,
        },
        KernelBinary {
            name: "silu",
            entry: activation_entry,
        },
        KernelBinary {
            name: "swiglu",
            entry: activation_entry,
        },
    ],
};

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct ActivationTiling {
    pub kind: u32,
    pub dtype: u32,
    pub rows: u32,
    /// Output columns, the swiglu input has twice as many.
    pub cols: u32,
    pub split: CoreSplit,
}

fn kind_key(kind: ActivationKind) -> usize {
    match kind {
        ActivationKind::Relu => 0,
        ActivationKind::Gelu => 1,
        ActivationKind::Silu => 2,
        ActivationKind::Swiglu => 3,
    }
}

fn can_support(param: &LaunchParam, generation: SocGeneration) -> bool {
    let OpParam::Activation { kind } = param.param else { return false };
    let supported = match kind {
        ActivationKind::Relu | ActivationKind::Gelu | ActivationKind::Silu => true,
        ActivationKind::Swiglu => generation.is_gen2(),
    };
    supported && all_nd(param) && float_supported(param.inputs[0].dtype, generation)
}

fn tiling(param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Tiling> {
    let name = ACTIVATION.name;
    let OpParam::Activation { kind } = param.param else {
        return Err(tiling_failed(name, "not an activation launch"));
    };
    let out = &param.outputs[0];

    // elementwise kinds are treated as a single column so rows split evenly
    let cols = match kind {
        ActivationKind::Swiglu => out.shape.last().ok_or_else(|| tiling_failed(name, "scalar output"))?,
        _ => 1,
    };
    let rows = tiling_u32(name, "rows", checked_numel(name, out)? / cols.max(1))?;

    let tiling = ActivationTiling {
        kind: kind_key(kind) as u32,
        dtype: out.dtype.code(),
        rows,
        cols: tiling_u32(name, "cols", cols)?,
        split: CoreSplit::new(rows, ctx.core_count),
    };

    Ok(Tiling {
        block_dim: tiling.split.cores,
        key: kind_key(kind),
        data: bytemuck::bytes_of(&tiling).to_vec(),
        workspace_bytes: 0,
    })
}

fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044715 * x * x * x)).tanh())
}

fn activation_entry(call: &mut KernelCall) -> Result<(), String> {
    let t: ActivationTiling = call.tiling()?;
    let dtype = entry_dtype(t.dtype)?;
    let cols = t.cols as usize;
    let swiglu = t.kind == 3;
    let in_cols = if swiglu { 2 * cols } else { cols };

    expect_len("x", &call.inputs[0], t.rows as usize * in_cols * dtype.size_bytes())?;
    expect_len("output", &call.outputs[0], t.rows as usize * cols * dtype.size_bytes())?;

    for r in t.split.range(call.block_idx) {
        for c in 0..cols {
            let x = dtype.read_f32(&call.inputs[0], r * in_cols + c);
            let y = match t.kind {
                0 => x.max(0.0),
                1 => gelu(x),
                2 => silu(x),
                3 => silu(x) * dtype.read_f32(&call.inputs[0], r * in_cols + cols + c),
                kind => return Err(format!("invalid activation kind {}", kind)),
            };
            dtype.write_f32(&mut call.outputs[0], r * cols + c, y);
        }
    }

    Ok(())
}
