use bytemuck::{Pod, Zeroable};

use npu_graph::dtype::{Format, NZ_BLOCK};
use npu_graph::hardware::SocGeneration;
use npu_graph::param::{OpKind, OpParam};
use npu_sys::stream::{KernelBinary, KernelCall};

use crate::error::EvalResult;
use crate::kernel::tiling::{tiling_u32, CoreSplit};
use crate::kernel::{
    checked_numel, entry_dtype, expect_len, float_supported, inputs_share_dtype, tiling_failed, KernelDef, LaunchParam, Tiling,
    TilingContext,
};

/// Row-major weights. The bias epilogue is only fused on the newer generation.
pub const MATMUL_ND: KernelDef = KernelDef {
    name: "matmul_nd",
    kind: OpKind::MatMul,
    can_support: can_support_nd,
    tiling: tiling_nd,
    variants: &[
        KernelBinary {
            name: "matmul_nd",
            entry: matmul_entry,
        },
        KernelBinary {
            name: "matmul_nd_bias",
            entry: matmul_entry,
        },
    ],
};

/// Weights in the fractal Nz layout, only available on the older generation.
pub const MATMUL_NZ: KernelDef = KernelDef {
    name: "matmul_nz",
    kind: OpKind::MatMul,
    can_support: can_support_nz,
    tiling: tiling_nz,
    variants: &[KernelBinary {
        name: "matmul_nz",
        entry: matmul_entry,
    }],
};

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct MatMulTiling {
    pub m: u32,
    pub k: u32,
    pub n: u32,
    pub dtype: u32,
    pub transpose_b: u32,
    pub with_bias: u32,
    pub nz_b: u32,
    pub split: CoreSplit,
}

fn flags(param: &LaunchParam) -> Option<(bool, bool)> {
    match param.param {
        OpParam::MatMul { transpose_b, with_bias } => Some((transpose_b, with_bias)),
        _ => None,
    }
}

fn can_support_nd(param: &LaunchParam, generation: SocGeneration) -> bool {
    let Some((_, with_bias)) = flags(param) else { return false };
    let formats_nd = param.inputs.iter().all(|d| d.format == Format::Nd);

    formats_nd
        && inputs_share_dtype(param)
        && float_supported(param.inputs[0].dtype, generation)
        && (!with_bias || generation.is_gen2())
}

fn can_support_nz(param: &LaunchParam, generation: SocGeneration) -> bool {
    let Some((transpose_b, with_bias)) = flags(param) else { return false };
    let (a, b) = (&param.inputs[0], &param.inputs[1]);

    generation == SocGeneration::Gen1
        && !transpose_b
        && !with_bias
        && a.format == Format::Nd
        && b.format == Format::Nz
        && b.shape.dims()[1] % NZ_BLOCK == 0
        && inputs_share_dtype(param)
        && float_supported(a.dtype, generation)
}

fn tiling_nd(param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Tiling> {
    let with_bias = flags(param).map_or(false, |(_, b)| b);
    build_tiling(MATMUL_ND.name, param, ctx, false, with_bias as usize)
}

fn tiling_nz(param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Tiling> {
    build_tiling(MATMUL_NZ.name, param, ctx, true, 0)
}

fn build_tiling(name: &'static str, param: &LaunchParam, ctx: &TilingContext, nz_b: bool, key: usize) -> EvalResult<Tiling> {
    let (transpose_b, with_bias) = flags(param).ok_or_else(|| tiling_failed(name, "not a matmul launch"))?;
    let (a, b) = (&param.inputs[0], &param.inputs[1]);

    let k = a.shape.last().ok_or_else(|| tiling_failed(name, "scalar input"))?;
    let m = checked_numel(name, a)? / k.max(1);
    let n = if transpose_b { b.shape.dims()[0] } else { b.shape.dims()[1] };

    // the kernel accumulates over m * n outputs with k-long dot products
    m.checked_mul(n)
        .and_then(|mn| mn.checked_mul(k))
        .ok_or_else(|| tiling_failed(name, format!("problem size {}x{}x{} overflows", m, k, n)))?;

    let m32 = tiling_u32(name, "m", m)?;
    let tiling = MatMulTiling {
        m: m32,
        k: tiling_u32(name, "k", k)?,
        n: tiling_u32(name, "n", n)?,
        dtype: a.dtype.code(),
        transpose_b: transpose_b as u32,
        with_bias: with_bias as u32,
        nz_b: nz_b as u32,
        split: CoreSplit::new(m32, ctx.core_count),
    };

    Ok(Tiling {
        block_dim: tiling.split.cores,
        key,
        data: bytemuck::bytes_of(&tiling).to_vec(),
        workspace_bytes: 0,
    })
}

fn matmul_entry(call: &mut KernelCall) -> Result<(), String> {
    let t: MatMulTiling = call.tiling()?;
    let dtype = entry_dtype(t.dtype)?;
    let (k, n) = (t.k as usize, t.n as usize);
    let m = t.m as usize;
    let size = dtype.size_bytes();

    expect_len("a", &call.inputs[0], m * k * size)?;
    expect_len("b", &call.inputs[1], k * n * size)?;
    expect_len("output", &call.outputs[0], m * n * size)?;
    if t.with_bias != 0 {
        expect_len("bias", &call.inputs[2], n * size)?;
    }

    let b_index = |kk: usize, c: usize| {
        if t.nz_b != 0 {
            (c / NZ_BLOCK) * k * NZ_BLOCK + kk * NZ_BLOCK + c % NZ_BLOCK
        } else if t.transpose_b != 0 {
            c * k + kk
        } else {
            kk * n + c
        }
    };

    for r in t.split.range(call.block_idx) {
        for c in 0..n {
            let mut acc = 0.0f32;
            for kk in 0..k {
                acc += dtype.read_f32(&call.inputs[0], r * k + kk) * dtype.read_f32(&call.inputs[1], b_index(kk, c));
            }
            if t.with_bias != 0 {
                acc += dtype.read_f32(&call.inputs[2], c);
            }
            dtype.write_f32(&mut call.outputs[0], r * n + c, acc);
        }
    }

    Ok(())
}
