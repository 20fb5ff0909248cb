use bytemuck::{Pod, Zeroable};

use npu_graph::hardware::SocGeneration;
use npu_graph::param::{NormKind, OpKind, OpParam};
use npu_sys::stream::{KernelBinary, KernelCall};

use crate::error::EvalResult;
use crate::kernel::tiling::{tiling_u32, CoreSplit};
use crate::kernel::{
    all_nd, checked_numel, entry_dtype, expect_len, float_supported, inputs_share_dtype, tiling_failed, KernelDef, LaunchParam,
    Tiling, TilingContext,
};

pub const NORM: KernelDef = KernelDef {
    name: "norm",
    kind: OpKind::Norm,
    can_support,
    tiling,
    variants: &[
        KernelBinary {
            name: "rms_norm",
            entry: norm_entry,
        },
        KernelBinary {
            name: "layer_norm",
            entry: norm_entry,
        },
    ],
};

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct NormTiling {
    pub rows: u32,
    pub cols: u32,
    pub layer_norm: u32,
    pub eps: f32,
    pub dtype: u32,
    pub split: CoreSplit,
}

fn can_support(param: &LaunchParam, generation: SocGeneration) -> bool {
    matches!(param.param, OpParam::Norm { .. })
        && all_nd(param)
        && inputs_share_dtype(param)
        && float_supported(param.inputs[0].dtype, generation)
        && param.inputs[0].shape.last().map_or(false, |h| h > 0)
}

fn tiling(param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Tiling> {
    let name = NORM.name;
    let OpParam::Norm { kind, eps } = param.param else {
        return Err(tiling_failed(name, "not a norm launch"));
    };
    let x = &param.inputs[0];
    let cols = x.shape.last().ok_or_else(|| tiling_failed(name, "scalar input"))?;
    let rows = tiling_u32(name, "rows", checked_numel(name, x)? / cols.max(1))?;

    let eps = eps.into_inner();
    if !(eps >= 0.0 && eps.is_finite()) {
        return Err(tiling_failed(name, format!("invalid eps {}", eps)));
    }

    let tiling = NormTiling {
        rows,
        cols: tiling_u32(name, "cols", cols)?,
        layer_norm: (kind == NormKind::LayerNorm) as u32,
        eps,
        dtype: x.dtype.code(),
        split: CoreSplit::new(rows, ctx.core_count),
    };

    Ok(Tiling {
        block_dim: tiling.split.cores,
        key: tiling.layer_norm as usize,
        data: bytemuck::bytes_of(&tiling).to_vec(),
        workspace_bytes: 0,
    })
}

fn norm_entry(call: &mut KernelCall) -> Result<(), String> {
    let t: NormTiling = call.tiling()?;
    let dtype = entry_dtype(t.dtype)?;
    let cols = t.cols as usize;
    let size = dtype.size_bytes();

    expect_len("x", &call.inputs[0], t.rows as usize * cols * size)?;
    expect_len("gamma", &call.inputs[1], cols * size)?;
    if t.layer_norm != 0 {
        expect_len("beta", &call.inputs[2], cols * size)?;
    }

    for r in t.split.range(call.block_idx) {
        let x = |c: usize| dtype.read_f32(&call.inputs[0], r * cols + c);

        let (mean, denom) = if t.layer_norm != 0 {
            let mean = (0..cols).map(x).sum::<f32>() / cols as f32;
            let var = (0..cols).map(|c| (x(c) - mean).powi(2)).sum::<f32>() / cols as f32;
            (mean, (var + t.eps).sqrt())
        } else {
            let ms = (0..cols).map(|c| x(c).powi(2)).sum::<f32>() / cols as f32;
            (0.0, (ms + t.eps).sqrt())
        };

        let values = (0..cols)
            .map(|c| {
                let gamma = dtype.read_f32(&call.inputs[1], c);
                let beta = if t.layer_norm != 0 {
                    dtype.read_f32(&call.inputs[2], c)
                } else {
                    0.0
                };
                (x(c) - mean) / denom * gamma + beta
            })
            .collect::<Vec<_>>();

        for (c, y) in values.into_iter().enumerate() {
            dtype.write_f32(&mut call.outputs[0], r * cols + c, y);
        }
    }

    Ok(())
}
