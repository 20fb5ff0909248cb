use bytemuck::{Pod, Zeroable};

use npu_graph::dtype::DType;
use npu_graph::hardware::SocGeneration;
use npu_graph::param::{OpKind, OpParam};
use npu_sys::stream::{KernelBinary, KernelCall};

use crate::error::EvalResult;
use crate::kernel::tiling::{tiling_u32, CoreSplit};
use crate::kernel::{
    all_nd, checked_numel, entry_dtype, expect_len, float_supported, tiling_failed, KernelDef, LaunchParam, Tiling, TilingContext,
};

pub const SOFTMAX: KernelDef = KernelDef {
    name: "softmax",
    kind: OpKind::Softmax,
    can_support,
    tiling,
    variants: &[
        KernelBinary {
            name: "softmax",
            entry: softmax_entry,
        },
        KernelBinary {
            name: "softmax_masked",
            entry: softmax_entry,
        },
    ],
};

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct SoftmaxTiling {
    pub rows: u32,
    pub cols: u32,
    pub dtype: u32,
    pub masked: u32,
    /// Rows belonging to a single batch entry, which share one sequence length.
    pub rows_per_batch: u32,
    pub split: CoreSplit,
}

fn can_support(param: &LaunchParam, generation: SocGeneration) -> bool {
    let OpParam::Softmax { masked } = param.param else { return false };
    let lens_ok = !masked || param.inputs[1].dtype == DType::I32;
    lens_ok && all_nd(param) && float_supported(param.inputs[0].dtype, generation)
}

fn tiling(param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Tiling> {
    let name = SOFTMAX.name;
    let OpParam::Softmax { masked } = param.param else {
        return Err(tiling_failed(name, "not a softmax launch"));
    };
    let x = &param.inputs[0];
    let cols = x.shape.last().ok_or_else(|| tiling_failed(name, "scalar input"))?;
    let rows = checked_numel(name, x)? / cols.max(1);

    let mut rows_per_batch = rows;
    if masked {
        let lens = param.host_data[1]
            .as_ref()
            .ok_or_else(|| tiling_failed(name, "sequence lengths have no host data"))?;
        let batch = x.shape.dims()[0];
        if lens.len() != batch {
            return Err(tiling_failed(
                name,
                format!("expected {} sequence lengths, got {}", batch, lens.len()),
            ));
        }
        if let Some(&bad) = lens.values().iter().find(|&&len| len < 0 || len as usize > cols) {
            return Err(tiling_failed(name, format!("sequence length {} not in 0..={}", bad, cols)));
        }
        rows_per_batch = rows / batch.max(1);
    }

    let rows32 = tiling_u32(name, "rows", rows)?;
    let tiling = SoftmaxTiling {
        rows: rows32,
        cols: tiling_u32(name, "cols", cols)?,
        dtype: x.dtype.code(),
        masked: masked as u32,
        rows_per_batch: tiling_u32(name, "rows per batch", rows_per_batch)?,
        split: CoreSplit::new(rows32, ctx.core_count),
    };

    // one row of f32 exponentials per core
    let workspace_bytes = (tiling.split.cores as usize)
        .checked_mul(cols)
        .and_then(|x| x.checked_mul(4))
        .ok_or_else(|| tiling_failed(name, "workspace size overflows"))?;

    Ok(Tiling {
        block_dim: tiling.split.cores,
        key: masked as usize,
        data: bytemuck::bytes_of(&tiling).to_vec(),
        workspace_bytes,
    })
}

fn softmax_entry(call: &mut KernelCall) -> Result<(), String> {
    let t: SoftmaxTiling = call.tiling()?;
    let dtype = entry_dtype(t.dtype)?;
    let cols = t.cols as usize;

    expect_len("x", &call.inputs[0], t.rows as usize * cols * dtype.size_bytes())?;
    expect_len("workspace", call.workspace, t.split.cores as usize * cols * 4)?;

    let scratch_start = call.block_idx as usize * cols * 4;
    for r in t.split.range(call.block_idx) {
        let valid = if t.masked != 0 {
            let batch = r / t.rows_per_batch.max(1) as usize;
            DType::I32.read_i64(&call.inputs[1], batch).clamp(0, cols as i64) as usize
        } else {
            cols
        };

        let max = (0..valid)
            .map(|c| dtype.read_f32(&call.inputs[0], r * cols + c))
            .fold(f32::NEG_INFINITY, f32::max);

        let mut sum = 0.0;
        for c in 0..valid {
            let e = (dtype.read_f32(&call.inputs[0], r * cols + c) - max).exp();
            sum += e;
            let at = scratch_start + c * 4;
            call.workspace[at..at + 4].copy_from_slice(&e.to_le_bytes());
        }

        for c in 0..cols {
            let y = if c < valid {
                let at = scratch_start + c * 4;
                let e = f32::from_le_bytes([
                    call.workspace[at],
                    call.workspace[at + 1],
                    call.workspace[at + 2],
                    call.workspace[at + 3],
                ]);
                e / sum
            } else {
                0.0
            };
            dtype.write_f32(&mut call.outputs[0], r * cols + c, y);
        }
    }

    Ok(())
}
