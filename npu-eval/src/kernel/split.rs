use bytemuck::{Pod, Zeroable};

use npu_graph::hardware::SocGeneration;
use npu_graph::param::{OpKind, OpParam};
use npu_sys::stream::{KernelBinary, KernelCall};

use crate::error::EvalResult;
use crate::kernel::tiling::{tiling_u32, CoreSplit};
use crate::kernel::{all_nd, expect_len, tiling_failed, KernelDef, LaunchParam, Tiling, TilingContext};

/// Byte-level split, independent of the dtype.
pub const SPLIT: KernelDef = KernelDef {
    name: "split",
    kind: OpKind::Split,
    can_support,
    tiling,
    variants: &[
        KernelBinary {
            name: "split_contiguous",
            entry: split_entry,
        },
        KernelBinary {
            name: "split_strided",
            entry: split_entry,
        },
    ],
};

#[derive(Debug, Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct SplitTiling {
    /// Product of the axes before the split axis.
    pub outer: u32,
    pub parts: u32,
    /// Bytes of one output slice for a single outer index.
    pub chunk_bytes: u32,
    pub strided: u32,
    /// Over parts when contiguous, over outer rows when strided.
    pub split: CoreSplit,
}

fn can_support(param: &LaunchParam, _: SocGeneration) -> bool {
    let OpParam::Split { parts, .. } = param.param else { return false };
    param.outputs.len() == parts && all_nd(param)
}

fn tiling(param: &LaunchParam, ctx: &TilingContext) -> EvalResult<Tiling> {
    let name = SPLIT.name;
    let OpParam::Split { axis, parts } = param.param else {
        return Err(tiling_failed(name, "not a split launch"));
    };
    let x = &param.inputs[0];
    let axis = x
        .shape
        .axis(axis)
        .ok_or_else(|| tiling_failed(name, format!("axis {} out of range", axis)))?;

    let overflow = || tiling_failed(name, format!("size of {} overflows", x));
    let outer = x.shape.outer_size(axis).ok_or_else(overflow)?;
    let part = x.shape.dims()[axis] / parts.max(1);
    let chunk_bytes = x
        .shape
        .inner_size(axis)
        .and_then(|inner| inner.checked_mul(part))
        .and_then(|n| n.checked_mul(x.dtype.size_bytes()))
        .ok_or_else(overflow)?;

    // with a single outer index every output is one contiguous slice of the input
    let strided = outer > 1;
    let units = if strided { outer } else { parts };

    let tiling = SplitTiling {
        outer: tiling_u32(name, "outer size", outer)?,
        parts: tiling_u32(name, "parts", parts)?,
        chunk_bytes: tiling_u32(name, "chunk bytes", chunk_bytes)?,
        strided: strided as u32,
        split: CoreSplit::new(tiling_u32(name, "units", units)?, ctx.core_count),
    };

    Ok(Tiling {
        block_dim: tiling.split.cores,
        key: strided as usize,
        data: bytemuck::bytes_of(&tiling).to_vec(),
        workspace_bytes: 0,
    })
}

fn split_entry(call: &mut KernelCall) -> Result<(), String> {
    let t: SplitTiling = call.tiling()?;
    let (outer, parts, chunk) = (t.outer as usize, t.parts as usize, t.chunk_bytes as usize);

    expect_len("x", &call.inputs[0], outer * parts * chunk)?;
    if call.outputs.len() != parts {
        return Err(format!("expected {} outputs, got {}", parts, call.outputs.len()));
    }
    for output in call.outputs.iter() {
        expect_len("output", output, outer * chunk)?;
    }

    let mut copy = |o: usize, p: usize| {
        let src = (o * parts + p) * chunk;
        let dst = o * chunk;
        call.outputs[p][dst..dst + chunk].copy_from_slice(&call.inputs[0][src..src + chunk]);
    };

    let range = t.split.range(call.block_idx);
    if t.strided != 0 {
        for o in range {
            for p in 0..parts {
                copy(o, p);
            }
        }
    } else {
        for p in range {
            copy(0, p);
        }
    }

    Ok(())
}
