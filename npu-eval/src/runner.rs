use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Instant;

use itertools::{zip_eq, Itertools};

use npu_graph::graph::{KernelGraph, Lifetime, NodeOp, SlotId, SlotKind};
use npu_graph::hardware::SocGeneration;
use npu_graph::operation::{LowerContext, Lowering, Operation};
use npu_graph::param::{OpKind, OpParam};
use npu_graph::shape::TensorDesc;
use npu_sys::device::Device;
use npu_sys::mem::DevicePtr;
use npu_sys::stream::{KernelOperand, LaunchArgs, Stream};

use crate::alloc::pool::{BlockId, BlockPool, MemoryAllocationSolver};
use crate::alloc::trace::AllocTrace;
use crate::config::EvalConfig;
use crate::error::{EvalError, EvalResult, TensorRef};
use crate::kernel::cache::TilingCache;
use crate::kernel::{KernelRegistry, LaunchParam, Selection, TilingContext};
use crate::tensor::{DeviceTensor, HostData, VariantPack};
use crate::util::debug_vec_multiline;

/// Everything a runner needs from its environment: the device, the stream to launch on and the kernels to pick from.
///
/// Cheap to clone, all heavy state is shared.
#[derive(Debug, Clone)]
pub struct Context {
    pub device: Device,
    pub stream: Arc<Stream>,
    pub registry: Arc<KernelRegistry>,
    pub config: EvalConfig,
    /// When set, every runner created with this context allocates its intermediates from this pool.
    pub shared_pool: Option<Arc<BlockPool>>,
    pub tiling_cache: Option<Arc<TilingCache>>,
}

/// Memory requirements of a runner, computed during setup.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MemoryUsage {
    /// Workspace the caller has to pass to [Runner::execute].
    pub workspace_bytes: usize,
    /// Bytes of intermediate tensors that are live at the same time.
    /// This is a lower bound for the pool bytes an execution touches.
    pub hypo_peak_bytes: usize,
    /// Bytes that would be necessary if each intermediate tensor got a distinct allocation, without any reuse.
    pub hypo_total_bytes: usize,
}

/// Host-side timing of a single kernel, only collected by [Runner::execute_profiled].
#[derive(Debug, Clone)]
pub struct KernelTiming {
    pub kind: OpKind,
    pub variant: &'static str,
    pub debug_id: String,
    pub seconds: f32,
}

/// The execution-time counterpart of an [Operation] for one device.
///
/// The lifecycle is `create -> setup -> execute*`: [Runner::setup] infers shapes, selects and tiles every kernel
/// and reports the workspace size, [Runner::execute] then only allocates intermediates and enqueues launches.
/// Executing with tensors that differ from the ones passed to setup is an error.
pub struct Runner {
    op: Arc<dyn Operation>,
    plan: Plan,
    pool: Arc<BlockPool>,
    owns_pool: bool,
    setup: Option<SetupState>,
    last_trace: Option<AllocTrace>,
}

#[derive(Debug, Clone)]
struct SetupState {
    inputs: Vec<TensorDesc>,
    outputs: Vec<TensorDesc>,
    host_data: Vec<Option<HostData>>,
    mem_usage: MemoryUsage,
}

/// A lowered operation, nested operation nodes become nested plans.
#[derive(Debug)]
struct Plan {
    name: String,
    debug_id: String,
    kind: PlanKind,
}

#[derive(Debug)]
enum PlanKind {
    Kernel(KernelPlan),
    Graph(GraphPlan),
}

#[derive(Debug)]
struct KernelPlan {
    param: OpParam,
    selection: Option<Selection>,
}

#[derive(Debug)]
struct GraphPlan {
    graph: KernelGraph,
    lifetimes: Vec<Option<Lifetime>>,
    children: Vec<Plan>,
    /// Descriptors each node sees, after reshapes. Filled by setup.
    node_io: Vec<NodeIo>,
    /// Byte size of every internal slot. Filled by setup.
    internal_bytes: Vec<usize>,
}

#[derive(Debug, Clone)]
struct NodeIo {
    inputs: Vec<TensorDesc>,
    outputs: Vec<TensorDesc>,
}

/// Mutable state threaded through a single execution.
struct ExecState {
    /// Number of kernels dispatched so far, the clock of the allocation trace.
    dispatches: usize,
    trace: Option<AllocTrace>,
    timings: Option<Vec<KernelTiming>>,
}

impl Context {
    pub fn new(device: Device, registry: Arc<KernelRegistry>, config: EvalConfig) -> Self {
        let stream = Arc::new(Stream::new(device.clone()));
        let tiling_cache = config.cache_tilings.then(|| Arc::new(TilingCache::new()));

        Context {
            device,
            stream,
            registry,
            config,
            shared_pool: None,
            tiling_cache,
        }
    }

    pub fn with_shared_pool(mut self, pool: Arc<BlockPool>) -> Self {
        self.shared_pool = Some(pool);
        self
    }

    pub fn generation(&self) -> SocGeneration {
        self.device.generation()
    }

    pub fn tiling_context(&self) -> TilingContext {
        TilingContext {
            generation: self.device.generation(),
            core_count: self.device.core_count(),
        }
    }

    fn select(&self, param: &LaunchParam) -> EvalResult<Selection> {
        let ctx = self.tiling_context();
        match &self.tiling_cache {
            Some(cache) => cache.select(&self.registry, param, &ctx),
            None => self.registry.select(param, &ctx),
        }
    }
}

impl Runner {
    /// Lower `op` for the device generation of `ctx`, recursively lowering nested operations.
    ///
    /// Fails if the operation does not support this generation or if a lowered graph is invalid.
    pub fn create(op: Arc<dyn Operation>, ctx: &Context) -> EvalResult<Runner> {
        let plan = Plan::build(op.as_ref(), "", ctx)?;

        let (pool, owns_pool) = match &ctx.shared_pool {
            Some(pool) => (pool.clone(), false),
            None => {
                let capacity = if plan.has_internals() { ctx.config.pool_bytes } else { 0 };
                (Arc::new(BlockPool::new(&ctx.device, capacity)?), true)
            }
        };

        tracing::debug!(op = op.name(), generation = ?ctx.generation(), shared_pool = !owns_pool, "created runner");

        Ok(Runner {
            op,
            plan,
            pool,
            owns_pool,
            setup: None,
            last_trace: None,
        })
    }

    pub fn operation(&self) -> &Arc<dyn Operation> {
        &self.op
    }

    pub fn pool(&self) -> &Arc<BlockPool> {
        &self.pool
    }

    pub fn mem_usage(&self) -> Option<MemoryUsage> {
        self.setup.as_ref().map(|s| s.mem_usage)
    }

    /// The allocation trace of the last checked execution.
    pub fn last_trace(&self) -> Option<&AllocTrace> {
        self.last_trace.as_ref()
    }

    /// Names of the selected kernel variants in dispatch order, empty before setup.
    pub fn selected_variants(&self) -> Vec<&'static str> {
        let mut result = vec![];
        self.plan.collect_variants(&mut result);
        result
    }

    /// Prepare for executions with the tensors of `pack`, only their descriptors and host data are used.
    ///
    /// Returns the number of workspace bytes [Runner::execute] needs.
    /// Every shape error is reported here, before anything is allocated.
    pub fn setup(&mut self, pack: &VariantPack, ctx: &Context) -> EvalResult<usize> {
        let name = self.op.name().to_owned();

        let mismatch = |tensor, reason: String| EvalError::PackMismatch {
            op: name.clone(),
            tensor,
            reason,
        };
        if pack.inputs.len() != self.op.input_num() {
            let reason = format!("expected {} inputs, got {}", self.op.input_num(), pack.inputs.len());
            return Err(mismatch(TensorRef::Count, reason));
        }
        if pack.outputs.len() != self.op.output_num() {
            let reason = format!("expected {} outputs, got {}", self.op.output_num(), pack.outputs.len());
            return Err(mismatch(TensorRef::Count, reason));
        }

        let inputs = pack.input_descs();
        let outputs = pack.output_descs();
        let expected = self.op.infer_shape(&inputs)?;
        for (i, (expected, actual)) in zip_eq(&expected, &outputs).enumerate() {
            if expected != actual {
                let reason = format!("expected {}, got {}", expected, actual);
                return Err(mismatch(TensorRef::Output(i), reason));
            }
        }

        let host_data = pack.inputs.iter().map(|t| t.host_data().cloned()).collect_vec();
        let mem_usage = match self.plan.setup(&inputs, &outputs, &host_data, ctx) {
            Ok(mem_usage) => mem_usage,
            Err(e) => {
                // the plan may already hold selections for the new descriptors
                self.setup = None;
                return Err(e);
            }
        };

        // different shapes get a fresh arena layout
        if let Some(prev) = &self.setup {
            if self.owns_pool && (prev.inputs != inputs || prev.outputs != outputs) {
                self.pool.reset()?;
            }
        }

        tracing::debug!(op = %name, ?mem_usage, "runner set up");

        self.setup = Some(SetupState {
            inputs,
            outputs,
            host_data,
            mem_usage,
        });
        Ok(mem_usage.workspace_bytes)
    }

    /// Enqueue the kernels of this operation on the stream of `ctx`, does not synchronize.
    ///
    /// Intermediate blocks are released before returning, also when a node fails.
    pub fn execute(
        &mut self,
        pack: &VariantPack,
        workspace: Option<&DevicePtr>,
        workspace_size: usize,
        ctx: &Context,
    ) -> EvalResult<()> {
        self.execute_impl(pack, workspace, workspace_size, ctx, false).map(|_| ())
    }

    /// Like [Runner::execute], but synchronizes after every kernel and reports the time each kernel took.
    pub fn execute_profiled(
        &mut self,
        pack: &VariantPack,
        workspace: Option<&DevicePtr>,
        workspace_size: usize,
        ctx: &Context,
    ) -> EvalResult<Vec<KernelTiming>> {
        self.execute_impl(pack, workspace, workspace_size, ctx, true)
    }

    fn execute_impl(
        &mut self,
        pack: &VariantPack,
        workspace: Option<&DevicePtr>,
        workspace_size: usize,
        ctx: &Context,
        profile: bool,
    ) -> EvalResult<Vec<KernelTiming>> {
        let name = self.op.name().to_owned();
        let not_set_up = || EvalError::NotSetUp { op: name.clone() };

        let setup = self.setup.as_ref().ok_or_else(not_set_up)?;
        let host_data = pack.inputs.iter().map(|t| t.host_data().cloned()).collect_vec();
        if pack.input_descs() != setup.inputs || pack.output_descs() != setup.outputs || host_data != setup.host_data {
            return Err(not_set_up());
        }

        let required = setup.mem_usage.workspace_bytes;
        if required > 0 {
            match workspace {
                Some(ptr) if workspace_size >= required => ptr.check_in_bounds(workspace_size)?,
                _ => {
                    return Err(EvalError::WorkspaceTooSmall {
                        op: name,
                        required,
                        actual: if workspace.is_some() { workspace_size } else { 0 },
                    })
                }
            }
        }

        let refs = (0..pack.inputs.len()).map(TensorRef::Input).chain((0..pack.outputs.len()).map(TensorRef::Output));
        for (tensor, r) in pack.inputs.iter().chain(&pack.outputs).zip(refs) {
            if tensor.ptr().is_none() {
                return Err(EvalError::UnboundTensor { op: name, tensor: r });
            }
        }

        let mut state = ExecState {
            dispatches: 0,
            trace: ctx.config.check_allocations.then(AllocTrace::new),
            timings: profile.then(Vec::new),
        };
        self.plan
            .execute(&pack.inputs, &pack.outputs, workspace, ctx, &self.pool, &mut state)?;

        if let Some(trace) = state.trace {
            let result = trace.check();
            self.last_trace = Some(trace);
            if let Err(reason) = result {
                tracing::error!(op = %name, %reason, "allocation check failed");
                return Err(EvalError::AllocationOverlap { reason });
            }
        }

        tracing::trace!(op = %name, dispatches = state.dispatches, "enqueued execution");
        Ok(state.timings.unwrap_or_default())
    }
}

impl Plan {
    fn build(op: &dyn Operation, debug_id: &str, ctx: &Context) -> EvalResult<Plan> {
        let name = op.name().to_owned();

        let kind = match op.lower(&LowerContext::new(ctx.generation()))? {
            Lowering::Kernel(param) => PlanKind::Kernel(KernelPlan::new(param)),
            Lowering::Graph(graph) => {
                graph.validate()?;

                let children = graph
                    .nodes()
                    .iter()
                    .enumerate()
                    .map(|(ni, node)| match &node.op {
                        NodeOp::Kernel(param) => Ok(Plan {
                            name: param.name().to_owned(),
                            debug_id: node.debug_id.clone(),
                            kind: PlanKind::Kernel(KernelPlan::new(param.clone())),
                        }),
                        NodeOp::Operation(inner) => Plan::build(inner.as_ref(), &node.debug_id, ctx)
                            .map_err(|e| e.in_node(&name, ni, &node.debug_id)),
                    })
                    .collect::<EvalResult<Vec<_>>>()?;

                PlanKind::Graph(GraphPlan {
                    lifetimes: graph.lifetimes(),
                    graph,
                    children,
                    node_io: vec![],
                    internal_bytes: vec![],
                })
            }
        };

        Ok(Plan {
            name,
            debug_id: debug_id.to_owned(),
            kind,
        })
    }

    fn has_internals(&self) -> bool {
        match &self.kind {
            PlanKind::Kernel(_) => false,
            PlanKind::Graph(plan) => {
                plan.graph.internal_count() > 0 || plan.children.iter().any(|c| c.has_internals())
            }
        }
    }

    fn collect_variants(&self, result: &mut Vec<&'static str>) {
        match &self.kind {
            PlanKind::Kernel(plan) => result.extend(plan.selection.as_ref().map(|s| s.binary.name)),
            PlanKind::Graph(plan) => plan.children.iter().for_each(|c| c.collect_variants(result)),
        }
    }

    /// Select kernels for the given tensors.
    fn setup(
        &mut self,
        inputs: &[TensorDesc],
        outputs: &[TensorDesc],
        host_data: &[Option<HostData>],
        ctx: &Context,
    ) -> EvalResult<MemoryUsage> {
        match &mut self.kind {
            PlanKind::Kernel(plan) => plan.setup(&self.name, inputs, outputs, host_data, ctx),
            PlanKind::Graph(plan) => plan.setup(&self.name, inputs, outputs, host_data, ctx),
        }
    }

    fn execute(
        &self,
        inputs: &[DeviceTensor],
        outputs: &[DeviceTensor],
        workspace: Option<&DevicePtr>,
        ctx: &Context,
        pool: &BlockPool,
        state: &mut ExecState,
    ) -> EvalResult<()> {
        match &self.kind {
            PlanKind::Kernel(plan) => plan.launch(self, inputs, outputs, workspace, ctx, state),
            PlanKind::Graph(plan) => {
                let mut live: Vec<Option<(BlockId, DeviceTensor)>> = vec![None; plan.graph.internal_count()];
                let result = plan.execute(&self.name, inputs, outputs, workspace, ctx, pool, state, &mut live);

                if result.is_err() {
                    for block in live.iter_mut().filter_map(Option::take) {
                        release(pool, block.0, state);
                    }
                }
                result
            }
        }
    }
}

impl KernelPlan {
    fn new(param: OpParam) -> Self {
        KernelPlan { param, selection: None }
    }

    fn setup(
        &mut self,
        name: &str,
        inputs: &[TensorDesc],
        outputs: &[TensorDesc],
        host_data: &[Option<HostData>],
        ctx: &Context,
    ) -> EvalResult<MemoryUsage> {
        let mut launch = LaunchParam::new(self.param.clone(), inputs.to_vec(), outputs.to_vec());
        for &input in self.param.host_data_inputs() {
            let data = host_data[input].clone().ok_or_else(|| EvalError::MissingHostData {
                op: name.to_owned(),
                input,
            })?;
            launch = launch.with_host_data(input, data);
        }

        let selection = ctx.select(&launch)?;
        let workspace_bytes = selection.tiling.workspace_bytes;
        self.selection = Some(selection);

        Ok(MemoryUsage {
            workspace_bytes,
            hypo_peak_bytes: 0,
            hypo_total_bytes: 0,
        })
    }

    fn launch(
        &self,
        owner: &Plan,
        inputs: &[DeviceTensor],
        outputs: &[DeviceTensor],
        workspace: Option<&DevicePtr>,
        ctx: &Context,
        state: &mut ExecState,
    ) -> EvalResult<()> {
        let name = &owner.name;
        let selection = self.selection.as_ref().ok_or_else(|| EvalError::NotSetUp { op: name.clone() })?;

        let operand = |tensor: &DeviceTensor, r: TensorRef| -> EvalResult<KernelOperand> {
            let ptr = tensor.ptr().ok_or_else(|| EvalError::UnboundTensor {
                op: name.clone(),
                tensor: r,
            })?;
            Ok(KernelOperand {
                ptr: ptr.clone(),
                len_bytes: tensor.size_bytes()?,
            })
        };

        let required = selection.tiling.workspace_bytes;
        let workspace = match (required, workspace) {
            (0, _) => None,
            (_, Some(ptr)) => Some(KernelOperand {
                ptr: ptr.clone(),
                len_bytes: required,
            }),
            (_, None) => {
                return Err(EvalError::WorkspaceTooSmall {
                    op: name.clone(),
                    required,
                    actual: 0,
                })
            }
        };

        let args = LaunchArgs {
            block_dim: selection.tiling.block_dim,
            tiling: selection.tiling.data.clone(),
            inputs: inputs
                .iter()
                .enumerate()
                .map(|(i, t)| operand(t, TensorRef::Input(i)))
                .collect::<EvalResult<_>>()?,
            outputs: outputs
                .iter()
                .enumerate()
                .map(|(i, t)| operand(t, TensorRef::Output(i)))
                .collect::<EvalResult<_>>()?,
            workspace,
        };

        let start = Instant::now();
        ctx.stream.launch(&selection.binary, args)?;
        state.dispatches += 1;

        if let Some(timings) = &mut state.timings {
            ctx.stream.synchronize()?;
            timings.push(KernelTiming {
                kind: self.param.kind(),
                variant: selection.binary.name,
                debug_id: if owner.debug_id.is_empty() { name.clone() } else { owner.debug_id.clone() },
                seconds: start.elapsed().as_secs_f32(),
            });
        }

        Ok(())
    }
}

impl GraphPlan {
    fn setup(
        &mut self,
        name: &str,
        inputs: &[TensorDesc],
        outputs: &[TensorDesc],
        host_data: &[Option<HostData>],
        ctx: &Context,
    ) -> EvalResult<MemoryUsage> {
        let graph = &self.graph;
        let shapes = graph.infer_shapes(inputs)?;

        for (i, output) in outputs.iter().enumerate() {
            let produced = shapes.get(graph.output(i));
            if !produced.is_view_of(output) {
                return Err(EvalError::PackMismatch {
                    op: name.to_owned(),
                    tensor: TensorRef::Output(i),
                    reason: format!("graph produces {}, which is not a view of {}", produced, output),
                });
            }
        }

        self.internal_bytes = (0..graph.internal_count())
            .map(|k| match shapes.try_get(graph.internal(k)) {
                Some(desc) => desc.size_bytes(),
                None => Ok(0),
            })
            .collect::<Result<_, _>>()?;

        self.node_io.clear();
        let mut workspace_bytes = 0;
        let mut hypo_total_bytes = self.internal_bytes.iter().fold(0usize, |acc, &b| acc.saturating_add(b));
        let mut child_peaks = vec![];

        for (ni, (node, child)) in zip_eq(graph.nodes(), &mut self.children).enumerate() {
            let io = NodeIo {
                inputs: graph.node_input_descs(ni, &shapes)?,
                outputs: node.outputs.iter().map(|&slot| shapes.get(slot).clone()).collect(),
            };
            let node_host_data = node
                .inputs
                .iter()
                .map(|&slot| match graph.slot_kind(slot) {
                    Some(SlotKind::Input(i)) => host_data[i].clone(),
                    _ => None,
                })
                .collect_vec();

            let usage = child
                .setup(&io.inputs, &io.outputs, &node_host_data, ctx)
                .map_err(|e| e.in_node(name, ni, &node.debug_id))?;

            workspace_bytes = workspace_bytes.max(usage.workspace_bytes);
            hypo_total_bytes = hypo_total_bytes.saturating_add(usage.hypo_total_bytes);
            child_peaks.push(usage.hypo_peak_bytes);
            self.node_io.push(io);
        }

        // nested intermediates are live together with everything live around their node
        let hypo_peak_bytes = child_peaks
            .iter()
            .enumerate()
            .map(|(ni, &child_peak)| {
                zip_eq(&self.lifetimes, &self.internal_bytes)
                    .filter(|(life, _)| life.map_or(false, |l| l.first_write <= ni && ni <= l.last_use))
                    .fold(child_peak, |acc, (_, &bytes)| acc.saturating_add(bytes))
            })
            .max()
            .unwrap_or(0);

        Ok(MemoryUsage {
            workspace_bytes,
            hypo_peak_bytes,
            hypo_total_bytes,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        name: &str,
        inputs: &[DeviceTensor],
        outputs: &[DeviceTensor],
        workspace: Option<&DevicePtr>,
        ctx: &Context,
        pool: &BlockPool,
        state: &mut ExecState,
        live: &mut [Option<(BlockId, DeviceTensor)>],
    ) -> EvalResult<()> {
        let graph = &self.graph;
        if self.node_io.len() != graph.nodes().len() {
            return Err(EvalError::NotSetUp { op: name.to_owned() });
        }

        for (ni, (node, child)) in zip_eq(graph.nodes(), &self.children).enumerate() {
            let io = &self.node_io[ni];

            let result = (|| -> EvalResult<()> {
                // bind intermediates produced by this node
                for (&slot, desc) in zip_eq(&node.outputs, &io.outputs) {
                    let Some(SlotKind::Internal(k)) = graph.slot_kind(slot) else { continue };
                    if self.lifetimes[k].map(|l| l.first_write) != Some(ni) {
                        continue;
                    }

                    let size = self.internal_bytes[k];
                    let block = pool.malloc(size)?;
                    let Some(ptr) = pool.block_ptr(block) else {
                        pool.free(block)?;
                        return Err(EvalError::InvalidFree { block });
                    };
                    if let Some(trace) = &mut state.trace {
                        trace.on_malloc(block, ptr.addr(), size, state.dispatches, &node.debug_id);
                    }
                    live[k] = Some((block, DeviceTensor::bind(desc.clone(), ptr)?));
                }

                let tensor = |slot: SlotId, desc: &TensorDesc| -> EvalResult<DeviceTensor> {
                    let base = match graph.slot_kind(slot) {
                        Some(SlotKind::Input(i)) => Some(&inputs[i]),
                        Some(SlotKind::Output(i)) => Some(&outputs[i]),
                        Some(SlotKind::Internal(k)) => live[k].as_ref().map(|(_, tensor)| tensor),
                        None => None,
                    };
                    let base = base.ok_or_else(|| EvalError::NotSetUp { op: name.to_owned() })?;
                    Ok(base.view(desc.clone()))
                };

                let node_inputs = zip_eq(&node.inputs, &io.inputs)
                    .map(|(&slot, desc)| tensor(slot, desc))
                    .collect::<EvalResult<Vec<_>>>()?;
                let node_outputs = zip_eq(&node.outputs, &io.outputs)
                    .map(|(&slot, desc)| tensor(slot, desc))
                    .collect::<EvalResult<Vec<_>>>()?;

                child.execute(&node_inputs, &node_outputs, workspace, ctx, pool, state)
            })();
            result.map_err(|e| e.in_node(name, ni, &node.debug_id))?;

            // release intermediates whose last reader was this node
            for (k, lifetime) in self.lifetimes.iter().enumerate() {
                if lifetime.map(|l| l.last_use) == Some(ni) {
                    if let Some((block, _)) = live[k].take() {
                        release(pool, block, state);
                    }
                }
            }
        }

        Ok(())
    }
}

fn release(pool: &BlockPool, block: BlockId, state: &mut ExecState) {
    if let Err(e) = pool.free(block) {
        tracing::error!(error = %e, "failed to release intermediate block");
    }
    if let Some(trace) = &mut state.trace {
        trace.on_free(block, state.dispatches.saturating_sub(1));
    }
}

impl Debug for Runner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Runner {{")?;
        writeln!(f, "    op: {:?},", self.op)?;
        writeln!(f, "    pool: {} bytes, owned: {},", self.pool.capacity(), self.owns_pool)?;
        writeln!(f, "    mem_usage: {:?},", self.mem_usage())?;
        writeln!(f, "    kernels: {:?},", debug_vec_multiline("    ", &self.selected_variants()))?;
        writeln!(f, "}}")?;
        Ok(())
    }
}
