use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

use itertools::{zip_eq, Itertools};
use ndarray::ArrayD;

use npu_graph::operation::Operation;
use npu_graph::param::OpKind;
use npu_graph::shape::TensorDesc;
use npu_sys::mem::DevicePtr;

use crate::error::{EvalError, EvalResult, TensorRef};
use crate::host::{array_to_bytes, bytes_to_array};
use crate::runner::{Context, MemoryUsage, Runner};
use crate::tensor::{DeviceTensor, HostData, VariantPack};
use crate::util::debug_vec_multiline;

/// Runs a single operation on host arrays: owns the device tensors, the workspace and the runner.
pub struct OperationExecutor {
    ctx: Context,
    runner: Runner,

    pub device_inputs: Vec<DeviceTensor>,
    pub device_outputs: Vec<DeviceTensor>,

    workspace: Option<DevicePtr>,
    workspace_bytes: usize,

    profile: bool,
    last_profile: Option<Profile>,
}

#[derive(Default, Debug, Clone)]
pub struct Profile {
    pub kernels: Vec<String>,

    pub elewise: f32,
    pub mat_mul: f32,
    pub norm: f32,
    pub activation: f32,
    pub softmax: f32,
    pub split: f32,

    pub total_cpu: f32,
}

impl OperationExecutor {
    /// Create the runner, allocate device inputs and outputs and set up for `input_descs`.
    pub fn new(ctx: Context, op: Arc<dyn Operation>, input_descs: &[TensorDesc]) -> EvalResult<Self> {
        let host_data = vec![None; input_descs.len()];
        Self::with_host_data(ctx, op, input_descs, host_data)
    }

    /// Same as [Self::new], attaching host data to some inputs before the first setup.
    pub fn with_host_data(
        ctx: Context,
        op: Arc<dyn Operation>,
        input_descs: &[TensorDesc],
        host_data: Vec<Option<HostData>>,
    ) -> EvalResult<Self> {
        let output_descs = op.infer_shape(input_descs)?;
        let runner = Runner::create(op, &ctx)?;

        let alloc_all = |descs: &[TensorDesc]| {
            descs
                .iter()
                .map(|desc| DeviceTensor::alloc(&ctx.device, desc.clone()))
                .collect::<EvalResult<Vec<_>>>()
        };
        let device_inputs = zip_eq(alloc_all(input_descs)?, host_data)
            .map(|(tensor, host)| match host {
                Some(host) => tensor.with_host_data(host),
                None => tensor,
            })
            .collect();
        let device_outputs = alloc_all(&output_descs)?;

        let mut executor = OperationExecutor {
            ctx,
            runner,
            device_inputs,
            device_outputs,
            workspace: None,
            workspace_bytes: 0,
            profile: false,
            last_profile: None,
        };
        executor.setup()?;
        Ok(executor)
    }

    /// Attach host data to an input, which redoes the setup since tiling may depend on it.
    ///
    /// The previous host data is kept if the new setup fails.
    pub fn set_host_data(&mut self, input: usize, host_data: HostData) -> EvalResult<()> {
        let Some(tensor) = self.device_inputs.get(input) else {
            return Err(EvalError::PackMismatch {
                op: self.runner.operation().name().to_owned(),
                tensor: TensorRef::Input(input),
                reason: format!("operation has {} inputs", self.device_inputs.len()),
            });
        };

        let updated = tensor.clone().with_host_data(host_data);
        let previous = std::mem::replace(&mut self.device_inputs[input], updated);
        if let Err(e) = self.setup() {
            self.device_inputs[input] = previous;
            // bring the runner back to the descriptors it had before
            self.setup()?;
            return Err(e);
        }
        Ok(())
    }

    fn setup(&mut self) -> EvalResult<()> {
        let pack = self.pack();
        let workspace_bytes = self.runner.setup(&pack, &self.ctx)?;

        if workspace_bytes > self.workspace_bytes || (workspace_bytes > 0 && self.workspace.is_none()) {
            self.workspace = Some(self.ctx.device.reserve(workspace_bytes)?);
            self.workspace_bytes = workspace_bytes;
        }
        Ok(())
    }

    fn pack(&self) -> VariantPack {
        VariantPack::new(self.device_inputs.clone(), self.device_outputs.clone())
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn mem_usage(&self) -> MemoryUsage {
        self.runner.mem_usage().unwrap_or_default()
    }

    /// Copy `inputs` to the device, run the operation, wait for it and copy the outputs back.
    pub fn evaluate(&mut self, inputs: &[ArrayD<f32>]) -> EvalResult<Vec<ArrayD<f32>>> {
        let op = self.runner.operation().name().to_owned();
        if inputs.len() != self.device_inputs.len() {
            return Err(EvalError::PackMismatch {
                op,
                tensor: TensorRef::Count,
                reason: format!("expected {} inputs, got {}", self.device_inputs.len(), inputs.len()),
            });
        }
        for (i, (input, tensor)) in zip_eq(inputs, &self.device_inputs).enumerate() {
            if input.shape() != tensor.desc().shape.dims() {
                return Err(EvalError::PackMismatch {
                    op,
                    tensor: TensorRef::Input(i),
                    reason: format!("host array has shape {:?}, expected {}", input.shape(), tensor.desc().shape),
                });
            }
        }

        // make sure nothing else is using the buffers
        self.ctx.stream.synchronize()?;

        for (input, tensor) in zip_eq(inputs, &self.device_inputs) {
            tensor.copy_from_host(&array_to_bytes(tensor.desc().dtype, input))?;
        }

        let pack = self.pack();
        let workspace = self.workspace.as_ref();
        let start = Instant::now();

        if self.profile {
            let timings = self
                .runner
                .execute_profiled(&pack, workspace, self.workspace_bytes, &self.ctx)?;
            self.ctx.stream.synchronize()?;

            let mut profile = Profile::default();
            for (i, timing) in timings.iter().enumerate() {
                *match timing.kind {
                    OpKind::Elewise => &mut profile.elewise,
                    OpKind::MatMul => &mut profile.mat_mul,
                    OpKind::Norm => &mut profile.norm,
                    OpKind::Activation => &mut profile.activation,
                    OpKind::Softmax => &mut profile.softmax,
                    OpKind::Split => &mut profile.split,
                } += timing.seconds;

                profile.kernels.push(format!(
                    "{: >4} time {:>10.4} ms, {} ({})",
                    i,
                    timing.seconds * 1e3,
                    timing.variant,
                    timing.debug_id
                ));
            }
            profile.total_cpu = start.elapsed().as_secs_f32();
            self.last_profile = Some(profile);
        } else {
            self.runner.execute(&pack, workspace, self.workspace_bytes, &self.ctx)?;
            self.ctx.stream.synchronize()?;
            self.last_profile = None;
        }

        self.device_outputs
            .iter()
            .map(|tensor| Ok(bytes_to_array(tensor.desc(), &tensor.read_to_host()?)))
            .collect()
    }

    pub fn set_profile(&mut self, profile: bool) {
        self.profile = profile;
    }

    pub fn last_profile(&self) -> Option<&Profile> {
        self.last_profile.as_ref()
    }
}

impl Debug for OperationExecutor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "OperationExecutor {{")?;

        writeln!(f, "    op: {},", self.runner.operation().name())?;
        writeln!(f, "    generation: {:?},", self.ctx.generation())?;
        writeln!(f, "    mem_usage: {:?},", self.mem_usage())?;
        writeln!(f, "    workspace_bytes: {},", self.workspace_bytes)?;
        writeln!(f, "    profile: {},", self.profile)?;

        writeln!(f, "    inputs: {:?},", debug_vec_multiline("    ", &self.device_inputs))?;
        writeln!(f, "    outputs: {:?},", debug_vec_multiline("    ", &self.device_outputs))?;
        writeln!(f, "    kernels: {:?},", debug_vec_multiline("    ", &self.runner.selected_variants()))?;

        writeln!(f, "}}")?;

        Ok(())
    }
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Profile {{\n  kernels: [\n")?;
        for kernel in &self.kernels {
            writeln!(f, "    {}", kernel)?;
        }
        write!(f, "  ]\n\n")?;

        let parts = [
            ("Elewise:    ", self.elewise),
            ("Matmul:     ", self.mat_mul),
            ("Norm:       ", self.norm),
            ("Activation: ", self.activation),
            ("Softmax:    ", self.softmax),
            ("Split:      ", self.split),
        ];
        let total: f32 = parts.iter().map(|&(_, t)| t).sum();
        for (name, time) in parts {
            writeln!(f, "  {} {:>10.4} ms  {:>4.2}", name, time * 1e3, time / total)?;
        }

        writeln!(f, "  ==============================")?;
        writeln!(f, "  Total kernels: {:>10.4} ms", total * 1e3)?;
        writeln!(f, "  Total CPU:     {:>10.4} ms", self.total_cpu * 1e3)?;
        writeln!(f, "}}")?;

        Ok(())
    }
}

impl Profile {
    /// One line per kernel kind that ran, for logging.
    pub fn summary(&self) -> String {
        [
            ("elewise", self.elewise),
            ("mat_mul", self.mat_mul),
            ("norm", self.norm),
            ("activation", self.activation),
            ("softmax", self.softmax),
            ("split", self.split),
        ]
        .iter()
        .filter(|(_, t)| *t > 0.0)
        .map(|(name, t)| format!("{}={:.3}ms", name, t * 1e3))
        .join(" ")
    }
}
