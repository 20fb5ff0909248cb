use std::fmt::{Debug, Display, Formatter};
use std::ops::ControlFlow;
use std::sync::Arc;

use internal_iterator::InternalIterator;
use itertools::Itertools;
use rand::random;

use crate::error::{GraphError, GraphResult};
use crate::operation::Operation;
use crate::param::OpParam;
use crate::shape::{Shape, TensorDesc};

/// A dataflow graph of primitive kernels and nested operations over a fixed set of tensor slots.
///
/// Slots live in a fixed-size arena that is allocated once in [KernelGraph::new] and never grows,
/// nodes refer to them through [SlotId] indices. The slots are split into three disjoint kinds:
/// inputs and outputs are bound by the caller, internal slots are bound to allocator blocks
/// for the duration of one execution.
///
/// Nodes are executed in insertion order, which must be a valid topological order:
/// a slot written by node `i` may only be read by nodes `j > i`. This is checked by [KernelGraph::validate].
///
/// ```
/// # use npu_graph::graph::KernelGraph;
/// # use npu_graph::param::{ElewiseKind, OpParam};
/// let mut graph = KernelGraph::new(2, 1, 1);
/// let (a, b) = (graph.input(0), graph.input(1));
/// let t = graph.internal(0);
/// let y = graph.output(0);
///
/// graph.push(OpParam::Elewise { kind: ElewiseKind::Add }, &[a, b], &[t]);
/// graph.push(OpParam::Elewise { kind: ElewiseKind::Mul }, &[t, b], &[y]);
/// graph.validate().unwrap();
/// ```
#[derive(Clone)]
pub struct KernelGraph {
    check: u32,
    slots: Box<[SlotKind]>,
    input_count: usize,
    output_count: usize,
    nodes: Vec<Node>,
}

/// A stable reference to a tensor slot of a [KernelGraph].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SlotId {
    index: usize,
    check: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SlotKind {
    Input(usize),
    Output(usize),
    Internal(usize),
}

/// The operation a node performs.
#[derive(Clone)]
pub enum NodeOp {
    Kernel(OpParam),
    Operation(Arc<dyn Operation>),
}

/// A pure shape transform applied to a node input before dispatch.
/// It only reinterprets the logical shape, the underlying bytes are untouched.
#[derive(Clone)]
pub struct Reshape {
    name: &'static str,
    f: Arc<dyn Fn(&Shape) -> Option<Shape> + Send + Sync>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub op: NodeOp,
    pub inputs: Vec<SlotId>,
    pub outputs: Vec<SlotId>,
    pub reshapes: Vec<Option<Reshape>>,
    pub debug_id: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OperandKind {
    In,
    Out,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Operand {
    pub kind: OperandKind,
    pub slot: SlotId,
}

#[derive(Debug)]
pub struct NodeOperands<'a>(&'a Node);

/// The range of nodes during which an internal slot holds live data, inclusive on both ends.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Lifetime {
    pub first_write: usize,
    pub last_use: usize,
}

/// The result of [KernelGraph::infer_shapes]: a concrete descriptor for every slot.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GraphShapes {
    check: u32,
    descs: Vec<Option<TensorDesc>>,
}

impl KernelGraph {
    pub fn new(input_count: usize, output_count: usize, internal_count: usize) -> Self {
        let slots = (0..input_count)
            .map(SlotKind::Input)
            .chain((0..output_count).map(SlotKind::Output))
            .chain((0..internal_count).map(SlotKind::Internal))
            .collect_vec()
            .into_boxed_slice();

        KernelGraph {
            check: random(),
            slots,
            input_count,
            output_count,
            nodes: vec![],
        }
    }

    fn slot(&self, index: usize) -> SlotId {
        SlotId {
            index,
            check: self.check,
        }
    }

    pub fn input(&self, index: usize) -> SlotId {
        assert!(index < self.input_count, "Input {} out of range", index);
        self.slot(index)
    }

    pub fn output(&self, index: usize) -> SlotId {
        assert!(index < self.output_count, "Output {} out of range", index);
        self.slot(self.input_count + index)
    }

    pub fn internal(&self, index: usize) -> SlotId {
        assert!(index < self.internal_count(), "Internal {} out of range", index);
        self.slot(self.input_count + self.output_count + index)
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    pub fn internal_count(&self) -> usize {
        self.slots.len() - self.input_count - self.output_count
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        slot.check == self.check && slot.index < self.slots.len()
    }

    /// The kind of `slot`, or `None` if the slot belongs to a different graph.
    pub fn slot_kind(&self, slot: SlotId) -> Option<SlotKind> {
        self.contains(slot).then(|| self.slots[slot.index])
    }

    /// Append a node, returning it so reshapes or a debug id can be attached.
    pub fn push(&mut self, op: impl Into<NodeOp>, inputs: &[SlotId], outputs: &[SlotId]) -> &mut Node {
        let node = Node {
            op: op.into(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            reshapes: vec![None; inputs.len()],
            debug_id: String::new(),
        };
        let index = self.nodes.len();
        self.nodes.push(node);
        &mut self.nodes[index]
    }

    /// Check that all slot references resolve and that node order is a valid topological order.
    pub fn validate(&self) -> GraphResult<()> {
        let mut writer: Vec<Option<usize>> = vec![None; self.slots.len()];

        for (ni, node) in self.nodes.iter().enumerate() {
            if node.reshapes.len() != node.inputs.len() {
                return Err(GraphError::ReshapeCount {
                    node: ni,
                    actual: node.reshapes.len(),
                    inputs: node.inputs.len(),
                });
            }

            let (expected_inputs, expected_outputs) = node.op.io_count();
            if node.inputs.len() != expected_inputs {
                return Err(GraphError::WrongInputCount {
                    op: node.op.name(),
                    expected: expected_inputs,
                    actual: node.inputs.len(),
                });
            }
            if node.outputs.len() != expected_outputs {
                return Err(GraphError::WrongOutputCount {
                    op: node.op.name(),
                    expected: expected_outputs,
                    actual: node.outputs.len(),
                });
            }

            // reads are checked before writes, a node cannot consume its own output
            let result = node.operands().try_for_each(|operand| {
                let slot = operand.slot;
                if !self.contains(slot) {
                    return ControlFlow::Break(GraphError::DanglingSlot {
                        node: ni,
                        slot: slot.index,
                    });
                }

                match (operand.kind, self.slots[slot.index]) {
                    (OperandKind::In, SlotKind::Input(_)) => {}
                    (OperandKind::In, _) => {
                        if writer[slot.index].is_none() {
                            return ControlFlow::Break(GraphError::ReadBeforeWrite {
                                node: ni,
                                slot: slot.index,
                            });
                        }
                    }
                    (OperandKind::Out, SlotKind::Input(_)) => {
                        return ControlFlow::Break(GraphError::WritesInput {
                            node: ni,
                            slot: slot.index,
                        });
                    }
                    (OperandKind::Out, _) => {
                        if let Some(first) = writer[slot.index] {
                            return ControlFlow::Break(GraphError::MultipleWriters {
                                slot: slot.index,
                                first,
                                second: ni,
                            });
                        }
                    }
                }
                ControlFlow::Continue(())
            });
            if let ControlFlow::Break(e) = result {
                return Err(e);
            }

            for slot in &node.outputs {
                writer[slot.index] = Some(ni);
            }
        }

        for oi in 0..self.output_count {
            if writer[self.output(oi).index].is_none() {
                return Err(GraphError::OutputNeverWritten { output: oi });
            }
        }

        Ok(())
    }

    /// The lifetime of every internal slot, `None` for slots that are never written.
    ///
    /// Assumes the graph is valid.
    pub fn lifetimes(&self) -> Vec<Option<Lifetime>> {
        let offset = self.input_count + self.output_count;
        let mut lifetimes: Vec<Option<Lifetime>> = vec![None; self.internal_count()];

        for (ni, node) in self.nodes.iter().enumerate() {
            node.operands().for_each(|operand| {
                if operand.slot.index < offset {
                    return;
                }
                let lifetime = &mut lifetimes[operand.slot.index - offset];
                match (operand.kind, lifetime.as_mut()) {
                    (OperandKind::Out, None) => {
                        *lifetime = Some(Lifetime {
                            first_write: ni,
                            last_use: ni,
                        })
                    }
                    (_, Some(lifetime)) => lifetime.last_use = ni,
                    (OperandKind::In, None) => {}
                }
            });
        }

        lifetimes
    }

    /// Propagate concrete descriptors from the graph inputs through every node, in node order.
    pub fn infer_shapes(&self, inputs: &[TensorDesc]) -> GraphResult<GraphShapes> {
        if inputs.len() != self.input_count {
            return Err(GraphError::WrongInputCount {
                op: "KernelGraph".to_owned(),
                expected: self.input_count,
                actual: inputs.len(),
            });
        }

        let mut descs: Vec<Option<TensorDesc>> = vec![None; self.slots.len()];
        for (i, desc) in inputs.iter().enumerate() {
            descs[i] = Some(desc.clone());
        }

        for (ni, node) in self.nodes.iter().enumerate() {
            let node_inputs = node
                .inputs
                .iter()
                .zip(&node.reshapes)
                .map(|(slot, reshape)| {
                    let desc = descs[slot.index]
                        .as_ref()
                        .ok_or(GraphError::ReadBeforeWrite { node: ni, slot: slot.index })?;
                    match reshape {
                        None => Ok(desc.clone()),
                        Some(reshape) => Ok(desc.with_shape(reshape.apply(&desc.shape)?)),
                    }
                })
                .collect::<GraphResult<Vec<_>>>()?;

            let node_outputs = node.op.infer_shape(&node_inputs)?;
            if node_outputs.len() != node.outputs.len() {
                return Err(GraphError::WrongOutputCount {
                    op: node.op.name(),
                    expected: node.outputs.len(),
                    actual: node_outputs.len(),
                });
            }

            for (slot, desc) in node.outputs.iter().zip(node_outputs) {
                descs[slot.index] = Some(desc);
            }
        }

        for output in 0..self.output_count {
            if descs[self.input_count + output].is_none() {
                return Err(GraphError::OutputNeverWritten { output });
            }
        }

        Ok(GraphShapes {
            check: self.check,
            descs,
        })
    }

    /// The descriptors node `node` sees for its inputs, after reshapes.
    pub fn node_input_descs(&self, node: usize, shapes: &GraphShapes) -> GraphResult<Vec<TensorDesc>> {
        let inner = &self.nodes[node];
        inner
            .inputs
            .iter()
            .zip(&inner.reshapes)
            .map(|(&slot, reshape)| {
                let desc = shapes.try_get(slot).ok_or(GraphError::ReadBeforeWrite { node, slot: slot.index })?;
                match reshape {
                    None => Ok(desc.clone()),
                    Some(reshape) => Ok(desc.with_shape(reshape.apply(&desc.shape)?)),
                }
            })
            .collect()
    }
}

impl GraphShapes {
    /// The descriptor of `slot`, panics if the slot was never written.
    pub fn get(&self, slot: SlotId) -> &TensorDesc {
        self.try_get(slot)
            .unwrap_or_else(|| panic!("Slot {:?} has no inferred descriptor", slot))
    }

    pub fn try_get(&self, slot: SlotId) -> Option<&TensorDesc> {
        assert_eq!(slot.check, self.check, "Slot {:?} does not belong to these shapes", slot);
        self.descs[slot.index].as_ref()
    }
}

impl Node {
    pub fn reshape_input(&mut self, input: usize, reshape: Reshape) -> &mut Self {
        self.reshapes[input] = Some(reshape);
        self
    }

    pub fn debug_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.debug_id = id.into();
        self
    }

    pub fn operands(&self) -> NodeOperands {
        NodeOperands(self)
    }
}

impl<'a> InternalIterator for NodeOperands<'a> {
    type Item = Operand;

    fn try_for_each<R, F>(self, mut f: F) -> ControlFlow<R>
    where
        F: FnMut(Self::Item) -> ControlFlow<R>,
    {
        for &slot in &self.0.inputs {
            f(Operand {
                kind: OperandKind::In,
                slot,
            })?;
        }
        for &slot in &self.0.outputs {
            f(Operand {
                kind: OperandKind::Out,
                slot,
            })?;
        }
        ControlFlow::Continue(())
    }
}

impl NodeOp {
    pub fn name(&self) -> String {
        match self {
            NodeOp::Kernel(param) => param.name().to_owned(),
            NodeOp::Operation(op) => op.name().to_owned(),
        }
    }

    pub fn io_count(&self) -> (usize, usize) {
        match self {
            NodeOp::Kernel(param) => (param.input_num(), param.output_num()),
            NodeOp::Operation(op) => (op.input_num(), op.output_num()),
        }
    }

    pub fn infer_shape(&self, inputs: &[TensorDesc]) -> GraphResult<Vec<TensorDesc>> {
        match self {
            NodeOp::Kernel(param) => param.infer_shape(inputs),
            NodeOp::Operation(op) => op.infer_shape(inputs),
        }
    }
}

impl From<OpParam> for NodeOp {
    fn from(param: OpParam) -> Self {
        NodeOp::Kernel(param)
    }
}

impl From<Arc<dyn Operation>> for NodeOp {
    fn from(op: Arc<dyn Operation>) -> Self {
        NodeOp::Operation(op)
    }
}

impl Reshape {
    pub fn new(name: &'static str, f: impl Fn(&Shape) -> Option<Shape> + Send + Sync + 'static) -> Self {
        Reshape { name, f: Arc::new(f) }
    }

    /// `[d0, .., dn-2, dn-1] -> [d0 * .. * dn-2, dn-1]`, the usual collapse before a 2D matmul.
    pub fn merge_leading() -> Self {
        Reshape::new("merge_leading", |shape| shape.merge_leading(1))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Apply the transform, checking that the element count is preserved.
    pub fn apply(&self, shape: &Shape) -> GraphResult<Shape> {
        let numel = shape
            .checked_numel()
            .ok_or_else(|| GraphError::SizeOverflow { shape: shape.clone() })?;
        let new = (self.f)(shape).ok_or_else(|| GraphError::ReshapeInvalid {
            name: self.name,
            shape: shape.clone(),
        })?;
        let new = Shape::new(new.dims().to_vec())?;

        if new.checked_numel() != Some(numel) {
            return Err(GraphError::ReshapeElementCount {
                name: self.name,
                old: shape.clone(),
                new,
            });
        }
        Ok(new)
    }
}

impl Debug for SlotId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Slot({})", self.index)
    }
}

impl Debug for Reshape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reshape({})", self.name)
    }
}

impl Debug for NodeOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeOp::Kernel(param) => write!(f, "Kernel({:?})", param),
            NodeOp::Operation(op) => write!(f, "Operation({})", op.name()),
        }
    }
}

impl Debug for KernelGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for KernelGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "KernelGraph {{")?;
        writeln!(f, "  check: {},", self.check)?;
        writeln!(
            f,
            "  slots: {} inputs, {} outputs, {} internal,",
            self.input_count,
            self.output_count,
            self.internal_count()
        )?;
        writeln!(f, "  nodes: [")?;
        for (i, node) in self.nodes.iter().enumerate() {
            let reshapes = node.reshapes.iter().flatten().map(|r| r.name).join(", ");
            writeln!(
                f,
                "    Node({}) = {:?} {:?} -> {:?} {}{}",
                i,
                node.op,
                node.inputs,
                node.outputs,
                if reshapes.is_empty() { String::new() } else { format!("reshapes: [{}] ", reshapes) },
                node.debug_id,
            )?;
        }
        writeln!(f, "  ],")?;
        writeln!(f, "}}")?;
        Ok(())
    }
}
