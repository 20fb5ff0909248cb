use npu_graph::error::GraphError;
use npu_graph::graph::{KernelGraph, Lifetime, SlotKind};
use npu_graph::param::{ActivationKind, ElewiseKind, OpParam};

fn add() -> OpParam {
    OpParam::Elewise { kind: ElewiseKind::Add }
}

fn relu() -> OpParam {
    OpParam::Activation {
        kind: ActivationKind::Relu,
    }
}

#[test]
fn slot_kinds_disjoint() {
    let graph = KernelGraph::new(2, 1, 3);
    assert_eq!(graph.slot_count(), 6);
    assert_eq!(graph.slot_kind(graph.input(1)), Some(SlotKind::Input(1)));
    assert_eq!(graph.slot_kind(graph.output(0)), Some(SlotKind::Output(0)));
    assert_eq!(graph.slot_kind(graph.internal(2)), Some(SlotKind::Internal(2)));
}

#[test]
fn foreign_slot() {
    let mut graph = KernelGraph::new(1, 1, 0);
    let other = KernelGraph::new(1, 1, 0);
    assert_eq!(other.slot_kind(graph.input(0)), None);

    let y = graph.output(0);
    graph.push(relu(), &[other.input(0)], &[y]);
    assert!(matches!(graph.validate(), Err(GraphError::DanglingSlot { node: 0, .. })));
}

#[test]
fn chain_valid() {
    let mut graph = KernelGraph::new(2, 1, 2);
    let (a, b) = (graph.input(0), graph.input(1));
    let (t0, t1) = (graph.internal(0), graph.internal(1));
    let y = graph.output(0);

    graph.push(add(), &[a, b], &[t0]);
    graph.push(relu(), &[t0], &[t1]);
    graph.push(add(), &[t1, a], &[y]);

    graph.validate().unwrap();
    assert_eq!(
        graph.lifetimes(),
        vec![
            Some(Lifetime {
                first_write: 0,
                last_use: 1
            }),
            Some(Lifetime {
                first_write: 1,
                last_use: 2
            }),
        ]
    );
}

#[test]
fn read_before_write() {
    let mut graph = KernelGraph::new(1, 1, 1);
    let (x, t, y) = (graph.input(0), graph.internal(0), graph.output(0));

    graph.push(relu(), &[t], &[y]);
    graph.push(relu(), &[x], &[t]);

    assert_eq!(graph.validate(), Err(GraphError::ReadBeforeWrite { node: 0, slot: 2 }));
}

#[test]
fn node_reads_own_output() {
    let mut graph = KernelGraph::new(1, 1, 1);
    let (x, t, y) = (graph.input(0), graph.internal(0), graph.output(0));

    graph.push(add(), &[x, t], &[t]);
    graph.push(relu(), &[t], &[y]);

    assert_eq!(graph.validate(), Err(GraphError::ReadBeforeWrite { node: 0, slot: 2 }));
}

#[test]
fn writes_input() {
    let mut graph = KernelGraph::new(1, 1, 0);
    let (x, y) = (graph.input(0), graph.output(0));
    graph.push(relu(), &[x], &[x]);
    graph.push(relu(), &[x], &[y]);

    assert_eq!(graph.validate(), Err(GraphError::WritesInput { node: 0, slot: 0 }));
}

#[test]
fn multiple_writers() {
    let mut graph = KernelGraph::new(1, 1, 0);
    let (x, y) = (graph.input(0), graph.output(0));
    graph.push(relu(), &[x], &[y]);
    graph.push(relu(), &[x], &[y]);

    assert_eq!(
        graph.validate(),
        Err(GraphError::MultipleWriters {
            slot: 1,
            first: 0,
            second: 1
        })
    );
}

#[test]
fn output_never_written() {
    let mut graph = KernelGraph::new(1, 2, 0);
    let (x, y) = (graph.input(0), graph.output(0));
    graph.push(relu(), &[x], &[y]);

    assert_eq!(graph.validate(), Err(GraphError::OutputNeverWritten { output: 1 }));
}

#[test]
fn wrong_node_input_count() {
    let mut graph = KernelGraph::new(1, 1, 0);
    let (x, y) = (graph.input(0), graph.output(0));
    graph.push(add(), &[x], &[y]);

    assert!(matches!(
        graph.validate(),
        Err(GraphError::WrongInputCount {
            expected: 2,
            actual: 1,
            ..
        })
    ));
}

#[test]
fn unused_internal_has_no_lifetime() {
    let mut graph = KernelGraph::new(1, 1, 2);
    let (x, t, y) = (graph.input(0), graph.internal(1), graph.output(0));
    graph.push(relu(), &[x], &[t]);
    graph.push(relu(), &[t], &[y]);

    graph.validate().unwrap();
    assert_eq!(
        graph.lifetimes(),
        vec![
            None,
            Some(Lifetime {
                first_write: 0,
                last_use: 1
            })
        ]
    );
}

#[test]
fn display_lists_nodes() {
    let mut graph = KernelGraph::new(2, 1, 0);
    let (a, b, y) = (graph.input(0), graph.input(1), graph.output(0));
    graph.push(add(), &[a, b], &[y]).debug_id("sum");

    let text = graph.to_string();
    assert!(text.contains("2 inputs, 1 outputs, 0 internal"), "{}", text);
    assert!(text.contains("sum"), "{}", text);
}
