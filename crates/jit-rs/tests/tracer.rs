use jit_rs::ir::{kinds, Symbol};
use jit_rs::tensor::Tensor;
use jit_rs::tracer::{self, BackwardCapture, TraceError, TraceInput, TracingState, Variable};
use std::sync::{Arc, Mutex};

fn variable(values: &[f32]) -> Variable {
    let tensor = Tensor::from_slice(&[values.len() as i64], values).expect("tensor");
    Variable::new(tensor, false)
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Elementwise add on host data, recorded as `aten::add` while tracing.
fn add(lhs: &Variable, rhs: &Variable) -> Variable {
    let outputs = tracer::record_op(
        Symbol::aten("add"),
        &[lhs.clone(), rhs.clone()],
        |_| {},
        |inputs| {
            let a = inputs[0].data().expect("defined").to_f64_vec();
            let b = inputs[1].data().expect("defined").to_f64_vec();
            let sum: Vec<f32> = a.iter().zip(&b).map(|(x, y)| (x + y) as f32).collect();
            Ok(vec![variable(&sum)])
        },
    )
    .expect("add");
    outputs.into_iter().next().expect("one output")
}

#[test]
fn traced_add_round_trips_to_a_graph() {
    init_logging();
    let x = variable(&[1.0, 2.0]);
    let (state, inputs) = tracer::enter(vec![TraceInput::Variable(x)], 1).expect("enter");
    let y = add(&inputs[0], &inputs[0]);
    assert!(tracer::is_tracing(&[y.clone()]));
    tracer::exit(&[y.clone()]).expect("exit");

    assert!(!state.is_active());
    assert!(state.is_complete());
    assert_eq!(y.data().expect("defined").to_f64_vec(), vec![2.0, 4.0]);
    state.with_graph(|graph| {
        graph.lint().expect("lint");
        assert_eq!(graph.inputs().len(), 1);
        assert_eq!(graph.outputs().len(), 1);
        let nodes = graph.node_ids();
        assert_eq!(nodes.len(), 1);
        let node = graph.node(nodes[0]);
        assert_eq!(node.kind(), &Symbol::aten("add"));
        let x = graph.inputs()[0];
        assert_eq!(node.inputs(), &[x, x]);
        assert_eq!(graph.outputs(), node.outputs());
    });
}

#[test]
fn untraced_values_become_constants() {
    let x = variable(&[1.0]);
    let c = variable(&[5.0]);
    let (state, inputs) = tracer::enter(vec![TraceInput::Variable(x)], 1).expect("enter");
    let y = add(&inputs[0], &c);
    tracer::exit(&[y]).expect("exit");

    state.with_graph(|graph| {
        let kinds: Vec<_> = graph
            .nodes()
            .map(|n| graph.node(n).kind().clone())
            .collect();
        assert_eq!(kinds, vec![kinds::CONSTANT, Symbol::aten("add")]);
    });
}

#[test]
fn output_without_dependence_is_an_error() {
    let x = variable(&[1.0]);
    let (state, _inputs) = tracer::enter(vec![TraceInput::Variable(x)], 1).expect("enter");
    let unrelated = variable(&[3.0]);
    match tracer::exit_stage(&state, &[unrelated]) {
        Err(TraceError::NoObservableDependence { output }) => assert_eq!(output, 0),
        other => panic!("expected NoObservableDependence, got {other:?}"),
    }
}

#[test]
fn operations_over_two_traces_are_rejected() {
    let (_first, a) = tracer::enter(vec![TraceInput::Variable(variable(&[1.0]))], 1).expect("enter");
    let (_second, b) = tracer::enter(vec![TraceInput::Variable(variable(&[2.0]))], 1).expect("enter");
    match tracer::get_tracing_state(&[a[0].clone(), b[0].clone()]) {
        Err(TraceError::MixedTracingStates) => {}
        other => panic!("expected MixedTracingStates, got {:?}", other.map(|s| s.map(|s| s.id()))),
    }
}

#[test]
fn repeated_inputs_are_aliased() {
    let x = variable(&[1.0]);
    let (state, inputs) = tracer::enter(
        vec![TraceInput::Variable(x.clone()), TraceInput::Variable(x.clone())],
        1,
    )
    .expect("enter");

    assert!(inputs[0].same_as(&x));
    assert!(!inputs[1].same_as(&x));
    let y = add(&inputs[0], &inputs[1]);
    tracer::exit(&[y]).expect("exit");
    state.with_graph(|graph| {
        let node = graph.node(graph.node_ids()[0]);
        assert_eq!(node.inputs(), graph.inputs());
        assert_ne!(node.input(0), node.input(1));
    });
}

#[test]
fn buffers_resolve_by_storage() {
    let weight = Tensor::from_slice(&[1], &[0.5f32]).expect("tensor");
    let x = variable(&[1.0]);
    let (state, inputs) = tracer::enter(
        vec![TraceInput::Variable(x), TraceInput::Buffer(weight.clone())],
        1,
    )
    .expect("enter");
    assert_eq!(inputs.len(), 1);

    let w = Variable::new(weight.clone(), false);
    let y = add(&inputs[0], &w);
    tracer::exit(&[y]).expect("exit");

    let buffer = state.buffer_value(weight.storage_key()).expect("buffer input");
    state.with_graph(|graph| {
        assert_eq!(graph.inputs().len(), 2);
        assert_eq!(graph.inputs()[1], buffer);
        let node = graph.node(graph.node_ids()[0]);
        assert_eq!(node.input(1), buffer);
    });
}

#[test]
fn undefined_outputs_trace_to_undefined_nodes() {
    let x = variable(&[1.0]);
    let (state, inputs) = tracer::enter(vec![TraceInput::Variable(x)], 1).expect("enter");
    tracer::exit_stage(&state, &[inputs[0].clone(), Variable::undefined()]).expect("exit");

    state.with_graph(|graph| {
        let undefined = graph.outputs()[1];
        let producer = graph.producer(undefined).expect("producer");
        assert_eq!(graph.node(producer).kind(), &kinds::UNDEFINED);
    });
    let flags = state.var_flags(0).expect("stage flags");
    assert!(flags.outputs[1].was_undefined);
}

#[test]
fn undefined_inputs_are_rejected() {
    match tracer::enter(vec![TraceInput::Variable(Variable::undefined())], 1) {
        Err(TraceError::UndefinedInput { index }) => assert_eq!(index, 0),
        Err(other) => panic!("expected UndefinedInput, got {other:?}"),
        Ok(_) => panic!("expected UndefinedInput"),
    }
}

#[derive(Default)]
struct RecordingBackward {
    calls: Mutex<Vec<(usize, usize)>>,
}

impl BackwardCapture for RecordingBackward {
    fn capture(
        &self,
        state: &Arc<TracingState>,
        inputs: &[Variable],
        outputs: &[Variable],
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .expect("calls poisoned")
            .push((inputs.len(), outputs.len()));
        let grad = variable(&[1.0]);
        tracer::enter_stage(state, &[grad.clone()])?;
        let result = add(&grad, &outputs[0]);
        tracer::exit_stage(state, &[result])?;
        Ok(())
    }
}

#[test]
fn backward_hook_records_a_second_stage() {
    init_logging();
    let hook = Arc::new(RecordingBackward::default());
    let x = variable(&[1.0]);
    let (state, inputs) = tracer::enter_with_backward(
        vec![TraceInput::Variable(x)],
        2,
        Some(hook.clone() as Arc<dyn BackwardCapture>),
    )
    .expect("enter");
    let y = add(&inputs[0], &inputs[0]);
    tracer::exit(&[y]).expect("exit");

    assert_eq!(*hook.calls.lock().expect("calls poisoned"), vec![(1, 1)]);
    assert_eq!(state.stage(), 1);
    assert!(state.is_complete());
    state.with_graph(|graph| {
        graph.lint().expect("lint");
        assert_eq!(graph.inputs().len(), 2);
        assert_eq!(graph.outputs().len(), 2);
        let stages: Vec<usize> = graph.nodes().map(|n| graph.node(n).stage()).collect();
        assert_eq!(stages, vec![0, 1]);
    });
}

#[test]
fn stage_limit_is_enforced() {
    let x = variable(&[1.0]);
    let (state, inputs) = tracer::enter(vec![TraceInput::Variable(x)], 1).expect("enter");
    tracer::exit_stage(&state, &[inputs[0].clone()]).expect("exit");
    match tracer::enter_stage(&state, &[variable(&[2.0])]) {
        Err(TraceError::StageLimit { stage, num_stages }) => {
            assert_eq!((stage, num_stages), (1, 1));
        }
        other => panic!("expected StageLimit, got {other:?}"),
    }
}

#[test]
fn nested_traces_are_told_apart_by_state() {
    let x = variable(&[1.0]);
    let (outer, outer_inputs) = tracer::enter(vec![TraceInput::Variable(x)], 1).expect("enter outer");
    let (inner, inner_inputs) = tracer::enter(vec![TraceInput::Variable(outer_inputs[0].clone())], 1)
        .expect("enter inner");
    assert!(inner_inputs[0].same_as(&outer_inputs[0]));
    assert_eq!(inner_inputs[0].trace_count(), 2);

    match tracer::get_tracing_state(&inner_inputs) {
        Err(TraceError::MixedTracingStates) => {}
        other => panic!("expected MixedTracingStates, got {:?}", other.map(|s| s.map(|s| s.id()))),
    }
    match tracer::exit(&inner_inputs) {
        Err(TraceError::MixedTracingStates) => {}
        other => panic!("expected MixedTracingStates, got {other:?}"),
    }

    tracer::exit_stage(&inner, &inner_inputs).expect("exit inner");
    let active = tracer::get_tracing_state(&outer_inputs)
        .expect("single state")
        .expect("outer still active");
    assert_eq!(active.id(), outer.id());
    tracer::exit(&outer_inputs).expect("exit outer");
    assert!(!tracer::is_tracing(&outer_inputs));
}
