//! Built-in ONNX lowerings for the aten ops emitted by the symbolic builder
//! and the script front end.

use super::onnx::{require_inputs, SymbolicContext, SymbolicDef, SymbolicOutputs, SYMBOLIC_DEFS};
use crate::export::scalar_type_to_onnx;
use crate::ir::{AttributeValue, ValueId};
use crate::tensor::{ScalarType, Tensor};
use anyhow::{anyhow, bail, Result};

type Lowered = Result<Option<SymbolicOutputs>>;

macro_rules! register_symbolic {
    ($($name:ident => $kind:literal, $lower:path;)*) => {
        $(
            #[linkme::distributed_slice(SYMBOLIC_DEFS)]
            static $name: SymbolicDef = SymbolicDef {
                kind: $kind,
                lower: $lower,
            };
        )*
    };
}

register_symbolic! {
    ADD => "aten::add", add;
    SUB => "aten::sub", sub;
    MUL => "aten::mul", mul;
    DIV => "aten::div", div;
    POW => "aten::pow", pow;
    NEG => "aten::neg", neg;
    SIGMOID => "aten::sigmoid", sigmoid;
    TANH => "aten::tanh", tanh;
    MM => "aten::mm", matmul;
    MATMUL => "aten::matmul", matmul;
    TRANSPOSE => "aten::t", transpose;
    VIEW => "aten::view", view;
    EXPAND => "aten::expand", expand;
    CAT => "aten::cat", cat;
    CHUNK => "aten::chunk", chunk;
    NARROW => "aten::narrow", narrow;
    SLICE => "aten::slice", slice;
    SUM => "aten::sum", sum;
    SQUEEZE => "aten::squeeze", squeeze;
    UNSQUEEZE => "aten::unsqueeze", unsqueeze;
    INDEX_SELECT => "aten::index_select", index_select;
    CAST => "aten::_cast", cast;
    LT => "aten::lt", less;
    GT => "aten::gt", greater;
    EQ => "aten::eq", equal;
    AND => "aten::__and__", and;
    OR => "aten::__or__", or;
    NOT => "aten::__not__", not;
}

fn one(value: ValueId) -> Lowered {
    Ok(Some(vec![Some(value)]))
}

fn inputs_of(ctx: &SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Result<Vec<ValueId>> {
    require_inputs(ctx.node().kind(), inputs)
}

/// Right-hand operand: the second input, or the `other` scalar attribute.
fn rhs_operand(ctx: &mut SymbolicContext<'_>, inputs: &[ValueId]) -> Result<ValueId> {
    if let Some(&rhs) = inputs.get(1) {
        return Ok(rhs);
    }
    match ctx.node().attributes().get("other") {
        Some(AttributeValue::T(t)) => {
            let t = t.clone();
            Ok(ctx.constant(t))
        }
        Some(AttributeValue::F(v)) => {
            let v = *v;
            Ok(ctx.constant(Tensor::scalar(v, ScalarType::Float)))
        }
        _ => bail!("{} needs a second operand", ctx.node().kind()),
    }
}

/// Integer attribute written by the builder or a script keyword argument.
fn int_attr(ctx: &SymbolicContext<'_>, name: &str) -> Result<i64> {
    opt_int_attr(ctx, name)?
        .ok_or_else(|| anyhow!("{} requires the '{name}' attribute", ctx.node().kind()))
}

fn opt_int_attr(ctx: &SymbolicContext<'_>, name: &str) -> Result<Option<i64>> {
    match ctx.node().attributes().get(name) {
        None => Ok(None),
        Some(AttributeValue::I(v)) => Ok(Some(*v)),
        Some(other) => bail!(
            "{} expects '{name}' of kind i but found {}",
            ctx.node().kind(),
            other.kind()
        ),
    }
}

fn ints_attr(ctx: &SymbolicContext<'_>, name: &str) -> Result<Vec<i64>> {
    match ctx.node().attributes().get(name) {
        Some(AttributeValue::Is(v)) => Ok(v.clone()),
        Some(AttributeValue::I(v)) => Ok(vec![*v]),
        Some(other) => bail!(
            "{} expects '{name}' of kind is but found {}",
            ctx.node().kind(),
            other.kind()
        ),
        None => bail!("{} requires the '{name}' attribute", ctx.node().kind()),
    }
}

fn string_attr(ctx: &SymbolicContext<'_>, name: &str) -> Result<String> {
    match ctx.node().attributes().get(name) {
        Some(AttributeValue::S(v)) => Ok(v.clone()),
        Some(other) => bail!(
            "{} expects '{name}' of kind s but found {}",
            ctx.node().kind(),
            other.kind()
        ),
        None => bail!("{} requires the '{name}' attribute", ctx.node().kind()),
    }
}

fn alpha(ctx: &SymbolicContext<'_>) -> f64 {
    match ctx.node().attributes().get("alpha") {
        Some(AttributeValue::T(t)) => t.to_f64_vec().first().copied().unwrap_or(1.0),
        Some(AttributeValue::F(v)) => *v,
        Some(AttributeValue::I(v)) => *v as f64,
        _ => 1.0,
    }
}

fn binary(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>], op_type: &str) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let lhs = inputs[0];
    let mut rhs = rhs_operand(ctx, &inputs)?;
    let alpha = alpha(ctx);
    if alpha != 1.0 {
        let scale = ctx.constant(Tensor::scalar(alpha, ScalarType::Float));
        rhs = ctx.op1("Mul", &[rhs, scale], |_| {})?;
    }
    one(ctx.op1(op_type, &[lhs, rhs], |_| {})?)
}

fn add(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Add")
}

fn sub(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Sub")
}

fn mul(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Mul")
}

fn div(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Div")
}

fn pow(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Pow")
}

fn less(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Less")
}

fn greater(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Greater")
}

fn equal(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Equal")
}

fn and(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "And")
}

fn or(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    binary(ctx, inputs, "Or")
}

fn unary(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>], op_type: &str) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    one(ctx.op1(op_type, &inputs[..1], |_| {})?)
}

fn neg(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    unary(ctx, inputs, "Neg")
}

fn sigmoid(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    unary(ctx, inputs, "Sigmoid")
}

fn tanh(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    unary(ctx, inputs, "Tanh")
}

fn not(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    unary(ctx, inputs, "Not")
}

fn matmul(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    one(ctx.op1("MatMul", &inputs, |_| {})?)
}

fn transpose(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    one(ctx.op1("Transpose", &inputs, |n| {
        n.set_is("perm", vec![1, 0]);
    })?)
}

fn shape_constant(ctx: &mut SymbolicContext<'_>) -> Result<ValueId> {
    let sizes = ints_attr(ctx, "size")?;
    let shape = Tensor::from_slice(&[sizes.len() as i64], &sizes)?;
    Ok(ctx.constant(shape))
}

fn view(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let shape = shape_constant(ctx)?;
    one(ctx.op1("Reshape", &[inputs[0], shape], |_| {})?)
}

/// Lowered faithfully; the exporter refuses `onnx::Expand` afterwards.
fn expand(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let shape = shape_constant(ctx)?;
    one(ctx.op1("Expand", &[inputs[0], shape], |_| {})?)
}

fn cat(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let dim = int_attr(ctx, "dim")?;
    one(ctx.op1("Concat", &inputs, |n| {
        n.set_i("axis", dim);
    })?)
}

fn chunk(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let dim = int_attr(ctx, "dim")?;
    let chunks = ctx.node().outputs().len();
    let outputs = ctx.op("Split", &inputs, chunks, |n| {
        n.set_i("axis", dim);
    })?;
    Ok(Some(outputs.into_iter().map(Some).collect()))
}

fn slice_op(
    ctx: &mut SymbolicContext<'_>,
    input: ValueId,
    dim: i64,
    start: i64,
    end: i64,
) -> Lowered {
    one(ctx.op1("Slice", &[input], |n| {
        n.set_is("axes", vec![dim])
            .set_is("starts", vec![start])
            .set_is("ends", vec![end]);
    })?)
}

fn narrow(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let (dim, start, length) = (
        int_attr(ctx, "dim")?,
        int_attr(ctx, "start")?,
        int_attr(ctx, "length")?,
    );
    slice_op(ctx, inputs[0], dim, start, start + length)
}

fn slice(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    if let Some(step) = opt_int_attr(ctx, "step")?.filter(|&step| step != 1) {
        bail!("slice with step {step} has no ONNX lowering");
    }
    let (dim, start, end) = (
        int_attr(ctx, "dim")?,
        int_attr(ctx, "start")?,
        int_attr(ctx, "end")?,
    );
    slice_op(ctx, inputs[0], dim, start, end)
}

fn sum(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let axes = opt_int_attr(ctx, "dim")?;
    let keepdim = opt_int_attr(ctx, "keepdim")?.unwrap_or(0) != 0;
    one(ctx.op1("ReduceSum", &inputs, |n| {
        if let Some(axis) = axes {
            n.set_is("axes", vec![axis]);
        }
        n.set_i("keepdims", keepdim as i64);
    })?)
}

fn squeeze(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let dim = int_attr(ctx, "dim")?;
    one(ctx.op1("Squeeze", &inputs, |n| {
        n.set_is("axes", vec![dim]);
    })?)
}

fn unsqueeze(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let dim = int_attr(ctx, "dim")?;
    one(ctx.op1("Unsqueeze", &inputs, |n| {
        n.set_is("axes", vec![dim]);
    })?)
}

fn index_select(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let dim = int_attr(ctx, "dim")?;
    one(ctx.op1("Gather", &inputs, |n| {
        n.set_i("axis", dim);
    })?)
}

fn cast(ctx: &mut SymbolicContext<'_>, inputs: &[Option<ValueId>]) -> Lowered {
    let inputs = inputs_of(ctx, inputs)?;
    let name = string_attr(ctx, "dtype")?;
    let scalar_type =
        ScalarType::from_name(&name).ok_or_else(|| anyhow!("unknown cast target '{name}'"))?;
    let to = scalar_type_to_onnx(scalar_type) as i64;
    one(ctx.op1("Cast", &inputs, |n| {
        n.set_i("to", to);
    })?)
}
