//! Syntax tree produced by the parser.
//!
//! Every node keeps the [`SourceRange`] it was parsed from. `Display` renders
//! expressions and statements as s-expressions, e.g. `(+ 2 (* 3 4))`.

use crate::ir::SourceRange;
use crate::tensor::ScalarType;
use std::fmt;

#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    pub range: SourceRange,
}

/// Type tag of a numeric literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralType {
    /// `i`: no decimal point.
    Int,
    /// `f`: decimal point or explicit suffix.
    Float,
    /// `LL`
    Long,
    /// `b`: `True` / `False`.
    Bool,
}

impl LiteralType {
    pub fn suffix(self) -> &'static str {
        match self {
            LiteralType::Int => "i",
            LiteralType::Float => "f",
            LiteralType::Long => "LL",
            LiteralType::Bool => "b",
        }
    }

    pub fn scalar_type(self) -> ScalarType {
        match self {
            LiteralType::Int => ScalarType::Int,
            LiteralType::Float => ScalarType::Float,
            LiteralType::Long => ScalarType::Long,
            LiteralType::Bool => ScalarType::Byte,
        }
    }

    pub fn is_integral(self) -> bool {
        !matches!(self, LiteralType::Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    MatMul,
    Pow,
    Lt,
    Gt,
    Eq,
    Ne,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::MatMul => "@",
            BinOp::Pow => "**",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }

    /// Name of the aten operator the compiler emits for this operator.
    pub fn op_name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::MatMul => "matmul",
            BinOp::Pow => "pow",
            BinOp::Lt => "lt",
            BinOp::Gt => "gt",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::Le => "le",
            BinOp::Ge => "ge",
            BinOp::And => "__and__",
            BinOp::Or => "__or__",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Const {
        value: f64,
        ty: LiteralType,
        range: SourceRange,
    },
    Var(Ident),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        range: SourceRange,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        range: SourceRange,
    },
    /// `true_expr if cond else false_expr`
    IfExpr {
        cond: Box<Expr>,
        true_expr: Box<Expr>,
        false_expr: Box<Expr>,
        range: SourceRange,
    },
    Select {
        value: Box<Expr>,
        field: Ident,
    },
    Apply {
        callee: Box<Expr>,
        inputs: Vec<Expr>,
        attributes: Vec<Attribute>,
        range: SourceRange,
    },
    Gather {
        value: Box<Expr>,
        index: Box<Expr>,
        range: SourceRange,
    },
    Slice {
        value: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        range: SourceRange,
    },
    Cast {
        ty: ScalarType,
        operand: Box<Expr>,
        range: SourceRange,
    },
    /// Only valid as a keyword attribute value.
    List {
        elements: Vec<Expr>,
        range: SourceRange,
    },
}

impl Expr {
    pub fn range(&self) -> &SourceRange {
        match self {
            Expr::Var(ident) => &ident.range,
            Expr::Select { field, .. } => &field.range,
            Expr::Const { range, .. }
            | Expr::Unary { range, .. }
            | Expr::Binary { range, .. }
            | Expr::IfExpr { range, .. }
            | Expr::Apply { range, .. }
            | Expr::Gather { range, .. }
            | Expr::Slice { range, .. }
            | Expr::Cast { range, .. }
            | Expr::List { range, .. } => range,
        }
    }
}

/// Keyword argument of a call, `name=value`.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: Ident,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignKind {
    Plain,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignKind {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignKind::Plain => "=",
            AssignKind::Add => "+=",
            AssignKind::Sub => "-=",
            AssignKind::Mul => "*=",
            AssignKind::Div => "/=",
        }
    }

    pub fn binop(self) -> Option<BinOp> {
        match self {
            AssignKind::Plain => None,
            AssignKind::Add => Some(BinOp::Add),
            AssignKind::Sub => Some(BinOp::Sub),
            AssignKind::Mul => Some(BinOp::Mul),
            AssignKind::Div => Some(BinOp::Div),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        range: SourceRange,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        range: SourceRange,
    },
    Global {
        names: Vec<Ident>,
        range: SourceRange,
    },
    Return {
        values: Vec<Expr>,
        range: SourceRange,
    },
    Assign {
        targets: Vec<Ident>,
        kind: AssignKind,
        value: Expr,
        range: SourceRange,
    },
    Expr(Expr),
}

impl Stmt {
    pub fn range(&self) -> &SourceRange {
        match self {
            Stmt::If { range, .. }
            | Stmt::While { range, .. }
            | Stmt::Global { range, .. }
            | Stmt::Return { range, .. }
            | Stmt::Assign { range, .. } => range,
            Stmt::Expr(expr) => expr.range(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: Ident,
}

#[derive(Debug, Clone)]
pub struct Def {
    pub name: Ident,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("(list")?;
    for item in items {
        write!(f, " {item}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const { value, ty, .. } => match ty {
                LiteralType::Int | LiteralType::Long | LiteralType::Bool => {
                    write!(f, "(const {} {})", *value as i64, ty.suffix())
                }
                LiteralType::Float => write!(f, "(const {value:?} f)"),
            },
            Expr::Var(ident) => write!(f, "{ident}"),
            Expr::Unary { op, operand, .. } => match op {
                UnaryOp::Neg => write!(f, "(- {operand})"),
                UnaryOp::Not => write!(f, "(not {operand})"),
            },
            Expr::Binary { op, lhs, rhs, .. } => write!(f, "({} {lhs} {rhs})", op.symbol()),
            Expr::IfExpr {
                cond,
                true_expr,
                false_expr,
                ..
            } => write!(f, "(if {cond} {true_expr} {false_expr})"),
            Expr::Select { value, field } => write!(f, "(. {value} {field})"),
            Expr::Apply {
                callee,
                inputs,
                attributes,
                ..
            } => {
                write!(f, "(apply {callee} ")?;
                write_list(f, inputs)?;
                f.write_str(" ")?;
                write_list(f, attributes)?;
                f.write_str(")")
            }
            Expr::Gather { value, index, .. } => write!(f, "(gather {value} {index})"),
            Expr::Slice {
                value, start, end, ..
            } => {
                write!(f, "(slice {value}")?;
                for bound in [start, end] {
                    match bound {
                        Some(e) => write!(f, " {e}")?,
                        None => f.write_str(" _")?,
                    }
                }
                f.write_str(")")
            }
            Expr::Cast { ty, operand, .. } => write!(f, "(cast {} {operand})", ty.name()),
            Expr::List { elements, .. } => write_list(f, elements),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(= {} {})", self.name, self.value)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                write!(f, "(if {cond} ")?;
                write_list(f, then_branch)?;
                f.write_str(" ")?;
                write_list(f, else_branch)?;
                f.write_str(")")
            }
            Stmt::While { cond, body, .. } => {
                write!(f, "(while {cond} ")?;
                write_list(f, body)?;
                f.write_str(")")
            }
            Stmt::Global { names, .. } => {
                f.write_str("(global ")?;
                write_list(f, names)?;
                f.write_str(")")
            }
            Stmt::Return { values, .. } => {
                f.write_str("(return ")?;
                write_list(f, values)?;
                f.write_str(")")
            }
            Stmt::Assign {
                targets,
                kind,
                value,
                ..
            } => {
                write!(f, "({} ", kind.symbol())?;
                write_list(f, targets)?;
                write!(f, " {value})")
            }
            Stmt::Expr(expr) => write!(f, "{expr}"),
        }
    }
}

impl fmt::Display for Def {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(def {} ", self.name)?;
        let params: Vec<&Ident> = self.params.iter().map(|p| &p.name).collect();
        write_list(f, &params)?;
        f.write_str(" ")?;
        write_list(f, &self.body)?;
        f.write_str(")")
    }
}
