use jit_rs::script::tree::{AssignKind, Expr, Stmt};
use jit_rs::script::{parse_expression, parse_program};

fn sexpr(source: &str) -> String {
    parse_expression(source)
        .unwrap_or_else(|err| panic!("failed to parse {source:?}: {err}"))
        .to_string()
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    assert_eq!(
        sexpr("2 + 3 * 4"),
        "(+ (const 2 i) (* (const 3 i) (const 4 i)))"
    );
}

#[test]
fn binary_operators_are_left_associative_except_pow() {
    assert_eq!(sexpr("a - b - c"), "(- (- a b) c)");
    assert_eq!(sexpr("a ** b ** c"), "(** a (** b c))");
}

#[test]
fn ternary_has_the_lowest_precedence() {
    assert_eq!(sexpr("a if b else c"), "(if b a c)");
    assert_eq!(sexpr("a + 1 if b < c else d"), "(if (< b c) (+ a (const 1 i)) d)");
}

#[test]
fn unary_operators_bind_at_their_own_levels() {
    assert_eq!(sexpr("not a and b"), "(and (not a) b)");
    assert_eq!(sexpr("not a < b"), "(not (< a b))");
    assert_eq!(sexpr("-a * b"), "(* (- a) b)");
}

#[test]
fn literal_suffixes_select_the_type() {
    assert_eq!(sexpr("3LL"), "(const 3 LL)");
    assert_eq!(sexpr("2.5f"), "(const 2.5 f)");
    assert_eq!(sexpr("2.5"), "(const 2.5 f)");
    assert_eq!(sexpr("True"), "(const 1 b)");
    let err = parse_expression("3q").expect_err("bad suffix");
    assert_eq!(
        err.message,
        "expected 'f' or 'LL' as numeric type identifier but found 'q'"
    );
}

#[test]
fn calls_collect_keyword_attributes() {
    assert_eq!(
        sexpr("f(x, dim=1, sizes=[2, -3])"),
        "(apply f (list x) (list (= dim (const 1 i)) (= sizes (list (const 2 i) (const -3 i)))))"
    );
    assert_eq!(sexpr("x.sum()"), "(apply (. x sum) (list) (list))");
    assert_eq!(sexpr("x.float()"), "(apply (. x float) (list) (list))");
}

#[test]
fn subscripts_and_casts() {
    assert_eq!(sexpr("x[i]"), "(gather x i)");
    assert_eq!(sexpr("x[1:]"), "(slice x (const 1 i) _)");
    assert_eq!(sexpr("x[:2]"), "(slice x _ (const 2 i))");
    assert_eq!(sexpr("float(x + y)"), "(cast Float (+ x y))");
}

#[test]
fn statement_before_dedent_needs_no_newline() {
    let source = "def f(x):\n    if x:\n        y = x\n    else:\n        y = -x\n    return y\n";
    let defs = parse_program(source).expect("parse");
    assert_eq!(defs.len(), 1);
    assert_eq!(
        defs[0].to_string(),
        "(def f (list x) (list (if x (list (= (list y) x)) (list (= (list y) (- x)))) (return (list y))))"
    );
}

#[test]
fn several_definitions_and_blank_lines() {
    let source = "\ndef f(a, b):\n  return a + b\n\n# helper\ndef g():\n  x = 1\n  while x < 3:\n    x += 1\n  return x\n";
    let defs = parse_program(source).expect("parse");
    let names: Vec<&str> = defs.iter().map(|d| d.name.name.as_str()).collect();
    assert_eq!(names, vec!["f", "g"]);
    assert!(defs[1].params.is_empty());
    match &defs[1].body[1] {
        Stmt::While { body, .. } => match &body[0] {
            Stmt::Assign { targets, kind, .. } => {
                assert_eq!(targets[0].name, "x");
                assert_eq!(*kind, AssignKind::Add);
            }
            other => panic!("expected assignment, got {other}"),
        },
        other => panic!("expected while, got {other}"),
    }
}

#[test]
fn elif_nests_in_the_else_branch() {
    let source = "def f(x):\n  if x:\n    y = 1\n  elif x < 2:\n    y = 2\n  else:\n    y = 3\n  return y\n";
    let defs = parse_program(source).expect("parse");
    match &defs[0].body[0] {
        Stmt::If { else_branch, .. } => {
            assert_eq!(else_branch.len(), 1);
            assert!(matches!(else_branch[0], Stmt::If { .. }));
        }
        other => panic!("expected if, got {other}"),
    }
}

#[test]
fn tuple_targets_and_globals() {
    let source = "def f(x):\n  global w\n  a, b = split(x)\n  return a, b\n";
    let defs = parse_program(source).expect("parse");
    let body = &defs[0].body;
    assert_eq!(body[0].to_string(), "(global (list w))");
    match &body[1] {
        Stmt::Assign { targets, value, .. } => {
            assert_eq!(targets.len(), 2);
            assert!(matches!(value, Expr::Apply { .. }));
        }
        other => panic!("expected assignment, got {other}"),
    }
    assert_eq!(body[2].to_string(), "(return (list a b))");
}

#[test]
fn errors_name_the_expected_and_found_tokens() {
    let err = parse_program("def f(x)\n  return x\n").expect_err("missing colon");
    assert_eq!(err.message, "expected ':' but found indent");
    let (line, _) = err.range.line_col();
    assert_eq!(line, 1);

    let err = parse_expression("(a + b").expect_err("unclosed paren");
    assert_eq!(err.message, "expected ')' but found end of input");
}
