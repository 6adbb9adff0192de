//! Predicate lowering to RFC 4515 filters.
//!
//! Lowering happens in two steps: the expression tree folds into a small
//! boolean IR with `true`/`false` absorbed (`true && x` → `x`,
//! `false && x` → `false`, `!!x` → `x`), then the IR renders to filter
//! text. A predicate that folds to `false` short-circuits the whole query;
//! one that folds to `true` leaves only the mapping's object-class gate.

use ldq_core::convert::{self, AttributeSyntax};
use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::map::{AttributeResolver, ClassDescriptor, ResolvedAttribute};
use ldq_core::value::{AttributeValue, RawValue};

use crate::ast::{BinaryOp, Expression, MethodKind, UnaryOp};
use crate::escape::{escape_binary, escape_filter_value, escape_match_pattern};
use crate::visit::MemberCollector;

/// Extensible-match rule for "all mask bits set".
pub const BIT_AND_RULE: &str = "1.2.840.113556.1.4.803";
/// Extensible-match rule for "any mask bit set".
pub const BIT_OR_RULE: &str = "1.2.840.113556.1.4.804";

/// The filter that matches every entry.
pub const MATCH_ALL_FILTER: &str = "(objectClass=*)";

/// Outcome of lowering one predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedFilter {
    /// Rendered filter; `None` when the predicate is vacuously true.
    pub filter: Option<String>,
    /// The predicate is provably false.
    pub yield_no_results: bool,
}

/// Boolean IR with constants folded away during construction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    True,
    False,
    Leaf(String),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

impl Node {
    fn and(nodes: Vec<Node>) -> Node {
        let mut folded = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::True => {}
                Node::False => return Node::False,
                Node::And(children) => folded.extend(children),
                other => folded.push(other),
            }
        }
        match folded.len() {
            0 => Node::True,
            1 => folded.into_iter().next().expect("one child"),
            _ => Node::And(folded),
        }
    }

    fn or(nodes: Vec<Node>) -> Node {
        let mut folded = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::False => {}
                Node::True => return Node::True,
                Node::Or(children) => folded.extend(children),
                other => folded.push(other),
            }
        }
        match folded.len() {
            0 => Node::False,
            1 => folded.into_iter().next().expect("one child"),
            _ => Node::Or(folded),
        }
    }

    fn negate(self) -> Node {
        match self {
            Node::True => Node::False,
            Node::False => Node::True,
            Node::Not(inner) => *inner,
            other => Node::Not(Box::new(other)),
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Node::True | Node::False => unreachable!("constants are folded before rendering"),
            Node::Leaf(leaf) => out.push_str(leaf),
            Node::And(children) => {
                out.push_str("(&");
                for child in children {
                    child.render(out);
                }
                out.push(')');
            }
            Node::Or(children) => {
                out.push_str("(|");
                for child in children {
                    child.render(out);
                }
                out.push(')');
            }
            Node::Not(inner) => {
                out.push_str("(!");
                inner.render(out);
                out.push(')');
            }
        }
    }
}

/// Lower a boolean predicate into a filter, resolving members through the
/// given resolver.
pub fn translate_predicate(
    predicate: &Expression,
    resolver: &dyn AttributeResolver,
) -> DirectoryResult<TranslatedFilter> {
    let node = lower(predicate, resolver)?;
    Ok(match node {
        Node::True => TranslatedFilter {
            filter: None,
            yield_no_results: false,
        },
        Node::False => TranslatedFilter {
            filter: None,
            yield_no_results: true,
        },
        other => {
            let mut out = String::new();
            other.render(&mut out);
            TranslatedFilter {
                filter: Some(out),
                yield_no_results: false,
            }
        }
    })
}

/// Wrap a lowered filter with the mapping's object-class/category gate.
///
/// With no gate and no predicate the match-all filter is emitted so every
/// query still carries a syntactically valid filter.
pub fn gate_filter(inner: Option<&str>, descriptor: Option<&ClassDescriptor>) -> String {
    let mut terms: Vec<String> = Vec::new();
    if let Some(descriptor) = descriptor {
        if descriptor.include_object_category {
            if let Some(category) = &descriptor.object_category {
                terms.push(format!(
                    "(objectCategory={})",
                    escape_filter_value(category)
                ));
            }
        }
        if descriptor.include_object_classes {
            for class in &descriptor.object_classes {
                terms.push(format!("(objectClass={})", escape_filter_value(class)));
            }
        }
    }
    match (terms.len(), inner) {
        (0, None) => MATCH_ALL_FILTER.to_owned(),
        (0, Some(inner)) => inner.to_owned(),
        (1, None) => terms.remove(0),
        (_, None) => format!("(&{})", terms.concat()),
        (_, Some(inner)) => {
            // Flatten a conjunctive predicate into the gate's AND.
            let inner = inner
                .strip_prefix("(&")
                .and_then(|s| s.strip_suffix(')'))
                .map(str::to_owned)
                .unwrap_or_else(|| inner.to_owned());
            format!("(&{}{})", terms.concat(), inner)
        }
    }
}

fn lower(expression: &Expression, resolver: &dyn AttributeResolver) -> DirectoryResult<Node> {
    match expression {
        Expression::Lambda(body) => lower(body, resolver),
        Expression::Constant(AttributeValue::Boolean(true)) => Ok(Node::True),
        Expression::Constant(AttributeValue::Boolean(false)) => Ok(Node::False),

        // A bare boolean member reads as `t.P == true`.
        Expression::Member(name) => {
            let resolved = resolver.resolve(name)?;
            if resolved.syntax != AttributeSyntax::Boolean {
                return Err(DirectoryError::unsupported("member", name));
            }
            Ok(Node::Leaf(format!("({}=TRUE)", resolved.attribute)))
        }

        Expression::Unary {
            op: UnaryOp::Convert,
            operand,
        } => lower(operand, resolver),
        Expression::Unary {
            op: UnaryOp::Not,
            operand,
        } => Ok(lower(operand, resolver)?.negate()),

        Expression::Binary { op, left, right } => match op {
            BinaryOp::And => Ok(Node::and(vec![
                lower(left, resolver)?,
                lower(right, resolver)?,
            ])),
            BinaryOp::Or => Ok(Node::or(vec![
                lower(left, resolver)?,
                lower(right, resolver)?,
            ])),
            _ => lower_comparison(expression, *op, left, right, resolver),
        },

        Expression::Call {
            method,
            target,
            args,
        } => lower_call(expression, *method, target, args, resolver),

        other => Err(unsupported(other)),
    }
}

fn lower_comparison(
    whole: &Expression,
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    resolver: &dyn AttributeResolver,
) -> DirectoryResult<Node> {
    // Accept `t.P op value` and the mirrored `value op t.P`.
    let (member, value, op) = match (unwrap_convert(left), unwrap_convert(right)) {
        (Expression::Member(name), Expression::Constant(value)) => (name, value, op),
        (Expression::Constant(value), Expression::Member(name)) => (name, value, mirror(op)),
        _ => return Err(unsupported(whole)),
    };
    let resolved = resolver.resolve(member)?;

    match op {
        BinaryOp::Eq if value.is_null() => Ok(present(&resolved).negate()),
        BinaryOp::Ne if value.is_null() => Ok(present(&resolved)),
        BinaryOp::Eq => Ok(equality(&resolved, value)?),
        BinaryOp::Ne => Ok(equality(&resolved, value)?.negate()),
        BinaryOp::Ge => Ok(ordering(&resolved, value, ">=")?),
        BinaryOp::Le => Ok(ordering(&resolved, value, "<=")?),
        // Strict inequalities have no native filter form.
        BinaryOp::Gt => Ok(Node::and(vec![
            ordering(&resolved, value, ">=")?,
            equality(&resolved, value)?.negate(),
        ])),
        BinaryOp::Lt => Ok(Node::and(vec![
            ordering(&resolved, value, "<=")?,
            equality(&resolved, value)?.negate(),
        ])),
        BinaryOp::BitAnd => bit_test(&resolved, value, BIT_AND_RULE),
        BinaryOp::BitOr => bit_test(&resolved, value, BIT_OR_RULE),
        BinaryOp::And | BinaryOp::Or => Err(unsupported(whole)),
    }
}

fn lower_call(
    whole: &Expression,
    method: MethodKind,
    target: &Expression,
    args: &[Expression],
    resolver: &dyn AttributeResolver,
) -> DirectoryResult<Node> {
    let Expression::Member(member) = unwrap_convert(target) else {
        return Err(unsupported(whole));
    };
    let resolved = resolver.resolve(member)?;

    let text_arg = |index: usize| -> DirectoryResult<&str> {
        match args.get(index) {
            Some(Expression::Constant(AttributeValue::Text(s))) => Ok(s.as_str()),
            _ => Err(unsupported(whole)),
        }
    };

    match method {
        MethodKind::StartsWith => Ok(Node::Leaf(format!(
            "({}={}*)",
            resolved.attribute,
            escape_filter_value(text_arg(0)?)
        ))),
        MethodKind::EndsWith => Ok(Node::Leaf(format!(
            "({}=*{})",
            resolved.attribute,
            escape_filter_value(text_arg(0)?)
        ))),
        MethodKind::Contains => Ok(Node::Leaf(format!(
            "({}=*{}*)",
            resolved.attribute,
            escape_filter_value(text_arg(0)?)
        ))),
        MethodKind::Matches => Ok(Node::Leaf(format!(
            "({}={})",
            resolved.attribute,
            escape_match_pattern(text_arg(0)?)
        ))),
        MethodKind::IsNullOrEmpty => Ok(present(&resolved).negate()),
        MethodKind::AnyOf => {
            let mut terms = Vec::with_capacity(args.len());
            for arg in args {
                let Expression::Constant(value) = arg else {
                    return Err(unsupported(whole));
                };
                terms.push(equality(&resolved, value)?);
            }
            // An empty value set can match nothing.
            Ok(Node::or(terms))
        }
    }
}

fn present(resolved: &ResolvedAttribute) -> Node {
    Node::Leaf(format!("({}=*)", resolved.attribute))
}

fn equality(resolved: &ResolvedAttribute, value: &AttributeValue) -> DirectoryResult<Node> {
    Ok(Node::Leaf(format!(
        "({}={})",
        resolved.attribute,
        assertion_value(resolved, value)?
    )))
}

fn ordering(
    resolved: &ResolvedAttribute,
    value: &AttributeValue,
    operator: &str,
) -> DirectoryResult<Node> {
    Ok(Node::Leaf(format!(
        "({}{operator}{})",
        resolved.attribute,
        assertion_value(resolved, value)?
    )))
}

fn bit_test(
    resolved: &ResolvedAttribute,
    value: &AttributeValue,
    rule: &str,
) -> DirectoryResult<Node> {
    let mask = value.as_integer().ok_or_else(|| {
        DirectoryError::translation(format!(
            "bitwise test on '{}' requires an integer mask",
            resolved.attribute
        ))
    })?;
    Ok(Node::Leaf(format!(
        "({}:{rule}:={mask})",
        resolved.attribute
    )))
}

/// Render an assertion value: encode through the member's declared syntax,
/// then escape. Binary syntaxes hex-escape every byte.
fn assertion_value(
    resolved: &ResolvedAttribute,
    value: &AttributeValue,
) -> DirectoryResult<String> {
    let raw = convert::encode(&resolved.syntax, value).map_err(|e| {
        DirectoryError::translation(format!("value for '{}': {e}", resolved.attribute))
    })?;
    Ok(match raw {
        RawValue::Text(text) => escape_filter_value(&text),
        RawValue::Binary(bytes) => escape_binary(&bytes),
    })
}

fn unwrap_convert(expression: &Expression) -> &Expression {
    match expression {
        Expression::Unary {
            op: UnaryOp::Convert,
            operand,
        } => unwrap_convert(operand),
        other => other,
    }
}

fn mirror(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

fn unsupported(expression: &Expression) -> DirectoryError {
    DirectoryError::unsupported(
        expression.node_kind(),
        &MemberCollector::first(expression).unwrap_or_else(|| "t".to_owned()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::prop;
    use ldq_core::map::DynamicResolver;
    use ldq_core::map::{PropertyDescriptor, ReadOnly};
    use uuid::Uuid;

    fn descriptor() -> ClassDescriptor {
        let property = |name: &str, attribute: &str, syntax: AttributeSyntax| PropertyDescriptor {
            name: name.into(),
            attribute: attribute.into(),
            syntax,
            read_only: ReadOnly::Never,
            is_distinguished_name: false,
        };
        ClassDescriptor {
            type_name: "TestUser".into(),
            naming_context: None,
            object_classes: vec!["user".into()],
            include_object_classes: true,
            object_category: Some("person".into()),
            include_object_category: true,
            without_sub_type_mapping: false,
            has_catch_all: false,
            sub_type_classes: Vec::new(),
            properties: vec![
                property("P1", "x", AttributeSyntax::Text),
                property("P3", "z", AttributeSyntax::Text),
                property("Uac", "userAccountControl", AttributeSyntax::Integer),
                property("Enabled", "enabled", AttributeSyntax::Boolean),
                property("Guid", "objectGUID", AttributeSyntax::Guid),
            ],
        }
    }

    fn filter_of(expr: &Expression) -> String {
        translate_predicate(expr, &descriptor())
            .unwrap()
            .filter
            .unwrap()
    }

    #[test]
    fn test_predicate_table() {
        assert_eq!(filter_of(&prop("P1").eq("al")), "(x=al)");
        assert_eq!(filter_of(&prop("P1").is_null()), "(!(x=*))");
        assert_eq!(filter_of(&prop("P1").ne("al")), "(!(x=al))");
        assert_eq!(filter_of(&prop("P1").is_present()), "(x=*)");
        assert_eq!(filter_of(&prop("P1").ge("m")), "(x>=m)");
        assert_eq!(filter_of(&prop("P1").gt("m")), "(&(x>=m)(!(x=m)))");
        assert_eq!(filter_of(&prop("P1").le("m")), "(x<=m)");
        assert_eq!(filter_of(&prop("P1").lt("m")), "(&(x<=m)(!(x=m)))");
        assert_eq!(filter_of(&prop("P1").starts_with("al")), "(x=al*)");
        assert_eq!(filter_of(&prop("P1").ends_with("al")), "(x=*al)");
        assert_eq!(filter_of(&prop("P1").contains("al")), "(x=*al*)");
        assert_eq!(filter_of(&prop("P1").is_null_or_empty()), "(!(x=*))");
        assert_eq!(filter_of(&prop("P1").matches("a*b(c)")), "(x=a*b\\28c\\29)");
        assert_eq!(
            filter_of(&prop("P1").any_of(["a", "b"])),
            "(|(x=a)(x=b))"
        );
        assert_eq!(
            filter_of(&prop("Uac").all_bits(2)),
            "(userAccountControl:1.2.840.113556.1.4.803:=2)"
        );
        assert_eq!(
            filter_of(&prop("Uac").any_bits(6)),
            "(userAccountControl:1.2.840.113556.1.4.804:=6)"
        );
        assert_eq!(filter_of(&prop("Enabled").member()), "(enabled=TRUE)");
    }

    #[test]
    fn test_boolean_combinators() {
        assert_eq!(
            filter_of(&prop("P1").starts_with("al").and(prop("P3").is_present())),
            "(&(x=al*)(z=*))"
        );
        assert_eq!(
            filter_of(&prop("P1").eq("a").or(prop("P3").eq("b"))),
            "(|(x=a)(z=b))"
        );
        assert_eq!(filter_of(&prop("P1").eq("a").not()), "(!(x=a))");
        assert_eq!(filter_of(&prop("P1").eq("a").not().not()), "(x=a)");
    }

    #[test]
    fn test_constant_folding() {
        let folded = translate_predicate(
            &Expression::always().and(prop("P1").eq("a")),
            &descriptor(),
        )
        .unwrap();
        assert_eq!(folded.filter.as_deref(), Some("(x=a)"));

        let vacuous =
            translate_predicate(&Expression::always().or(prop("P1").eq("a")), &descriptor())
                .unwrap();
        assert_eq!(vacuous.filter, None);
        assert!(!vacuous.yield_no_results);

        let impossible =
            translate_predicate(&Expression::never().and(prop("P1").eq("a")), &descriptor())
                .unwrap();
        assert!(impossible.yield_no_results);

        let empty_set = translate_predicate(
            &prop("P1").any_of(Vec::<String>::new()),
            &descriptor(),
        )
        .unwrap();
        assert!(empty_set.yield_no_results);
    }

    #[test]
    fn test_binary_values_hex_escape_every_byte() {
        let guid = Uuid::parse_str("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let filter = filter_of(&prop("Guid").eq(guid));
        assert!(filter.starts_with("(objectGUID=\\67\\45\\23\\01"));
    }

    #[test]
    fn test_values_are_escaped() {
        assert_eq!(filter_of(&prop("P1").eq("a*b")), "(x=a\\2ab)");
        assert_eq!(filter_of(&prop("P1").eq("(x=*)")), "(x=\\28x=\\2a\\29)");
    }

    #[test]
    fn test_mirrored_comparison() {
        // 5 < t.Uac reads as t.Uac > 5.
        let expr = Expression::Binary {
            op: BinaryOp::Lt,
            left: Box::new(Expression::Constant(AttributeValue::Integer(5))),
            right: Box::new(Expression::Member("Uac".into())),
        };
        assert_eq!(
            filter_of(&expr),
            "(&(userAccountControl>=5)(!(userAccountControl=5)))"
        );
    }

    #[test]
    fn test_unsupported_nodes_report_kind_and_path() {
        let conditional = Expression::Conditional {
            condition: Box::new(prop("P1").is_present()),
            if_true: Box::new(Expression::always()),
            if_false: Box::new(Expression::never()),
        };
        let err = translate_predicate(&conditional, &descriptor()).unwrap_err();
        assert!(err.to_string().contains("conditional"));
        assert!(err.to_string().contains("P1"));
    }

    #[test]
    fn test_unmapped_member_is_a_mapping_error() {
        let err = translate_predicate(&prop("Nope").eq("v"), &descriptor()).unwrap_err();
        assert!(matches!(err, DirectoryError::Mapping { .. }));
    }

    #[test]
    fn test_gate_wraps_predicate() {
        let descriptor = descriptor();
        let translated = translate_predicate(
            &prop("P1").starts_with("al").and(prop("P3").is_present()),
            &descriptor,
        )
        .unwrap();
        let gated = gate_filter(translated.filter.as_deref(), Some(&descriptor));
        assert_eq!(
            gated,
            "(&(objectCategory=person)(objectClass=user)(x=al*)(z=*))"
        );

        assert_eq!(
            gate_filter(None, Some(&descriptor)),
            "(&(objectCategory=person)(objectClass=user))"
        );
        assert_eq!(gate_filter(None, None), MATCH_ALL_FILTER);
    }

    #[test]
    fn test_dynamic_resolver_uses_attribute_names() {
        let translated =
            translate_predicate(&prop("sAMAccountName").eq("jdoe"), &DynamicResolver).unwrap();
        assert_eq!(translated.filter.as_deref(), Some("(sAMAccountName=jdoe)"));
    }
}
