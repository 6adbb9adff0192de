//! Select projections.
//!
//! The projector decides which attributes a query loads and how a returned
//! entry becomes the caller's value. Identity keeps the materialised entity;
//! a single member yields that property's value; an aggregate builds a
//! [`ProjectedRow`] with one slot per initialiser, evaluating each slot
//! expression against the entry's member values.

use std::cmp::Ordering;

use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::map::ClassDescriptor;
use ldq_core::value::AttributeValue;

use crate::ast::{BinaryOp, Expression, MethodKind, UnaryOp};
use crate::visit::MemberCollector;

/// The shape of a query's result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `t => t`: the materialised entity itself.
    Identity,
    /// `t => t.P`: one property value.
    Member(String),
    /// `t => new { ... }`: named slots filled from expressions over `t`.
    Aggregate(Vec<(String, Expression)>),
}

/// Tag describing what a projected query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// The mapped entity.
    Entity,
    /// A single property value.
    Scalar,
    /// A named-slot row.
    Record,
}

/// Result of analysing a projection against a class descriptor.
#[derive(Debug, Clone)]
pub struct SelectAnalysis {
    /// Property → attribute load list, in expression order.
    pub selected: Vec<(String, String)>,
    /// What the materialiser produces.
    pub return_kind: ReturnKind,
}

/// Compute the minimal attribute set a projection needs.
///
/// The selected set is exactly the members of the root variable reachable in
/// the projection expression, in first-appearance order.
pub fn analyze(
    projection: &Projection,
    descriptor: &ClassDescriptor,
) -> DirectoryResult<SelectAnalysis> {
    match projection {
        Projection::Identity => Ok(SelectAnalysis {
            selected: descriptor.all_attributes(),
            return_kind: ReturnKind::Entity,
        }),
        Projection::Member(name) => {
            let property = descriptor.property(name)?;
            Ok(SelectAnalysis {
                selected: vec![(property.name.clone(), property.attribute.clone())],
                return_kind: ReturnKind::Scalar,
            })
        }
        Projection::Aggregate(slots) => {
            let mut selected: Vec<(String, String)> = Vec::new();
            for (_, expression) in slots {
                for member in MemberCollector::collect(expression) {
                    if selected.iter().any(|(name, _)| *name == member) {
                        continue;
                    }
                    let property = descriptor.property(&member)?;
                    selected.push((property.name.clone(), property.attribute.clone()));
                }
            }
            Ok(SelectAnalysis {
                selected,
                return_kind: ReturnKind::Record,
            })
        }
    }
}

/// One projected result row: named slots in projection order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRow {
    slots: Vec<(String, AttributeValue)>,
}

impl ProjectedRow {
    /// Build a row from evaluated slots.
    pub fn new(slots: Vec<(String, AttributeValue)>) -> Self {
        Self { slots }
    }

    /// Slot value by name.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.slots
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, value)| value)
    }

    /// All slots in projection order.
    pub fn slots(&self) -> &[(String, AttributeValue)] {
        &self.slots
    }
}

/// Materialise an aggregate projection from the entry's member values.
///
/// `member_value` resolves a root-variable member to its loaded value.
pub fn project_row(
    slots: &[(String, Expression)],
    member_value: &dyn Fn(&str) -> Option<AttributeValue>,
) -> DirectoryResult<ProjectedRow> {
    let mut values = Vec::with_capacity(slots.len());
    for (name, expression) in slots {
        values.push((name.clone(), evaluate(expression, member_value)?));
    }
    Ok(ProjectedRow::new(values))
}

/// Evaluate a host expression against loaded member values.
///
/// Supports the node set a projection slot may legally contain; anything
/// else is an unsupported-projection error.
pub fn evaluate(
    expression: &Expression,
    member_value: &dyn Fn(&str) -> Option<AttributeValue>,
) -> DirectoryResult<AttributeValue> {
    match expression {
        Expression::Constant(value) => Ok(value.clone()),
        Expression::Member(name) => Ok(member_value(name).unwrap_or(AttributeValue::Null)),
        Expression::Lambda(body) => evaluate(body, member_value),
        Expression::Unary {
            op: UnaryOp::Convert,
            operand,
        } => evaluate(operand, member_value),
        Expression::Unary {
            op: UnaryOp::Not,
            operand,
        } => {
            let value = evaluate(operand, member_value)?;
            match value {
                AttributeValue::Boolean(b) => Ok(AttributeValue::Boolean(!b)),
                other => Err(DirectoryError::translation(format!(
                    "cannot negate a {} value in a projection",
                    other.kind()
                ))),
            }
        }
        Expression::Conditional {
            condition,
            if_true,
            if_false,
        } => {
            let condition = evaluate(condition, member_value)?;
            match condition {
                AttributeValue::Boolean(true) => evaluate(if_true, member_value),
                AttributeValue::Boolean(false) => evaluate(if_false, member_value),
                other => Err(DirectoryError::translation(format!(
                    "conditional guard evaluated to {}",
                    other.kind()
                ))),
            }
        }
        Expression::Binary { op, left, right } => {
            let left = evaluate(left, member_value)?;
            let right = evaluate(right, member_value)?;
            evaluate_binary(*op, &left, &right)
        }
        Expression::Call {
            method,
            target,
            args,
        } => {
            let target = evaluate(target, member_value)?;
            evaluate_call(*method, &target, args, member_value)
        }
        other => Err(DirectoryError::unsupported(
            other.node_kind(),
            &MemberCollector::first(other).unwrap_or_else(|| "t".to_owned()),
        )),
    }
}

fn evaluate_binary(
    op: BinaryOp,
    left: &AttributeValue,
    right: &AttributeValue,
) -> DirectoryResult<AttributeValue> {
    let boolean = |b: bool| Ok(AttributeValue::Boolean(b));
    match op {
        BinaryOp::Eq => boolean(left == right),
        BinaryOp::Ne => boolean(left != right),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(|| {
                DirectoryError::translation(format!(
                    "cannot order {} against {}",
                    left.kind(),
                    right.kind()
                ))
            })?;
            boolean(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            })
        }
        BinaryOp::And | BinaryOp::Or => {
            let (Some(l), Some(r)) = (left.as_boolean(), right.as_boolean()) else {
                return Err(DirectoryError::translation(
                    "boolean combinator over non-boolean values in a projection",
                ));
            };
            boolean(if op == BinaryOp::And { l && r } else { l || r })
        }
        BinaryOp::BitAnd | BinaryOp::BitOr => {
            let (Some(l), Some(r)) = (left.as_integer(), right.as_integer()) else {
                return Err(DirectoryError::translation(
                    "bitwise operator over non-integer values in a projection",
                ));
            };
            match op {
                BinaryOp::BitAnd => boolean(l & r == r),
                _ => boolean(l & r != 0),
            }
        }
    }
}

fn evaluate_call(
    method: MethodKind,
    target: &AttributeValue,
    args: &[Expression],
    member_value: &dyn Fn(&str) -> Option<AttributeValue>,
) -> DirectoryResult<AttributeValue> {
    let text_arg = |index: usize| -> DirectoryResult<String> {
        let arg = args.get(index).ok_or_else(|| {
            DirectoryError::translation(format!("{} is missing an argument", method.name()))
        })?;
        match evaluate(arg, member_value)? {
            AttributeValue::Text(s) => Ok(s),
            other => Err(DirectoryError::translation(format!(
                "{} expects a string, got {}",
                method.name(),
                other.kind()
            ))),
        }
    };
    match method {
        MethodKind::IsNullOrEmpty => Ok(AttributeValue::Boolean(
            target.is_null() || target.as_str().is_some_and(str::is_empty),
        )),
        MethodKind::StartsWith => {
            let needle = text_arg(0)?;
            Ok(AttributeValue::Boolean(
                target.as_str().is_some_and(|s| s.starts_with(&needle)),
            ))
        }
        MethodKind::EndsWith => {
            let needle = text_arg(0)?;
            Ok(AttributeValue::Boolean(
                target.as_str().is_some_and(|s| s.ends_with(&needle)),
            ))
        }
        MethodKind::Contains => {
            let needle = text_arg(0)?;
            Ok(AttributeValue::Boolean(
                target.as_str().is_some_and(|s| s.contains(&needle)),
            ))
        }
        MethodKind::AnyOf => {
            for arg in args {
                if evaluate(arg, member_value)? == *target {
                    return Ok(AttributeValue::Boolean(true));
                }
            }
            Ok(AttributeValue::Boolean(false))
        }
        MethodKind::Matches => Err(DirectoryError::translation(
            "matches() is only valid inside a filter predicate",
        )),
    }
}

fn compare(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::Integer(l), AttributeValue::Integer(r)) => Some(l.cmp(r)),
        (AttributeValue::Text(l), AttributeValue::Text(r)) => Some(l.cmp(r)),
        (AttributeValue::Timestamp(l), AttributeValue::Timestamp(r)) => Some(l.cmp(r)),
        (AttributeValue::Boolean(l), AttributeValue::Boolean(r)) => Some(l.cmp(r)),
        _ => None,
    }
}
