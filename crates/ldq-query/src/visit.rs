//! Expression visitors.
//!
//! All translator passes walk the tree through [`Visit`], overriding only
//! the nodes they care about. [`MemberCollector`] is the shared pass that
//! gathers root-variable members in first-appearance order; the projector
//! builds its selected-property set from it and the filter translator uses
//! it to name the member path in diagnostics.

use crate::ast::Expression;

/// Depth-first expression visitor with default traversal.
pub trait Visit {
    /// Visit a node; the default recurses via [`walk_expression`].
    fn visit_expression(&mut self, expression: &Expression) {
        walk_expression(self, expression);
    }

    /// Called for every member access.
    fn visit_member(&mut self, _name: &str) {}
}

/// Default traversal over an expression's children.
pub fn walk_expression<V: Visit + ?Sized>(visitor: &mut V, expression: &Expression) {
    match expression {
        Expression::Constant(_) | Expression::Parameter => {}
        Expression::Member(name) => visitor.visit_member(name),
        Expression::Unary { operand, .. } => visitor.visit_expression(operand),
        Expression::Binary { left, right, .. } => {
            visitor.visit_expression(left);
            visitor.visit_expression(right);
        }
        Expression::Call { target, args, .. } => {
            visitor.visit_expression(target);
            for arg in args {
                visitor.visit_expression(arg);
            }
        }
        Expression::Conditional {
            condition,
            if_true,
            if_false,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_expression(if_true);
            visitor.visit_expression(if_false);
        }
        Expression::New(members) => {
            for (_, member) in members {
                visitor.visit_expression(member);
            }
        }
        Expression::Lambda(body) => visitor.visit_expression(body),
    }
}

/// Collects distinct member names in first-appearance order.
#[derive(Debug, Default)]
pub struct MemberCollector {
    members: Vec<String>,
}

impl MemberCollector {
    /// Collect the members referenced by an expression.
    pub fn collect(expression: &Expression) -> Vec<String> {
        let mut collector = Self::default();
        collector.visit_expression(expression);
        collector.members
    }

    /// The first member referenced by an expression, for diagnostics.
    pub fn first(expression: &Expression) -> Option<String> {
        Self::collect(expression).into_iter().next()
    }
}

impl Visit for MemberCollector {
    fn visit_member(&mut self, name: &str) {
        if !self.members.iter().any(|m| m == name) {
            self.members.push(name.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::prop;

    #[test]
    fn test_members_collected_in_appearance_order() {
        let expr = prop("B").eq(1).and(prop("A").eq(2)).and(prop("B").eq(3));
        assert_eq!(MemberCollector::collect(&expr), vec!["B", "A"]);
    }

    #[test]
    fn test_new_initialisers_are_walked() {
        let expr = Expression::New(vec![
            ("x".into(), prop("P2").member()),
            ("y".into(), prop("P1").member()),
        ]);
        assert_eq!(MemberCollector::collect(&expr), vec!["P2", "P1"]);
    }
}
