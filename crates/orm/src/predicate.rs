//! Filter predicates and their in-memory evaluation.

use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use sitegraph_schema::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_odata(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
        }
    }
}

/// Something a predicate can be evaluated against.
pub trait Row {
    /// Current value of a field; `None` when the row does not carry it.
    fn value(&self, field: &str) -> Option<Value>;
}

type LocalFn = dyn Fn(&dyn Row) -> bool + Send + Sync;

/// A computed condition that can only run client side.
///
/// `fields` lists what the closure reads so the fetch includes them.
#[derive(Clone)]
pub struct LocalPredicate {
    label: String,
    fields: Vec<String>,
    func: Arc<LocalFn>,
}

impl LocalPredicate {
    pub fn new<F>(label: impl Into<String>, fields: impl IntoIterator<Item = impl Into<String>>, func: F) -> Self
    where
        F: Fn(&dyn Row) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            func: Arc::new(func),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Debug for LocalPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPredicate")
            .field("label", &self.label)
            .field("fields", &self.fields)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    StartsWith {
        field: String,
        prefix: String,
    },
    Contains {
        field: String,
        fragment: String,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Local(LocalPredicate),
}

impl Predicate {
    fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Predicate::StartsWith {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn contains(field: impl Into<String>, fragment: impl Into<String>) -> Self {
        Predicate::Contains {
            field: field.into(),
            fragment: fragment.into(),
        }
    }

    pub fn local<F>(label: impl Into<String>, fields: impl IntoIterator<Item = impl Into<String>>, func: F) -> Self
    where
        F: Fn(&dyn Row) -> bool + Send + Sync + 'static,
    {
        Predicate::Local(LocalPredicate::new(label, fields, func))
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::And(mut a), Predicate::And(b)) => {
                a.extend(b);
                Predicate::And(a)
            }
            (Predicate::And(mut a), other) => {
                a.push(other);
                Predicate::And(a)
            }
            (this, Predicate::And(mut b)) => {
                b.insert(0, this);
                Predicate::And(b)
            }
            (this, other) => Predicate::And(vec![this, other]),
        }
    }

    /// Disjunction, flattening nested `Or`s.
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::Or(mut a), Predicate::Or(b)) => {
                a.extend(b);
                Predicate::Or(a)
            }
            (Predicate::Or(mut a), other) => {
                a.push(other);
                Predicate::Or(a)
            }
            (this, other) => Predicate::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Every field the predicate reads, in first-seen order.
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        fn push(out: &mut Vec<String>, name: &str) {
            if !out.iter().any(|f| f == name) {
                out.push(name.to_string());
            }
        }
        match self {
            Predicate::Compare { field, .. }
            | Predicate::StartsWith { field, .. }
            | Predicate::Contains { field, .. } => push(out, field),
            Predicate::Local(local) => local.fields.iter().for_each(|f| push(out, f)),
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().for_each(|c| c.collect_fields(out))
            }
        }
    }

    /// Evaluate against a row. Missing fields compare as false.
    pub fn eval(&self, row: &dyn Row) -> bool {
        match self {
            Predicate::Compare { field, op, value } => {
                let Some(actual) = row.value(field) else {
                    return false;
                };
                eval_compare(&actual, *op, value)
            }
            Predicate::StartsWith { field, prefix } => row
                .value(field)
                .and_then(|v| v.as_str().map(|s| s.starts_with(prefix.as_str())))
                .unwrap_or(false),
            Predicate::Contains { field, fragment } => row
                .value(field)
                .and_then(|v| v.as_str().map(|s| s.contains(fragment.as_str())))
                .unwrap_or(false),
            Predicate::And(children) => children.iter().all(|c| c.eval(row)),
            Predicate::Or(children) => children.iter().any(|c| c.eval(row)),
            Predicate::Not(inner) => !inner.eval(row),
            Predicate::Local(local) => (local.func)(row),
        }
    }
}

fn eval_compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => actual.loose_eq(expected),
        CompareOp::Ne => !actual.loose_eq(expected),
        CompareOp::Lt => actual.compare(expected).is_some_and(Ordering::is_lt),
        CompareOp::Le => actual.compare(expected).is_some_and(Ordering::is_le),
        CompareOp::Gt => actual.compare(expected).is_some_and(Ordering::is_gt),
        CompareOp::Ge => actual.compare(expected).is_some_and(Ordering::is_ge),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapRow(HashMap<&'static str, Value>);

    impl Row for MapRow {
        fn value(&self, field: &str) -> Option<Value> {
            self.0.get(field).cloned()
        }
    }

    fn row() -> MapRow {
        MapRow(HashMap::from([
            ("Title", Value::from("Documents")),
            ("ItemCount", Value::from(12)),
            ("Hidden", Value::from(false)),
        ]))
    }

    #[test]
    fn test_compare_and_string_functions() {
        let row = row();
        assert!(Predicate::eq("Title", "Documents").eval(&row));
        assert!(Predicate::gt("ItemCount", 10).eval(&row));
        assert!(!Predicate::le("ItemCount", 11).eval(&row));
        assert!(Predicate::starts_with("Title", "Doc").eval(&row));
        assert!(Predicate::contains("Title", "cum").eval(&row));
        assert!(!Predicate::eq("Missing", "x").eval(&row));
    }

    #[test]
    fn test_boolean_combinators() {
        let row = row();
        let p = Predicate::eq("Hidden", false)
            .and(Predicate::eq("Title", "Site Pages").or(Predicate::eq("Title", "Documents")));
        assert!(p.eval(&row));
        assert!(!p.clone().not().eval(&row));
        assert_eq!(p.fields(), vec!["Hidden".to_string(), "Title".to_string()]);
    }

    #[test]
    fn test_local_predicate() {
        let p = Predicate::local("title length", ["Title"], |row| {
            row.value("Title")
                .and_then(|v| v.as_str().map(|s| s.len() > 5))
                .unwrap_or(false)
        });
        assert!(p.eval(&row()));
        assert_eq!(p.fields(), vec!["Title".to_string()]);
    }

    #[test]
    fn test_and_flattens() {
        let p = Predicate::eq("A", 1).and(Predicate::eq("B", 2)).and(Predicate::eq("C", 3));
        assert!(matches!(p, Predicate::And(ref children) if children.len() == 3));
    }
}
