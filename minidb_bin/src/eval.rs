//! Expression evaluation over decoded rows.

use std::cmp::Ordering;

use strata::datum::{Column, Schema, Value};

use crate::errors::ExecutionError;
use crate::parser::{BinaryOperator, Expression, LiteralValue};

pub fn literal_to_value(literal: &LiteralValue) -> Value {
    match literal {
        LiteralValue::Integer(v) => Value::Int(*v),
        LiteralValue::String(v) => Value::Text(v.clone()),
        LiteralValue::Bool(v) => Value::Bool(*v),
        LiteralValue::Null => Value::Null,
    }
}

/// Evaluates an expression, resolving column references against the given
/// row. Comparisons involving NULL or mismatched types are false.
pub fn evaluate(
    expr: &Expression,
    schema: &Schema,
    row: &[Value],
) -> Result<Value, ExecutionError> {
    match expr {
        Expression::Literal(literal) => Ok(literal_to_value(literal)),
        Expression::Column(name) => {
            let idx = schema
                .column_index(name)
                .ok_or_else(|| ExecutionError::ColumnNotFound(name.clone()))?;
            Ok(row[idx].clone())
        }
        Expression::Binary { left, op, right } => {
            let left = evaluate(left, schema, row)?;
            let right = evaluate(right, schema, row)?;
            apply_binary(&left, *op, &right)
        }
    }
}

/// Evaluates an expression with no row in scope (INSERT value lists).
pub fn evaluate_standalone(expr: &Expression) -> Result<Value, ExecutionError> {
    match expr {
        Expression::Literal(literal) => Ok(literal_to_value(literal)),
        Expression::Column(name) => Err(ExecutionError::ColumnNotFound(name.clone())),
        Expression::Binary { left, op, right } => {
            let left = evaluate_standalone(left)?;
            let right = evaluate_standalone(right)?;
            apply_binary(&left, *op, &right)
        }
    }
}

/// True when the optional WHERE clause accepts the row.
pub fn where_matches(
    where_clause: Option<&Expression>,
    schema: &Schema,
    row: &[Value],
) -> Result<bool, ExecutionError> {
    match where_clause {
        None => Ok(true),
        Some(expr) => Ok(matches!(evaluate(expr, schema, row)?, Value::Bool(true))),
    }
}

fn apply_binary(left: &Value, op: BinaryOperator, right: &Value) -> Result<Value, ExecutionError> {
    match op {
        BinaryOperator::And | BinaryOperator::Or => {
            let l = truthy(left);
            let r = truthy(right);
            Ok(Value::Bool(match op {
                BinaryOperator::And => l && r,
                _ => l || r,
            }))
        }
        _ => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false));
            }
            let Some(ordering) = compare(left, right) else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOperator::Eq => ordering == Ordering::Equal,
                BinaryOperator::NotEq => ordering != Ordering::Equal,
                BinaryOperator::Lt => ordering == Ordering::Less,
                BinaryOperator::LtEq => ordering != Ordering::Greater,
                BinaryOperator::Gt => ordering == Ordering::Greater,
                BinaryOperator::GtEq => ordering != Ordering::Less,
                BinaryOperator::And | BinaryOperator::Or => unreachable!(),
            }))
        }
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Same-type ordering; None for mixed types.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => Some(l.cmp(r)),
        (Value::Text(l), Value::Text(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

/// Checks a value against its destination column, enforcing type agreement
/// and NOT NULL.
pub fn check_column_value(value: &Value, column: &Column) -> Result<(), ExecutionError> {
    if value.is_null() {
        if !column.nullable {
            return Err(ExecutionError::NullViolation(column.name.clone()));
        }
        return Ok(());
    }
    let expected = column.ty;
    let got = value.value_type();
    if got != expected {
        return Err(ExecutionError::TypeMismatch {
            column: column.name.clone(),
            detail: format!("expected {expected:?}, got {got:?}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata::datum::ValueType;

    fn schema() -> Schema {
        Schema {
            table_name: "t".to_string(),
            columns: vec![
                Column {
                    name: "id".to_string(),
                    ty: ValueType::Int,
                    nullable: false,
                },
                Column {
                    name: "name".to_string(),
                    ty: ValueType::Text,
                    nullable: true,
                },
            ],
        }
    }

    fn parse_where(sql: &str) -> Expression {
        let stmts = crate::parser::sql_parser(&format!("SELECT * FROM t WHERE {sql};")).unwrap();
        match stmts.into_iter().next().unwrap() {
            crate::parser::Statement::Select(s) => s.where_clause.unwrap(),
            _ => panic!("expected SELECT"),
        }
    }

    #[test]
    fn comparisons_and_combinators() {
        let schema = schema();
        let row = vec![Value::Int(5), Value::Text("alice".to_string())];

        for (sql, expected) in [
            ("id = 5", true),
            ("id != 5", false),
            ("id < 10", true),
            ("id >= 5", true),
            ("name = 'alice'", true),
            ("name = 'bob'", false),
            ("id = 5 AND name = 'alice'", true),
            ("id = 9 OR name = 'alice'", true),
            ("id = 9 AND name = 'alice'", false),
        ] {
            assert_eq!(
                where_matches(Some(&parse_where(sql)), &schema, &row).unwrap(),
                expected,
                "WHERE {sql}"
            );
        }
    }

    #[test]
    fn null_comparisons_are_false() {
        let schema = schema();
        let row = vec![Value::Int(5), Value::Null];
        assert!(!where_matches(Some(&parse_where("name = 'alice'")), &schema, &row).unwrap());
        assert!(!where_matches(Some(&parse_where("name != 'alice'")), &schema, &row).unwrap());
    }

    #[test]
    fn mixed_type_comparison_is_false() {
        let schema = schema();
        let row = vec![Value::Int(5), Value::Text("5".to_string())];
        assert!(!where_matches(Some(&parse_where("name = 5")), &schema, &row).unwrap());
    }

    #[test]
    fn unknown_column_is_an_error() {
        let schema = schema();
        let row = vec![Value::Int(5), Value::Null];
        assert!(matches!(
            where_matches(Some(&parse_where("missing = 1")), &schema, &row),
            Err(ExecutionError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn column_checks() {
        let int_col = Column {
            name: "id".to_string(),
            ty: ValueType::Int,
            nullable: false,
        };
        assert!(check_column_value(&Value::Int(1), &int_col).is_ok());
        assert!(matches!(
            check_column_value(&Value::Null, &int_col),
            Err(ExecutionError::NullViolation(_))
        ));
        assert!(matches!(
            check_column_value(&Value::Text("x".to_string()), &int_col),
            Err(ExecutionError::TypeMismatch { .. })
        ));
    }
}
