use chumsky::prelude::*;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    CreateTable(CreateTableStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectList {
    Wildcard,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub select_list: SelectList,
    pub table_name: String,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int,
    Text,
    Bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table_name: String,
    pub columns: Option<Vec<String>>,
    pub values: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table_name: String,
    pub assignments: Vec<(String, Expression)>,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table_name: String,
    pub where_clause: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(LiteralValue),
    Column(String),
    Binary {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Integer(i64),
    String(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOperator::Eq => write!(f, "="),
            BinaryOperator::NotEq => write!(f, "<>"),
            BinaryOperator::Lt => write!(f, "<"),
            BinaryOperator::LtEq => write!(f, "<="),
            BinaryOperator::Gt => write!(f, ">"),
            BinaryOperator::GtEq => write!(f, ">="),
            BinaryOperator::And => write!(f, "AND"),
            BinaryOperator::Or => write!(f, "OR"),
        }
    }
}

pub fn sql_parser(s: &str) -> Result<Vec<Statement>, Vec<Simple<char>>> {
    let ident =
        text::ident()
            .padded()
            .try_map(|ident: String, span| match ident.to_uppercase().as_str() {
                "SELECT" | "FROM" | "CREATE" | "TABLE" | "INSERT" | "INTO" | "VALUES"
                | "UPDATE" | "SET" | "WHERE" | "DELETE" | "BEGIN" | "COMMIT" | "ROLLBACK"
                | "AND" | "OR" | "NOT" | "NULL" | "TRUE" | "FALSE" | "INT" | "TEXT" | "BOOL" => {
                    Err(Simple::custom(
                        span,
                        format!("keyword `{}` cannot be used as an identifier", ident),
                    ))
                }
                _ => Ok(ident),
            });

    let number = just('-')
        .or_not()
        .then(text::int(10))
        .try_map(|(neg, digits): (Option<char>, String), span| {
            let text = match neg {
                Some(_) => format!("-{digits}"),
                None => digits,
            };
            text.parse::<i64>()
                .map(LiteralValue::Integer)
                .map_err(|_| Simple::custom(span, format!("integer out of range: {text}")))
        });

    let string = just('\'')
        .ignore_then(filter(|c| *c != '\'').repeated())
        .then_ignore(just('\''))
        .collect::<String>()
        .map(LiteralValue::String);

    let boolean = text::keyword("TRUE")
        .to(true)
        .or(text::keyword("FALSE").to(false))
        .map(LiteralValue::Bool);

    let null = text::keyword("NULL").to(LiteralValue::Null);

    let literal = number
        .or(string)
        .or(boolean)
        .or(null)
        .map(Expression::Literal)
        .padded();

    let column = ident.map(Expression::Column);

    // Comparison binds tighter than AND, AND tighter than OR.
    let expr = recursive(|expr| {
        let atom = literal.or(column).or(expr
            .clone()
            .delimited_by(just('(').padded(), just(')').padded()));

        let comparison_op = just("=")
            .to(BinaryOperator::Eq)
            .or(just("!=").to(BinaryOperator::NotEq))
            .or(just("<>").to(BinaryOperator::NotEq))
            .or(just("<=").to(BinaryOperator::LtEq))
            .or(just("<").to(BinaryOperator::Lt))
            .or(just(">=").to(BinaryOperator::GtEq))
            .or(just(">").to(BinaryOperator::Gt));

        let comparison = atom
            .clone()
            .then(comparison_op.padded().then(atom).repeated())
            .foldl(|left, (op, right)| Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });

        let conjunction = comparison
            .clone()
            .then(
                text::keyword("AND")
                    .padded()
                    .to(BinaryOperator::And)
                    .then(comparison)
                    .repeated(),
            )
            .foldl(|left, (op, right)| Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });

        conjunction
            .clone()
            .then(
                text::keyword("OR")
                    .padded()
                    .to(BinaryOperator::Or)
                    .then(conjunction)
                    .repeated(),
            )
            .foldl(|left, (op, right)| Expression::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            })
    });

    let where_clause = text::keyword("WHERE")
        .padded()
        .ignore_then(expr.clone())
        .or_not();

    let wildcard = just('*').padded().to(SelectList::Wildcard);
    let column_list = ident
        .separated_by(just(',').padded())
        .at_least(1)
        .collect::<Vec<_>>()
        .map(SelectList::Columns);

    let select = text::keyword("SELECT")
        .padded()
        .ignore_then(wildcard.or(column_list))
        .then_ignore(text::keyword("FROM").padded())
        .then(ident)
        .then(where_clause.clone())
        .map(|((select_list, table_name), where_clause)| {
            Statement::Select(SelectStatement {
                select_list,
                table_name,
                where_clause,
            })
        });

    let data_type = text::ident()
        .try_map(|s: String, span| match s.to_uppercase().as_str() {
            "INT" => Ok(DataType::Int),
            "TEXT" => Ok(DataType::Text),
            "BOOL" => Ok(DataType::Bool),
            _ => Err(Simple::custom(span, format!("unknown type: {}", s))),
        })
        .padded();

    let column_def = ident
        .then(data_type)
        .then(
            text::keyword("NOT")
                .padded()
                .ignore_then(text::keyword("NULL").padded())
                .or_not(),
        )
        .map(|((name, data_type), not_null)| ColumnDef {
            name,
            data_type,
            not_null: not_null.is_some(),
        });

    let create_table = text::keyword("CREATE")
        .padded()
        .ignore_then(text::keyword("TABLE").padded())
        .ignore_then(ident)
        .then(
            column_def
                .separated_by(just(',').padded())
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(table_name, columns)| {
            Statement::CreateTable(CreateTableStatement {
                table_name,
                columns,
            })
        });

    let insert = text::keyword("INSERT")
        .padded()
        .ignore_then(text::keyword("INTO").padded())
        .ignore_then(ident)
        .then(
            ident
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded())
                .or_not(),
        )
        .then_ignore(text::keyword("VALUES").padded())
        .then(
            expr.clone()
                .separated_by(just(',').padded())
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|((table_name, columns), values)| {
            Statement::Insert(InsertStatement {
                table_name,
                columns,
                values,
            })
        });

    let update = text::keyword("UPDATE")
        .padded()
        .ignore_then(ident)
        .then_ignore(text::keyword("SET").padded())
        .then(
            ident
                .then_ignore(just('=').padded())
                .then(expr.clone())
                .separated_by(just(',').padded())
                .at_least(1)
                .collect::<Vec<(String, Expression)>>(),
        )
        .then(where_clause.clone())
        .map(|((table_name, assignments), where_clause)| {
            Statement::Update(UpdateStatement {
                table_name,
                assignments,
                where_clause,
            })
        });

    let delete = text::keyword("DELETE")
        .padded()
        .ignore_then(text::keyword("FROM").padded())
        .ignore_then(ident)
        .then(where_clause)
        .map(|(table_name, where_clause)| {
            Statement::Delete(DeleteStatement {
                table_name,
                where_clause,
            })
        });

    let begin = text::keyword("BEGIN").padded().to(Statement::Begin);
    let commit = text::keyword("COMMIT").padded().to(Statement::Commit);
    let rollback = text::keyword("ROLLBACK").padded().to(Statement::Rollback);

    let statement = create_table
        .or(select)
        .or(insert)
        .or(update)
        .or(delete)
        .or(begin)
        .or(commit)
        .or(rollback);

    statement
        .padded_by(just(';').padded().repeated())
        .repeated()
        .then_ignore(end())
        .parse(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_with_nullability() {
        let parsed =
            sql_parser("CREATE TABLE users (id INT NOT NULL, name TEXT, active BOOL);").unwrap();
        let Statement::CreateTable(stmt) = &parsed[0] else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(stmt.table_name, "users");
        assert_eq!(stmt.columns.len(), 3);
        assert!(stmt.columns[0].not_null);
        assert_eq!(stmt.columns[0].data_type, DataType::Int);
        assert!(!stmt.columns[1].not_null);
        assert_eq!(stmt.columns[2].data_type, DataType::Bool);
    }

    #[test]
    fn insert_with_and_without_column_list() {
        let parsed = sql_parser("INSERT INTO users VALUES (1, 'alice');").unwrap();
        let Statement::Insert(stmt) = &parsed[0] else {
            panic!("expected INSERT");
        };
        assert!(stmt.columns.is_none());
        assert_eq!(stmt.values.len(), 2);
        assert_eq!(
            stmt.values[0],
            Expression::Literal(LiteralValue::Integer(1))
        );

        let parsed = sql_parser("INSERT INTO users (id, name) VALUES (2, 'bob');").unwrap();
        let Statement::Insert(stmt) = &parsed[0] else {
            panic!("expected INSERT");
        };
        assert_eq!(
            stmt.columns.as_deref(),
            Some(&["id".to_string(), "name".to_string()][..])
        );
    }

    #[test]
    fn insert_negative_integer() {
        let parsed = sql_parser("INSERT INTO t VALUES (-100);").unwrap();
        let Statement::Insert(stmt) = &parsed[0] else {
            panic!("expected INSERT");
        };
        assert_eq!(
            stmt.values[0],
            Expression::Literal(LiteralValue::Integer(-100))
        );
    }

    #[test]
    fn select_wildcard_and_columns() {
        let parsed = sql_parser("SELECT * FROM users;").unwrap();
        let Statement::Select(stmt) = &parsed[0] else {
            panic!("expected SELECT");
        };
        assert_eq!(stmt.select_list, SelectList::Wildcard);
        assert!(stmt.where_clause.is_none());

        let parsed = sql_parser("SELECT id, name FROM users WHERE id = 1;").unwrap();
        let Statement::Select(stmt) = &parsed[0] else {
            panic!("expected SELECT");
        };
        assert_eq!(
            stmt.select_list,
            SelectList::Columns(vec!["id".to_string(), "name".to_string()])
        );
        assert!(stmt.where_clause.is_some());
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let parsed = sql_parser("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3;").unwrap();
        let Statement::Select(stmt) = &parsed[0] else {
            panic!("expected SELECT");
        };
        let Some(Expression::Binary { op, right, .. }) = &stmt.where_clause else {
            panic!("expected binary WHERE");
        };
        assert_eq!(*op, BinaryOperator::Or);
        let Expression::Binary { op, .. } = right.as_ref() else {
            panic!("expected AND on the right");
        };
        assert_eq!(*op, BinaryOperator::And);
    }

    #[test]
    fn parenthesized_expression_overrides_precedence() {
        let parsed = sql_parser("SELECT * FROM t WHERE (a = 1 OR b = 2) AND c = 3;").unwrap();
        let Statement::Select(stmt) = &parsed[0] else {
            panic!("expected SELECT");
        };
        let Some(Expression::Binary { op, left, .. }) = &stmt.where_clause else {
            panic!("expected binary WHERE");
        };
        assert_eq!(*op, BinaryOperator::And);
        let Expression::Binary { op, .. } = left.as_ref() else {
            panic!("expected OR on the left");
        };
        assert_eq!(*op, BinaryOperator::Or);
    }

    #[test]
    fn comparison_operator_spellings() {
        for (sql, op) in [
            ("a = 1", BinaryOperator::Eq),
            ("a != 1", BinaryOperator::NotEq),
            ("a <> 1", BinaryOperator::NotEq),
            ("a < 1", BinaryOperator::Lt),
            ("a <= 1", BinaryOperator::LtEq),
            ("a > 1", BinaryOperator::Gt),
            ("a >= 1", BinaryOperator::GtEq),
        ] {
            let parsed = sql_parser(&format!("SELECT * FROM t WHERE {sql};")).unwrap();
            let Statement::Select(stmt) = &parsed[0] else {
                panic!("expected SELECT");
            };
            let Some(Expression::Binary { op: got, .. }) = &stmt.where_clause else {
                panic!("expected binary WHERE for {sql}");
            };
            assert_eq!(*got, op, "operator for {sql}");
        }
    }

    #[test]
    fn update_and_delete() {
        let parsed =
            sql_parser("UPDATE users SET name = 'bob', active = FALSE WHERE id = 1;").unwrap();
        let Statement::Update(stmt) = &parsed[0] else {
            panic!("expected UPDATE");
        };
        assert_eq!(stmt.assignments.len(), 2);
        assert_eq!(stmt.assignments[0].0, "name");
        assert!(stmt.where_clause.is_some());

        let parsed = sql_parser("DELETE FROM users;").unwrap();
        let Statement::Delete(stmt) = &parsed[0] else {
            panic!("expected DELETE");
        };
        assert!(stmt.where_clause.is_none());
    }

    #[test]
    fn transaction_statements() {
        assert_eq!(sql_parser("BEGIN;").unwrap(), vec![Statement::Begin]);
        assert_eq!(sql_parser("COMMIT").unwrap(), vec![Statement::Commit]);
        assert_eq!(sql_parser("ROLLBACK;").unwrap(), vec![Statement::Rollback]);
    }

    #[test]
    fn null_and_bool_literals() {
        let parsed = sql_parser("INSERT INTO t VALUES (NULL, TRUE, FALSE);").unwrap();
        let Statement::Insert(stmt) = &parsed[0] else {
            panic!("expected INSERT");
        };
        assert_eq!(stmt.values[0], Expression::Literal(LiteralValue::Null));
        assert_eq!(
            stmt.values[1],
            Expression::Literal(LiteralValue::Bool(true))
        );
        assert_eq!(
            stmt.values[2],
            Expression::Literal(LiteralValue::Bool(false))
        );
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert!(sql_parser("SELECT * FROM select;").is_err());
        assert!(sql_parser("CREATE TABLE where (id INT);").is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(sql_parser("INVALID SQL").is_err());
        assert!(sql_parser("SELECT FROM;").is_err());
    }

    #[test]
    fn multiple_statements_parse_in_order() {
        let parsed = sql_parser("BEGIN; INSERT INTO t VALUES (1); COMMIT;").unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], Statement::Begin);
        assert!(matches!(parsed[1], Statement::Insert(_)));
        assert_eq!(parsed[2], Statement::Commit);
    }
}
