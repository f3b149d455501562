//! Statement execution: parses SQL, routes transaction control, and runs
//! DDL/DML against the storage engine under MVCC visibility.

use strata::btree::{encode_key, BTree, Rid, BTREE_KEY_SIZE};
use strata::catalog::Catalog;
use strata::datum::{deserialize_row, serialize_row, Column, Schema, Value, ValueType};
use strata::transaction::UpdateCheck;
use strata::tuple::{encode_row_id, Tuple};
use strata::TxnId;

use crate::engine::Engine;
use crate::errors::ExecutionError;
use crate::eval::{check_column_value, evaluate, evaluate_standalone, where_matches};
use crate::parser::{
    sql_parser, CreateTableStatement, DataType, DeleteStatement, InsertStatement, SelectList,
    SelectStatement, Statement, UpdateStatement,
};
use crate::types::QueryResult;

impl Engine {
    /// Parses and runs one SQL string. Statements outside BEGIN/COMMIT run
    /// in their own transaction: committed on success, rolled back on
    /// failure, so a failed auto-committed statement leaves nothing behind.
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult, ExecutionError> {
        let statements = sql_parser(sql)
            .map_err(|errors| ExecutionError::Parse(format!("{errors:?}")))?;
        if statements.is_empty() {
            return Err(ExecutionError::Parse("empty statement".to_string()));
        }

        let mut last = QueryResult::default();
        for statement in statements {
            last = self.run_statement(statement)?;
        }
        Ok(last)
    }

    fn run_statement(&mut self, statement: Statement) -> Result<QueryResult, ExecutionError> {
        match statement {
            Statement::Begin => {
                if self.current_txn.is_some() {
                    return Err(ExecutionError::TransactionInProgress);
                }
                let txn_id = self.tm.begin()?;
                self.current_txn = Some(txn_id);
                Ok(QueryResult::message(format!("BEGIN (txn {txn_id})")))
            }
            Statement::Commit => {
                let txn_id = self.current_txn.ok_or(ExecutionError::NoActiveTransaction)?;
                self.tm.commit(txn_id)?;
                self.current_txn = None;
                Ok(QueryResult::message(format!("COMMIT (txn {txn_id})")))
            }
            Statement::Rollback => {
                let txn_id = self.current_txn.ok_or(ExecutionError::NoActiveTransaction)?;
                self.tm.rollback(txn_id)?;
                self.current_txn = None;
                Ok(QueryResult::message(format!("ROLLBACK (txn {txn_id})")))
            }
            statement => {
                let (txn_id, auto_commit) = match self.current_txn {
                    Some(txn_id) => (txn_id, false),
                    None => (self.tm.begin()?, true),
                };

                let result = self.run_in_txn(&statement, txn_id);
                if auto_commit {
                    match &result {
                        Ok(_) => self.tm.commit(txn_id)?,
                        Err(_) => {
                            let _ = self.tm.rollback(txn_id);
                        }
                    }
                }
                result
            }
        }
    }

    fn run_in_txn(
        &mut self,
        statement: &Statement,
        txn_id: TxnId,
    ) -> Result<QueryResult, ExecutionError> {
        match statement {
            Statement::CreateTable(stmt) => self.execute_create_table(stmt),
            Statement::Insert(stmt) => self.execute_insert(stmt, txn_id),
            Statement::Select(stmt) => self.execute_select(stmt, txn_id),
            Statement::Update(stmt) => self.execute_update(stmt, txn_id),
            Statement::Delete(stmt) => self.execute_delete(stmt, txn_id),
            Statement::Begin | Statement::Commit | Statement::Rollback => {
                unreachable!("transaction control handled above")
            }
        }
    }

    fn execute_create_table(
        &mut self,
        stmt: &CreateTableStatement,
    ) -> Result<QueryResult, ExecutionError> {
        if self.catalog.table_id(&stmt.table_name).is_some() {
            return Err(ExecutionError::TableExists(stmt.table_name.clone()));
        }

        let schema = Schema {
            table_name: stmt.table_name.clone(),
            columns: stmt
                .columns
                .iter()
                .map(|col| Column {
                    name: col.name.clone(),
                    ty: match col.data_type {
                        DataType::Int => ValueType::Int,
                        DataType::Text => ValueType::Text,
                        DataType::Bool => ValueType::Bool,
                    },
                    nullable: !col.not_null,
                })
                .collect(),
        };

        let table_id = self.catalog.create_table(schema)?;
        // DDL durability comes from flushing, not the WAL: the catalog page
        // and the table's first heap page go to disk now.
        self.bpm.flush_all()?;
        Ok(QueryResult::message(format!(
            "CREATE TABLE {} (id={})",
            stmt.table_name, table_id
        )))
    }

    fn execute_insert(
        &mut self,
        stmt: &InsertStatement,
        txn_id: TxnId,
    ) -> Result<QueryResult, ExecutionError> {
        let (table_id, schema) = self.table_schema(&stmt.table_name)?;

        let column_names: Vec<String> = match &stmt.columns {
            Some(names) => names.clone(),
            None => schema.columns.iter().map(|c| c.name.clone()).collect(),
        };
        if column_names.len() != stmt.values.len() {
            return Err(ExecutionError::ColumnCountMismatch {
                expected: column_names.len(),
                got: stmt.values.len(),
            });
        }

        let mut values = vec![Value::Null; schema.columns.len()];
        for (name, expr) in column_names.iter().zip(&stmt.values) {
            let idx = schema
                .column_index(name)
                .ok_or_else(|| ExecutionError::ColumnNotFound(name.clone()))?;
            values[idx] = evaluate_standalone(expr)?;
        }
        for (value, column) in values.iter().zip(&schema.columns) {
            check_column_value(value, column)?;
        }

        let cid = self.tm.next_command_id(txn_id)?;
        let mut tuple = Tuple {
            xmin: txn_id,
            xmax: 0,
            cid,
            table_id,
            row_id: 0,
            data: serialize_row(&values, &schema)?,
        };

        let heap = self
            .catalog
            .heap_mut(table_id)
            .expect("table id implies heap");
        let (page_id, slot_num) = heap.insert(&mut tuple)?;

        let lsn = self.wal.log_insert(
            txn_id,
            table_id,
            tuple.row_id,
            page_id,
            slot_num,
            tuple.serialize(),
        )?;
        self.bpm.set_page_lsn(page_id, lsn);

        index_insert(
            &mut self.indexes,
            &mut self.catalog,
            table_id,
            &values,
            &schema,
            Rid {
                page_id,
                slot_num,
                table_id,
            },
        )?;

        Ok(QueryResult::message(format!(
            "INSERT 1 (page={page_id}, slot={slot_num})"
        )))
    }

    fn execute_select(
        &mut self,
        stmt: &SelectStatement,
        txn_id: TxnId,
    ) -> Result<QueryResult, ExecutionError> {
        let (table_id, schema) = self.table_schema(&stmt.table_name)?;
        let snapshot = self
            .tm
            .snapshot_of(txn_id)
            .ok_or(strata::StorageError::TransactionNotRunning(txn_id))?;

        let output_indices: Vec<usize> = match &stmt.select_list {
            SelectList::Wildcard => (0..schema.columns.len()).collect(),
            SelectList::Columns(names) => names
                .iter()
                .map(|name| {
                    schema
                        .column_index(name)
                        .ok_or_else(|| ExecutionError::ColumnNotFound(name.clone()))
                })
                .collect::<Result<_, _>>()?,
        };
        let columns: Vec<String> = output_indices
            .iter()
            .map(|idx| schema.columns[*idx].name.clone())
            .collect();

        let tuples = self
            .catalog
            .heap(table_id)
            .expect("table id implies heap")
            .scan()?;

        let mut rows = Vec::new();
        for entry in &tuples {
            if !snapshot.is_visible(&entry.tuple) {
                continue;
            }
            let values = deserialize_row(&entry.tuple.data, &schema)?;
            if !where_matches(stmt.where_clause.as_ref(), &schema, &values)? {
                continue;
            }
            rows.push(output_indices.iter().map(|idx| values[*idx].clone()).collect());
        }

        let message = format!("SELECT {} rows", rows.len());
        Ok(QueryResult {
            columns,
            rows,
            message,
        })
    }

    fn execute_update(
        &mut self,
        stmt: &UpdateStatement,
        txn_id: TxnId,
    ) -> Result<QueryResult, ExecutionError> {
        let (table_id, schema) = self.table_schema(&stmt.table_name)?;
        let snapshot = self
            .tm
            .snapshot_of(txn_id)
            .ok_or(strata::StorageError::TransactionNotRunning(txn_id))?;
        let cid = self.tm.next_command_id(txn_id)?;

        let assignments: Vec<(usize, &crate::parser::Expression)> = stmt
            .assignments
            .iter()
            .map(|(name, expr)| {
                schema
                    .column_index(name)
                    .map(|idx| (idx, expr))
                    .ok_or_else(|| ExecutionError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<_, _>>()?;

        let tuples = self
            .catalog
            .heap(table_id)
            .expect("table id implies heap")
            .scan()?;

        let mut updated = 0u64;
        for entry in &tuples {
            if !snapshot.is_visible(&entry.tuple) {
                continue;
            }
            let old_values = deserialize_row(&entry.tuple.data, &schema)?;
            if !where_matches(stmt.where_clause.as_ref(), &schema, &old_values)? {
                continue;
            }
            match snapshot.check_update(&entry.tuple, txn_id) {
                UpdateCheck::Invisible => continue,
                UpdateCheck::Conflict(other) => {
                    return Err(ExecutionError::WriteConflict(other));
                }
                UpdateCheck::Updatable => {}
            }

            let mut new_values = old_values.clone();
            for (idx, expr) in &assignments {
                new_values[*idx] = evaluate(expr, &schema, &old_values)?;
                check_column_value(&new_values[*idx], &schema.columns[*idx])?;
            }

            // Two heap operations: mark the old version dead in place, then
            // write the new version wherever it fits.
            let before_image = entry.tuple.serialize();
            let mut old_version = entry.tuple.clone();
            old_version.xmax = txn_id;
            let heap = self
                .catalog
                .heap_mut(table_id)
                .expect("table id implies heap");
            heap.update(entry.page_id, entry.slot_num, &old_version)?;

            let mut new_version = Tuple {
                xmin: txn_id,
                xmax: 0,
                cid,
                table_id,
                row_id: 0,
                data: serialize_row(&new_values, &schema)?,
            };
            let (new_page, new_slot) = heap.insert(&mut new_version)?;

            // The record carries the old location in row_id and the new one
            // in page_id/slot_num so recovery can redo or undo both halves.
            let lsn = self.wal.log_update(
                txn_id,
                table_id,
                encode_row_id(entry.page_id, entry.slot_num),
                new_page,
                new_slot,
                before_image,
                new_version.serialize(),
            )?;
            self.bpm.set_page_lsn(new_page, lsn);
            self.bpm.set_page_lsn(entry.page_id, lsn);

            index_insert(
                &mut self.indexes,
                &mut self.catalog,
                table_id,
                &new_values,
                &schema,
                Rid {
                    page_id: new_page,
                    slot_num: new_slot,
                    table_id,
                },
            )?;

            updated += 1;
        }

        Ok(QueryResult::message(format!("UPDATE {updated}")))
    }

    fn execute_delete(
        &mut self,
        stmt: &DeleteStatement,
        txn_id: TxnId,
    ) -> Result<QueryResult, ExecutionError> {
        let (table_id, schema) = self.table_schema(&stmt.table_name)?;
        let snapshot = self
            .tm
            .snapshot_of(txn_id)
            .ok_or(strata::StorageError::TransactionNotRunning(txn_id))?;

        let tuples = self
            .catalog
            .heap(table_id)
            .expect("table id implies heap")
            .scan()?;

        let mut deleted = 0u64;
        for entry in &tuples {
            if !snapshot.is_visible(&entry.tuple) {
                continue;
            }
            let values = deserialize_row(&entry.tuple.data, &schema)?;
            if !where_matches(stmt.where_clause.as_ref(), &schema, &values)? {
                continue;
            }
            match snapshot.check_update(&entry.tuple, txn_id) {
                UpdateCheck::Invisible => continue,
                UpdateCheck::Conflict(other) => {
                    return Err(ExecutionError::WriteConflict(other));
                }
                UpdateCheck::Updatable => {}
            }

            let before_image = entry.tuple.serialize();
            let mut dead = entry.tuple.clone();
            dead.xmax = txn_id;
            self.catalog
                .heap(table_id)
                .expect("table id implies heap")
                .update(entry.page_id, entry.slot_num, &dead)?;

            let lsn = self.wal.log_delete(
                txn_id,
                table_id,
                entry.tuple.row_id,
                entry.page_id,
                entry.slot_num,
                before_image,
            )?;
            self.bpm.set_page_lsn(entry.page_id, lsn);

            deleted += 1;
        }

        Ok(QueryResult::message(format!("DELETE {deleted}")))
    }

    fn table_schema(&self, table_name: &str) -> Result<(u32, Schema), ExecutionError> {
        let table_id = self
            .catalog
            .table_id(table_name)
            .ok_or_else(|| ExecutionError::TableNotFound(table_name.to_string()))?;
        let schema = self
            .catalog
            .schema(table_name)
            .expect("table id implies schema")
            .clone();
        Ok((table_id, schema))
    }
}

/// Adds the indexed column's key for a freshly written version and keeps
/// the persisted root in step with any splits. Old versions keep their
/// entries until vacuum rebuilds the tree.
fn index_insert(
    indexes: &mut std::collections::HashMap<u32, BTree>,
    catalog: &mut Catalog,
    table_id: u32,
    values: &[Value],
    schema: &Schema,
    rid: Rid,
) -> Result<(), ExecutionError> {
    let Some(btree) = indexes.get_mut(&table_id) else {
        return Ok(());
    };
    let Some(column) = catalog.index_column(table_id).map(str::to_string) else {
        return Ok(());
    };
    let Some(column_idx) = schema.column_index(&column) else {
        return Ok(());
    };
    let value = &values[column_idx];
    if value.is_null() {
        return Ok(());
    }

    btree.insert(&encode_key(value, BTREE_KEY_SIZE), rid)?;
    if catalog.index_root(table_id) != Some(btree.root_page_id()) {
        catalog.set_index(table_id, btree.root_page_id(), &column)?;
    }
    Ok(())
}
