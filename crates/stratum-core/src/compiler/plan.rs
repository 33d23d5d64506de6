//! Migration planning.
//!
//! A [`MigrationPlan`] is an ordered list of DDL statements grouped in
//! phases. [`MigrationPlan::full`] creates every object of an application and
//! is safe to run repeatedly; [`MigrationPlan::between`] holds only the
//! changes from one compiled application to the next.

use std::collections::HashMap;
use std::fmt;

use tracing::info;

use super::app::CompiledApp;
use super::ddl::{Constraint, ForeignKey, IndexSpec, Statement, ViewSpec};
use super::table::CompiledTable;

/// Phase of a migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationPhase {
    /// Drop views and objects about to be replaced.
    Prepare,
    /// Add tables, columns, constraints, indexes and foreign keys.
    Expand,
    /// Remove tables and columns no longer defined.
    Contract,
    /// Recreate read views.
    Finalize,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationPhase::Prepare => write!(f, "prepare"),
            MigrationPhase::Expand => write!(f, "expand"),
            MigrationPhase::Contract => write!(f, "contract"),
            MigrationPhase::Finalize => write!(f, "finalize"),
        }
    }
}

/// A single step in the migration.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStep {
    /// Phase the step belongs to.
    pub phase: MigrationPhase,
    /// DDL statement.
    pub statement: Statement,
}

/// A complete migration plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    /// Ordered list of migration steps.
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Idempotent DDL creating every object of `app`.
    pub fn full(app: &CompiledApp) -> Self {
        let mut plan = PlanBuilder::default();
        for table in app.tables() {
            plan.create_table(table);
        }
        for table in app.tables() {
            for fk in &table.foreign_keys {
                plan.expand_late(Statement::AddForeignKey(fk.clone()));
            }
            if let Some(view) = &table.view {
                plan.finalize(Statement::CreateView(view.clone()));
            }
        }
        plan.build()
    }

    /// Delta turning `previous` into `next`; empty when nothing changed.
    ///
    /// Tables, columns, constraints, indexes and views are matched by name,
    /// so a rename shows up as a drop followed by an add.
    pub fn between(previous: &CompiledApp, next: &CompiledApp) -> Self {
        let mut plan = PlanBuilder::default();

        for table in next.tables() {
            match previous.table_by_name(table.name()) {
                None => {
                    plan.create_table(table);
                    for fk in &table.foreign_keys {
                        plan.expand_late(Statement::AddForeignKey(fk.clone()));
                    }
                }
                Some(old) => plan.alter_table(old, table),
            }
        }
        for old in previous.tables() {
            if next.table_by_name(old.name()).is_none() {
                plan.contract(Statement::DropTable {
                    table: old.name().to_string(),
                });
            }
        }

        // Views depend on columns of their own and related tables: rebuild
        // them all as soon as anything structural moves.
        let old_views = views(previous);
        let new_views = views(next);
        if plan.is_structural() {
            for view in old_views.values() {
                plan.prepare(Statement::DropView {
                    name: view.name.clone(),
                });
            }
            for view in next.tables().iter().filter_map(|t| t.view.as_ref()) {
                plan.finalize(Statement::CreateView(view.clone()));
            }
        } else {
            for (name, view) in &old_views {
                if new_views.get(name) != Some(view) {
                    plan.prepare(Statement::DropView { name: name.to_string() });
                }
            }
            for view in next.tables().iter().filter_map(|t| t.view.as_ref()) {
                if old_views.get(view.name.as_str()) != Some(&view) {
                    plan.finalize(Statement::CreateView(view.clone()));
                }
            }
        }

        let plan = plan.build();
        if !plan.is_empty() {
            info!(
                from = %previous.name(),
                to = %next.name(),
                steps = plan.step_count(),
                "migration planned"
            );
        }
        plan
    }

    /// Get the number of steps in the plan.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Check if this plan is empty (no steps).
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Get steps of a specific phase.
    pub fn steps_in_phase(&self, phase: MigrationPhase) -> Vec<&MigrationStep> {
        self.steps.iter().filter(|s| s.phase == phase).collect()
    }

    /// Statements in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.steps.iter().map(|s| &s.statement)
    }

    /// The whole plan as one SQL script.
    pub fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = "";
        for statement in self.statements() {
            write!(f, "{s}{statement}")?;
            s = "\n\n";
        }
        Ok(())
    }
}

fn views(app: &CompiledApp) -> HashMap<&str, &ViewSpec> {
    app.tables()
        .iter()
        .filter_map(|t| t.view.as_ref())
        .map(|v| (v.name.as_str(), v))
        .collect()
}

#[derive(Default)]
struct PlanBuilder {
    prepare: Vec<Statement>,
    expand: Vec<Statement>,
    expand_late: Vec<Statement>,
    contract: Vec<Statement>,
    finalize: Vec<Statement>,
}

impl PlanBuilder {
    fn prepare(&mut self, statement: Statement) {
        self.prepare.push(statement);
    }

    fn expand(&mut self, statement: Statement) {
        self.expand.push(statement);
    }

    /// Expand step that must run after every table exists.
    fn expand_late(&mut self, statement: Statement) {
        self.expand_late.push(statement);
    }

    fn contract(&mut self, statement: Statement) {
        self.contract.push(statement);
    }

    fn finalize(&mut self, statement: Statement) {
        self.finalize.push(statement);
    }

    fn is_structural(&self) -> bool {
        !(self.prepare.is_empty()
            && self.expand.is_empty()
            && self.expand_late.is_empty()
            && self.contract.is_empty())
    }

    fn create_table(&mut self, table: &CompiledTable) {
        self.expand(Statement::CreateTable {
            table: table.name().to_string(),
            columns: table.columns.clone(),
            constraints: table.constraints.clone(),
            if_not_exists: true,
        });
        for index in &table.indexes {
            self.expand(create_index(index));
        }
    }

    fn alter_table(&mut self, old: &CompiledTable, new: &CompiledTable) {
        let table = new.name().to_string();

        let old_columns: HashMap<&str, _> =
            old.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        for column in &new.columns {
            match old_columns.get(column.name.as_str()) {
                None => self.expand(Statement::AddColumn {
                    table: table.clone(),
                    column: column.clone(),
                }),
                Some(previous) => {
                    if previous.sql_type != column.sql_type {
                        self.expand(Statement::AlterColumnType {
                            table: table.clone(),
                            column: column.name.clone(),
                            sql_type: column.sql_type.clone(),
                        });
                    }
                    if previous.default != column.default {
                        self.expand(Statement::AlterColumnDefault {
                            table: table.clone(),
                            column: column.name.clone(),
                            default: column.default.clone(),
                        });
                    }
                    if previous.nullable != column.nullable {
                        self.expand(Statement::AlterColumnNullability {
                            table: table.clone(),
                            column: column.name.clone(),
                            nullable: column.nullable,
                        });
                    }
                }
            }
        }
        for column in &old.columns {
            if new.column(&column.name).is_none() {
                self.contract(Statement::DropColumn {
                    table: table.clone(),
                    column: column.name.clone(),
                });
            }
        }

        let (dropped, added) = diff_by_name(&old.constraints, &new.constraints, |c| &c.name);
        for constraint in dropped {
            self.prepare(Statement::DropConstraint {
                table: table.clone(),
                name: constraint.name.clone(),
            });
        }
        for constraint in added {
            self.expand_late(Statement::AddConstraint {
                table: table.clone(),
                constraint: Constraint::clone(constraint),
            });
        }

        let (dropped, added) = diff_by_name(&old.indexes, &new.indexes, |i| &i.name);
        for index in dropped {
            self.prepare(Statement::DropIndex {
                name: index.name.clone(),
            });
        }
        for index in added {
            self.expand_late(create_index(index));
        }

        let (dropped, added) = diff_by_name(&old.foreign_keys, &new.foreign_keys, |fk| &fk.name);
        for fk in dropped {
            self.prepare(Statement::DropConstraint {
                table: table.clone(),
                name: fk.name.clone(),
            });
        }
        for fk in added {
            self.expand_late(Statement::AddForeignKey(ForeignKey::clone(fk)));
        }
    }

    fn build(self) -> MigrationPlan {
        let phases = [
            (MigrationPhase::Prepare, self.prepare),
            (MigrationPhase::Expand, self.expand),
            (MigrationPhase::Expand, self.expand_late),
            (MigrationPhase::Contract, self.contract),
            (MigrationPhase::Finalize, self.finalize),
        ];
        let steps = phases
            .into_iter()
            .flat_map(|(phase, statements)| {
                statements
                    .into_iter()
                    .map(move |statement| MigrationStep { phase, statement })
            })
            .collect();
        MigrationPlan { steps }
    }
}

fn create_index(index: &IndexSpec) -> Statement {
    Statement::CreateIndex {
        index: index.clone(),
        if_not_exists: true,
    }
}

/// Objects to drop and to add; a changed object appears in both.
fn diff_by_name<'a, T: PartialEq>(
    old: &'a [T],
    new: &'a [T],
    name: impl Fn(&T) -> &String,
) -> (Vec<&'a T>, Vec<&'a T>) {
    let old_by_name: HashMap<&String, &T> = old.iter().map(|o| (name(o), o)).collect();
    let new_by_name: HashMap<&String, &T> = new.iter().map(|n| (name(n), n)).collect();
    let dropped = old
        .iter()
        .filter(|o| new_by_name.get(name(o)) != Some(o))
        .collect();
    let added = new
        .iter()
        .filter(|n| old_by_name.get(name(n)) != Some(n))
        .collect();
    (dropped, added)
}
