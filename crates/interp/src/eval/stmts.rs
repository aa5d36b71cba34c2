//! Statement evaluation
//!
//! Statement lists hoist declarations so source order is immaterial,
//! resolve `goto` labels within their own item list, and guarantee
//! `Dispose` for `using var` acquisitions on every exit path. Control
//! structures consume the signals they own and pass the rest through.

use super::{Flow, Interp};
use crate::ast::{CaseLabel, CatchClause, Node, SwitchSection, TypeRef};
use sable_core::error::{ErrorKind, RunResult, RuntimeError, err};
use sable_core::kind::Kind;
use sable_runtime::value::Value;
use sable_runtime::{arrays, coerce, dict, display, strings, tuples};

impl Interp {
    pub fn eval_stmt(&mut self, node: &Node) -> RunResult<Flow> {
        self.check()?;
        match node {
            Node::Empty | Node::Label(_) => Ok(Flow::Normal),
            Node::StatementList(items) => self.eval_items(items),
            Node::Block(items) => {
                self.mem.enter_scope()?;
                let flow = self.eval_items(items);
                let exit = self.mem.exit_scope();
                let flow = flow?;
                exit?;
                Ok(flow)
            }
            Node::VariableDecl { ty, name, init } => {
                self.eval_variable_decl(ty, name, init.as_deref())?;
                Ok(Flow::Normal)
            }
            Node::Deconstruct { names, declare, value } => {
                self.eval_deconstruct(names, *declare, value)?;
                Ok(Flow::Normal)
            }
            Node::If { cond, then, other } => {
                if self.eval_bool(cond)? {
                    self.eval_stmt(then)
                } else if let Some(other) = other {
                    self.eval_stmt(other)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Node::While { cond, body } => {
                while self.eval_bool(cond)? {
                    match self.eval_stmt(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            Node::DoWhile { body, cond } => {
                loop {
                    match self.eval_stmt(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        other => return Ok(other),
                    }
                    if !self.eval_bool(cond)? {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Node::For { init, cond, step, body } => {
                self.mem.enter_scope()?;
                let flow = self.eval_for(init.as_deref(), cond.as_deref(), step.as_deref(), body);
                let exit = self.mem.exit_scope();
                let flow = flow?;
                exit?;
                Ok(flow)
            }
            Node::Foreach { ty, var, iterable, body } => self.eval_foreach(ty, var, iterable, body),
            Node::Switch { subject, sections } => self.eval_switch(subject, sections),
            Node::Try { body, catches, finally } => {
                self.eval_try(body, catches, finally.as_deref())
            }
            Node::Throw(expr) => Err(self.eval_throw(expr.as_deref())?),
            Node::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval_expr(e)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Node::Break => Ok(Flow::Break),
            Node::Continue => Ok(Flow::Continue),
            Node::Goto(label) => Ok(Flow::Goto(label.clone())),
            Node::GotoCase(constant) => {
                let value = match constant {
                    Some(c) => Some(self.const_value(c)?),
                    None => None,
                };
                Ok(Flow::GotoCase(value))
            }
            Node::Namespace { name, body } => self.eval_namespace(name, body),
            Node::UsingImport(name) => {
                if !self.imports.contains(name) {
                    self.imports.push(name.clone());
                }
                Ok(Flow::Normal)
            }
            Node::UsingScoped { decl, body } => self.eval_using_scoped(decl, body.as_deref()),
            // Hoisted declarations are no-ops during sequential execution
            n if Interp::is_declaration(n) => Ok(Flow::Normal),
            // Any expression in statement position
            expr => {
                self.eval_expr(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    /// Run a statement list: hoist declarations, execute sequentially,
    /// resolve `goto` labels locally and dispose `using var`
    /// acquisitions on the way out.
    fn eval_items(&mut self, items: &[Node]) -> RunResult<Flow> {
        self.hoist_declarations(items)?;
        let mut disposables: Vec<String> = Vec::new();
        let mut i = 0usize;
        let flow = loop {
            if i >= items.len() {
                break Ok(Flow::Normal);
            }
            let item = &items[i];
            if let Node::UsingScoped { decl, body: None } = item {
                match self.eval_stmt(decl) {
                    Ok(_) => {
                        if let Node::VariableDecl { name, .. } = decl.as_ref() {
                            disposables.push(name.clone());
                        }
                        i += 1;
                        continue;
                    }
                    Err(e) => break Err(e),
                }
            }
            match self.eval_stmt(item) {
                Ok(Flow::Goto(label)) => {
                    match items.iter().position(
                        |n| matches!(n, Node::Label(l) if *l == label),
                    ) {
                        Some(idx) => {
                            self.check()?;
                            i = idx + 1;
                        }
                        None => break Ok(Flow::Goto(label)),
                    }
                }
                Ok(Flow::Normal) => i += 1,
                other => break other,
            }
        };
        // Dispose in reverse on every exit path
        let mut dispose_err: Option<RuntimeError> = None;
        for name in disposables.iter().rev() {
            if let Err(e) = self.dispose_variable(name) {
                dispose_err.get_or_insert(e);
            }
        }
        let flow = flow?;
        if let Some(e) = dispose_err {
            return Err(e);
        }
        Ok(flow)
    }

    fn dispose_variable(&mut self, name: &str) -> RunResult<()> {
        let Some(var) = self.mem.scopes.lookup(name) else {
            return Ok(());
        };
        let value = Value::read_cell(&self.mem, var.addr, var.kind)?;
        if value.is_null() {
            return Ok(());
        }
        self.call_dispose(value)
    }

    pub(super) fn call_dispose(&mut self, value: Value) -> RunResult<()> {
        let lookup = |n: &str| {
            if self.funcs.contains(n) || self.natives.contains(n) {
                Some(())
            } else {
                None
            }
        };
        let Some((full, _)) =
            super::resolve_name(&self.namespace, &self.imports, "Dispose", lookup)
        else {
            return Err(err(
                ErrorKind::NameError,
                "no 'Dispose' binding for a scoped acquisition",
            ));
        };
        let args = vec![(None, value)];
        if self.funcs.contains(&full) {
            self.call_user(&full, &[], &args)?;
        } else {
            self.call_native(&full, &args)?;
        }
        Ok(())
    }

    pub(super) fn eval_bool(&mut self, node: &Node) -> RunResult<bool> {
        let v = self.eval_expr(node)?;
        match coerce::unwrap_nullable(&self.mem, v)? {
            Value::Bool(b) => Ok(b),
            other => Err(err(
                ErrorKind::TypeMismatch,
                format!("condition must be bool, got {}", other.kind()),
            )),
        }
    }

    pub(super) fn eval_variable_decl(
        &mut self,
        ty: &TypeRef,
        name: &str,
        init: Option<&Node>,
    ) -> RunResult<Value> {
        let init_value = match init {
            Some(node) => Some(self.eval_expr(node)?),
            None => None,
        };
        let declared = match ty {
            TypeRef::Var => match &init_value {
                Some(v) if !v.is_null() => v.kind(),
                _ => Kind::Object,
            },
            other => self.kind_of_type(other)?,
        };
        // The slot may hold stale stack bytes from an exited scope
        let pin = init_value.as_ref().and_then(|v| self.pin_tmp(v));
        let var = self.mem.scopes.declare(name, declared)?;
        self.unpin_tmp(pin);
        if declared.is_reference() {
            self.mem.arena.write_i32(var.addr, sable_core::NULL_PTR)?;
        } else {
            self.mem.arena.fill(var.addr, var.size, 0)?;
        }
        let value = match init_value {
            Some(v) if !v.is_null() => {
                let cast = coerce::cast(&mut self.mem, v, declared)?;
                cast.write_cell(&mut self.mem, var.addr, declared)?;
                cast
            }
            Some(v) => v,
            None => Value::Null,
        };
        Ok(value)
    }

    fn eval_deconstruct(&mut self, names: &[String], _declare: bool, value: &Node) -> RunResult<()> {
        let rhs = self.eval_expr(value)?;
        let Value::Tuple(p) = rhs else {
            return Err(err(
                ErrorKind::TypeMismatch,
                format!("cannot deconstruct {}", rhs.kind()),
            ));
        };
        let pin = self.pin_tmp(&rhs);
        let items = tuples::read_tuple(&self.mem, p)?;
        let result = (|| {
            if items.len() != names.len() {
                return Err(err(
                    ErrorKind::TypeMismatch,
                    format!("tuple has {} elements, {} names given", items.len(), names.len()),
                ));
            }
            for (name, item) in names.iter().zip(&items) {
                if name == "_" {
                    continue;
                }
                match self.mem.scopes.lookup(name) {
                    // Existing variables keep their declared kind
                    Some(var) => {
                        let cast = coerce::cast(&mut self.mem, item.value, var.kind)?;
                        cast.write_cell(&mut self.mem, var.addr, var.kind)?;
                    }
                    None => {
                        let kind = if item.value.is_null() {
                            Kind::Object
                        } else {
                            item.value.kind()
                        };
                        let var = self.mem.scopes.declare(name, kind)?;
                        item.value.write_cell(&mut self.mem, var.addr, kind)?;
                    }
                }
            }
            Ok(())
        })();
        self.unpin_tmp(pin);
        result
    }

    fn eval_for(
        &mut self,
        init: Option<&Node>,
        cond: Option<&Node>,
        step: Option<&Node>,
        body: &Node,
    ) -> RunResult<Flow> {
        if let Some(init) = init {
            self.eval_stmt(init)?;
        }
        loop {
            if let Some(cond) = cond
                && !self.eval_bool(cond)?
            {
                return Ok(Flow::Normal);
            }
            match self.eval_stmt(body)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Normal | Flow::Continue => {}
                other => return Ok(other),
            }
            if let Some(step) = step {
                self.eval_expr(step)?;
            }
        }
    }

    fn eval_foreach(
        &mut self,
        ty: &TypeRef,
        var_name: &str,
        iterable: &Node,
        body: &Node,
    ) -> RunResult<Flow> {
        let source = self.eval_expr(iterable)?;
        if source.is_null() {
            return Err(err(ErrorKind::InvalidPointer, "foreach over null"));
        }
        let pin = self.pin_tmp(&source);
        let result = self.eval_foreach_inner(ty, var_name, source, body);
        self.unpin_tmp(pin);
        result
    }

    fn eval_foreach_inner(
        &mut self,
        ty: &TypeRef,
        var_name: &str,
        source: Value,
        body: &Node,
    ) -> RunResult<Flow> {
        enum Iter {
            Array(sable_core::HeapPtr, usize),
            Chars(Vec<u16>),
            Entries(Vec<(Value, Value)>),
        }
        let (iter, elem_kind) = match source {
            Value::Array(p) => (
                Iter::Array(p, arrays::len(&self.mem, p)?),
                arrays::elem_kind(&self.mem, p)?,
            ),
            Value::Str(p) => (
                Iter::Chars(strings::read_string(&self.mem, p)?.encode_utf16().collect()),
                Kind::Char,
            ),
            Value::Dict(p) => (Iter::Entries(dict::entries(&self.mem, p)?), Kind::Tuple),
            other => {
                return Err(err(
                    ErrorKind::TypeMismatch,
                    format!("cannot iterate {}", other.kind()),
                ));
            }
        };
        let declared = match ty {
            TypeRef::Var => elem_kind,
            other => self.kind_of_type(other)?,
        };
        self.mem.enter_scope()?;
        let flow = (|| -> RunResult<Flow> {
            let var = self.mem.scopes.declare(var_name, declared)?;
            if declared.is_reference() {
                self.mem.arena.write_i32(var.addr, sable_core::NULL_PTR)?;
            }
            let count = match &iter {
                Iter::Array(_, n) => *n,
                Iter::Chars(units) => units.len(),
                Iter::Entries(entries) => entries.len(),
            };
            for i in 0..count {
                self.check()?;
                let item = match &iter {
                    Iter::Array(p, _) => arrays::get(&self.mem, *p, i as i64, false)?,
                    Iter::Chars(units) => Value::Char(units[i]),
                    Iter::Entries(entries) => {
                        let (k, v) = entries[i];
                        Value::Tuple(tuples::alloc_tuple(
                            &mut self.mem,
                            &[tuples::TupleItem::positional(k), tuples::TupleItem::positional(v)],
                        )?)
                    }
                };
                let item = if item.is_null() {
                    item
                } else {
                    coerce::cast(&mut self.mem, item, declared)?
                };
                item.write_cell(&mut self.mem, var.addr, declared)?;
                match self.eval_stmt(body)? {
                    Flow::Break => break,
                    Flow::Normal | Flow::Continue => {}
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        })();
        let exit = self.mem.exit_scope();
        let flow = flow?;
        exit?;
        Ok(flow)
    }

    fn eval_switch(&mut self, subject: &Node, sections: &[SwitchSection]) -> RunResult<Flow> {
        let value = self.eval_expr(subject)?;
        let pin = self.pin_tmp(&value);
        self.mem.enter_scope()?;
        let flow = self.eval_switch_inner(value, sections);
        let exit = self.mem.exit_scope();
        self.unpin_tmp(pin);
        let flow = flow?;
        exit?;
        Ok(flow)
    }

    fn eval_switch_inner(&mut self, value: Value, sections: &[SwitchSection]) -> RunResult<Flow> {
        let mut target = self.find_section(value, sections)?;
        if target.is_none() {
            target = sections
                .iter()
                .position(|s| s.labels.iter().any(|l| matches!(l, CaseLabel::Default)));
        }
        let Some(mut index) = target else {
            return Ok(Flow::Normal);
        };
        // Fall-through exists only through `goto case`
        loop {
            self.check()?;
            match self.eval_items(&sections[index].body)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::GotoCase(target) => {
                    index = self.find_goto_case(&target, sections)?;
                }
                Flow::Normal => return Ok(Flow::Normal),
                other => return Ok(other),
            }
        }
    }

    fn find_section(&mut self, value: Value, sections: &[SwitchSection]) -> RunResult<Option<usize>> {
        for (i, section) in sections.iter().enumerate() {
            for label in &section.labels {
                if let CaseLabel::Pattern { pattern, guard } = label
                    && self.match_pattern(pattern, value)?
                {
                    let pass = match guard {
                        Some(g) => self.eval_bool(g)?,
                        None => true,
                    };
                    if pass {
                        return Ok(Some(i));
                    }
                }
            }
        }
        Ok(None)
    }

    fn find_goto_case(
        &mut self,
        target: &Option<Value>,
        sections: &[SwitchSection],
    ) -> RunResult<usize> {
        match target {
            None => sections
                .iter()
                .position(|s| s.labels.iter().any(|l| matches!(l, CaseLabel::Default)))
                .ok_or_else(|| err(ErrorKind::NoMatch, "goto default with no default case")),
            Some(v) => {
                for (i, section) in sections.iter().enumerate() {
                    for label in &section.labels {
                        if let CaseLabel::Pattern {
                            pattern: crate::ast::Pattern::Constant(c),
                            guard: None,
                        } = label
                        {
                            let cv = self.eval_expr(c)?;
                            if sable_runtime::arith::equals(&self.mem, cv, *v)? {
                                return Ok(i);
                            }
                        }
                    }
                }
                Err(err(ErrorKind::NoMatch, "goto case matches no case label"))
            }
        }
    }

    fn eval_try(
        &mut self,
        body: &Node,
        catches: &[CatchClause],
        finally: Option<&Node>,
    ) -> RunResult<Flow> {
        let mut outcome = self.eval_stmt(body);
        if let Err(e) = &outcome
            && !e.is_fatal()
        {
            let error = e.clone();
            if let Some(clause) = catches.iter().find(|c| catch_matches(c, &error)) {
                outcome = self.run_catch(clause, error);
            }
        }
        if let Some(f) = finally {
            match self.eval_stmt(f) {
                Ok(Flow::Normal) => {}
                // A signal or failure in finally supersedes the body's
                Ok(other) => return Ok(other),
                Err(e) => return Err(e),
            }
        }
        outcome
    }

    fn run_catch(&mut self, clause: &CatchClause, error: RuntimeError) -> RunResult<Flow> {
        self.mem.enter_scope()?;
        let saved = self.current_catch.replace(error.clone());
        let flow = (|| {
            if let Some(binding) = &clause.binding {
                let var = self.mem.scopes.declare(binding, Kind::Str)?;
                let msg = strings::alloc_string(&mut self.mem, &error.message)?;
                self.mem.arena.write_i32(var.addr, msg)?;
            }
            self.eval_stmt(&clause.body)
        })();
        self.current_catch = saved;
        let exit = self.mem.exit_scope();
        let flow = flow?;
        exit?;
        Ok(flow)
    }

    fn eval_throw(&mut self, expr: Option<&Node>) -> RunResult<RuntimeError> {
        match expr {
            None => self.current_catch.clone().ok_or_else(|| {
                err(ErrorKind::SandboxViolation, "rethrow outside a catch block")
            }),
            Some(node) => {
                let value = self.eval_expr(node)?;
                let message = display::to_display(&self.mem, value)?;
                Ok(RuntimeError::new(ErrorKind::UserThrown, message))
            }
        }
    }

    fn eval_namespace(&mut self, name: &str, body: &[Node]) -> RunResult<Flow> {
        let saved = std::mem::take(&mut self.namespace);
        self.namespace = if saved.is_empty() {
            name.to_string()
        } else {
            format!("{saved}.{name}")
        };
        let flow = self.eval_items(body);
        self.namespace = saved;
        flow
    }

    fn eval_using_scoped(&mut self, decl: &Node, body: Option<&Node>) -> RunResult<Flow> {
        let Node::VariableDecl { name, .. } = decl else {
            return Err(err(ErrorKind::SandboxViolation, "malformed using declaration"));
        };
        self.mem.enter_scope()?;
        let flow = (|| -> RunResult<Flow> {
            self.eval_stmt(decl)?;
            match body {
                Some(b) => self.eval_stmt(b),
                None => Ok(Flow::Normal),
            }
        })();
        // Dispose on every exit path, then unwind the scope
        let dispose = match self.mem.scopes.lookup(name) {
            Some(var) => match Value::read_cell(&self.mem, var.addr, var.kind) {
                Ok(v) if !v.is_null() => self.call_dispose(v),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            },
            None => Ok(()),
        };
        let exit = self.mem.exit_scope();
        let flow = flow?;
        dispose?;
        exit?;
        Ok(flow)
    }
}

fn catch_matches(clause: &CatchClause, error: &RuntimeError) -> bool {
    match clause.filter.as_deref() {
        None | Some("Exception") => true,
        Some(filter) => filter == error.kind.label(),
    }
}
