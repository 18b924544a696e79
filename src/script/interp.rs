// src/script/interp.rs

//! Tree-walking interpreter for compiled scripts.
//!
//! The only way out of the sandbox is `ScriptHost::call`. There is no clock,
//! no randomness and no I/O, so the same script over the same keyspace always
//! produces the same result. Every statement, loop iteration and function
//! call costs one step; running past the budget stops the script with
//! `ScriptTimeout`.
//!
//! Memory has its own budget. Every byte a script copies or builds (string
//! literals, variable reads, concatenation, command arguments and replies)
//! is charged against `max_bytes`, and going over stops the script with
//! `ScriptMemory`. Tables may not nest deeper than `MAX_VALUE_DEPTH`.

use std::collections::HashMap;

use crate::engine::Reply;
use crate::error::{ApplicationError, CommandError, CommandResult};
use crate::script::parser::{BinOp, Expr, Program, Stmt, TableItem, Target, UnOp};

/// Deepest table nesting a script value may reach.
pub const MAX_VALUE_DEPTH: usize = 32;

/// What a running script can reach: command execution against the store.
pub trait ScriptHost {
    fn call(&mut self, args: Vec<Vec<u8>>) -> CommandResult<Reply>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Nil,
    Bool(bool),
    Int(i64),
    Str(Vec<u8>),
    Array(Vec<ScriptValue>),
    /// Named fields in insertion order.
    Record(Vec<(String, ScriptValue)>),
}

impl ScriptValue {
    fn truthy(&self) -> bool {
        !matches!(self, ScriptValue::Nil | ScriptValue::Bool(false))
    }

    fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Int(_) => "number",
            ScriptValue::Str(_) => "string",
            ScriptValue::Array(_) | ScriptValue::Record(_) => "table",
        }
    }

    fn field(&self, name: &str) -> Option<&ScriptValue> {
        match self {
            ScriptValue::Record(fields) => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            ScriptValue::Nil => b"nil".to_vec(),
            ScriptValue::Bool(b) => b.to_string().into_bytes(),
            ScriptValue::Int(i) => i.to_string().into_bytes(),
            ScriptValue::Str(s) => s.clone(),
            ScriptValue::Array(_) | ScriptValue::Record(_) => b"table".to_vec(),
        }
    }

    /// Approximate heap footprint: payload bytes plus one slot per value.
    fn weight(&self) -> u64 {
        const SLOT: u64 = std::mem::size_of::<ScriptValue>() as u64;
        match self {
            ScriptValue::Str(s) => SLOT + s.len() as u64,
            ScriptValue::Array(items) => SLOT + items.iter().map(ScriptValue::weight).sum::<u64>(),
            ScriptValue::Record(fields) => {
                SLOT + fields.iter().map(|(k, v)| k.len() as u64 + v.weight()).sum::<u64>()
            }
            _ => SLOT,
        }
    }

    /// Table nesting: 0 for scalars.
    fn depth(&self) -> usize {
        match self {
            ScriptValue::Array(items) => 1 + items.iter().map(ScriptValue::depth).max().unwrap_or(0),
            ScriptValue::Record(fields) => 1 + fields.iter().map(|(_, v)| v.depth()).max().unwrap_or(0),
            _ => 0,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(i) => Some(*i),
            ScriptValue::Str(s) => std::str::from_utf8(s).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert a command reply into a script value.
    pub fn from_reply(reply: Reply) -> Self {
        match reply {
            Reply::Status(s) => ScriptValue::Record(vec![("ok".into(), ScriptValue::Str(s.into_bytes()))]),
            Reply::Integer(i) => ScriptValue::Int(i),
            Reply::Bulk(b) => ScriptValue::Str(b),
            Reply::Nil => ScriptValue::Nil,
            Reply::Array(items) => ScriptValue::Array(items.into_iter().map(Self::from_reply).collect()),
            Reply::Map(fields) => ScriptValue::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (String::from_utf8_lossy(&k).into_owned(), Self::from_reply(v)))
                    .collect(),
            ),
            Reply::Error(e) => error_record(&e),
        }
    }

    /// Convert the script's return value into the caller's reply.
    ///
    /// A record with an `err` field is an application error, a record holding
    /// only `ok` is a status reply, any other record is a map.
    pub fn into_reply(self) -> CommandResult<Reply> {
        match self {
            ScriptValue::Nil | ScriptValue::Bool(false) => Ok(Reply::Nil),
            ScriptValue::Bool(true) => Ok(Reply::Integer(1)),
            ScriptValue::Int(i) => Ok(Reply::Integer(i)),
            ScriptValue::Str(s) => Ok(Reply::Bulk(s)),
            ScriptValue::Array(items) => Ok(Reply::Array(
                items
                    .into_iter()
                    .map(|v| v.into_reply().unwrap_or_else(Reply::Error))
                    .collect(),
            )),
            ScriptValue::Record(fields) => {
                if fields.iter().any(|(k, _)| k == "err") {
                    return Err(CommandError::Application(application_error(fields)));
                }
                if let [(k, ScriptValue::Str(s))] = fields.as_slice() {
                    if k == "ok" {
                        return Ok(Reply::Status(String::from_utf8_lossy(s).into_owned()));
                    }
                }
                let mut out = Vec::with_capacity(fields.len());
                for (k, v) in fields {
                    out.push((k.into_bytes(), v.into_reply().unwrap_or_else(Reply::Error)));
                }
                Ok(Reply::Map(out))
            }
        }
    }
}

fn error_record(e: &CommandError) -> ScriptValue {
    ScriptValue::Record(vec![("err".into(), ScriptValue::Str(e.to_string().into_bytes()))])
}

fn application_error(fields: Vec<(String, ScriptValue)>) -> ApplicationError {
    let mut code = String::new();
    let mut err = ApplicationError::new("");
    for (k, v) in fields {
        if k == "err" {
            code = String::from_utf8_lossy(&v.to_bytes()).into_owned();
        } else {
            err = err.with_field(k, v.into_reply().unwrap_or_else(Reply::Error));
        }
    }
    err.code = code;
    err
}

fn runtime(msg: impl Into<String>) -> CommandError {
    CommandError::Script(format!("Error running script: {}", msg.into()))
}

enum Flow {
    Normal,
    Return(ScriptValue),
}

pub struct Interpreter<'h> {
    host: &'h mut dyn ScriptHost,
    scopes: Vec<HashMap<String, ScriptValue>>,
    steps: u64,
    max_steps: u64,
    bytes: u64,
    max_bytes: u64,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h mut dyn ScriptHost, max_steps: u64) -> Self {
        Self {
            host,
            scopes: vec![HashMap::new()],
            steps: 0,
            max_steps,
            bytes: 0,
            max_bytes: u64::MAX,
        }
    }

    /// Cap the bytes this run may copy or build.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Run `program` with `KEYS` and `ARGV` bound.
    pub fn run(&mut self, program: &Program, keys: &[Vec<u8>], argv: &[Vec<u8>]) -> CommandResult<ScriptValue> {
        let as_array = |items: &[Vec<u8>]| ScriptValue::Array(items.iter().cloned().map(ScriptValue::Str).collect());
        self.scopes[0].insert("KEYS".into(), as_array(keys));
        self.scopes[0].insert("ARGV".into(), as_array(argv));
        match self.exec_block(&program.body)? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(ScriptValue::Nil),
        }
    }

    fn tick(&mut self) -> CommandResult<()> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(CommandError::ScriptTimeout(self.max_steps));
        }
        Ok(())
    }

    fn charge(&mut self, bytes: u64) -> CommandResult<()> {
        self.bytes = self.bytes.saturating_add(bytes);
        if self.bytes > self.max_bytes {
            return Err(CommandError::ScriptMemory(self.max_bytes));
        }
        Ok(())
    }

    fn exec_block(&mut self, block: &[Stmt]) -> CommandResult<Flow> {
        self.scopes.push(HashMap::new());
        let mut flow = Flow::Normal;
        for stmt in block {
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(ret) => {
                    flow = ret;
                    break;
                }
                Err(e) => {
                    self.scopes.pop();
                    return Err(e);
                }
            }
        }
        self.scopes.pop();
        Ok(flow)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> CommandResult<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Local(name, init) => {
                let v = match init {
                    Some(e) => self.eval(e)?,
                    None => ScriptValue::Nil,
                };
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), v);
                }
            }
            Stmt::Assign(target, rhs) => {
                let v = self.eval(rhs)?;
                self.assign(target, v)?;
            }
            Stmt::If(arms, otherwise) => {
                for (cond, body) in arms {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            Stmt::For { var, start, end, step, body } => {
                let start = self.eval_int(start, "'for' initial value")?;
                let end = self.eval_int(end, "'for' limit")?;
                let step = match step {
                    Some(e) => self.eval_int(e, "'for' step")?,
                    None => 1,
                };
                if step == 0 {
                    return Err(runtime("'for' step is zero"));
                }
                let mut i = start;
                while (step > 0 && i <= end) || (step < 0 && i >= end) {
                    self.tick()?;
                    self.scopes.push(HashMap::from([(var.clone(), ScriptValue::Int(i))]));
                    let flow = self.exec_block(body);
                    self.scopes.pop();
                    if let Flow::Return(v) = flow? {
                        return Ok(Flow::Return(v));
                    }
                    match i.checked_add(step) {
                        Some(next) => i = next,
                        None => break,
                    }
                }
            }
            Stmt::While(cond, body) => loop {
                self.tick()?;
                if !self.eval(cond)?.truthy() {
                    break;
                }
                if let Flow::Return(v) = self.exec_block(body)? {
                    return Ok(Flow::Return(v));
                }
            },
            Stmt::Return(e) => {
                let v = match e {
                    Some(e) => self.eval(e)?,
                    None => ScriptValue::Nil,
                };
                return Ok(Flow::Return(v));
            }
            Stmt::Expr(e) => {
                self.eval(e)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn find_var(&self, name: &str) -> Option<&ScriptValue> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    /// Copy a variable out, paying for the copy first.
    fn read_var(&mut self, name: &str) -> CommandResult<ScriptValue> {
        let weight = self.find_var(name).map_or(0, ScriptValue::weight);
        self.charge(weight)?;
        Ok(self.find_var(name).cloned().unwrap_or(ScriptValue::Nil))
    }

    /// `name[key]` without copying the whole of `name`.
    fn read_indexed_var(&mut self, name: &str, key: &ScriptValue) -> CommandResult<ScriptValue> {
        let weight = match self.find_var(name) {
            Some(base) => index_ref(base, key)?.map_or(0, ScriptValue::weight),
            None => return index(&ScriptValue::Nil, key),
        };
        self.charge(weight)?;
        match self.find_var(name) {
            Some(base) => Ok(index_ref(base, key)?.cloned().unwrap_or(ScriptValue::Nil)),
            None => Ok(ScriptValue::Nil),
        }
    }

    fn assign(&mut self, target: &Target, v: ScriptValue) -> CommandResult<()> {
        let mut path = Vec::with_capacity(target.path.len());
        for key in &target.path {
            path.push(self.eval(key)?);
        }
        if target.path.len() + v.depth() > MAX_VALUE_DEPTH {
            return Err(runtime("table nesting too deep"));
        }
        // nearest scope holding the name, otherwise a global
        let idx = self
            .scopes
            .iter()
            .rposition(|s| s.contains_key(&target.name))
            .unwrap_or(0);
        let slot = self.scopes[idx].entry(target.name.clone()).or_insert(ScriptValue::Nil);
        set_path(slot, &path, v)
    }

    fn eval_int(&mut self, e: &Expr, what: &str) -> CommandResult<i64> {
        self.eval(e)?
            .as_int()
            .ok_or_else(|| runtime(format!("{} must be a number", what)))
    }

    fn eval(&mut self, e: &Expr) -> CommandResult<ScriptValue> {
        match e {
            Expr::Nil => Ok(ScriptValue::Nil),
            Expr::Bool(b) => Ok(ScriptValue::Bool(*b)),
            Expr::Int(i) => Ok(ScriptValue::Int(*i)),
            Expr::Str(s) => {
                self.charge(s.len() as u64)?;
                Ok(ScriptValue::Str(s.clone()))
            }
            Expr::Var(name) => self.read_var(name),
            Expr::Index(base, key) => {
                if let Expr::Var(name) = base.as_ref() {
                    let key = self.eval(key)?;
                    return self.read_indexed_var(name, &key);
                }
                let base = self.eval(base)?;
                let key = self.eval(key)?;
                index(&base, &key)
            }
            Expr::Call(name, args) => {
                self.tick()?;
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a)?);
                }
                self.call_builtin(name, values)
            }
            Expr::Table(items) => {
                let mut named = Vec::new();
                let mut positional = Vec::new();
                for item in items {
                    match item {
                        TableItem::Positional(e) => positional.push(self.eval(e)?),
                        TableItem::Named(k, e) => named.push((k.clone(), self.eval(e)?)),
                    }
                }
                let depth = positional
                    .iter()
                    .chain(named.iter().map(|(_, v)| v))
                    .map(ScriptValue::depth)
                    .max()
                    .unwrap_or(0);
                if depth + 1 > MAX_VALUE_DEPTH {
                    return Err(runtime("table nesting too deep"));
                }
                if named.is_empty() {
                    return Ok(ScriptValue::Array(positional));
                }
                let mut fields: Vec<(String, ScriptValue)> = positional
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| ((i + 1).to_string(), v))
                    .collect();
                fields.extend(named);
                Ok(ScriptValue::Record(fields))
            }
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                match op {
                    UnOp::Not => Ok(ScriptValue::Bool(!v.truthy())),
                    UnOp::Len => match &v {
                        ScriptValue::Str(s) => Ok(ScriptValue::Int(s.len() as i64)),
                        ScriptValue::Array(items) => Ok(ScriptValue::Int(items.len() as i64)),
                        other => Err(runtime(format!("attempt to get length of a {} value", other.type_name()))),
                    },
                    UnOp::Neg => {
                        let n = arith_operand(&v)?;
                        n.checked_neg().map(ScriptValue::Int).ok_or_else(|| runtime("integer overflow"))
                    }
                }
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                let l = self.eval(lhs)?;
                if l.truthy() { self.eval(rhs) } else { Ok(l) }
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                let l = self.eval(lhs)?;
                if l.truthy() { Ok(l) } else { self.eval(rhs) }
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                if *op == BinOp::Concat {
                    self.charge(l.weight() + r.weight())?;
                }
                binary(*op, l, r)
            }
        }
    }

    fn command_args(&mut self, args: &[ScriptValue]) -> CommandResult<Vec<Vec<u8>>> {
        if args.is_empty() {
            return Err(runtime("please specify at least one argument for this call"));
        }
        let mut argv = Vec::with_capacity(args.len());
        for a in args {
            match a {
                ScriptValue::Str(_) | ScriptValue::Int(_) => argv.push(a.to_bytes()),
                other => {
                    return Err(runtime(format!(
                        "command arguments must be strings or integers, got {}",
                        other.type_name()
                    )));
                }
            }
        }
        self.charge(argv.iter().map(|a| a.len() as u64).sum())?;
        Ok(argv)
    }

    fn call_builtin(&mut self, name: &str, args: Vec<ScriptValue>) -> CommandResult<ScriptValue> {
        match name {
            "call" | "redis.call" => {
                let argv = self.command_args(&args)?;
                let reply = ScriptValue::from_reply(self.host.call(argv)?);
                self.charge(reply.weight())?;
                Ok(reply)
            }
            "pcall" | "redis.pcall" => {
                let argv = self.command_args(&args)?;
                let reply = match self.host.call(argv) {
                    Ok(reply) => ScriptValue::from_reply(reply),
                    Err(e) => error_record(&e),
                };
                self.charge(reply.weight())?;
                Ok(reply)
            }
            "error" => {
                let v = args.into_iter().next().unwrap_or(ScriptValue::Nil);
                let err = match v {
                    ScriptValue::Record(fields) if fields.iter().any(|(k, _)| k == "err") => application_error(fields),
                    other => ApplicationError::new(String::from_utf8_lossy(&other.to_bytes()).into_owned()),
                };
                Err(CommandError::Application(err))
            }
            "redis.error_reply" => {
                let msg = args.first().map(ScriptValue::to_bytes).unwrap_or_default();
                Ok(ScriptValue::Record(vec![("err".into(), ScriptValue::Str(msg))]))
            }
            "redis.status_reply" => {
                let msg = args.first().map(ScriptValue::to_bytes).unwrap_or_default();
                Ok(ScriptValue::Record(vec![("ok".into(), ScriptValue::Str(msg))]))
            }
            "tonumber" => Ok(args
                .first()
                .and_then(ScriptValue::as_int)
                .map(ScriptValue::Int)
                .unwrap_or(ScriptValue::Nil)),
            "tostring" => Ok(ScriptValue::Str(
                args.first().map(ScriptValue::to_bytes).unwrap_or_else(|| b"nil".to_vec()),
            )),
            "type" => Ok(ScriptValue::Str(
                args.first().map(ScriptValue::type_name).unwrap_or("nil").as_bytes().to_vec(),
            )),
            other => Err(runtime(format!("attempt to call unknown function '{}'", other))),
        }
    }
}

fn index(base: &ScriptValue, key: &ScriptValue) -> CommandResult<ScriptValue> {
    Ok(index_ref(base, key)?.cloned().unwrap_or(ScriptValue::Nil))
}

fn index_ref<'v>(base: &'v ScriptValue, key: &ScriptValue) -> CommandResult<Option<&'v ScriptValue>> {
    match base {
        ScriptValue::Array(items) => Ok(key
            .as_int()
            .filter(|&i| i >= 1)
            .and_then(|i| items.get((i - 1) as usize))),
        ScriptValue::Record(_) => {
            let name = String::from_utf8_lossy(&key.to_bytes()).into_owned();
            Ok(base.field(&name))
        }
        other => Err(runtime(format!("attempt to index a {} value", other.type_name()))),
    }
}

fn set_path(slot: &mut ScriptValue, path: &[ScriptValue], v: ScriptValue) -> CommandResult<()> {
    let Some((key, rest)) = path.split_first() else {
        *slot = v;
        return Ok(());
    };
    match slot {
        ScriptValue::Array(items) => {
            let i = key
                .as_int()
                .filter(|&i| i >= 1 && (i as usize) <= items.len() + 1)
                .ok_or_else(|| runtime("array index out of range"))? as usize;
            if i == items.len() + 1 {
                items.push(ScriptValue::Nil);
            }
            set_path(&mut items[i - 1], rest, v)
        }
        ScriptValue::Record(fields) => {
            let name = String::from_utf8_lossy(&key.to_bytes()).into_owned();
            let pos = match fields.iter().position(|(k, _)| *k == name) {
                Some(pos) => pos,
                None => {
                    fields.push((name, ScriptValue::Nil));
                    fields.len() - 1
                }
            };
            set_path(&mut fields[pos].1, rest, v)
        }
        other => Err(runtime(format!("attempt to index a {} value", other.type_name()))),
    }
}

fn arith_operand(v: &ScriptValue) -> CommandResult<i64> {
    v.as_int()
        .ok_or_else(|| runtime(format!("attempt to perform arithmetic on a {} value", v.type_name())))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) { q.checked_sub(1) } else { Some(q) }
}

fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) { Some(r + b) } else { Some(r) }
}

fn binary(op: BinOp, l: ScriptValue, r: ScriptValue) -> CommandResult<ScriptValue> {
    use ScriptValue::{Bool, Int, Str};
    match op {
        BinOp::Eq => Ok(Bool(l == r)),
        BinOp::Ne => Ok(Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (&l, &r) {
                (Int(a), Int(b)) => a.cmp(b),
                (Str(a), Str(b)) => a.cmp(b),
                _ => {
                    return Err(runtime(format!(
                        "attempt to compare {} with {}",
                        l.type_name(),
                        r.type_name()
                    )));
                }
            };
            Ok(Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinOp::Concat => match (&l, &r) {
            (Str(_) | Int(_), Str(_) | Int(_)) => {
                let mut out = l.to_bytes();
                out.extend(r.to_bytes());
                Ok(Str(out))
            }
            _ => Err(runtime(format!(
                "attempt to concatenate a {} value",
                if matches!(l, Str(_) | Int(_)) { r.type_name() } else { l.type_name() }
            ))),
        },
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (a, b) = (arith_operand(&l)?, arith_operand(&r)?);
            if matches!(op, BinOp::Div | BinOp::Mod) && b == 0 {
                return Err(runtime("attempt to divide by zero"));
            }
            let out = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => floor_div(a, b),
                _ => floor_mod(a, b),
            };
            out.map(Int).ok_or_else(|| runtime("integer overflow"))
        }
        // normally short-circuited in `eval`
        BinOp::And => Ok(if l.truthy() { r } else { l }),
        BinOp::Or => Ok(if l.truthy() { l } else { r }),
    }
}
