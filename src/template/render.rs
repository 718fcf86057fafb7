//! Template evaluation.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use super::ast::{Accessor, BinaryOp, Expr, Node, Reference};
use super::methods;
use super::{TemplateContext, TemplateError};

const MAX_RENDER_DEPTH: usize = 64;
const MAX_RANGE_LEN: i64 = 100_000;

enum Flow {
    Continue,
    Break,
    Stop,
}

/// Evaluates parsed templates. Holds the `#set` variables and `#define`
/// blocks of a single render.
pub struct Renderer<'a> {
    context: &'a dyn TemplateContext,
    locals: HashMap<String, Value>,
    defines: HashMap<String, Vec<Node>>,
    depth: usize,
}

impl<'a> Renderer<'a> {
    pub fn new(context: &'a dyn TemplateContext) -> Self {
        Self {
            context,
            locals: HashMap::new(),
            defines: HashMap::new(),
            depth: 0,
        }
    }

    pub fn render_to_string(&mut self, nodes: &[Node]) -> Result<String, TemplateError> {
        let mut out = String::new();
        self.render_nodes(nodes, &mut out)?;
        Ok(out)
    }

    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<Flow, TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Reference(reference) => {
                    if let Some(body) = self.define_for(reference) {
                        self.render_define(&body, out)?;
                        continue;
                    }
                    match self.eval_reference(reference)? {
                        Some(value) => out.push_str(&stringify(&value)),
                        None if reference.quiet => {}
                        None => out.push_str(&reference.source),
                    }
                }
                Node::Set { target, value } => {
                    if let Some(value) = self.eval_expr(value)? {
                        self.assign(target, value)?;
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut chosen = otherwise.as_deref();
                    for (condition, body) in branches {
                        if truthy(self.eval_expr(condition)?.as_ref()) {
                            chosen = Some(body.as_slice());
                            break;
                        }
                    }
                    if let Some(body) = chosen {
                        match self.render_nodes(body, out)? {
                            Flow::Continue => {}
                            flow => return Ok(flow),
                        }
                    }
                }
                Node::Foreach {
                    var,
                    iterable,
                    body,
                } => {
                    if let Flow::Stop = self.render_foreach(var, iterable, body, out)? {
                        return Ok(Flow::Stop);
                    }
                }
                Node::Define { name, body } => {
                    self.defines.insert(name.clone(), body.clone());
                }
                Node::Break => return Ok(Flow::Break),
                Node::Stop => return Ok(Flow::Stop),
            }
        }
        Ok(Flow::Continue)
    }

    fn render_foreach(
        &mut self,
        var: &str,
        iterable: &Expr,
        body: &[Node],
        out: &mut String,
    ) -> Result<Flow, TemplateError> {
        let items = match self.eval_expr(iterable)? {
            Some(Value::Array(items)) => items,
            Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        };

        let saved: Vec<(&str, Option<Value>)> = [var, "foreach", "velocityCount"]
            .into_iter()
            .map(|name| (name, self.locals.get(name).cloned()))
            .collect();

        let total = items.len();
        let mut flow = Flow::Continue;
        for (index, item) in items.into_iter().enumerate() {
            let mut state = Map::new();
            state.insert("index".into(), Value::from(index));
            state.insert("count".into(), Value::from(index + 1));
            state.insert("hasNext".into(), Value::Bool(index + 1 < total));
            state.insert("first".into(), Value::Bool(index == 0));
            state.insert("last".into(), Value::Bool(index + 1 == total));
            self.locals.insert(var.to_string(), item);
            self.locals.insert("foreach".into(), Value::Object(state));
            self.locals.insert("velocityCount".into(), Value::from(index + 1));

            match self.render_nodes(body, out)? {
                Flow::Continue => {}
                Flow::Break => break,
                Flow::Stop => {
                    flow = Flow::Stop;
                    break;
                }
            }
        }

        for (name, previous) in saved {
            match previous {
                Some(value) => self.locals.insert(name.to_string(), value),
                None => self.locals.remove(name),
            };
        }
        Ok(flow)
    }

    fn define_for(&self, reference: &Reference) -> Option<Vec<Node>> {
        if !reference.accessors.is_empty() || self.locals.contains_key(&reference.root) {
            return None;
        }
        self.defines.get(&reference.root).cloned()
    }

    fn render_define(&mut self, body: &[Node], out: &mut String) -> Result<(), TemplateError> {
        self.depth += 1;
        if self.depth > MAX_RENDER_DEPTH {
            return Err(TemplateError::DepthExceeded(MAX_RENDER_DEPTH));
        }
        let result = self.render_nodes(body, out);
        self.depth -= 1;
        result.map(|_| ())
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, TemplateError> {
        args.iter()
            .map(|arg| Ok(self.eval_expr(arg)?.unwrap_or(Value::Null)))
            .collect()
    }

    fn eval_reference(&mut self, reference: &Reference) -> Result<Option<Value>, TemplateError> {
        if let Some(result) = self.try_mutation(reference)? {
            return Ok(result);
        }

        let mut accessors = reference.accessors.as_slice();
        let mut current = if let Some(value) = self.locals.get(&reference.root) {
            Some(value.clone())
        } else if let Some(Accessor::Method(name, args)) = accessors.first() {
            let args = self.eval_args(args)?;
            match self.context.call(&reference.root, name, &args) {
                Some(result) => {
                    accessors = &accessors[1..];
                    Some(result?)
                }
                None => self.context.lookup(&reference.root),
            }
        } else {
            self.context.lookup(&reference.root)
        };

        for accessor in accessors {
            let Some(value) = current.take() else {
                return Ok(None);
            };
            current = match accessor {
                Accessor::Property(name) => property(&value, name),
                Accessor::Index(expr) => {
                    let key = self.eval_expr(expr)?;
                    key.and_then(|key| index(&value, &key))
                }
                Accessor::Method(name, args) => {
                    let args = self.eval_args(args)?;
                    methods::call(&value, name, &args)?
                }
            };
        }
        Ok(current.filter(|v| !v.is_null()))
    }

    /// `$map.put(k, v)` and `$list.add(v)` on template variables mutate in place.
    fn try_mutation(&mut self, reference: &Reference) -> Result<Option<Option<Value>>, TemplateError> {
        let Some((Accessor::Method(name, args), path)) = reference.accessors.split_last() else {
            return Ok(None);
        };
        if !matches!(name.as_str(), "put" | "add")
            || !self.locals.contains_key(&reference.root)
            || path.iter().any(|a| matches!(a, Accessor::Method(..)))
        {
            return Ok(None);
        }

        let mut keys = Vec::with_capacity(path.len());
        for accessor in path {
            match accessor {
                Accessor::Property(p) => keys.push(Value::String(p.clone())),
                Accessor::Index(expr) => keys.push(self.eval_expr(expr)?.unwrap_or(Value::Null)),
                Accessor::Method(..) => return Ok(None),
            }
        }
        let args = self.eval_args(args)?;

        let Some(mut target) = self.locals.get_mut(&reference.root) else {
            return Ok(None);
        };
        for key in &keys {
            let next = match (target, key) {
                (Value::Object(map), key) => map.get_mut(&stringify(key)),
                (Value::Array(items), Value::Number(n)) => {
                    n.as_u64().and_then(|i| items.get_mut(i as usize))
                }
                _ => None,
            };
            match next {
                Some(next) => target = next,
                None => return Ok(Some(None)),
            }
        }

        let result = match (name.as_str(), target, args.as_slice()) {
            ("put", Value::Object(map), [key, value]) => map.insert(stringify(key), value.clone()),
            ("add", Value::Array(items), [value]) => {
                items.push(value.clone());
                Some(Value::Bool(true))
            }
            _ => None,
        };
        Ok(Some(result))
    }

    fn assign(&mut self, target: &Reference, value: Value) -> Result<(), TemplateError> {
        if target.accessors.is_empty() {
            self.locals.insert(target.root.clone(), value);
            return Ok(());
        }

        if !self.locals.contains_key(&target.root) {
            let seed = self
                .context
                .lookup(&target.root)
                .unwrap_or_else(|| Value::Object(Map::new()));
            self.locals.insert(target.root.clone(), seed);
        }

        let mut keys = Vec::with_capacity(target.accessors.len());
        for accessor in &target.accessors {
            match accessor {
                Accessor::Property(p) => keys.push(Value::String(p.clone())),
                Accessor::Index(expr) => keys.push(self.eval_expr(expr)?.unwrap_or(Value::Null)),
                Accessor::Method(name, _) => {
                    return Err(TemplateError::Evaluation(format!(
                        "cannot assign to method call {name}() in {}",
                        target.source
                    )))
                }
            }
        }

        let Some(mut slot) = self.locals.get_mut(&target.root) else {
            return Ok(());
        };
        let Some((last, parents)) = keys.split_last() else {
            return Ok(());
        };
        for key in parents {
            if !slot.is_object() && !slot.is_array() {
                *slot = Value::Object(Map::new());
            }
            slot = match slot {
                Value::Object(map) => map
                    .entry(stringify(key))
                    .or_insert_with(|| Value::Object(Map::new())),
                Value::Array(items) => match key.as_u64().and_then(|i| items.get_mut(i as usize)) {
                    Some(item) => item,
                    None => return Ok(()),
                },
                _ => return Ok(()),
            };
        }
        match slot {
            Value::Object(map) => {
                map.insert(stringify(last), value);
            }
            Value::Array(items) => {
                if let Some(item) = last.as_u64().and_then(|i| items.get_mut(i as usize)) {
                    *item = value;
                }
            }
            other => {
                let mut map = Map::new();
                map.insert(stringify(last), value);
                *other = Value::Object(map);
            }
        }
        Ok(())
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Option<Value>, TemplateError> {
        let value = match expr {
            Expr::Literal(value) => Some(value.clone()),
            Expr::Interpolated(nodes) => {
                self.depth += 1;
                if self.depth > MAX_RENDER_DEPTH {
                    return Err(TemplateError::DepthExceeded(MAX_RENDER_DEPTH));
                }
                let mut out = String::new();
                let result = self.render_nodes(nodes, &mut out);
                self.depth -= 1;
                result?;
                Some(Value::String(out))
            }
            Expr::Reference(reference) => {
                if let Some(body) = self.define_for(reference) {
                    let mut out = String::new();
                    self.render_define(&body, &mut out)?;
                    Some(Value::String(out))
                } else {
                    self.eval_reference(reference)?
                }
            }
            Expr::List(items) => Some(Value::Array(self.eval_args(items)?)),
            Expr::Range(start, end) => {
                let start = self.eval_expr(start)?.and_then(|v| as_i64(&v));
                let end = self.eval_expr(end)?.and_then(|v| as_i64(&v));
                match (start, end) {
                    (Some(start), Some(end)) => Some(range(start, end)?),
                    _ => None,
                }
            }
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = self.eval_expr(key)?.unwrap_or(Value::Null);
                    let value = self.eval_expr(value)?.unwrap_or(Value::Null);
                    map.insert(stringify(&key), value);
                }
                Some(Value::Object(map))
            }
            Expr::Not(inner) => Some(Value::Bool(!truthy(self.eval_expr(inner)?.as_ref()))),
            Expr::Negate(inner) => match self.eval_expr(inner)? {
                Some(Value::Number(n)) => match n.as_i64() {
                    Some(i) => i.checked_neg().map(Value::from),
                    None => n.as_f64().map(|f| float(-f)),
                },
                _ => None,
            },
            Expr::Binary(op, left, right) => self.eval_binary(*op, left, right)?,
        };
        Ok(value)
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<Option<Value>, TemplateError> {
        match op {
            BinaryOp::Or => {
                if truthy(self.eval_expr(left)?.as_ref()) {
                    return Ok(Some(Value::Bool(true)));
                }
                let right = self.eval_expr(right)?;
                return Ok(Some(Value::Bool(truthy(right.as_ref()))));
            }
            BinaryOp::And => {
                if !truthy(self.eval_expr(left)?.as_ref()) {
                    return Ok(Some(Value::Bool(false)));
                }
                let right = self.eval_expr(right)?;
                return Ok(Some(Value::Bool(truthy(right.as_ref()))));
            }
            _ => {}
        }

        let left = self.eval_expr(left)?.unwrap_or(Value::Null);
        let right = self.eval_expr(right)?.unwrap_or(Value::Null);
        let result = match op {
            BinaryOp::Eq => Some(Value::Bool(loose_eq(&left, &right))),
            BinaryOp::Ne => Some(Value::Bool(!loose_eq(&left, &right))),
            BinaryOp::Lt => compare(&left, &right).map(|o| Value::Bool(o == Ordering::Less)),
            BinaryOp::Le => compare(&left, &right).map(|o| Value::Bool(o != Ordering::Greater)),
            BinaryOp::Gt => compare(&left, &right).map(|o| Value::Bool(o == Ordering::Greater)),
            BinaryOp::Ge => compare(&left, &right).map(|o| Value::Bool(o != Ordering::Less)),
            BinaryOp::Add if left.is_string() || right.is_string() => {
                if left.is_null() || right.is_null() {
                    None
                } else {
                    Some(Value::String(stringify(&left) + &stringify(&right)))
                }
            }
            _ => arithmetic(op, &left, &right),
        };
        Ok(result)
    }
}

/// Render a value the way it appears in template output. Maps and lists use
/// the `{k=v}` / `[a, b]` notation of the gateway's template runtime.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(stringify).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}={}", stringify(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn format_number(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn property(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(name).cloned(),
        _ => None,
    }
}

fn index(value: &Value, key: &Value) -> Option<Value> {
    match (value, key) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_i64()?;
            let i = if i < 0 { items.len() as i64 + i } else { i };
            usize::try_from(i).ok().and_then(|i| items.get(i)).cloned()
        }
        (Value::Object(map), key) => map.get(&stringify(key)).cloned(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn range(start: i64, end: i64) -> Result<Value, TemplateError> {
    let span = i128::from(end) - i128::from(start);
    if span.abs() > i128::from(MAX_RANGE_LEN) {
        return Err(TemplateError::Evaluation(format!(
            "range [{start}..{end}] is too large"
        )));
    }
    let items: Vec<Value> = if start <= end {
        (start..=end).map(Value::from).collect()
    } else {
        (end..=start).rev().map(Value::from).collect()
    };
    Ok(Value::Array(items))
}

pub(crate) fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (as_f64(left), as_f64(right)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => as_f64(left)?.partial_cmp(&as_f64(right)?),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Option<Value> {
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return None;
    };
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div | BinaryOp::Rem if y == 0 => return None,
            BinaryOp::Div if x.checked_rem(y) == Some(0) => x.checked_div(y),
            BinaryOp::Rem => x.checked_rem(y),
            _ => None,
        };
        if let Some(result) = exact {
            return Some(Value::from(result));
        }
    }
    let (x, y) = (a.as_f64()?, b.as_f64()?);
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div if y != 0.0 => x / y,
        BinaryOp::Rem if y != 0.0 => x % y,
        _ => return None,
    };
    Some(float(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::render;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_undefined_reference_renders_source() {
        let context = ctx(json!({}));
        assert_eq!(render("a $missing.value b", &context).unwrap(), "a $missing.value b");
        assert_eq!(render("a $!missing b", &context).unwrap(), "a  b");
    }

    #[test]
    fn test_properties_and_indexes() {
        let context = ctx(json!({"user": {"name": "ana", "tags": ["x", "y"]}}));
        assert_eq!(render("${user.name}/$user.tags[1]", &context).unwrap(), "ana/y");
        assert_eq!(render("$user.tags[-1]", &context).unwrap(), "y");
    }

    #[test]
    fn test_set_if_and_arithmetic() {
        let context = ctx(json!({"n": 4}));
        let out = render(
            "#set($half = $n / 2)#if($half > 1 && $n != 3)big $half#{else}small#end",
            &context,
        )
        .unwrap();
        assert_eq!(out, "big 2");
    }

    #[test]
    fn test_set_to_undefined_keeps_previous_value() {
        let context = ctx(json!({}));
        let out = render("#set($a = 'x')#set($a = $nothing)$a", &context).unwrap();
        assert_eq!(out, "x");
    }

    #[test]
    fn test_foreach_with_has_next() {
        let context = ctx(json!({"items": {"a": 1, "b": 2}}));
        let out = render(
            "#foreach($key in $items.keySet())\"$key\":$items.get($key)#if($foreach.hasNext),#end#end",
            &context,
        )
        .unwrap();
        assert_eq!(out, "\"a\":1,\"b\":2");
    }

    #[test]
    fn test_foreach_break_and_velocity_count() {
        let context = ctx(json!({}));
        let out = render("#foreach($i in [1..5])$velocityCount#if($i == 3)#break#end#end", &context).unwrap();
        assert_eq!(out, "123");
    }

    #[test]
    fn test_extreme_range_bounds_are_rejected() {
        let template = "#foreach($i in [$a..$b])x#end";
        let wide = ctx(json!({"a": -9_000_000_000_000_000_000i64, "b": 9_000_000_000_000_000_000i64}));
        assert!(matches!(render(template, &wide), Err(TemplateError::Evaluation(_))));

        let extremes = ctx(json!({"a": i64::MIN, "b": i64::MAX}));
        assert!(matches!(render(template, &extremes), Err(TemplateError::Evaluation(_))));

        let reversed = ctx(json!({"a": 3, "b": 1}));
        assert_eq!(render(template, &reversed).unwrap(), "xxx");
    }

    #[test]
    fn test_define_block_renders_in_scope() {
        let context = ctx(json!({"name": "ana"}));
        let out = render("#define($greet)hi $name#end$greet and $greet", &context).unwrap();
        assert_eq!(out, "hi ana and hi ana");
    }

    #[test]
    fn test_recursive_define_hits_depth_limit() {
        let context = ctx(json!({}));
        let err = render("#define($loop)$loop#end$loop", &context).unwrap_err();
        assert_eq!(err, TemplateError::DepthExceeded(MAX_RENDER_DEPTH));
    }

    #[test]
    fn test_map_put_and_list_add() {
        let context = ctx(json!({}));
        let out = render(
            "#set($m = {})#set($l = [])#set($ignored = $m.put('k', 'v'))#set($ignored = $l.add(1))$m $l",
            &context,
        )
        .unwrap();
        assert_eq!(out, "{k=v} [1]");
    }

    #[test]
    fn test_nested_set_creates_maps() {
        let context = ctx(json!({}));
        let out = render("#set($a.b.c = 1)$a.b.c", &context).unwrap();
        assert_eq!(out, "1");
    }

    #[test]
    fn test_interpolated_strings() {
        let context = ctx(json!({"who": "world"}));
        let out = render("#set($s = \"hello $who\")$s.toUpperCase()", &context).unwrap();
        assert_eq!(out, "HELLO WORLD");
    }

    #[test]
    fn test_stop_ends_output() {
        let context = ctx(json!({}));
        assert_eq!(render("a#stop b", &context).unwrap(), "a");
    }

    #[test]
    fn test_loose_number_string_equality() {
        let context = ctx(json!({"code": "200"}));
        assert_eq!(render("#if($code == 200)ok#end", &context).unwrap(), "ok");
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(stringify(&json!(2.0)), "2");
        assert_eq!(stringify(&json!(2.5)), "2.5");
        assert_eq!(stringify(&json!({"a": [1, true]})), "{a=[1, true]}");
    }
}
