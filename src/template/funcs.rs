//! Functions callable from templates.

use std::{cmp::Ordering, collections::HashMap, fmt, sync::Arc};

use serde_json::Value;

/// A template function. Arguments arrive fully evaluated; an `Err` aborts
/// execution with its message.
pub type Func = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

pub(crate) static NULL: Value = Value::Null;

/// Named functions available to templates, starting from the builtins.
/// Inserting a name that already exists replaces it.
#[derive(Clone)]
pub struct FuncMap {
    funcs: HashMap<String, Func>,
}

impl FuncMap {
    pub fn new() -> Self {
        let mut map = Self {
            funcs: HashMap::new(),
        };

        map.insert("and", and);
        map.insert("or", or);
        map.insert("not", |args| Ok(Value::Bool(!truth(exactly_one("not", args)?))));
        map.insert("len", len);
        map.insert("index", index);
        map.insert("eq", eq);
        map.insert("ne", |args| Ok(Value::Bool(!equal(two("ne", args)?)?)));
        map.insert("lt", |args| compare("lt", args, Ordering::is_lt));
        map.insert("le", |args| compare("le", args, Ordering::is_le));
        map.insert("gt", |args| compare("gt", args, Ordering::is_gt));
        map.insert("ge", |args| compare("ge", args, Ordering::is_ge));
        map.insert("print", |args| Ok(Value::String(print(args))));
        map.insert("println", |args| {
            let line: Vec<String> = args.iter().map(|a| display(a).to_string()).collect();
            Ok(Value::String(line.join(" ") + "\n"))
        });
        map.insert("printf", printf);
        map.insert("urlquery", |args| {
            Ok(Value::String(
                url::form_urlencoded::byte_serialize(print(args).as_bytes()).collect(),
            ))
        });

        map
    }

    /// Add or replace a function.
    pub fn insert<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.funcs.insert(name.to_string(), Arc::new(func));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Func> {
        self.funcs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }
}

impl Default for FuncMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FuncMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.funcs.keys().collect();
        names.sort();
        f.debug_tuple("FuncMap").field(&names).finish()
    }
}

/// Whether a value counts as true in a condition: false, zero, null and
/// empty strings, arrays and objects are false.
pub(crate) fn truth(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Formats a value the way it is printed into template output.
pub(crate) fn display(value: &Value) -> Display<'_> {
    Display(value)
}

pub(crate) struct Display<'a>(&'a Value);

impl fmt::Display for Display<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", display(item))?;
                }
                f.write_str("]")
            }
            Value::Object(map) => {
                // serde_json keeps object keys sorted
                f.write_str("map[")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key}:{}", display(item))?;
                }
                f.write_str("]")
            }
        }
    }
}

fn exactly_one<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, String> {
    match args {
        [arg] => Ok(arg),
        _ => Err(format!("{name}: want 1 argument, got {}", args.len())),
    }
}

fn two<'a>(name: &str, args: &'a [Value]) -> Result<(&'a Value, &'a Value), String> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(format!("{name}: want 2 arguments, got {}", args.len())),
    }
}

fn and(args: &[Value]) -> Result<Value, String> {
    let last = args.last().ok_or("and: want at least 1 argument")?;
    Ok(args.iter().find(|a| !truth(a)).unwrap_or(last).clone())
}

fn or(args: &[Value]) -> Result<Value, String> {
    let last = args.last().ok_or("or: want at least 1 argument")?;
    Ok(args.iter().find(|a| truth(a)).unwrap_or(last).clone())
}

fn len(args: &[Value]) -> Result<Value, String> {
    let n = match exactly_one("len", args)? {
        Value::String(s) => s.len(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        other => return Err(format!("len of {}", kind(other))),
    };

    Ok(Value::from(n))
}

fn index(args: &[Value]) -> Result<Value, String> {
    let (mut item, keys) = args.split_first().ok_or("index: want at least 1 argument")?;

    for key in keys {
        item = match (item, key) {
            (Value::Array(a), Value::Number(n)) => {
                let i = n
                    .as_u64()
                    .ok_or_else(|| format!("index: bad index {n}"))?;
                a.get(i as usize)
                    .ok_or_else(|| format!("index: index out of range: {i}"))?
            }
            (Value::Object(o), Value::String(k)) => o.get(k).unwrap_or(&NULL),
            (Value::Null, _) => &NULL,
            (item, key) => {
                return Err(format!(
                    "index: can't index item of type {} with {}",
                    kind(item),
                    kind(key)
                ))
            }
        };
    }

    Ok(item.clone())
}

fn eq(args: &[Value]) -> Result<Value, String> {
    let (first, rest) = args.split_first().ok_or("eq: missing argument for comparison")?;
    if rest.is_empty() {
        return Err("eq: missing argument for comparison".to_string());
    }

    for other in rest {
        if equal((first, other))? {
            return Ok(Value::Bool(true));
        }
    }

    Ok(Value::Bool(false))
}

fn equal((a, b): (&Value, &Value)) -> Result<bool, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(x.as_f64() == y.as_f64()),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            Err(format!("incompatible types for comparison: {}", kind(a)))
        }
        (Value::Null, _) | (_, Value::Null) => Ok(a == b),
        _ if std::mem::discriminant(a) == std::mem::discriminant(b) => Ok(a == b),
        _ => Err(format!(
            "incompatible types for comparison: {} and {}",
            kind(a),
            kind(b)
        )),
    }
}

fn compare(name: &str, args: &[Value], test: fn(Ordering) -> bool) -> Result<Value, String> {
    let ordering = match two(name, args)? {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (a, b) => {
            return Err(format!(
                "{name}: invalid types for comparison: {} and {}",
                kind(a),
                kind(b)
            ))
        }
    };

    ordering
        .map(|o| Value::Bool(test(o)))
        .ok_or_else(|| format!("{name}: values are not comparable"))
}

/// Joins the arguments, adding spaces between operands when neither is a
/// string.
fn print(args: &[Value]) -> String {
    let mut out = String::new();

    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !arg.is_string() && !args[i - 1].is_string() {
            out.push(' ');
        }
        out.push_str(&display(arg).to_string());
    }

    out
}

fn printf(args: &[Value]) -> Result<Value, String> {
    let (format, mut rest) = match args.split_first() {
        Some((Value::String(format), rest)) => (format, rest.iter()),
        _ => return Err("printf: first argument must be a format string".to_string()),
    };

    let mut out = String::new();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }

        let Some(arg) = rest.next() else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };

        match (verb, arg) {
            ('v' | 's', arg) => out.push_str(&display(arg).to_string()),
            ('d', Value::Number(n)) if n.is_i64() || n.is_u64() => out.push_str(&n.to_string()),
            ('t', Value::Bool(b)) => out.push_str(&b.to_string()),
            ('q', Value::String(s)) => out.push_str(&format!("{s:?}")),
            (verb, arg) => out.push_str(&format!("%!{verb}({})", display(arg))),
        }
    }

    let extra: Vec<String> = rest.map(|a| display(a).to_string()).collect();
    if !extra.is_empty() {
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }

    Ok(Value::String(out))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "slice",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value, String> {
        let funcs = FuncMap::new();
        let func = funcs.get(name).expect("builtin exists");
        func(args)
    }

    #[test]
    fn truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!truth(&falsy), "{falsy} should be false");
        }
        for truthy in [json!(true), json!(-1), json!("x"), json!([0]), json!({"a": null})] {
            assert!(truth(&truthy), "{truthy} should be true");
        }
    }

    #[test]
    fn display_values() {
        assert_eq!(display(&json!(null)).to_string(), "");
        assert_eq!(display(&json!([1, "a", true])).to_string(), "[1 a true]");
        assert_eq!(display(&json!({"b": 2, "a": [1]})).to_string(), "map[a:[1] b:2]");
    }

    #[test]
    fn logic() {
        assert_eq!(call("and", &[json!(1), json!(""), json!(2)]), Ok(json!("")));
        assert_eq!(call("and", &[json!(1), json!(2)]), Ok(json!(2)));
        assert_eq!(call("or", &[json!(0), json!("x")]), Ok(json!("x")));
        assert_eq!(call("or", &[json!(0), json!(null)]), Ok(json!(null)));
        assert_eq!(call("not", &[json!([])]), Ok(json!(true)));
        assert!(call("not", &[]).is_err());
    }

    #[test]
    fn comparisons() {
        assert_eq!(call("eq", &[json!(1), json!(1.0)]), Ok(json!(true)));
        assert_eq!(call("eq", &[json!("a"), json!("b"), json!("a")]), Ok(json!(true)));
        assert_eq!(call("ne", &[json!("a"), json!("b")]), Ok(json!(true)));
        assert_eq!(call("eq", &[json!(null), json!("a")]), Ok(json!(false)));
        assert!(call("eq", &[json!(1), json!("1")]).is_err());
        assert_eq!(call("lt", &[json!(1), json!(2)]), Ok(json!(true)));
        assert_eq!(call("ge", &[json!("b"), json!("a")]), Ok(json!(true)));
        assert!(call("gt", &[json!(1), json!("a")]).is_err());
    }

    #[test]
    fn collections() {
        assert_eq!(call("len", &[json!("héllo")]), Ok(json!(6)));
        assert_eq!(call("len", &[json!([1, 2])]), Ok(json!(2)));
        assert!(call("len", &[json!(3)]).is_err());

        let data = json!({"rows": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(
            call("index", &[data.clone(), json!("rows"), json!(1), json!("name")]),
            Ok(json!("b"))
        );
        assert_eq!(call("index", &[data.clone(), json!("nope")]), Ok(json!(null)));
        assert!(call("index", &[data, json!("rows"), json!(5)]).is_err());
    }

    #[test]
    fn printing() {
        assert_eq!(call("print", &[json!("a"), json!(1), json!(2)]), Ok(json!("a1 2")));
        assert_eq!(call("println", &[json!("a"), json!(1)]), Ok(json!("a 1\n")));
        assert_eq!(
            call("printf", &[json!("%s has %d items (%v) %q %t 100%%"), json!("cart"), json!(3), json!([1, 2]), json!("x"), json!(true)]),
            Ok(json!("cart has 3 items ([1 2]) \"x\" true 100%"))
        );
        assert_eq!(call("printf", &[json!("%d %s")]), Ok(json!("%!d(MISSING) %!s(MISSING)")));
        assert_eq!(call("printf", &[json!("%d"), json!("x")]), Ok(json!("%!d(x)")));
        assert_eq!(call("urlquery", &[json!("a b&c")]), Ok(json!("a+b%26c")));
    }

    #[test]
    fn custom_functions_replace_builtins() {
        let mut funcs = FuncMap::new();
        funcs.insert("len", |_| Ok(json!(42)));
        funcs.insert("shout", |args| Ok(json!(print(args).to_uppercase())));

        assert!(funcs.contains("shout"));
        assert_eq!(funcs.get("len").expect("len")(&[json!([])]), Ok(json!(42)));
        assert_eq!(funcs.get("shout").expect("shout")(&[json!("hi")]), Ok(json!("HI")));
    }
}
