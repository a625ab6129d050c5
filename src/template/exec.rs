//! Template execution.

use std::mem;

use serde_json::Value;

use crate::template::{
    funcs::{display, truth, FuncMap, NULL},
    parse::{Arg, Branch, Command, Node, Pipeline},
    store::TemplateSet,
};

/// Nested `template` calls deeper than this are assumed to be recursive.
const MAX_DEPTH: usize = 100;

/// Execute the template `name` of `set` against `data`, returning the
/// rendered output or an error message.
pub(crate) fn execute(
    set: &TemplateSet,
    funcs: &FuncMap,
    name: &str,
    data: &Value,
) -> Result<String, String> {
    let nodes = set
        .lookup(name)
        .ok_or_else(|| format!("no such template {name:?}"))?;

    let mut state = State {
        set,
        funcs,
        out: String::new(),
        vars: vec![("$".to_string(), data.clone())],
        depth: 0,
    };
    state.walk(nodes, data)?;

    Ok(state.out)
}

struct State<'a> {
    set: &'a TemplateSet,
    funcs: &'a FuncMap,
    out: String,
    vars: Vec<(String, Value)>,
    depth: usize,
}

impl State<'_> {
    fn walk(&mut self, nodes: &[Node], dot: &Value) -> Result<(), String> {
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Action(pipe) => {
                    let value = self.pipeline(pipe, dot)?;
                    if pipe.decl.is_empty() {
                        escape_into(&mut self.out, &display(&value).to_string());
                    }
                }
                Node::If(branch) => self.scoped(|s| {
                    let cond = s.pipeline(&branch.pipe, dot)?;
                    if truth(&cond) {
                        s.walk(&branch.list, dot)
                    } else {
                        s.walk_else(branch, dot)
                    }
                })?,
                Node::With(branch) => self.scoped(|s| {
                    let value = s.pipeline(&branch.pipe, dot)?;
                    if truth(&value) {
                        s.walk(&branch.list, &value)
                    } else {
                        s.walk_else(branch, dot)
                    }
                })?,
                Node::Range(branch) => self.scoped(|s| s.range(branch, dot))?,
                Node::Template { name, pipe } => {
                    let data = match pipe {
                        Some(pipe) => self.scoped(|s| s.pipeline(pipe, dot))?,
                        None => dot.clone(),
                    };
                    self.call_template(name, data)?;
                }
            }
        }

        Ok(())
    }

    fn walk_else(&mut self, branch: &Branch, dot: &Value) -> Result<(), String> {
        match &branch.else_list {
            Some(list) => self.walk(list, dot),
            None => Ok(()),
        }
    }

    /// Run `f`, dropping any variables it declares.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        let mark = self.vars.len();
        let result = f(self);
        self.vars.truncate(mark);
        result
    }

    fn range(&mut self, branch: &Branch, dot: &Value) -> Result<(), String> {
        let value = self.pipeline(&branch.pipe, dot)?;
        // the pipeline's own declaration is replaced by the loop variables
        self.vars.truncate(self.vars.len() - branch.pipe.decl.len());

        let items: Vec<(Value, Value)> = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries
                    .into_iter()
                    .map(|(k, v)| (Value::String(k), v))
                    .collect()
            }
            Value::Number(n) => {
                let count = n
                    .as_u64()
                    .ok_or_else(|| format!("range can't iterate over {n}"))?;
                (0..count).map(|i| (Value::from(i), Value::from(i))).collect()
            }
            Value::Null => Vec::new(),
            other => return Err(format!("range can't iterate over {other}")),
        };

        if items.is_empty() {
            return self.walk_else(branch, dot);
        }

        let mark = self.vars.len();
        for (key, item) in items {
            self.vars.truncate(mark);
            match branch.pipe.decl.as_slice() {
                [elem] => self.vars.push((elem.clone(), item.clone())),
                [index, elem] => {
                    self.vars.push((index.clone(), key));
                    self.vars.push((elem.clone(), item.clone()));
                }
                _ => {}
            }
            self.walk(&branch.list, &item)?;
        }

        Ok(())
    }

    fn call_template(&mut self, name: &str, data: Value) -> Result<(), String> {
        let set = self.set;
        let nodes = set
            .lookup(name)
            .ok_or_else(|| format!("no such template {name:?}"))?;

        if self.depth >= MAX_DEPTH {
            return Err(format!("exceeded maximum template depth ({MAX_DEPTH})"));
        }

        self.depth += 1;
        let outer = mem::replace(&mut self.vars, vec![("$".to_string(), data.clone())]);
        let result = self.walk(nodes, &data);
        self.vars = outer;
        self.depth -= 1;

        result
    }

    fn pipeline(&mut self, pipe: &Pipeline, dot: &Value) -> Result<Value, String> {
        let mut value = None;
        for cmd in &pipe.cmds {
            value = Some(self.command(cmd, dot, value)?);
        }
        let value = value.unwrap_or(Value::Null);

        if let [name] = pipe.decl.as_slice() {
            self.vars.push((name.clone(), value.clone()));
        } else if let [index, elem] = pipe.decl.as_slice() {
            // only meaningful in range, which replaces these per iteration
            self.vars.push((index.clone(), Value::Null));
            self.vars.push((elem.clone(), value.clone()));
        }

        Ok(value)
    }

    fn command(
        &mut self,
        cmd: &Command,
        dot: &Value,
        piped: Option<Value>,
    ) -> Result<Value, String> {
        let Some((first, rest)) = cmd.args.split_first() else {
            return Err("empty command".to_string());
        };

        if let Arg::Function(name) = first {
            let mut args = Vec::with_capacity(rest.len() + 1);
            for arg in rest {
                args.push(self.arg(arg, dot)?);
            }
            args.extend(piped);

            let func = self
                .funcs
                .get(name)
                .ok_or_else(|| format!("function {name:?} not defined"))?;
            return func(&args).map_err(|e| format!("error calling {name}: {e}"));
        }

        if !rest.is_empty() || piped.is_some() {
            return Err(format!("can't give argument to non-function {first:?}"));
        }

        self.arg(first, dot)
    }

    fn arg(&mut self, arg: &Arg, dot: &Value) -> Result<Value, String> {
        Ok(match arg {
            Arg::Dot => dot.clone(),
            Arg::Field(path) => fields(dot, path)?.clone(),
            Arg::Variable { name, fields: path } => {
                let value = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| format!("undefined variable {name:?}"))?;
                fields(value, path)?.clone()
            }
            Arg::Function(name) => {
                let func = self
                    .funcs
                    .get(name)
                    .ok_or_else(|| format!("function {name:?} not defined"))?;
                func(&[]).map_err(|e| format!("error calling {name}: {e}"))?
            }
            Arg::Bool(b) => Value::Bool(*b),
            Arg::Nil => Value::Null,
            Arg::Number(n) => Value::Number(n.clone()),
            Arg::Str(s) => Value::String(s.clone()),
            Arg::Pipeline(pipe) => self.scoped(|s| s.pipeline(pipe, dot))?,
        })
    }
}

/// Follow a chain of field names.
fn fields<'v>(mut value: &'v Value, path: &[String]) -> Result<&'v Value, String> {
    for field in path {
        value = match value {
            Value::Object(map) => map
                .get(field)
                .ok_or_else(|| format!("can't evaluate field {field}"))?,
            Value::Null => &NULL,
            other => return Err(format!("can't evaluate field {field} in {other}")),
        };
    }

    Ok(value)
}

/// Append `s` to `out`, escaped for HTML text and quoted attributes.
pub(crate) fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '\0' => out.push('\u{FFFD}'),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn render(src: &str, data: Value) -> Result<String, String> {
        let funcs = FuncMap::new();
        let mut set = TemplateSet::default();
        set.parse("t", src, &funcs).map_err(|e| e.to_string())?;
        execute(&set, &funcs, "t", &data)
    }

    #[test]
    fn fields_and_escaping() {
        let out = render(
            "<p>{{ .User.Name }} {{ .Bio }}</p>",
            json!({"User": {"Name": "Ann"}, "Bio": "<b>\"hi\" & 'bye'</b>"}),
        );
        assert_eq!(
            out.as_deref(),
            Ok("<p>Ann &lt;b&gt;&#34;hi&#34; &amp; &#39;bye&#39;&lt;/b&gt;</p>")
        );
    }

    #[test]
    fn missing_and_null_fields() {
        let err = render("{{ .Nope }}", json!({"Name": "x"})).unwrap_err();
        assert!(err.contains("can't evaluate field Nope"));

        assert_eq!(render("[{{ .User.Name }}]", json!({"User": null})).as_deref(), Ok("[]"));
        assert!(render("{{ .Name.First }}", json!({"Name": "x"})).is_err());
    }

    #[test]
    fn conditionals() {
        let src = "{{ if .A }}a{{ else if .B }}b{{ else }}c{{ end }}";
        assert_eq!(render(src, json!({"A": 1, "B": 1})).as_deref(), Ok("a"));
        assert_eq!(render(src, json!({"A": 0, "B": "x"})).as_deref(), Ok("b"));
        assert_eq!(render(src, json!({"A": [], "B": ""})).as_deref(), Ok("c"));

        let src = "{{ with .User }}{{ .Name }}{{ else }}anonymous{{ end }}";
        assert_eq!(render(src, json!({"User": {"Name": "Ann"}})).as_deref(), Ok("Ann"));
        assert_eq!(render(src, json!({"User": null})).as_deref(), Ok("anonymous"));
    }

    #[test]
    fn ranges() {
        let data = json!({"Items": ["a", "b"], "Map": {"y": 2, "x": 1}, "Empty": []});

        assert_eq!(
            render("{{ range $i, $e := .Items }}{{ $i }}={{ $e }};{{ end }}", data.clone()).as_deref(),
            Ok("0=a;1=b;")
        );
        assert_eq!(
            render("{{ range $k, $v := .Map }}{{ $k }}{{ . }}{{ end }}", data.clone()).as_deref(),
            Ok("x1y2")
        );
        assert_eq!(
            render("{{ range .Empty }}x{{ else }}none{{ end }}", data.clone()).as_deref(),
            Ok("none")
        );
        assert_eq!(render("{{ range 3 }}{{ . }}{{ end }}", data.clone()).as_deref(), Ok("012"));
        assert_eq!(
            render("{{ range .Items }}{{ $.Map.x }}{{ end }}", data.clone()).as_deref(),
            Ok("11")
        );
        assert!(render("{{ range .Items }}{{ end }}{{ range \"s\" }}{{ end }}", data).is_err());
    }

    #[test]
    fn variables_and_pipes() {
        let data = json!({"Name": "ann", "Items": [1, 2, 3]});
        assert_eq!(
            render("{{ $n := .Name }}{{ $n | printf \"<%s>\" }}", data.clone()).as_deref(),
            Ok("&lt;ann&gt;")
        );
        assert_eq!(
            render("{{ if gt (len .Items) 2 }}many{{ end }}", data.clone()).as_deref(),
            Ok("many")
        );
        assert!(render("{{ .Name 1 }}", data).unwrap_err().contains("non-function"));
    }

    #[test]
    fn nested_templates() {
        let src = concat!(
            "{{ define \"user\" }}<{{ .Name }}|{{ $.Name }}>{{ end }}",
            "{{ template \"user\" .User }}{{ template \"plain\" }}",
            "{{ define \"plain\" }}[{{ .Title }}]{{ end }}",
        );
        let data = json!({"Title": "t", "User": {"Name": "ann"}});
        assert_eq!(render(src, data).as_deref(), Ok("<ann|ann>[t]"));

        let err = render("{{ template \"missing\" }}", json!({})).unwrap_err();
        assert!(err.contains("no such template"));

        let err = render("{{ define \"loop\" }}{{ template \"loop\" }}{{ end }}{{ template \"loop\" }}", json!({}))
            .unwrap_err();
        assert!(err.contains("maximum template depth"));
    }
}
