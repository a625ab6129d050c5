//! Static comparison of the fields a template uses against the fields a view
//! model provides.

use std::{collections::BTreeMap, fmt};

use serde_json::Value;

use crate::template::{
    parse::{Arg, Node, Pipeline},
    store::TemplateSet,
};

/// A field name and the fields nested below it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldTree {
    pub name: String,
    pub children: BTreeMap<String, FieldTree>,
}

impl FieldTree {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            children: BTreeMap::new(),
        }
    }

    /// Add a chain of nested fields, returning the innermost one.
    pub fn insert_path(&mut self, path: &[String]) -> &mut FieldTree {
        path.iter().fold(self, |node, part| {
            node.children
                .entry(part.clone())
                .or_insert_with(|| FieldTree::new(part))
        })
    }

    /// The fields referenced when executing the template `entry` of `set`,
    /// following `template` calls, relative to the data it is executed with.
    pub fn from_template(set: &TemplateSet, entry: &str) -> Self {
        let mut collector = Collector {
            set,
            stack: Vec::new(),
            vars: Vec::new(),
            tree: FieldTree::new("Root"),
        };
        collector.template(entry, &[]);

        collector.tree
    }

    /// The fields a serialized view model exposes. Objects nest, everything
    /// else is a leaf.
    pub fn from_value(value: &Value) -> Self {
        let mut tree = FieldTree::new("Root");
        if let Value::Object(map) = value {
            tree.children = children(map);
        }
        tree
    }
}

fn children(map: &serde_json::Map<String, Value>) -> BTreeMap<String, FieldTree> {
    map.iter()
        .map(|(key, value)| {
            let mut child = FieldTree::new(key);
            if let Value::Object(inner) = value {
                child.children = children(inner);
            }
            (key.clone(), child)
        })
        .collect()
}

/// Fields a template uses that the data lacks, and the other way round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mismatch {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl Mismatch {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.extra.is_empty() {
            parts.push(format!("extra fields [{}]", self.extra.join(", ")));
        }
        if !self.missing.is_empty() {
            parts.push(format!("missing fields [{}]", self.missing.join(", ")));
        }
        f.write_str(&parts.join(" "))
    }
}

/// Compare the fields used by a template with the fields of the data.
pub fn compare(template: &FieldTree, data: &FieldTree) -> Mismatch {
    let mut mismatch = Mismatch::default();
    compare_into(template, data, &mut mismatch);
    mismatch.missing.sort();
    mismatch.extra.sort();
    mismatch
}

fn compare_into(template: &FieldTree, data: &FieldTree, mismatch: &mut Mismatch) {
    for (name, child) in &template.children {
        match data.children.get(name) {
            Some(data_child) => compare_into(child, data_child, mismatch),
            None => mismatch.missing.push(format!("{}->{name}", data.name)),
        }
    }

    for name in data.children.keys() {
        if !template.children.contains_key(name) {
            mismatch.extra.push(format!("{}->{name}", template.name));
        }
    }
}

struct Collector<'a> {
    set: &'a TemplateSet,
    /// Templates currently being walked.
    stack: Vec<String>,
    /// Variables in scope and the data path each holds, when it is a plain
    /// path.
    vars: Vec<(String, Option<Vec<String>>)>,
    tree: FieldTree,
}

impl Collector<'_> {
    /// Walk a template whose dot and `$` are both at `dot`.
    fn template(&mut self, name: &str, dot: &[String]) {
        if self.stack.iter().any(|n| n == name) {
            return;
        }
        let set = self.set;
        let Some(nodes) = set.lookup(name) else {
            return;
        };

        self.stack.push(name.to_string());
        let outer = std::mem::replace(&mut self.vars, vec![("$".to_string(), Some(dot.to_vec()))]);
        self.nodes(nodes, Some(dot));
        self.vars = outer;
        self.stack.pop();
    }

    /// Walk a list of nodes. A `dot` of [`None`] is a value whose shape is
    /// unknown, such as a range element; only paths through variables are
    /// recorded there.
    fn nodes(&mut self, nodes: &[Node], dot: Option<&[String]>) {
        let mark = self.vars.len();

        for node in nodes {
            match node {
                Node::Text(_) => {}
                Node::Action(pipe) => {
                    self.pipeline(pipe, dot);
                    self.declare(pipe, dot);
                }
                Node::If(branch) => {
                    let inner = self.vars.len();
                    self.pipeline(&branch.pipe, dot);
                    self.declare(&branch.pipe, dot);
                    self.nodes(&branch.list, dot);
                    if let Some(list) = &branch.else_list {
                        self.nodes(list, dot);
                    }
                    self.vars.truncate(inner);
                }
                Node::Range(branch) => {
                    let inner = self.vars.len();
                    self.pipeline(&branch.pipe, dot);
                    // loop variables hold elements, whose fields aren't known
                    for name in &branch.pipe.decl {
                        self.vars.push((name.clone(), None));
                    }
                    self.nodes(&branch.list, None);
                    if let Some(list) = &branch.else_list {
                        self.nodes(list, dot);
                    }
                    self.vars.truncate(inner);
                }
                Node::With(branch) => {
                    let inner = self.vars.len();
                    self.pipeline(&branch.pipe, dot);
                    let target = self.target(&branch.pipe, dot);
                    self.declare(&branch.pipe, dot);
                    self.nodes(&branch.list, target.as_deref());
                    if let Some(list) = &branch.else_list {
                        self.nodes(list, dot);
                    }
                    self.vars.truncate(inner);
                }
                Node::Template { name, pipe: None } => {
                    if let Some(dot) = dot {
                        self.template(name, dot);
                    }
                }
                Node::Template {
                    name,
                    pipe: Some(pipe),
                } => {
                    self.pipeline(pipe, dot);
                    if let Some(target) = self.target(pipe, dot) {
                        self.template(name, &target);
                    }
                }
            }
        }

        self.vars.truncate(mark);
    }

    fn pipeline(&mut self, pipe: &Pipeline, dot: Option<&[String]>) {
        for cmd in &pipe.cmds {
            for arg in &cmd.args {
                match arg {
                    Arg::Field(path) => {
                        if let Some(dot) = dot {
                            self.tree.insert_path(&join(dot, path));
                        }
                    }
                    Arg::Variable { name, fields } => {
                        if let Some(base) = self.variable(name) {
                            let path = join(&base, fields);
                            self.tree.insert_path(&path);
                        }
                    }
                    Arg::Pipeline(inner) => self.pipeline(inner, dot),
                    _ => {}
                }
            }
        }
    }

    /// Bring the variables a pipeline declares into scope.
    fn declare(&mut self, pipe: &Pipeline, dot: Option<&[String]>) {
        match pipe.decl.as_slice() {
            [] => {}
            [name] => {
                let target = self.target(pipe, dot);
                self.vars.push((name.clone(), target));
            }
            names => {
                for name in names {
                    self.vars.push((name.clone(), None));
                }
            }
        }
    }

    /// The data path a variable holds, if known.
    fn variable(&self, name: &str) -> Option<Vec<String>> {
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .and_then(|(_, path)| path.clone())
    }

    /// The data path a pipeline evaluates to, when it is a plain path.
    fn target(&self, pipe: &Pipeline, dot: Option<&[String]>) -> Option<Vec<String>> {
        match pipe.single_arg()? {
            Arg::Dot => dot.map(<[String]>::to_vec),
            Arg::Field(path) => dot.map(|dot| join(dot, path)),
            Arg::Variable { name, fields } => Some(join(&self.variable(name)?, fields)),
            _ => None,
        }
    }
}

fn join(base: &[String], path: &[String]) -> Vec<String> {
    base.iter().chain(path).cloned().collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::template::funcs::FuncMap;

    fn used_fields(src: &str) -> FieldTree {
        let mut set = TemplateSet::default();
        set.parse("page", src, &FuncMap::new()).expect("parse");
        FieldTree::from_template(&set, "page")
    }

    fn paths(tree: &FieldTree) -> Vec<String> {
        fn walk(tree: &FieldTree, prefix: &str, out: &mut Vec<String>) {
            for (name, child) in &tree.children {
                let path = format!("{prefix}.{name}");
                out.push(path.clone());
                walk(child, &path, out);
            }
        }

        let mut out = Vec::new();
        walk(tree, "", &mut out);
        out
    }

    #[test]
    fn collects_nested_fields() {
        let tree = used_fields(concat!(
            "{{ .Title }}{{ if .User.Admin }}{{ .User.Name }}{{ else }}{{ .Guest }}{{ end }}",
            "{{ printf \"%s\" (len .Items) }}{{ $.Footer }}",
        ));
        assert_eq!(
            paths(&tree),
            vec![".Footer", ".Guest", ".Items", ".Title", ".User", ".User.Admin", ".User.Name"]
        );
    }

    #[test]
    fn range_and_with_scopes() {
        let tree = used_fields(concat!(
            "{{ range .Rows }}{{ .Ignored }}{{ else }}{{ .NoRows }}{{ end }}",
            "{{ with .Profile }}{{ .Bio }}{{ $.Root }}{{ else }}{{ .Fallback }}{{ end }}",
            "{{ with len .Rows }}{{ .Unknown }}{{ end }}",
        ));
        assert_eq!(
            paths(&tree),
            vec![".Fallback", ".NoRows", ".Profile", ".Profile.Bio", ".Root", ".Rows"]
        );
    }

    #[test]
    fn template_calls_follow_the_argument() {
        let tree = used_fields(concat!(
            "{{ define \"card\" }}{{ .Name }}{{ $.Id }}{{ template \"card\" .Child }}{{ end }}",
            "{{ template \"card\" .Owner }}{{ define \"meta\" }}{{ .Title }}{{ end }}",
            "{{ template \"meta\" }}{{ define \"unused\" }}{{ .Never }}{{ end }}",
        ));
        assert_eq!(
            paths(&tree),
            vec![".Owner", ".Owner.Child", ".Owner.Id", ".Owner.Name", ".Title"]
        );
    }

    #[test]
    fn root_paths_inside_range_bodies() {
        let tree = used_fields(concat!(
            "{{ define \"row\" }}{{ .Label }}{{ end }}",
            "{{ range .Items }}{{ .Unknown }}{{ $.Title }}{{ template \"row\" $.Header }}{{ end }}",
            "{{ with len .Items }}{{ $.Count }}{{ end }}",
        ));
        assert_eq!(
            paths(&tree),
            vec![".Count", ".Header", ".Header.Label", ".Items", ".Title"]
        );

        let data = FieldTree::from_value(&json!({
            "Items": ["a"],
            "Title": "t",
            "Header": {"Label": "l"},
            "Count": 1,
        }));
        assert!(compare(&tree, &data).is_empty());
    }

    #[test]
    fn variables_follow_their_paths() {
        let tree = used_fields(concat!(
            "{{ $u := .User }}{{ $u.Name }}",
            "{{ with $p := .Profile }}{{ $p.Bio }}{{ end }}",
            "{{ range $i, $e := .Rows }}{{ $e.Hidden }}{{ $u.Email }}{{ end }}",
            "{{ if $c := .Settings.Color }}{{ $c }}{{ end }}",
        ));
        assert_eq!(
            paths(&tree),
            vec![
                ".Profile",
                ".Profile.Bio",
                ".Rows",
                ".Settings",
                ".Settings.Color",
                ".User",
                ".User.Email",
                ".User.Name",
            ]
        );

        let data = FieldTree::from_value(&json!({"User": {"Name": "ann"}}));
        assert!(compare(&used_fields("{{ $u := .User }}{{ $u.Name }}"), &data).is_empty());
    }

    #[test]
    fn data_fields() {
        let tree = FieldTree::from_value(&json!({
            "Email": "a@b.c",
            "User": {"Name": "ann", "Tags": ["x"]},
            "Rows": [{"Hidden": 1}],
        }));
        assert_eq!(paths(&tree), vec![".Email", ".Rows", ".User", ".User.Name", ".User.Tags"]);
        assert!(FieldTree::from_value(&json!("scalar")).children.is_empty());
    }

    #[test]
    fn comparison() {
        let template = used_fields("{{ .Email }}{{ .User.Name }}{{ .User.Age }}{{ .Nope }}");
        let data = FieldTree::from_value(&json!({
            "Email": "",
            "User": {"Name": "", "Role": ""},
            "Spare": 1,
        }));

        let mismatch = compare(&template, &data);
        assert_eq!(mismatch.missing, vec!["Root->Nope", "User->Age"]);
        assert_eq!(mismatch.extra, vec!["Root->Spare", "User->Role"]);
        assert_eq!(
            mismatch.to_string(),
            "extra fields [Root->Spare, User->Role] missing fields [Root->Nope, User->Age]"
        );

        let same = FieldTree::from_value(&json!({"Email": "", "User": {"Name": ""}}));
        assert!(compare(&used_fields("{{ .Email }}{{ .User.Name }}"), &same).is_empty());
    }
}
