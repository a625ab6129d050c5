//! Loading templates into a registry of pages.

use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs, io,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use serde_json::Value;
use tracing::debug;

use crate::template::{
    exec,
    fields::{compare, FieldTree},
    funcs::FuncMap,
    parse::{parse, Node, ParseError},
    TemplateError,
};

/// Where template files come from. Paths are `/`-separated.
pub trait TemplateSource: fmt::Debug + Send + Sync {
    /// List the files below `dir`, relative to it and sorted. Only files
    /// directly in `dir` are listed unless `recursive` is set.
    fn list(&self, dir: &str, recursive: bool) -> io::Result<Vec<String>>;

    /// Read a file.
    fn read(&self, path: &str) -> io::Result<String>;
}

/// Templates read from a directory on disk.
#[derive(Clone, Debug)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateSource for DirSource {
    fn list(&self, dir: &str, recursive: bool) -> io::Result<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![String::new()];

        while let Some(rel) = pending.pop() {
            for entry in fs::read_dir(self.root.join(dir).join(&rel))? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = join_path(&rel, &name);

                if entry.file_type()?.is_dir() {
                    if recursive {
                        pending.push(path);
                    }
                } else {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    fn read(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.root.join(path))
    }
}

/// Templates held in memory, keyed by path.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: BTreeMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.to_string());
        self
    }
}

impl TemplateSource for MemorySource {
    fn list(&self, dir: &str, recursive: bool) -> io::Result<Vec<String>> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir.trim_end_matches('/'))
        };

        let files: Vec<String> = self
            .files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|rel| recursive || !rel.contains('/'))
            .map(str::to_string)
            .collect();

        if files.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no templates in {dir:?}"),
            ));
        }

        Ok(files)
    }

    fn read(&self, path: &str) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no template {path:?}"))
        })
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{}/{name}", dir.trim_end_matches('/'))
    }
}

/// Named templates that can call each other.
#[derive(Clone, Debug, Default)]
pub struct TemplateSet {
    trees: HashMap<String, Arc<Vec<Node>>>,
}

impl TemplateSet {
    /// Parse `src` as the template `name`, adding it and everything it
    /// defines. Returns the names that were added.
    ///
    /// A definition with only whitespace in it does not replace an existing
    /// template of the same name.
    pub fn parse(
        &mut self,
        name: &str,
        src: &str,
        funcs: &FuncMap,
    ) -> Result<Vec<String>, ParseError> {
        let defs = parse(name, src, &|f| funcs.contains(f))?;

        let mut added = Vec::with_capacity(defs.len());
        for (def, nodes) in defs {
            if is_blank(&nodes) && self.trees.contains_key(&def) {
                continue;
            }
            self.trees.insert(def.clone(), Arc::new(nodes));
            added.push(def);
        }

        Ok(added)
    }

    pub fn lookup(&self, name: &str) -> Option<&[Node]> {
        self.trees.get(name).map(|nodes| nodes.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.trees.contains_key(name)
    }
}

fn is_blank(nodes: &[Node]) -> bool {
    nodes.iter().all(|node| match node {
        Node::Text(text) => text.trim().is_empty(),
        _ => false,
    })
}

/// Where to find templates within a [`TemplateSource`].
#[derive(Clone, Debug)]
pub struct TemplateOptions {
    /// Directory of pages, searched recursively.
    pub root_dir: String,
    /// Directory of shared templates available to every page.
    pub include_dir: Option<String>,
    /// Layout executed for pages that define `content`.
    pub base_template: String,
    /// Reload all templates before every render.
    pub reload: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            root_dir: String::new(),
            include_dir: None,
            base_template: "base.html".to_string(),
            reload: false,
        }
    }
}

/// A page and the includes it was parsed with.
#[derive(Debug)]
pub struct Page {
    set: TemplateSet,
    entry: String,
}

impl Page {
    pub fn set(&self) -> &TemplateSet {
        &self.set
    }

    /// The template executed to render the page: the base layout when the
    /// page defines `content` and a layout exists, otherwise the page itself.
    pub fn entry(&self) -> &str {
        &self.entry
    }
}

/// A registry of pages keyed by their path below the root directory.
#[derive(Debug)]
pub struct TemplateStore {
    source: Box<dyn TemplateSource>,
    options: TemplateOptions,
    funcs: FuncMap,
    pages: RwLock<HashMap<String, Arc<Page>>>,
}

impl TemplateStore {
    /// Load every page from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or file can't be read or a template
    /// doesn't parse.
    pub fn new(
        source: impl TemplateSource + 'static,
        options: TemplateOptions,
        funcs: FuncMap,
    ) -> Result<Self, TemplateError> {
        let store = Self {
            source: Box::new(source),
            options,
            funcs,
            pages: RwLock::new(HashMap::new()),
        };
        store.reload()?;

        Ok(store)
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    /// Rebuild the registry. The current pages stay in place if loading
    /// fails.
    pub fn reload(&self) -> Result<(), TemplateError> {
        let pages = self.load()?;
        debug!(pages = pages.len(), "loaded templates");

        *self.pages.write().map_err(|_| TemplateError::Poisoned)? = pages;
        Ok(())
    }

    fn load(&self) -> Result<HashMap<String, Arc<Page>>, TemplateError> {
        let mut includes = TemplateSet::default();

        if let Some(dir) = &self.options.include_dir {
            let files = self.source.list(dir, false).map_err(|source| TemplateError::Io {
                path: dir.clone(),
                source,
            })?;

            for file in files {
                let src = self.read(&join_path(dir, &file))?;
                includes
                    .parse(&file, &src, &self.funcs)
                    .map_err(|source| TemplateError::Parse {
                        name: file.clone(),
                        source,
                    })?;
            }
        }

        let has_base = includes.contains(&self.options.base_template);
        let root = &self.options.root_dir;
        let files = self.source.list(root, true).map_err(|source| TemplateError::Io {
            path: root.clone(),
            source,
        })?;

        let mut pages = HashMap::with_capacity(files.len());
        for rel in files {
            let src = self.read(&join_path(root, &rel))?;

            let mut set = includes.clone();
            set.parse(&rel, &src, &self.funcs)
                .map_err(|source| TemplateError::Parse {
                    name: rel.clone(),
                    source,
                })?;

            let entry = if has_base && set.contains("content") {
                self.options.base_template.clone()
            } else {
                rel.clone()
            };

            pages.insert(rel, Arc::new(Page { set, entry }));
        }

        Ok(pages)
    }

    fn read(&self, path: &str) -> Result<String, TemplateError> {
        self.source.read(path).map_err(|source| TemplateError::Io {
            path: path.to_string(),
            source,
        })
    }

    /// Look up a page without reloading.
    pub fn lookup(&self, name: &str) -> Result<Arc<Page>, TemplateError> {
        self.pages
            .read()
            .map_err(|_| TemplateError::Poisoned)?
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    /// Look up a page for rendering, reloading first if configured to.
    pub fn page(&self, name: &str) -> Result<Arc<Page>, TemplateError> {
        if self.options.reload {
            self.reload()?;
        }

        self.lookup(name)
    }

    /// Check that `sample` provides exactly the fields the page uses.
    pub fn validate(&self, name: &str, sample: &Value) -> Result<(), TemplateError> {
        let page = self.lookup(name)?;

        let used = FieldTree::from_template(&page.set, &page.entry);
        let mismatch = compare(&used, &FieldTree::from_value(sample));
        if !mismatch.is_empty() {
            return Err(TemplateError::ViewModel {
                name: name.to_string(),
                mismatch,
            });
        }

        Ok(())
    }

    /// Render a page.
    pub fn render(&self, name: &str, data: &Value) -> Result<String, TemplateError> {
        let page = self.page(name)?;

        exec::execute(&page.set, &self.funcs, &page.entry, data).map_err(|message| {
            TemplateError::Exec {
                name: name.to_string(),
                message,
            }
        })
    }
}
