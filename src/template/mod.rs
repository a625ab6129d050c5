//! HTML templates.
//!
//! Pages are written in a Go-style template language (`{{ .Field }}`,
//! `{{ if }}`, `{{ range }}`, `{{ with }}`, `{{ define }}`, `{{ block }}`,
//! `{{ template }}`) and rendered against a [`serde::Serialize`] view model.
//! Shared templates in an include directory are available to every page; a
//! page that defines `content` is rendered through the base layout.
//!
//! Before a page is ever rendered, a [`TemplateRenderer`] compares the fields
//! the page references with the fields of its view model and refuses to be
//! created if they differ.

mod exec;
pub mod fields;
pub mod funcs;
mod lex;
pub mod parse;
pub mod render;
pub mod store;

use thiserror::Error;

pub use fields::{FieldTree, Mismatch};
pub use funcs::{Func, FuncMap};
pub use parse::ParseError;
pub use render::TemplateRenderer;
pub use store::{DirSource, MemorySource, TemplateOptions, TemplateSet, TemplateSource, TemplateStore};

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing template {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: ParseError,
    },
    #[error("couldn't find template: {0}")]
    NotFound(String),
    #[error("error executing template [{name}]: {message}")]
    Exec { name: String, message: String },
    #[error("couldn't validate view model for [{name}]: {mismatch}")]
    ViewModel { name: String, mismatch: Mismatch },
    #[error("view model is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("template registry lock poisoned")]
    Poisoned,
}
