//! Typed rendering of pages.

use std::{marker::PhantomData, sync::Arc};

use serde::Serialize;

use crate::template::{store::TemplateStore, TemplateError};

/// Renders one page with a view model of type `T`.
///
/// The page's field usage is checked against `T` when the renderer is
/// created, so a mismatch between template and view model is found at
/// startup instead of on the first request.
pub struct TemplateRenderer<T> {
    store: Arc<TemplateStore>,
    name: String,
    _model: PhantomData<fn(&T)>,
}

impl<T: Serialize + Default> TemplateRenderer<T> {
    /// Create a renderer, validating the page against `T::default()`.
    pub fn new(store: Arc<TemplateStore>, name: &str) -> Result<Self, TemplateError> {
        Self::with_sample(store, name, &T::default())
    }
}

impl<T: Serialize> TemplateRenderer<T> {
    /// Create a renderer, validating the page against `sample`.
    pub fn with_sample(
        store: Arc<TemplateStore>,
        name: &str,
        sample: &T,
    ) -> Result<Self, TemplateError> {
        store.validate(name, &serde_json::to_value(sample)?)?;

        Ok(Self {
            store,
            name: name.to_string(),
            _model: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn render(&self, model: &T) -> Result<String, TemplateError> {
        self.store.render(&self.name, &serde_json::to_value(model)?)
    }
}

impl<T> Clone for TemplateRenderer<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name.clone(),
            _model: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for TemplateRenderer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;
    use crate::template::{FuncMap, MemorySource, TemplateOptions};

    #[derive(Default, Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct Profile {
        name: String,
        tags: Vec<String>,
    }

    #[derive(Default, Serialize)]
    struct Wrong {
        name: String,
    }

    fn store() -> Arc<TemplateStore> {
        let source = MemorySource::new()
            .with_file("include/base.html", "<body>{{ template \"content\" . }}</body>")
            .with_file(
                "www/profile.html",
                "{{ define \"content\" }}{{ .Name }}:{{ range .Tags }}[{{ . }}]{{ end }}{{ end }}",
            );
        let options = TemplateOptions {
            root_dir: "www".to_string(),
            include_dir: Some("include".to_string()),
            ..TemplateOptions::default()
        };

        Arc::new(TemplateStore::new(source, options, FuncMap::new()).expect("load"))
    }

    #[test]
    fn typed_rendering() {
        let renderer = TemplateRenderer::<Profile>::new(store(), "profile.html").expect("valid");
        let html = renderer
            .render(&Profile {
                name: "<ann>".to_string(),
                tags: vec!["a".to_string(), "b".to_string()],
            })
            .expect("render");

        assert_eq!(html, "<body>&lt;ann&gt;:[a][b]</body>");
        assert_eq!(renderer.clone().name(), "profile.html");
    }

    #[test]
    fn mismatched_view_model() {
        let err = TemplateRenderer::<Wrong>::new(store(), "profile.html").unwrap_err();
        assert_eq!(
            err.to_string(),
            "couldn't validate view model for [profile.html]: \
             extra fields [Root->name] missing fields [Root->Name, Root->Tags]"
        );

        assert!(matches!(
            TemplateRenderer::<Profile>::new(store(), "nope.html"),
            Err(TemplateError::NotFound(_))
        ));
    }
}
