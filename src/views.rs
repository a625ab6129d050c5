//! Pages and the view models they are rendered with.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::{
    config::Config,
    routes::url_for,
    template::{
        funcs::display, DirSource, FuncMap, MemorySource, TemplateError, TemplateOptions,
        TemplateRenderer, TemplateSource, TemplateStore,
    },
};

const PAGES_DIR: &str = "www";
const INCLUDE_DIR: &str = "include";

#[derive(Serialize, Clone, Debug, Default)]
#[serde(rename_all = "PascalCase")]
pub struct HomeView {
    /// Empty when nobody is logged in.
    pub email: String,
}

#[derive(Serialize, Clone, Debug, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DashboardView {
    pub email: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
    pub roles: Vec<String>,
}

/// Every page of the app, each checked against its view model.
#[derive(Clone, Debug)]
pub struct Views {
    pub home: TemplateRenderer<HomeView>,
    pub dashboard: TemplateRenderer<DashboardView>,
}

impl Views {
    /// Templates are read from disk and reloaded on every render in dev, and
    /// embedded in the binary otherwise.
    pub fn load(config: &Config) -> Result<Self, TemplateError> {
        if config.is_dev() {
            warn!(
                "dev mode: reloading templates from {}",
                config.templates_dir.display()
            );
            Self::from_source(DirSource::new(&config.templates_dir), true)
        } else {
            Self::embedded()
        }
    }

    pub fn embedded() -> Result<Self, TemplateError> {
        let source = MemorySource::new()
            .with_file(
                "include/base.html",
                include_str!("../templates/include/base.html"),
            )
            .with_file(
                "www/index.html",
                include_str!("../templates/www/index.html"),
            )
            .with_file(
                "www/dashboard.html",
                include_str!("../templates/www/dashboard.html"),
            );

        Self::from_source(source, false)
    }

    fn from_source(source: impl TemplateSource + 'static, reload: bool) -> Result<Self, TemplateError> {
        let options = TemplateOptions {
            root_dir: PAGES_DIR.to_string(),
            include_dir: Some(INCLUDE_DIR.to_string()),
            reload,
            ..TemplateOptions::default()
        };
        let store = Arc::new(TemplateStore::new(source, options, funcs())?);

        Ok(Self {
            home: TemplateRenderer::new(store.clone(), "index.html")?,
            dashboard: TemplateRenderer::new(store, "dashboard.html")?,
        })
    }
}

fn funcs() -> FuncMap {
    let mut funcs = FuncMap::new();
    funcs.insert("url", url);
    funcs
}

/// `url "name" "param" "value" ...`: the path of a named route.
fn url(args: &[Value]) -> Result<Value, String> {
    let Some((Value::String(name), pairs)) = args.split_first() else {
        return Err("url: expected a route name".to_string());
    };

    let pairs: Vec<String> = pairs.iter().map(|v| display(v).to_string()).collect();
    url_for(name, &pairs)
        .map(Value::String)
        .map_err(|e| format!("url: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_pages_render() {
        let views = Views::embedded().expect("templates match their view models");

        let home = views.home.render(&HomeView::default()).expect("render");
        assert!(home.contains("<title>Porch</title>"));
        assert!(home.contains(r#"href="/login""#));

        let home = views
            .home
            .render(&HomeView {
                email: "ann@example.com".to_string(),
            })
            .expect("render");
        assert!(home.contains("Signed in as ann@example.com."));
        assert!(home.contains(r#"href="/u/dashboard""#));

        let dashboard = views
            .dashboard
            .render(&DashboardView {
                email: "<ann>@example.com".to_string(),
                user_id: "7".to_string(),
                roles: vec!["admin".to_string(), "editor".to_string()],
            })
            .expect("render");
        assert!(dashboard.contains("&lt;ann&gt;@example.com"));
        assert!(dashboard.contains("<li>admin</li>"));
        assert!(dashboard.contains(r#"action="/logout""#));
        assert!(dashboard.contains(r#"data-source="/u/events/time""#));
        assert!(dashboard.contains(r#"<script src="/static/time.js" defer></script>"#));
    }

    #[test]
    fn dashboard_without_roles() {
        let views = Views::embedded().expect("templates");
        let dashboard = views.dashboard.render(&DashboardView::default()).expect("render");

        let roles = dashboard
            .split("<dt>Roles</dt>")
            .nth(1)
            .and_then(|rest| rest.split("</dd>").next())
            .expect("roles entry");
        assert!(roles.contains("none"));
        assert!(!roles.contains("<li>"));
    }

    #[test]
    fn url_function() {
        assert_eq!(url(&[Value::from("time")]), Ok(Value::from("/u/events/time")));
        assert!(url(&[]).is_err());
        assert!(url(&[Value::from(1)]).is_err());
        assert!(url(&[Value::from("missing")]).is_err());
    }
}
