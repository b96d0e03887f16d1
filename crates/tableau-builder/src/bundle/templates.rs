//! HTML shells for the manager and preview frames.

use minijinja::{context, Environment};
use tableau_presets::Ref;

use crate::traits::BuilderError;

/// Context for rendering the manager page (`index.html`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManagerPage {
    pub title: String,
    pub public_path: String,

    /// Composed external catalogs
    pub refs: Vec<Ref>,
}

/// Context for rendering the preview frame (`iframe.html`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct PreviewPage {
    pub title: String,
    pub public_path: String,

    /// Raw HTML injected into `<head>`
    pub head: String,

    /// Raw HTML injected at the start of `<body>`
    pub body: String,
}

/// Template engine using minijinja.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new() -> Result<Self, BuilderError> {
        let mut env = Environment::new();

        for (name, source) in [
            ("base.html", BASE_TEMPLATE),
            ("index.html", MANAGER_TEMPLATE),
            ("iframe.html", PREVIEW_TEMPLATE),
        ] {
            env.add_template(name, source)
                .map_err(|e| BuilderError::Template(format!("{}: {}", name, e)))?;
        }

        Ok(Self { env })
    }

    pub fn render_manager(&self, page: &ManagerPage) -> Result<String, BuilderError> {
        self.render(
            "index.html",
            context! {
                title => &page.title,
                public_path => &page.public_path,
                refs => &page.refs,
            },
        )
    }

    pub fn render_preview(&self, page: &PreviewPage) -> Result<String, BuilderError> {
        self.render(
            "iframe.html",
            context! {
                title => &page.title,
                public_path => &page.public_path,
                head => &page.head,
                body => &page.body,
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, BuilderError> {
        self.env
            .get_template(name)
            .and_then(|tmpl| tmpl.render(ctx))
            .map_err(|e| BuilderError::Template(format!("{}: {}", name, e)))
    }
}

const BASE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{ title }}</title>
  <base href="{{ public_path }}">
  {% block head %}{% endblock %}
</head>
<body>
  {% block body %}{% endblock %}
</body>
</html>"##;

const MANAGER_TEMPLATE: &str = r##"{% extends "base.html" %}

{% block head %}<link rel="stylesheet" href="manager.css">{% endblock %}

{% block body %}
<div class="layout">
  <nav class="sidebar">
    <div class="sidebar-header">{{ title }}</div>
    <ul id="story-list" class="story-list"></ul>
    {% if refs %}
    <div class="refs">
      <h2>Composed</h2>
      <ul>
      {% for item in refs %}
        <li><a href="{{ item.url }}" target="_blank" rel="noopener">{{ item.title or item.id }}</a></li>
      {% endfor %}
      </ul>
    </div>
    {% endif %}
  </nav>
  <main class="main">
    <iframe id="preview" title="Preview" src="iframe.html"></iframe>
  </main>
</div>
<script type="module" src="manager.js"></script>
{% endblock %}"##;

const PREVIEW_TEMPLATE: &str = r##"{% extends "base.html" %}

{% block head %}{{ head | safe }}{% endblock %}

{% block body %}{{ body | safe }}
<div id="root"></div>
<div id="error" hidden></div>
<script type="module" src="preview.js"></script>
{% endblock %}"##;
