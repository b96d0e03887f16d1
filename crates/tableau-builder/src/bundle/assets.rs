//! Static assets of the bundle output: manager stylesheet and runtimes.

use crate::traits::BuilderError;

/// The manager stylesheet, minified when requested.
pub fn manager_css(minify: bool) -> String {
    if !minify {
        return MANAGER_CSS.to_string();
    }

    match minify_css(MANAGER_CSS) {
        Ok(css) => css,
        Err(e) => {
            tracing::warn!("{}", e);
            MANAGER_CSS.to_string()
        }
    }
}

/// Minify CSS using lightningcss.
pub fn minify_css(css: &str) -> Result<String, BuilderError> {
    use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

    let stylesheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| BuilderError::Task(format!("CSS parse error: {}", e)))?;

    let minified = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..Default::default()
        })
        .map_err(|e| BuilderError::Task(format!("CSS minify error: {}", e)))?;

    Ok(minified.code)
}

/// Preview runtime, loaded ahead of every other preview entry.
///
/// Story files register their exports; the manager selects a story by
/// posting its id, or through the frame's location hash.
pub const PREVIEW_RUNTIME: &str = r#"const registry = new Map();

function showError(error) {
  const el = document.getElementById('error');
  if (!el) throw error;
  el.hidden = false;
  el.textContent = String(error && error.stack || error);
}

function renderStory(id) {
  const story = registry.get(id);
  if (!story) return;
  const render = globalThis.__TABLEAU_RENDER__;
  if (typeof render !== 'function') {
    showError(new Error('No framework renderer installed'));
    return;
  }
  document.getElementById('error').hidden = true;
  try {
    const fn = typeof story.exported === 'function' ? story.exported : story.exported.render;
    render(fn, Object.assign({}, story.meta.args || {}, story.exported.args || {}));
  } catch (error) {
    showError(error);
  }
}

globalThis.__TABLEAU__ = {
  register(entry, exports) {
    const meta = exports.default || {};
    for (const story of entry.stories) {
      const exported = exports[story.exportName];
      if (exported) registry.set(story.id, { meta, exported });
    }
  },
  start() {
    const select = () => renderStory(decodeURIComponent(location.hash.slice(1)));
    window.addEventListener('hashchange', select);
    window.addEventListener('message', (event) => {
      if (event.data && event.data.type === 'tableau:select') {
        location.hash = event.data.id;
      }
    });
    if (location.hash) {
      select();
    } else if (registry.size > 0) {
      location.hash = registry.keys().next().value;
    }
  },
};
"#;

/// Manager runtime: renders the sidebar from the story index and drives
/// the preview frame.
pub const MANAGER_RUNTIME: &str = r#"const list = document.getElementById('story-list');
const frame = document.getElementById('preview');

function select(id) {
  for (const link of list.querySelectorAll('a')) {
    link.classList.toggle('active', link.dataset.id === id);
  }
  frame.contentWindow.postMessage({ type: 'tableau:select', id }, '*');
  history.replaceState(null, '', '?path=/story/' + encodeURIComponent(id));
}

const groups = new Map();
for (const story of Object.values(INDEX.stories)) {
  if (!groups.has(story.title)) groups.set(story.title, []);
  groups.get(story.title).push(story);
}

for (const [title, stories] of groups) {
  const group = document.createElement('li');
  group.className = 'story-group';
  const heading = document.createElement('span');
  heading.textContent = title;
  group.appendChild(heading);
  const items = document.createElement('ul');
  for (const story of stories) {
    const item = document.createElement('li');
    const link = document.createElement('a');
    link.href = '#' + story.id;
    link.dataset.id = story.id;
    link.textContent = story.name;
    link.addEventListener('click', (event) => {
      event.preventDefault();
      select(story.id);
    });
    item.appendChild(link);
    items.appendChild(item);
  }
  group.appendChild(items);
  list.appendChild(group);
}

const initial = new URLSearchParams(location.search).get('path');
frame.addEventListener('load', () => {
  const first = Object.keys(INDEX.stories)[0];
  const id = initial ? initial.replace('/story/', '') : first;
  if (id) select(id);
});
"#;

const MANAGER_CSS: &str = r#"/* Tableau manager */

:root {
  --sidebar-width: 260px;
  --background: #ffffff;
  --foreground: #1f2328;
  --muted: #f6f8fa;
  --border: #d0d7de;
  --accent: #0969da;
}

* {
  box-sizing: border-box;
  margin: 0;
  padding: 0;
}

body {
  font-family: system-ui, -apple-system, sans-serif;
  background: var(--background);
  color: var(--foreground);
  line-height: 1.5;
}

.layout {
  display: grid;
  grid-template-columns: var(--sidebar-width) 1fr;
  height: 100vh;
}

.sidebar {
  background: var(--muted);
  border-right: 1px solid var(--border);
  padding: 1rem;
  overflow-y: auto;
}

.sidebar-header {
  font-weight: 700;
  font-size: 1.125rem;
  margin-bottom: 1rem;
}

.story-list,
.story-list ul,
.refs ul {
  list-style: none;
}

.story-group > span {
  display: block;
  font-size: 0.75rem;
  font-weight: 600;
  text-transform: uppercase;
  color: #57606a;
  margin: 0.75rem 0 0.25rem;
}

.story-list a,
.refs a {
  display: block;
  padding: 0.25rem 0.5rem;
  color: inherit;
  text-decoration: none;
  border-radius: 0.375rem;
}

.story-list a:hover {
  background: var(--border);
}

.story-list a.active {
  background: var(--accent);
  color: #ffffff;
}

.refs h2 {
  font-size: 0.75rem;
  margin-top: 1.5rem;
  text-transform: uppercase;
}

.main iframe {
  border: 0;
  width: 100%;
  height: 100%;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minified_css_is_smaller() {
        let minified = manager_css(true);

        assert!(minified.len() < MANAGER_CSS.len());
        assert!(minified.contains(".layout{"));
    }
}
