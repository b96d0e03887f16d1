//! Story index: which stories a story file exports, with their ids and titles.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// One story in the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryEntry {
    pub id: String,
    pub title: String,
    pub name: String,
    pub import_path: String,
    pub export_name: String,
}

/// The stories of one story file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoryFile {
    pub title: String,
    pub stories: Vec<StoryEntry>,
}

impl StoryFile {
    /// Index a story file's source. `fallback_title` is used when the
    /// default export does not declare a `title`.
    pub fn parse(source: &str, import_path: &str, fallback_title: &str) -> Self {
        let title = TITLE_RE
            .captures(source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| fallback_title.to_string());

        let stories = story_exports(source)
            .into_iter()
            .map(|export_name| StoryEntry {
                id: to_id(&title, &export_name),
                title: title.clone(),
                name: story_name_from_export(&export_name),
                import_path: import_path.to_string(),
                export_name,
            })
            .collect();

        Self { title, stories }
    }
}

/// One error per story id that more than one story claims. The first file
/// to declare an id keeps it.
pub fn duplicate_ids(files: &[StoryFile]) -> Vec<String> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    let mut errors = Vec::new();

    for story in files.iter().flat_map(|f| &f.stories) {
        match owners.get(story.id.as_str()) {
            Some(first) => errors.push(format!(
                "Duplicate story id `{}`: {} and {} both export `{}` under title `{}`",
                story.id, first, story.import_path, story.export_name, story.title
            )),
            None => {
                owners.insert(&story.id, &story.import_path);
            }
        }
    }

    errors
}

/// The `stories.json` document for an index.
pub fn stories_json(files: &[StoryFile]) -> serde_json::Value {
    let stories: BTreeMap<&str, &StoryEntry> = files
        .iter()
        .flat_map(|f| &f.stories)
        .map(|s| (s.id.as_str(), s))
        .collect();

    serde_json::json!({ "v": 3, "stories": stories })
}

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"export\s+default\s*\{[^}]*?\btitle\s*:\s*['"`]([^'"`]+)['"`]"#)
        .expect("Invalid title regex")
});

static EXPORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s+(?:const|let|var|function\*?|class)\s+([A-Za-z_$][\w$]*)")
        .expect("Invalid export declaration regex")
});

static EXPORT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*export\s*\{([^}]*)\}").expect("Invalid export list regex")
});

/// Named exports of a module, in source order. `__`-prefixed exports are
/// private and skipped.
fn story_exports(source: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = EXPORT_DECL_RE
        .captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .map(|m| (m.start(), m.as_str().to_string()))
        .collect();

    for caps in EXPORT_LIST_RE.captures_iter(source) {
        let Some(list) = caps.get(1) else { continue };
        for item in list.as_str().split(',') {
            // `local as Exported` exports `Exported`
            if let Some(name) = item.split_whitespace().last() {
                found.push((list.start(), name.to_string()));
            }
        }
    }

    found.sort_by_key(|(pos, _)| *pos);

    let mut names: Vec<String> = Vec::new();
    for (_, name) in found {
        if name != "default" && !name.starts_with("__") && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Lowercase, dash-separated form of a title or story name.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Story id: `<title>--<name>`, sanitized (e.g., "Forms/Input" + "Primary"
/// -> "forms-input--primary").
pub fn to_id(title: &str, export_name: &str) -> String {
    format!("{}--{}", sanitize(title), sanitize(export_name))
}

/// Display name of a story export: camel case split into words.
pub fn story_name_from_export(export_name: &str) -> String {
    let mut out = String::new();
    let mut prev: Option<char> = None;

    for c in export_name.chars() {
        if c == '_' || c == '$' {
            if !out.ends_with(' ') && !out.is_empty() {
                out.push(' ');
            }
            prev = None;
            continue;
        }
        let boundary = match prev {
            Some(p) => {
                (c.is_uppercase() && p.is_lowercase())
                    || (c.is_ascii_digit() && p.is_alphabetic())
            }
            None => false,
        };
        if boundary && !out.ends_with(' ') {
            out.push(' ');
        }
        if out.is_empty() || out.ends_with(' ') {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BUTTON: &str = r#"
import { createButton } from './button.js';

export default {
  title: 'Example/Button',
  args: { label: 'Button' },
};

export const Primary = (args) => createButton({ primary: true, ...args });
export function secondaryLarge(args) { return createButton(args); }
const Small = (args) => createButton({ size: 'small', ...args });
const __helper = 1;
export { Small, __helper, Small as Tiny };
"#;

    #[test]
    fn indexes_named_exports_in_order() {
        let file = StoryFile::parse(BUTTON, "./src/button.stories.js", "Button");

        assert_eq!(file.title, "Example/Button");
        let names: Vec<_> = file.stories.iter().map(|s| s.export_name.as_str()).collect();
        assert_eq!(names, vec!["Primary", "secondaryLarge", "Small", "Tiny"]);
        assert_eq!(file.stories[0].id, "example-button--primary");
        assert_eq!(file.stories[1].name, "Secondary Large");
    }

    #[test]
    fn same_title_and_export_in_two_files_is_reported() {
        let a = StoryFile::parse(BUTTON, "./src/button.stories.js", "Button");
        let b = StoryFile::parse(
            "export default { title: 'Example/Button' };\nexport const Primary = () => '';\n",
            "./legacy/button.stories.js",
            "Button",
        );

        let errors = duplicate_ids(&[a.clone(), b.clone()]);

        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("example-button--primary"));
        assert!(errors[0].contains("./src/button.stories.js"));
        assert!(errors[0].contains("./legacy/button.stories.js"));
        assert!(duplicate_ids(&[a]).is_empty());
    }

    #[test]
    fn falls_back_to_path_title() {
        let file = StoryFile::parse("export const Basic = () => '';", "./card.stories.js", "Card");

        assert_eq!(file.title, "Card");
        assert_eq!(file.stories[0].id, "card--basic");
    }

    #[test]
    fn names_stories_from_exports() {
        assert_eq!(story_name_from_export("PrimaryButton"), "Primary Button");
        assert_eq!(story_name_from_export("with_icon"), "With Icon");
        assert_eq!(story_name_from_export("Size2"), "Size 2");
    }

    #[test]
    fn builds_stories_json() {
        let file = StoryFile::parse(BUTTON, "./src/button.stories.js", "Button");

        let json = stories_json(&[file]);

        assert_eq!(json["v"], 3);
        assert_eq!(
            json["stories"]["example-button--primary"]["importPath"],
            "./src/button.stories.js"
        );
    }
}
