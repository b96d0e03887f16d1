//! Story file discovery from glob specifiers.

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

/// Pattern used when a stories specifier names a directory.
const DEFAULT_STORY_FILES: &str = "**/*.stories.@(js|jsx|mjs|ts|tsx)";

/// A stories specifier split into a literal base directory and a matcher
/// for paths below it.
#[derive(Debug, Clone)]
pub struct StoryGlob {
    pattern: String,
    base: PathBuf,
    matcher: Option<Regex>,
}

impl StoryGlob {
    /// Parse `pattern`, resolving its literal prefix against `context`.
    pub fn new(context: &Path, pattern: &str) -> Result<Self, String> {
        let (base, rest) = split_base(pattern);
        let base = normalize(&context.join(base));

        let rest = if rest.is_empty() && base.is_dir() {
            DEFAULT_STORY_FILES
        } else {
            rest
        };

        let matcher = if rest.is_empty() {
            None
        } else {
            let invalid = |reason: String| format!("Invalid stories glob `{}`: {}", pattern, reason);
            let regex = glob_to_regex(rest).map_err(invalid)?;
            Some(Regex::new(&regex).map_err(|e| invalid(e.to_string()))?)
        };

        Ok(Self {
            pattern: pattern.to_string(),
            base,
            matcher,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Directory that is walked, and watched in dev sessions.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn is_match(&self, relative: &str) -> bool {
        self.matcher.as_ref().is_some_and(|m| m.is_match(relative))
    }

    /// Every file matching the specifier, sorted.
    pub fn find(&self) -> Vec<PathBuf> {
        let Some(matcher) = &self.matcher else {
            return if self.base.is_file() {
                vec![self.base.clone()]
            } else {
                Vec::new()
            };
        };

        let mut files: Vec<PathBuf> = WalkDir::new(&self.base)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| !is_ignored(e.path()))
            .filter(|e| {
                e.path()
                    .strip_prefix(&self.base)
                    .map(|rel| matcher.is_match(&to_slash(rel)))
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();

        files.sort();
        files
    }
}

fn is_ignored(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "node_modules")
}

pub(crate) fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Collapse `.` and `..` components without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_magic(segment: &str) -> bool {
    segment.contains(['*', '?', '{', '}', '[', ']', '(', ')', '!', '@'])
}

/// Split a glob into its literal leading directories and the rest.
fn split_base(pattern: &str) -> (&str, &str) {
    let mut end = 0;
    for (i, segment) in pattern.split('/').enumerate() {
        if is_magic(segment) {
            return if i == 0 {
                ("", pattern)
            } else {
                (&pattern[..end - 1], &pattern[end..])
            };
        }
        end += segment.len() + 1;
    }
    (pattern, "")
}

#[derive(Clone, Copy, PartialEq)]
enum Group {
    Brace,
    Paren,
}

/// Translate a glob into an anchored regex over `/`-separated paths.
///
/// Supports `**`, `*`, `?`, `[a-z]`, `[!a-z]`, `{a,b}` and `@(a|b)`.
fn glob_to_regex(glob: &str) -> Result<String, String> {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut groups: Vec<Group> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '[' => {
                let (class, len) = char_class(&chars[i + 1..])?;
                out.push_str(&class);
                i += len + 1;
                continue;
            }
            '?' => out.push_str("[^/]"),
            '@' if chars.get(i + 1) == Some(&'(') => {
                groups.push(Group::Paren);
                out.push_str("(?:");
                i += 2;
                continue;
            }
            '{' => {
                groups.push(Group::Brace);
                out.push_str("(?:");
            }
            ',' if groups.last() == Some(&Group::Brace) => out.push('|'),
            '|' if groups.last() == Some(&Group::Paren) => out.push('|'),
            '}' if groups.last() == Some(&Group::Brace) => {
                groups.pop();
                out.push(')');
            }
            ')' if groups.last() == Some(&Group::Paren) => {
                groups.pop();
                out.push(')');
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
        i += 1;
    }

    out.push('$');
    Ok(out)
}

/// Translate the body of a `[...]` class (after the opening bracket).
/// Returns the regex class and how many glob chars it consumed, including
/// the closing bracket. Classes never match `/`.
fn char_class(chars: &[char]) -> Result<(String, usize), String> {
    let mut i = 0;
    let negated = matches!(chars.first(), Some('!' | '^'));
    if negated {
        i += 1;
    }

    let start = i;
    let mut body = String::new();
    while i < chars.len() {
        let c = chars[i];
        // A leading `]` is a literal member
        if c == ']' && i > start {
            let class = if negated {
                format!("[^/{}]", body)
            } else {
                format!("[{}]", body)
            };
            return Ok((class, i + 1));
        }

        let is_range = c == '-' && i > start && chars.get(i + 1).is_some_and(|n| *n != ']');
        if is_range {
            body.push('-');
        } else if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~' | '-') {
            body.push('\\');
            body.push(c);
        } else {
            body.push(c);
        }
        i += 1;
    }

    Err("unterminated character class".to_string())
}

/// Title of a story file derived from its path: directories and the file
/// stem, capitalized (e.g., "components/button.stories.js" -> "Components/Button").
pub fn title_from_path(relative: &Path) -> String {
    let mut parts: Vec<String> = relative
        .parent()
        .map(|p| {
            p.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(capitalize(&s.to_string_lossy())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let name = relative
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = capitalize(name.split('.').next().unwrap_or_default());
    if !stem.is_empty() && parts.last() != Some(&stem) {
        parts.push(stem);
    }

    parts.join("/")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn splits_literal_base() {
        assert_eq!(split_base("../src/**/*.stories.js"), ("../src", "**/*.stories.js"));
        assert_eq!(split_base("*.stories.js"), ("", "*.stories.js"));
        assert_eq!(split_base("../src/button.stories.js"), ("../src/button.stories.js", ""));
    }

    #[test]
    fn translates_glob_syntax() {
        let re = Regex::new(&glob_to_regex("**/*.stories.@(js|ts)").unwrap()).unwrap();

        assert!(re.is_match("button.stories.js"));
        assert!(re.is_match("forms/input.stories.ts"));
        assert!(!re.is_match("button.stories.jsx"));
        assert!(!re.is_match("button.js"));

        let re = Regex::new(&glob_to_regex("{atoms,molecules}/?.mdx").unwrap()).unwrap();

        assert!(re.is_match("atoms/a.mdx"));
        assert!(!re.is_match("organisms/a.mdx"));
        assert!(!re.is_match("atoms/ab.mdx"));
    }

    #[test]
    fn translates_character_classes() {
        let re = Regex::new(&glob_to_regex("[A-Z]*.stories.js").unwrap()).unwrap();

        assert!(re.is_match("Button.stories.js"));
        assert!(!re.is_match("button.stories.js"));

        let re = Regex::new(&glob_to_regex("[!_]*.js").unwrap()).unwrap();

        assert!(re.is_match("card.js"));
        assert!(!re.is_match("_private.js"));
        assert!(!re.is_match("/x.js"));

        let re = Regex::new(&glob_to_regex("v[1-]x").unwrap()).unwrap();

        assert!(re.is_match("v-x"));
        assert!(!re.is_match("v0x"));
    }

    #[test]
    fn unterminated_class_is_an_invalid_glob() {
        let err = StoryGlob::new(Path::new("."), "src/[A-Z*.stories.js").unwrap_err();

        assert!(err.contains("unterminated character class"), "{}", err);
    }

    #[test]
    fn class_specifier_finds_files() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("Button.stories.js"), "").unwrap();
        fs::write(src.join("card.stories.js"), "").unwrap();

        let glob = StoryGlob::new(temp.path(), "src/[A-Z]*.stories.js").unwrap();

        assert_eq!(glob.find(), vec![src.join("Button.stories.js")]);
    }

    #[test]
    fn finds_matching_files() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("forms")).unwrap();
        fs::create_dir_all(src.join("node_modules/dep")).unwrap();
        fs::write(src.join("button.stories.js"), "").unwrap();
        fs::write(src.join("button.js"), "").unwrap();
        fs::write(src.join("forms/input.stories.js"), "").unwrap();
        fs::write(src.join("node_modules/dep/x.stories.js"), "").unwrap();

        let config_dir = temp.path().join(".tableau");
        let glob = StoryGlob::new(&config_dir, "../src/**/*.stories.js").unwrap();

        assert_eq!(glob.base(), src.as_path());
        assert_eq!(
            glob.find(),
            vec![src.join("button.stories.js"), src.join("forms/input.stories.js")]
        );
    }

    #[test]
    fn directory_specifier_uses_default_pattern() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("card.stories.mjs"), "").unwrap();
        fs::write(temp.path().join("card.mjs"), "").unwrap();

        let glob = StoryGlob::new(temp.path(), ".").unwrap();

        assert_eq!(glob.find(), vec![temp.path().join("card.stories.mjs")]);
    }

    #[test]
    fn derives_titles_from_paths() {
        assert_eq!(title_from_path(Path::new("components/button.stories.js")), "Components/Button");
        assert_eq!(title_from_path(Path::new("intro.stories.mdx")), "Intro");
        assert_eq!(title_from_path(Path::new("button/button.stories.js")), "Button");
    }
}
