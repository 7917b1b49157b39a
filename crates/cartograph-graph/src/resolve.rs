//! Import path resolution against the set of known repository files.

use std::collections::HashSet;

use crate::parser::Language;

const SCRIPT_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

const PYTHON_SUFFIXES: &[&str] = &[".py", "/__init__.py"];

/// Resolve a module specifier written in `from_file` to a repository path.
///
/// Script imports resolve only when relative (`./`, `../`); bare package
/// names point outside the repository. Python imports resolve relative
/// (leading dots) or absolute from the repository root.
///
/// # Examples
///
/// ```
/// use std::collections::HashSet;
/// use cartograph_graph::resolve::resolve_import;
///
/// let files: HashSet<String> = ["src/a.ts", "src/lib/index.ts", "app/models/user.py"]
///     .iter()
///     .map(|s| s.to_string())
///     .collect();
///
/// assert_eq!(resolve_import("src/b.ts", "./a", &files).as_deref(), Some("src/a.ts"));
/// assert_eq!(resolve_import("src/b.ts", "./lib", &files).as_deref(), Some("src/lib/index.ts"));
/// assert_eq!(resolve_import("src/b.ts", "react", &files), None);
/// assert_eq!(
///     resolve_import("app/views.py", "app.models.user", &files).as_deref(),
///     Some("app/models/user.py")
/// );
/// ```
pub fn resolve_import(from_file: &str, module: &str, files: &HashSet<String>) -> Option<String> {
    match Language::from_path(from_file)? {
        Language::TypeScript | Language::JavaScript => resolve_script(from_file, module, files),
        Language::Python => resolve_python(from_file, module, files),
    }
}

fn resolve_script(from_file: &str, module: &str, files: &HashSet<String>) -> Option<String> {
    if !module.starts_with("./") && !module.starts_with("../") {
        return None;
    }
    let base = join_path(directory_of(from_file), module)?;
    first_existing(&base, SCRIPT_SUFFIXES, files)
}

fn resolve_python(from_file: &str, module: &str, files: &HashSet<String>) -> Option<String> {
    let dots = module.chars().take_while(|c| *c == '.').count();
    let rest = module[dots..].replace('.', "/");

    if dots > 0 {
        // One dot is the current package, each extra dot climbs a level.
        let mut dir = directory_of(from_file).to_string();
        for _ in 1..dots {
            dir = parent_of(&dir)?.to_string();
        }
        let base = match (dir.is_empty(), rest.is_empty()) {
            (_, true) => dir,
            (true, false) => rest,
            (false, false) => format!("{dir}/{rest}"),
        };
        if base.is_empty() {
            return None;
        }
        return first_existing(&base, PYTHON_SUFFIXES, files);
    }

    if rest.is_empty() {
        return None;
    }
    first_existing(&rest, PYTHON_SUFFIXES, files).or_else(|| {
        // Packages commonly live under the importing file's top-level dir (src/ layouts).
        let dir = directory_of(from_file);
        if dir.is_empty() {
            return None;
        }
        let root = dir.split('/').next()?;
        first_existing(&format!("{root}/{rest}"), PYTHON_SUFFIXES, files)
    })
}

fn first_existing(base: &str, suffixes: &[&str], files: &HashSet<String>) -> Option<String> {
    suffixes
        .iter()
        .map(|suffix| format!("{base}{suffix}"))
        .find(|candidate| files.contains(candidate))
}

fn directory_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn parent_of(dir: &str) -> Option<&str> {
    if dir.is_empty() {
        return None;
    }
    Some(directory_of(dir))
}

/// Join a relative specifier onto a directory, normalizing `.` and `..`.
/// Returns `None` when the path climbs above the repository root.
fn join_path(dir: &str, relative: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> HashSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn script_parent_directory_imports() {
        let files = files(&["src/utils/format.js", "src/components/button.tsx"]);
        assert_eq!(
            resolve_import("src/components/button.tsx", "../utils/format", &files).as_deref(),
            Some("src/utils/format.js")
        );
    }

    #[test]
    fn script_specifier_with_extension() {
        let files = files(&["src/a.js"]);
        assert_eq!(
            resolve_import("src/b.js", "./a.js", &files).as_deref(),
            Some("src/a.js")
        );
    }

    #[test]
    fn script_prefers_direct_file_over_index() {
        let files = files(&["src/api.ts", "src/api/index.ts"]);
        assert_eq!(
            resolve_import("src/main.ts", "./api", &files).as_deref(),
            Some("src/api.ts")
        );
    }

    #[test]
    fn climbing_above_root_fails() {
        let files = files(&["a.ts"]);
        assert_eq!(resolve_import("a.ts", "../../a", &files), None);
    }

    #[test]
    fn python_relative_imports() {
        let files = files(&["pkg/models.py", "pkg/sub/__init__.py", "util.py"]);
        assert_eq!(
            resolve_import("pkg/views.py", ".models", &files).as_deref(),
            Some("pkg/models.py")
        );
        assert_eq!(
            resolve_import("pkg/views.py", ".sub", &files).as_deref(),
            Some("pkg/sub/__init__.py")
        );
        assert_eq!(
            resolve_import("pkg/sub/deep.py", "..models", &files).as_deref(),
            Some("pkg/models.py")
        );
    }

    #[test]
    fn python_absolute_under_source_root() {
        let files = files(&["src/app/db.py"]);
        assert_eq!(
            resolve_import("src/main.py", "app.db", &files).as_deref(),
            Some("src/app/db.py")
        );
        assert_eq!(resolve_import("src/main.py", "os.path", &files), None);
    }

    #[test]
    fn unknown_language_never_resolves() {
        let files = files(&["a.ts"]);
        assert_eq!(resolve_import("README.md", "./a", &files), None);
    }
}
