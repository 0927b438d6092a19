//! Language detection, tree-sitter grammar registry, and the scanner's
//! extension allow-list.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A language with syntax-aware chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Lang {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
        }
    }

    /// The tree-sitter grammar, or `None` if the corresponding feature is
    /// not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect a syntax-aware language from the file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Allow-list category of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Source,
    Config,
    Doc,
}

const SOURCE_EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("pyi", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("ts", "typescript"),
    ("mts", "typescript"),
    ("cts", "typescript"),
    ("tsx", "tsx"),
    ("go", "go"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("hh", "cpp"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
    ("scala", "scala"),
    ("swift", "swift"),
    ("rb", "ruby"),
    ("php", "php"),
    ("cs", "csharp"),
    ("m", "objc"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("zsh", "shell"),
    ("lua", "lua"),
    ("pl", "perl"),
    ("r", "r"),
    ("jl", "julia"),
    ("ex", "elixir"),
    ("exs", "elixir"),
    ("erl", "erlang"),
    ("hs", "haskell"),
    ("ml", "ocaml"),
    ("mli", "ocaml"),
    ("clj", "clojure"),
    ("dart", "dart"),
    ("zig", "zig"),
    ("sql", "sql"),
    ("vue", "vue"),
    ("svelte", "svelte"),
    ("proto", "protobuf"),
];

const CONFIG_EXTENSIONS: &[(&str, &str)] = &[
    ("toml", "toml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("json", "json"),
    ("jsonc", "json"),
    ("ini", "ini"),
    ("cfg", "ini"),
    ("conf", "conf"),
    ("xml", "xml"),
    ("gradle", "gradle"),
    ("properties", "properties"),
];

const DOC_EXTENSIONS: &[(&str, &str)] = &[
    ("md", "markdown"),
    ("markdown", "markdown"),
    ("rst", "rst"),
    ("txt", "text"),
    ("adoc", "asciidoc"),
    ("org", "org"),
    ("tex", "latex"),
];

/// Well-known files recognised by name rather than extension.
const KNOWN_FILENAMES: &[(&str, FileCategory, &str)] = &[
    ("Makefile", FileCategory::Config, "make"),
    ("GNUmakefile", FileCategory::Config, "make"),
    ("Dockerfile", FileCategory::Config, "dockerfile"),
    ("Justfile", FileCategory::Config, "just"),
    ("Rakefile", FileCategory::Config, "ruby"),
    ("Gemfile", FileCategory::Config, "ruby"),
    ("Procfile", FileCategory::Config, "procfile"),
    ("Vagrantfile", FileCategory::Config, "ruby"),
    ("README", FileCategory::Doc, "text"),
    ("LICENSE", FileCategory::Doc, "text"),
    ("CHANGELOG", FileCategory::Doc, "text"),
];

/// Build manifests that stay MEDIUM even when oversized.
const IMPORTANT_MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "requirements.txt",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "settings.gradle",
    "CMakeLists.txt",
    "Makefile",
    "Dockerfile",
    "Gemfile",
    "composer.json",
    "tsconfig.json",
];

fn lookup(table: &'static [(&'static str, &'static str)], ext: &str) -> Option<&'static str> {
    table.iter().find(|(e, _)| *e == ext).map(|(_, tag)| *tag)
}

/// Allow-list category and language tag, or `None` if the file is not
/// allow-listed.
#[must_use]
pub fn classify_path(path: &Path) -> Option<(FileCategory, &'static str)> {
    let name = path.file_name()?.to_str()?;
    if let Some((_, category, tag)) = KNOWN_FILENAMES.iter().find(|(n, _, _)| *n == name) {
        return Some((*category, tag));
    }
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if let Some(tag) = lookup(SOURCE_EXTENSIONS, &ext) {
        return Some((FileCategory::Source, tag));
    }
    if let Some(tag) = lookup(CONFIG_EXTENSIONS, &ext) {
        return Some((FileCategory::Config, tag));
    }
    lookup(DOC_EXTENSIONS, &ext).map(|tag| (FileCategory::Doc, tag))
}

#[must_use]
pub fn is_important_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| IMPORTANT_MANIFESTS.contains(&n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_syntax_languages() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
        assert_eq!(detect_language(Path::new("app.tsx")), Some(Lang::Tsx));
        assert_eq!(detect_language(Path::new("lib.mjs")), Some(Lang::JavaScript));
        assert_eq!(detect_language(Path::new("README.md")), None);
    }

    #[test]
    fn classifies_allow_list() {
        assert_eq!(
            classify_path(Path::new("a/b.py")),
            Some((FileCategory::Source, "python"))
        );
        assert_eq!(
            classify_path(Path::new("Cargo.toml")),
            Some((FileCategory::Config, "toml"))
        );
        assert_eq!(
            classify_path(Path::new("docs/guide.MD")),
            Some((FileCategory::Doc, "markdown"))
        );
        assert_eq!(
            classify_path(Path::new("Makefile")),
            Some((FileCategory::Config, "make"))
        );
        assert_eq!(classify_path(Path::new("image.png")), None);
        assert_eq!(classify_path(Path::new("noext")), None);
    }

    #[test]
    fn important_manifests() {
        assert!(is_important_manifest(Path::new("x/package.json")));
        assert!(!is_important_manifest(Path::new("data.json")));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_grammar_available() {
        assert!(Lang::Rust.grammar().is_some());
    }
}
