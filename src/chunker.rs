//! Syntax-aware chunk extraction via tree-sitter, with line-window
//! fallback.
//!
//! For a recognised language each top-level function becomes a `function`
//! chunk and each class-like declaration a `class` chunk. Methods (Rust
//! `impl`/`trait` members, Python/JS/TS class methods) are emitted as their
//! own `function` chunks, and the enclosing class chunk is cut at the first
//! method so bodies are never embedded twice. Attributes, decorators and
//! comments directly above an entity are attached to it.
//!
//! Whatever the entities leave uncovered (imports, constants, statements)
//! becomes `block` chunks when it carries at least `min_block_chars`
//! non-whitespace characters; oversized regions are split with line
//! windows.
//!
//! Unrecognised file types, a missing grammar, or a tree with syntax errors
//! fall back to line windows over the whole file; syntax errors also yield
//! a per-file warning.

use std::ops::Range;
use std::path::Path;

use codescope_core::chunk::{build_chunk, line_windows, windows_over, LineIndex, WindowConfig};
use codescope_core::models::{Chunk, ChunkKind, FileRecord};
use tree_sitter::{Node, Parser};

use crate::config::ChunkingConfig;
use crate::error::EngineError;
use crate::languages::{detect_language, Lang};

/// How a file was chunked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Syntax,
    LineWindows,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    /// Sorted by start byte.
    pub chunks: Vec<Chunk>,
    /// Set when the file fell back to line windows because of a parse error.
    pub warning: Option<String>,
    pub strategy: Strategy,
}

/// What a top-level node contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Function,
    /// Class-like declaration whose body may hold methods.
    Class,
    /// Rust `impl`: only its methods are entities.
    Impl,
    /// Rust inline `mod`: its items are scanned like top-level items.
    Module,
}

struct Ctx<'a> {
    lang: Lang,
    source: &'a str,
}

/// A span to emit, before it becomes a [`Chunk`].
#[derive(Debug, Clone)]
struct Entity {
    range: Range<usize>,
    kind: ChunkKind,
}

impl From<&ChunkingConfig> for WindowConfig {
    fn from(c: &ChunkingConfig) -> Self {
        WindowConfig {
            window_lines: c.window_lines,
            overlap_lines: c.overlap_lines,
        }
    }
}

/// Chunk one file. Never fails; problems degrade to line windows.
pub fn extract(record: &FileRecord, source: &str, config: &ChunkingConfig) -> Extraction {
    let windows = WindowConfig::from(config);
    let fallback = |warning: Option<String>| Extraction {
        chunks: line_windows(&record.path, source, &windows),
        warning,
        strategy: Strategy::LineWindows,
    };

    if source.trim().is_empty() {
        return fallback(None);
    }
    let Some(lang) = detect_language(Path::new(&record.path)) else {
        return fallback(None);
    };

    let Some(grammar) = lang.grammar() else {
        tracing::debug!(path = %record.path, lang = %lang, "grammar not compiled in");
        return fallback(None);
    };

    match extract_syntax(&record.path, source, lang, &grammar, config) {
        Ok(chunks) if !chunks.is_empty() => Extraction {
            chunks,
            warning: None,
            strategy: Strategy::Syntax,
        },
        Ok(_) => fallback(None),
        Err(e) => {
            tracing::warn!(path = %record.path, error = %e, "falling back to line windows");
            fallback(Some(e.to_string()))
        }
    }
}

fn extract_syntax(
    path: &str,
    source: &str,
    lang: Lang,
    grammar: &tree_sitter::Language,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, EngineError> {
    let mut parser = Parser::new();
    parser
        .set_language(grammar)
        .map_err(|e| EngineError::Parse(format!("set_language failed: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| EngineError::Parse(format!("parser returned no tree for {path}")))?;

    let root = tree.root_node();
    if root.has_error() {
        let row = first_error_row(&root).map_or(0, |r| r + 1);
        return Err(EngineError::Parse(format!("syntax error near line {row}")));
    }

    let ctx = Ctx { lang, source };
    let mut entities = Vec::new();
    collect_items(&ctx, &root, &mut entities);
    entities.retain(|e| e.range.start < e.range.end);
    entities.sort_by_key(|e| (e.range.start, e.range.end));

    let lines = LineIndex::new(source);
    let windows = WindowConfig::from(config);
    let mut chunks = Vec::new();
    let mut cursor = 0;
    for entity in &entities {
        if entity.range.start < cursor {
            continue;
        }
        push_gap(path, source, cursor..entity.range.start, config, &windows, &lines, &mut chunks);
        chunks.push(build_chunk(path, source, entity.range.clone(), entity.kind, &lines));
        cursor = entity.range.end;
    }
    push_gap(path, source, cursor..source.len(), config, &windows, &lines, &mut chunks);

    chunks.sort_by_key(|c| (c.start_byte, c.end_byte));
    Ok(chunks)
}

fn first_error_row(node: &Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row);
    }
    let count = u32::try_from(node.child_count()).unwrap_or(u32::MAX);
    (0..count)
        .filter_map(|i| node.child(i))
        .filter(|c| c.has_error())
        .find_map(|c| first_error_row(&c))
}

/// Turn an uncovered region into block chunks if it is substantial.
fn push_gap(
    path: &str,
    source: &str,
    gap: Range<usize>,
    config: &ChunkingConfig,
    windows: &WindowConfig,
    lines: &LineIndex,
    out: &mut Vec<Chunk>,
) {
    if gap.start >= gap.end {
        return;
    }
    let text = &source[gap.clone()];
    if non_ws_len(text) < config.min_block_chars.max(1) {
        return;
    }
    let start = gap.start + (text.len() - text.trim_start().len());
    let end = gap.start + text.trim_end().len();
    let span_lines = lines.line_of(end - 1) + 1 - lines.line_of(start);
    if span_lines > windows.window_lines {
        out.extend(windows_over(path, source, start..end, ChunkKind::Block, windows, lines));
    } else {
        out.push(build_chunk(path, source, start..end, ChunkKind::Block, lines));
    }
}

fn non_ws_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

fn is_trivia(lang: Lang, kind: &str) -> bool {
    match lang {
        Lang::Rust => matches!(kind, "attribute_item" | "line_comment" | "block_comment"),
        Lang::Python | Lang::JavaScript | Lang::TypeScript | Lang::Tsx | Lang::Go => {
            kind == "comment"
        }
    }
}

/// Strip wrappers that only decorate a declaration (Python decorators, JS
/// `export`), returning the declaration itself.
fn unwrap_decl<'t>(lang: Lang, node: Node<'t>) -> Option<Node<'t>> {
    match (lang, node.kind()) {
        (Lang::Python, "decorated_definition") => node.child_by_field_name("definition"),
        (Lang::JavaScript | Lang::TypeScript | Lang::Tsx, "export_statement") => {
            node.child_by_field_name("declaration")
        }
        _ => Some(node),
    }
}

fn role_of(ctx: &Ctx<'_>, node: &Node) -> Option<Role> {
    let kind = node.kind();
    match ctx.lang {
        Lang::Rust => match kind {
            "function_item" | "macro_definition" => Some(Role::Function),
            "struct_item" | "enum_item" | "union_item" | "trait_item" | "type_item" => {
                Some(Role::Class)
            }
            "impl_item" => Some(Role::Impl),
            "mod_item" if node.child_by_field_name("body").is_some() => Some(Role::Module),
            _ => None,
        },
        Lang::Python => match kind {
            "function_definition" => Some(Role::Function),
            "class_definition" => Some(Role::Class),
            _ => None,
        },
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx => match kind {
            "function_declaration" | "generator_function_declaration" => Some(Role::Function),
            "class_declaration"
            | "abstract_class_declaration"
            | "interface_declaration"
            | "type_alias_declaration"
            | "enum_declaration" => Some(Role::Class),
            "lexical_declaration" | "variable_declaration" if binds_function(node) => {
                Some(Role::Function)
            }
            _ => None,
        },
        Lang::Go => match kind {
            "function_declaration" | "method_declaration" => Some(Role::Function),
            "type_declaration" => Some(Role::Class),
            _ => None,
        },
    }
}

/// `const f = () => {}` / `let g = function () {}`.
fn binds_function(node: &Node) -> bool {
    named_children(node).any(|d| {
        d.kind() == "variable_declarator"
            && d.child_by_field_name("value").is_some_and(|v| {
                matches!(
                    v.kind(),
                    "arrow_function" | "function_expression" | "function" | "generator_function"
                )
            })
    })
}

fn is_method(ctx: &Ctx<'_>, node: &Node) -> bool {
    match ctx.lang {
        Lang::Rust => node.kind() == "function_item",
        Lang::Python => node.kind() == "function_definition",
        Lang::JavaScript | Lang::TypeScript | Lang::Tsx => node.kind() == "method_definition",
        Lang::Go => false,
    }
}

fn named_children<'t>(node: &Node<'t>) -> impl Iterator<Item = Node<'t>> + 't {
    let node = *node;
    let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    (0..count).filter_map(move |i| node.named_child(i))
}

/// Walk the items of a container (file root or Rust `mod` body),
/// attaching directly preceding trivia to each entity.
fn collect_items(ctx: &Ctx<'_>, container: &Node, out: &mut Vec<Entity>) {
    let mut trivia: Option<(usize, usize)> = None;
    for child in named_children(container) {
        if is_trivia(ctx.lang, child.kind()) {
            trivia = extend_trivia(trivia, &child);
            continue;
        }
        let start = leading_start(trivia.take(), &child);
        let Some(decl) = unwrap_decl(ctx.lang, child) else {
            continue;
        };
        let Some(role) = role_of(ctx, &decl) else {
            continue;
        };
        let outer = start..child.end_byte();
        match role {
            Role::Function => out.push(Entity {
                range: outer,
                kind: ChunkKind::Function,
            }),
            Role::Class => emit_class(ctx, &decl, outer, out),
            Role::Impl => {
                let methods = decl
                    .child_by_field_name("body")
                    .map(|body| collect_methods(ctx, &body))
                    .unwrap_or_default();
                if methods.is_empty() {
                    out.push(Entity {
                        range: outer,
                        kind: ChunkKind::Block,
                    });
                } else {
                    out.extend(methods);
                }
            }
            Role::Module => {
                if let Some(body) = decl.child_by_field_name("body") {
                    collect_items(ctx, &body, out);
                }
            }
        }
    }
}

/// Class chunk up to the first method, then one chunk per method.
fn emit_class(ctx: &Ctx<'_>, decl: &Node, outer: Range<usize>, out: &mut Vec<Entity>) {
    let methods = decl
        .child_by_field_name("body")
        .map(|body| collect_methods(ctx, &body))
        .unwrap_or_default();

    let class_end = methods
        .first()
        .map_or(outer.end, |m| trim_end(ctx.source, outer.start, m.range.start));
    out.push(Entity {
        range: outer.start..class_end,
        kind: ChunkKind::Class,
    });
    out.extend(methods);
}

fn collect_methods(ctx: &Ctx<'_>, body: &Node) -> Vec<Entity> {
    let mut methods = Vec::new();
    let mut trivia: Option<(usize, usize)> = None;
    for child in named_children(body) {
        if is_trivia(ctx.lang, child.kind()) {
            trivia = extend_trivia(trivia, &child);
            continue;
        }
        let start = leading_start(trivia.take(), &child);
        let Some(decl) = unwrap_decl(ctx.lang, child) else {
            continue;
        };
        if is_method(ctx, &decl) {
            methods.push(Entity {
                range: start..child.end_byte(),
                kind: ChunkKind::Function,
            });
        }
    }
    methods
}

/// Track a run of trivia as `(start_byte, last_row)`; a blank line between
/// trivia nodes restarts the run.
fn extend_trivia(run: Option<(usize, usize)>, node: &Node) -> Option<(usize, usize)> {
    let row = node.start_position().row;
    let end_row = node.end_position().row;
    match run {
        Some((start, last_row)) if row <= last_row + 1 => Some((start, end_row)),
        _ => Some((node.start_byte(), end_row)),
    }
}

/// Start of `node` including a trivia run that ends on the line above it.
fn leading_start(run: Option<(usize, usize)>, node: &Node) -> usize {
    match run {
        Some((start, last_row)) if node.start_position().row <= last_row + 1 => start,
        _ => node.start_byte(),
    }
}

fn trim_end(source: &str, start: usize, end: usize) -> usize {
    start + source[start..end].trim_end().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescope_core::models::Relevance;

    fn record(path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            language: None,
            size: 0,
            mtime: 0,
            relevance: Relevance::High,
            reason: None,
        }
    }

    fn config() -> ChunkingConfig {
        ChunkingConfig {
            min_block_chars: 20,
            ..ChunkingConfig::default()
        }
    }

    fn summary(ex: &Extraction) -> Vec<(ChunkKind, usize, usize)> {
        ex.chunks
            .iter()
            .map(|c| (c.kind, c.start_line, c.end_line))
            .collect()
    }

    #[test]
    fn plaintext_uses_line_windows() {
        let text: String = (1..=200).map(|i| format!("row {i}\n")).collect();
        let ex = extract(&record("notes.txt"), &text, &ChunkingConfig::default());
        assert_eq!(ex.strategy, Strategy::LineWindows);
        assert_eq!(ex.chunks.len(), 4);
        assert!(ex.warning.is_none());
    }

    #[test]
    fn whitespace_file_yields_nothing() {
        let ex = extract(&record("a.rs"), "\n\n   \n", &config());
        assert!(ex.chunks.is_empty());
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_functions_impls_and_attributes() {
        let source = r#"use std::collections::HashMap;
use std::sync::Arc;

/// A point.
#[derive(Debug)]
struct Point {
    x: i32,
}

impl Point {
    /// Make one.
    fn new(x: i32) -> Self {
        Self { x }
    }

    fn x(&self) -> i32 {
        self.x
    }
}

fn free() -> i32 {
    1
}
"#;
        let ex = extract(&record("src/point.rs"), source, &config());
        assert_eq!(ex.strategy, Strategy::Syntax);
        assert_eq!(
            summary(&ex),
            vec![
                (ChunkKind::Block, 1, 2),
                (ChunkKind::Class, 4, 8),
                (ChunkKind::Function, 11, 14),
                (ChunkKind::Function, 16, 18),
                (ChunkKind::Function, 21, 23),
            ]
        );
        assert!(ex.chunks[1].text.starts_with("/// A point."));
        assert!(ex.chunks[2].text.starts_with("/// Make one."));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_syntax_error_falls_back_with_warning() {
        let ex = extract(&record("src/bad.rs"), "fn broken( {\n", &config());
        assert_eq!(ex.strategy, Strategy::LineWindows);
        assert!(ex.warning.is_some());
        assert_eq!(ex.chunks.len(), 1);
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_class_is_cut_at_first_method() {
        let source = r#"import os


class Greeter:
    """Says hello."""

    greeting = "hi"

    @staticmethod
    def make():
        return Greeter()

    def greet(self, name):
        return f"{self.greeting} {name}"


@cached
def helper():
    return os.getcwd()
"#;
        let ex = extract(&record("greet.py"), source, &config());
        let kinds: Vec<ChunkKind> = ex.chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkKind::Class,
                ChunkKind::Function,
                ChunkKind::Function,
                ChunkKind::Function
            ]
        );
        let class = &ex.chunks[0];
        assert!(class.text.contains("Says hello"));
        assert!(!class.text.contains("def make"));
        assert!(ex.chunks[1].text.starts_with("@staticmethod"));
        assert!(ex.chunks[3].text.starts_with("@cached"));
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn typescript_exports_and_arrow_functions() {
        let source = r#"export interface Options {
  retries: number;
}

export class Client {
  constructor(private opts: Options) {}

  fetch(url: string): Promise<string> {
    return fetch(url).then((r) => r.text());
  }
}

export const retry = async (n: number) => {
  return n + 1;
};
"#;
        let ex = extract(&record("client.ts"), source, &config());
        assert_eq!(ex.strategy, Strategy::Syntax);
        let kinds: Vec<ChunkKind> = ex.chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChunkKind::Class,
                ChunkKind::Class,
                ChunkKind::Function,
                ChunkKind::Function,
                ChunkKind::Function,
            ]
        );
        assert!(ex.chunks[0].text.starts_with("export interface Options"));
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn go_types_and_methods() {
        let source = r#"package main

// Server serves.
type Server struct {
	addr string
}

func (s *Server) Run() error {
	return nil
}

func main() {
	_ = (&Server{}).Run()
}
"#;
        let ex = extract(&record("main.go"), source, &config());
        assert_eq!(
            summary(&ex),
            vec![
                (ChunkKind::Class, 3, 6),
                (ChunkKind::Function, 8, 10),
                (ChunkKind::Function, 12, 14),
            ]
        );
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn extraction_is_deterministic() {
        let source = "fn a() { 1 }\n\nfn b() { 2 }\n";
        let one = extract(&record("x.rs"), source, &config());
        let two = extract(&record("x.rs"), source, &config());
        assert_eq!(one.chunks, two.chunks);
    }
}
