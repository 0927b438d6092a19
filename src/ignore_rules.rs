//! gitignore-style ignore rules compiled to a [`GlobSet`].
//!
//! Supported syntax: glob patterns with `*`, `?`, `[...]` and `**`; `!`
//! negation; a leading `/` (or any inner `/`) anchors the pattern to the
//! root; a trailing `/` matches directories only; `#` starts a comment and
//! `\#` / `\!` escape a literal leading character. The last matching rule
//! wins. A line that fails to compile is logged and skipped.
//!
//! Rules come from the root `.gitignore`, then an optional explicit ignore
//! file, then `scanner.extra_ignore_globs`, in that order.

use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

#[derive(Debug, Clone)]
struct Rule {
    negated: bool,
    dir_only: bool,
}

#[derive(Debug, Clone)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
    /// For each glob in `set`: its rule index, and whether it is the
    /// `/**` descendant form.
    glob_rule: Vec<(usize, bool)>,
    set: GlobSet,
    warnings: Vec<String>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            glob_rule: Vec::new(),
            set: GlobSet::empty(),
            warnings: Vec::new(),
        }
    }
}

struct Parsed {
    negated: bool,
    dir_only: bool,
    globs: [String; 2],
}

/// Translate one gitignore line; `None` for blanks and comments.
fn parse_line(line: &str) -> Option<Parsed> {
    let mut pat = line.trim_end();
    if pat.is_empty() || pat.starts_with('#') {
        return None;
    }

    let mut negated = false;
    if let Some(rest) = pat.strip_prefix('!') {
        negated = true;
        pat = rest;
    } else if let Some(rest) = pat.strip_prefix("\\!").or_else(|| pat.strip_prefix("\\#")) {
        let lead = &pat[1..2];
        return finish(format!("{}{}", lead, rest), false);
    }
    finish(pat.to_string(), negated)
}

fn finish(pat: String, negated: bool) -> Option<Parsed> {
    let mut pat = pat.as_str();
    let dir_only = pat.ends_with('/');
    pat = pat.trim_end_matches('/');
    let anchored = pat.starts_with('/') || pat.contains('/');
    pat = pat.trim_start_matches('/');
    if pat.is_empty() {
        return None;
    }
    let base = if anchored || pat.starts_with("**/") {
        pat.to_string()
    } else {
        format!("**/{}", pat)
    };
    Some(Parsed {
        negated,
        dir_only,
        globs: [base.clone(), format!("{}/**", base)],
    })
}

impl IgnoreRules {
    /// Compile rules from pattern lines, skipping lines that fail to compile.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>, origin: &str) -> Self {
        let mut rules = Self::default();
        let mut builder = GlobSetBuilder::new();
        rules.add_lines(&mut builder, lines, origin);
        rules.finish(builder)
    }

    /// Load `.gitignore` at `root`, then `explicit`, then `extra` globs.
    pub fn load(root: &Path, explicit: Option<&Path>, extra: &[String]) -> Self {
        let mut rules = Self::default();
        let mut builder = GlobSetBuilder::new();

        let gitignore = root.join(".gitignore");
        if let Ok(content) = std::fs::read_to_string(&gitignore) {
            rules.add_lines(&mut builder, content.lines(), ".gitignore");
        }
        if let Some(path) = explicit {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let origin = path.display().to_string();
                    rules.add_lines(&mut builder, content.lines(), &origin);
                }
                Err(e) => {
                    let msg = format!("cannot read ignore file {}: {}", path.display(), e);
                    tracing::warn!(path = %path.display(), error = %e, "ignore file unreadable");
                    rules.warnings.push(msg);
                }
            }
        }
        rules.add_lines(
            &mut builder,
            extra.iter().map(String::as_str),
            "scanner.extra_ignore_globs",
        );
        rules.finish(builder)
    }

    fn add_lines<'a>(
        &mut self,
        builder: &mut GlobSetBuilder,
        lines: impl IntoIterator<Item = &'a str>,
        origin: &str,
    ) {
        for (lineno, line) in lines.into_iter().enumerate() {
            let Some(parsed) = parse_line(line) else {
                continue;
            };
            let compiled: Result<Vec<_>, _> = parsed
                .globs
                .iter()
                .map(|g| GlobBuilder::new(g).literal_separator(true).build())
                .collect();
            match compiled {
                Ok(globs) => {
                    let index = self.rules.len();
                    self.rules.push(Rule {
                        negated: parsed.negated,
                        dir_only: parsed.dir_only,
                    });
                    for (slot, glob) in globs.into_iter().enumerate() {
                        builder.add(glob);
                        self.glob_rule.push((index, slot == 1));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        origin,
                        line = lineno + 1,
                        pattern = line,
                        error = %e,
                        "skipping invalid ignore pattern"
                    );
                    self.warnings.push(format!(
                        "{}:{}: invalid pattern '{}': {}",
                        origin,
                        lineno + 1,
                        line,
                        e
                    ));
                }
            }
        }
    }

    fn finish(mut self, builder: GlobSetBuilder) -> Self {
        match builder.build() {
            Ok(set) => self.set = set,
            Err(e) => {
                tracing::warn!(error = %e, "ignore rules failed to build; ignoring none");
                self.warnings.push(format!("ignore rules failed to build: {}", e));
                self.rules.clear();
                self.glob_rule.clear();
            }
        }
        self
    }

    /// Whether the `/`-separated relative path is ignored.
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let mut winner: Option<(usize, &Rule)> = None;
        for glob_index in self.set.matches(rel_path) {
            let (rule_index, descendant) = self.glob_rule[glob_index];
            let rule = &self.rules[rule_index];
            if rule.dir_only && !is_dir && !descendant {
                continue;
            }
            match winner {
                Some((best, _)) if best >= rule_index => {}
                _ => winner = Some((rule_index, rule)),
            }
        }
        winner.is_some_and(|(_, rule)| !rule.negated)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Lines that were skipped, with reasons.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(lines: &str) -> IgnoreRules {
        IgnoreRules::from_lines(lines.lines(), "test")
    }

    #[test]
    fn unanchored_matches_any_depth() {
        let r = rules("*.log\n");
        assert!(r.is_ignored("a.log", false));
        assert!(r.is_ignored("deep/dir/b.log", false));
        assert!(!r.is_ignored("a.rs", false));
    }

    #[test]
    fn anchored_matches_only_at_root() {
        let r = rules("/build\n");
        assert!(r.is_ignored("build", true));
        assert!(r.is_ignored("build/out.rs", false));
        assert!(!r.is_ignored("src/build", true));
    }

    #[test]
    fn star_does_not_cross_directories() {
        let r = rules("src/*.rs\n");
        assert!(r.is_ignored("src/a.rs", false));
        assert!(!r.is_ignored("src/nested/a.rs", false));
    }

    #[test]
    fn double_star_recurses() {
        let r = rules("docs/**/*.md\n");
        assert!(r.is_ignored("docs/a/b/c.md", false));
        assert!(r.is_ignored("docs/c.md", false));
    }

    #[test]
    fn dir_only_skips_files() {
        let r = rules("cache/\n");
        assert!(r.is_ignored("cache", true));
        assert!(!r.is_ignored("cache", false));
        assert!(r.is_ignored("x/cache/file.txt", false));
    }

    #[test]
    fn last_match_wins_with_negation() {
        let r = rules("*.txt\n!keep.txt\n");
        assert!(r.is_ignored("drop.txt", false));
        assert!(!r.is_ignored("keep.txt", false));

        let r = rules("!keep.txt\n*.txt\n");
        assert!(r.is_ignored("keep.txt", false));
    }

    #[test]
    fn comments_and_escapes() {
        let r = rules("# comment\n\\#hash.txt\n\\!bang.txt\n\n");
        assert_eq!(r.len(), 2);
        assert!(r.is_ignored("#hash.txt", false));
        assert!(r.is_ignored("!bang.txt", false));
        assert!(!r.is_ignored("comment", false));
    }

    #[test]
    fn malformed_line_is_skipped() {
        let r = rules("[unclosed\n*.tmp\n");
        assert_eq!(r.len(), 1);
        assert_eq!(r.warnings().len(), 1);
        assert!(r.is_ignored("x.tmp", false));
    }

    #[test]
    fn load_merges_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        let explicit = dir.path().join("extra.ignore");
        std::fs::write(&explicit, "secret/\n").unwrap();
        let r = IgnoreRules::load(dir.path(), Some(&explicit), &["*.snap".to_string()]);
        assert!(r.is_ignored("a.log", false));
        assert!(r.is_ignored("secret", true));
        assert!(r.is_ignored("t/x.snap", false));
        assert!(r.warnings().is_empty());

        let missing = IgnoreRules::load(dir.path(), Some(&dir.path().join("nope")), &[]);
        assert_eq!(missing.warnings().len(), 1);
        assert!(missing.is_ignored("a.log", false));
    }
}
