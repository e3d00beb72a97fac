//! Language detection and tree-sitter symbol extraction.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Source language recognized by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Java,
    C,
    Cpp,
    Go,
    Rust,
}

impl Lang {
    /// Tag stored in chunk metadata.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Go => "go",
            Self::Rust => "rust",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the language has no
    /// bundled grammar or its feature is disabled.
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
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Node kinds whose `name` field is reported as a symbol.
    #[must_use]
    pub fn symbol_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "function_signature_item",
                "struct_item",
                "enum_item",
                "union_item",
                "trait_item",
                "type_item",
                "mod_item",
                "macro_definition",
            ],
            Self::Python => &["function_definition", "class_definition"],
            Self::JavaScript => &[
                "function_declaration",
                "generator_function_declaration",
                "class_declaration",
                "method_definition",
            ],
            Self::TypeScript => &[
                "function_declaration",
                "generator_function_declaration",
                "class_declaration",
                "abstract_class_declaration",
                "method_definition",
                "interface_declaration",
                "type_alias_declaration",
                "enum_declaration",
            ],
            Self::Go => &["function_declaration", "method_declaration", "type_spec"],
            Self::Java | Self::C | Self::Cpp => &[],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "java" => Some(Lang::Java),
        "c" | "h" => Some(Lang::C),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some(Lang::Cpp),
        "go" => Some(Lang::Go),
        "rs" => Some(Lang::Rust),
        _ => None,
    }
}

/// Language tag for a path: the detected language id, or the bare extension
/// for extensions configured as code but unknown here.
#[must_use]
pub fn language_tag(path: &Path) -> String {
    match detect_language(path) {
        Some(lang) => lang.id().to_owned(),
        None => path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default(),
    }
}

/// Names of structural entities declared in `code`, in source order without
/// duplicates.
///
/// Chunks are arbitrary windows, so the parse is usually partial; tree-sitter
/// recovers around the damage and whatever declarations survive are reported.
/// Languages without a grammar yield an empty list.
#[must_use]
pub fn extract_symbols(code: &str, lang: Lang) -> Vec<String> {
    let kinds = lang.symbol_node_kinds();
    if kinds.is_empty() {
        return Vec::new();
    }
    let Some(grammar) = lang.grammar() else {
        return Vec::new();
    };

    let mut parser = tree_sitter::Parser::new();
    if let Err(e) = parser.set_language(&grammar) {
        tracing::debug!(lang = %lang, "grammar rejected by parser: {e}");
        return Vec::new();
    }
    let Some(tree) = parser.parse(code, None) else {
        tracing::debug!(lang = %lang, "tree-sitter returned no tree");
        return Vec::new();
    };

    let mut names: Vec<String> = Vec::new();
    let mut cursor = tree.root_node().walk();
    loop {
        let node = cursor.node();
        if kinds.contains(&node.kind())
            && let Some(name) = node.child_by_field_name("name")
            && let Some(text) = code.get(name.byte_range())
            && !text.is_empty()
            && !names.iter().any(|n| n == text)
        {
            names.push(text.to_owned());
        }

        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return names;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_known_extensions() {
        assert_eq!(detect_language(Path::new("a/b.py")), Some(Lang::Python));
        assert_eq!(detect_language(Path::new("x.JSX")), Some(Lang::JavaScript));
        assert_eq!(detect_language(Path::new("x.tsx")), Some(Lang::TypeScript));
        assert_eq!(detect_language(Path::new("Main.java")), Some(Lang::Java));
        assert_eq!(detect_language(Path::new("m.cpp")), Some(Lang::Cpp));
        assert_eq!(detect_language(Path::new("m.c")), Some(Lang::C));
        assert_eq!(detect_language(Path::new("main.go")), Some(Lang::Go));
        assert_eq!(detect_language(Path::new("lib.rs")), Some(Lang::Rust));
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn language_tag_falls_back_to_extension() {
        assert_eq!(language_tag(Path::new("a.py")), "python");
        assert_eq!(language_tag(Path::new("script.RB")), "rb");
        assert_eq!(language_tag(Path::new("noext")), "");
    }

    #[test]
    fn lang_display_matches_id() {
        for lang in [Lang::Python, Lang::Go, Lang::Cpp, Lang::Rust] {
            assert_eq!(lang.to_string(), lang.id());
        }
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_symbols_in_order() {
        let code = "class Store:\n    def get(self, k):\n        return k\n\ndef helper():\n    pass\n";
        assert_eq!(
            extract_symbols(code, Lang::Python),
            vec!["Store", "get", "helper"]
        );
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_partial_chunk_still_yields_names() {
        let code = "return x + 1\n\ndef tail(a, b):\n    return a";
        assert_eq!(extract_symbols(code, Lang::Python), vec!["tail"]);
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_symbols() {
        let code = "pub struct Config { a: u8 }\nenum Mode { A }\nfn load() {}\nmod inner { fn nested() {} }\n";
        assert_eq!(
            extract_symbols(code, Lang::Rust),
            vec!["Config", "Mode", "load", "inner", "nested"]
        );
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn go_symbols() {
        let code = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Run() {}\n\nfunc main() {}\n";
        assert_eq!(
            extract_symbols(code, Lang::Go),
            vec!["Server", "Run", "main"]
        );
    }

    #[cfg(feature = "lang-js")]
    #[test]
    fn javascript_symbols() {
        let code = "function boot() {}\nclass View { render() {} }\n";
        assert_eq!(
            extract_symbols(code, Lang::JavaScript),
            vec!["boot", "View", "render"]
        );
    }

    #[test]
    fn languages_without_extractor_are_empty() {
        assert!(extract_symbols("public class A { void b() {} }", Lang::Java).is_empty());
        assert!(extract_symbols("int main() { return 0; }", Lang::C).is_empty());
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn duplicate_names_reported_once() {
        let code = "def f():\n    pass\n\ndef f():\n    pass\n";
        assert_eq!(extract_symbols(code, Lang::Python), vec!["f"]);
    }
}
