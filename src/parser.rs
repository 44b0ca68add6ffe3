//! Symbol extraction. The [`SymbolParser`] port is what the indexer and the
//! watcher coupling call; [`TreeSitterParser`] implements it for TypeScript,
//! TSX and C#.

use tree_sitter::{Language, Node};

use crate::error::SearchError;
use crate::types::SymbolMeta;

/// Produces the symbols of one source file.
pub trait SymbolParser: Send + Sync {
    /// Whether files with this (lowercase, dotless) extension are parsed.
    fn supports_extension(&self, ext: &str) -> bool;
    /// Symbols ordered by start line.
    fn parse_file_to_meta(&self, ext: &str, source: &str) -> Result<Vec<SymbolMeta>, SearchError>;
}

// ─── Tree-sitter adapter ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    TypeScript,
    Tsx,
    CSharp,
}

impl Grammar {
    fn for_ext(ext: &str) -> Option<Self> {
        match ext {
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "cs" => Some(Self::CSharp),
            _ => None,
        }
    }

    fn language(self) -> Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
        }
    }
}

/// Stateless; a `tree_sitter::Parser` is created per call so the adapter
/// can be shared across indexing threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterParser;

impl TreeSitterParser {
    pub fn new() -> Self {
        Self
    }
}

impl SymbolParser for TreeSitterParser {
    fn supports_extension(&self, ext: &str) -> bool {
        Grammar::for_ext(ext).is_some()
    }

    fn parse_file_to_meta(&self, ext: &str, source: &str) -> Result<Vec<SymbolMeta>, SearchError> {
        let grammar = Grammar::for_ext(ext).ok_or_else(|| SearchError::Unsupported(format!("no grammar for .{}", ext)))?;
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&grammar.language())
            .map_err(|e| SearchError::Unsupported(format!("grammar for .{}: {}", ext, e)))?;
        let Some(tree) = parser.parse(source, None) else {
            return Ok(Vec::new());
        };

        let mut symbols = Vec::new();
        match grammar {
            Grammar::TypeScript | Grammar::Tsx => walk_typescript(tree.root_node(), source, None, &mut symbols),
            Grammar::CSharp => walk_csharp(tree.root_node(), source, None, &mut symbols),
        }
        symbols.sort_by_key(|s| (s.start_line, s.end_line));
        Ok(symbols)
    }
}

// ─── TypeScript ─────────────────────────────────────────────────────

fn walk_typescript(node: Node, source: &str, parent: Option<&str>, out: &mut Vec<SymbolMeta>) {
    let kind = match node.kind() {
        "class_declaration" | "abstract_class_declaration" => Some("class"),
        "interface_declaration" => Some("interface"),
        "enum_declaration" => Some("enum"),
        "function_declaration" | "generator_function_declaration" => Some("function"),
        "method_definition" | "method_signature" | "abstract_method_signature" => {
            if name_of(node, source) == "constructor" {
                Some("constructor")
            } else {
                Some("method")
            }
        }
        _ => None,
    };

    if let Some(kind) = kind {
        let name = name_of(node, source);
        if !name.is_empty() {
            out.push(symbol(node, source, &name, kind, parent));
            let body = match kind {
                "class" => find_child_by_kind(node, "class_body"),
                "interface" => find_child_by_kind(node, "object_type").or_else(|| find_child_by_kind(node, "interface_body")),
                _ => None,
            };
            if let Some(body) = body {
                for child in children(body) {
                    walk_typescript(child, source, Some(&name), out);
                }
            }
            return;
        }
    }

    for child in children(node) {
        walk_typescript(child, source, parent, out);
    }
}

// ─── C# ─────────────────────────────────────────────────────────────

fn walk_csharp(node: Node, source: &str, parent: Option<&str>, out: &mut Vec<SymbolMeta>) {
    let kind = match node.kind() {
        "class_declaration" => Some("class"),
        "interface_declaration" => Some("interface"),
        "struct_declaration" => Some("struct"),
        "record_declaration" => Some("record"),
        "enum_declaration" => Some("enum"),
        "method_declaration" | "local_function_statement" => Some("method"),
        "constructor_declaration" => Some("constructor"),
        _ => None,
    };

    if let Some(kind) = kind {
        let name = name_of(node, source);
        if !name.is_empty() {
            out.push(symbol(node, source, &name, kind, parent));
            if let Some(body) = find_child_by_kind(node, "declaration_list") {
                for child in children(body) {
                    walk_csharp(child, source, Some(&name), out);
                }
            }
            return;
        }
    }

    for child in children(node) {
        walk_csharp(child, source, parent, out);
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn name_of(node: Node, source: &str) -> String {
    node.child_by_field_name("name")
        .map(|n| node_text(n, source).to_string())
        .unwrap_or_default()
}

fn find_child_by_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    children(node).find(|c| c.kind() == kind)
}

fn children<'a>(node: Node<'a>) -> impl Iterator<Item = Node<'a>> {
    (0..node.child_count()).filter_map(move |i| node.child(i))
}

/// 1-based row, saturated to the posting line width.
fn line_of(row: usize) -> u16 {
    u16::try_from(row + 1).unwrap_or(u16::MAX)
}

fn symbol(node: Node, source: &str, name: &str, kind: &str, parent: Option<&str>) -> SymbolMeta {
    let signature = node_text(node, source)
        .lines()
        .next()
        .map(|l| l.trim().trim_end_matches('{').trim_end().to_string())
        .unwrap_or_default();
    SymbolMeta {
        name: name.to_string(),
        signature,
        kind: kind.to_string(),
        start_line: line_of(node.start_position().row),
        end_line: line_of(node.end_position().row),
        parent: parent.map(str::to_string),
        tags: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(ext: &str, source: &str) -> Vec<SymbolMeta> {
        TreeSitterParser::new().parse_file_to_meta(ext, source).unwrap()
    }

    fn find<'a>(symbols: &'a [SymbolMeta], name: &str) -> &'a SymbolMeta {
        symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {} not found in {:?}", name, symbols))
    }

    #[test]
    fn test_supports_extension() {
        let p = TreeSitterParser::new();
        assert!(p.supports_extension("ts"));
        assert!(p.supports_extension("tsx"));
        assert!(p.supports_extension("cs"));
        assert!(!p.supports_extension("go"));
        assert!(p.parse_file_to_meta("go", "package x").is_err());
    }

    #[test]
    fn test_typescript_class_with_members() {
        let src = "export class UserService {\n  constructor(private db: Db) {}\n  async findUser(id: string): Promise<User> {\n    return this.db.get(id);\n  }\n}\n";
        let syms = parse("ts", src);

        let class = find(&syms, "UserService");
        assert_eq!(class.kind, "class");
        assert_eq!((class.start_line, class.end_line), (1, 6));
        assert_eq!(class.signature, "class UserService");
        assert!(class.parent.is_none());

        let ctor = find(&syms, "constructor");
        assert_eq!(ctor.kind, "constructor");
        assert_eq!(ctor.parent.as_deref(), Some("UserService"));

        let method = find(&syms, "findUser");
        assert_eq!(method.kind, "method");
        assert_eq!((method.start_line, method.end_line), (3, 5));
        assert_eq!(method.signature, "async findUser(id: string): Promise<User>");
    }

    #[test]
    fn test_typescript_top_level_declarations() {
        let src = "interface Session {\n  id: string;\n  refresh(): void;\n}\nenum Mode { A, B }\nfunction handleLogin(req: Request) {\n  return 1;\n}\n";
        let syms = parse("ts", src);
        assert_eq!(find(&syms, "Session").kind, "interface");
        assert_eq!(find(&syms, "refresh").parent.as_deref(), Some("Session"));
        assert_eq!(find(&syms, "Mode").kind, "enum");
        let f = find(&syms, "handleLogin");
        assert_eq!(f.kind, "function");
        assert_eq!(f.start_line, 6);

        let starts: Vec<u16> = syms.iter().map(|s| s.start_line).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn test_tsx_component() {
        let src = "export function App() {\n  return <div>hi</div>;\n}\n";
        let syms = parse("tsx", src);
        assert_eq!(find(&syms, "App").kind, "function");
    }

    #[test]
    fn test_csharp_types_and_members() {
        let src = "namespace Auth {\n  public class TokenValidator : IValidator {\n    public TokenValidator() {}\n    public bool Validate(string token) {\n      return true;\n    }\n  }\n  public interface IValidator { bool Validate(string t); }\n  public enum Kind { A }\n}\n";
        let syms = parse("cs", src);

        let class = find(&syms, "TokenValidator");
        assert_eq!(class.kind, "class");
        assert_eq!((class.start_line, class.end_line), (2, 7));
        assert_eq!(class.signature, "public class TokenValidator : IValidator");

        let ctor = syms.iter().find(|s| s.kind == "constructor").unwrap();
        assert_eq!(ctor.parent.as_deref(), Some("TokenValidator"));

        let validate: Vec<&SymbolMeta> = syms.iter().filter(|s| s.name == "Validate").collect();
        assert_eq!(validate.len(), 2);
        assert!(validate.iter().any(|s| s.parent.as_deref() == Some("IValidator")));

        assert_eq!(find(&syms, "Kind").kind, "enum");
    }

    #[test]
    fn test_empty_source() {
        assert!(parse("ts", "").is_empty());
        assert!(parse("cs", "").is_empty());
    }
}
