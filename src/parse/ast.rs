//! Tree-sitter symbol extraction: walks each language's grammar tree and
//! classifies nodes into function/class/import spans for the chunker.
//! Restricted to the eight languages this
//! service understands: python, javascript, typescript, java, go, rust, c,
//! cpp.

use tree_sitter::{Language, Node, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Class,
    Import,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: Option<String>,
    pub kind: SymbolKind,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    /// Name of the enclosing class/impl, for methods.
    pub parent_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FileAst {
    pub symbols: Vec<Symbol>,
}

pub fn language_for_ext(ext: &str) -> Option<(Language, &'static str)> {
    match ext {
        "rs" => Some((tree_sitter_rust::LANGUAGE.into(), "rust")),
        "ts" | "tsx" => Some((tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(), "typescript")),
        "js" | "jsx" | "mjs" | "cjs" => Some((tree_sitter_javascript::LANGUAGE.into(), "javascript")),
        "py" | "pyi" => Some((tree_sitter_python::LANGUAGE.into(), "python")),
        "go" => Some((tree_sitter_go::LANGUAGE.into(), "go")),
        "c" | "h" => Some((tree_sitter_c::LANGUAGE.into(), "c")),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some((tree_sitter_cpp::LANGUAGE.into(), "cpp")),
        "java" => Some((tree_sitter_java::LANGUAGE.into(), "java")),
        _ => None,
    }
}

fn is_rust(ext: &str) -> bool {
    ext == "rs"
}
fn is_c_cpp(ext: &str) -> bool {
    matches!(ext, "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx")
}
fn is_go(ext: &str) -> bool {
    ext == "go"
}

fn classify_node(kind: &str) -> Option<SymbolKind> {
    match kind {
        // Function-like
        "function_item" | "function_declaration" | "function_definition"
        | "method_declaration" | "method_definition" => Some(SymbolKind::Function),

        // Class-like
        "class_definition" | "class_declaration" | "class_specifier" | "struct_item"
        | "struct_specifier" | "interface_declaration" | "trait_item" | "enum_item"
        | "enum_declaration" | "enum_specifier" => Some(SymbolKind::Class),

        // Import-like
        "import_statement" | "import_from_statement" | "import_declaration"
        | "use_declaration" | "preproc_include" => Some(SymbolKind::Import),

        _ => None,
    }
}

fn extract_name<'a>(node: &Node<'a>, source: &'a [u8], ext: &str) -> Option<String> {
    for field in &["name", "type"] {
        if let Some(name_node) = node.child_by_field_name(*field) {
            if let Ok(text) = name_node.utf8_text(source) {
                let name = text.trim().to_string();
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
    }

    if node.kind() == "impl_item" && is_rust(ext) {
        if let Some(type_node) = node.child_by_field_name("type") {
            if let Ok(text) = type_node.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if node.kind() == "type_spec" && is_go(ext) {
        if let Some(child) = node.named_child(0) {
            if let Ok(text) = child.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if (node.kind() == "function_definition" && is_c_cpp(ext)) || node.kind() == "function_item" {
        if let Some(decl) = node.child_by_field_name("declarator") {
            if let Some(name_node) = decl.child_by_field_name("declarator") {
                if let Ok(text) = name_node.utf8_text(source) {
                    return Some(text.trim().to_string());
                }
            }
            if let Ok(text) = decl.utf8_text(source) {
                let s = text.trim();
                if let Some(paren) = s.find('(') {
                    return Some(s[..paren].trim().to_string());
                }
                return Some(s.to_string());
            }
        }
    }

    None
}

fn walk_node(
    node: &Node,
    source: &[u8],
    ext: &str,
    parent_name: Option<String>,
    ast: &mut FileAst,
) {
    let kind = node.kind();

    // impl blocks aren't classified themselves but establish a parent name
    // for their methods.
    if kind == "impl_item" && is_rust(ext) {
        let name = extract_name(node, source, ext);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, ext, name.clone(), ast);
        }
        return;
    }

    if let Some(sym_kind) = classify_node(kind) {
        let name = extract_name(node, source, ext);
        let start_line = node.start_position().row + 1;
        let end_line = node.end_position().row + 1;

        ast.symbols.push(Symbol {
            name: name.clone(),
            kind: sym_kind,
            start_line,
            end_line,
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            parent_name: if matches!(sym_kind, SymbolKind::Function) { parent_name.clone() } else { None },
        });

        let next_parent = if matches!(sym_kind, SymbolKind::Class) { name } else { parent_name };
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, ext, next_parent.clone(), ast);
        }
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, ext, parent_name.clone(), ast);
        }
    }
}

/// Parse a single file's AST. Returns `None` if the language isn't in the
/// closed extension table or the grammar fails to parse.
pub fn parse_file(content: &str, ext: &str) -> Option<(FileAst, &'static str)> {
    let (lang, lang_name) = language_for_ext(ext)?;
    let mut parser = Parser::new();
    parser.set_language(&lang).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let mut ast = FileAst::default();
    let source = content.as_bytes();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        walk_node(&child, source, ext, None, &mut ast);
    }
    Some((ast, lang_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rust_function_and_struct() {
        let src = "pub fn greet(name: &str) -> String {\n    format!(\"hi {}\", name)\n}\n\nstruct Config {\n    name: String,\n}\n";
        let (ast, lang) = parse_file(src, "rs").expect("should parse");
        assert_eq!(lang, "rust");
        assert!(ast.symbols.iter().any(|s| s.kind == SymbolKind::Function));
        assert!(ast.symbols.iter().any(|s| s.kind == SymbolKind::Class));
    }

    #[test]
    fn methods_in_impl_get_parent_name() {
        let src = "struct Config;\n\nimpl Config {\n    pub fn new() -> Self {\n        Config\n    }\n}\n";
        let (ast, _) = parse_file(src, "rs").unwrap();
        let method = ast
            .symbols
            .iter()
            .find(|s| s.kind == SymbolKind::Function && s.name.as_deref() == Some("new"))
            .expect("should find new()");
        assert_eq!(method.parent_name.as_deref(), Some("Config"));
    }

    #[test]
    fn python_imports_are_classified() {
        let src = "import os\nfrom typing import Any\n\ndef hello():\n    return 1\n";
        let (ast, _) = parse_file(src, "py").unwrap();
        assert!(ast.symbols.iter().any(|s| s.kind == SymbolKind::Import));
        assert!(ast.symbols.iter().any(|s| s.kind == SymbolKind::Function));
    }

    #[test]
    fn unknown_extension_returns_none() {
        assert!(parse_file("hello", "txt").is_none());
        assert!(parse_file("hello", "md").is_none());
    }
}
