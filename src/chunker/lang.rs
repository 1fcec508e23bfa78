//! Per-language semantic-unit sets and node-kind -> `ChunkKind` maps.
//!
//! Each supported grammar declares which AST node types count as a
//! "semantic unit" (§GLOSSARY) and how those node types map onto the fixed
//! `ChunkKind` vocabulary. Anything not in the map becomes `Block`.

use super::ChunkKind;

/// Everything the chunker needs to know about one tree-sitter grammar.
pub struct LanguageSpec {
    pub language_id: &'static str,
    #[cfg(any(
        feature = "lang-rust",
        feature = "lang-python",
        feature = "lang-js-ts"
    ))]
    pub grammar: fn() -> tree_sitter::Language,
    pub semantic_unit_kinds: &'static [&'static str],
    pub kind_map: &'static [(&'static str, ChunkKind)],
}

impl LanguageSpec {
    pub fn is_semantic_unit(&self, node_kind: &str) -> bool {
        self.semantic_unit_kinds.contains(&node_kind)
    }

    pub fn map_kind(&self, node_kind: &str) -> ChunkKind {
        self.kind_map
            .iter()
            .find(|(k, _)| *k == node_kind)
            .map(|(_, v)| *v)
            .unwrap_or(ChunkKind::Block)
    }
}

#[cfg(feature = "lang-rust")]
const RUST_SEMANTIC_UNITS: &[&str] = &[
    "function_item",
    "struct_item",
    "enum_item",
    "impl_item",
    "trait_item",
    "mod_item",
];

#[cfg(feature = "lang-rust")]
const RUST_KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function_item", ChunkKind::Function),
    ("struct_item", ChunkKind::Struct),
    ("enum_item", ChunkKind::Enum),
    ("impl_item", ChunkKind::Impl),
    ("trait_item", ChunkKind::Trait),
];

#[cfg(feature = "lang-rust")]
pub fn rust_spec() -> LanguageSpec {
    LanguageSpec {
        language_id: "rust",
        grammar: || tree_sitter_rust::LANGUAGE.into(),
        semantic_unit_kinds: RUST_SEMANTIC_UNITS,
        kind_map: RUST_KIND_MAP,
    }
}

#[cfg(feature = "lang-python")]
const PYTHON_SEMANTIC_UNITS: &[&str] = &["function_definition", "class_definition"];

#[cfg(feature = "lang-python")]
const PYTHON_KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function_definition", ChunkKind::Function),
    ("class_definition", ChunkKind::Class),
];

#[cfg(feature = "lang-python")]
pub fn python_spec() -> LanguageSpec {
    LanguageSpec {
        language_id: "python",
        grammar: || tree_sitter_python::LANGUAGE.into(),
        semantic_unit_kinds: PYTHON_SEMANTIC_UNITS,
        kind_map: PYTHON_KIND_MAP,
    }
}

#[cfg(feature = "lang-js-ts")]
const JS_SEMANTIC_UNITS: &[&str] = &[
    "function_declaration",
    "method_definition",
    "class_declaration",
    "lexical_declaration",
];

#[cfg(feature = "lang-js-ts")]
const JS_KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function_declaration", ChunkKind::Function),
    ("method_definition", ChunkKind::Method),
    ("class_declaration", ChunkKind::Class),
];

#[cfg(feature = "lang-js-ts")]
pub fn javascript_spec() -> LanguageSpec {
    LanguageSpec {
        language_id: "javascript",
        grammar: || tree_sitter_javascript::LANGUAGE.into(),
        semantic_unit_kinds: JS_SEMANTIC_UNITS,
        kind_map: JS_KIND_MAP,
    }
}

#[cfg(feature = "lang-js-ts")]
const TS_SEMANTIC_UNITS: &[&str] = &[
    "function_declaration",
    "method_definition",
    "class_declaration",
    "interface_declaration",
    "type_alias_declaration",
    "enum_declaration",
    "lexical_declaration",
];

#[cfg(feature = "lang-js-ts")]
const TS_KIND_MAP: &[(&str, ChunkKind)] = &[
    ("function_declaration", ChunkKind::Function),
    ("method_definition", ChunkKind::Method),
    ("class_declaration", ChunkKind::Class),
    ("interface_declaration", ChunkKind::Interface),
    ("type_alias_declaration", ChunkKind::Type),
    ("enum_declaration", ChunkKind::Enum),
];

#[cfg(feature = "lang-js-ts")]
pub fn typescript_spec() -> LanguageSpec {
    LanguageSpec {
        language_id: "typescript",
        grammar: || tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        semantic_unit_kinds: TS_SEMANTIC_UNITS,
        kind_map: TS_KIND_MAP,
    }
}

/// Look up the grammar/kind-map bundle for a resolved `languageId`. `None`
/// means no grammar is loaded for this language; the caller should fall
/// back to line-window chunking.
pub fn spec_for(language_id: &str) -> Option<LanguageSpec> {
    match language_id {
        #[cfg(feature = "lang-rust")]
        "rust" => Some(rust_spec()),
        #[cfg(feature = "lang-python")]
        "python" => Some(python_spec()),
        #[cfg(feature = "lang-js-ts")]
        "javascript" => Some(javascript_spec()),
        #[cfg(feature = "lang-js-ts")]
        "typescript" | "tsx" => Some(typescript_spec()),
        _ => None,
    }
}
