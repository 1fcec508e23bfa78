use serde::{Deserialize, Serialize};

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Canonical list of file extensions the watcher and chunker both treat as
/// indexable, so the two never diverge on what counts as "a file".
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // JavaScript / TypeScript
    "ts", "tsx", "js", "jsx", "mjs", "cjs",
    // Systems / compiled
    "rs", "py", "go", "java", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala",
    // Web
    "html", "css", "scss", "less", "sass",
    // Data / config
    "json", "yaml", "yml", "toml", "xml",
    // Documentation
    "md", "mdx", "txt", "rst",
    // Query / schema
    "sql", "graphql", "gql",
    // Shell
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
];

/// Check whether a file extension (without leading dot, lowercase) is in the
/// shared supported-extensions list.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

/// Deterministic extension -> languageId table (§4.7 "Language resolution").
/// Unknown extensions resolve to `None`, which routes the chunker into
/// fallback line-window mode.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "ts" => "typescript",
        "tsx" => "tsx",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        _ => return None,
    })
}

/// Tunable knobs for the semantic chunker (§4.2 Config) and the sync/watcher
/// layers that invoke it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    pub fallback_line_size: usize,
    pub fallback_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            max_chunk_size: 4000,
            min_chunk_size: 50,
            fallback_line_size: 50,
            fallback_overlap: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    pub data_dir: String,
    pub max_file_size_bytes: usize,
    pub watcher_debounce_ms: u64,
    pub sync_interval_secs: u64,
    /// AI call timeout for the server's summarizer/embedder round trip (§5, T ~ 25s).
    pub ai_call_timeout_secs: u64,
    pub chunker: ChunkerConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("CODEINDEX_PORT").unwrap_or_else(|_| "8731".to_string());

        let data_dir = std::env::var("CODEINDEX_DATA_DIR").unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("codeindex-server").to_string_lossy().to_string())
                .unwrap_or_else(|| ".codeindex-data".to_string())
        });

        Self {
            listen_addr: format!("127.0.0.1:{}", port),
            data_dir,
            max_file_size_bytes: std::env::var("CODEINDEX_MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024),
            watcher_debounce_ms: std::env::var("CODEINDEX_WATCHER_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            sync_interval_secs: std::env::var("CODEINDEX_SYNC_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            ai_call_timeout_secs: std::env::var("CODEINDEX_AI_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25),
            chunker: ChunkerConfig::default(),
        }
    }
}
