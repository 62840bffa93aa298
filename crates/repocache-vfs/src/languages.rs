//! Extension/filename based language and binary-file detection tables.

/// `.ext -> language` plus the filenames that are recognized without an
/// extension.
pub fn detect_language(path: &str) -> Option<&'static str> {
    let basename = path.rsplit('/').next().unwrap_or(path);
    match basename.to_ascii_lowercase().as_str() {
        "dockerfile" => return Some("dockerfile"),
        "makefile" => return Some("makefile"),
        "rakefile" => return Some("rakefile"),
        "gemfile" => return Some("gemfile"),
        _ => {}
    }

    let ext = basename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase())?;
    let lang = match ext.as_str() {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "sh" | "bash" => "bash",
        "ps1" => "powershell",
        "html" => "html",
        "css" => "css",
        "md" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "sql" => "sql",
        _ => return None,
    };
    Some(lang)
}

const BINARY_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "dylib", "bin", "png", "jpg", "jpeg", "gif", "bmp", "ico", "zip", "gz",
    "tar", "7z", "rar", "pdf", "woff", "woff2", "ttf", "otf", "class", "jar", "wasm",
];

pub fn is_binary(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    match basename.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}
