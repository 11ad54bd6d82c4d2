//! Supported function languages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Go,
    Rust,
    JavaScript,
    Lua,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::Go,
        Language::Rust,
        Language::JavaScript,
        Language::Lua,
    ];

    /// Maps a file extension (without the dot) to a language.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Language::Python),
            "go" => Some(Language::Go),
            "rs" => Some(Language::Rust),
            "js" => Some(Language::JavaScript),
            "lua" => Some(Language::Lua),
            _ => None,
        }
    }

    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => ".py",
            Language::Go => ".go",
            Language::Rust => ".rs",
            Language::JavaScript => ".js",
            Language::Lua => ".lua",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::JavaScript => "javascript",
            Language::Lua => "lua",
        }
    }

    /// Line comment marker.
    pub fn comment_prefix(self) -> &'static str {
        match self {
            Language::Python => "#",
            Language::Lua => "--",
            Language::Go | Language::Rust | Language::JavaScript => "//",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported language: '{0}'")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.as_str() == wanted)
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}
