use std::{io, path::Path};

use serde_json::json;

use crate::logging::logger;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEntry {
    pub domain: String,
    pub name: String,
    pub value: String,
}

/// Parses a Netscape (browser export) cookie jar.
///
/// Fields are tab separated: domain, include-subdomains, path, secure,
/// expiry, name, value. `#HttpOnly_` marks a real entry; any other `#` line
/// is a comment. Lines with fewer than seven fields are skipped.
pub fn parse_cookie_jar(contents: &str) -> Vec<CookieEntry> {
    contents
        .lines()
        .filter_map(|raw| {
            let line = raw.trim_end_matches('\r');
            let line = match line.strip_prefix(HTTP_ONLY_PREFIX) {
                Some(rest) => rest,
                None if line.starts_with('#') => return None,
                None => line,
            };
            if line.trim().is_empty() {
                return None;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 7 {
                return None;
            }
            Some(CookieEntry {
                domain: parts[0].to_string(),
                name: parts[5].to_string(),
                value: parts[6].to_string(),
            })
        })
        .collect()
}

pub fn cookie_header(entries: &[CookieEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}={}", entry.name, entry.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Reads the credential side-channel and renders it as a `Cookie` header
/// value. A missing or unreadable file yields an empty header.
pub async fn load_cookie_header(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => cookie_header(&parse_cookie_jar(&contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            logger().debug(
                "cookies.file_missing",
                json!({ "path": path.display().to_string() }),
            );
            String::new()
        }
        Err(err) => {
            logger().warn(
                "cookies.read_failed",
                json!({
                    "path": path.display().to_string(),
                    "error": err.to_string(),
                }),
            );
            String::new()
        }
    }
}
