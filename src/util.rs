use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

static DISPOSITION_FILENAME: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"(?i)filename(\*)?\s*=\s*(?:[\w!#$&+.^`|~-]+'[^']*')?"?([^";]+)"?"#).expect("valid regex")
});

pub const FALLBACK_FILE_NAME: &str = "download";

/// Picks a display name for a downloaded resource: the `Content-Disposition`
/// filename when present, otherwise the last non-empty path segment of the URL.
pub fn infer_file_name(url: &Url, content_disposition: Option<&str>) -> String {
  let from_header = content_disposition.and_then(disposition_file_name);

  let from_url = || {
    url
      .path_segments()
      .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
      .map(|segment| percent_decode(segment))
  };

  from_header
    .or_else(from_url)
    .map(|name| sanitize_file_name(&name))
    .filter(|name| !name.is_empty())
    .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// `filename*` (RFC 5987, percent-encoded) wins over a plain `filename`.
fn disposition_file_name(header: &str) -> Option<String> {
  let mut plain = None;
  for captures in DISPOSITION_FILENAME.captures_iter(header) {
    let Some(value) = captures.get(2).map(|m| m.as_str().trim()) else {
      continue;
    };
    if captures.get(1).is_some() {
      return Some(percent_decode(value));
    }
    plain.get_or_insert_with(|| value.to_string());
  }
  plain
}

/// Strips path separators and control characters so a user- or server-supplied
/// name can never escape the download directory.
pub fn sanitize_file_name(raw: &str) -> String {
  let cleaned: String = raw
    .chars()
    .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
    .collect();
  cleaned.trim().trim_matches('.').trim().to_string()
}

/// Applies `new_stem` to `original`, keeping the original extension.
/// A stem that already ends with that extension is left as is.
pub fn rename_preserving_extension(original: &str, new_stem: &str) -> String {
  let stem = sanitize_file_name(new_stem);
  match Path::new(original).extension().and_then(|ext| ext.to_str()) {
    Some(ext) if !ext.is_empty() => {
      let suffix = format!(".{ext}");
      if stem.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
        stem
      } else {
        format!("{stem}{suffix}")
      }
    },
    _ => stem,
  }
}

fn percent_decode(raw: &str) -> String {
  match urlencoding::decode(raw) {
    Ok(decoded) => decoded.into_owned(),
    Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned(),
  }
}
