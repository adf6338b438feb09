//! Team-ACE/ToolACE: ShareGPT records whose `system` text embeds the
//! available function definitions as loose JSON objects.

use super::sharegpt::ShareGptRecord;
use super::{locate_source, read_json_array, NormalizeOptions, NormalizeReport, Normalizer};
use crate::error::PrepResult;
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct ToolAceNormalizer;

impl Normalizer for ToolAceNormalizer {
    fn name(&self) -> &'static str {
        "toolace"
    }

    fn normalize(&self, source_dataset: &str, raw_source_path: &Path, options: &NormalizeOptions) -> PrepResult<NormalizeReport> {
        let file = locate_source(raw_source_path, &["data.json"], "json")?;
        let mut report = NormalizeReport::new(source_dataset);

        read_json_array(&file, options, |index, value| {
            let result = ShareGptRecord::parse(value).and_then(|mut record| {
                let functions = record.system.take().map(|s| extract_functions(&s)).unwrap_or_default();
                let tools = serde_json::Value::Array(functions).to_string();
                record.into_conversation(source_dataset).map(|c| c.with_tools(tools))
            });
            report.push(index, result);
        })?;

        Ok(report.finish())
    }
}

/// Pull every balanced `{...}` object that mentions `"name"` near its start
/// and parses to an object with both `name` and `description`.
#[must_use]
pub fn extract_functions(text: &str) -> Vec<serde_json::Value> {
    const LOOKAHEAD: usize = 20;

    let bytes = text.as_bytes();
    let mut functions = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let window = &bytes[i..(i + LOOKAHEAD).min(bytes.len())];
        if !window.windows(6).any(|w| w == b"\"name\"") {
            i += 1;
            continue;
        }

        let Some(end) = matching_brace(bytes, i) else {
            break;
        };
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_slice::<serde_json::Value>(&bytes[i..=end]) {
            if obj.contains_key("name") && obj.contains_key("description") {
                functions.push(serde_json::Value::Object(obj));
            }
        }
        i = end + 1;
    }

    functions
}

/// Index of the brace closing the one at `start`, skipping braces inside strings.
fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}
