//! Chat template documents, Jinja generation and token validation.

use crate::dataset::Role;
use crate::error::{PrepError, PrepResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

/// Token shapes that must resolve to a single vocabulary entry: `<|...|>`,
/// SentencePiece markers (`<s>`, `</s>`, `<unk>`, `<pad>`) and bracketed
/// upper-case markers such as `[INST]` or `[/INST]`.
static SPECIAL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\|[^|<>\s]+\|>|</?s>|<unk>|<pad>|\[/?[A-Z][A-Z_]*\]").expect("special token regex should be valid")
});

/// `message['role'] == 'x'`, `message.role != "x"`, or the same with the
/// operands swapped. The role lands in group 1 or group 2.
static ROLE_COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"message(?:\s*\[\s*['"]role['"]\s*\]|\.role)\s*[!=]=\s*['"]([^'"]*)['"]|['"]([^'"]*)['"]\s*[!=]=\s*message(?:\s*\[\s*['"]role['"]\s*\]|\.role)"#,
    )
    .expect("role comparison regex should be valid")
});

/// Text emitted around one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnFormat {
    pub prefix: String,
    pub suffix: String,
}

/// One named entry of the template document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatTemplateSpec {
    #[serde(skip)]
    pub name: String,
    /// Role name to wrapping text. Keys must be canonical roles.
    pub turns: BTreeMap<String, TurnFormat>,
    /// Literal Jinja template; takes precedence over `turns`.
    pub chat_template: Option<String>,
    #[serde(alias = "added_tokens")]
    pub special_tokens: Vec<String>,
    pub bos_token: Option<String>,
    pub eos_token: Option<String>,
}

/// `{name: ChatTemplateSpec}` as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateDocument {
    entries: BTreeMap<String, ChatTemplateSpec>,
}

impl TemplateDocument {
    pub fn load(path: &Path) -> PrepResult<Self> {
        if !path.is_file() {
            return Err(PrepError::MissingInput(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> PrepResult<Self> {
        let mut entries: BTreeMap<String, ChatTemplateSpec> = serde_json::from_str(text)?;
        for (name, spec) in &mut entries {
            spec.name.clone_from(name);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> PrepResult<&ChatTemplateSpec> {
        self.entries.get(name).ok_or_else(|| {
            let available: Vec<_> = self.entries.keys().map(String::as_str).collect();
            PrepError::TemplateValidation(format!("no template named '{name}' (available: {})", available.join(", ")))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Quote `text` as a single-quoted Jinja string literal.
fn jinja_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Jinja template that wraps each message in its role's prefix/suffix and
/// ends with the assistant prefix when a generation prompt is requested.
#[must_use]
pub fn generate_jinja(turns: &BTreeMap<Role, TurnFormat>) -> String {
    let mut out = String::from("{%- for message in messages %}\n");

    for (i, (role, format)) in turns.iter().enumerate() {
        let keyword = if i == 0 { "if" } else { "elif" };
        let _ = writeln!(out, "    {{%- {keyword} message['role'] == '{role}' %}}");
        let _ = writeln!(
            out,
            "        {{{{- {} + message['content'] + {} }}}}",
            jinja_literal(&format.prefix),
            jinja_literal(&format.suffix)
        );
    }
    if !turns.is_empty() {
        out.push_str("    {%- endif %}\n");
    }
    out.push_str("{%- endfor %}\n");

    if let Some(assistant) = turns.get(&Role::Assistant) {
        out.push_str("{%- if add_generation_prompt %}\n");
        let _ = writeln!(out, "    {{{{- {} }}}}", jinja_literal(&assistant.prefix));
        out.push_str("{%- endif %}\n");
    }

    out
}

impl ChatTemplateSpec {
    /// Turns keyed by canonical role. Any other key is a validation error.
    pub fn canonical_turns(&self) -> PrepResult<BTreeMap<Role, TurnFormat>> {
        self.turns
            .iter()
            .map(|(name, format)| {
                Role::parse_canonical(name).map(|role| (role, format.clone())).ok_or_else(|| {
                    PrepError::TemplateValidation(format!("template '{}' references non-canonical role '{name}'", self.name))
                })
            })
            .collect()
    }

    /// The Jinja text to embed: the literal template if given, otherwise one
    /// generated from `turns`. Role references are checked either way.
    pub fn render(&self) -> PrepResult<String> {
        if let Some(literal) = &self.chat_template {
            let roles = ROLE_COMPARISON.captures_iter(literal).filter_map(|caps| caps.get(1).or_else(|| caps.get(2)));
            for role in roles {
                if Role::parse_canonical(role.as_str()).is_none() {
                    return Err(PrepError::TemplateValidation(format!(
                        "template '{}' references non-canonical role '{}'",
                        self.name,
                        role.as_str()
                    )));
                }
            }
            return Ok(literal.clone());
        }

        let turns = self.canonical_turns()?;
        if turns.is_empty() {
            return Err(PrepError::TemplateValidation(format!("template '{}' has neither turns nor chat_template", self.name)));
        }
        Ok(generate_jinja(&turns))
    }

    /// Declared tokens, deduplicated, in declaration order.
    #[must_use]
    pub fn declared_tokens(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.special_tokens.iter().map(String::as_str).filter(|t| !t.is_empty() && seen.insert(*t)).collect()
    }

    /// Render, then require every special-looking token in the template and in the
    /// bos/eos overrides to be either known to the base tokenizer or declared.
    pub fn validate(&self, known_tokens: &BTreeSet<String>) -> PrepResult<String> {
        let rendered = self.render()?;
        let declared: BTreeSet<&str> = self.declared_tokens().into_iter().collect();

        let in_template = SPECIAL_TOKEN.find_iter(&rendered).map(|m| m.as_str());
        let in_overrides =
            self.bos_token.iter().chain(&self.eos_token).flat_map(|t| SPECIAL_TOKEN.find_iter(t).map(|m| m.as_str()));
        let undeclared: BTreeSet<&str> =
            in_template.chain(in_overrides).filter(|t| !declared.contains(t) && !known_tokens.contains(*t)).collect();

        if undeclared.is_empty() {
            Ok(rendered)
        } else {
            let list: Vec<_> = undeclared.into_iter().collect();
            Err(PrepError::TemplateValidation(format!("template '{}' uses undeclared special tokens: {}", self.name, list.join(", "))))
        }
    }
}
