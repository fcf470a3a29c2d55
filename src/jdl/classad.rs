use super::{DescriptionFormat, JobDescription};
use anyhow::{bail, Result};

/// A flat attribute document in the ClassAd syntax: `[Name = value; ...]`.
///
/// Attribute names are case-insensitive. Values are kept as raw expressions
/// and only interpreted on read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassAd {
    attributes: Vec<(String, String)>,
}

impl ClassAd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let body = if trimmed.starts_with('[') {
            if !trimmed.ends_with(']') {
                bail!("Unterminated job description");
            }
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        };

        let mut classad = ClassAd::new();
        for statement in split_top_level(body, ';')? {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            let Some((name, value)) = statement.split_once('=') else {
                bail!("Missing '=' in statement: {}", statement);
            };
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                bail!("Invalid attribute name: {:?}", name);
            }
            classad.set(name, value.trim().to_string());
        }
        Ok(classad)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(name, _)| name.as_str())
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, name: &str, expression: String) {
        match self
            .attributes
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, value)) => *value = expression,
            None => self.attributes.push((name.to_string(), expression)),
        }
    }
}

/// Split on `separator` outside of quotes, braces and brackets.
fn split_top_level(body: &str, separator: char) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => {
                depth -= 1;
                if depth < 0 {
                    bail!("Unbalanced closing '{}'", c);
                }
            }
            _ if c == separator && depth == 0 => {
                parts.push(&body[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if in_quotes {
        bail!("Unterminated string literal");
    }
    if depth != 0 {
        bail!("Unbalanced brackets");
    }
    parts.push(&body[start..]);
    Ok(parts)
}

/// Indent every line break that is not part of a string literal.
fn indent_nested(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_quotes = false;
    let mut escaped = false;
    for c in value.chars() {
        out.push(c);
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == '\n' {
            out.push_str("    ");
        }
    }
    out
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].replace("\\\"", "\"")
    } else {
        value.to_string()
    }
}

impl JobDescription for ClassAd {
    fn get_attribute_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| unquote(v).parse().ok())
    }

    fn get_attribute_string(&self, name: &str) -> Option<String> {
        self.get(name).map(unquote)
    }

    fn get_list_from_expression(&self, name: &str) -> Vec<String> {
        let Some(value) = self.get(name) else {
            return Vec::new();
        };
        let value = value.trim();
        let inner = value
            .strip_prefix('{')
            .and_then(|v| v.strip_suffix('}'))
            .unwrap_or(value);
        let Ok(items) = split_top_level(inner, ',') else {
            return Vec::new();
        };
        items
            .into_iter()
            .map(unquote)
            .filter(|item| !item.is_empty())
            .collect()
    }

    fn lookup_attribute(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn insert_attribute_int(&mut self, name: &str, value: i64) {
        self.set(name, value.to_string());
    }

    fn insert_attribute_string(&mut self, name: &str, value: &str) {
        self.set(name, format!("\"{}\"", value.replace('"', "\\\"")));
    }

    fn insert_expression(&mut self, name: &str, expression: &str) {
        self.set(name, expression.trim().to_string());
    }

    fn as_jdl(&self) -> String {
        let mut out = String::from("[\n");
        for (name, value) in &self.attributes {
            // Nested documents are indented one level further.
            out.push_str(&format!("    {} = {};\n", name, indent_nested(value)));
        }
        out.push(']');
        out
    }
}

/// Parses descriptions written in the ClassAd syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassAdFormat;

impl DescriptionFormat for ClassAdFormat {
    fn parse(&self, text: &str) -> Result<Box<dyn JobDescription>> {
        Ok(Box::new(ClassAd::parse(text)?))
    }

    fn empty(&self) -> Box<dyn JobDescription> {
        Box::new(ClassAd::new())
    }
}
