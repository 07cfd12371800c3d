//! `Key: value` message bodies.
//!
//! A body opens with a block of `Key: value` lines; anything after the first
//! line that is not a field is prose. Keys match case-insensitively. Fields
//! keep their original order and spelling so unknown keys survive a rewrite.

/// Parsed message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    fields: Vec<(String, String)>,
    prose: String,
}

fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    let valid = key.bytes().next().is_some_and(|b| b.is_ascii_alphabetic())
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    valid.then(|| (key, value.trim()))
}

fn same_key(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| x.eq_ignore_ascii_case(&y) || (matches!(x, b'-' | b'_') && matches!(y, b'-' | b'_')))
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut body = Body::default();
        let mut lines = text.lines().peekable();
        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
        }
        while let Some(line) = lines.peek() {
            let Some((key, value)) = split_field(line) else {
                break;
            };
            body.fields.push((key.to_string(), value.to_string()));
            lines.next();
        }
        let rest: Vec<&str> = lines.collect();
        body.prose = rest.join("\n").trim_matches('\n').trim_end().to_string();
        body
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| same_key(k, key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Set `key`, keeping the position of an existing field.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| same_key(k, key)) {
            Some(field) => field.1 = value.to_string(),
            None => self.fields.push((key.to_string(), value.to_string())),
        }
    }

    pub fn set_opt(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(v) => self.set(key, v),
            None => self.remove(key),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.fields.retain(|(k, _)| !same_key(k, key));
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn prose(&self) -> &str {
        &self.prose
    }

    pub fn set_prose(&mut self, prose: &str) {
        self.prose = prose.trim_end().to_string();
    }

    /// Fields not in `known`, in their original order.
    pub fn without(&self, known: &[&str]) -> Body {
        Body {
            fields: self
                .fields
                .iter()
                .filter(|(k, _)| !known.iter().any(|kn| same_key(k, kn)))
                .cloned()
                .collect(),
            prose: self.prose.clone(),
        }
    }

    /// Append `other`'s fields and prose after this body's.
    pub fn extend(&mut self, other: &Body) {
        for (k, v) in &other.fields {
            self.set(k, v);
        }
        if !other.prose.is_empty() {
            if self.prose.is_empty() {
                self.prose = other.prose.clone();
            } else {
                self.prose = format!("{}\n\n{}", self.prose, other.prose);
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.fields {
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push('\n');
        }
        if !self.prose.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.prose);
            out.push('\n');
        }
        out
    }
}
