/// Maps namespace-relative paths to full store keys and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn apply(
        &self,
        path: &str,
    ) -> String {
        format!("{}{}", self.prefix, path)
    }

    /// Keys outside the namespace come back unchanged.
    pub fn strip<'a>(
        &self,
        key: &'a str,
    ) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }
}
