//! Path templates used to address resources on either protocol.
//!
//! Templates are plain strings with `{token}` placeholders:
//!
//! - `{parent}`: address of the parent instance on the same protocol
//! - `{key}`: key value of the addressed instance
//! - any other `{name}`: a token supplied by the execution context
//!   (e.g. `{hostname}`, `{serverrelativepath}`)

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::SchemaError;

/// Which template of a resource type to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    /// The resource addressed on its own (e.g. `_api/web`).
    Root,
    /// A single member addressed by key (e.g. `{parent}/lists(guid'{key}')`).
    ByKey,
    /// The collection of all instances (e.g. `{parent}/lists`).
    Collection,
}

impl Display for PathKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PathKind::Root => f.write_str("root"),
            PathKind::ByKey => f.write_str("key lookup"),
            PathKind::Collection => f.write_str("collection"),
        }
    }
}

/// Values available while rendering a template.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathVars<'a> {
    pub parent: Option<&'a str>,
    pub key: Option<&'a str>,
    pub tokens: Option<&'a BTreeMap<String, String>>,
}

impl<'a> PathVars<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(mut self, parent: &'a str) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn key(mut self, key: &'a str) -> Self {
        self.key = Some(key);
        self
    }

    pub fn tokens(mut self, tokens: &'a BTreeMap<String, String>) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathTemplate(String);

impl PathTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Names of every placeholder in the template, in order.
    pub fn tokens(&self) -> Result<Vec<&str>, SchemaError> {
        let mut found = Vec::new();
        let mut rest = self.0.as_str();
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or_else(|| SchemaError::MalformedTemplate(self.0.clone()))?;
            found.push(&after[..end]);
            rest = &after[end + 1..];
        }
        Ok(found)
    }

    /// Substitute every placeholder.
    pub fn render(&self, vars: PathVars<'_>) -> Result<String, SchemaError> {
        let mut out = String::with_capacity(self.0.len() + 32);
        let mut rest = self.0.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or_else(|| SchemaError::MalformedTemplate(self.0.clone()))?;
            let token = &after[..end];

            let value = match token {
                "parent" => vars.parent.map(|p| p.trim_end_matches('/')),
                "key" => vars.key,
                other => vars
                    .tokens
                    .and_then(|t| t.get(other))
                    .map(|s| s.as_str()),
            };
            let value = value.ok_or_else(|| SchemaError::MissingToken {
                template: self.0.clone(),
                token: token.to_string(),
            })?;

            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

impl Display for PathTemplate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PathTemplate {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PathTemplate {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_parent_and_key() {
        let template = PathTemplate::new("{parent}/lists(guid'{key}')");
        let rendered = template
            .render(PathVars::new().parent("_api/web/").key("abc"))
            .unwrap();
        assert_eq!(rendered, "_api/web/lists(guid'abc')");
    }

    #[test]
    fn test_render_context_tokens() {
        let mut tokens = BTreeMap::new();
        tokens.insert("hostname".to_string(), "contoso.sharepoint.com".to_string());
        tokens.insert("serverrelativepath".to_string(), "/sites/dev".to_string());

        let template = PathTemplate::new("sites/{hostname}:{serverrelativepath}");
        let rendered = template.render(PathVars::new().tokens(&tokens)).unwrap();
        assert_eq!(rendered, "sites/contoso.sharepoint.com:/sites/dev");
    }

    #[test]
    fn test_missing_token_is_reported() {
        let template = PathTemplate::new("teams/{groupId}");
        let err = template.render(PathVars::new()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingToken {
                template: "teams/{groupId}".to_string(),
                token: "groupId".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_template() {
        let template = PathTemplate::new("sites/{hostname");
        assert!(matches!(
            template.render(PathVars::new()),
            Err(SchemaError::MalformedTemplate(_))
        ));
        assert!(template.tokens().is_err());
    }
}
