//! Selector descriptors: which fields and relations a caller wants.
//!
//! ```
//! use sitegraph_orm::selector::{expand_with, field, Selector};
//!
//! let built = vec![
//!     field("Title"),
//!     expand_with("Lists", [field("Id"), field("Title")]),
//! ];
//! let parsed = Selector::parse("Title, Lists(Id, Title)").unwrap();
//! assert_eq!(built, parsed);
//! ```

use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::{OrmError, OrmResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Field(String),
    /// A relation with nested selectors. An empty `include` means the target's
    /// default field set.
    Relation { name: String, include: Vec<Selector> },
}

pub fn field(name: impl Into<String>) -> Selector {
    Selector::Field(name.into())
}

/// Relation with its default field set.
pub fn expand(name: impl Into<String>) -> Selector {
    Selector::Relation {
        name: name.into(),
        include: Vec::new(),
    }
}

pub fn expand_with(name: impl Into<String>, include: impl IntoIterator<Item = Selector>) -> Selector {
    Selector::Relation {
        name: name.into(),
        include: include.into_iter().collect(),
    }
}

impl Selector {
    pub fn name(&self) -> &str {
        match self {
            Selector::Field(name) | Selector::Relation { name, .. } => name,
        }
    }

    /// Parse the text form `Title, Lists(Id, Title, ContentTypes(Name))`.
    pub fn parse(text: &str) -> OrmResult<Vec<Selector>> {
        let mut parser = Parser {
            input: text,
            chars: text.char_indices().collect(),
            pos: 0,
        };
        parser.skip_whitespace();
        if parser.at_end() {
            return Ok(Vec::new());
        }
        let selectors = parser.list()?;
        parser.skip_whitespace();
        if !parser.at_end() {
            return Err(parser.error("unexpected input"));
        }
        Ok(selectors)
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Field(name) => f.write_str(name),
            Selector::Relation { name, include } if include.is_empty() => write!(f, "{}()", name),
            Selector::Relation { name, include } => {
                write!(f, "{}({})", name, include.iter().join(", "))
            }
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, message: &str) -> OrmError {
        OrmError::usage(format!(
            "malformed selector `{}` at position {}: {}",
            self.input, self.pos, message
        ))
    }

    fn list(&mut self) -> OrmResult<Vec<Selector>> {
        let mut selectors = vec![self.item()?];
        loop {
            self.skip_whitespace();
            if self.peek() != Some(',') {
                return Ok(selectors);
            }
            self.pos += 1;
            selectors.push(self.item()?);
        }
    }

    fn item(&mut self) -> OrmResult<Selector> {
        self.skip_whitespace();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a field name"));
        }
        let name: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();

        self.skip_whitespace();
        if self.peek() != Some('(') {
            return Ok(Selector::Field(name));
        }
        self.pos += 1;
        self.skip_whitespace();

        let include = if self.peek() == Some(')') {
            Vec::new()
        } else {
            self.list()?
        };

        self.skip_whitespace();
        if self.peek() != Some(')') {
            return Err(self.error("expected `)`"));
        }
        self.pos += 1;
        Ok(Selector::Relation { name, include })
    }
}
