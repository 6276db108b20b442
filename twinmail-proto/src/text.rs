/*!
structured text blocks

This is the one decode used for request bodies, success response payloads,
stored mail envelopes and the messages the federation engine crafts when
talking to peers. The encoding is line based:

```text
token=cafebabe
server=mail.example

[body]
recipient=alice@mail.example
```

- `key=value` lines set a value (first `=` splits, both sides trimmed);
- a `[name]` line opens a named section, the following pairs belong to it;
- a bare non-empty line is an ordered list item of the block;
- blank lines are ignored.

The order of pairs and items is preserved by the encoder so a block can be
re-emitted the way it was authored.
*/

use indexmap::IndexMap;
use std::{
    fmt::{self, Formatter},
    str::FromStr,
};
use thiserror::Error;

/// a parsed structured text block
///
/// see the [module](self) documentation for the encoding rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextBlock {
    values: IndexMap<String, String>,
    items: Vec<String>,
    sections: IndexMap<String, IndexMap<String, String>>,
}

/// error while decoding a [`TextBlock`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TextError {
    #[error("line {0}: unterminated section header")]
    UnterminatedSection(usize),
    #[error("line {0}: empty section name")]
    EmptySection(usize),
    #[error("line {0}: missing key before `=`")]
    EmptyKey(usize),
}

impl TextBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// true if the block holds no values, items nor sections
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.items.is_empty() && self.sections.is_empty()
    }

    /// top level value for the given key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// the pairs of a named section, if the section is present
    pub fn section(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.sections.get(name)
    }

    pub fn set_in_section(
        &mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.sections
            .entry(section.into())
            .or_default()
            .insert(key.into(), value.into());
    }

    /// the ordered bare list items of the block
    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn push_item(&mut self, item: impl Into<String>) {
        self.items.push(item.into());
    }

    /// build a block holding only the given list items
    pub fn from_items<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut block = Self::new();
        for item in items {
            block.push_item(item);
        }
        block
    }

    /// re-emit a section as a standalone flat block
    ///
    /// this is how a posted `[body]` section becomes the archived mail
    /// envelope: the section pairs are promoted to top level values.
    pub fn section_as_block(&self, name: &str) -> Option<TextBlock> {
        let section = self.sections.get(name)?;
        let mut block = TextBlock::new();
        for (key, value) in section {
            block.set(key.clone(), value.clone());
        }
        Some(block)
    }
}

impl fmt::Display for TextBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.values {
            writeln!(f, "{}={}", key, value)?;
        }
        for item in &self.items {
            writeln!(f, "{}", item)?;
        }
        for (name, pairs) in &self.sections {
            writeln!(f, "[{}]", name)?;
            for (key, value) in pairs {
                writeln!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

impl FromStr for TextBlock {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut block = TextBlock::new();
        let mut current: Option<String> = None;

        for (index, line) in s.lines().enumerate() {
            let line = line.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or(TextError::UnterminatedSection(index + 1))?
                    .trim();
                if name.is_empty() {
                    return Err(TextError::EmptySection(index + 1));
                }
                block.sections.entry(name.to_owned()).or_default();
                current = Some(name.to_owned());
            } else if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    return Err(TextError::EmptyKey(index + 1));
                }
                let value = value.trim().to_owned();
                match &current {
                    None => {
                        block.values.insert(key.to_owned(), value);
                    }
                    Some(section) => {
                        block
                            .sections
                            .entry(section.clone())
                            .or_default()
                            .insert(key.to_owned(), value);
                    }
                }
            } else {
                // bare lines are block level list items, wherever they appear
                block.items.push(line.to_owned());
            }
        }

        Ok(block)
    }
}
