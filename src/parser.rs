//! Extraction of addressed utterances from raw generator output.
//!
//! Participants are announced by a role delimiter built from a template such
//! as `"[{name}] "`. A continuation is split at every delimiter, fragments
//! without a delimiter are dropped, and the first remaining fragment becomes
//! the next turn.
//!
//! The image placeholder may look like a delimiter (`"[image] "` matches
//! `\[\w+\] `). Any delimiter match that begins with the placeholder is
//! skipped, both when splitting and when stripping delimiters from the
//! display text.

use std::ops::Range;

use regex::Regex;

use crate::{mlog_debug, Error, Result};

const PLACEHOLDERS: [&str; 4] = ["{name}", "{role}", "{NAME}", "{ROLE}"];

/// Role delimiter template split around its participant placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleFormat {
    prefix: String,
    suffix: String,
}

impl RoleFormat {
    /// Parse a template containing exactly one `{name}` (or `{role}`) placeholder.
    pub fn parse(template: &str) -> Result<Self> {
        let found: Vec<(usize, &str)> = PLACEHOLDERS
            .iter()
            .flat_map(|p| template.match_indices(p))
            .collect();

        match found.as_slice() {
            [(index, placeholder)] => Ok(Self {
                prefix: template[..*index].to_string(),
                suffix: template[index + placeholder.len()..].to_string(),
            }),
            [] => Err(Error::Config(format!(
                "role format {:?} has no {{name}} placeholder",
                template
            ))),
            _ => Err(Error::Config(format!(
                "role format {:?} has more than one placeholder",
                template
            ))),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Announce `name` the way generated text does.
    pub fn render(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, name.to_uppercase(), self.suffix)
    }
}

/// One addressed utterance taken from a continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Case-folded participant identifier.
    pub sender: String,
    /// Display text with every delimiter removed and outer whitespace trimmed.
    pub text: String,
    /// The fragment as generated, used to seed the next generation.
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct ResponseParser {
    format: RoleFormat,
    delimiter: Regex,
    sender: Regex,
    repeated_spaces: Regex,
    image_token: String,
    participants: Vec<String>,
}

impl ResponseParser {
    pub fn new(format: RoleFormat, image_token: &str, participants: &[String]) -> Result<Self> {
        let prefix = regex::escape(&format.prefix);
        let suffix = regex::escape(&format.suffix);
        let delimiter = Regex::new(&format!(r"{prefix}\w+{suffix}"))?;
        let sender = Regex::new(&format!(r"{prefix}(?P<sender>\w+){suffix}"))?;

        Ok(Self {
            format,
            delimiter,
            sender,
            repeated_spaces: Regex::new(r" {2,}")?,
            image_token: image_token.to_string(),
            participants: participants.iter().map(|p| p.to_lowercase()).collect(),
        })
    }

    pub fn format(&self) -> &RoleFormat {
        &self.format
    }

    pub fn image_token(&self) -> &str {
        &self.image_token
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    fn image_token_at(&self, text: &str, index: usize) -> bool {
        !self.image_token.is_empty() && text[index..].starts_with(&self.image_token)
    }

    /// Byte ranges of every delimiter in `text` that is not the image placeholder.
    pub fn delimiters(&self, text: &str) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut pos = 0;
        while pos <= text.len() {
            let Some(m) = self.delimiter.find_at(text, pos) else {
                break;
            };
            if self.image_token_at(text, m.start()) {
                // Resume one character later so a real delimiter inside the
                // skipped match is still found.
                pos = m.start()
                    + text[m.start()..]
                        .chars()
                        .next()
                        .map(char::len_utf8)
                        .unwrap_or(1);
                continue;
            }
            ranges.push(m.range());
            pos = m.end();
        }
        ranges
    }

    /// Split a continuation into fragments that each carry a delimiter.
    ///
    /// Fragments are trimmed of spaces but keep their newlines.
    pub fn split<'a>(&self, raw: &'a str) -> Vec<&'a str> {
        let mut bounds: Vec<usize> = vec![0];
        bounds.extend(
            self.delimiters(raw)
                .into_iter()
                .map(|r| r.start)
                .filter(|&start| start != 0),
        );
        bounds.push(raw.len());

        bounds
            .windows(2)
            .map(|w| &raw[w[0]..w[1]])
            .filter(|fragment| !self.delimiters(fragment).is_empty())
            .map(|fragment| fragment.trim_matches(' '))
            .collect()
    }

    /// Parse one fragment. Unknown participants make the fragment invalid.
    pub fn parse_fragment(&self, fragment: &str) -> Option<Utterance> {
        let first = self.delimiters(fragment).into_iter().next()?;
        let captures = self.sender.captures_at(fragment, first.start)?;
        if captures.get(0)?.start() != first.start {
            return None;
        }
        let sender = captures.name("sender")?.as_str().to_lowercase();

        if !self.participants.contains(&sender) {
            mlog_debug!("parser: rejecting unknown sender {:?}", sender);
            return None;
        }

        Some(Utterance {
            sender,
            text: self.strip_delimiters(fragment).trim().to_string(),
            raw: fragment.to_string(),
        })
    }

    /// The first addressed utterance in `raw`, if it is valid.
    pub fn first_utterance(&self, raw: &str) -> Option<Utterance> {
        let fragment = self.split(raw).into_iter().next()?;
        self.parse_fragment(fragment)
    }

    /// Remove every delimiter, leaving image placeholders in place.
    pub fn strip_delimiters(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for range in self.delimiters(text) {
            out.push_str(&text[last..range.start]);
            last = range.end;
        }
        out.push_str(&text[last..]);
        out
    }

    pub fn contains_image(&self, text: &str) -> bool {
        !self.image_token.is_empty() && text.contains(&self.image_token)
    }

    /// Remove the image placeholder and collapse the doubled spaces it leaves.
    pub fn strip_image(&self, text: &str) -> String {
        let without = text.replace(&self.image_token, "");
        self.repeated_spaces
            .replace_all(&without, " ")
            .trim()
            .to_string()
    }
}
