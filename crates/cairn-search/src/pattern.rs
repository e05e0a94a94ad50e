use crate::{SearchError, Submatch};
use regex::{Regex, RegexBuilder};

/// A compiled search pattern applied one line at a time.
#[derive(Clone, Debug)]
pub(crate) struct LinePattern {
    regex: Regex,
}

impl LinePattern {
    pub(crate) fn compile(
        pattern: &str,
        literal: bool,
        case_sensitive: bool,
    ) -> Result<Self, SearchError> {
        if pattern.is_empty() {
            return Err(SearchError::InvalidPattern("empty pattern".to_owned()));
        }
        let source = if literal {
            regex::escape(pattern)
        } else {
            pattern.to_owned()
        };
        let regex = RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|err| SearchError::InvalidPattern(err.to_string()))?;
        Ok(Self { regex })
    }

    /// Non-empty matches in `line`, left to right. Byte offsets.
    pub(crate) fn submatches(&self, line: &str) -> Vec<Submatch> {
        self.regex
            .find_iter(line)
            .filter(|m| !m.is_empty())
            .map(|m| Submatch {
                start: m.start(),
                end: m.end(),
                text: m.as_str().to_owned(),
            })
            .collect()
    }
}
