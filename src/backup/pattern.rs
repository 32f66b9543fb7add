//! Wildcard exclusion matching for fully qualified table names.
//!
//! A pattern is literal text where `*` stands for any run of characters. The
//! match is a substring search: `ks.users` also excludes `x.ks.usersY`.

use crate::backup::result_error::result::Result;
use regex::Regex;

/// Compiled exclude list.
#[derive(Clone, Debug, Default)]
pub struct PatternList {
    patterns: Vec<Regex>,
}

impl PatternList {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| wildcard_to_regex(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, input: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(input))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn wildcard_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&regex::escape(pattern).replace(r"\*", ".*?"))
}

/// One-shot form of [`PatternList::matches`].
pub fn matches<S: AsRef<str>>(input: &str, patterns: &[S]) -> Result<bool> {
    Ok(PatternList::new(patterns)?.matches(input))
}
