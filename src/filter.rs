use glob::Pattern;

use crate::error::FetchError;

#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl NameFilter {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, FetchError> {
        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
        })
    }

    pub fn keeps(&self, name: &str) -> bool {
        let included =
            self.includes.is_empty() || self.includes.iter().any(|pat| pat.matches(name));
        if !included {
            return false;
        }
        !self.excludes.iter().any(|pat| pat.matches(name))
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, FetchError> {
    patterns
        .iter()
        .map(|raw| Pattern::new(raw).map_err(|_| FetchError::InvalidGlob(raw.clone())))
        .collect()
}
