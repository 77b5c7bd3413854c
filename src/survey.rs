//! Survey variants and tag dispatch

use crate::error::IngestError;
use std::collections::HashSet;

/// Closed set of surveys with their own extraction and correction rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Survey {
    Ztf,
    Atlas,
    Lsst,
    /// Configured surveys with no history and no correction
    Fallback,
}

impl Survey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Survey::Ztf => "ZTF",
            Survey::Atlas => "ATLAS",
            Survey::Lsst => "LSST",
            Survey::Fallback => "Fallback",
        }
    }
}

/// Maps survey tags (`tid`) to [`Survey`] variants
#[derive(Debug, Clone, Default)]
pub struct SurveyDispatch {
    fallback_tags: HashSet<String>,
}

impl SurveyDispatch {
    pub fn new<I, S>(fallback_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fallback_tags: fallback_tags.into_iter().map(Into::into).collect(),
        }
    }

    /// ATLAS publishes per-unit tags (`ATLAS-01a`), matched by substring
    pub fn dispatch(&self, tid: &str) -> Result<Survey, IngestError> {
        let survey = if tid == "ZTF" {
            Survey::Ztf
        } else if tid.contains("ATLAS") {
            Survey::Atlas
        } else if tid == "LSST" {
            Survey::Lsst
        } else if self.fallback_tags.contains(tid) {
            Survey::Fallback
        } else {
            return Err(IngestError::UnsupportedSurvey(tid.to_string()));
        };

        log::debug!("🔀 Dispatched tag {} to {}", tid, survey.as_str());
        Ok(survey)
    }
}
