//! Splits an analysis narrative into its three numbered sections.
//!
//! Headings are matched case-sensitively against fixed phrase sets. Each section
//! runs from the line after its heading up to the next section's heading phrase,
//! or to the end of the text. The first fenced block inside a section is decoded
//! as JSON when possible; its shape is not checked against the section.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::tasks::utils::fenced_block;

const BLOOD_ANALYSIS_PHRASES: &str = r"1\.\s*(?:Abnormal Blood Test Values|Blood Test Analysis|Blood Test Analysis using BloodTestAnalyzer Tool)";
const HEALTH_ISSUES_PHRASES: &str =
    r"2\.\s*(?:Potential Health Issues|Health Issue Identification using HealthIssueIdentifier Tool)";
const LIFESTYLE_PHRASES: &str =
    r"3\.\s*(?:Lifestyle Recommendations|Lifestyle Recommendations using LifestyleAdvisor Tool)";

struct SectionPattern {
    /// Heading phrase through the end of its line
    heading: Regex,
    /// Heading phrase of the following section, which ends this one
    next_heading: Option<Regex>,
}

impl SectionPattern {
    fn new(phrases: &str, next_phrases: Option<&str>) -> Self {
        Self {
            heading: Regex::new(&format!(r"(?s){phrases}.*?\n")).expect("heading pattern is valid"),
            next_heading: next_phrases
                .map(|p| Regex::new(p).expect("next heading pattern is valid")),
        }
    }

    fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        let heading = self.heading.find(text)?;
        let rest = &text[heading.end()..];
        let end = self
            .next_heading
            .as_ref()
            .and_then(|re| re.find(rest))
            .map_or(rest.len(), |m| m.start());
        Some(rest[..end].trim())
    }
}

static BLOOD_ANALYSIS: LazyLock<SectionPattern> =
    LazyLock::new(|| SectionPattern::new(BLOOD_ANALYSIS_PHRASES, Some(HEALTH_ISSUES_PHRASES)));
static HEALTH_ISSUES: LazyLock<SectionPattern> =
    LazyLock::new(|| SectionPattern::new(HEALTH_ISSUES_PHRASES, Some(LIFESTYLE_PHRASES)));
static LIFESTYLE: LazyLock<SectionPattern> =
    LazyLock::new(|| SectionPattern::new(LIFESTYLE_PHRASES, None));

/// Sections found in a narrative. Absent sections serialize as absent keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSections {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_analysis_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_issues: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_issues_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifestyle_recommendations: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifestyle_recommendations_json: Option<Value>,
}

impl ReportSections {
    pub fn is_empty(&self) -> bool {
        self.blood_analysis.is_none()
            && self.health_issues.is_none()
            && self.lifestyle_recommendations.is_none()
    }
}

fn embedded_json(section: &str) -> Option<Value> {
    fenced_block(section).and_then(|block| serde_json::from_str(block).ok())
}

fn text_and_json(pattern: &SectionPattern, response: &str) -> (Option<String>, Option<Value>) {
    match pattern.find(response) {
        Some(section) => (Some(section.to_string()), embedded_json(section)),
        None => (None, None),
    }
}

/// Extract the three sections, and their embedded JSON, from an agent response
pub fn extract_sections(response: &str) -> ReportSections {
    let (blood_analysis, blood_analysis_json) = text_and_json(&BLOOD_ANALYSIS, response);
    let (health_issues, health_issues_json) = text_and_json(&HEALTH_ISSUES, response);
    let (lifestyle_recommendations, lifestyle_recommendations_json) =
        text_and_json(&LIFESTYLE, response);

    ReportSections {
        blood_analysis,
        blood_analysis_json,
        health_issues,
        health_issues_json,
        lifestyle_recommendations,
        lifestyle_recommendations_json,
    }
}
