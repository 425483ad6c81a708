//! Research collaborators: `healthcare_research` and `general_research`.
//!
//! Both produce a structured [`ResearchFinding`] from curated knowledge
//! templates. Output depends only on the arguments, so a run that replays
//! the same calls always sees the same findings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Tool, ToolError};
use crate::util::{contains_any, round3};

/// Knowledge domain of a research pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDomain {
    Healthcare,
    General,
}

impl ResearchDomain {
    pub fn tool_name(self) -> &'static str {
        match self {
            ResearchDomain::Healthcare => "healthcare_research",
            ResearchDomain::General => "general_research",
        }
    }

    pub fn other(self) -> Self {
        match self {
            ResearchDomain::Healthcare => ResearchDomain::General,
            ResearchDomain::General => ResearchDomain::Healthcare,
        }
    }
}

pub const HEALTHCARE_KEYWORDS: &[&str] = &[
    "health",
    "medical",
    "disease",
    "treatment",
    "therapy",
    "drug",
    "medication",
    "diagnosis",
    "symptom",
    "clinical",
    "patient",
    "hospital",
    "doctor",
    "medicine",
];

/// Classify a query into a research domain.
pub fn detect_domain(query: &str) -> ResearchDomain {
    if contains_any(query, HEALTHCARE_KEYWORDS) {
        ResearchDomain::Healthcare
    } else {
        ResearchDomain::General
    }
}

/// Sub-topic of a query, which selects the findings template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Treatment,
    Diagnosis,
    Overview,
}

fn detect_focus(query: &str) -> Focus {
    if contains_any(query, &["treatment", "therapy", "medication", "drug", "cure", "manage"]) {
        Focus::Treatment
    } else if contains_any(query, &["diagnos", "symptom", "disease", "sign", "test", "condition"]) {
        Focus::Diagnosis
    } else {
        Focus::Overview
    }
}

/// Output of one research pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFinding {
    pub tool: String,
    pub domain: ResearchDomain,
    pub query: String,
    pub depth: u8,
    pub findings: Vec<String>,
    pub sources: Vec<String>,
    pub confidence: f64,
}

/// Deterministic research lookup for one domain.
pub struct ResearchTool {
    domain: ResearchDomain,
}

impl ResearchTool {
    pub fn new(domain: ResearchDomain) -> Self {
        Self { domain }
    }

    pub fn research(&self, query: &str, depth: u8) -> ResearchFinding {
        let topic = query.trim().trim_end_matches(&['?', '.', '!'][..]).trim();
        let focus = detect_focus(query);
        let findings = match self.domain {
            ResearchDomain::Healthcare => healthcare_findings(topic, focus, depth),
            ResearchDomain::General => general_findings(topic, focus, depth),
        };
        ResearchFinding {
            tool: self.domain.tool_name().to_string(),
            domain: self.domain,
            query: query.to_string(),
            depth,
            findings,
            sources: sources_for(self.domain, depth),
            confidence: confidence_for(self.domain, query, depth),
        }
    }
}

fn healthcare_findings(topic: &str, focus: Focus, depth: u8) -> Vec<String> {
    let mut findings = match focus {
        Focus::Treatment => vec![
            format!("Evidence-based guidelines describe first-line and second-line options for {}.", topic),
            "Treatment choice depends on severity, comorbidities and patient preference.".to_string(),
            "Randomized trials report the largest benefit when therapy starts early and adherence is monitored.".to_string(),
            "Common adverse effects should be reviewed with a clinician before starting or stopping medication.".to_string(),
        ],
        Focus::Diagnosis => vec![
            format!("Clinical assessment of {} starts with history, examination and symptom pattern.", topic),
            "Laboratory and imaging tests confirm the diagnosis and rule out similar conditions.".to_string(),
            "Early recognition of warning signs shortens time to treatment.".to_string(),
            "Screening recommendations vary by age group and individual risk factors.".to_string(),
        ],
        Focus::Overview => vec![
            format!("Public health agencies publish consumer guidance on {}.", topic),
            "Risk depends on genetics, environment and lifestyle factors.".to_string(),
            "Prevention strategies include vaccination where available, regular check-ups and healthy routines.".to_string(),
        ],
    };
    if depth >= 4 {
        findings.push("Systematic reviews and meta-analyses show consistent effect sizes across populations.".to_string());
        findings.push("Subgroup analyses point to differences by age and sex that guide personalized care.".to_string());
    }
    if depth >= 5 {
        findings.push("Ongoing phase III trials and registry studies are expected to refine current recommendations.".to_string());
    }
    findings
}

fn general_findings(topic: &str, focus: Focus, depth: u8) -> Vec<String> {
    let mut findings = vec![
        format!("Reference works summarize the background and key concepts of {}.", topic),
        "Multiple independent sources agree on the core facts.".to_string(),
    ];
    match focus {
        Focus::Treatment => findings.push("Practical approaches differ in cost, accessibility and long-term outcomes.".to_string()),
        Focus::Diagnosis => findings.push("Identification relies on observable characteristics and standard criteria.".to_string()),
        Focus::Overview => findings.push("Recent developments have broadened public understanding of the subject.".to_string()),
    }
    if depth >= 4 {
        findings.push("Scholarly literature highlights open debates and competing interpretations.".to_string());
    }
    if depth >= 5 {
        findings.push("Historical context shows how consensus formed and where it is still shifting.".to_string());
    }
    findings
}

const HEALTHCARE_SOURCES: [&[&str]; 4] = [
    &["PubMed", "Cochrane Library", "CDC", "WHO"],
    &["FDA", "NIH MedlinePlus"],
    &["New England Journal of Medicine", "The Lancet"],
    &["JAMA", "BMJ"],
];

const GENERAL_SOURCES: [&[&str]; 4] = [
    &["Encyclopaedia Britannica", "Wikipedia", "Our World in Data"],
    &["Google Scholar"],
    &["JSTOR", "Nature"],
    &["Science", "arXiv"],
];

/// Source tiers unlock with depth.
fn sources_for(domain: ResearchDomain, depth: u8) -> Vec<String> {
    let tiers = match domain {
        ResearchDomain::Healthcare => &HEALTHCARE_SOURCES,
        ResearchDomain::General => &GENERAL_SOURCES,
    };
    let unlocked = match depth {
        0..=2 => 1,
        3 => 2,
        4 => 3,
        _ => 4,
    };
    tiers[..unlocked]
        .iter()
        .flat_map(|tier| tier.iter().map(|s| s.to_string()))
        .collect()
}

fn confidence_for(domain: ResearchDomain, query: &str, depth: u8) -> f64 {
    let mut confidence = 0.6 + f64::from(depth) * 0.05;
    if domain == ResearchDomain::Healthcare && detect_domain(query) == ResearchDomain::Healthcare {
        confidence += 0.05;
    }
    if contains_any(query, &["study", "trial", "evidence", "guideline"]) {
        confidence += 0.05;
    }
    round3(confidence.min(0.95))
}

#[async_trait]
impl Tool for ResearchTool {
    fn name(&self) -> &str {
        self.domain.tool_name()
    }

    fn description(&self) -> &str {
        match self.domain {
            ResearchDomain::Healthcare => {
                "Research medical literature and public health guidance for a question."
            }
            ResearchDomain::General => "Research reference works and scholarly sources for a question.",
        }
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The question to research"
                },
                "depth": {
                    "type": "integer",
                    "description": "Research depth from 1 (brief) to 5 (exhaustive). Default: 3"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = args["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'query' argument".to_string()))?;
        let depth = args["depth"].as_u64().unwrap_or(3);
        if !(1..=5).contains(&depth) {
            return Err(ToolError::InvalidArguments(format!(
                "depth must be between 1 and 5, got {}",
                depth
            )));
        }

        let finding = self.research(query, depth as u8);
        serde_json::to_value(finding).map_err(|e| ToolError::Upstream {
            code: 500,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_detection() {
        assert_eq!(detect_domain("Latest diabetes treatment options"), ResearchDomain::Healthcare);
        assert_eq!(detect_domain("History of the printing press"), ResearchDomain::General);
    }

    #[test]
    fn test_depth_expands_findings_and_sources() {
        let tool = ResearchTool::new(ResearchDomain::Healthcare);
        let shallow = tool.research("asthma treatment", 2);
        let deep = tool.research("asthma treatment", 5);

        assert_eq!(shallow.sources.len(), 4);
        assert_eq!(deep.sources.len(), 10);
        assert_eq!(deep.findings.len(), shallow.findings.len() + 3);
        assert!(deep.confidence > shallow.confidence);
        assert!(deep.confidence <= 0.95);
    }

    #[test]
    fn test_findings_follow_focus() {
        let tool = ResearchTool::new(ResearchDomain::Healthcare);
        let finding = tool.research("What are the symptoms of measles?", 3);
        assert!(finding.findings[0].contains("What are the symptoms of measles"));
        assert!(finding.findings[0].starts_with("Clinical assessment"));
    }

    #[tokio::test]
    async fn test_execute_is_deterministic() {
        let tool = ResearchTool::new(ResearchDomain::General);
        let args = json!({"query": "renewable energy storage", "depth": 3});
        let first = tool.execute(args.clone()).await.unwrap();
        let second = tool.execute(args).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["tool"], "general_research");
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_arguments() {
        let tool = ResearchTool::new(ResearchDomain::Healthcare);
        tokio_test::assert_err!(tool.execute(json!({})).await);
        tokio_test::assert_err!(tool.execute(json!({"query": "   "})).await);
        let err = tool
            .execute(json!({"query": "flu", "depth": 9}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
