//! Synthesis collaborator: turns research findings and search hits into one
//! markdown answer with insights, recommendations and a confidence score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::research::{ResearchDomain, ResearchFinding};
use super::web::{SearchHit, SourceType};
use super::{Tool, ToolError};
use crate::util::{round3, truncate_chars};

const MAX_INSIGHTS: usize = 5;
const MAX_RECOMMENDATIONS: usize = 5;

/// How the answer is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    Healthcare,
    General,
    Comparative,
    Analytical,
}

impl SynthesisStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthcare => "healthcare",
            Self::General => "general",
            Self::Comparative => "comparative",
            Self::Analytical => "analytical",
        }
    }

    /// Resolve a configured synthesis type against the material at hand.
    ///
    /// `auto` picks healthcare when any finding is medical, comparative with
    /// four or more sources, analytical when summed research confidence
    /// reaches 2.0, and general otherwise.
    pub fn resolve(requested: &str, research: &[ResearchFinding], search: &[SearchHit]) -> Self {
        match requested {
            "healthcare" => return Self::Healthcare,
            "general" => return Self::General,
            "comparative" => return Self::Comparative,
            "analytical" => return Self::Analytical,
            _ => {}
        }
        let total_confidence: f64 = research.iter().map(|r| r.confidence).sum();
        if research.iter().any(|r| r.domain == ResearchDomain::Healthcare) {
            Self::Healthcare
        } else if research.len() + search.len() >= 4 {
            Self::Comparative
        } else if total_confidence >= 2.0 {
            Self::Analytical
        } else {
            Self::General
        }
    }
}

/// Arguments of the `synthesize` tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub query: String,
    #[serde(default = "default_synthesis_type")]
    pub synthesis_type: String,
    #[serde(default)]
    pub research_results: Vec<ResearchFinding>,
    #[serde(default)]
    pub search_results: Vec<SearchHit>,
}

fn default_synthesis_type() -> String {
    "auto".to_string()
}

/// Output of the `synthesize` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub strategy: Option<SynthesisStrategy>,
    pub content: String,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub sources_analyzed: usize,
}

/// Build the report. Pure function of the request.
pub fn synthesize(request: &SynthesisRequest) -> SynthesisReport {
    let research = &request.research_results;
    let search = &request.search_results;
    let sources_analyzed = research.len() + search.len();

    if sources_analyzed == 0 {
        return SynthesisReport {
            strategy: None,
            content: format!(
                "No information sources were available to synthesize a response to: {}",
                request.query
            ),
            key_insights: Vec::new(),
            recommendations: vec![
                "Try rephrasing the question or enabling web search for broader coverage.".to_string(),
            ],
            confidence: 0.0,
            sources_analyzed: 0,
        };
    }

    let strategy = SynthesisStrategy::resolve(&request.synthesis_type, research, search);
    let content = match strategy {
        SynthesisStrategy::Healthcare => render_healthcare(&request.query, research, search),
        SynthesisStrategy::General => render_general(&request.query, research, search),
        SynthesisStrategy::Comparative => render_comparative(&request.query, research, search),
        SynthesisStrategy::Analytical => render_analytical(&request.query, research, search),
    };
    let confidence = score_confidence(research, search, &content);

    SynthesisReport {
        strategy: Some(strategy),
        key_insights: key_insights(research, search),
        recommendations: recommendations(strategy, research, search),
        confidence,
        sources_analyzed,
        content,
    }
}

fn push_findings(out: &mut String, research: &[ResearchFinding]) {
    for finding in research.iter().flat_map(|r| r.findings.iter()) {
        out.push_str(&format!("- {}\n", finding));
    }
}

fn push_hits(out: &mut String, search: &[SearchHit], limit: usize) {
    for hit in search.iter().take(limit) {
        if hit.snippet.is_empty() {
            out.push_str(&format!("- [{}]({})\n", hit.title, hit.url));
        } else {
            out.push_str(&format!(
                "- [{}]({}): {}\n",
                hit.title,
                hit.url,
                truncate_chars(&hit.snippet, 200)
            ));
        }
    }
}

fn render_healthcare(query: &str, research: &[ResearchFinding], search: &[SearchHit]) -> String {
    let mut out = format!("# Health Information: {}\n\n", query);
    out.push_str("## Summary\n\n");
    out.push_str(&format!(
        "This answer combines {} research finding(s) and {} web source(s).\n\n",
        research.len(),
        search.len()
    ));
    if !research.is_empty() {
        out.push_str("## Evidence from Medical Research\n\n");
        push_findings(&mut out, research);
        out.push('\n');
    }
    let medical: Vec<SearchHit> = search
        .iter()
        .filter(|h| h.source_type == SourceType::Medical)
        .cloned()
        .collect();
    let listed = if medical.is_empty() { search } else { &medical[..] };
    if !listed.is_empty() {
        out.push_str("## Authoritative Sources\n\n");
        push_hits(&mut out, listed, 5);
        out.push('\n');
    }
    out.push_str("## Important Medical Disclaimer\n\n");
    out.push_str(
        "This information is for educational purposes only and is not a substitute for \
         professional medical advice, diagnosis, or treatment.\n",
    );
    out
}

fn render_general(query: &str, research: &[ResearchFinding], search: &[SearchHit]) -> String {
    let mut out = format!("# {}\n\n## Overview\n\n", query);
    if let Some(first) = research.iter().flat_map(|r| r.findings.first()).next() {
        out.push_str(first);
        out.push_str("\n\n");
    }
    if !research.is_empty() {
        out.push_str("## Key Findings\n\n");
        push_findings(&mut out, research);
        out.push('\n');
    }
    if !search.is_empty() {
        out.push_str("## Further Reading\n\n");
        push_hits(&mut out, search, 5);
    }
    out
}

fn render_comparative(query: &str, research: &[ResearchFinding], search: &[SearchHit]) -> String {
    let mut out = format!("# {}: Perspectives Compared\n\n", query);
    for domain in [ResearchDomain::Healthcare, ResearchDomain::General] {
        let group: Vec<ResearchFinding> = research
            .iter()
            .filter(|r| r.domain == domain)
            .cloned()
            .collect();
        if group.is_empty() {
            continue;
        }
        let heading = match domain {
            ResearchDomain::Healthcare => "Medical research",
            ResearchDomain::General => "General research",
        };
        out.push_str(&format!("## {}\n\n", heading));
        push_findings(&mut out, &group);
        out.push('\n');
    }
    for (source_type, heading) in [
        (SourceType::Medical, "Medical sources"),
        (SourceType::Academic, "Academic sources"),
        (SourceType::News, "News coverage"),
        (SourceType::General, "General sources"),
    ] {
        let group: Vec<SearchHit> = search
            .iter()
            .filter(|h| h.source_type == source_type)
            .cloned()
            .collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("## {}\n\n", heading));
        push_hits(&mut out, &group, 3);
        out.push('\n');
    }
    out
}

fn render_analytical(query: &str, research: &[ResearchFinding], search: &[SearchHit]) -> String {
    let mut out = format!("# Analysis: {}\n\n## Evidence Strength\n\n", query);
    for finding in research {
        out.push_str(&format!(
            "- {} (depth {}): confidence {:.2}, {} source(s)\n",
            finding.tool,
            finding.depth,
            finding.confidence,
            finding.sources.len()
        ));
    }
    out.push_str("\n## Findings\n\n");
    push_findings(&mut out, research);
    if !search.is_empty() {
        out.push_str("\n## Corroborating Sources\n\n");
        push_hits(&mut out, search, 5);
    }
    out
}

fn key_insights(research: &[ResearchFinding], search: &[SearchHit]) -> Vec<String> {
    let mut insights: Vec<String> = Vec::new();
    let candidates = research
        .iter()
        .flat_map(|r| r.findings.iter().cloned())
        .chain(
            search
                .iter()
                .filter(|h| !h.snippet.is_empty())
                .map(|h| truncate_chars(&h.snippet, 160)),
        );
    for candidate in candidates {
        if insights.len() == MAX_INSIGHTS {
            break;
        }
        if !insights.contains(&candidate) {
            insights.push(candidate);
        }
    }
    insights
}

fn recommendations(
    strategy: SynthesisStrategy,
    research: &[ResearchFinding],
    search: &[SearchHit],
) -> Vec<String> {
    let mut recs: Vec<String> = match strategy {
        SynthesisStrategy::Healthcare => vec![
            "Consult a qualified healthcare provider before making treatment decisions.".to_string(),
            "Check guidance from authoritative bodies such as the CDC, WHO or NIH.".to_string(),
            "Discuss risks, benefits and alternatives with your care team.".to_string(),
        ],
        SynthesisStrategy::Comparative => vec![
            "Weigh the perspectives above against your own priorities.".to_string(),
            "Prefer sources that cite primary evidence when they disagree.".to_string(),
        ],
        SynthesisStrategy::Analytical => vec![
            "Give more weight to findings with higher evidence strength.".to_string(),
            "Revisit the question as new studies are published.".to_string(),
        ],
        SynthesisStrategy::General => vec![
            "Cross-check key facts with more than one reference source.".to_string(),
        ],
    };
    if search.iter().any(|h| h.source_type == SourceType::News) {
        recs.push("Follow recent news coverage for developments after this summary.".to_string());
    }
    if research.iter().any(|r| r.depth >= 4) {
        recs.push("Review the cited systematic reviews for detailed outcomes.".to_string());
    }
    if search.is_empty() {
        recs.push("Enable web search to include current sources.".to_string());
    }
    recs.truncate(MAX_RECOMMENDATIONS);
    recs
}

/// Research 0.4, relevance 0.3, source count up to 0.2, content quality 0.1.
fn score_confidence(research: &[ResearchFinding], search: &[SearchHit], content: &str) -> f64 {
    let mean = |values: Vec<f64>| {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    };
    let research_conf = mean(research.iter().map(|r| r.confidence).collect());
    let relevance = mean(search.iter().map(|h| h.relevance).collect());
    let coverage = ((research.len() + search.len()) as f64 * 0.02).min(0.2);
    let quality = (content.chars().count() as f64 / 2000.0).min(1.0);

    let score = research_conf * 0.4 + relevance * 0.3 + coverage + quality * 0.1;
    round3(score.min(0.95))
}

/// The `synthesize` tool.
pub struct Synthesize;

#[async_trait]
impl Tool for Synthesize {
    fn name(&self) -> &str {
        "synthesize"
    }

    fn description(&self) -> &str {
        "Combine research findings and web search results into a single answer."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "synthesis_type": {
                    "type": "string",
                    "enum": ["auto", "healthcare", "general", "comparative", "analytical"]
                },
                "research_results": {"type": "array"},
                "search_results": {"type": "array"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let request: SynthesisRequest = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if request.query.trim().is_empty() {
            return Err(ToolError::InvalidArguments("missing 'query' argument".to_string()));
        }
        let report = synthesize(&request);
        serde_json::to_value(report).map_err(|e| ToolError::Upstream {
            code: 500,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::research::ResearchTool;

    fn hit(url: &str, source_type: SourceType, relevance: f64) -> SearchHit {
        SearchHit {
            query: "q".to_string(),
            title: format!("Title for {}", url),
            url: url.to_string(),
            snippet: format!("Snippet from {}", url),
            relevance,
            source_type,
        }
    }

    #[test]
    fn test_empty_sources_yield_zero_confidence() {
        let report = synthesize(&SynthesisRequest {
            query: "anything".to_string(),
            ..Default::default()
        });
        assert_eq!(report.confidence, 0.0);
        assert_eq!(report.strategy, None);
        assert!(report.content.contains("No information sources"));
    }

    #[test]
    fn test_auto_strategy_resolution() {
        let medical = ResearchTool::new(ResearchDomain::Healthcare).research("flu treatment", 3);
        let general = ResearchTool::new(ResearchDomain::General).research("jazz", 3);
        let hits = vec![
            hit("https://a.com", SourceType::General, 0.5),
            hit("https://b.com", SourceType::General, 0.5),
            hit("https://c.com", SourceType::General, 0.5),
        ];

        assert_eq!(
            SynthesisStrategy::resolve("auto", &[medical], &[]),
            SynthesisStrategy::Healthcare
        );
        assert_eq!(
            SynthesisStrategy::resolve("auto", &[general.clone()], &hits),
            SynthesisStrategy::Comparative
        );
        assert_eq!(
            SynthesisStrategy::resolve("auto", &[general.clone()], &[]),
            SynthesisStrategy::General
        );
        let confident = ResearchFinding {
            confidence: 0.95,
            ..general.clone()
        };
        assert_eq!(
            SynthesisStrategy::resolve("auto", &[confident.clone(), confident.clone(), confident], &[]),
            SynthesisStrategy::Analytical
        );
        assert_eq!(
            SynthesisStrategy::resolve("analytical", &[general], &[]),
            SynthesisStrategy::Analytical
        );
    }

    #[test]
    fn test_healthcare_report_has_disclaimer_and_bounds() {
        let research = vec![ResearchTool::new(ResearchDomain::Healthcare).research("migraine treatment", 4)];
        let search = vec![
            hit("https://www.cdc.gov/m", SourceType::Medical, 0.9),
            hit("https://news.example.com", SourceType::News, 0.6),
        ];
        let report = synthesize(&SynthesisRequest {
            query: "migraine treatment".to_string(),
            synthesis_type: "auto".to_string(),
            research_results: research,
            search_results: search,
        });

        assert_eq!(report.strategy, Some(SynthesisStrategy::Healthcare));
        assert!(report.content.contains("Medical Disclaimer"));
        assert!(report.content.contains("https://www.cdc.gov/m"));
        assert!(!report.content.contains("news.example.com"));
        assert_eq!(report.sources_analyzed, 3);
        assert!(report.key_insights.len() <= MAX_INSIGHTS);
        assert!(report.recommendations.len() <= MAX_RECOMMENDATIONS);
        assert!(report.confidence > 0.0 && report.confidence <= 0.95);
    }

    #[tokio::test]
    async fn test_execute_rejects_malformed_results() {
        let err = Synthesize
            .execute(json!({"query": "x", "research_results": "not a list"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
