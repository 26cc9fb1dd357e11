use serde::{Deserialize, Serialize};

use super::model::{PromptId, Session};

/// Share of one label across a whole session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelShare {
    pub label: String,
    pub count: usize,
    /// Percentage of all session samples (2 decimals)
    pub percentage: f64,
}

/// One row of the timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub prompt_id: PromptId,
    pub text: String,
    pub position: usize,
    pub dominant_label: Option<String>,
    pub sample_count: usize,
}

/// Summary across every committed analysis of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimeline {
    pub entries: Vec<TimelineEntry>,

    /// Number of prompts in the session
    pub total_prompts: usize,

    /// Prompts with a committed analysis
    pub prompts_with_analysis: usize,

    /// Samples across all analyses
    pub total_samples: usize,

    /// Label distribution, in first-seen order
    pub distribution: Vec<LabelShare>,

    /// Most frequent label over the whole session
    pub dominant_label: Option<String>,
}

impl SessionTimeline {
    pub fn from_session(session: &Session) -> Self {
        let mut counts: Vec<(String, usize)> = Vec::new();
        let mut total_samples = 0;

        for analysis in session.prompts.iter().filter_map(|p| p.analysis.as_ref()) {
            total_samples += analysis.sample_count;
            for entry in &analysis.label_counts {
                match counts.iter_mut().find(|(label, _)| *label == entry.label) {
                    Some((_, count)) => *count += entry.count,
                    None => counts.push((entry.label.clone(), entry.count)),
                }
            }
        }

        let distribution: Vec<LabelShare> = counts
            .iter()
            .map(|(label, count)| LabelShare {
                label: label.clone(),
                count: *count,
                percentage: if total_samples > 0 {
                    (*count as f64 / total_samples as f64 * 10_000.0).round() / 100.0
                } else {
                    0.0
                },
            })
            .collect();

        let mut dominant: Option<&LabelShare> = None;
        for share in &distribution {
            if dominant.map_or(true, |d| share.count > d.count) {
                dominant = Some(share);
            }
        }

        Self {
            entries: session
                .prompts
                .iter()
                .map(|p| TimelineEntry {
                    prompt_id: p.id,
                    text: p.text.clone(),
                    position: p.position,
                    dominant_label: p.analysis.as_ref().and_then(|a| a.dominant_label.clone()),
                    sample_count: p.analysis.as_ref().map_or(0, |a| a.sample_count),
                })
                .collect(),
            total_prompts: session.prompts.len(),
            prompts_with_analysis: session.prompts.iter().filter(|p| p.analysis.is_some()).count(),
            total_samples,
            dominant_label: dominant.map(|d| d.label.clone()),
            distribution,
        }
    }
}
