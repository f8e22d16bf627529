//! Profile Evolution Timeline: version-ordered view of a candidate's profiles.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::profile::CandidateProfileRow;
use crate::profiles::compare::{compare_readings, ScoreComparison};
use crate::profiles::score::{read_optional_score, ScoreReading};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub profile_id: Uuid,
    pub version: i32,
    pub stage: String,
    pub stage_label: String,
    pub created_at: DateTime<Utc>,
    pub overall_score: f64,
    /// `None` for the first version.
    pub previous_score: Option<f64>,
    pub score_delta: Option<ScoreComparison>,
    pub is_latest: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionSummary {
    pub version_count: usize,
    pub first_version: i32,
    pub latest_version: i32,
    /// First version's score compared against the latest one.
    pub overall: ScoreComparison,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Timeline {
    /// The candidate has no profiles yet.
    Empty,
    Ready {
        entries: Vec<TimelineEntry>,
        summary: EvolutionSummary,
    },
}

impl Timeline {
    pub fn entries(&self) -> &[TimelineEntry] {
        match self {
            Timeline::Empty => &[],
            Timeline::Ready { entries, .. } => entries,
        }
    }
}

/// Orders profiles by version and computes per-step score deltas.
///
/// Ordering is by `version` only; `created_at` and `stage` are not reliable
/// ordering keys.
pub fn build_timeline(mut profiles: Vec<CandidateProfileRow>) -> Timeline {
    if profiles.is_empty() {
        return Timeline::Empty;
    }
    profiles.sort_by_key(|p| p.version);

    let last_idx = profiles.len() - 1;
    let mut entries = Vec::with_capacity(profiles.len());
    let mut previous: Option<ScoreReading> = None;
    let mut first_reading = ScoreReading::default();

    for (idx, profile) in profiles.into_iter().enumerate() {
        let reading = read_optional_score(profile.overall_score);
        if idx == 0 {
            first_reading = reading;
        }
        entries.push(TimelineEntry {
            profile_id: profile.id,
            version: profile.version,
            stage_label: stage_label(&profile.stage),
            stage: profile.stage,
            created_at: profile.created_at,
            overall_score: reading.value,
            previous_score: previous.map(|prev| prev.value),
            score_delta: previous.map(|prev| compare_readings(prev, reading)),
            is_latest: idx == last_idx,
        });
        previous = Some(reading);
    }

    let first = &entries[0];
    let latest = &entries[last_idx];
    let summary = EvolutionSummary {
        version_count: entries.len(),
        first_version: first.version,
        latest_version: latest.version,
        overall: compare_readings(first_reading, previous.unwrap_or_default()),
    };

    Timeline::Ready { entries, summary }
}

/// Display label for a free-form stage value. Presentation only.
pub fn stage_label(stage: &str) -> String {
    if let Some(n) = stage.strip_prefix("after_interview_") {
        if let Ok(n) = n.parse::<u32>() {
            return format!("After interview {n}");
        }
    }
    let words: Vec<String> = stage
        .split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    let label = words.join(" ");
    let mut chars = label.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Selection state over a timeline's sorted entries.
///
/// Mirrors keyboard navigation: up/down move one position in version order
/// and saturate at the ends; activation hands the selected entry to a callback.
#[derive(Debug, Clone, Default)]
pub struct TimelineSelection {
    selected: Option<usize>,
}

impl TimelineSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected<'a>(&self, timeline: &'a Timeline) -> Option<&'a TimelineEntry> {
        self.selected.and_then(|i| timeline.entries().get(i))
    }

    /// Selects by profile id. Returns false (and keeps the old selection) if absent.
    pub fn select(&mut self, timeline: &Timeline, profile_id: Uuid) -> bool {
        match timeline
            .entries()
            .iter()
            .position(|e| e.profile_id == profile_id)
        {
            Some(idx) => {
                self.selected = Some(idx);
                true
            }
            None => false,
        }
    }

    /// Moves toward older versions. With nothing selected, picks the latest.
    pub fn move_up<'a>(&mut self, timeline: &'a Timeline) -> Option<&'a TimelineEntry> {
        let len = timeline.entries().len();
        if len == 0 {
            return None;
        }
        self.selected = Some(match self.selected {
            Some(i) => i.saturating_sub(1),
            None => len - 1,
        });
        self.selected(timeline)
    }

    /// Moves toward newer versions. With nothing selected, picks the first.
    pub fn move_down<'a>(&mut self, timeline: &'a Timeline) -> Option<&'a TimelineEntry> {
        let len = timeline.entries().len();
        if len == 0 {
            return None;
        }
        self.selected = Some(match self.selected {
            Some(i) => (i + 1).min(len - 1),
            None => 0,
        });
        self.selected(timeline)
    }

    /// Invokes `on_select` with the current entry, if any.
    pub fn activate<F>(&self, timeline: &Timeline, on_select: F) -> bool
    where
        F: FnOnce(&TimelineEntry),
    {
        match self.selected(timeline) {
            Some(entry) => {
                on_select(entry);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::compare::Trend;
    use serde_json::json;

    fn profile(version: i32, score: Option<f64>, stage: &str) -> CandidateProfileRow {
        CandidateProfileRow {
            id: Uuid::new_v4(),
            candidate_id: Uuid::nil(),
            job_id: None,
            version,
            stage: stage.to_string(),
            profile_data: json!({}),
            overall_score: score,
            data_sources: None,
            gaps: None,
            strengths: None,
            concerns: None,
            ai_summary: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample() -> Timeline {
        build_timeline(vec![
            profile(3, Some(80.0), "after_interview_2"),
            profile(1, Some(60.0), "resume"),
            profile(2, Some(70.0), "after_interview_1"),
        ])
    }

    #[test]
    fn test_empty_is_explicit_no_data() {
        assert!(matches!(build_timeline(vec![]), Timeline::Empty));
    }

    #[test]
    fn test_sorted_by_version_not_insertion() {
        let timeline = sample();
        let versions: Vec<i32> = timeline.entries().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn test_deltas_follow_version_order() {
        let timeline = sample();
        let entries = timeline.entries();
        assert!(entries[0].previous_score.is_none());
        assert!(entries[0].score_delta.is_none());
        assert_eq!(entries[1].previous_score, Some(60.0));
        assert_eq!(entries[1].score_delta.as_ref().unwrap().delta, 10.0);
        assert_eq!(entries[2].previous_score, Some(70.0));
        assert_eq!(entries[2].score_delta.as_ref().unwrap().trend, Trend::Up);
    }

    #[test]
    fn test_only_max_version_is_latest() {
        let timeline = sample();
        let latest: Vec<i32> = timeline
            .entries()
            .iter()
            .filter(|e| e.is_latest)
            .map(|e| e.version)
            .collect();
        assert_eq!(latest, vec![3]);
    }

    #[test]
    fn test_summary_spans_first_to_latest() {
        match sample() {
            Timeline::Ready { summary, .. } => {
                assert_eq!(summary.version_count, 3);
                assert_eq!(summary.overall.delta, 20.0);
            }
            Timeline::Empty => panic!("expected entries"),
        }
    }

    #[test]
    fn test_unparseable_score_reads_as_zero() {
        let timeline = build_timeline(vec![
            profile(1, Some(f64::NAN), "resume"),
            profile(2, Some(250.0), "after_interview_1"),
        ]);
        let entries = timeline.entries();
        assert_eq!(entries[0].overall_score, 0.0);
        assert_eq!(entries[1].overall_score, 100.0);
        let delta = entries[1].score_delta.as_ref().unwrap();
        assert_eq!(delta.percentage, "0.0%");
        assert!(delta.invalid_input);
        match &timeline {
            Timeline::Ready { summary, .. } => assert!(summary.overall.invalid_input),
            Timeline::Empty => panic!("expected entries"),
        }
    }

    #[test]
    fn test_clean_scores_are_not_flagged() {
        let timeline = build_timeline(vec![
            profile(1, Some(40.0), "resume"),
            profile(2, None, "after_interview_1"),
        ]);
        let delta = timeline.entries()[1].score_delta.as_ref().unwrap();
        assert!(!delta.invalid_input);
        assert_eq!(delta.to, 0.0);
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(stage_label("after_interview_3"), "After interview 3");
        assert_eq!(stage_label("resume"), "Resume");
        assert_eq!(stage_label("final_REVIEW"), "Final review");
        assert_eq!(stage_label(""), "");
    }

    #[test]
    fn test_keyboard_navigation() {
        let timeline = sample();
        let mut sel = TimelineSelection::new();
        assert_eq!(sel.move_down(&timeline).unwrap().version, 1);
        assert_eq!(sel.move_down(&timeline).unwrap().version, 2);
        assert_eq!(sel.move_down(&timeline).unwrap().version, 3);
        assert_eq!(sel.move_down(&timeline).unwrap().version, 3);
        assert_eq!(sel.move_up(&timeline).unwrap().version, 2);
    }

    #[test]
    fn test_move_up_without_selection_picks_latest() {
        let timeline = sample();
        let mut sel = TimelineSelection::new();
        assert!(sel.move_up(&timeline).unwrap().is_latest);
    }

    #[test]
    fn test_select_and_activate() {
        let timeline = sample();
        let target = timeline.entries()[1].profile_id;
        let mut sel = TimelineSelection::new();
        assert!(!sel.activate(&timeline, |_| panic!("nothing selected")));
        assert!(sel.select(&timeline, target));
        assert!(!sel.select(&timeline, Uuid::new_v4()));

        let mut activated = None;
        assert!(sel.activate(&timeline, |e| activated = Some(e.version)));
        assert_eq!(activated, Some(2));
    }

    #[test]
    fn test_navigation_on_empty_timeline() {
        let mut sel = TimelineSelection::new();
        assert!(sel.move_down(&Timeline::Empty).is_none());
        assert!(sel.move_up(&Timeline::Empty).is_none());
    }
}
