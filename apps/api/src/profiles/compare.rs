//! Profile Version Comparator: pure deltas between two profile snapshots.
//!
//! Nothing here touches the store. `compare_profiles` validates both payloads
//! up front and refuses to compare if either is invalid.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::profile::CandidateProfileRow;
use crate::profiles::models::{ProfileData, Proficiency, TechnicalSkill};
use crate::profiles::score::{read_optional_score, read_score, ScoreReading};

/// Absolute deltas below this are reported as `stable` to absorb rounding noise.
pub const STABILITY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComparison {
    pub from: f64,
    pub to: f64,
    pub delta: f64,
    /// `|delta| / from * 100` to one decimal, e.g. `"12.5%"`.
    pub percentage: String,
    pub trend: Trend,
    /// Set when either input was non-numeric and read as 0.
    pub invalid_input: bool,
}

/// Compares two raw scores after clamping both to [0, 100].
pub fn compare_scores(score_a: f64, score_b: f64) -> ScoreComparison {
    compare_readings(read_score(score_a), read_score(score_b))
}

/// Compares two already-normalised readings, carrying their validity flags.
pub fn compare_readings(a: ScoreReading, b: ScoreReading) -> ScoreComparison {
    let invalid_input = !(a.valid && b.valid);
    if invalid_input {
        warn!(
            "Score comparison received invalid input (from valid: {}, to valid: {})",
            a.valid, b.valid
        );
    }

    let delta = b.value - a.value;
    let percentage = if a.value == 0.0 {
        "0.0%".to_string()
    } else {
        format!("{:.1}%", delta.abs() / a.value * 100.0)
    };
    let trend = if delta.abs() < STABILITY_THRESHOLD {
        Trend::Stable
    } else if delta > 0.0 {
        Trend::Up
    } else {
        Trend::Down
    };

    ScoreComparison {
        from: a.value,
        to: b.value,
        delta,
        percentage,
        trend,
        invalid_input,
    }
}

/// Kind of change for one skill. Declaration order is the display priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SkillChange {
    Added,
    Improved,
    Degraded,
    Removed,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillComparison {
    pub skill: String,
    pub change: SkillChange,
    pub before: Option<Proficiency>,
    pub after: Option<Proficiency>,
}

/// Diffs two technical-skill lists keyed by skill name.
///
/// Output is grouped added < improved < degraded < removed < unchanged; within
/// a group, skills keep the order they appeared in the inputs.
pub fn compare_technical_skills(
    skills_a: &[TechnicalSkill],
    skills_b: &[TechnicalSkill],
) -> Vec<SkillComparison> {
    let after: HashMap<&str, Proficiency> = skills_b
        .iter()
        .map(|s| (s.skill.as_str(), s.proficiency))
        .collect();
    let before_names: HashSet<&str> = skills_a.iter().map(|s| s.skill.as_str()).collect();

    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for skill in skills_a {
        if !seen.insert(skill.skill.as_str()) {
            continue;
        }
        let change = match after.get(skill.skill.as_str()) {
            None => SkillChange::Removed,
            Some(b) if b.rank() > skill.proficiency.rank() => SkillChange::Improved,
            Some(b) if b.rank() < skill.proficiency.rank() => SkillChange::Degraded,
            Some(_) => SkillChange::Unchanged,
        };
        result.push(SkillComparison {
            skill: skill.skill.clone(),
            change,
            before: Some(skill.proficiency),
            after: after.get(skill.skill.as_str()).copied(),
        });
    }

    for skill in skills_b {
        if before_names.contains(skill.skill.as_str()) || !seen.insert(skill.skill.as_str()) {
            continue;
        }
        result.push(SkillComparison {
            skill: skill.skill.clone(),
            change: SkillChange::Added,
            before: None,
            after: Some(skill.proficiency),
        });
    }

    result.sort_by_key(|c| c.change);
    result
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArrayFieldDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Set-difference over two string lists: `added = B \ A`, `removed = A \ B`,
/// `unchanged = A ∩ B`. Input iteration order is preserved.
pub fn compare_array_fields(arr_a: &[String], arr_b: &[String]) -> ArrayFieldDiff {
    let set_a: HashSet<&str> = arr_a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = arr_b.iter().map(String::as_str).collect();

    ArrayFieldDiff {
        added: arr_b
            .iter()
            .filter(|x| !set_a.contains(x.as_str()))
            .cloned()
            .collect(),
        removed: arr_a
            .iter()
            .filter(|x| !set_b.contains(x.as_str()))
            .cloned()
            .collect(),
        unchanged: arr_a
            .iter()
            .filter(|x| set_b.contains(x.as_str()))
            .cloned()
            .collect(),
    }
}

/// JSON flavour of `compare_array_fields`: a non-array reads as empty and
/// non-string elements are skipped.
pub fn compare_json_array_fields(arr_a: &Value, arr_b: &Value) -> ArrayFieldDiff {
    compare_array_fields(&json_strings(arr_a), &json_strings(arr_b))
}

pub(crate) fn json_strings(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|x| x.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DimensionComparison {
    pub dimension: String,
    pub comparison: ScoreComparison,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileComparison {
    pub from_version: i32,
    pub to_version: i32,
    pub from_stage: String,
    pub to_stage: String,
    pub overall_score: ScoreComparison,
    pub technical_skills: Vec<SkillComparison>,
    pub soft_skills: ArrayFieldDiff,
    pub strengths: ArrayFieldDiff,
    pub concerns: ArrayFieldDiff,
    pub gaps: ArrayFieldDiff,
    pub readiness_for_next_level: ScoreComparison,
    pub experience_years_delta: f64,
    /// Values assessed in both versions; empty unless both carry organizational fit.
    pub culture_assessment: Vec<DimensionComparison>,
    pub leadership_assessment: Vec<DimensionComparison>,
}

#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("invalid profile data in version(s) {versions:?}: {}", .details.join("; "))]
    InvalidProfileData {
        versions: Vec<i32>,
        details: Vec<String>,
    },
}

/// Compares two profile snapshots, `from` → `to`.
pub fn compare_profiles(
    from: &CandidateProfileRow,
    to: &CandidateProfileRow,
) -> Result<ProfileComparison, ComparisonError> {
    let parsed_from = ProfileData::parse(&from.profile_data);
    let parsed_to = ProfileData::parse(&to.profile_data);

    let (data_from, data_to) = match (parsed_from, parsed_to) {
        (Ok(a), Ok(b)) => (a, b),
        (a, b) => {
            let mut versions = Vec::new();
            let mut details = Vec::new();
            for (row, parsed) in [(from, a.err()), (to, b.err())] {
                if let Some(err) = parsed {
                    warn!(
                        "Profile {} (version {}) failed validation: {err}",
                        row.id, row.version
                    );
                    versions.push(row.version);
                    details.push(format!("version {}: {err}", row.version));
                }
            }
            return Err(ComparisonError::InvalidProfileData { versions, details });
        }
    };

    let empty = Vec::new();
    let strings = |field: &Option<Vec<String>>| field.as_ref().unwrap_or(&empty).clone();

    let (culture_assessment, leadership_assessment) =
        match (&data_from.organizational_fit, &data_to.organizational_fit) {
            (Some(a), Some(b)) => (
                compare_dimensions(&a.culture_assessment, &b.culture_assessment),
                compare_dimensions(&a.leadership_assessment, &b.leadership_assessment),
            ),
            _ => (Vec::new(), Vec::new()),
        };

    Ok(ProfileComparison {
        from_version: from.version,
        to_version: to.version,
        from_stage: from.stage.clone(),
        to_stage: to.stage.clone(),
        overall_score: compare_readings(
            read_optional_score(from.overall_score),
            read_optional_score(to.overall_score),
        ),
        technical_skills: compare_technical_skills(
            &data_from.technical_skills,
            &data_to.technical_skills,
        ),
        soft_skills: compare_array_fields(
            &data_from.soft_skill_names(),
            &data_to.soft_skill_names(),
        ),
        strengths: compare_array_fields(&strings(&from.strengths), &strings(&to.strengths)),
        concerns: compare_array_fields(&strings(&from.concerns), &strings(&to.concerns)),
        gaps: compare_array_fields(&strings(&from.gaps), &strings(&to.gaps)),
        readiness_for_next_level: compare_readings(
            data_from.career_trajectory.readiness_for_next_level,
            data_to.career_trajectory.readiness_for_next_level,
        ),
        experience_years_delta: data_to.experience.total_years - data_from.experience.total_years,
        culture_assessment,
        leadership_assessment,
    })
}

fn compare_dimensions(
    a: &BTreeMap<String, ScoreReading>,
    b: &BTreeMap<String, ScoreReading>,
) -> Vec<DimensionComparison> {
    a.iter()
        .filter_map(|(dimension, score_a)| {
            b.get(dimension).map(|score_b| DimensionComparison {
                dimension: dimension.clone(),
                comparison: compare_readings(*score_a, *score_b),
            })
        })
        .collect()
}
