use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::profiles::score::ScoreReading;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Proficiency {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Proficiency {
    /// Ordinal rank used when diffing skills: beginner=1 .. expert=4.
    pub fn rank(self) -> u8 {
        match self {
            Proficiency::Beginner => 1,
            Proficiency::Intermediate => 2,
            Proficiency::Advanced => 3,
            Proficiency::Expert => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalSkill {
    pub skill: String,
    pub proficiency: Proficiency,
    /// Where the proficiency was observed: "resume", "interview_1", ...
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoftSkill {
    pub skill: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub achievements: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceSummary {
    #[serde(default)]
    pub total_years: f64,
    #[serde(default)]
    pub relevant_years: f64,
    #[serde(default)]
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Education {
    pub degree: String,
    #[serde(default)]
    pub institution: String,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CulturalFit {
    #[serde(default)]
    pub work_style: String,
    #[serde(default)]
    pub values: Vec<String>,
    pub team_preference: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CareerTrajectory {
    #[serde(default)]
    pub progression: String,
    /// Clamped to 0–100; unusable input reads as 0 and is flagged.
    #[serde(default)]
    pub readiness_for_next_level: ScoreReading,
    #[serde(default)]
    pub growth_areas: Vec<String>,
}

impl CareerTrajectory {
    pub fn readiness(&self) -> f64 {
        self.readiness_for_next_level.value
    }
}

/// Culture scores per company value and leadership scores per dimension, each 0–100.
/// A non-numeric entry reads as 0 instead of rejecting the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationalFit {
    #[serde(default)]
    pub culture_assessment: BTreeMap<String, ScoreReading>,
    #[serde(default)]
    pub leadership_assessment: BTreeMap<String, ScoreReading>,
}

/// Typed view of `candidate_profiles.profile_data`.
///
/// `technicalSkills` and `experience` are required; everything else defaults
/// when absent so older snapshots still parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub technical_skills: Vec<TechnicalSkill>,
    #[serde(default)]
    pub soft_skills: Vec<SoftSkill>,
    pub experience: ExperienceSummary,
    #[serde(default)]
    pub education: Vec<Education>,
    #[serde(default)]
    pub cultural_fit: CulturalFit,
    #[serde(default)]
    pub career_trajectory: CareerTrajectory,
    pub organizational_fit: Option<OrganizationalFit>,
}

#[derive(Debug, Error)]
pub enum ProfileSchemaError {
    #[error("profile data must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("profile data does not match schema: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("technical skill at index {0} has an empty name")]
    EmptySkillName(usize),

    #[error("experience years must be non-negative and finite")]
    InvalidExperience,
}

impl ProfileData {
    /// Parses and validates a raw payload. Never partially accepts a payload.
    pub fn parse(raw: &Value) -> Result<Self, ProfileSchemaError> {
        if !raw.is_object() {
            return Err(ProfileSchemaError::NotAnObject(json_kind(raw)));
        }
        let data: ProfileData = serde_json::from_value(raw.clone())?;
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> Result<(), ProfileSchemaError> {
        if let Some(idx) = self
            .technical_skills
            .iter()
            .position(|s| s.skill.trim().is_empty())
        {
            return Err(ProfileSchemaError::EmptySkillName(idx));
        }
        let years_ok = |y: f64| y.is_finite() && y >= 0.0;
        if !years_ok(self.experience.total_years) || !years_ok(self.experience.relevant_years) {
            return Err(ProfileSchemaError::InvalidExperience);
        }
        Ok(())
    }

    pub fn soft_skill_names(&self) -> Vec<String> {
        self.soft_skills.iter().map(|s| s.skill.clone()).collect()
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
