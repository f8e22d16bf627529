// Profile analysis prompt templates.

pub const PROFILE_ANALYSIS_SYSTEM: &str = "\
You are an experienced technical recruiter producing structured candidate assessments. \
You MUST respond with valid JSON only, no markdown fences, no explanations. \
Scores are numbers from 0 to 100. Proficiency is one of beginner, intermediate, advanced, expert.";

pub const PROFILE_ANALYSIS_PROMPT: &str = r#"Assess the candidate below and return an updated profile.

CANDIDATE:
{candidate}

TARGET JOB (may be empty):
{job}

PREVIOUS PROFILE VERSION (may be empty; refine it rather than starting over):
{previous}

NEW NOTES FOR THIS STAGE (may be empty):
{notes}

OUTPUT SCHEMA (return exactly this structure):
{
  "profileData": {
    "technicalSkills": [{"skill": "string", "proficiency": "beginner" | "intermediate" | "advanced" | "expert", "evidence": "string"}],
    "softSkills": [{"skill": "string", "examples": ["string"]}],
    "experience": {"totalYears": number, "relevantYears": number,
                   "positions": [{"title": "string", "company": "string", "duration": "string", "achievements": ["string"]}]},
    "education": [{"degree": "string", "institution": "string", "year": number | null}],
    "culturalFit": {"workStyle": "string", "values": ["string"], "teamPreference": "string" | null},
    "careerTrajectory": {"progression": "string", "readinessForNextLevel": number, "growthAreas": ["string"]},
    "organizationalFit": {"cultureAssessment": {"value": number}, "leadershipAssessment": {"dimension": number}} | null
  },
  "overallScore": number,
  "strengths": ["string"],
  "concerns": ["string"],
  "gaps": ["string"],
  "summary": "string"
}

RULES:
1. Keep skill names stable across versions so they can be compared.
2. Only raise a proficiency when the notes give new evidence for it.
3. Return ONLY the JSON object."#;
