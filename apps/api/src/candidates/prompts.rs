// Resume parsing prompt templates.

pub const RESUME_PARSE_SYSTEM: &str = "\
You are a precise resume data extractor. \
Extract contact details and skills from resume text into structured JSON. \
You MUST respond with valid JSON only, no markdown fences, no explanations.";

pub const RESUME_PARSE_PROMPT: &str = r#"Extract the candidate's details from the resume below.

RESUME TEXT:
{resume_text}

OUTPUT SCHEMA (return exactly this structure):
{
  "name": "string",
  "email": "string" | null,
  "phone": "string" | null,
  "skills": ["string"],
  "experienceYears": number | null
}

RULES:
1. "skills" lists concrete technologies and competencies, one per entry, no duplicates.
2. "experienceYears" is total professional experience; null if it cannot be determined.
3. Return ONLY the JSON object."#;
