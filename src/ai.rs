use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::GeminiConfig;
use crate::quizzes::QuestionSpec;

/// Persona applied to every tutoring chat turn. Keeps the assistant on
/// K-12 school subjects and has it politely refuse anything else.
pub const TUTOR_INSTRUCTION: &str = r#"You are "Guruku AI", a personal tutor dedicated to middle- and high-school students.

Identity & communication style:
- Name: Guruku AI.
- Role: a patient, friendly and supportive private teacher.
- Tone: warm and conversational, never stiff or robotic. Greet students kindly.
- Goal: help students *understand* concepts, not hand out answer keys.

Scope:
- PRIMARY FOCUS: middle- and high-school subjects (mathematics, sciences, social studies, languages).
- ALLOWED: study tips, time management, motivation and exam preparation.
- OFF-LIMITS: questions unrelated to education or student development (celebrity gossip, game cheats, partisan politics, romantic advice).

Interaction protocol:
1. Out-of-scope handling: decline gently, with light humor if it fits, and steer the student back to schoolwork.
2. Teaching method (Socratic): do not give the final answer to exercises outright. Walk through the steps, offer hints and simple analogies, and nudge the student to think for themselves.
3. Mathematical notation: use LaTeX for complex formulas. Put block formulas in $$ ... $$ and prefer $$ ... $$ for the main formula so the client can render it.
4. Safety: never answer questions that are dangerous, illegal or unethical.

Remember: you are their study buddy. Keep the mood fun, not boring!"#;

/// Prompt used to turn an uploaded document into lesson content.
pub const LESSON_PROMPT: &str = r#"Analyze this educational document.
Create a comprehensive lesson module in Markdown format based strictly on the content of this file.

Requirements:
1. **Summary**: Brief summary of the topic.
2. **Key Concepts**: Explain main concepts clearly.
3. **Equations**: If there are mathematical formulas, convert them to LaTeX format enclosed in $$ (block) or $ (inline).
4. **Examples**: Provide examples if available in the text.
5. **Quiz/Practice**: Create 3 simple practice questions based on the content.

Format the output as clean Markdown."#;

/// Quiz extraction runs near-deterministic and with a hard output ceiling so
/// a looping generation cannot stall the request.
const QUIZ_TEMPERATURE: f64 = 0.1;
const QUIZ_MAX_OUTPUT_TOKENS: u32 = 8192;

pub fn quiz_prompt(max_questions: u32) -> String {
    format!(
        r#"You are an educational assistant.
TASK: Extract ALL multiple-choice questions from the attached document, up to a maximum of {max_questions}.

RULES:
1. If the document has existing questions, USE THEM.
2. If the document has an answer key, USE IT for the 'answer' field.
3. If no key is found, deduce the correct answer.
4. Return ONLY a valid JSON list. No markdown formatting, no plain text.

JSON SCHEMA:
[
  {{
    "text": "Question text",
    "options": ["Option A", "Option B", "Option C", "Option D"],
    "answer": "Exact string of correct option",
    "points": 10,
    "order": 1
  }}
]"#
    )
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("file upload failed: {0}")]
    Upload(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("empty response from model")]
    EmptyResponse,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One prior conversation turn, already mapped to the service's role
/// vocabulary ("user" / "model").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file_data: None,
        }
    }

    fn file(file: &FileRef) -> Self {
        Self {
            text: None,
            file_data: Some(FileData {
                mime_type: file.mime_type.clone(),
                file_uri: file.uri.clone(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

/// Handle to a file the service has accepted for grounding prompts.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub uri: String,
    pub mime_type: String,
}

/// Thin client for the generative-language REST API (file upload +
/// generateContent). Everything else in the system treats this as a black
/// box returning text or structured question records.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Upload a local file so prompts can reference it by URI.
    pub async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<FileRef, AiError> {
        let bytes = tokio::fs::read(path).await?;
        let url = format!(
            "{}/upload/v1beta/files?key={}",
            self.config.base_url, self.config.api_key
        );
        let response = self
            .http
            .post(url)
            .header("X-Goog-Upload-Protocol", "raw")
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Service { status, body });
        }
        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| AiError::Upload(e.to_string()))?;
        Ok(FileRef {
            uri: uploaded.file.uri,
            mime_type: uploaded
                .file
                .mime_type
                .unwrap_or_else(|| mime_type.to_string()),
        })
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, AiError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url, self.config.model, self.config.api_key
        );
        let response = self.http.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Service { status, body });
        }
        let body: GenerateResponse = response.json().await?;
        body.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .next()
            .ok_or(AiError::EmptyResponse)
    }

    /// Generate a Markdown lesson module from an uploaded document.
    ///
    /// Failure is explicit here; callers that persist the text decide whether
    /// to store the error as user-visible content instead.
    pub async fn generate_lesson(&self, path: &Path, mime_type: &str) -> Result<String, AiError> {
        let file = self.upload_file(path, mime_type).await?;
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::file(&file), Part::text(LESSON_PROMPT)],
            }],
            generation_config: None,
        };
        self.generate(request).await
    }

    /// Extract up to `max_questions` multiple-choice questions from a
    /// document. Never fails: upload, service and parse errors all degrade
    /// into an empty list.
    pub async fn generate_quiz(
        &self,
        path: &Path,
        mime_type: &str,
        max_questions: u32,
    ) -> Vec<QuestionSpec> {
        let file = match self.upload_file(path, mime_type).await {
            Ok(file) => file,
            Err(e) => {
                warn!("quiz generation upload failed: {e}");
                return Vec::new();
            }
        };
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::file(&file), Part::text(quiz_prompt(max_questions))],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(QUIZ_TEMPERATURE),
                max_output_tokens: Some(QUIZ_MAX_OUTPUT_TOKENS),
                response_mime_type: Some("application/json".to_string()),
            }),
        };
        match self.generate(request).await {
            Ok(raw) => extract_questions(&raw),
            Err(e) => {
                warn!("quiz generation failed: {e}");
                Vec::new()
            }
        }
    }

    /// One tutoring turn with prior turns as context.
    pub async fn chat(&self, prompt: &str, history: &[ChatTurn]) -> Result<String, AiError> {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content {
                role: Some(turn.role.to_string()),
                parts: vec![Part::text(turn.content.clone())],
            })
            .collect();
        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part::text(prompt)],
        });
        let request = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(TUTOR_INSTRUCTION)],
            }),
            contents,
            generation_config: None,
        };
        self.generate(request).await
    }
}

/// Parse the model's quiz JSON; anything unparseable yields an empty list.
pub fn extract_questions(raw: &str) -> Vec<QuestionSpec> {
    match serde_json::from_str::<Vec<QuestionSpec>>(raw.trim()) {
        Ok(questions) => questions,
        Err(e) => {
            warn!("failed to decode quiz JSON: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_well_formed_question_list() {
        let raw = r#"[
            {"text": "2 + 2 = ?", "options": ["3", "4"], "answer": "4", "points": 5, "order": 1},
            {"text": "Capital of France?", "options": ["Paris", "Lyon"], "answer": "Paris"}
        ]"#;
        let questions = extract_questions(raw);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].answer, "4");
        assert_eq!(questions[0].points, 5.0);
        assert_eq!(questions[0].position, 1);
        // points and order default when the model omits them
        assert_eq!(questions[1].points, 1.0);
        assert_eq!(questions[1].position, 0);
    }

    #[test]
    fn unparseable_json_degrades_to_empty_list() {
        assert!(extract_questions("Sorry, I cannot do that.").is_empty());
        assert!(extract_questions("{\"questions\": []}").is_empty());
        assert!(extract_questions("").is_empty());
        assert!(extract_questions("[{\"text\": \"trailing\",]").is_empty());
    }

    #[test]
    fn quiz_prompt_carries_the_cap() {
        let prompt = quiz_prompt(7);
        assert!(prompt.contains("up to a maximum of 7"));
        assert!(prompt.contains("valid JSON list"));
    }

    #[test]
    fn generate_request_serializes_camel_case() {
        let request = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text("persona")],
            }),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::file(&FileRef {
                        uri: "files/abc".to_string(),
                        mime_type: "application/pdf".to_string(),
                    }),
                    Part::text("prompt"),
                ],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.1),
                max_output_tokens: Some(8192),
                response_mime_type: Some("application/json".to_string()),
            }),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "persona");
        assert_eq!(
            value["contents"][0]["parts"][0]["fileData"]["fileUri"],
            "files/abc"
        );
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 8192);
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn response_text_is_first_candidate_part() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "hello"}]}}]}"#,
        )
        .unwrap();
        let text = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .next();
        assert_eq!(text.as_deref(), Some("hello"));
    }
}
