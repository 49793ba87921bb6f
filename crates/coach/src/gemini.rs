use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    Accent, CoachError, ContentGenerator, Evaluation, FeedbackLanguage, PracticeSentence,
    PronunciationEvaluator, Result, VocabItem,
};

/// Text model used for scoring and content generation.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` client with JSON-schema responses.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Default, serde::Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RawEvaluation {
    #[serde(default)]
    score: f64,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    highlighted: String,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

fn evaluation_prompt(target: &str, spoken: &str, accent: Accent, language: FeedbackLanguage) -> String {
    format!(
        "Target English sentence: \"{target}\"\n\
         Learner's spoken transcription: \"{spoken}\"\n\
         Target accent: {accent}\n\n\
         You are an expert English pronunciation coach.\n\
         1. Score the accuracy from 0 to 100 against the {accent} accent.\n\
         2. In {language}, say precisely which words to fix and how.\n\
         3. Give extra praise if the learner handles the {accent} accent well.\n\
         4. Repeat the target sentence with mispronounced or missing words wrapped in [brackets].",
        accent = accent.description(),
        language = language.name(),
    )
}

fn evaluation_schema(language: FeedbackLanguage) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "score": { "type": "NUMBER", "description": "Accuracy score 0-100" },
            "feedback": { "type": "STRING", "description": format!("Correction advice in {}", language.name()) },
            "highlighted": { "type": "STRING", "description": "Target sentence with wrong words in [brackets]" }
        },
        "required": ["score", "feedback", "highlighted"]
    })
}

fn vocabulary_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "word": { "type": "STRING", "description": "The English word" },
                "translation": { "type": "STRING", "description": "Thai translation" },
                "example": { "type": "STRING", "description": "English example sentence" },
                "pronunciation": { "type": "STRING", "description": "IPA pronunciation (optional)" }
            },
            "required": ["word", "translation", "example"]
        }
    })
}

fn sentences_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "english": { "type": "STRING", "description": "The English sentence" },
                "thai": { "type": "STRING", "description": "The Thai translation" }
            },
            "required": ["english", "thai"]
        }
    })
}

/// Turn the model's JSON answer into an evaluation, falling back when it is
/// unusable.
pub(crate) fn parse_evaluation(text: &str, target: &str, language: FeedbackLanguage) -> Evaluation {
    let raw: RawEvaluation = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse evaluation");
            return Evaluation::failure(target, language);
        }
    };
    if !raw.score.is_finite() {
        return Evaluation::failure(target, language);
    }
    Evaluation {
        score: raw.score.round().clamp(0.0, 100.0) as u8,
        feedback: raw.feedback,
        highlighted: if raw.highlighted.trim().is_empty() {
            target.to_string()
        } else {
            raw.highlighted
        },
    }
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_TEXT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Run one JSON-mode generation and return the raw JSON text.
    async fn generate_json(&self, prompt: &str, schema: Value) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema
            }
        });

        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| CoachError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoachError::RequestFailed(resp.status().to_string()));
        }

        let response = resp
            .json::<GenerateResponse>()
            .await
            .map_err(|e| CoachError::InvalidResponse(e.to_string()))?;
        response.text().ok_or(CoachError::EmptyResponse)
    }

    async fn generate_list<T: serde::de::DeserializeOwned>(&self, prompt: &str, schema: Value) -> Result<Vec<T>> {
        let text = self.generate_json(prompt, schema).await?;
        serde_json::from_str(&text).map_err(|e| CoachError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PronunciationEvaluator for GeminiClient {
    async fn evaluate(
        &self,
        target: &str,
        spoken: &str,
        accent: Accent,
        language: FeedbackLanguage,
    ) -> Evaluation {
        if spoken.trim().is_empty() {
            tracing::debug!("Nothing transcribed; skipping evaluation request");
            return Evaluation::nothing_heard(target, language);
        }

        let prompt = evaluation_prompt(target, spoken, accent, language);
        match self.generate_json(&prompt, evaluation_schema(language)).await {
            Ok(text) => parse_evaluation(&text, target, language),
            Err(e) => {
                tracing::warn!(error = %e, "Pronunciation evaluation failed");
                Evaluation::failure(target, language)
            }
        }
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn vocabulary(&self, category: &str) -> Vec<VocabItem> {
        let prompt = format!(
            "Generate 5 English vocabulary items related to the category: \"{category}\". \
             For each item, provide the English word, Thai translation, and an example sentence in English."
        );
        self.generate_list(&prompt, vocabulary_schema())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, category, "Vocabulary generation failed");
                Vec::new()
            })
    }

    async fn sentences(&self, topic: &str) -> Vec<PracticeSentence> {
        let prompt = format!(
            "Generate 5 English sentences for pronunciation practice related to: \"{topic}\". \
             Provide Thai translations for each."
        );
        self.generate_list(&prompt, sentences_schema())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, topic, "Sentence generation failed");
                Vec::new()
            })
    }
}
