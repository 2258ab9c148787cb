use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::config::IntegrationsConfig;
use crate::error::{AppError, AppResult};

/// Letter generation request from the front-end.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LetterRequest {
    #[validate(length(min = 1, message = "patient name is required"))]
    pub patient_name: String,
    #[serde(default)]
    pub diagnosis: Option<String>,
    /// e.g. "referral", "fitness", "discharge".
    #[validate(length(min = 1, message = "letter type is required"))]
    pub letter_type: String,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedLetter {
    pub letter_type: String,
    pub content: String,
    pub model: String,
}

/// Pass-through clients for the two external services the front-end uses.
pub struct IntegrationService {
    client: Client,
    config: IntegrationsConfig,
}

impl IntegrationService {
    pub fn new(config: IntegrationsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Query the external patient directory and hand its JSON back untouched.
    #[instrument(skip(self))]
    pub async fn lookup_patient(&self, search: &str) -> AppResult<Value> {
        let url = self
            .config
            .patient_lookup_url
            .as_deref()
            .ok_or_else(|| AppError::Validation("patient lookup is not configured".into()))?;
        let url = url::Url::parse_with_params(url, &[("search", search)])
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid patient lookup url: {}", e)))?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, "patient lookup failed");
            return Err(AppError::Upstream(format!("patient lookup returned {}", status)));
        }
        Ok(response.json::<Value>().await?)
    }

    fn prompt(request: &LetterRequest) -> String {
        let mut prompt = format!(
            "Write a formal hospital {} letter for patient {}.",
            request.letter_type.trim(),
            request.patient_name.trim()
        );
        if let Some(diagnosis) = request.diagnosis.as_deref().filter(|d| !d.trim().is_empty()) {
            prompt.push_str(&format!(" Diagnosis: {}.", diagnosis.trim()));
        }
        if let Some(notes) = request.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            prompt.push_str(&format!(" Additional notes: {}", notes.trim()));
        }
        prompt
    }

    #[instrument(skip(self, request), fields(letter_type = %request.letter_type))]
    pub async fn generate_letter(&self, request: &LetterRequest) -> AppResult<GeneratedLetter> {
        request.validate()?;
        let api_key = self
            .config
            .openai_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Validation("letter generation is not configured: missing API key".into()))?;

        let response = self
            .client
            .post(&self.config.openai_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&json!({
                "model": self.config.openai_model,
                "messages": [
                    {
                        "role": "system",
                        "content": "You are a medical secretary drafting letters for a hospital in India."
                    },
                    { "role": "user", "content": Self::prompt(request) }
                ],
                "temperature": 0.3
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "letter generation failed");
            return Err(AppError::Upstream(format!("letter generation returned {}", status)));
        }
        let body = response.json::<Value>().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AppError::Upstream("letter generation returned no content".into()))?
            .trim()
            .to_string();

        info!(chars = content.len(), "letter generated");
        Ok(GeneratedLetter {
            letter_type: request.letter_type.clone(),
            content,
            model: self.config.openai_model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_optional_parts_only_when_present() {
        let mut request = LetterRequest {
            patient_name: "Ravi Kumar".into(),
            diagnosis: Some("Cholelithiasis".into()),
            letter_type: "referral".into(),
            notes: Some("  ".into()),
        };
        let prompt = IntegrationService::prompt(&request);
        assert!(prompt.contains("referral letter for patient Ravi Kumar"));
        assert!(prompt.contains("Diagnosis: Cholelithiasis."));
        assert!(!prompt.contains("Additional notes"));

        request.diagnosis = None;
        assert!(!IntegrationService::prompt(&request).contains("Diagnosis"));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_validation_error() {
        let service = IntegrationService::new(IntegrationsConfig::default());
        let request = LetterRequest {
            patient_name: "Ravi Kumar".into(),
            diagnosis: None,
            letter_type: "fitness".into(),
            notes: None,
        };
        let err = service.generate_letter(&request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn unconfigured_lookup_is_a_validation_error() {
        let service = IntegrationService::new(IntegrationsConfig::default());
        assert!(matches!(
            service.lookup_patient("ravi").await,
            Err(AppError::Validation(_))
        ));
    }
}
