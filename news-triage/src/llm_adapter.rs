use crate::config::Config;
use crate::traits::Classifier;
use crate::types::{ItemContext, Result, TriageError, Verdict};
use crate::utils::text;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const SYSTEM_PROMPT: &str = r#"You are a Web3 news analyst with the selection habits of an institutional research desk covering the convergence of Web3 and financial technology.
Your goal is to pick out structural events with medium- to long-term industry significance, not short-term price noise or single-project marketing.

1. Deciding relevance

Set `relevant=true` only if at least one of the following holds, otherwise `relevant=false`:

1. Regulation / policy / official pilots: a national-level government or major financial regulator (e.g. SEC, HKMA, MAS, ECB, central banks) publishes, passes or updates rules, licensing frameworks, guidance or pilot programmes for crypto assets, stablecoins, tokenization or trading venues.
2. Mainstream institutions and TradFi involvement: large banks, payment networks, internet majors or international organisations partner with the crypto industry, launch products, or materially use blockchains, stablecoins or tokenized assets (e.g. JPMorgan, PayPal, Stripe, Visa, Mastercard, Google).
3. Long-term roadmaps or major upgrades of leading chains and core infrastructure: foundations or core teams announce roadmaps, performance targets, key protocol upgrades, or new settlement / ledger platforms.
4. RWA, stablecoins and payment infrastructure: milestones in tokenizing real-world assets (funds, treasuries, money-market funds, equities); stablecoin, cross-chain liquidity, payment network, programmable payment or tokenized bank liability launches or regulatory breakthroughs.
5. Large financing rounds or landmark launches: rounds of roughly USD 5M or more, or IPO-related news, in exchanges, RWA, stablecoins, payments, prediction markets, institutional DeFi, compliance infrastructure or finance-related AI; or rounds led by top-tier investors; or major platforms launching or fixing a launch date in these areas.
6. Emerging sectors: projects or roadmaps with a clearly new model or market (prediction markets, internet capital markets, tokenization, stablecoin payment networks, AI x Web3, compliance / risk infrastructure) with meaningful scale or institutional backing.

Usually not relevant:
- Small raises by a single token or project without an RWA / payments / institutional / regulatory angle.
- Single exchange listings, futures listings, routine feature updates.
- Pure price moves or market commentary.
- KOL opinions, airdrops, campaigns, marketing partnerships.
- Ordinary security incidents or hacks (unless they trigger regulatory or institutional change).
- Entertainment-driven GameFi or meme-coin news without financial substance.

2. Output format

Return JSON only, with no extra text.

Fields:
- `relevant`: boolean, whether the item meets the criteria above.
- `category`: string, exactly one of the six categories above (only meaningful when `relevant=true`; use "" when `relevant=false`).
- `reason`: short justification for the decision and the category.
- `tags`: array of strings naming the chains / institutions / sectors involved, e.g. ["Ethereum","Solana","RWA","Stablecoin","PayPal","Prediction markets"].

Example (illustration only, do not explain it in real answers):

{
  "relevant": true,
  "category": "RWA, stablecoins and payment infrastructure",
  "reason": "A large payment company launches stablecoin-based subscription payments, strengthening stablecoins in cross-border settlement and recurring payments.",
  "tags": ["Stablecoin", "Payments", "USDC", "Stripe", "Base", "Polygon"]
}
"#;

/// Render the per-item user prompt.
pub fn user_prompt(context: &ItemContext) -> String {
    format!(
        "Title: {}\nLink: {}\nPublished: {}\nSummary: {}\nRespond with JSON.",
        context.title,
        context.link,
        context.published_at.to_rfc3339(),
        context.summary,
    )
}

/// Build the classifier the configuration asks for: the live client when a
/// credential is present, otherwise the disabled one.
pub fn classifier_from_config(config: &Config) -> Result<Arc<dyn Classifier>> {
    match &config.openai_api_key {
        Some(api_key) => Ok(Arc::new(
            OpenAiClassifier::new(api_key, &config.openai_model, config.openai_timeout)?
                .with_base_url(&config.openai_base_url),
        )),
        None => Ok(Arc::new(DisabledClassifier)),
    }
}

/// Used when no model credential is configured. Every evaluation fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    fn ready(&self) -> bool {
        false
    }

    async fn evaluate(&self, _context: &ItemContext) -> Result<Verdict> {
        Err(TriageError::ClassifierDisabled)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Classifier backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiClassifier {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiClassifier {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: crate::config::DEFAULT_OPENAI_BASE.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| TriageError::Config(format!("invalid API key header: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn complete(&self, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
        };

        debug!(model = %self.model, "chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TriageError::Classifier(format!(
                "model API error ({}): {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TriageError::Classifier("no choices returned by model".to_string()))
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    fn ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn evaluate(&self, context: &ItemContext) -> Result<Verdict> {
        if !self.ready() {
            return Err(TriageError::ClassifierDisabled);
        }

        let content = self.complete(&user_prompt(context)).await?;
        parse_verdict(&content).inspect_err(|e| {
            warn!("Failed to parse model response: {}", e);
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    relevant: bool,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    tags: Option<Vec<Option<String>>>,
}

/// Normalize a model response into a `Verdict`.
///
/// Code fences and any prose around the JSON object are removed before
/// parsing. A `null` (or `"null"`) category or reason becomes an empty
/// string and a `null` tag list becomes empty. A missing or non-boolean
/// `relevant` field is an error.
pub fn parse_verdict(raw: &str) -> Result<Verdict> {
    let body = json_object_slice(text::strip_code_fences(raw));

    let parsed: RawVerdict =
        serde_json::from_str(body).map_err(|e| TriageError::MalformedVerdict {
            reason: e.to_string(),
            content: raw.to_string(),
        })?;

    Ok(Verdict {
        relevant: parsed.relevant,
        category: non_null(parsed.category),
        reason: non_null(parsed.reason),
        tags: parsed
            .tags
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
    })
}

fn json_object_slice(s: &str) -> &str {
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if start < end => &s[start..=end],
        _ => s,
    }
}

fn non_null(value: Option<String>) -> String {
    match value {
        Some(v) if v.trim().eq_ignore_ascii_case("null") => String::new(),
        Some(v) => v.trim().to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn fenced_response_with_null_category_is_valid() {
        let raw = "```json\n{\"relevant\": false, \"category\": null, \"reason\": \"price noise\", \"tags\": [\"BTC\"]}\n```";
        let verdict = parse_verdict(raw).unwrap();

        assert!(!verdict.relevant);
        assert_eq!(verdict.category, "");
        assert_eq!(verdict.reason, "price noise");
        assert_eq!(verdict.tags, vec!["BTC"]);
    }

    #[test]
    fn plain_json_parses() {
        let verdict = parse_verdict(
            r#"{"relevant": true, "category": "policy", "reason": "new rules", "tags": ["X", "SEC"]}"#,
        )
        .unwrap();
        assert_eq!(
            verdict,
            Verdict {
                relevant: true,
                category: "policy".to_string(),
                reason: "new rules".to_string(),
                tags: vec!["X".to_string(), "SEC".to_string()],
            }
        );
    }

    #[test]
    fn surrounding_prose_is_ignored() {
        let raw = "Here is the analysis:\n{\"relevant\": true, \"category\": \"null\", \"reason\": \"r\", \"tags\": null}\nThanks.";
        let verdict = parse_verdict(raw).unwrap();
        assert!(verdict.relevant);
        assert_eq!(verdict.category, "");
        assert!(verdict.tags.is_empty());
    }

    #[test]
    fn missing_relevant_is_an_error_not_a_default() {
        let err = parse_verdict(r#"{"category": "policy"}"#).unwrap_err();
        assert!(matches!(err, TriageError::MalformedVerdict { .. }));
    }

    #[test]
    fn non_json_is_an_error() {
        let err = parse_verdict("I cannot help with that.").unwrap_err();
        assert!(matches!(err, TriageError::MalformedVerdict { .. }));
    }

    #[test]
    fn user_prompt_carries_item_fields() {
        let ctx = ItemContext {
            title: "Policy X approved".to_string(),
            link: "https://example.com/newsletter/1".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            summary: "Regulator approves policy X".to_string(),
        };
        let prompt = user_prompt(&ctx);
        assert!(prompt.contains("Title: Policy X approved"));
        assert!(prompt.contains("Published: 2024-01-01T00:00:00+00:00"));
        assert!(prompt.contains("Summary: Regulator approves policy X"));
    }

    #[tokio::test]
    async fn disabled_classifier_reports_not_ready() {
        let classifier = DisabledClassifier;
        assert!(!classifier.ready());

        let ctx = ItemContext {
            title: String::new(),
            link: String::new(),
            published_at: Utc::now(),
            summary: String::new(),
        };
        assert!(matches!(
            classifier.evaluate(&ctx).await,
            Err(TriageError::ClassifierDisabled)
        ));
    }

    #[test]
    fn config_without_key_builds_disabled_classifier() {
        let classifier = classifier_from_config(&Config::default()).unwrap();
        assert!(!classifier.ready());

        let config = Config {
            openai_api_key: Some("sk-test".to_string()),
            ..Config::default()
        };
        assert!(classifier_from_config(&config).unwrap().ready());
    }
}
