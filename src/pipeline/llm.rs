//! The extraction service: page image in, rows out.
//!
//! [`PageExtractor`] is the seam the orchestrator calls. It is object-safe
//! (returns a boxed future) so a session can hold any implementation behind
//! `Arc<dyn PageExtractor>`: the [`VisionExtractor`] below in production, a
//! scripted one in tests.
//!
//! There is deliberately no retry loop here. A failed call settles the page
//! in `error` and the user decides whether to re-run it; error subtypes are
//! not distinguished for retry purposes.

use crate::config::SessionConfig;
use crate::error::{PageError, Scan2SheetError};
use crate::page::Row;
use crate::pipeline::{encode, postprocess};
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, USER_INSTRUCTION};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Default model when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Turns one page image into rows.
///
/// Implementations must not panic on bad input; every failure is a
/// [`PageError`] that ends up on the page record.
pub trait PageExtractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        page_name: &'a str,
        image: Arc<DynamicImage>,
    ) -> BoxFuture<'a, Result<Vec<Row>, PageError>>;
}

/// [`PageExtractor`] backed by a vision-capable chat model.
///
/// ## Message Layout
///
/// 1. **System message** — the extraction instruction (or user override)
/// 2. **User message** — a short instruction plus the page PNG attachment
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    api_timeout_secs: u64,
    max_edge: u32,
}

impl std::fmt::Debug for VisionExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionExtractor")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_edge", &self.max_edge)
            .finish()
    }
}

impl VisionExtractor {
    /// Use `provider` with the prompt and limits from `config`.
    pub fn new(provider: Arc<dyn LLMProvider>, config: &SessionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_timeout_secs: config.api_timeout_secs,
            max_edge: config.max_rendered_pixels,
        }
    }

    /// Resolve the provider from `config` (see [`resolve_provider`]).
    pub fn from_config(config: &SessionConfig) -> Result<Self, Scan2SheetError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn run(&self, page_name: &str, image: Arc<DynamicImage>) -> Result<Vec<Row>, PageError> {
        let start = Instant::now();

        let max_edge = self.max_edge;
        let image_data = tokio::task::spawn_blocking(move || encode::encode_page(&image, max_edge))
            .await
            .map_err(|e| PageError::EncodeFailed {
                detail: format!("encode task panicked: {e}"),
            })??;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(USER_INSTRUCTION, vec![image_data]),
        ];
        let options = self.build_options();

        let response = timeout(
            Duration::from_secs(self.api_timeout_secs),
            self.provider.chat(&messages, Some(&options)),
        )
        .await
        .map_err(|_| PageError::Timeout {
            secs: self.api_timeout_secs,
        })?
        .map_err(|e| PageError::LlmFailed {
            detail: e.to_string(),
        })?;

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            page_name,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        postprocess::parse_rows(&response.content)
    }
}

impl PageExtractor for VisionExtractor {
    fn extract<'a>(
        &'a self,
        page_name: &'a str,
        image: Arc<DynamicImage>,
    ) -> BoxFuture<'a, Result<Vec<Row>, PageError>> {
        Box::pin(async move {
            let result = self.run(page_name, image).await;
            if let Err(ref e) = result {
                warn!("{}: extraction failed — {}", page_name, e);
            }
            result
        })
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Scan2SheetError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Scan2SheetError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `config.model`, or
///    [`DEFAULT_MODEL`].
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
///    when both are set.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set, so users holding several keys
///    get a stable default.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &SessionConfig) -> Result<Arc<dyn LLMProvider>, Scan2SheetError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Scan2SheetError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
