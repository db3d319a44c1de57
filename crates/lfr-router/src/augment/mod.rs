//! Augmentation - optional context spliced into a conversation before inference
//!
//! Augmenters wrap external collaborators (a search backend, an image text
//! reader) that this crate does not implement. A failing augmenter never fails
//! the request: the pipeline logs it and carries on without its context.

use async_trait::async_trait;
use lfr_llm::{Role, Turn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a context block goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// A new system turn immediately before the final user turn
    BeforeLastUser,
    /// Prepended to the text of the turn at this index, blank-line separated
    PrefixTurn(usize),
}

/// A piece of context produced by an augmenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub placement: Placement,
    pub text: String,
}

impl ContextBlock {
    pub fn before_last_user(text: impl Into<String>) -> Self {
        Self {
            placement: Placement::BeforeLastUser,
            text: text.into(),
        }
    }

    pub fn prefix_turn(index: usize, text: impl Into<String>) -> Self {
        Self {
            placement: Placement::PrefixTurn(index),
            text: text.into(),
        }
    }
}

/// Produces context for a conversation. An empty result means "nothing to add".
#[async_trait]
pub trait Augmenter: Send + Sync {
    fn name(&self) -> &str;

    async fn augment(&self, turns: &[Turn]) -> anyhow::Result<Vec<ContextBlock>>;
}

/// Search backend returning pre-formatted snippets for a query
#[async_trait]
pub trait SnippetSource: Send + Sync {
    async fn snippets(&self, query: &str) -> anyhow::Result<Option<String>>;
}

/// Reads text out of an image payload
#[async_trait]
pub trait ImageTextReader: Send + Sync {
    async fn read_text(&self, image: &str) -> anyhow::Result<Option<String>>;
}

/// Fixed wrapper around search snippets
pub fn search_preamble(snippets: &str) -> String {
    format!(
        "Web search was performed to get current and relevant information. \
         Here are the search results:\n\n{}\n\n\
         Use this information to provide an accurate, up-to-date answer to the user's question. \
         If the search results don't contain relevant information for the question, \
         you can still answer based on your knowledge.",
        snippets
    )
}

/// Injects search snippets for the final user turn
pub struct SearchAugmenter<S> {
    source: S,
}

impl<S: SnippetSource> SearchAugmenter<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: SnippetSource> Augmenter for SearchAugmenter<S> {
    fn name(&self) -> &str {
        "web_search"
    }

    async fn augment(&self, turns: &[Turn]) -> anyhow::Result<Vec<ContextBlock>> {
        let query = match turns.last() {
            Some(turn) if turn.role == Role::User && !turn.text.trim().is_empty() => &turn.text,
            _ => return Ok(Vec::new()),
        };

        match self.source.snippets(query).await? {
            Some(snippets) if !snippets.trim().is_empty() => {
                debug!(chars = snippets.len(), "search snippets injected");
                Ok(vec![ContextBlock::before_last_user(search_preamble(&snippets))])
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Prepends text read from attached images to their turns
pub struct ImageTextAugmenter<R> {
    reader: R,
}

impl<R: ImageTextReader> ImageTextAugmenter<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: ImageTextReader> Augmenter for ImageTextAugmenter<R> {
    fn name(&self) -> &str {
        "image_text"
    }

    async fn augment(&self, turns: &[Turn]) -> anyhow::Result<Vec<ContextBlock>> {
        let mut blocks = Vec::new();

        for (index, turn) in turns.iter().enumerate() {
            let Some(image) = turn.image.as_deref() else {
                continue;
            };
            // One unreadable image should not drop the text of the others.
            match self.reader.read_text(image).await {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    blocks.push(ContextBlock::prefix_turn(
                        index,
                        format!("Text extracted from attached image:\n\n{}", text.trim()),
                    ));
                }
                Ok(_) => debug!(turn = index, "image contained no text"),
                Err(e) => warn!(turn = index, error = %e, "image text extraction failed"),
            }
        }

        Ok(blocks)
    }
}

/// Splice blocks into a copy of `turns`.
///
/// Prefix blocks address indices of the original conversation, so they are
/// applied before any turn is inserted.
pub fn apply(turns: &[Turn], blocks: &[ContextBlock]) -> Vec<Turn> {
    let mut out = turns.to_vec();

    for block in blocks {
        if let Placement::PrefixTurn(index) = block.placement {
            if let Some(turn) = out.get_mut(index) {
                turn.text = if turn.text.is_empty() {
                    block.text.clone()
                } else {
                    format!("{}\n\n{}", block.text, turn.text)
                };
            }
        }
    }

    let inserts: Vec<Turn> = blocks
        .iter()
        .filter(|b| b.placement == Placement::BeforeLastUser)
        .map(|b| Turn::system(b.text.clone()))
        .collect();

    if !inserts.is_empty() {
        let at = out
            .iter()
            .rposition(|t| t.role == Role::User)
            .unwrap_or(out.len());
        out.splice(at..at, inserts);
    }

    out
}

/// Conversation after augmentation
#[derive(Debug, Clone, PartialEq)]
pub struct Augmented {
    pub turns: Vec<Turn>,
    /// Names of the augmenters that contributed
    pub applied: Vec<String>,
}

/// Runs augmenters in order against the caller's turns
#[derive(Clone, Default)]
pub struct AugmentationPipeline {
    augmenters: Vec<Arc<dyn Augmenter>>,
}

impl AugmentationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, augmenter: Arc<dyn Augmenter>) -> Self {
        self.augmenters.push(augmenter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.augmenters.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.augmenters.iter().map(|a| a.name().to_string()).collect()
    }

    pub async fn run(&self, turns: &[Turn]) -> Augmented {
        let mut blocks = Vec::new();
        let mut applied = Vec::new();

        for augmenter in &self.augmenters {
            match augmenter.augment(turns).await {
                Ok(found) if !found.is_empty() => {
                    applied.push(augmenter.name().to_string());
                    blocks.extend(found);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(augmenter = augmenter.name(), error = %e, "augmentation skipped");
                }
            }
        }

        Augmented {
            turns: apply(turns, &blocks),
            applied,
        }
    }
}

impl std::fmt::Debug for AugmentationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AugmentationPipeline")
            .field("augmenters", &self.names())
            .finish()
    }
}
