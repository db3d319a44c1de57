//! Models - resolve a requested model name against the configured backends

use serde::{Deserialize, Serialize};

/// Which backend a request asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum ModelSelection {
    /// A configured local model (the default when nothing matched)
    Local(String),
    /// The caller named the cloud backend explicitly
    ForcedCloud,
}

impl ModelSelection {
    pub fn is_forced_cloud(&self) -> bool {
        matches!(self, ModelSelection::ForcedCloud)
    }

    pub fn local_model(&self) -> Option<&str> {
        match self {
            ModelSelection::Local(m) => Some(m),
            ModelSelection::ForcedCloud => None,
        }
    }
}

/// Outcome of resolution, including the cache routing hint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub selection: ModelSelection,
    /// Explicit requested name, else the resolved local model, else `"cloud"`
    pub routing_hint: String,
}

/// Configured local models plus the cloud model name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    local_models: Vec<String>,
    default_local: String,
    cloud_model: String,
}

impl ModelCatalog {
    /// `default_local` is added to the list when missing.
    pub fn new(local_models: Vec<String>, default_local: &str, cloud_model: &str) -> Self {
        let mut local_models: Vec<String> = local_models
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if !local_models.iter().any(|m| m == default_local) {
            local_models.push(default_local.to_string());
        }

        Self {
            local_models,
            default_local: default_local.to_string(),
            cloud_model: cloud_model.to_string(),
        }
    }

    pub fn local_models(&self) -> &[String] {
        &self.local_models
    }

    pub fn default_local(&self) -> &str {
        &self.default_local
    }

    pub fn cloud_model(&self) -> &str {
        &self.cloud_model
    }

    /// Match a name against the local models: exact, then case-insensitive,
    /// then case-insensitive prefix. Ties go to the first model in configured order.
    pub fn match_local(&self, requested: &str) -> Option<&str> {
        let requested = requested.trim();
        if requested.is_empty() {
            return None;
        }
        let lower = requested.to_lowercase();

        self.local_models
            .iter()
            .find(|m| m.as_str() == requested)
            .or_else(|| self.local_models.iter().find(|m| m.to_lowercase() == lower))
            .or_else(|| {
                self.local_models
                    .iter()
                    .find(|m| m.to_lowercase().starts_with(&lower))
            })
            .map(String::as_str)
    }

    fn names_cloud(&self, requested: &str) -> bool {
        let lower = requested.trim().to_lowercase();
        !lower.is_empty()
            && (lower == self.cloud_model.to_lowercase()
                || lower == "cloud"
                || lower == "claude"
                || lower.starts_with("cloud"))
    }

    pub fn resolve(&self, requested: Option<&str>) -> Resolution {
        let requested = requested.map(str::trim).filter(|r| !r.is_empty());

        let Some(name) = requested else {
            return Resolution {
                selection: ModelSelection::Local(self.default_local.clone()),
                routing_hint: self.default_local.clone(),
            };
        };

        let selection = if let Some(local) = self.match_local(name) {
            ModelSelection::Local(local.to_string())
        } else if self.names_cloud(name) {
            ModelSelection::ForcedCloud
        } else {
            ModelSelection::Local(self.default_local.clone())
        };

        Resolution {
            selection,
            routing_hint: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(
            vec![
                "llama3.2:latest".to_string(),
                "llama3.1:8b-instruct-q4_K_M".to_string(),
                "Mistral:7b".to_string(),
            ],
            "llama3.2:latest",
            "claude-3-haiku-20240307",
        )
    }

    #[test]
    fn test_no_model_uses_default() {
        let r = catalog().resolve(None);
        assert_eq!(r.selection, ModelSelection::Local("llama3.2:latest".into()));
        assert_eq!(r.routing_hint, "llama3.2:latest");

        let r = catalog().resolve(Some("   "));
        assert_eq!(r.routing_hint, "llama3.2:latest");
    }

    #[test]
    fn test_exact_and_case_insensitive_match() {
        let c = catalog();
        assert_eq!(c.match_local("Mistral:7b"), Some("Mistral:7b"));
        assert_eq!(c.match_local("mistral:7B"), Some("Mistral:7b"));
    }

    #[test]
    fn test_prefix_tie_break_is_configured_order() {
        // "llama3" prefixes both llama entries; the first configured wins.
        let r = catalog().resolve(Some("LLAMA3"));
        assert_eq!(r.selection, ModelSelection::Local("llama3.2:latest".into()));
        assert_eq!(r.routing_hint, "LLAMA3");

        let reordered = ModelCatalog::new(
            vec!["llama3.1:8b-instruct-q4_K_M".into(), "llama3.2:latest".into()],
            "llama3.2:latest",
            "claude-3-haiku-20240307",
        );
        assert_eq!(reordered.match_local("llama3"), Some("llama3.1:8b-instruct-q4_K_M"));
    }

    #[test]
    fn test_exact_match_beats_earlier_prefix() {
        let c = ModelCatalog::new(
            vec!["llama3.2:latest-q8".into(), "llama3.2:latest".into()],
            "llama3.2:latest",
            "claude",
        );
        assert_eq!(c.match_local("llama3.2:latest"), Some("llama3.2:latest"));
    }

    #[test]
    fn test_cloud_names_force_cloud() {
        let c = catalog();
        for name in ["claude-3-haiku-20240307", "cloud", "Claude", "cloud-best", "CLOUD"] {
            let r = c.resolve(Some(name));
            assert!(r.selection.is_forced_cloud(), "{} should force cloud", name);
            assert_eq!(r.routing_hint, name);
            assert_eq!(r.selection.local_model(), None);
        }
    }

    #[test]
    fn test_unknown_name_falls_back_to_default_but_keeps_hint() {
        let r = catalog().resolve(Some("gpt-4o"));
        assert_eq!(r.selection, ModelSelection::Local("llama3.2:latest".into()));
        assert_eq!(r.routing_hint, "gpt-4o");
    }

    #[test]
    fn test_default_added_when_missing() {
        let c = ModelCatalog::new(vec![" ".into()], "phi3:mini", "claude");
        assert_eq!(c.local_models(), &["phi3:mini".to_string()]);
    }
}
