use serde::{Deserialize, Serialize};

/// How drawings are written into the document on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedPolicy {
    /// Separate annotation object that can be re-extracted and removed later.
    #[default]
    Editable,
    /// Strokes flattened into the page content; nothing editable remains.
    BurnIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InkPreferences {
    pub sidecar_extension: String,
    pub import_sidecar_on_open: bool,
    pub embed_policy: EmbedPolicy,
    /// When off, saves delete any existing sidecar instead of rewriting it.
    pub write_interchange: bool,
}

impl Default for InkPreferences {
    fn default() -> Self {
        Self {
            sidecar_extension: "json".to_owned(),
            import_sidecar_on_open: true,
            embed_policy: EmbedPolicy::Editable,
            write_interchange: true,
        }
    }
}
