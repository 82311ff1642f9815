use serde::{Deserialize, Serialize};

/// Closed set of index kinds the partition knows how to open.
///
/// `Customized` is the one open extension point: its readers come from a
/// factory registered by name. `Kv` and `Kkv` belong to key-value tables and
/// are never opened as inverted indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Normal,
    PrimaryKey,
    Range,
    Date,
    Spatial,
    Customized,
    Trie,
    Kv,
    Kkv,
}

impl IndexKind {
    pub fn is_inverted(&self) -> bool {
        !matches!(self, IndexKind::PrimaryKey | IndexKind::Kv | IndexKind::Kkv)
    }

    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Normal => "normal",
            IndexKind::PrimaryKey => "primary_key",
            IndexKind::Range => "range",
            IndexKind::Date => "date",
            IndexKind::Spatial => "spatial",
            IndexKind::Customized => "customized",
            IndexKind::Trie => "trie",
            IndexKind::Kv => "kv",
            IndexKind::Kkv => "kkv",
        }
    }
}
