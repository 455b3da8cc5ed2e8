//! Cache Key Codec
//!
//! Maps a logical resource reference to its canonical key string:
//!
//! ```text
//! {namespace}:{kind}:{id}[:tf={timeframe}][:tags={t1,t2}][:p={page}][:n={limit}]
//! ```
//!
//! Ids and tags are percent-encoded, so no component can smuggle in a
//! separator, and dimensions are always emitted in the same order with a
//! label. Tags are normalized (trimmed, lowercased, deduplicated, sorted)
//! before joining, so any permutation of the same tag set yields one key.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::EntityKind;
use crate::error::{Error, Result};

// =============================================================================
// Key Kinds
// =============================================================================

/// Everything the cache can hold a key for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Video metadata
    Video,
    /// User metadata
    User,
    /// Channel metadata
    Channel,
    /// Tag metadata
    Tag,
    /// Trending video ids for a timeframe
    Trending,
    /// Most used tags
    PopularTags,
    /// Video ids carrying a tag set
    TagVideos,
    /// Video ids owned by a channel
    ChannelVideos,
}

impl KeyKind {
    /// Aggregate list kinds, in cascade order.
    pub const AGGREGATES: [KeyKind; 4] = [
        KeyKind::Trending,
        KeyKind::PopularTags,
        KeyKind::TagVideos,
        KeyKind::ChannelVideos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Video => "video",
            KeyKind::User => "user",
            KeyKind::Channel => "channel",
            KeyKind::Tag => "tag",
            KeyKind::Trending => "trending",
            KeyKind::PopularTags => "popular_tags",
            KeyKind::TagVideos => "tag_videos",
            KeyKind::ChannelVideos => "channel_videos",
        }
    }

    /// True for list-valued keys derived from many entities.
    pub fn is_aggregate(&self) -> bool {
        self.entity().is_none()
    }

    /// The entity kind for single-record keys.
    pub fn entity(&self) -> Option<EntityKind> {
        match self {
            KeyKind::Video => Some(EntityKind::Video),
            KeyKind::User => Some(EntityKind::User),
            KeyKind::Channel => Some(EntityKind::Channel),
            KeyKind::Tag => Some(EntityKind::Tag),
            _ => None,
        }
    }
}

impl From<EntityKind> for KeyKind {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Video => KeyKind::Video,
            EntityKind::User => KeyKind::User,
            EntityKind::Channel => KeyKind::Channel,
            EntityKind::Tag => KeyKind::Tag,
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Ok(KeyKind::Video),
            "user" => Ok(KeyKind::User),
            "channel" => Ok(KeyKind::Channel),
            "tag" => Ok(KeyKind::Tag),
            "trending" => Ok(KeyKind::Trending),
            "popular_tags" => Ok(KeyKind::PopularTags),
            "tag_videos" => Ok(KeyKind::TagVideos),
            "channel_videos" => Ok(KeyKind::ChannelVideos),
            other => Err(Error::ConfigValidation(format!(
                "unsupported cache key kind: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Dimensions
// =============================================================================

/// Trending window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Hour,
    Day,
    Week,
    Month,
}

impl Timeframe {
    /// Every timeframe, used by the invalidation cascade.
    pub const ALL: [Timeframe; 4] = [
        Timeframe::Hour,
        Timeframe::Day,
        Timeframe::Week,
        Timeframe::Month,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Hour => "1h",
            Timeframe::Day => "24h",
            Timeframe::Week => "7d",
            Timeframe::Month => "30d",
        }
    }

    pub fn hours(&self) -> u32 {
        match self {
            Timeframe::Hour => 1,
            Timeframe::Day => 24,
            Timeframe::Week => 24 * 7,
            Timeframe::Month => 24 * 30,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional disambiguating dimensions of a resource reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dimensions {
    timeframe: Option<Timeframe>,
    tags: BTreeSet<String>,
    page: Option<u32>,
    limit: Option<usize>,
}

impl Dimensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    /// Add tags. Order and case do not matter; blanks are ignored.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            let tag = tag.as_ref().trim().to_lowercase();
            if !tag.is_empty() {
                self.tags.insert(tag);
            }
        }
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn get_timeframe(&self) -> Option<Timeframe> {
        self.timeframe
    }

    /// Normalized tags in canonical order.
    pub fn get_tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn get_page(&self) -> Option<u32> {
        self.page
    }

    pub fn get_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.timeframe.is_none()
            && self.tags.is_empty()
            && self.page.is_none()
            && self.limit.is_none()
    }

    fn encode_into(&self, out: &mut String) {
        if let Some(tf) = self.timeframe {
            out.push_str(":tf=");
            out.push_str(tf.as_str());
        }
        if !self.tags.is_empty() {
            out.push_str(":tags=");
            let encoded: Vec<_> = self.tags.iter().map(|t| urlencoding::encode(t)).collect();
            out.push_str(&encoded.join(","));
        }
        if let Some(page) = self.page {
            out.push_str(&format!(":p={}", page));
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!(":n={}", limit));
        }
    }
}

// =============================================================================
// Cache Key
// =============================================================================

/// Canonical cache key. Only [`KeyCodec`] constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Key Codec
// =============================================================================

/// Pure, stateless key builder bound to a namespace.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    namespace: String,
}

impl KeyCodec {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the key for `(kind, id, dims)`.
    pub fn key_for(&self, kind: KeyKind, id: &str, dims: &Dimensions) -> CacheKey {
        let mut out = self.kind_prefix(kind);
        out.push_str(&urlencoding::encode(id));
        dims.encode_into(&mut out);
        CacheKey(out)
    }

    /// Key for a single entity with no dimensions.
    pub fn entity_key(&self, kind: EntityKind, id: &str) -> CacheKey {
        self.key_for(kind.into(), id, &Dimensions::default())
    }

    /// Prefix shared by every key of `kind`.
    pub fn kind_prefix(&self, kind: KeyKind) -> String {
        format!("{}:{}:", self.namespace, kind.as_str())
    }

    /// Prefix shared by every key of one aggregate owner, all dimensions included.
    pub fn owner_prefix(&self, kind: KeyKind, id: &str) -> String {
        format!("{}{}:", self.kind_prefix(kind), urlencoding::encode(id))
    }

    /// Prefix shared by every key in the namespace.
    pub fn namespace_prefix(&self) -> String {
        format!("{}:", self.namespace)
    }
}

// =============================================================================
// Tests
// =============================================================================
