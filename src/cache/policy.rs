//! TTL Policy
//!
//! Per-kind expiry table. Entity metadata lives for an hour; aggregate
//! lists churn faster and live 10-30 minutes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::key::KeyKind;
use crate::config::duration_str;
use crate::error::{Error, Result};

/// TTL assigned to each key kind on write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TtlPolicy {
    #[serde(with = "duration_str")]
    pub video: Duration,
    #[serde(with = "duration_str")]
    pub user: Duration,
    #[serde(with = "duration_str")]
    pub channel: Duration,
    #[serde(with = "duration_str")]
    pub tag: Duration,
    #[serde(with = "duration_str")]
    pub trending: Duration,
    #[serde(with = "duration_str")]
    pub popular_tags: Duration,
    #[serde(with = "duration_str")]
    pub tag_videos: Duration,
    #[serde(with = "duration_str")]
    pub channel_videos: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        const HOUR: Duration = Duration::from_secs(3600);
        Self {
            video: HOUR,
            user: HOUR,
            channel: HOUR,
            tag: HOUR,
            trending: Duration::from_secs(10 * 60),
            popular_tags: Duration::from_secs(30 * 60),
            tag_videos: Duration::from_secs(15 * 60),
            channel_videos: Duration::from_secs(15 * 60),
        }
    }
}

impl TtlPolicy {
    /// TTL for a key kind.
    pub fn ttl_for(&self, kind: KeyKind) -> Duration {
        match kind {
            KeyKind::Video => self.video,
            KeyKind::User => self.user,
            KeyKind::Channel => self.channel,
            KeyKind::Tag => self.tag,
            KeyKind::Trending => self.trending,
            KeyKind::PopularTags => self.popular_tags,
            KeyKind::TagVideos => self.tag_videos,
            KeyKind::ChannelVideos => self.channel_videos,
        }
    }

    /// Every kind must expire; a zero TTL would mean "never cache".
    pub fn validate(&self) -> Result<()> {
        let all = [
            KeyKind::Video,
            KeyKind::User,
            KeyKind::Channel,
            KeyKind::Tag,
            KeyKind::Trending,
            KeyKind::PopularTags,
            KeyKind::TagVideos,
            KeyKind::ChannelVideos,
        ];
        for kind in all {
            if self.ttl_for(kind).is_zero() {
                return Err(Error::ConfigValidation(format!(
                    "TTL for {} must be positive",
                    kind
                )));
            }
        }
        Ok(())
    }
}
