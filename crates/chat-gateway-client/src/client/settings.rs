//! Per-client settings derived from [`GatewayConfig`]

use super::session::Session;
use crate::protocol::{IdentifyPayload, IdentifyProperties, ResumePayload};
use chat_common::GatewayConfig;

#[derive(Debug, Clone)]
pub(crate) struct ClientSettings {
    /// `[shard_id, shard_count]`, sent in Identify when set
    pub shard: Option<[u32; 2]>,
    pub headers: Vec<(String, String)>,
    url: String,
    query: String,
    token: String,
    properties: IdentifyProperties,
    large_threshold: u32,
    intents: Option<u64>,
}

impl ClientSettings {
    pub(crate) fn new(config: &GatewayConfig, shard: Option<[u32; 2]>) -> Self {
        Self {
            shard,
            headers: vec![("User-Agent".to_string(), config.user_agent.clone())],
            url: config.url.clone(),
            query: format!("v={}&encoding={}", config.version, config.encoding.as_str()),
            token: config.token.clone(),
            properties: IdentifyProperties {
                os: config.identity.os.clone(),
                browser: config.identity.browser.clone(),
                device: config.identity.device.clone(),
            },
            large_threshold: config.large_threshold,
            intents: config.intents,
        }
    }

    pub(crate) fn shard_id(&self) -> u32 {
        self.shard.map_or(0, |[id, _]| id)
    }

    /// Endpoint for the next open; resumes go to the session's resume URL when it has one
    pub(crate) fn endpoint(&self, session: &Session) -> String {
        let base = session
            .resume_url
            .as_deref()
            .filter(|_| session.is_resumable())
            .unwrap_or(&self.url);
        format!("{}/?{}", base.trim_end_matches('/'), self.query)
    }

    pub(crate) fn identify(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.token.clone(),
            properties: self.properties.clone(),
            compress: false,
            large_threshold: self.large_threshold,
            shard: self.shard,
            intents: self.intents,
        }
    }

    /// `None` when there is no session to resume
    pub(crate) fn resume(&self, session: &Session) -> Option<ResumePayload> {
        let session_id = session.session_id.clone()?;
        Some(ResumePayload {
            token: self.token.clone(),
            session_id,
            seq: session.sequence.unwrap_or(0),
        })
    }
}
