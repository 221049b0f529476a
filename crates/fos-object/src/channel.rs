//! Channel Manager
//!
//! Lifecycle of the single outstanding network request of a load target:
//! open, redirect, cancel, and forwarding of start/data/stop to the final
//! consumer.

use std::rc::Rc;

use url::Url;

use crate::content::ObjectKind;
use crate::host::Principal;
use crate::loader::ObjectLoader;
use crate::target::TargetId;
use crate::uri;
use crate::{ChannelId, NodeId, ObjectError};

/// Channel load flags.
///
/// Multiple flags can be combined using the `|` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags(u32);

impl LoadFlags {
    pub const NONE: Self = Self(0);
    pub const CALL_CONTENT_SNIFFERS: Self = Self(1 << 0);
    pub const CLASSIFY_URI: Self = Self(1 << 1);
    /// Channel loads a document (fires onload)
    pub const DOCUMENT_URI: Self = Self(1 << 2);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for LoadFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for LoadFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The tracked network request of a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    /// URI the request was opened for
    pub uri: Url,
    /// URI after redirects
    pub final_uri: Url,
    /// Reported MIME type; empty until the response starts
    pub content_type: String,
    pub load_flags: LoadFlags,
}

impl Channel {
    pub fn new(id: ChannelId, uri: Url, load_flags: LoadFlags) -> Self {
        Self {
            id,
            final_uri: uri.clone(),
            uri,
            content_type: String::new(),
            load_flags,
        }
    }
}

/// Everything a [`ChannelProvider`](crate::ChannelProvider) needs to open a request
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub node: NodeId,
    pub uri: Url,
    /// Owner of the loaded content; opaque for origin-sandboxed documents
    pub principal: Principal,
    pub load_flags: LoadFlags,
    pub referrer: Option<Url>,
    /// Tag name of the requesting element
    pub initiator: &'static str,
    pub origin_sandboxed: bool,
}

/// Response metadata delivered with `on_start_request`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelResponse {
    pub content_type: String,
    /// Final URI if the request was redirected
    pub final_uri: Option<Url>,
    pub succeeded: bool,
}

impl ChannelResponse {
    pub fn ok(content_type: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            final_uri: None,
            succeeded: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            content_type: String::new(),
            final_uri: None,
            succeeded: false,
        }
    }

    pub fn redirected_to(mut self, uri: Url) -> Self {
        self.final_uri = Some(uri);
        self
    }
}

/// Terminal status of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Complete,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectVerdict {
    Accept,
    Abort,
}

impl ObjectLoader {
    /// Open a channel for the target's effective URI
    pub(crate) fn open_channel(&mut self, id: TargetId) -> Result<(), ObjectError> {
        let target = self.target_mut(id)?;
        target.channel = None;
        let node = target.node;
        let tag = target.element.tag;
        let uri = match target.params.uri.clone() {
            Some(uri) if self.services.network.can_handle(&uri) => uri,
            Some(uri) => return Err(ObjectError::UnhandledScheme(uri.to_string())),
            None => return Err(ObjectError::UnexpectedState("no URI to open")),
        };

        let info = self.services.document.document_info(node);
        if !self.services.policy.check_load_uri(&info.principal, &uri) {
            return Err(ObjectError::SecurityDenied(uri.to_string()));
        }

        let origin_sandboxed = info.origin_sandboxed();
        let principal = if origin_sandboxed {
            Principal::opaque()
        } else {
            info.principal.clone()
        };
        let request = ChannelRequest {
            node,
            uri: uri.clone(),
            principal,
            load_flags: LoadFlags::CALL_CONTENT_SNIFFERS | LoadFlags::CLASSIFY_URI,
            referrer: info.document_uri.clone(),
            initiator: tag.name(),
            origin_sandboxed,
        };

        let network = Rc::clone(&self.services.network);
        let channel_id = network.open(self, &request)?;

        let Some(target) = self.targets.get_mut(id) else {
            network.cancel(self, channel_id);
            return Err(ObjectError::UnknownTarget(id));
        };
        if target.channel.is_some() {
            tracing::warn!("Channel opened re-entrantly, dropping {:?}", channel_id);
            network.cancel(self, channel_id);
            return Err(ObjectError::Aborted);
        }
        target.channel = Some(Channel::new(channel_id, uri, request.load_flags));
        tracing::debug!("Channel {:?} opened for {}", channel_id, request.uri);
        Ok(())
    }

    /// Cancel the tracked channel and abort its consumer.
    ///
    /// The channel and consumer are detached before either is called.
    pub(crate) fn close_channel(&mut self, id: TargetId) {
        let Some(target) = self.targets.get_mut(id) else {
            return;
        };
        let Some(channel) = target.channel.take() else {
            return;
        };
        let listener = target.final_listener.take();
        tracing::debug!("Closing channel {:?}", channel.id);

        let network = Rc::clone(&self.services.network);
        network.cancel(self, channel.id);
        if let Some(listener) = listener {
            listener.on_stop_request(self, &channel, ChannelStatus::Aborted);
        }
    }

    /// Redirect notification; only the tracked channel may move
    pub fn on_redirect(&mut self, id: TargetId, old: ChannelId, new: ChannelId) -> RedirectVerdict {
        match self.targets.get_mut(id).and_then(|t| t.channel.as_mut()) {
            Some(channel) if channel.id == old => {
                tracing::debug!("Following redirect {:?} -> {:?}", old, new);
                channel.id = new;
                RedirectVerdict::Accept
            }
            _ => {
                tracing::warn!("Refusing redirect of untracked channel {:?}", old);
                RedirectVerdict::Abort
            }
        }
    }

    /// Response headers arrived for a channel
    pub fn on_start_request(
        &mut self,
        id: TargetId,
        channel_id: ChannelId,
        response: ChannelResponse,
    ) -> Result<(), ObjectError> {
        let target = self.target_mut(id)?;
        let channel = match target.channel.as_mut() {
            Some(channel) if channel.id == channel_id => channel,
            _ => {
                tracing::warn!("OnStartRequest for untracked channel {:?}", channel_id);
                return Err(ObjectError::Aborted);
            }
        };
        channel.content_type = uri::parse_mime(&response.content_type);
        if let Some(final_uri) = response.final_uri.clone() {
            channel.final_uri = final_uri;
        }
        let channel = channel.clone();

        // A running module takes the stream directly
        if target.kind == ObjectKind::Module {
            if target.instance.is_none() {
                tracing::error!("Channel opened in module mode without an instance");
                return Err(ObjectError::Aborted);
            }
            let listener = self.make_module_listener(id).map_err(|e| {
                tracing::error!("Failed to create module stream listener: {}", e);
                ObjectError::Aborted
            })?;
            return listener.on_start_request(self, &channel);
        }

        if target.kind != ObjectKind::Loading {
            tracing::error!("Channel started while not loading ({:?})", target.kind);
            return Err(ObjectError::Aborted);
        }
        if target.channel_loaded || target.final_listener.is_some() {
            tracing::error!("Channel started twice for the same pass");
        }
        target.channel_loaded = true;

        if !response.succeeded {
            tracing::info!("Request for {} failed", channel.uri);
            // channel_loaded without a channel marks the failure
            target.channel = None;
            if let Err(e) = self.load_object(id, true, false) {
                tracing::debug!("Fallback load after failed request: {}", e);
            }
            return Err(ObjectError::RequestFailed);
        }

        self.load_object_with_channel(id, true, false, Some(channel_id))
    }

    /// Response data arrived for a channel
    pub fn on_data_available(
        &mut self,
        id: TargetId,
        channel_id: ChannelId,
        data: &[u8],
    ) -> Result<(), ObjectError> {
        let target = self.target_mut(id)?;
        let channel = match &target.channel {
            Some(channel) if channel.id == channel_id => channel.clone(),
            _ => return Err(ObjectError::Aborted),
        };

        match target.final_listener.clone() {
            Some(listener) => listener.on_data_available(self, &channel, data),
            None => {
                tracing::error!("Data for channel {:?} without a consumer", channel_id);
                target.channel = None;
                Err(ObjectError::UnexpectedState("data without a consumer"))
            }
        }
    }

    /// A channel finished
    pub fn on_stop_request(
        &mut self,
        id: TargetId,
        channel_id: ChannelId,
        status: ChannelStatus,
    ) -> Result<(), ObjectError> {
        let target = self.target_mut(id)?;
        let channel = match target.channel.take() {
            Some(channel) if channel.id == channel_id => channel,
            other => {
                target.channel = other;
                return Err(ObjectError::Aborted);
            }
        };

        if let Some(listener) = target.final_listener.take() {
            listener.on_stop_request(self, &channel, status);
        }
        Ok(())
    }
}
