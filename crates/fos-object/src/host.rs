//! Host Interfaces
//!
//! Request/response traits for everything the loader does not own: the
//! document and layout, content policy, the network, the module host,
//! permission storage, image and sub-document loading, and event delivery.
//!
//! Methods that receive `&mut ObjectLoader` may call back into the loader.

use std::rc::Rc;
use std::time::Duration;

use url::{Origin, Url};

use crate::channel::{Channel, ChannelRequest, ChannelStatus, LoadFlags};
use crate::content::ObjectState;
use crate::events::ObjectEvent;
use crate::loader::ObjectLoader;
use crate::sandbox::SandboxFlags;
use crate::{ChannelId, FrameId, InstanceId, NodeId, ObjectError, SubDocumentId};

/// Security principal of a document or node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Privileged browser code
    System,
    Content(Origin),
}

impl Principal {
    pub fn for_url(url: &Url) -> Self {
        Self::Content(url.origin())
    }

    /// A fresh opaque origin, equal to nothing else
    pub fn opaque() -> Self {
        Self::Content(Origin::new_opaque())
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }
}

/// What the owner document looks like from a given node
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    /// Node is attached to its document tree
    pub in_document: bool,
    /// Owner document is the active document of its window
    pub active: bool,
    /// Static clone (print preview)
    pub static_document: bool,
    pub used_as_image: bool,
    pub loaded_as_data: bool,
    pub base_uri: Option<Url>,
    pub document_uri: Option<Url>,
    /// Principal of the node
    pub principal: Principal,
    /// Principal of the top-level document, if there is a window
    pub top_principal: Option<Principal>,
    pub sandbox: Option<SandboxFlags>,
    pub svg_enabled: bool,
}

impl DocumentInfo {
    /// An attached node in an active, unsandboxed top-level document
    pub fn active(document_uri: Url) -> Self {
        let principal = Principal::for_url(&document_uri);
        Self {
            in_document: true,
            active: true,
            static_document: false,
            used_as_image: false,
            loaded_as_data: false,
            base_uri: Some(document_uri.clone()),
            document_uri: Some(document_uri),
            top_principal: Some(principal.clone()),
            principal,
            sandbox: None,
            svg_enabled: true,
        }
    }

    pub fn in_active_document(&self) -> bool {
        self.in_document && self.active
    }

    pub fn origin_sandboxed(&self) -> bool {
        self.sandbox.as_ref().is_some_and(SandboxFlags::sandboxes_origin)
    }
}

/// Content policy load type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyContentType {
    Object,
    Image,
    Document,
}

#[derive(Debug, Clone)]
pub struct PolicyRequest {
    pub node: NodeId,
    pub content_type: PolicyContentType,
    pub uri: Option<Url>,
    pub principal: Principal,
    pub mime: String,
}

/// Why a content policy rejected a load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCategory {
    /// Rejected because of the content type
    Type,
    Request,
    Server,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Accept,
    Reject(RejectCategory),
}

/// Module enabled state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Disabled,
    ClickToPlay,
    Enabled,
}

/// Module blocklist state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlocklistState {
    #[default]
    NotBlocked,
    Outdated,
    VulnerableUpdatable,
    VulnerableNoUpdate,
    Blocked,
}

/// Play-preview registration for a content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayPreview {
    /// Show the preview even when the module would play or is missing
    pub ignore_click_to_play: bool,
}

/// Stored per-site permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allow,
    Deny,
    Prompt,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub node: NodeId,
    pub mime: String,
    pub uri: Option<Url>,
}

/// Document, layout and event-loop access
pub trait DocumentHost {
    fn document_info(&self, node: NodeId) -> DocumentInfo;

    fn primary_frame(&self, node: NodeId) -> Option<FrameId>;

    /// Flush pending layout; may construct or destroy frames
    fn flush_layout(&self, loader: &mut ObjectLoader, node: NodeId);

    fn content_state_changed(&self, loader: &mut ObjectLoader, node: NodeId, changed: ObjectState);

    /// Construct pending frames now
    fn flush_frames(&self, loader: &mut ObjectLoader, node: NodeId);

    fn recreate_frames(&self, loader: &mut ObjectLoader, node: NodeId);

    fn event_loop_nesting_level(&self) -> u32;

    fn suspend_native(&self) {}

    fn resume_native(&self) {}

    fn is_safe_to_run_script(&self) -> bool {
        true
    }
}

/// Content policy and security manager
pub trait ContentPolicy {
    fn check_load(&self, loader: &mut ObjectLoader, request: &PolicyRequest) -> PolicyDecision;

    fn check_process(&self, loader: &mut ObjectLoader, request: &PolicyRequest) -> PolicyDecision;

    /// Whether `principal` may load `uri` at all
    fn check_load_uri(&self, principal: &Principal, uri: &Url) -> bool;
}

/// Network request factory
pub trait ChannelProvider {
    /// Whether an in-process protocol handler exists for the URI's scheme
    fn can_handle(&self, uri: &Url) -> bool;

    fn open(&self, loader: &mut ObjectLoader, request: &ChannelRequest) -> Result<ChannelId, ObjectError>;

    fn cancel(&self, loader: &mut ObjectLoader, channel: ChannelId);

    fn set_content_type(&self, _channel: ChannelId, _content_type: &str) {}

    fn set_load_flags(&self, _channel: ChannelId, _flags: LoadFlags) {}
}

/// External module registry and instance host
pub trait ModuleHost {
    fn module_exists_for_type(&self, mime: &str) -> bool;

    /// MIME type of an enabled module registered for a file extension
    fn module_for_extension(&self, extension: &str) -> Option<String>;

    fn enabled_state(&self, mime: &str) -> ModuleState;

    fn blocklist_state(&self, mime: &str) -> BlocklistState;

    fn play_preview(&self, mime: &str) -> Option<PlayPreview>;

    /// Permission-store key for the module handling `mime`
    fn permission_key(&self, mime: &str) -> String;

    fn spawn(&self, loader: &mut ObjectLoader, request: &SpawnRequest) -> Result<InstanceId, ObjectError>;

    fn stop(&self, loader: &mut ObjectLoader, instance: InstanceId);

    fn module_name(&self, instance: InstanceId) -> String;

    fn set_frame(&self, instance: InstanceId, frame: Option<FrameId>);

    /// Stream consumer feeding a channel into a running instance
    fn new_stream_sink(
        &self,
        instance: InstanceId,
        uri: Option<&Url>,
    ) -> Result<Rc<dyn StreamConsumer>, ObjectError>;
}

/// Per-site permission storage
pub trait PermissionStore {
    fn test(&self, principal: &Principal, key: &str) -> Permission;

    /// Extend a grant's sliding expiry
    fn refresh_expiry(&self, principal: &Principal, key: &str, session: Duration, persistent: Duration);
}

/// Image loading for object elements
pub trait ImageLoader {
    fn is_supported(&self, mime: &str) -> bool;

    fn load_with_channel(
        &self,
        loader: &mut ObjectLoader,
        node: NodeId,
        channel: &Channel,
    ) -> Result<Rc<dyn StreamConsumer>, ObjectError>;

    /// Cancel outstanding image requests without notifying
    fn cancel(&self, node: NodeId);

    fn image_state(&self, _node: NodeId) -> ObjectState {
        ObjectState::EMPTY
    }
}

/// Nested browsing contexts
pub trait SubDocumentLoader {
    fn is_supported(&self, mime: &str) -> bool;

    fn create(&self, node: NodeId, network_created: bool) -> Option<SubDocumentId>;

    fn is_recursive_load(&self, sub: SubDocumentId, uri: &Url) -> bool;

    fn open(
        &self,
        loader: &mut ObjectLoader,
        sub: SubDocumentId,
        channel: &Channel,
    ) -> Result<Rc<dyn StreamConsumer>, ObjectError>;

    fn destroy(&self, sub: SubDocumentId);
}

/// Trusted event delivery
pub trait EventSink {
    fn dispatch(&self, node: NodeId, event: &ObjectEvent);
}

/// Terminal consumer of a channel's data
pub trait StreamConsumer {
    fn on_start_request(&self, loader: &mut ObjectLoader, channel: &Channel) -> Result<(), ObjectError>;

    fn on_data_available(
        &self,
        loader: &mut ObjectLoader,
        channel: &Channel,
        data: &[u8],
    ) -> Result<(), ObjectError>;

    fn on_stop_request(&self, loader: &mut ObjectLoader, channel: &Channel, status: ChannelStatus);
}

/// Collaborator handles shared by a loader
#[derive(Clone)]
pub struct Services {
    pub document: Rc<dyn DocumentHost>,
    pub policy: Rc<dyn ContentPolicy>,
    pub network: Rc<dyn ChannelProvider>,
    pub modules: Rc<dyn ModuleHost>,
    pub permissions: Rc<dyn PermissionStore>,
    pub images: Rc<dyn ImageLoader>,
    pub frames: Rc<dyn SubDocumentLoader>,
    pub events: Rc<dyn EventSink>,
}

impl Services {
    /// Use one host object for every collaborator
    pub fn uniform<H>(host: Rc<H>) -> Self
    where
        H: DocumentHost
            + ContentPolicy
            + ChannelProvider
            + ModuleHost
            + PermissionStore
            + ImageLoader
            + SubDocumentLoader
            + EventSink
            + 'static,
    {
        Self {
            document: host.clone(),
            policy: host.clone(),
            network: host.clone(),
            modules: host.clone(),
            permissions: host.clone(),
            images: host.clone(),
            frames: host.clone(),
            events: host,
        }
    }
}
