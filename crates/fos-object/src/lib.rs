//! fOS Object Loading
//!
//! Loading and lifecycle management for embedded objects (`<object>`,
//! `<embed>`, `<applet>`).
//!
//! For every embedded-object node the loader decides what the node resolves
//! to (an image, a nested document, an external module instance, or fallback
//! content) and drives that resource through parameter resolution, policy
//! checks, channel acquisition, handler instantiation and teardown.
//!
//! # Re-entrancy
//!
//! Almost every collaborator call (layout flushes, content policy, channel
//! cancellation, module spawn/stop) may run arbitrary code that calls back
//! into the same [`ObjectLoader`]. Collaborators therefore receive
//! `&mut ObjectLoader`, and every operation re-checks its own guard epoch
//! after such a call returns, abandoning its remaining work if a nested call
//! superseded it.
//!
//! # Example
//! ```rust,ignore
//! use fos_object::{ElementInfo, ObjectConfig, ObjectLoader, NodeId};
//!
//! let mut loader = ObjectLoader::new(ObjectConfig::default().into(), services);
//! let id = loader.bind(NodeId(7), ElementInfo::embed().with_type("image/png").with_src("a.png"));
//! loader.load_object(id, true, false)?;
//! loader.run_pending_tasks();
//! ```

pub mod channel;
pub mod config;
pub mod content;
pub mod element;
pub mod events;
pub mod host;
pub mod instance;
pub mod loader;
pub mod logging;
pub mod policy;
pub mod resolver;
pub mod sandbox;
pub mod target;
pub mod tasks;
pub mod uri;

pub use channel::{Channel, ChannelRequest, ChannelResponse, ChannelStatus, LoadFlags, RedirectVerdict};
pub use config::ObjectConfig;
pub use content::{Capabilities, FallbackReason, ObjectKind, ObjectState};
pub use element::{ElementInfo, ElementTag, Param};
pub use events::{CrashReport, ObjectEvent};
pub use host::{
    BlocklistState, ChannelProvider, ContentPolicy, DocumentHost, DocumentInfo, EventSink,
    ImageLoader, ModuleHost, ModuleState, Permission, PermissionStore, PlayPreview,
    PolicyContentType, PolicyDecision, PolicyRequest, Principal, RejectCategory, Services,
    SpawnRequest, StreamConsumer, SubDocumentLoader,
};
pub use instance::Instantiation;
pub use loader::ObjectLoader;
pub use policy::{PlayDecision, PolicyVerdict};
pub use resolver::{ContentSupport, ParamChanges, Parameters, Resolution, Resolver};
pub use sandbox::{SandboxFlag, SandboxFlags};
pub use target::{Epoch, Guard, InstanceHandle, Operation, TargetId};
pub use tasks::{TaskKind, TaskToken};

/// Host node identity of an embedded-object element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

/// Host layout frame identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

/// Network channel identity handed out by the [`ChannelProvider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Module instance identity handed out by the [`ModuleHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u64);

/// Sub-document (nested browsing context) identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubDocumentId(pub u64);

/// Object loading error
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("Unknown load target: {0:?}")]
    UnknownTarget(TargetId),

    #[error("Object is not bound to an active document")]
    NotInActiveDocument,

    #[error("No in-process handler for URI: {0}")]
    UnhandledScheme(String),

    #[error("Security check denied load of {0}")]
    SecurityDenied(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Request aborted")]
    Aborted,

    #[error("Request failed")]
    RequestFailed,

    #[error("Module spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Image load failed: {0}")]
    Image(String),

    #[error("Sub-document load failed: {0}")]
    Document(String),

    #[error("Unexpected object state: {0}")]
    UnexpectedState(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
