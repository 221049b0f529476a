//! Type Resolver
//!
//! Computes what an element should load from its attributes, its
//! capabilities, the parameters seen on the previous pass and, when one has
//! been loaded, the channel's reported content type.
//!
//! The override order for channel-informed types is kept exactly as it has
//! always behaved; several branches overlap and are candidates for
//! simplification once content relying on them is gone.

use url::Url;

use crate::channel::Channel;
use crate::config::ObjectConfig;
use crate::content::{Capabilities, ObjectKind};
use crate::element::{ElementInfo, ElementTag};
use crate::host::Services;
use crate::uri;

/// Handler availability queries used to classify a MIME type
pub trait ContentSupport {
    fn is_supported_image(&self, mime: &str) -> bool;
    fn is_supported_document(&self, mime: &str) -> bool;
    fn svg_enabled(&self) -> bool;
    fn module_exists_for_type(&self, mime: &str) -> bool;
    /// MIME type of an enabled module registered for the URI's extension
    fn module_for_extension(&self, uri: &Url) -> Option<String>;
}

/// [`ContentSupport`] backed by the loader's collaborators
pub(crate) struct HostSupport<'a> {
    pub services: &'a Services,
    pub svg_enabled: bool,
}

impl ContentSupport for HostSupport<'_> {
    fn is_supported_image(&self, mime: &str) -> bool {
        self.services.images.is_supported(mime)
    }

    fn is_supported_document(&self, mime: &str) -> bool {
        self.services.frames.is_supported(mime)
    }

    fn svg_enabled(&self) -> bool {
        self.svg_enabled
    }

    fn module_exists_for_type(&self, mime: &str) -> bool {
        self.services.modules.module_exists_for_type(mime)
    }

    fn module_for_extension(&self, uri: &Url) -> Option<String> {
        let ext = uri::file_extension(uri)?;
        self.services.modules.module_for_extension(&ext)
    }
}

/// Classify a MIME type for an element with the given capabilities
pub fn kind_of(mime: &str, caps: Capabilities, support: &dyn ContentSupport) -> ObjectKind {
    if mime.is_empty() {
        return ObjectKind::Null;
    }

    if caps.has(Capabilities::SUPPORT_IMAGES) && support.is_supported_image(mime) {
        return ObjectKind::Image;
    }

    // SVG loads as a document but has its own capability
    let is_svg = mime.eq_ignore_ascii_case("image/svg+xml");
    if !is_svg || support.svg_enabled() {
        let needed = if is_svg { Capabilities::SUPPORT_SVG } else { Capabilities::SUPPORT_DOCUMENTS };
        if caps.has(needed) && support.is_supported_document(mime) {
            return ObjectKind::Document;
        }
    }

    if caps.has(Capabilities::SUPPORT_MODULES) && support.module_exists_for_type(mime) {
        return ObjectKind::Module;
    }

    ObjectKind::Null
}

/// Resolved loading parameters of a target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    /// Effective MIME type; empty while undetermined
    pub content_type: String,
    /// MIME hint seen before any channel was consulted
    pub original_content_type: String,
    pub original_uri: Option<Url>,
    /// Effective URI, including redirects
    pub uri: Option<Url>,
    pub base_uri: Option<Url>,
}

/// Which parameters changed during a resolution pass.
///
/// Multiple flags can be combined using the `|` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamChanges(u32);

impl ParamChanges {
    pub const NONE: Self = Self(0);
    /// Inputs that decide whether and what to open a channel for changed
    pub const CHANNEL_CHANGED: Self = Self(1 << 0);
    /// Anything affecting what is loaded changed
    pub const STATE_CHANGED: Self = Self(1 << 1);
    pub const CONTENT_TYPE_CHANGED: Self = Self(1 << 2);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for ParamChanges {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ParamChanges {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Outcome of a resolution pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub kind: ObjectKind,
    pub params: Parameters,
    pub changes: ParamChanges,
    /// Content type to stamp on the loaded channel
    pub channel_content_type: Option<String>,
}

pub struct Resolver<'a> {
    pub config: &'a ObjectConfig,
    pub support: &'a dyn ContentSupport,
    pub document_base: Option<&'a Url>,
}

impl Resolver<'_> {
    /// Resolve an element against the state of its previous pass.
    ///
    /// `channel` is the tracked channel, if any; it is only consulted while
    /// `channel_loaded` is set and the pre-channel inputs are unchanged.
    pub fn resolve(
        &self,
        element: &ElementInfo,
        prior_kind: ObjectKind,
        prior: &Parameters,
        channel_loaded: bool,
        channel: Option<&Channel>,
    ) -> Resolution {
        self.resolve_as(element, prior_kind, prior, channel_loaded, channel, false)
    }

    fn kind(&self, mime: &str, caps: Capabilities) -> ObjectKind {
        kind_of(mime, caps, self.support)
    }

    fn resolve_as(
        &self,
        element: &ElementInfo,
        prior_kind: ObjectKind,
        prior: &Parameters,
        channel_loaded: bool,
        channel: Option<&Channel>,
        force_applet: bool,
    ) -> Resolution {
        let caps = element.tag.capabilities();
        let mut changes = ParamChanges::NONE;
        // Forces Null
        let mut state_invalid = false;

        // Initial MIME hint
        let mut is_applet = false;
        let mut type_attr = "";
        let mut new_mime = String::new();
        if force_applet || element.tag == ElementTag::Applet {
            new_mime = self.config.applet_mime.clone();
            is_applet = true;
        } else if let Some(attr) = element.type_attr.as_deref().filter(|t| !t.is_empty()) {
            type_attr = attr;
            new_mime = attr.to_string();
            is_applet = self.config.is_applet_mime(&new_mime);
        }

        // classid
        if caps.has(Capabilities::SUPPORT_CLASSID) {
            if let Some(classid) = element.classid.as_deref().filter(|c| !c.is_empty()) {
                if classid.starts_with("java:")
                    && self.support.module_exists_for_type(&self.config.applet_mime)
                {
                    new_mime = self.config.applet_mime.clone();
                    is_applet = true;
                } else {
                    tracing::debug!("Unsupported classid {:?}, refusing to load", classid);
                    new_mime.clear();
                    state_invalid = true;
                }
            }
        }

        // Codebase
        let mut codebase = element.codebase.clone();
        if is_applet {
            if let Some(value) = element.param_codebase() {
                codebase = Some(value);
            }
            codebase = match codebase {
                Some(c) if c.is_empty() => Some("/".to_string()),
                None => Some(".".to_string()),
                other => other,
            };
        }

        let mut new_base = None;
        if let Some(spec) = codebase.as_deref().filter(|c| !c.is_empty()) {
            new_base = uri::resolve(spec, self.document_base);
            if new_base.is_none() {
                tracing::debug!("Could not parse codebase {:?}, using document base", spec);
            }
        }
        if new_base.is_none() {
            new_base = self.document_base.cloned();
        }

        // URI; applet src/data are not URIs the browser opens
        let mut new_uri = None;
        let uri_spec = if is_applet { None } else { element.uri_attr() };
        if let Some(spec) = uri_spec.filter(|s| !s.is_empty()) {
            new_uri = uri::resolve(spec, new_base.as_ref());
            if new_uri.is_none() {
                state_invalid = true;
            }
        }

        // Skip-channel elements prefer a module registered for the extension
        if self.kind(&new_mime, caps) != ObjectKind::Module
            && caps.has(Capabilities::SKIP_CHANNEL_FOR_MODULE)
        {
            if let Some(ext_mime) = new_uri.as_ref().and_then(|u| self.support.module_for_extension(u)) {
                tracing::debug!("Using extension as type hint ({})", ext_mime);
                new_mime = ext_mime;
                if !is_applet && self.config.is_applet_mime(&new_mime) {
                    return self.resolve_as(element, prior_kind, prior, channel_loaded, channel, true);
                }
            }
        }

        // Pre-channel inputs
        if prior.original_content_type != new_mime || prior.original_uri != new_uri {
            changes |= ParamChanges::CHANNEL_CHANGED;
            tracing::debug!("Channel parameters changed");
        }
        let mut params = Parameters {
            original_content_type: new_mime.clone(),
            original_uri: new_uri.clone(),
            ..prior.clone()
        };

        // A loaded channel with unchanged inputs decides the type
        let mut use_channel = channel_loaded && !changes.contains(ParamChanges::CHANNEL_CHANGED);
        let new_channel = use_channel && prior_kind == ObjectKind::Loading;
        let mut channel_content_type = None;

        if new_channel {
            match channel {
                Some(channel) => {
                    let mut channel_type = channel.content_type.clone();
                    tracing::debug!("Channel has a content type of {}", channel_type);

                    let mut binary = false;
                    if channel_type == uri::APPLICATION_GUESS_FROM_EXT {
                        channel_type = uri::APPLICATION_OCTET_STREAM.to_string();
                        channel_content_type = Some(channel_type.clone());
                        binary = true;
                    } else if channel_type == uri::APPLICATION_OCTET_STREAM
                        || channel_type == uri::BINARY_OCTET_STREAM
                    {
                        binary = true;
                    }

                    // Redirects change the effective URI
                    new_uri = Some(channel.final_uri.clone());

                    let type_hint = self.kind(&new_mime, caps);
                    let ext_module = |uri: &Option<Url>| {
                        uri.as_ref().and_then(|u| self.support.module_for_extension(u))
                    };

                    let mut override_channel_type = false;
                    if element.type_must_match {
                        if !type_attr.eq_ignore_ascii_case(&channel_type) {
                            state_invalid = true;
                        }
                    } else if type_hint == ObjectKind::Module {
                        tracing::debug!("Using module type hint over channel type");
                        override_channel_type = true;
                    } else if let Some(ext_mime) = caps
                        .has(Capabilities::SKIP_CHANNEL_FOR_MODULE)
                        .then(|| ext_module(&new_uri))
                        .flatten()
                    {
                        tracing::debug!("Using extension as type hint for skip-channel element ({})", ext_mime);
                        new_mime = ext_mime;
                        override_channel_type = true;
                    } else if binary && type_hint != ObjectKind::Null && type_hint != ObjectKind::Document {
                        tracing::debug!("Using type hint over binary channel type");
                        override_channel_type = true;
                    } else if let Some(ext_mime) = binary.then(|| ext_module(&new_uri)).flatten() {
                        tracing::debug!("Using extension as type hint for binary channel ({})", ext_mime);
                        new_mime = ext_mime;
                        override_channel_type = true;
                    }

                    if override_channel_type {
                        let parsed = uri::parse_mime(&new_mime);
                        if !parsed.is_empty() {
                            channel_content_type = Some(parsed);
                        }
                    } else {
                        new_mime = channel_type;
                        if self.config.is_applet_mime(&new_mime) {
                            tracing::debug!("Refusing to load channel with applet MIME");
                            state_invalid = true;
                        }
                    }
                }
                None => {
                    tracing::debug!("Channel failed to open, marking invalid");
                    state_invalid = true;
                }
            }
        }

        // Final kind
        let mut new_kind = if state_invalid {
            new_mime.clear();
            ObjectKind::Null
        } else if new_channel {
            self.kind(&new_mime, caps)
        } else if (caps.has(Capabilities::SKIP_CHANNEL_FOR_MODULE) || new_uri.is_none())
            && self.kind(&new_mime, caps) == ObjectKind::Module
        {
            tracing::debug!("Module type with no channel needed");
            ObjectKind::Module
        } else if new_uri.is_some() {
            ObjectKind::Loading
        } else {
            ObjectKind::Null
        };

        // Existing channel results
        if use_channel && new_kind == ObjectKind::Loading {
            new_kind = prior_kind;
            new_mime = prior.content_type.clone();
            new_uri = prior.uri.clone();
        } else if use_channel && !new_channel {
            changes |= ParamChanges::CHANNEL_CHANGED;
            use_channel = false;
        }

        if new_kind != prior_kind {
            changes |= ParamChanges::STATE_CHANGED;
            tracing::debug!("Type changed from {:?} to {:?}", prior_kind, new_kind);
        }

        if prior.base_uri != new_base {
            // Applets resolve classes against the base
            if is_applet {
                changes |= ParamChanges::STATE_CHANGED;
            }
            params.base_uri = new_base;
        }

        if prior.uri != new_uri {
            changes |= ParamChanges::STATE_CHANGED;
            params.uri = new_uri;
        }

        // Not final while loading
        if new_kind != ObjectKind::Loading && prior.content_type != new_mime {
            changes |= ParamChanges::STATE_CHANGED | ParamChanges::CONTENT_TYPE_CHANGED;
            tracing::debug!("Effective MIME type changed ({} -> {})", prior.content_type, new_mime);
            params.content_type = new_mime;
        }

        // Old channel info is stale once state changed
        if use_channel && !new_channel && changes.contains(ParamChanges::STATE_CHANGED) {
            new_kind = ObjectKind::Loading;
            changes |= ParamChanges::CHANNEL_CHANGED;
        }

        Resolution { kind: new_kind, params, changes, channel_content_type }
    }
}
