//! Policy Gate
//!
//! Content policy checks for loads and processed content, the applet
//! codebase check, and the play decision for module content.

use std::rc::Rc;

use crate::content::{FallbackReason, ObjectKind};
use crate::host::{
    BlocklistState, ModuleState, Permission, PlayPreview, PolicyContentType, PolicyDecision,
    PolicyRequest, Principal, RejectCategory,
};
use crate::loader::ObjectLoader;
use crate::target::TargetId;
use crate::uri;
use crate::ObjectError;

/// Outcome of a content policy check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow,
    Deny(FallbackReason),
}

impl PolicyVerdict {
    /// Type rejections reflect a user preference; anything else suppresses
    pub fn from_decision(decision: PolicyDecision) -> Self {
        match decision {
            PolicyDecision::Accept => Self::Allow,
            PolicyDecision::Reject(RejectCategory::Type) => Self::Deny(FallbackReason::UserDisabled),
            PolicyDecision::Reject(_) => Self::Deny(FallbackReason::Suppressed),
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Whether module content may run without user activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayDecision {
    Play,
    Refuse(FallbackReason),
}

/// Result of looking up the top-level document's stored permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionLookup {
    /// There is no top-level document to ask
    NoTopDocument,
    /// Privileged top-level documents have no site permissions
    SystemPrincipal,
    Checked(Permission),
}

/// Everything the play decision depends on besides stored permissions
#[derive(Debug, Clone, Copy)]
pub struct PlayInputs {
    pub kind: ObjectKind,
    pub ignore_current_kind: bool,
    pub preview: Option<PlayPreview>,
    pub preview_canceled: bool,
    pub enabled: ModuleState,
    pub blocklist: BlocklistState,
}

/// Decide whether content may play.
///
/// `lookup` is only called once the module's registry state did not already
/// decide the outcome.
pub fn decide_play(inputs: &PlayInputs, lookup: impl FnOnce() -> PermissionLookup) -> PlayDecision {
    let active_preview = inputs.preview.filter(|_| !inputs.preview_canceled);

    // Preview that replaces the module no matter what
    if active_preview.is_some_and(|p| p.ignore_click_to_play) {
        return PlayDecision::Refuse(FallbackReason::PlayPreview);
    }

    if !inputs.ignore_current_kind && inputs.kind != ObjectKind::Module {
        return PlayDecision::Play;
    }

    let mut reason = FallbackReason::ClickToPlay;
    if inputs.enabled == ModuleState::Disabled {
        return PlayDecision::Refuse(FallbackReason::Disabled);
    }

    let vulnerable = match inputs.blocklist {
        BlocklistState::Blocked => return PlayDecision::Refuse(FallbackReason::Blocklisted),
        BlocklistState::VulnerableUpdatable => {
            reason = FallbackReason::VulnerableUpdatable;
            true
        }
        BlocklistState::VulnerableNoUpdate => {
            reason = FallbackReason::VulnerableNoUpdate;
            true
        }
        BlocklistState::NotBlocked | BlocklistState::Outdated => false,
    };

    if reason == FallbackReason::ClickToPlay && active_preview.is_some() {
        reason = FallbackReason::PlayPreview;
    }

    match lookup() {
        PermissionLookup::NoTopDocument => return PlayDecision::Refuse(reason),
        PermissionLookup::Checked(Permission::Allow) => return PlayDecision::Play,
        PermissionLookup::Checked(Permission::Deny) => {
            return PlayDecision::Refuse(FallbackReason::Disabled);
        }
        PermissionLookup::Checked(Permission::Prompt) => return PlayDecision::Refuse(reason),
        PermissionLookup::Checked(Permission::Unknown) | PermissionLookup::SystemPrincipal => {}
    }

    // Vulnerable modules need activation unless a site permission says otherwise
    if vulnerable {
        return PlayDecision::Refuse(reason);
    }

    match inputs.enabled {
        ModuleState::Enabled => PlayDecision::Play,
        _ => PlayDecision::Refuse(reason),
    }
}

impl ObjectLoader {
    /// Play decision for a target's current content type
    pub(crate) fn should_play(&self, id: TargetId, ignore_current_kind: bool) -> Result<PlayDecision, ObjectError> {
        let target = self.target(id)?;
        let mime = target.params.content_type.as_str();
        let modules = &self.services.modules;

        let inputs = PlayInputs {
            kind: target.kind,
            ignore_current_kind,
            preview: modules.play_preview(mime),
            preview_canceled: target.play_preview_canceled,
            enabled: modules.enabled_state(mime),
            blocklist: modules.blocklist_state(mime),
        };

        let decision = decide_play(&inputs, || {
            let info = self.services.document.document_info(target.node);
            let top = match info.top_principal {
                None => return PermissionLookup::NoTopDocument,
                Some(Principal::System) => return PermissionLookup::SystemPrincipal,
                Some(top) => top,
            };
            let key = modules.permission_key(mime);
            let permission = self.services.permissions.test(&top, &key);
            if permission != Permission::Unknown {
                self.services.permissions.refresh_expiry(
                    &top,
                    &key,
                    self.config().session_window(),
                    self.config().persistent_window(),
                );
            }
            PermissionLookup::Checked(permission)
        });

        tracing::debug!("Play decision for {:?} ({}): {:?}", id, mime, decision);
        Ok(decision)
    }

    fn policy_request(&self, id: TargetId, content_type: PolicyContentType) -> Result<PolicyRequest, ObjectError> {
        let target = self.target(id)?;
        let info = self.services.document.document_info(target.node);
        Ok(PolicyRequest {
            node: target.node,
            content_type,
            uri: target.params.uri.clone().or_else(|| target.params.base_uri.clone()),
            principal: info.principal,
            mime: target.params.content_type.clone(),
        })
    }

    /// Content policy check before a request is made
    pub(crate) fn check_load_policy(&mut self, id: TargetId) -> Result<PolicyVerdict, ObjectError> {
        let request = self.policy_request(id, PolicyContentType::Object)?;
        let policy = Rc::clone(&self.services.policy);
        let verdict = PolicyVerdict::from_decision(policy.check_load(self, &request));
        if !verdict.is_allowed() {
            tracing::info!("Content policy refused load of {:?}", request.uri.as_ref().map(|u| u.as_str()));
        }
        Ok(verdict)
    }

    /// Content policy check once the content kind is known
    pub(crate) fn check_process_policy(&mut self, id: TargetId) -> Result<PolicyVerdict, ObjectError> {
        let content_type = match self.target(id)?.kind {
            ObjectKind::Image => PolicyContentType::Image,
            ObjectKind::Document => PolicyContentType::Document,
            ObjectKind::Module => PolicyContentType::Object,
            kind => {
                tracing::error!("Process policy checked for unloadable kind {:?}", kind);
                return Ok(PolicyVerdict::Deny(FallbackReason::Suppressed));
            }
        };
        let request = self.policy_request(id, content_type)?;
        let policy = Rc::clone(&self.services.policy);
        let verdict = PolicyVerdict::from_decision(policy.check_process(self, &request));
        if !verdict.is_allowed() {
            tracing::info!("Content policy refused to process {} content", request.mime);
        }
        Ok(verdict)
    }

    /// Applets load classes from their codebase, which must be loadable
    /// by the node and, for `file:` codebases under the strict origin
    /// policy, inside the document's directory.
    pub(crate) fn check_applet_codebase(&self, id: TargetId) -> Result<PolicyVerdict, ObjectError> {
        let target = self.target(id)?;
        let info = self.services.document.document_info(target.node);
        let denied = PolicyVerdict::Deny(FallbackReason::Suppressed);

        let Some(base) = target.params.base_uri.as_ref() else {
            tracing::warn!("Applet without a codebase URI");
            return Ok(denied);
        };
        if !self.services.policy.check_load_uri(&info.principal, base) {
            tracing::info!("Applet codebase {} refused", base);
            return Ok(denied);
        }

        if self.config().strict_file_origin_policy && base.scheme() == "file" {
            let inside = info
                .document_uri
                .as_ref()
                .is_some_and(|doc| uri::is_within_directory(base, doc));
            if !inside {
                tracing::info!("Applet codebase {} outside the document directory", base);
                return Ok(denied);
            }
        }

        Ok(PolicyVerdict::Allow)
    }
}
