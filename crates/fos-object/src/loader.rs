//! Lifecycle Controller
//!
//! The object loader owns every load target of a document and drives each
//! one from parameter resolution through policy, channel acquisition and
//! dispatch to its final state, or to fallback content.
//!
//! Collaborator calls may re-enter the loader. Each supersedable operation
//! holds an epoch guard and re-checks it after every such call; a changed
//! guard means a nested call took over and the outer call stops quietly.

use std::collections::HashMap;
use std::rc::Rc;

use url::Url;

use crate::channel::{Channel, LoadFlags};
use crate::config::ObjectConfig;
use crate::content::{FallbackReason, ObjectKind, ObjectState};
use crate::element::{ElementInfo, ElementTag};
use crate::events::{CrashReport, ObjectEvent};
use crate::host::{DocumentInfo, Services, StreamConsumer};
use crate::instance::Instantiation;
use crate::policy::{PlayDecision, PolicyVerdict};
use crate::resolver::{self, HostSupport, ParamChanges, Parameters, Resolver};
use crate::target::{
    Epoch, Guard, InFlight, InstanceHandle, LoadTarget, Operation, TargetArena, TargetId,
};
use crate::tasks::{Task, TaskKind, TaskQueue, TaskToken};
use crate::uri;
use crate::{ChannelId, FrameId, InstanceId, NodeId, ObjectError};

/// State carried through one guarded load pass
struct LoadPass {
    epoch: Epoch,
    notify: bool,
    old_kind: ObjectKind,
    old_state: ObjectState,
    fallback: FallbackReason,
    loading_channel: Option<ChannelId>,
    changes: ParamChanges,
}

/// Loads and tracks the embedded objects of a document
pub struct ObjectLoader {
    config: Rc<ObjectConfig>,
    pub(crate) services: Services,
    pub(crate) targets: TargetArena<LoadTarget>,
    by_node: HashMap<NodeId, TargetId>,
    pub(crate) tasks: TaskQueue,
    next_epoch: u64,
}

impl ObjectLoader {
    pub fn new(config: Rc<ObjectConfig>, services: Services) -> Self {
        Self {
            config,
            services,
            targets: TargetArena::new(),
            by_node: HashMap::new(),
            tasks: TaskQueue::new(),
            next_epoch: 0,
        }
    }

    pub fn config(&self) -> &ObjectConfig {
        &self.config
    }

    // ========================================================================
    // Targets and guards
    // ========================================================================

    pub(crate) fn target(&self, id: TargetId) -> Result<&LoadTarget, ObjectError> {
        self.targets.get(id).ok_or(ObjectError::UnknownTarget(id))
    }

    pub(crate) fn target_mut(&mut self, id: TargetId) -> Result<&mut LoadTarget, ObjectError> {
        self.targets.get_mut(id).ok_or(ObjectError::UnknownTarget(id))
    }

    /// Take `op` on a target with a fresh epoch, superseding any holder
    pub(crate) fn acquire(&mut self, id: TargetId, op: Operation) -> Result<Epoch, ObjectError> {
        self.next_epoch += 1;
        let epoch = Epoch(self.next_epoch);
        *self.target_mut(id)?.guards.slot_mut(op) = Guard::Held(epoch);
        Ok(epoch)
    }

    /// Whether `epoch` still holds `op`; false once the target is gone
    pub(crate) fn holds(&self, id: TargetId, op: Operation, epoch: Epoch) -> bool {
        self.targets
            .get(id)
            .is_some_and(|t| t.guards.slot(op) == Guard::Held(epoch))
    }

    /// Release `op` if `epoch` still holds it
    pub(crate) fn release(&mut self, id: TargetId, op: Operation, epoch: Epoch) {
        if let Some(target) = self.targets.get_mut(id) {
            let slot = target.guards.slot_mut(op);
            if *slot == Guard::Held(epoch) {
                *slot = Guard::Idle;
            }
        }
    }

    pub fn guard(&self, id: TargetId, op: Operation) -> Guard {
        self.targets
            .get(id)
            .map(|t| t.guards.slot(op))
            .unwrap_or_default()
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Register an element. Rebinding a known node keeps its target.
    pub fn bind(&mut self, node: NodeId, element: ElementInfo) -> TargetId {
        if let Some(&id) = self.by_node.get(&node) {
            if let Some(target) = self.targets.get_mut(id) {
                target.element = element;
                return id;
            }
        }

        let id = self.targets.insert(LoadTarget::new(node, element));
        self.by_node.insert(node, id);
        tracing::debug!("Bound {:?} as {:?}", node, id);
        id
    }

    /// Replace the element's attributes; call `load_object` to apply them
    pub fn update_element(&mut self, id: TargetId, element: ElementInfo) -> Result<(), ObjectError> {
        self.target_mut(id)?.element = element;
        Ok(())
    }

    /// Elements created by script rather than the network parser
    pub fn set_network_created(&mut self, id: TargetId, network_created: bool) -> Result<(), ObjectError> {
        self.target_mut(id)?.network_created = network_created;
        Ok(())
    }

    /// The element left its document.
    ///
    /// Running modules survive until the next task turn so a node can be
    /// moved without restarting them.
    pub fn unbind(&mut self, id: TargetId) -> Result<(), ObjectError> {
        let target = self.target(id)?;
        let node = target.node;
        let kind = target.kind;
        let running = kind == ObjectKind::Module
            && (target.instance.is_some() || target.guards.instantiating != Guard::Idle);

        if running {
            self.queue_stop_check(id)?;
        } else if kind != ObjectKind::Image {
            self.unload_object(id, true);
        }

        if self.services.document.document_info(node).active {
            self.post_event(node, ObjectEvent::ModuleRemoved);
        }
        Ok(())
    }

    /// Tear everything down and forget the target
    pub fn destroy(&mut self, id: TargetId) -> Result<(), ObjectError> {
        let target = self.target_mut(id)?;
        let node = target.node;
        let subdocument = target.subdocument.take();
        target.pending_instantiate = None;
        target.pending_stop_check = None;
        target.guards = InFlight::default();

        if let Some(sub) = subdocument {
            self.services.frames.destroy(sub);
        }
        self.services.images.cancel(node);
        self.close_channel(id);

        if let Some(instance) = self.targets.get_mut(id).and_then(|t| t.instance.take()) {
            let modules = Rc::clone(&self.services.modules);
            modules.set_frame(instance.id, None);
            modules.stop(self, instance.id);
        }

        self.targets.remove(id);
        if self.by_node.get(&node) == Some(&id) {
            self.by_node.remove(&node);
        }
        tracing::debug!("Destroyed {:?}", id);
        Ok(())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Resolve the element and load whatever it now refers to.
    ///
    /// A no-op unless something changed or `force` is set.
    pub fn load_object(&mut self, id: TargetId, notify: bool, force: bool) -> Result<(), ObjectError> {
        self.load_object_with_channel(id, notify, force, None)
    }

    pub(crate) fn load_object_with_channel(
        &mut self,
        id: TargetId,
        notify: bool,
        force: bool,
        loading_channel: Option<ChannelId>,
    ) -> Result<(), ObjectError> {
        let node = self.target(id)?.node;
        let info = self.services.document.document_info(node);
        if !info.in_active_document() {
            tracing::error!("load_object called while not bound to an active document");
            return Err(ObjectError::NotInActiveDocument);
        }
        // These documents never load object content
        if info.static_document || info.used_as_image || info.loaded_as_data {
            return Ok(());
        }

        tracing::debug!(
            "LoadObject {:?} (notify {}, force {}, channel {:?})",
            id,
            notify,
            force,
            loading_channel
        );

        // An opened channel can't be reused
        if force && self.target(id)?.channel_loaded {
            self.close_channel(id);
            self.target_mut(id)?.channel_loaded = false;
        }

        let old_kind = self.target(id)?.kind;
        let old_state = self.object_state(id)?;

        let changes = self.resolve_parameters(id, &info)?;
        if changes.is_empty() && !force {
            return Ok(());
        }
        tracing::debug!("Object parameters changed ({:?})", changes);

        let target = self.target(id)?;
        let mut fallback = FallbackReason::Alternate;
        // A supported type with invalid parameters is not an unsupported type
        if target.kind == ObjectKind::Null
            && self.kind_of(&target.params.content_type, target.element.tag, &info) == ObjectKind::Null
        {
            fallback = if self.config.modules_blocked_on_platform {
                FallbackReason::UnsupportedPlatform
            } else {
                FallbackReason::Unsupported
            };
        }

        let target = self.target_mut(id)?;
        if target.activated && changes.contains(ParamChanges::CONTENT_TYPE_CHANGED) {
            tracing::debug!("Content type changed, clearing activation");
            target.activated = false;
        }

        let epoch = self.acquire(id, Operation::Loading)?;
        let pass = LoadPass {
            epoch,
            notify,
            old_kind,
            old_state,
            fallback,
            loading_channel,
            changes,
        };
        let result = self.load_guarded(id, pass);
        self.release(id, Operation::Loading, epoch);
        result
    }

    fn load_guarded(&mut self, id: TargetId, mut pass: LoadPass) -> Result<(), ObjectError> {
        let epoch = pass.epoch;

        // Stopping a module may spin the event loop
        self.unload_object(id, false);
        if !self.holds(id, Operation::Loading, epoch) {
            tracing::warn!("Re-entered while unloading {:?}, abandoning load", id);
            return Ok(());
        }

        if !self.reconcile_channel(id, &pass)? {
            return Ok(());
        }

        if self.target(id)?.kind != ObjectKind::Null {
            let verdict = self.check_security(id, epoch)?;
            if !self.holds(id, Operation::Loading, epoch) {
                tracing::warn!("Re-entered during content policy, abandoning load of {:?}", id);
                return Ok(());
            }
            if let PolicyVerdict::Deny(reason) = verdict {
                self.target_mut(id)?.kind = ObjectKind::Null;
                pass.fallback = reason;
            }
        }

        let target = self.target_mut(id)?;
        if target.kind != ObjectKind::Null && target.params.uri.as_ref().is_some_and(uri::is_view_source) {
            tracing::info!("Blocking view-source URI for {:?}", id);
            target.kind = ObjectKind::Null;
        }

        let target = self.target(id)?;
        if !target.activated && matches!(target.kind, ObjectKind::Null | ObjectKind::Module) {
            if let PlayDecision::Refuse(reason) = self.should_play(id, false)? {
                tracing::info!("Marking {:?} as needing activation ({:?})", id, reason);
                self.target_mut(id)?.kind = ObjectKind::Null;
                pass.fallback = reason;
            }
        }

        let target = self.target_mut(id)?;
        if !target.activated && target.kind == ObjectKind::Module {
            // Stays activated until the content type changes
            target.activated = true;
        }

        let target = self.target(id)?;
        if target.subdocument.is_some()
            || target.pending_instantiate.is_some()
            || target.instance.is_some()
            || target.pending_stop_check.is_some()
            || target.final_listener.is_some()
        {
            tracing::error!("Trying to load {:?} over existing content", id);
            return Ok(());
        }
        if target.kind != ObjectKind::Null && target.channel.is_some() != target.channel_loaded {
            tracing::error!("Channel tracking out of sync for {:?}", id);
            return Ok(());
        }

        let node = target.node;
        let kind = target.kind;
        let has_channel = target.channel.is_some();
        let mut spawn = false;
        let outcome = match kind {
            ObjectKind::Image => self.start_image(id).map(Some),
            ObjectKind::Document => self.start_document(id).map(Some),
            ObjectKind::Module if has_channel => {
                // Frames must exist before spawning
                self.notify_state_changed(id, pass.old_kind, pass.old_state, true, pass.notify);
                if !self.holds(id, Operation::Loading, epoch) {
                    return Ok(());
                }
                pass.old_kind = self.target(id)?.kind;
                pass.old_state = self.object_state(id)?;

                if self.services.document.primary_frame(node).is_none() {
                    // Restarted from has_new_frame once rendered
                    tracing::debug!("Module {:?} has no frame, dropping its channel", id);
                    self.close_channel(id);
                } else {
                    spawn = true;
                }
                Ok(None)
            }
            ObjectKind::Module => self.async_start_instance(id).map(|_| None),
            ObjectKind::Loading => self.open_channel(id).map(|_| None),
            ObjectKind::Null => Ok(None),
        };

        if !self.holds(id, Operation::Loading, epoch) {
            tracing::warn!("Re-entered during dispatch of {:?}", id);
            return Ok(());
        }

        let mut listener = match outcome {
            Ok(listener) => listener,
            Err(e) => {
                tracing::info!("Loading {:?} failed, switching to fallback: {}", id, e);
                self.target_mut(id)?.kind = ObjectKind::Null;
                None
            }
        };

        if self.target(id)?.kind == ObjectKind::Null {
            if self.target(id)?.channel.is_some() {
                self.close_channel(id);
                if !self.holds(id, Operation::Loading, epoch) {
                    return Ok(());
                }
            }
            spawn = false;
            listener = None;
            // Notified below together with the rest of the pass
            self.load_fallback(id, pass.fallback, false)?;
        }

        self.notify_state_changed(id, pass.old_kind, pass.old_state, false, pass.notify);
        if !self.holds(id, Operation::Loading, epoch) {
            return Ok(());
        }

        // Spawning and stream delivery may re-enter, so they follow the
        // notification
        let mut failed = false;
        if spawn {
            let spawned = self.instantiate(id, Some(epoch));
            if !self.holds(id, Operation::Loading, epoch) {
                return Ok(());
            }
            match spawned {
                Ok(Instantiation::Spawned) if pass.loading_channel.is_some() => {
                    self.start_module_stream(id, epoch)?;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Module instantiation failed for {:?}: {}", id, e);
                    failed = true;
                }
            }
        } else if let Some(listener) = listener {
            let channel = self.target(id)?.channel.clone();
            self.target_mut(id)?.final_listener = Some(Rc::clone(&listener));
            match channel {
                Some(channel) => {
                    if let Err(e) = listener.on_start_request(self, &channel) {
                        tracing::info!("Consumer refused stream for {:?}: {}", id, e);
                        failed = true;
                    }
                }
                None => {
                    tracing::error!("Final consumer without a channel for {:?}", id);
                    failed = true;
                }
            }
        }

        if failed && self.holds(id, Operation::Loading, epoch) {
            // Already notified, so the fallback notifies on its own
            self.target_mut(id)?.kind = ObjectKind::Null;
            self.unload_object(id, false);
            if !self.holds(id, Operation::Loading, epoch) {
                return Ok(());
            }
            self.close_channel(id);
            self.load_fallback(id, pass.fallback, true)?;
        }

        Ok(())
    }

    /// Run the resolver and commit its result
    fn resolve_parameters(&mut self, id: TargetId, info: &DocumentInfo) -> Result<ParamChanges, ObjectError> {
        let target = self.target(id)?;
        let support = HostSupport { services: &self.services, svg_enabled: info.svg_enabled };
        let resolver = Resolver {
            config: &self.config,
            support: &support,
            document_base: info.base_uri.as_ref(),
        };
        let resolution = resolver.resolve(
            &target.element,
            target.kind,
            &target.params,
            target.channel_loaded,
            target.channel.as_ref(),
        );

        let target = self.targets.get_mut(id).ok_or(ObjectError::UnknownTarget(id))?;
        target.kind = resolution.kind;
        target.params = resolution.params;
        if let Some(content_type) = resolution.channel_content_type {
            if let Some(channel) = target.channel.as_mut() {
                self.services.network.set_content_type(channel.id, &content_type);
                channel.content_type = content_type;
            }
        }
        Ok(resolution.changes)
    }

    fn kind_of(&self, mime: &str, tag: ElementTag, info: &DocumentInfo) -> ObjectKind {
        let support = HostSupport { services: &self.services, svg_enabled: info.svg_enabled };
        resolver::kind_of(mime, tag.capabilities(), &support)
    }

    /// Drop or keep the channel for the new parameters; false ends the pass
    fn reconcile_channel(&mut self, id: TargetId, pass: &LoadPass) -> Result<bool, ObjectError> {
        let target = self.target(id)?;
        let kind = target.kind;
        let has_channel = target.channel.is_some();
        let channel_loaded = target.channel_loaded;
        let channel_id = target.channel_id();

        if pass.changes.contains(ParamChanges::CHANNEL_CHANGED) {
            self.close_channel(id);
            if !self.holds(id, Operation::Loading, pass.epoch) {
                return Ok(false);
            }
            self.target_mut(id)?.channel_loaded = false;
        } else if kind == ObjectKind::Null && has_channel {
            // Opened a channel but found nothing loadable
            self.close_channel(id);
            if !self.holds(id, Operation::Loading, pass.epoch) {
                return Ok(false);
            }
        } else if kind == ObjectKind::Loading && has_channel {
            tracing::debug!("Still waiting on the channel of {:?}", id);
            return Ok(false);
        } else if channel_loaded && channel_id != pass.loading_channel {
            // Only on_start_request may change state with a loaded channel
            tracing::error!("Loaded channel {:?} changed state outside its start", channel_id);
            return Ok(false);
        }
        Ok(true)
    }

    /// Applet codebase, load and process policy, in that order
    fn check_security(&mut self, id: TargetId, epoch: Epoch) -> Result<PolicyVerdict, ObjectError> {
        let target = self.target(id)?;
        if self.config.is_applet_mime(&target.params.content_type) {
            let verdict = self.check_applet_codebase(id)?;
            if !verdict.is_allowed() {
                return Ok(verdict);
            }
        }

        let target = self.target(id)?;
        // A loaded channel already passed load policy
        if target.params.uri.is_some() && !target.channel_loaded {
            let verdict = self.check_load_policy(id)?;
            if !verdict.is_allowed() || !self.holds(id, Operation::Loading, epoch) {
                return Ok(verdict);
            }
        }

        if self.target(id)?.kind != ObjectKind::Loading {
            return self.check_process_policy(id);
        }
        Ok(PolicyVerdict::Allow)
    }

    fn start_image(&mut self, id: TargetId) -> Result<Rc<dyn StreamConsumer>, ObjectError> {
        let target = self.target(id)?;
        let Some(channel) = target.channel.clone() else {
            tracing::error!("Image type without a channel");
            return Err(ObjectError::UnexpectedState("image without a channel"));
        };
        let node = target.node;
        let images = Rc::clone(&self.services.images);
        images.load_with_channel(self, node, &channel)
    }

    fn start_document(&mut self, id: TargetId) -> Result<Rc<dyn StreamConsumer>, ObjectError> {
        let target = self.target(id)?;
        if target.channel.is_none() {
            tracing::error!("Document type without a channel");
            return Err(ObjectError::UnexpectedState("document without a channel"));
        }
        let node = target.node;
        let uri = target.params.uri.clone();
        let network_created = target.network_created;

        let frames = Rc::clone(&self.services.frames);
        let sub = frames
            .create(node, network_created)
            .ok_or_else(|| ObjectError::Document("could not create a sub-document".to_string()))?;
        if let Some(uri) = uri.as_ref() {
            if frames.is_recursive_load(sub, uri) {
                frames.destroy(sub);
                return Err(ObjectError::Document(format!("recursive load of {uri}")));
            }
        }

        let target = self.targets.get_mut(id).ok_or(ObjectError::UnknownTarget(id))?;
        target.subdocument = Some(sub);
        let Some(channel) = target.channel.as_mut() else {
            return Err(ObjectError::UnexpectedState("document without a channel"));
        };
        // Documents fire onload
        channel.load_flags |= LoadFlags::DOCUMENT_URI;
        self.services.network.set_load_flags(channel.id, channel.load_flags);
        let channel = channel.clone();

        match frames.open(self, sub, &channel) {
            Ok(listener) => Ok(listener),
            Err(e) => {
                frames.destroy(sub);
                if let Some(target) = self.targets.get_mut(id) {
                    if target.subdocument == Some(sub) {
                        target.subdocument = None;
                    }
                }
                Err(e)
            }
        }
    }

    /// Hand the loaded channel to a freshly spawned module
    fn start_module_stream(&mut self, id: TargetId, epoch: Epoch) -> Result<(), ObjectError> {
        let listener = match self.make_module_listener(id) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!("No stream consumer for module {:?}: {}", id, e);
                return Ok(());
            }
        };
        let Some(channel) = self.target(id)?.channel.clone() else {
            return Ok(());
        };
        if let Err(e) = listener.on_start_request(self, &channel) {
            // Modules may reject their initial stream and keep running
            tracing::debug!("Module rejected its initial stream: {}", e);
            if self.holds(id, Operation::Loading, epoch) {
                self.close_channel(id);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Unloading and fallback
    // ========================================================================

    /// Drop loaded content. `reset` also forgets the channel and parameters.
    pub(crate) fn unload_object(&mut self, id: TargetId, reset: bool) {
        let Some(target) = self.targets.get_mut(id) else {
            return;
        };
        let node = target.node;
        let subdocument = target.subdocument.take();
        let kind = target.kind;

        self.services.images.cancel(node);
        if let Some(sub) = subdocument {
            self.services.frames.destroy(sub);
        }

        if reset {
            // Modules release their channel when stopped
            if kind != ObjectKind::Module {
                self.close_channel(id);
            }
            let Some(target) = self.targets.get_mut(id) else {
                return;
            };
            target.channel_loaded = false;
            target.kind = ObjectKind::Loading;
            target.params = Parameters::default();
        }

        let Some(target) = self.targets.get_mut(id) else {
            return;
        };
        target.guards.instantiating = Guard::Idle;
        target.script_requested = false;
        if target.instance.is_none() {
            target.guards.stopping = Guard::Idle;
        }

        self.stop_instance(id);
    }

    /// Switch to fallback content
    pub(crate) fn load_fallback(
        &mut self,
        id: TargetId,
        mut reason: FallbackReason,
        notify: bool,
    ) -> Result<(), ObjectError> {
        let old_state = self.object_state(id)?;
        let target = self.target_mut(id)?;
        let old_kind = target.kind;

        if target.instance.is_some() || target.subdocument.is_some() || target.channel.is_some() {
            tracing::error!("Fallback for {:?} while content is still loaded", id);
        }

        // Custom fallback UI needs an HTML element with a known type
        if !target.element.is_html || target.params.content_type.is_empty() {
            reason = FallbackReason::Alternate;
        }
        if target.element.tag == ElementTag::Object
            && target.element.has_significant_children
            && matches!(
                reason,
                FallbackReason::Unsupported | FallbackReason::Disabled | FallbackReason::Blocklisted
            )
        {
            reason = FallbackReason::Alternate;
        }

        target.kind = ObjectKind::Null;
        target.fallback = reason;
        tracing::debug!("Showing fallback for {:?} ({:?})", id, reason);

        if notify {
            self.notify_state_changed(id, old_kind, old_state, false, true);
        }
        Ok(())
    }

    /// Tell the document what changed since `old_kind`/`old_state`
    pub(crate) fn notify_state_changed(
        &mut self,
        id: TargetId,
        old_kind: ObjectKind,
        old_state: ObjectState,
        sync: bool,
        notify: bool,
    ) {
        if !notify {
            return;
        }
        let Some(target) = self.targets.get(id) else {
            return;
        };
        let node = target.node;
        let kind = target.kind;
        if !self.services.document.document_info(node).in_document {
            return;
        }
        let Ok(new_state) = self.object_state(id) else {
            return;
        };

        let document = Rc::clone(&self.services.document);
        if new_state != old_state {
            document.content_state_changed(self, node, old_state ^ new_state);
            if sync {
                document.flush_frames(self, node);
            }
        } else if old_kind != kind {
            // State changes already rebuilt frames
            document.recreate_frames(self, node);
        }
    }

    // ========================================================================
    // Activation and lifecycle notifications
    // ========================================================================

    /// User activation of a placeholder
    pub fn play(&mut self, id: TargetId) -> Result<(), ObjectError> {
        let target = self.target_mut(id)?;
        if !target.activated {
            tracing::info!("{:?} activated by user", id);
            target.activated = true;
        }
        if target.kind == ObjectKind::Null && target.fallback.is_activation_placeholder() {
            return self.load_object(id, true, true);
        }
        Ok(())
    }

    /// Force a fresh load, optionally forgetting activation
    pub fn reload(&mut self, id: TargetId, clear_activation: bool) -> Result<(), ObjectError> {
        let target = self.target_mut(id)?;
        if clear_activation {
            target.activated = false;
            target.play_preview_canceled = false;
        }
        self.load_object(id, true, true)
    }

    pub fn cancel_play_preview(&mut self, id: TargetId) -> Result<(), ObjectError> {
        let target = self.target_mut(id)?;
        target.play_preview_canceled = true;
        if target.kind == ObjectKind::Null && target.fallback == FallbackReason::PlayPreview {
            return self.load_object(id, true, true);
        }
        Ok(())
    }

    /// Why the current content type would not play, regardless of kind
    pub fn default_fallback_reason(&self, id: TargetId) -> Result<Option<FallbackReason>, ObjectError> {
        Ok(match self.should_play(id, true)? {
            PlayDecision::Play => None,
            PlayDecision::Refuse(reason) => Some(reason),
        })
    }

    /// Layout built, replaced or dropped the element's frame
    pub fn has_new_frame(&mut self, id: TargetId, frame: Option<FrameId>) -> Result<(), ObjectError> {
        let target = self.target(id)?;
        if target.kind != ObjectKind::Module {
            return Ok(());
        }
        let instance = target.instance.as_ref().map(|i| i.id);
        let instantiating = target.guards.instantiating != Guard::Idle;

        match (frame, instance) {
            (None, instance) => {
                // Stop unless a new frame turns up before the next turn
                if instance.is_some() || instantiating {
                    if let Some(instance) = instance {
                        self.services.modules.set_frame(instance, None);
                    }
                    self.queue_stop_check(id)?;
                }
            }
            // Resolved as a module but never spawned for lack of a frame
            (Some(_), None) => self.async_start_instance(id)?,
            (Some(frame), Some(instance)) => self.services.modules.set_frame(instance, Some(frame)),
        }
        Ok(())
    }

    /// The owner document became active or inactive
    pub fn document_activity_changed(&mut self, id: TargetId) -> Result<(), ObjectError> {
        let target = self.target(id)?;
        if target.instance.is_some() || target.guards.instantiating != Guard::Idle {
            self.queue_stop_check(id)?;
        }
        Ok(())
    }

    /// The module instance crashed
    pub fn module_crashed(&mut self, id: TargetId, report: CrashReport) -> Result<(), ObjectError> {
        let target = self.target(id)?;
        if target.kind != ObjectKind::Module {
            tracing::warn!("Crash reported for non-module {:?}", id);
        }
        let node = target.node;
        tracing::info!("Module {:?} crashed, queuing crash event", id);

        self.module_destroyed(id)?;
        self.close_channel(id);
        self.load_fallback(id, FallbackReason::Crashed, true)?;
        self.post_event(node, ObjectEvent::ModuleCrashed(report));
        Ok(())
    }

    /// The host destroyed the instance itself; forget it without stopping
    pub fn module_destroyed(&mut self, id: TargetId) -> Result<(), ObjectError> {
        self.target_mut(id)?.instance = None;
        Ok(())
    }

    /// Script asked for the module instance.
    ///
    /// The first content-script touch of an activation placeholder fires
    /// `ModuleScripted`; a resolved but unspawned module starts synchronously.
    pub fn script_request_instance(
        &mut self,
        id: TargetId,
        caller_is_content: bool,
    ) -> Result<Option<InstanceId>, ObjectError> {
        let target = self.target(id)?;
        let node = target.node;
        let in_active = self.services.document.document_info(node).in_active_document();

        if caller_is_content
            && !target.script_requested
            && in_active
            && target.kind == ObjectKind::Null
            && target.fallback.is_activation_placeholder()
        {
            self.post_event(node, ObjectEvent::ModuleScripted);
            self.target_mut(id)?.script_requested = true;
        } else if target.kind == ObjectKind::Module
            && target.instance.is_none()
            && in_active
            && self.services.document.is_safe_to_run_script()
        {
            if let Err(e) = self.sync_start_instance(id) {
                tracing::debug!("Synchronous start for script failed: {}", e);
            }
        }

        Ok(self.target(id)?.instance.as_ref().map(|i| i.id))
    }

    /// Seed a target with a channel opened elsewhere (standalone module
    /// documents)
    pub fn initialize_from_channel(
        &mut self,
        id: TargetId,
        channel_id: ChannelId,
        uri: Url,
    ) -> Result<(), ObjectError> {
        let target = self.target(id)?;
        if target.kind != ObjectKind::Loading || target.channel.is_some() {
            tracing::error!("initialize_from_channel on a target that already started loading");
            return Err(ObjectError::UnexpectedState("target already started loading"));
        }
        let info = self.services.document.document_info(target.node);

        // on_start_request must not see changed parameters
        self.resolve_parameters(id, &info)?;

        let target = self.target_mut(id)?;
        target.kind = ObjectKind::Loading;
        target.channel = Some(Channel::new(channel_id, uri, LoadFlags::NONE));
        tracing::debug!("Initialized {:?} from channel {:?}", id, channel_id);
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn target_for_node(&self, node: NodeId) -> Option<TargetId> {
        self.by_node
            .get(&node)
            .copied()
            .filter(|id| self.targets.get(*id).is_some())
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn kind(&self, id: TargetId) -> Option<ObjectKind> {
        self.targets.get(id).map(|t| t.kind)
    }

    /// Kind as presented to layout; activation placeholders show as modules
    pub fn displayed_kind(&self, id: TargetId) -> Option<ObjectKind> {
        self.targets.get(id).map(|t| {
            if t.kind == ObjectKind::Null && t.fallback.is_activation_placeholder() {
                ObjectKind::Module
            } else {
                t.kind
            }
        })
    }

    /// Meaningful only while the kind is Null
    pub fn fallback_reason(&self, id: TargetId) -> Option<FallbackReason> {
        self.targets.get(id).map(|t| t.fallback)
    }

    pub fn content_type(&self, id: TargetId) -> Option<&str> {
        self.targets.get(id).map(|t| t.params.content_type.as_str())
    }

    pub fn uri(&self, id: TargetId) -> Option<&Url> {
        self.targets.get(id).and_then(|t| t.params.uri.as_ref())
    }

    pub fn base_uri(&self, id: TargetId) -> Option<&Url> {
        self.targets.get(id).and_then(|t| t.params.base_uri.as_ref())
    }

    pub fn parameters(&self, id: TargetId) -> Option<&Parameters> {
        self.targets.get(id).map(|t| &t.params)
    }

    pub fn activated(&self, id: TargetId) -> bool {
        self.targets.get(id).is_some_and(|t| t.activated)
    }

    pub fn channel(&self, id: TargetId) -> Option<&Channel> {
        self.targets.get(id).and_then(|t| t.channel.as_ref())
    }

    pub fn is_channel_loaded(&self, id: TargetId) -> bool {
        self.targets.get(id).is_some_and(|t| t.channel_loaded)
    }

    pub fn has_running_module(&self, id: TargetId) -> bool {
        self.targets.get(id).is_some_and(|t| t.instance.is_some())
    }

    pub fn has_subdocument(&self, id: TargetId) -> bool {
        self.targets.get(id).is_some_and(|t| t.subdocument.is_some())
    }

    pub fn instance(&self, id: TargetId) -> Option<&InstanceHandle> {
        self.targets.get(id).and_then(|t| t.instance.as_ref())
    }

    /// Externally observable state bits
    pub fn object_state(&self, id: TargetId) -> Result<ObjectState, ObjectError> {
        let target = self.target(id)?;
        Ok(match target.kind {
            ObjectKind::Loading => ObjectState::LOADING,
            ObjectKind::Image => self.services.images.image_state(target.node),
            // Loaded documents and modules display something
            ObjectKind::Module | ObjectKind::Document => ObjectState::EMPTY,
            ObjectKind::Null => ObjectState::for_fallback(target.fallback),
        })
    }

    // ========================================================================
    // Task queue
    // ========================================================================

    pub(crate) fn post_event(&mut self, node: NodeId, event: ObjectEvent) {
        tracing::debug!("Queuing {} event for {:?}", event.name(), node);
        self.tasks.post(TaskKind::FireEvent { node, event });
    }

    /// Stop a module on the next turn unless it regains document and frame
    pub(crate) fn queue_stop_check(&mut self, id: TargetId) -> Result<(), ObjectError> {
        self.target(id)?;
        let token = self.tasks.post(TaskKind::CheckModuleStop(id));
        self.target_mut(id)?.pending_stop_check = Some(token);
        Ok(())
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.tasks.has_pending_work()
    }

    /// Run queued tasks until none are runnable; returns how many ran
    pub fn run_pending_tasks(&mut self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.tasks.next() {
            self.run_task(task);
            ran += 1;
        }
        ran
    }

    /// Advance the task clock, then run whatever became due
    pub fn advance_time(&mut self, delta_ms: u64) -> usize {
        self.tasks.tick(delta_ms);
        self.run_pending_tasks()
    }

    fn run_task(&mut self, task: Task) {
        match task.kind {
            TaskKind::AsyncInstantiate(id) => {
                let Some(target) = self.targets.get_mut(id) else {
                    return;
                };
                if target.pending_instantiate != Some(task.token) {
                    tracing::debug!("Instantiate task for {:?} was revoked", id);
                    return;
                }
                target.pending_instantiate = None;
                if let Err(e) = self.sync_start_instance(id) {
                    tracing::debug!("Deferred instantiation of {:?} failed: {}", id, e);
                }
            }
            TaskKind::CheckModuleStop(id) => self.check_module_stop(id, task.token),
            TaskKind::DelayedStop { target, instance } => self.run_delayed_stop(target, instance),
            TaskKind::FireEvent { node, event } => self.fire_event(node, &event),
        }
    }

    fn stop_check_pending(&self, id: TargetId, token: TaskToken) -> bool {
        self.targets
            .get(id)
            .is_some_and(|t| t.pending_stop_check == Some(token))
    }

    fn check_module_stop(&mut self, id: TargetId, token: TaskToken) {
        if !self.stop_check_pending(id, token) {
            return;
        }
        let Ok(node) = self.target(id).map(|t| t.node) else {
            return;
        };

        if !self.services.document.document_info(node).in_active_document() {
            tracing::info!("Unloading module {:?} outside of an active document", id);
            self.unload_object(id, true);
            return;
        }

        let document = Rc::clone(&self.services.document);
        if document.primary_frame(node).is_none() {
            // See whether layout gives the node a frame back
            document.flush_layout(self, node);
            if !self.stop_check_pending(id, token) {
                return;
            }
            if document.primary_frame(node).is_none() {
                tracing::info!("Stopping module {:?} that lost its frame", id);
                self.stop_instance(id);
                return;
            }
        }

        if let Some(target) = self.targets.get_mut(id) {
            target.pending_stop_check = None;
        }
    }

    fn fire_event(&mut self, node: NodeId, event: &ObjectEvent) {
        let info = self.services.document.document_info(node);
        let deliver = if event.requires_active_document() {
            info.active
        } else {
            info.in_document
        };
        if deliver {
            self.services.events.dispatch(node, event);
        } else {
            tracing::debug!("Dropping {} event for {:?}", event.name(), node);
        }
    }
}
