//! Module Instances
//!
//! Spawning, stream hookup and teardown of external module instances,
//! including stops deferred past a nested event loop.

use std::rc::Rc;

use crate::content::{FallbackReason, ObjectKind};
use crate::events::ObjectEvent;
use crate::host::{BlocklistState, SpawnRequest, StreamConsumer};
use crate::loader::ObjectLoader;
use crate::target::{Epoch, Guard, InstanceHandle, Operation, TargetId};
use crate::tasks::TaskKind;
use crate::ObjectError;

/// Outcome of an instantiation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instantiation {
    Spawned,
    /// No frame yet; retried once layout creates one
    Deferred,
    /// Another operation took over, or there was nothing to do
    Superseded,
}

impl ObjectLoader {
    /// Spawn the module for a target resolved as [`ObjectKind::Module`].
    ///
    /// `load` is the epoch of the load pass that asked for the spawn, or
    /// `None` outside of a load.
    pub(crate) fn instantiate(&mut self, id: TargetId, load: Option<Epoch>) -> Result<Instantiation, ObjectError> {
        let target = self.target(id)?;
        let expected = match load {
            Some(epoch) => Guard::Held(epoch),
            None => Guard::Idle,
        };
        if target.instance.is_some()
            || target.kind != ObjectKind::Module
            || target.guards.loading != expected
            || target.guards.instantiating != Guard::Idle
        {
            return Ok(Instantiation::Superseded);
        }

        let epoch = self.acquire(id, Operation::Instantiating)?;
        let result = self.instantiate_guarded(id, epoch);
        self.release(id, Operation::Instantiating, epoch);
        result
    }

    fn instantiate_guarded(&mut self, id: TargetId, epoch: Epoch) -> Result<Instantiation, ObjectError> {
        let node = self.target(id)?.node;
        if !self.services.document.document_info(node).in_active_document() {
            tracing::error!("Instantiating a module outside of an active document");
            return Err(ObjectError::NotInActiveDocument);
        }

        // Layout may create the frame, or tear us down
        let document = Rc::clone(&self.services.document);
        document.flush_layout(self, node);
        if !self.holds(id, Operation::Instantiating, epoch) {
            return Ok(Instantiation::Superseded);
        }
        let Some(frame) = document.primary_frame(node) else {
            tracing::debug!("Not instantiating {:?} without a frame", id);
            return Ok(Instantiation::Deferred);
        };

        let target = self.target(id)?;
        let request = SpawnRequest {
            node,
            mime: target.params.content_type.clone(),
            uri: target.params.uri.clone(),
        };

        tracing::info!("Spawning {} module for {:?}", request.mime, id);
        let modules = Rc::clone(&self.services.modules);
        document.suspend_native();
        let spawned = modules.spawn(self, &request);
        document.resume_native();

        let instance = match spawned {
            Ok(instance) => instance,
            Err(e @ ObjectError::SpawnFailed(_)) => return Err(e),
            Err(e) => return Err(ObjectError::SpawnFailed(e.to_string())),
        };

        if !self.holds(id, Operation::Instantiating, epoch) {
            tracing::info!("Instantiation of {:?} superseded during spawn, stopping", id);
            modules.set_frame(instance, None);
            modules.stop(self, instance);
            return Ok(Instantiation::Superseded);
        }

        let handle = InstanceHandle {
            id: instance,
            name: modules.module_name(instance),
            nesting_level: document.event_loop_nesting_level(),
            mime: request.mime.clone(),
        };
        self.target_mut(id)?.instance = Some(handle);
        modules.set_frame(instance, Some(frame));

        if modules.blocklist_state(&request.mime) == BlocklistState::Outdated {
            self.post_event(node, ObjectEvent::ModuleOutdated);
        }

        // Modules that skipped the channel still get their stream
        let target = self.target(id)?;
        let needs_stream = target.channel.is_none()
            && ((target.params.uri.is_some() && !target.channel_loaded)
                || (target.channel_loaded && target.guards.loading == Guard::Idle));
        if needs_stream {
            if let Err(e) = self.open_channel(id) {
                tracing::debug!("Could not open a stream for module {:?}: {}", id, e);
            }
        }

        self.post_event(node, ObjectEvent::ModuleInstantiated);
        Ok(Instantiation::Spawned)
    }

    /// Spawn on the next turn
    pub(crate) fn async_start_instance(&mut self, id: TargetId) -> Result<(), ObjectError> {
        let target = self.target(id)?;
        if target.instance.is_some() || target.pending_instantiate.is_some() {
            return Ok(());
        }
        let info = self.services.document.document_info(target.node);
        if info.static_document || info.used_as_image {
            return Ok(());
        }

        let token = self.tasks.post(TaskKind::AsyncInstantiate(id));
        self.target_mut(id)?.pending_instantiate = Some(token);
        tracing::debug!("Queued instantiation of {:?}", id);
        Ok(())
    }

    /// Spawn now; a failed spawn switches to fallback content
    pub(crate) fn sync_start_instance(&mut self, id: TargetId) -> Result<Instantiation, ObjectError> {
        let node = self.target(id)?.node;
        if !self.services.document.document_info(node).in_active_document() {
            return Err(ObjectError::NotInActiveDocument);
        }

        match self.instantiate(id, None) {
            Err(e @ ObjectError::SpawnFailed(_)) => {
                tracing::warn!("Module spawn failed for {:?}: {}", id, e);
                self.close_channel(id);
                self.load_fallback(id, FallbackReason::Alternate, true)?;
                Err(e)
            }
            other => other,
        }
    }

    /// Stream consumer of the running instance, kept as the final listener
    pub(crate) fn make_module_listener(&mut self, id: TargetId) -> Result<Rc<dyn StreamConsumer>, ObjectError> {
        let target = self.target(id)?;
        let Some(instance) = target.instance.as_ref() else {
            return Err(ObjectError::UnexpectedState("no module instance"));
        };
        let listener = self
            .services
            .modules
            .new_stream_sink(instance.id, target.params.uri.as_ref())?;
        self.target_mut(id)?.final_listener = Some(Rc::clone(&listener));
        Ok(listener)
    }

    /// Stop the running module, optionally on a later turn
    pub fn stop_module(&mut self, id: TargetId, delayed: bool) -> Result<(), ObjectError> {
        self.target(id)?;
        self.stop_instance_with(id, delayed);
        Ok(())
    }

    pub(crate) fn stop_instance(&mut self, id: TargetId) {
        self.stop_instance_with(id, false);
    }

    fn stop_instance_with(&mut self, id: TargetId, requested: bool) {
        let Some(target) = self.targets.get_mut(id) else {
            return;
        };
        // Nothing queued may restart it
        target.pending_instantiate = None;
        target.pending_stop_check = None;
        target.guards.instantiating = Guard::Idle;
        if target.instance.is_none() {
            return;
        }

        self.close_channel(id);
        let Some(target) = self.targets.get_mut(id) else {
            return;
        };
        target.channel_loaded = false;
        let Some(instance) = target.instance.take() else {
            return;
        };

        self.services.modules.set_frame(instance.id, None);
        let delayed = self.config().wants_delayed_stop(&instance.mime, &instance.name, requested);
        self.do_stop(id, instance, delayed, false);
    }

    /// Stop `instance`. A stop already in flight defers this one.
    fn do_stop(&mut self, id: TargetId, instance: InstanceHandle, delayed: bool, forced: bool) {
        let busy = self
            .targets
            .get(id)
            .is_some_and(|t| t.guards.stopping != Guard::Idle);
        if busy && !forced {
            tracing::debug!("Stop of {:?} already in progress, deferring", instance.id);
            self.tasks.post(TaskKind::DelayedStop { target: id, instance });
            return;
        }

        let epoch = if self.targets.get(id).is_some() {
            self.acquire(id, Operation::Stopping).ok()
        } else {
            None
        };

        if delayed {
            tracing::debug!("Delaying stop of {:?}", instance.id);
            // The guard stays held until the delayed stop runs
            self.tasks.post(TaskKind::DelayedStop { target: id, instance });
            return;
        }

        tracing::info!("Stopping module instance {:?}", instance.id);
        let modules = Rc::clone(&self.services.modules);
        modules.stop(self, instance.id);

        if let Some(epoch) = epoch {
            self.release(id, Operation::Stopping, epoch);
        }
    }

    /// Run a delayed stop once the event loop unwinds below the level the
    /// instance was spawned at
    pub(crate) fn run_delayed_stop(&mut self, id: TargetId, instance: InstanceHandle) {
        let level = self.services.document.event_loop_nesting_level();
        if level > instance.nesting_level {
            tracing::debug!("Nested event loop (level {}), retrying stop later", level);
            let retry = self.config().delayed_stop_retry_ms;
            self.tasks.post_delayed(TaskKind::DelayedStop { target: id, instance }, retry);
            return;
        }
        self.do_stop(id, instance, false, true);
    }
}

