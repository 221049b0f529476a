//! Shared test host for fos-object integration tests
//!
//! One mock object stands in for every collaborator. It records the calls it
//! receives and exposes one-shot hooks that run arbitrary code against the
//! loader from inside a collaborator call.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use fos_object::*;
use url::Url;

pub const MODULE_TYPE: &str = "application/x-test";
pub const DOCUMENT_URL: &str = "https://example.com/dir/index.html";

/// Re-entrant hook run from inside a collaborator call
pub type Hook = Box<dyn FnOnce(&mut ObjectLoader)>;

/// Observable collaborator calls, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(ChannelId, Url),
    Cancel(ChannelId),
    SetContentType(ChannelId, String),
    SetLoadFlags(ChannelId, LoadFlags),
    Spawn(InstanceId, String),
    Stop(InstanceId),
    SetFrame(InstanceId, Option<FrameId>),
    StateChanged(ObjectState),
    FlushFrames,
    RecreateFrames,
    ImageLoad(ChannelId),
    ImageCancel,
    DocumentCreate(SubDocumentId),
    DocumentOpen(SubDocumentId),
    DocumentDestroy(SubDocumentId),
}

/// What a stream consumer saw
#[derive(Debug, Clone, PartialEq)]
pub enum StreamCall {
    Start(ChannelId),
    Data(ChannelId, Vec<u8>),
    Stop(ChannelId, ChannelStatus),
}

/// Stream consumer shared by images, documents and modules
#[derive(Default)]
pub struct RecordingConsumer {
    pub calls: RefCell<Vec<StreamCall>>,
    pub refuse_start: Cell<bool>,
}

impl RecordingConsumer {
    pub fn starts(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, StreamCall::Start(_)))
            .count()
    }
}

impl StreamConsumer for RecordingConsumer {
    fn on_start_request(&self, _: &mut ObjectLoader, channel: &Channel) -> Result<(), ObjectError> {
        self.calls.borrow_mut().push(StreamCall::Start(channel.id));
        if self.refuse_start.get() {
            return Err(ObjectError::Aborted);
        }
        Ok(())
    }

    fn on_data_available(&self, _: &mut ObjectLoader, channel: &Channel, data: &[u8]) -> Result<(), ObjectError> {
        self.calls.borrow_mut().push(StreamCall::Data(channel.id, data.to_vec()));
        Ok(())
    }

    fn on_stop_request(&self, _: &mut ObjectLoader, channel: &Channel, status: ChannelStatus) {
        self.calls.borrow_mut().push(StreamCall::Stop(channel.id, status));
    }
}

pub struct MockHost {
    pub info: RefCell<DocumentInfo>,
    pub frame: Cell<Option<FrameId>>,
    /// Frame that a layout flush creates
    pub frame_after_flush: Cell<Option<FrameId>>,
    pub nesting_level: Cell<u32>,

    pub image_types: RefCell<Vec<String>>,
    pub document_types: RefCell<Vec<String>>,
    pub module_types: RefCell<Vec<String>>,
    pub extension_modules: RefCell<HashMap<String, String>>,
    pub module_states: RefCell<HashMap<String, ModuleState>>,
    pub blocklist: RefCell<HashMap<String, BlocklistState>>,
    pub previews: RefCell<HashMap<String, PlayPreview>>,
    pub permission: Cell<Permission>,

    pub load_decision: Cell<PolicyDecision>,
    pub process_decision: Cell<PolicyDecision>,
    pub uri_allowed: Cell<bool>,
    pub spawn_fails: Cell<bool>,
    pub recursive_load: Cell<bool>,

    pub calls: RefCell<Vec<Call>>,
    pub requests: RefCell<Vec<ChannelRequest>>,
    pub events: RefCell<Vec<(NodeId, ObjectEvent)>>,
    pub consumer: Rc<RecordingConsumer>,
    next_id: Cell<u64>,

    pub on_check_load: RefCell<Option<Hook>>,
    pub on_cancel: RefCell<Option<Hook>>,
    pub on_flush_layout: RefCell<Option<Hook>>,
    pub on_spawn: RefCell<Option<Hook>>,
    pub on_stop: RefCell<Option<Hook>>,
}

impl MockHost {
    pub fn new() -> Rc<Self> {
        let url = Url::parse(DOCUMENT_URL).unwrap();
        Rc::new(Self {
            info: RefCell::new(DocumentInfo::active(url)),
            frame: Cell::new(Some(FrameId(1))),
            frame_after_flush: Cell::new(None),
            nesting_level: Cell::new(0),
            image_types: RefCell::new(vec!["image/png".to_string(), "image/gif".to_string()]),
            document_types: RefCell::new(vec!["text/html".to_string(), "image/svg+xml".to_string()]),
            module_types: RefCell::new(vec![MODULE_TYPE.to_string(), "application/x-java-vm".to_string()]),
            extension_modules: RefCell::new(HashMap::from([("tst".to_string(), MODULE_TYPE.to_string())])),
            module_states: RefCell::new(HashMap::new()),
            blocklist: RefCell::new(HashMap::new()),
            previews: RefCell::new(HashMap::new()),
            permission: Cell::new(Permission::Unknown),
            load_decision: Cell::new(PolicyDecision::Accept),
            process_decision: Cell::new(PolicyDecision::Accept),
            uri_allowed: Cell::new(true),
            spawn_fails: Cell::new(false),
            recursive_load: Cell::new(false),
            calls: RefCell::new(Vec::new()),
            requests: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
            consumer: Rc::new(RecordingConsumer::default()),
            next_id: Cell::new(100),
            on_check_load: RefCell::new(None),
            on_cancel: RefCell::new(None),
            on_flush_layout: RefCell::new(None),
            on_spawn: RefCell::new(None),
            on_stop: RefCell::new(None),
        })
    }

    fn id(&self) -> u64 {
        self.next_id.set(self.next_id.get() + 1);
        self.next_id.get()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn run_hook(slot: &RefCell<Option<Hook>>, loader: &mut ObjectLoader) {
        let hook = slot.borrow_mut().take();
        if let Some(hook) = hook {
            hook(loader);
        }
    }

    pub fn set_hook(slot: &RefCell<Option<Hook>>, hook: impl FnOnce(&mut ObjectLoader) + 'static) {
        *slot.borrow_mut() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Channels opened so far, in order
    pub fn opened(&self) -> Vec<(ChannelId, Url)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Open(id, uri) => Some((*id, uri.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn last_channel(&self) -> ChannelId {
        self.opened().last().map(|(id, _)| *id).expect("no channel opened")
    }

    pub fn spawned(&self) -> Vec<InstanceId> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Spawn(id, _) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Vec<InstanceId> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Stop(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.borrow().iter().map(|(_, e)| e.name()).collect()
    }

    /// Node leaves the tree; the document stays active
    pub fn detach(&self) {
        self.info.borrow_mut().in_document = false;
        self.frame.set(None);
    }

    pub fn attach(&self) {
        self.info.borrow_mut().in_document = true;
        self.frame.set(Some(FrameId(1)));
    }

    pub fn set_module_state(&self, mime: &str, state: ModuleState) {
        self.module_states.borrow_mut().insert(mime.to_string(), state);
    }

    pub fn set_blocklist(&self, mime: &str, state: BlocklistState) {
        self.blocklist.borrow_mut().insert(mime.to_string(), state);
    }
}

impl DocumentHost for MockHost {
    fn document_info(&self, _: NodeId) -> DocumentInfo {
        self.info.borrow().clone()
    }

    fn primary_frame(&self, _: NodeId) -> Option<FrameId> {
        self.frame.get()
    }

    fn flush_layout(&self, loader: &mut ObjectLoader, _: NodeId) {
        if let Some(frame) = self.frame_after_flush.take() {
            self.frame.set(Some(frame));
        }
        Self::run_hook(&self.on_flush_layout, loader);
    }

    fn content_state_changed(&self, _: &mut ObjectLoader, _: NodeId, changed: ObjectState) {
        self.record(Call::StateChanged(changed));
    }

    fn flush_frames(&self, _: &mut ObjectLoader, _: NodeId) {
        self.record(Call::FlushFrames);
    }

    fn recreate_frames(&self, _: &mut ObjectLoader, _: NodeId) {
        self.record(Call::RecreateFrames);
    }

    fn event_loop_nesting_level(&self) -> u32 {
        self.nesting_level.get()
    }
}

impl ContentPolicy for MockHost {
    fn check_load(&self, loader: &mut ObjectLoader, _: &PolicyRequest) -> PolicyDecision {
        Self::run_hook(&self.on_check_load, loader);
        self.load_decision.get()
    }

    fn check_process(&self, _: &mut ObjectLoader, _: &PolicyRequest) -> PolicyDecision {
        self.process_decision.get()
    }

    fn check_load_uri(&self, _: &Principal, _: &Url) -> bool {
        self.uri_allowed.get()
    }
}

impl ChannelProvider for MockHost {
    fn can_handle(&self, uri: &Url) -> bool {
        matches!(uri.scheme(), "http" | "https" | "file" | "data")
    }

    fn open(&self, _: &mut ObjectLoader, request: &ChannelRequest) -> Result<ChannelId, ObjectError> {
        let id = ChannelId(self.id());
        self.requests.borrow_mut().push(request.clone());
        self.record(Call::Open(id, request.uri.clone()));
        Ok(id)
    }

    fn cancel(&self, loader: &mut ObjectLoader, channel: ChannelId) {
        self.record(Call::Cancel(channel));
        Self::run_hook(&self.on_cancel, loader);
    }

    fn set_content_type(&self, channel: ChannelId, content_type: &str) {
        self.record(Call::SetContentType(channel, content_type.to_string()));
    }

    fn set_load_flags(&self, channel: ChannelId, flags: LoadFlags) {
        self.record(Call::SetLoadFlags(channel, flags));
    }
}

impl ModuleHost for MockHost {
    fn module_exists_for_type(&self, mime: &str) -> bool {
        self.module_types.borrow().iter().any(|m| m == mime)
    }

    fn module_for_extension(&self, extension: &str) -> Option<String> {
        self.extension_modules.borrow().get(extension).cloned()
    }

    fn enabled_state(&self, mime: &str) -> ModuleState {
        self.module_states
            .borrow()
            .get(mime)
            .copied()
            .unwrap_or(ModuleState::Enabled)
    }

    fn blocklist_state(&self, mime: &str) -> BlocklistState {
        self.blocklist.borrow().get(mime).copied().unwrap_or_default()
    }

    fn play_preview(&self, mime: &str) -> Option<PlayPreview> {
        self.previews.borrow().get(mime).copied()
    }

    fn permission_key(&self, mime: &str) -> String {
        format!("plugin:{mime}")
    }

    fn spawn(&self, loader: &mut ObjectLoader, request: &SpawnRequest) -> Result<InstanceId, ObjectError> {
        if self.spawn_fails.get() {
            return Err(ObjectError::SpawnFailed("module refused to start".to_string()));
        }
        let id = InstanceId(self.id());
        self.record(Call::Spawn(id, request.mime.clone()));
        Self::run_hook(&self.on_spawn, loader);
        Ok(id)
    }

    fn stop(&self, loader: &mut ObjectLoader, instance: InstanceId) {
        self.record(Call::Stop(instance));
        Self::run_hook(&self.on_stop, loader);
    }

    fn module_name(&self, _: InstanceId) -> String {
        "Test Module".to_string()
    }

    fn set_frame(&self, instance: InstanceId, frame: Option<FrameId>) {
        self.record(Call::SetFrame(instance, frame));
    }

    fn new_stream_sink(&self, _: InstanceId, _: Option<&Url>) -> Result<Rc<dyn StreamConsumer>, ObjectError> {
        Ok(self.consumer.clone())
    }
}

impl PermissionStore for MockHost {
    fn test(&self, _: &Principal, _: &str) -> Permission {
        self.permission.get()
    }

    fn refresh_expiry(&self, _: &Principal, _: &str, _: Duration, _: Duration) {}
}

impl ImageLoader for MockHost {
    fn is_supported(&self, mime: &str) -> bool {
        self.image_types.borrow().iter().any(|m| m == mime)
    }

    fn load_with_channel(
        &self,
        _: &mut ObjectLoader,
        _: NodeId,
        channel: &Channel,
    ) -> Result<Rc<dyn StreamConsumer>, ObjectError> {
        self.record(Call::ImageLoad(channel.id));
        Ok(self.consumer.clone())
    }

    fn cancel(&self, _: NodeId) {
        self.record(Call::ImageCancel);
    }
}

impl SubDocumentLoader for MockHost {
    fn is_supported(&self, mime: &str) -> bool {
        self.document_types.borrow().iter().any(|m| m == mime)
    }

    fn create(&self, _: NodeId, _: bool) -> Option<SubDocumentId> {
        let id = SubDocumentId(self.id());
        self.record(Call::DocumentCreate(id));
        Some(id)
    }

    fn is_recursive_load(&self, _: SubDocumentId, _: &Url) -> bool {
        self.recursive_load.get()
    }

    fn open(
        &self,
        _: &mut ObjectLoader,
        sub: SubDocumentId,
        _: &Channel,
    ) -> Result<Rc<dyn StreamConsumer>, ObjectError> {
        self.record(Call::DocumentOpen(sub));
        Ok(self.consumer.clone())
    }

    fn destroy(&self, sub: SubDocumentId) {
        self.record(Call::DocumentDestroy(sub));
    }
}

impl EventSink for MockHost {
    fn dispatch(&self, node: NodeId, event: &ObjectEvent) {
        self.events.borrow_mut().push((node, event.clone()));
    }
}

pub fn loader_with(host: &Rc<MockHost>, config: ObjectConfig) -> ObjectLoader {
    fos_object::logging::init_for_tests();
    ObjectLoader::new(Rc::new(config), Services::uniform(Rc::clone(host)))
}

pub fn setup() -> (Rc<MockHost>, ObjectLoader) {
    let host = MockHost::new();
    let loader = loader_with(&host, ObjectConfig::default());
    (host, loader)
}

/// Bind an element as node 1 and load it
pub fn load(loader: &mut ObjectLoader, element: ElementInfo) -> TargetId {
    let id = loader.bind(NodeId(1), element);
    loader.load_object(id, true, false).unwrap();
    id
}

/// Load a module through an `<embed>` and spawn it
pub fn running_module(host: &MockHost, loader: &mut ObjectLoader) -> (TargetId, InstanceId) {
    let id = load(loader, ElementInfo::embed().with_type(MODULE_TYPE));
    loader.run_pending_tasks();
    let instance = loader.instance(id).map(|i| i.id).expect("module not spawned");
    assert_eq!(host.spawned().last(), Some(&instance));
    (id, instance)
}
