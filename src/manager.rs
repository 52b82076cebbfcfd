//! The request registry, task queue, worker pool and management-record handling, spec §4.6.
//!
//! Generalizes the teacher's single-connection `run()` loop in `minifcgi.rs` into a
//! multiplexing, multi-worker design: one reactor/transceiver thread plus N worker threads
//! draining a shared task queue, following the thread-role split in spec §5.

use crate::config::{Config, FCGI_MAX_CONNS, FCGI_MAX_REQS, FCGI_MPXS_CONNS};
use crate::error::{FcgiError, Result};
use crate::message::{Message, RequestId, Socket};
use crate::reactor::Reactor;
use crate::record::{self, BeginRequestBody, Header, RecordType};
use crate::request::{Factory, Handler, Request};
use crate::transceiver::Transceiver;
use num_traits::ToPrimitive;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

/// Enforces spec §4.6's "process-wide singleton" rule across every `Manager<H>` instance,
/// regardless of the handler type `H`.
static RUNNING: AtomicBool = AtomicBool::new(false);

/// The request registry, task queue and worker pool for one FastCGI application.
pub struct Manager<H: Handler> {
    config: Config,
    reactor: Arc<Reactor>,
    transceiver: Arc<Transceiver>,
    factory: Factory<H>,
    registry: RwLock<BTreeMap<RequestId, Mutex<Request<H>>>>,
    mgmt_queue: Mutex<HashMap<Socket, VecDeque<Message>>>,
    tasks: Mutex<VecDeque<RequestId>>,
    task_cv: Condvar,
    stopping: AtomicBool,
    terminated: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    transceiver_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<H: Handler> Manager<H> {
    /// Constructs the manager. Fails if another `Manager` (of any handler type) already
    /// exists in this process.
    pub fn new(config: Config, factory: Factory<H>) -> Result<Arc<Self>> {
        if RUNNING.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(FcgiError::AlreadyRunning);
        }
        let reactor = Arc::new(Reactor::new()?);
        Ok(Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let router: Arc<dyn Fn(RequestId, Message) + Send + Sync> = Arc::new(move |id, msg| {
                if let Some(manager) = weak.upgrade() {
                    manager.push(id, msg);
                }
            });
            let transceiver = Arc::new(Transceiver::new(reactor.clone(), router));
            Self {
                config,
                reactor,
                transceiver,
                factory,
                registry: RwLock::new(BTreeMap::new()),
                mgmt_queue: Mutex::new(HashMap::new()),
                tasks: Mutex::new(VecDeque::new()),
                task_cv: Condvar::new(),
                stopping: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
                transceiver_thread: Mutex::new(None),
            }
        }))
    }

    pub fn listen_unix(&self, listener: mio::net::UnixListener) -> std::io::Result<()> {
        self.reactor.listen_unix(listener)
    }

    pub fn listen_tcp(&self, listener: mio::net::TcpListener) -> std::io::Result<()> {
        self.reactor.listen_tcp(listener)
    }

    pub fn listen_inherited(&self) -> std::io::Result<()> {
        self.reactor.listen_inherited()
    }

    /// Spawns the configured number of worker threads plus the reactor/transceiver thread.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..self.config.workers.max(1) {
            let manager = self.clone();
            workers.push(std::thread::spawn(move || manager.worker_loop()));
        }
        drop(workers);
        let transceiver = self.transceiver.clone();
        *self.transceiver_thread.lock().unwrap() = Some(std::thread::spawn(move || transceiver.run()));
    }

    /// Routes one message by `RequestId`, spec §4.6's `push(id, message)`.
    pub fn push(&self, id: RequestId, msg: Message) {
        if id.is_bad() {
            self.drop_requests_on_socket(&id.socket);
            return;
        }
        if id.is_management() {
            self.mgmt_queue
                .lock()
                .unwrap()
                .entry(id.socket.clone())
                .or_default()
                .push_back(msg);
            self.push_task(id);
            return;
        }
        {
            let registry = self.registry.read().unwrap();
            if let Some(request) = registry.get(&id) {
                request.lock().unwrap().push(msg);
                drop(registry);
                self.push_task(id);
                return;
            }
        }
        if !self.try_begin_request(&id, &msg) {
            log::warn!("dropping message for unknown request {:?}", id);
        }
    }

    fn try_begin_request(&self, id: &RequestId, msg: &Message) -> bool {
        if !msg.is_record() || msg.data.len() < record::HEADER_LENGTH {
            return false;
        }
        let mut header_bytes = [0u8; record::HEADER_LENGTH];
        header_bytes.copy_from_slice(&msg.data[..record::HEADER_LENGTH]);
        let Ok(header) = Header::from_bytes(&header_bytes) else {
            return false;
        };
        if header.rec_type != RecordType::BeginRequest {
            return false;
        }
        let content = &msg.data[record::HEADER_LENGTH..record::HEADER_LENGTH + header.content_length as usize];
        let Some(begin) = BeginRequestBody::parse(content) else {
            return false;
        };
        let handler = (self.factory)();
        let request = Request::new(
            id.clone(),
            begin.role,
            begin.keep_alive,
            handler,
            self.transceiver.clone(),
            self.config.max_post_size,
        );
        self.registry.write().unwrap().insert(id.clone(), Mutex::new(request));
        true
    }

    fn drop_requests_on_socket(&self, socket: &Socket) {
        let mut registry = self.registry.write().unwrap();
        let victims: Vec<RequestId> = registry
            .iter()
            .filter(|(rid, mutex)| rid.socket == *socket && mutex.try_lock().is_ok())
            .map(|(rid, _)| rid.clone())
            .collect();
        for id in victims {
            registry.remove(&id);
        }
    }

    fn push_task(&self, id: RequestId) {
        self.tasks.lock().unwrap().push_back(id);
        self.task_cv.notify_one();
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let id = {
                let mut tasks = self.tasks.lock().unwrap();
                loop {
                    if let Some(id) = tasks.pop_front() {
                        break Some(id);
                    }
                    if self.terminated.load(Ordering::Acquire) {
                        break None;
                    }
                    if self.stopping.load(Ordering::Acquire) && self.registry.read().unwrap().is_empty() {
                        break None;
                    }
                    tasks = self.task_cv.wait(tasks).unwrap();
                }
            };
            let Some(id) = id else { return };
            if self.terminated.load(Ordering::Acquire) {
                return;
            }
            if id.is_management() {
                self.run_management(id.socket);
                continue;
            }
            self.handle_task(id);
        }
    }

    fn handle_task(&self, id: RequestId) {
        let registry = self.registry.read().unwrap();
        let Some(request) = registry.get(&id) else {
            return;
        };
        match request.try_lock() {
            Ok(mut request) => {
                let complete = request.handler() || !id.socket.valid();
                drop(request);
                drop(registry);
                if complete {
                    self.registry.write().unwrap().remove(&id);
                }
            }
            Err(_) => {
                drop(registry);
                // Another worker already owns this request; retry once it's free.
                self.push_task(id);
            }
        }
    }

    fn run_management(&self, socket: Socket) {
        let pending: VecDeque<Message> = self.mgmt_queue.lock().unwrap().remove(&socket).unwrap_or_default();
        for msg in pending {
            if !msg.is_record() || msg.data.len() < record::HEADER_LENGTH {
                continue;
            }
            let mut header_bytes = [0u8; record::HEADER_LENGTH];
            header_bytes.copy_from_slice(&msg.data[..record::HEADER_LENGTH]);
            let Ok(header) = Header::from_bytes(&header_bytes) else {
                continue;
            };
            let content = &msg.data[record::HEADER_LENGTH..record::HEADER_LENGTH + header.content_length as usize];
            let management_id = RequestId::management(socket.clone());
            match header.rec_type {
                RecordType::GetValues => {
                    let reply = self.get_values_reply(content);
                    self.transceiver.send(&management_id, RecordType::GetValuesResult, &reply);
                }
                other => {
                    let byte = other.to_u8().unwrap_or(0);
                    self.transceiver
                        .send(&management_id, RecordType::UnknownType, &record::unknown_type_body(byte));
                }
            }
        }
    }

    /// Replies only to the variable names actually queried, per spec §4.6/§6.
    fn get_values_reply(&self, content: &[u8]) -> Vec<u8> {
        let mut reply = Vec::new();
        let mut remaining = content;
        loop {
            match record::parse_name_value_pair(remaining) {
                record::NameValue::Pair { name, consumed, .. } => {
                    if let Some(value) = known_variable(name) {
                        reply.extend(record::encode_name_value_pair(name, value.as_bytes()));
                    }
                    remaining = &remaining[consumed..];
                }
                record::NameValue::End | record::NameValue::Incomplete => break,
            }
        }
        reply
    }

    /// Requests a graceful shutdown: workers exit once the registry drains; the
    /// transceiver stops once its outbound queue drains.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.task_cv.notify_all();
        self.transceiver.stop();
    }

    /// Requests an immediate shutdown, abandoning in-flight requests and queued output.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.task_cv.notify_all();
        self.transceiver.terminate();
    }

    /// Waits for every worker and the transceiver thread to exit.
    pub fn join(&self) {
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
        if let Some(handle) = self.transceiver_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl<H: Handler> Drop for Manager<H> {
    fn drop(&mut self) {
        RUNNING.store(false, Ordering::Release);
    }
}

fn known_variable(name: &[u8]) -> Option<String> {
    match name {
        b"FCGI_MAX_CONNS" => Some(FCGI_MAX_CONNS.to_string()),
        b"FCGI_MAX_REQS" => Some(FCGI_MAX_REQS.to_string()),
        b"FCGI_MPXS_CONNS" => Some(FCGI_MPXS_CONNS.to_string()),
        _ => None,
    }
}
