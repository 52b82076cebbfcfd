//! The per-request state machine: PARAMS → IN → OUT, spec §4.5.
//!
//! Generalizes the teacher's single-shot `Request`/`Handler` pair in `minifcgi.rs` (which
//! read one full request off a blocking stream and called a single `response` callback)
//! into the incremental, message-driven version the manager's worker pool drives one
//! record at a time.

use crate::encode::TextEncoding;
use crate::http::multipart::{self, Part};
use crate::http::{split_content_type, Environment, MultiMap};
use crate::message::{Message, RequestId};
use crate::record::{self, Header, ProtocolStatus, RecordType, Role};
use crate::stream::OutputStream;
use crate::transceiver::Transceiver;
use std::collections::VecDeque;
use std::sync::Arc;

/// Everything a [`Handler`] needs to read the request and write a response.
pub struct RequestContext {
    pub env: Environment,
    /// The raw accumulated POST body.
    pub post: Vec<u8>,
    /// Populated from `post` after `application/x-www-form-urlencoded` or
    /// `multipart/form-data` parsing (spec §4.4's `parsePostBuffer`).
    pub posts: MultiMap,
    pub files: Vec<Part>,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
}

/// The user-supplied response logic for one request, played against the request's
/// lifecycle. Mirrors the shape of the teacher's `minifcgi::Handler` trait so callers
/// porting a handler over don't have to relearn the basic contract.
pub trait Handler: Send + 'static {
    /// Called once the full request is available (or again, for every message delivered
    /// through the user callback path — see spec §4.5). Return `true` once the response is
    /// complete; `false` to keep the request open, waiting on another callback.
    fn response(&mut self, ctx: &mut RequestContext) -> anyhow::Result<bool>;

    /// Called for each nonempty STDIN chunk as it arrives, before the body is complete.
    fn in_handler(&mut self, _ctx: &mut RequestContext, _size: usize) {}

    /// Called once STDIN is complete, before the built-in urlencoded/multipart parser runs.
    /// Return `true` to skip the built-in parser (the handler consumed `ctx.post` itself).
    fn in_processor(&mut self, _ctx: &mut RequestContext) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Called when the request engine hits an internal error partway through processing.
    fn error_handler(&mut self, ctx: &mut RequestContext, error: &anyhow::Error) {
        ctx.stderr.write_str(&format!("internal error: {error}\n"));
    }

    /// Called when `CONTENT_LENGTH` exceeds the configured maximum POST size.
    fn big_post_error_handler(&mut self, ctx: &mut RequestContext) {
        ctx.stdout.set_encoding(TextEncoding::None);
        ctx.stdout.write_str("Status: 413 Payload Too Large\r\n\r\n");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Params,
    In,
    Out,
}

/// A factory producing one `H` per new request, stored by the manager. Mirrors spec §4.6's
/// "construct a new request of the configured user type via the factory".
pub type Factory<H> = Arc<dyn Fn() -> H + Send + Sync>;

/// One in-flight request: protocol state, accumulated environment/body, and the user
/// handler driving the response.
pub struct Request<H: Handler> {
    pub id: RequestId,
    role: Role,
    keep_alive: bool,
    state: State,
    params_buf: Vec<u8>,
    ctx: RequestContext,
    handler: H,
    inbound: VecDeque<Message>,
    transceiver: Arc<Transceiver>,
    max_post_size: usize,
    done: bool,
}

impl<H: Handler> Request<H> {
    pub fn new(
        id: RequestId,
        role: Role,
        keep_alive: bool,
        handler: H,
        transceiver: Arc<Transceiver>,
        max_post_size: usize,
    ) -> Self {
        let stdout = OutputStream::new(transceiver.clone(), id.clone(), RecordType::Stdout);
        let stderr = OutputStream::new(transceiver.clone(), id.clone(), RecordType::Stderr);
        Self {
            id,
            role,
            keep_alive,
            state: State::Params,
            params_buf: Vec::new(),
            ctx: RequestContext {
                env: Environment::default(),
                post: Vec::new(),
                posts: MultiMap::new(),
                files: Vec::new(),
                stdout,
                stderr,
            },
            handler,
            inbound: VecDeque::new(),
            transceiver,
            max_post_size,
            done: false,
        }
    }

    /// Queues a message for this request. Thread-safe only insofar as the caller (the
    /// manager) serializes access through the request's own mutex.
    pub fn push(&mut self, msg: Message) {
        self.inbound.push_back(msg);
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Drains every currently queued message. Returns `true` once the request has finished
    /// (an `END_REQUEST` was emitted) and should be dropped from the registry.
    pub fn handler(&mut self) -> bool {
        while let Some(msg) = self.inbound.pop_front() {
            match self.handle_one(msg) {
                Ok(true) => {
                    self.done = true;
                    return true;
                }
                Ok(false) => continue,
                Err(e) => {
                    self.handler.error_handler(&mut self.ctx, &e);
                    self.finish(ProtocolStatus::RequestComplete);
                    self.done = true;
                    return true;
                }
            }
        }
        false
    }

    fn handle_one(&mut self, msg: Message) -> anyhow::Result<bool> {
        if !msg.is_record() {
            // User callback path: re-invoke response() without touching protocol state.
            let complete = self.handler.response(&mut self.ctx)?;
            if complete {
                self.finish(ProtocolStatus::RequestComplete);
            }
            return Ok(complete);
        }

        let mut header_bytes = [0u8; record::HEADER_LENGTH];
        header_bytes.copy_from_slice(&msg.data[..record::HEADER_LENGTH]);
        let header = Header::from_bytes(&header_bytes)?;
        let content = &msg.data[record::HEADER_LENGTH..record::HEADER_LENGTH + header.content_length as usize];

        if header.rec_type == RecordType::AbortRequest {
            self.finish(ProtocolStatus::RequestComplete);
            return Ok(true);
        }

        match (self.state, header.rec_type) {
            (State::Params, RecordType::Params) => self.handle_params(content),
            (State::In, RecordType::Stdin) => self.handle_stdin(content),
            (state, found) => Err(crate::error::FcgiError::ProtocolViolation {
                found,
                expected: match state {
                    State::Params => "PARAMS",
                    State::In => "STDIN",
                    State::Out => "no further inbound records",
                },
            }
            .into()),
        }
    }

    fn handle_params(&mut self, content: &[u8]) -> anyhow::Result<bool> {
        if content.is_empty() {
            if !matches!(self.role, Role::Responder | Role::Authorizer) {
                self.finish(ProtocolStatus::UnknownRole);
                return Ok(true);
            }
            if self.ctx.env.content_length > self.max_post_size {
                self.handler.big_post_error_handler(&mut self.ctx);
                self.finish(ProtocolStatus::RequestComplete);
                return Ok(true);
            }
            self.state = State::In;
            return Ok(false);
        }
        self.params_buf.extend_from_slice(content);
        loop {
            match record::parse_name_value_pair(&self.params_buf) {
                record::NameValue::Pair { name, value, consumed } => {
                    self.ctx.env.set(name, value);
                    self.params_buf.drain(..consumed);
                }
                record::NameValue::End | record::NameValue::Incomplete => break,
            }
        }
        Ok(false)
    }

    fn handle_stdin(&mut self, content: &[u8]) -> anyhow::Result<bool> {
        if content.is_empty() {
            let handled = self.handler.in_processor(&mut self.ctx)?;
            if !handled {
                self.parse_post_buffer();
            }
            self.state = State::Out;
            let complete = self.handler.response(&mut self.ctx)?;
            if complete {
                self.finish(ProtocolStatus::RequestComplete);
            }
            return Ok(complete);
        }
        self.ctx.post.extend_from_slice(content);
        self.handler.in_handler(&mut self.ctx, content.len());
        Ok(false)
    }

    /// Dispatches `ctx.post` by content type, spec §4.4's `parsePostBuffer`.
    fn parse_post_buffer(&mut self) {
        let (bare_type, boundary) = split_content_type(&self.ctx.env.content_type);
        match bare_type {
            "application/x-www-form-urlencoded" => {
                let body = String::from_utf8_lossy(&self.ctx.post).into_owned();
                self.ctx.posts = crate::http::decode_fields(&body, '&');
            }
            "multipart/form-data" => {
                if let Some(boundary) = boundary {
                    for part in multipart::parse(&self.ctx.post, boundary) {
                        match part {
                            Part::Field { name, value } => {
                                let value = String::from_utf8_lossy(&value).into_owned();
                                self.ctx.posts.insert(name, value);
                            }
                            file @ Part::File { .. } => self.ctx.files.push(file),
                        }
                    }
                }
            }
            _ => {
                // Unrecognized content type: leave ctx.post for the handler to interpret itself.
            }
        }
    }

    fn finish(&mut self, status: ProtocolStatus) {
        self.ctx.stdout.flush();
        self.ctx.stderr.flush();
        let body = record::end_request_body(0, status);
        self.transceiver.send(&self.id, RecordType::EndRequest, &body);
        if !self.keep_alive {
            self.transceiver.close_after_flush(self.id.socket.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Socket;
    use crate::reactor::Reactor;
    use std::sync::{Arc, Mutex};

    struct Echo {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Handler for Echo {
        fn response(&mut self, ctx: &mut RequestContext) -> anyhow::Result<bool> {
            self.calls.lock().unwrap().push(ctx.env.request_method.clone());
            ctx.stdout.write_str("Content-Type: text/plain\r\n\r\nok");
            Ok(true)
        }
    }

    fn test_transceiver() -> Arc<Transceiver> {
        let reactor = Arc::new(Reactor::new().unwrap());
        Arc::new(Transceiver::new(reactor, Arc::new(|_, _| {})))
    }

    fn params_record(fcgi_id: u16, pairs: &[(&[u8], &[u8])]) -> Message {
        let mut content = Vec::new();
        for (name, value) in pairs {
            content.extend(record::encode_name_value_pair(name, value));
        }
        Message::record(record::encode_record(RecordType::Params, fcgi_id, &content))
    }

    #[test]
    fn full_request_lifecycle_completes_and_emits_end_request() {
        let xcvr = test_transceiver();
        let id = RequestId::new(Socket::invalid(), 3);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut req = Request::new(
            id.clone(),
            Role::Responder,
            true,
            Echo { calls: calls.clone() },
            xcvr,
            1024,
        );

        req.push(params_record(3, &[(b"REQUEST_METHOD", b"GET")]));
        req.push(params_record(3, &[])); // end of PARAMS
        assert!(!req.handler());
        assert_eq!(req.state, State::In);

        req.push(Message::record(record::encode_record(RecordType::Stdin, 3, b"")));
        let complete = req.handler();
        assert!(complete);
        assert_eq!(*calls.lock().unwrap(), vec!["GET".to_string()]);
    }

    #[test]
    fn unknown_role_terminates_immediately() {
        let xcvr = test_transceiver();
        let id = RequestId::new(Socket::invalid(), 1);
        let mut req = Request::new(
            id,
            Role::Filter,
            true,
            Echo {
                calls: Arc::new(Mutex::new(Vec::new())),
            },
            xcvr,
            1024,
        );
        req.push(params_record(1, &[]));
        assert!(req.handler());
        assert!(req.is_done());
    }

    #[test]
    fn params_split_across_two_records_is_reassembled() {
        let xcvr = test_transceiver();
        let id = RequestId::new(Socket::invalid(), 1);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut req = Request::new(
            id,
            Role::Responder,
            true,
            Echo { calls: calls.clone() },
            xcvr,
            1024,
        );
        let whole = record::encode_name_value_pair(b"REQUEST_METHOD", b"POST");
        let (first, second) = whole.split_at(whole.len() / 2);
        req.push(Message::record(record::encode_record(RecordType::Params, 1, first)));
        req.push(Message::record(record::encode_record(RecordType::Params, 1, second)));
        req.push(params_record(1, &[]));
        req.push(Message::record(record::encode_record(RecordType::Stdin, 1, b"")));
        req.handler();
        assert_eq!(*calls.lock().unwrap(), vec!["POST".to_string()]);
    }
}
