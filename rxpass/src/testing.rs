//! Message-level test doubles: a simulated flight controller with an
//! optional receiver behind its passthrough.

use {
    crate::{
        bootloader::REBOOT_MAGIC,
        error::{Error, Result},
        link::{Connector, Received, Transport},
        protocol::{
            CommandAck, CommandLong, Header, Heartbeat, MavResult, Message, MessageKind,
            ParamName, ParamValue, message::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN,
        },
        retry::RetryPolicy,
        session::SessionConfig,
    },
    std::{
        collections::{BTreeMap, HashMap, VecDeque},
        io,
        sync::{Arc, Mutex},
        time::Duration,
    },
};

/// Quadrotor, anything but a ground station.
const MAV_TYPE_QUADROTOR: u8 = 2;

/// Route `log` output through the test harness (`RUST_LOG=debug cargo test`).
fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

/// Session timings shrunk so tests run in milliseconds.
pub(crate) fn fast_config() -> SessionConfig {
    init_logging();
    let poll = Duration::from_millis(1);
    SessionConfig {
        heartbeat_timeout: Duration::from_millis(50),
        reopen_heartbeat_timeout: Duration::from_millis(50),
        param_retry: RetryPolicy::new(4, Duration::from_millis(15)).with_poll_interval(poll),
        command_retry: RetryPolicy::new(10, Duration::from_millis(15)).with_poll_interval(poll),
        passthrough_settle: Duration::ZERO,
        ..SessionConfig::default()
    }
}

/// Something that happened on a simulated link.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Opened(u32),
    Sent(Message),
    Closed,
}

/// Shared record of link events across opens.
#[derive(Debug, Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<Event>>>);

impl Log {
    fn push(&self, event: Event) {
        self.0
            .lock()
            .unwrap()
            .push(event);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0
            .lock()
            .unwrap()
            .clone()
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Sent(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn opens(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Opened(baud) => Some(baud),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn param_requests(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::ParamRequestRead(req) => Some(req.param_id.to_string()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn param_sets(&self) -> Vec<(String, f32)> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::ParamSet(set) => Some((set.param_id.to_string(), set.value)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn commands(&self) -> Vec<CommandLong> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::CommandLong(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }
}

/// How the receiver answers each reboot stage. `None` stays silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReceiverScript {
    pub(crate) probe: Option<MavResult>,
    pub(crate) arm: Option<MavResult>,
    pub(crate) execute: Option<MavResult>,
    pub(crate) flags: u8,
}

impl ReceiverScript {
    /// Accepts probe and arm, then reboots without answering.
    pub(crate) fn cooperative(flags: u8) -> Self {
        Self {
            probe: Some(MavResult::Accepted),
            arm: Some(MavResult::Accepted),
            execute: None,
            flags,
        }
    }

    /// Never answers.
    pub(crate) fn absent() -> Self {
        Self {
            probe: None,
            arm: None,
            execute: None,
            flags: 0,
        }
    }
}

/// A simulated flight controller.
///
/// Parameters live in a shared map, so writes persist across reopens just
/// like on the real controller.
#[derive(Debug, Clone)]
pub(crate) struct Bench {
    pub(crate) log: Log,
    controller: Header,
    params: Arc<Mutex<HashMap<String, f32>>>,
    heartbeat: bool,
    heartbeat_after_reopen: bool,
    deny_open: bool,
    answer_from_request: u32,
    reply_delay: u32,
    failing_param_set: Option<String>,
    receiver: Option<ReceiverScript>,
}

impl Bench {
    /// SERIAL1 MAVLink2 at 115200, SERIAL2 MAVLink2 at 57600, SERIAL3 GPS
    /// at 38400, nothing beyond.
    pub(crate) fn new() -> Self {
        let params = [
            ("SERIAL1_PROTOCOL", 2.0),
            ("SERIAL1_BAUD", 115.0),
            ("SERIAL2_PROTOCOL", 2.0),
            ("SERIAL2_BAUD", 57.0),
            ("SERIAL3_PROTOCOL", 5.0),
            ("SERIAL3_BAUD", 38.0),
            ("SERIAL_PASSTIMO", 15.0),
            ("SERIAL_PASS2", -1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            log: Log::default(),
            // Component 0 in the heartbeat, parameters live on component 1
            controller: Header {
                sequence: 0,
                system_id: 1,
                component_id: 0,
            },
            params: Arc::new(Mutex::new(params)),
            heartbeat: true,
            heartbeat_after_reopen: true,
            deny_open: false,
            answer_from_request: 1,
            reply_delay: 0,
            failing_param_set: None,
            receiver: None,
        }
    }

    pub(crate) fn with_param(self, name: &str, value: f32) -> Self {
        self.params
            .lock()
            .unwrap()
            .insert(name.to_string(), value);
        self
    }

    pub(crate) fn without_param(self, name: &str) -> Self {
        self.params
            .lock()
            .unwrap()
            .remove(name);
        self
    }

    pub(crate) fn with_receiver(mut self, receiver: ReceiverScript) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// No heartbeat at all.
    pub(crate) fn silent(mut self) -> Self {
        self.heartbeat = false;
        self
    }

    /// Heartbeat at the bootstrap baud only.
    pub(crate) fn silent_after_reopen(mut self) -> Self {
        self.heartbeat_after_reopen = false;
        self
    }

    pub(crate) fn deny_open(mut self) -> Self {
        self.deny_open = true;
        self
    }

    /// Ignore the first `n - 1` requests for each parameter.
    pub(crate) fn answer_from_request(mut self, n: u32) -> Self {
        self.answer_from_request = n;
        self
    }

    /// Hold each parameter reply back until `n` more requests for the same
    /// parameter have been sent.
    pub(crate) fn reply_delay(mut self, n: u32) -> Self {
        self.reply_delay = n;
        self
    }

    /// Sending a PARAM_SET for `name` fails as if the port had gone away.
    pub(crate) fn fail_param_set(mut self, name: &str) -> Self {
        self.failing_param_set = Some(name.to_string());
        self
    }

    pub(crate) fn param(&self, name: &str) -> Option<f32> {
        self.params
            .lock()
            .unwrap()
            .get(name)
            .copied()
    }

    pub(crate) fn params(&self) -> BTreeMap<String, f32> {
        self.params
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    fn passthrough_open(&self) -> bool {
        self.param("SERIAL_PASS2")
            .is_some_and(|v| v > 0.0)
    }

    fn addresses_controller(&self, system: u8, component: u8) -> bool {
        system == self.controller.system_id && component == crate::param::AUTOPILOT_COMPONENT_ID
    }
}

/// A link to a [`Bench`].
#[derive(Debug)]
pub(crate) struct MockTransport {
    bench: Bench,
    pub(crate) baud: u32,
    pub(crate) closed: bool,
    inbox: VecDeque<Received>,
    requests: HashMap<String, u32>,
    held: Vec<HeldReply>,
}

/// A parameter reply released once its parameter has seen `release_at`
/// requests.
#[derive(Debug)]
struct HeldReply {
    name: String,
    release_at: u32,
    reply: Received,
}

impl MockTransport {
    pub(crate) fn open(bench: &Bench, baud: u32, heartbeat: bool) -> Self {
        bench
            .log
            .push(Event::Opened(baud));
        let mut link = Self {
            bench: bench.clone(),
            baud,
            closed: false,
            inbox: VecDeque::new(),
            requests: HashMap::new(),
            held: Vec::new(),
        };
        if heartbeat {
            let header = link
                .bench
                .controller;
            link.inbox
                .push_back(Received {
                    header,
                    message: Message::Heartbeat(Heartbeat {
                        mav_type: MAV_TYPE_QUADROTOR,
                        autopilot: 3,
                        ..Heartbeat::gcs()
                    }),
                });
        }
        link
    }

    pub(crate) fn inject_param_value(&mut self, name: &str, value: f32) {
        let header = self
            .bench
            .controller;
        self.inbox
            .push_back(Received {
                header,
                message: param_value(name, value),
            });
    }

    /// Parameter replies still held back by [`Bench::reply_delay`].
    pub(crate) fn held_replies(&self) -> usize {
        self.held
            .len()
    }

    fn release_held(&mut self, name: &str, count: u32) {
        let (due, kept) = std::mem::take(&mut self.held)
            .into_iter()
            .partition(|held| held.name == name && held.release_at <= count);
        self.held = kept;
        self.inbox
            .extend(
                due.into_iter()
                    .map(|held: HeldReply| held.reply),
            );
    }

    pub(crate) fn inject_ack(&mut self, ack: CommandAck) {
        self.inbox
            .push_back(Received {
                header: receiver_header(),
                message: Message::CommandAck(ack),
            });
    }

    fn respond(&mut self, message: &Message) {
        match message {
            Message::ParamRequestRead(req)
                if self
                    .bench
                    .addresses_controller(req.target_system, req.target_component) =>
            {
                let name = req
                    .param_id
                    .to_string();
                let count = self
                    .requests
                    .entry(name.clone())
                    .or_insert(0);
                *count += 1;
                let count = *count;
                self.release_held(&name, count);
                if count < self.bench.answer_from_request {
                    return;
                }
                let Some(value) = self.bench.param(&name) else {
                    return;
                };
                if self.bench.reply_delay == 0 {
                    self.inject_param_value(&name, value);
                } else {
                    self.held
                        .push(HeldReply {
                            name: name.clone(),
                            release_at: count + self.bench.reply_delay,
                            reply: Received {
                                header: self.bench.controller,
                                message: param_value(&name, value),
                            },
                        });
                }
            },
            Message::ParamSet(set)
                if self
                    .bench
                    .addresses_controller(set.target_system, set.target_component) =>
            {
                self.bench
                    .params
                    .lock()
                    .unwrap()
                    .insert(set.param_id.to_string(), set.value);
            },
            Message::CommandLong(cmd) => self.respond_receiver(cmd),
            _ => {},
        }
    }

    fn respond_receiver(&mut self, cmd: &CommandLong) {
        let Some(script) = self.bench.receiver else {
            return;
        };
        if !self.bench.passthrough_open()
            || cmd.target_system != 51
            || cmd.target_component != 68
            || cmd.command != MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN
        {
            return;
        }
        let reply = match cmd.confirmation {
            0 => script.probe,
            1 => script.arm,
            _ => script.execute,
        };
        if let Some(result) = reply {
            self.inject_ack(CommandAck {
                command: MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN,
                result,
                progress: 0,
                result_param2: REBOOT_MAGIC + i32::from(script.flags),
                target_system: 255,
                target_component: 190,
            });
        }
    }
}

impl Transport for MockTransport {
    fn baud_rate(&self) -> u32 {
        self.baud
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        if self.closed {
            return Err(Error::Protocol("link closed".into()));
        }
        if let Message::ParamSet(set) = message {
            if self
                .bench
                .failing_param_set
                .as_deref()
                == Some(set.param_id.to_string().as_str())
            {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write failed",
                )));
            }
        }
        self.bench
            .log
            .push(Event::Sent(message.clone()));
        self.respond(message);
        Ok(())
    }

    fn recv(&mut self, kind: MessageKind) -> Result<Option<Received>> {
        if self.closed {
            return Err(Error::Protocol("link closed".into()));
        }
        while let Some(received) = self
            .inbox
            .pop_front()
        {
            if received
                .message
                .kind()
                == Some(kind)
            {
                return Ok(Some(received));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.bench
                .log
                .push(Event::Closed);
        }
        Ok(())
    }
}

/// Opens [`MockTransport`]s on a [`Bench`].
pub(crate) struct MockConnector {
    bench: Bench,
    opens: usize,
}

impl MockConnector {
    pub(crate) fn new(bench: Bench) -> Self {
        Self { bench, opens: 0 }
    }
}

impl Connector for MockConnector {
    type Link = MockTransport;

    fn open(&mut self, port: &str, baud: u32) -> Result<MockTransport> {
        if self.bench.deny_open {
            return Err(Error::PermissionDenied {
                port: port.to_string(),
            });
        }
        self.opens += 1;
        let heartbeat = if self.opens == 1 {
            self.bench.heartbeat
        } else {
            self.bench.heartbeat_after_reopen
        };
        Ok(MockTransport::open(&self.bench, baud, heartbeat))
    }
}

fn receiver_header() -> Header {
    Header {
        sequence: 0,
        system_id: 51,
        component_id: 68,
    }
}

fn param_value(name: &str, value: f32) -> Message {
    Message::ParamValue(ParamValue {
        param_id: ParamName::new(name).unwrap(),
        value,
        param_type: crate::protocol::message::MAV_PARAM_TYPE_REAL32,
        param_count: 8,
        param_index: 0,
    })
}
