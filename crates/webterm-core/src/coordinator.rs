//! The session coordinator: one shared terminal, its change log, the connected
//! subscribers and the current arbiter, all behind a single lock.
//!
//! Every mutation (line appends, cursor moves, ownership changes, subscriber
//! churn) happens while holding that lock, so a client's resync request can
//! never interleave with a concurrent append. Fan-out only enqueues onto
//! non-blocking subscriber channels; delivery happens outside the lock.

use crate::change_log::{latest_per_line, ChangeLog, DEFAULT_MAX_CHANGES};
use crate::chat::{Greeting, Room};
use crate::rank::RankLookup;
use crate::subscriber::{Subscriber, Subscribers};
use crate::terminal::{ScreenObserver, Terminal};
use crate::{Result, WebtermError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace};
use webterm_types::{ChangeRecord, ClientId, Cursor, Line, Request, Response};

/// Default delay between background `process()` calls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub max_changes: usize,
    pub poll_interval: Duration,
    pub greeting: Greeting,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_changes: DEFAULT_MAX_CHANGES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            greeting: Greeting::default(),
        }
    }
}

type TerminalFactory<T> = Box<dyn Fn() -> T + Send + Sync>;

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    factory: TerminalFactory<T>,
    ranks: Box<dyn RankLookup>,
    greeting: Greeting,
    poll_interval: Duration,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner<T> {
    terminal: Option<T>,
    changes: ChangeLog,
    subscribers: Subscribers,
    arbiter: Option<ClientId>,
    names: HashMap<ClientId, String>,
}

impl<T: Terminal> Inner<T> {
    /// Drive the terminal forward once, recording and fanning out its updates.
    fn pump(&mut self) {
        let Some(terminal) = self.terminal.as_mut() else {
            return;
        };
        let mut feed = Feed {
            changes: &mut self.changes,
            subscribers: &mut self.subscribers,
        };
        if let Err(e) = terminal.process(&mut feed) {
            trace!(target: "webterm::session", "process() skipped: {}", e);
        }
    }

    fn room<'a>(&'a mut self, ranks: &'a dyn RankLookup, greeting: &'a Greeting) -> Room<'a> {
        Room {
            subscribers: &mut self.subscribers,
            arbiter: &mut self.arbiter,
            names: &mut self.names,
            ranks,
            greeting,
        }
    }

    fn terminal(&self) -> Result<&T> {
        self.terminal.as_ref().ok_or(WebtermError::NotRunning)
    }

    fn screen_response(&self) -> Result<Response> {
        let screen = self.terminal()?.screen();
        Ok(Response::Screen {
            lines: screen.lines,
            next_seq: self.changes.next_seq(),
        })
    }

    fn change_response(&self, since: u64) -> Result<Response> {
        if !self.changes.has_change(since) {
            debug!(
                target: "webterm::session",
                "Sequence {} outside retained window [{}, {}), sending full screen",
                since,
                self.changes.offset(),
                self.changes.next_seq()
            );
            return self.screen_response();
        }
        Ok(Response::Changes(latest_per_line(
            self.changes.changes_after(since),
        )))
    }

    fn keypress(&mut self, client: ClientId, key: &[u8]) -> Result<Response> {
        if self.arbiter != Some(client) {
            return Err(WebtermError::NotArbiter);
        }
        let terminal = self.terminal.as_mut().ok_or(WebtermError::NotRunning)?;
        terminal.input_bytes(key)?;
        self.pump();
        Ok(Response::Ok)
    }
}

/// Observer handed to `Terminal::process`: appends each changed line to the
/// log and pushes it to every subscriber.
struct Feed<'a> {
    changes: &'a mut ChangeLog,
    subscribers: &'a mut Subscribers,
}

impl ScreenObserver for Feed<'_> {
    fn line_changed(&mut self, line_number: u32, line: Line) {
        record_change(self.changes, self.subscribers, line_number, line);
    }

    fn cursor_moved(&mut self, cursor: Cursor) {
        self.subscribers.broadcast(&Response::Cursor(cursor));
    }
}

fn record_change(
    changes: &mut ChangeLog,
    subscribers: &mut Subscribers,
    line_number: u32,
    line: Line,
) -> u64 {
    let seq = changes.add_change(line_number, line.clone());
    subscribers.broadcast(&Response::Changes(vec![ChangeRecord {
        seq,
        line_number,
        line,
    }]));
    seq
}

/// Shared handle to the coordinator. Clones refer to the same session.
pub struct SessionCoordinator<T: Terminal + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Terminal + 'static> Clone for SessionCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Terminal + 'static> SessionCoordinator<T> {
    /// The terminal is built by `factory` on first use, not here.
    pub fn new(
        options: CoordinatorOptions,
        ranks: impl RankLookup + 'static,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    terminal: None,
                    changes: ChangeLog::new(options.max_changes),
                    subscribers: Subscribers::new(),
                    arbiter: None,
                    names: HashMap::new(),
                }),
                factory: Box::new(factory),
                ranks: Box::new(ranks),
                greeting: options.greeting,
                poll_interval: options.poll_interval,
            }),
        }
    }

    /// Create and launch the terminal and the poll loop if not done yet.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        self.ensure_started(&mut inner)
    }

    fn ensure_started(&self, inner: &mut Inner<T>) -> Result<()> {
        if inner.terminal.is_some() {
            return Ok(());
        }
        let mut terminal = (self.shared.factory)();
        terminal.start()?;
        inner.terminal = Some(terminal);
        info!(target: "webterm::session", "Shared terminal started");
        self.spawn_poll_loop()
    }

    /// Background thread that keeps the terminal draining without client traffic.
    /// Holds only a weak reference and stops once the coordinator is dropped.
    fn spawn_poll_loop(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.shared);
        let interval = self.shared.poll_interval;
        std::thread::Builder::new()
            .name("webterm-poll".to_string())
            .spawn(move || {
                debug!(target: "webterm::session", "Poll loop started ({:?})", interval);
                while let Some(shared) = weak.upgrade() {
                    shared.lock().pump();
                    drop(shared);
                    std::thread::sleep(interval);
                }
                debug!(target: "webterm::session", "Poll loop stopped");
            })?;
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.lock().terminal.is_some()
    }

    /// Drain pending terminal output now.
    pub fn process(&self) {
        self.shared.lock().pump();
    }

    /// Append a line change and push it to every subscriber.
    pub fn add_change(&self, line_number: u32, line: Line) -> u64 {
        let mut inner = self.shared.lock();
        let Inner {
            changes,
            subscribers,
            ..
        } = &mut *inner;
        record_change(changes, subscribers, line_number, line)
    }

    /// Push a cursor position to every subscriber.
    pub fn move_cursor(&self, cursor: Cursor) {
        self.shared
            .lock()
            .subscribers
            .broadcast(&Response::Cursor(cursor));
    }

    /// Returns whether the arbiter actually changed.
    pub fn change_owner(&self, new: Option<ClientId>) -> bool {
        let mut inner = self.shared.lock();
        inner
            .room(self.shared.ranks.as_ref(), &self.shared.greeting)
            .change_owner(new)
    }

    pub fn arbiter(&self) -> Option<ClientId> {
        self.shared.lock().arbiter
    }

    pub fn next_seq(&self) -> u64 {
        self.shared.lock().changes.next_seq()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }

    /// Register a client for unsolicited updates.
    pub fn connect(&self, client: ClientId, subscriber: Box<dyn Subscriber>) {
        if self.shared.lock().subscribers.insert(client, subscriber) {
            debug!(target: "webterm::session", "Client {} ({}) connected", client, client.guest_name());
        }
    }

    /// Forget a client, releasing arbitration if it held it.
    pub fn disconnect(&self, client: ClientId) {
        let mut inner = self.shared.lock();
        let departed = inner
            .room(self.shared.ranks.as_ref(), &self.shared.greeting)
            .depart(client);
        if departed {
            debug!(target: "webterm::session", "Client {} disconnected", client);
        }
    }

    /// Changes since `seq`, newest per line, or the full screen when `seq`
    /// has fallen out of the retained window.
    pub fn handle_change_request(&self, seq: u64) -> Response {
        self.shared
            .lock()
            .change_response(seq)
            .unwrap_or_else(error_response)
    }

    pub fn handle_screen_request(&self) -> Response {
        self.shared
            .lock()
            .screen_response()
            .unwrap_or_else(error_response)
    }

    pub fn handle_keypress(&self, client: ClientId, key: &[u8]) -> Response {
        self.shared
            .lock()
            .keypress(client, key)
            .unwrap_or_else(error_response)
    }

    /// Single entry point for client requests. Always answers with a
    /// response; failures become an `e` message for this client only.
    pub fn dispatch(&self, client: ClientId, request: Request) -> Response {
        let mut inner = self.shared.lock();
        if let Err(e) = self.ensure_started(&mut inner) {
            error!(target: "webterm::session", "Failed to start shared terminal: {}", e);
            return error_response(e);
        }
        inner.pump();

        trace!(target: "webterm::session", "{} request from {}", request.tag(), client);
        let ranks = self.shared.ranks.as_ref();
        let greeting = &self.shared.greeting;
        let result = match request {
            Request::Changes { since } => inner.change_response(since),
            Request::Screen => inner.screen_response(),
            Request::Settings => inner.terminal().map(|t| Response::Settings(t.settings())),
            Request::Hello { session } => {
                Ok(inner.room(ranks, greeting).hello(client, session.as_deref()))
            }
            Request::Keypress { key } => inner.keypress(client, &key),
            Request::Leave => Ok(inner.room(ranks, greeting).leave(client)),
            Request::Chat { text } => Ok(inner.room(ranks, greeting).chat(client, &text)),
            Request::Owner => Ok(Response::owner_for(inner.arbiter, client)),
            Request::Unrecognized { tag } => Err(WebtermError::UnrecognizedRequest(tag)),
        };
        result.unwrap_or_else(|e| {
            debug!(target: "webterm::session", "Request from {} failed: {}", client, e);
            error_response(e)
        })
    }
}

fn error_response(e: WebtermError) -> Response {
    Response::error(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::StaticRanks;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use webterm_types::{plain_line, OwnerState, ResponseEnvelope, Screen, TerminalSettings};

    const ROWS: usize = 4;

    /// What the fake terminal will emit next, and what it was sent.
    #[derive(Default)]
    struct Script {
        pending: Vec<(u32, String)>,
        cursor: Option<Cursor>,
        input: Vec<u8>,
        screen: Vec<String>,
        starts: usize,
        fail_start: bool,
        /// The child exits on the next `process`; the fake restarts it.
        exit: bool,
    }

    #[derive(Clone, Default)]
    struct ScriptHandle(Arc<Mutex<Script>>);

    impl ScriptHandle {
        fn get(&self) -> MutexGuard<'_, Script> {
            self.0.lock().unwrap()
        }

        fn emit(&self, line: u32, text: &str) {
            self.get().pending.push((line, text.to_string()));
        }
    }

    struct FakeTerminal {
        script: ScriptHandle,
        running: bool,
    }

    impl Terminal for FakeTerminal {
        fn start(&mut self) -> Result<()> {
            let mut script = self.script.get();
            if script.fail_start {
                return Err(WebtermError::ProcessSpawnFailed("no such command".into()));
            }
            if self.running {
                return Err(WebtermError::AlreadyRunning);
            }
            script.starts += 1;
            script.screen = vec![String::new(); ROWS];
            self.running = true;
            Ok(())
        }

        fn process(&mut self, observer: &mut dyn ScreenObserver) -> Result<()> {
            if !self.running {
                return Err(WebtermError::NotRunning);
            }
            if std::mem::take(&mut self.script.get().exit) {
                self.end();
                self.start()?;
                for line in 0..ROWS as u32 {
                    observer.line_changed(line, plain_line(""));
                }
            }
            let mut script = self.script.get();
            let pending = std::mem::take(&mut script.pending);
            for (line, text) in &pending {
                script.screen[*line as usize] = text.clone();
                observer.line_changed(*line, plain_line(text));
            }
            if let Some(cursor) = script.cursor.take() {
                observer.cursor_moved(cursor);
            }
            Ok(())
        }

        fn end(&mut self) {
            self.running = false;
        }

        fn input_bytes(&mut self, bytes: &[u8]) -> Result<()> {
            self.script.get().input.extend_from_slice(bytes);
            Ok(())
        }

        fn screen(&self) -> Screen {
            let script = self.script.get();
            Screen {
                lines: script.screen.iter().map(|s| plain_line(s)).collect(),
                cursor: Cursor::default(),
            }
        }

        fn settings(&self) -> TerminalSettings {
            TerminalSettings { rows: ROWS as u16, cols: 80 }
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    fn coordinator(max_changes: usize) -> (SessionCoordinator<FakeTerminal>, ScriptHandle) {
        let script = ScriptHandle::default();
        let factory_script = script.clone();
        let options = CoordinatorOptions {
            max_changes,
            // Keep the background loop out of the way; tests pump explicitly.
            poll_interval: Duration::from_secs(3600),
            greeting: Greeting::default(),
        };
        let coordinator = SessionCoordinator::new(options, StaticRanks::default(), move || FakeTerminal {
            script: factory_script.clone(),
            running: false,
        });
        (coordinator, script)
    }

    fn subscribe(
        coordinator: &SessionCoordinator<FakeTerminal>,
    ) -> (ClientId, UnboundedReceiver<ResponseEnvelope>) {
        let id = ClientId::new();
        let (tx, rx) = unbounded_channel();
        coordinator.connect(id, Box::new(tx));
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ResponseEnvelope>) -> Vec<Response> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope.response);
        }
        out
    }

    fn pushed_changes(rx: &mut UnboundedReceiver<ResponseEnvelope>) -> Vec<ChangeRecord> {
        drain(rx)
            .into_iter()
            .flat_map(|response| match response {
                Response::Changes(records) => records,
                _ => Vec::new(),
            })
            .collect()
    }

    fn change(seq: u64, line_number: u32, text: &str) -> ChangeRecord {
        ChangeRecord {
            seq,
            line_number,
            line: plain_line(text),
        }
    }

    #[test]
    fn test_dispatch_starts_terminal_once() {
        let (coordinator, script) = coordinator(16);
        let client = ClientId::new();
        assert!(!coordinator.is_started());

        assert_eq!(coordinator.dispatch(client, Request::Hello { session: None }), Response::Hello);
        assert_eq!(
            coordinator.dispatch(client, Request::Settings),
            Response::Settings(TerminalSettings { rows: 4, cols: 80 })
        );
        assert!(coordinator.is_started());
        assert_eq!(script.get().starts, 1);
    }

    #[test]
    fn test_start_failure_is_an_error_response() {
        let (coordinator, script) = coordinator(16);
        script.get().fail_start = true;
        let reply = coordinator.dispatch(ClientId::new(), Request::Screen);
        assert!(matches!(reply, Response::Error(ref m) if m.contains("no such command")));
        assert!(coordinator.start().is_err());
        assert!(!coordinator.is_started());
    }

    #[test]
    fn test_repeated_line_is_reported_once_with_latest_content() {
        let (coordinator, _script) = coordinator(16);
        coordinator.start().unwrap();
        coordinator.add_change(0, plain_line("AAAA"));
        coordinator.add_change(0, plain_line("AAAB"));

        let reply = coordinator.dispatch(ClientId::new(), Request::Changes { since: 0 });
        assert_eq!(reply, Response::Changes(vec![change(1, 0, "AAAB")]));
    }

    #[test]
    fn test_change_request_dedups_by_line() {
        let (coordinator, _script) = coordinator(16);
        coordinator.start().unwrap();
        for (line, text) in [(9, "a"), (0, "f"), (0, "f"), (5, "first"), (0, "f"), (2, "two"), (0, "f"), (5, "second")] {
            coordinator.add_change(line, plain_line(text));
        }

        let Response::Changes(records) = coordinator.handle_change_request(3) else {
            panic!("expected changes");
        };
        let summary: Vec<(u64, u32)> = records.iter().map(|c| (c.seq, c.line_number)).collect();
        assert_eq!(summary, vec![(6, 0), (5, 2), (7, 5)]);
        assert_eq!(records[2].line, plain_line("second"));
    }

    #[test]
    fn test_stale_sequence_degrades_to_screen() {
        let (coordinator, script) = coordinator(2);
        coordinator.start().unwrap();
        script.emit(1, "one");
        script.emit(2, "two");
        script.emit(3, "three");
        coordinator.process();
        assert_eq!(coordinator.next_seq(), 3);

        let screen = coordinator.handle_screen_request();
        let Response::Screen { ref lines, next_seq } = screen else {
            panic!("expected screen");
        };
        assert_eq!(next_seq, 3);
        assert_eq!(lines[3], plain_line("three"));

        assert_eq!(coordinator.handle_change_request(0), screen);
        assert_eq!(coordinator.handle_change_request(3), screen);
        assert_eq!(coordinator.handle_change_request(42), screen);
        assert_eq!(
            coordinator.handle_change_request(1),
            Response::Changes(vec![change(1, 2, "two"), change(2, 3, "three")])
        );
    }

    #[test]
    fn test_updates_fan_out_to_subscribers() {
        let (coordinator, script) = coordinator(16);
        let (_a, mut rx_a) = subscribe(&coordinator);
        let (_b, mut rx_b) = subscribe(&coordinator);
        coordinator.start().unwrap();

        script.emit(2, "ls");
        script.get().cursor = Some(Cursor { x: 2, y: 2 });
        coordinator.process();

        let expected = vec![
            Response::Changes(vec![change(0, 2, "ls")]),
            Response::Cursor(Cursor { x: 2, y: 2 }),
        ];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
    }

    #[test]
    fn test_only_arbiter_keypress_reaches_terminal() {
        let (coordinator, script) = coordinator(16);
        let (a, _rx_a) = subscribe(&coordinator);
        let (b, _rx_b) = subscribe(&coordinator);

        let denied = coordinator.dispatch(b, Request::Keypress { key: b"rm".to_vec() });
        assert_eq!(denied, Response::error("You are not the current arbiter."));
        assert!(script.get().input.is_empty());

        assert!(coordinator.change_owner(Some(a)));
        assert_eq!(
            coordinator.dispatch(a, Request::Keypress { key: b"ls\r".to_vec() }),
            Response::Ok
        );
        assert_eq!(
            coordinator.dispatch(b, Request::Keypress { key: b"x".to_vec() }),
            Response::error("You are not the current arbiter.")
        );
        assert_eq!(script.get().input, b"ls\r".to_vec());
    }

    #[test]
    fn test_ownership_is_personalized() {
        let (coordinator, _script) = coordinator(16);
        let (a, mut rx_a) = subscribe(&coordinator);
        let (b, mut rx_b) = subscribe(&coordinator);

        assert_eq!(coordinator.dispatch(a, Request::Owner), Response::Owner(OwnerState::Nobody));
        coordinator.change_owner(Some(a));
        assert_eq!(coordinator.dispatch(a, Request::Owner), Response::Owner(OwnerState::You));
        assert_eq!(
            coordinator.dispatch(b, Request::Owner),
            Response::Owner(OwnerState::SomeoneElse)
        );
        assert!(drain(&mut rx_a).contains(&Response::Owner(OwnerState::You)));
        assert!(drain(&mut rx_b).contains(&Response::Owner(OwnerState::SomeoneElse)));

        assert!(!coordinator.change_owner(Some(a)));
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_disconnect_releases_arbitration() {
        let (coordinator, _script) = coordinator(16);
        let (a, _rx_a) = subscribe(&coordinator);
        let (_b, mut rx_b) = subscribe(&coordinator);
        coordinator.change_owner(Some(a));
        drain(&mut rx_b);

        coordinator.disconnect(a);
        coordinator.disconnect(a);
        assert_eq!(coordinator.arbiter(), None);
        assert_eq!(coordinator.subscriber_count(), 1);
        assert_eq!(
            drain(&mut rx_b).last(),
            Some(&Response::Owner(OwnerState::Nobody))
        );
    }

    #[test]
    fn test_leave_and_chat_through_dispatch() {
        let (coordinator, _script) = coordinator(16);
        let (a, _rx_a) = subscribe(&coordinator);
        let (b, mut rx_b) = subscribe(&coordinator);

        assert_eq!(
            coordinator.dispatch(a, Request::Chat { text: "hello".into() }),
            Response::Ok
        );
        assert!(drain(&mut rx_b).contains(&Response::Chat {
            sender: a.guest_name(),
            text: "hello".into(),
        }));

        assert_eq!(coordinator.dispatch(a, Request::Leave), Response::Ok);
        assert_eq!(coordinator.subscriber_count(), 1);
        assert_eq!(
            drain(&mut rx_b),
            vec![Response::status(format!("{} has left.", a.guest_name()))]
        );
        assert_eq!(coordinator.dispatch(b, Request::Chat { text: "/ask".into() }), Response::Ok);
        assert_eq!(coordinator.arbiter(), Some(b));
    }

    #[test]
    fn test_unrecognized_request() {
        let (coordinator, _script) = coordinator(16);
        assert_eq!(
            coordinator.dispatch(ClientId::new(), Request::Unrecognized { tag: "Z".into() }),
            Response::error("unrecognized request: Z")
        );
    }

    #[test]
    fn test_poll_loop_stops_when_dropped() {
        let script = ScriptHandle::default();
        let factory_script = script.clone();
        let options = CoordinatorOptions {
            poll_interval: Duration::from_millis(1),
            ..CoordinatorOptions::default()
        };
        let coordinator = SessionCoordinator::new(options, StaticRanks::default(), move || FakeTerminal {
            script: factory_script.clone(),
            running: false,
        });
        coordinator.start().unwrap();
        script.emit(0, "polled");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while coordinator.next_seq() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(coordinator.next_seq(), 1);

        let weak = Arc::downgrade(&coordinator.shared);
        drop(coordinator);
        while weak.strong_count() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(weak.strong_count(), 0);
    }

    #[test]
    fn test_change_log_survives_terminal_restart() {
        let (coordinator, script) = coordinator(16);
        let (client, mut rx) = subscribe(&coordinator);
        coordinator.start().unwrap();
        script.emit(1, "before");
        script.emit(2, "exit");
        coordinator.process();
        assert_eq!(coordinator.next_seq(), 2);

        script.get().exit = true;
        coordinator.process();
        assert_eq!(script.get().starts, 2);
        assert_eq!(coordinator.next_seq(), 2 + ROWS as u64);

        script.emit(0, "after");
        coordinator.process();
        assert_eq!(coordinator.next_seq(), 3 + ROWS as u64);

        // A client that saw everything before the restart still gets deltas.
        assert_eq!(
            coordinator.dispatch(client, Request::Changes { since: 2 }),
            Response::Changes(vec![
                change(6, 0, "after"),
                change(3, 1, ""),
                change(4, 2, ""),
                change(5, 3, ""),
            ])
        );
        let seqs: Vec<u64> = pushed_changes(&mut rx).iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_pushes_and_resync_agree_while_polling() {
        let script = ScriptHandle::default();
        let factory_script = script.clone();
        let options = CoordinatorOptions {
            max_changes: 10_000,
            poll_interval: Duration::from_millis(1),
            greeting: Greeting::default(),
        };
        let coordinator = SessionCoordinator::new(options, StaticRanks::default(), move || FakeTerminal {
            script: factory_script.clone(),
            running: false,
        });
        coordinator.start().unwrap();

        let producer = {
            let script = script.clone();
            std::thread::spawn(move || {
                for i in 0..400u32 {
                    script.emit(i % ROWS as u32, &format!("line {}", i));
                    if i % 8 == 0 {
                        std::thread::sleep(Duration::from_micros(200));
                    }
                }
            })
        };

        let (client, mut rx) = subscribe(&coordinator);
        let Response::Screen { lines, next_seq: start } = coordinator.dispatch(client, Request::Screen)
        else {
            panic!("expected a screen");
        };
        std::thread::sleep(Duration::from_millis(2));
        let resync = coordinator.dispatch(client, Request::Changes { since: start });

        producer.join().unwrap();
        coordinator.process();
        let end = coordinator.next_seq();

        // Everything after the screen snapshot was pushed exactly once, in order.
        let pushed: Vec<ChangeRecord> = pushed_changes(&mut rx)
            .into_iter()
            .filter(|r| r.seq >= start)
            .collect();
        let seqs: Vec<u64> = pushed.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (start..end).collect::<Vec<_>>());

        // The resync only reports records that were also pushed.
        match resync {
            Response::Changes(records) => {
                assert!(records.windows(2).all(|w| w[0].line_number < w[1].line_number));
                for record in &records {
                    assert!(record.seq >= start);
                    assert!(pushed.contains(record), "{:?} was never pushed", record);
                }
            }
            Response::Screen { next_seq, .. } => assert!(next_seq >= start),
            other => panic!("unexpected resync reply {:?}", other),
        }

        // Snapshot plus pushes reproduces the final screen.
        let mut local = lines;
        for record in pushed {
            local[record.line_number as usize] = record.line;
        }
        let Response::Screen { lines: expected, .. } = coordinator.handle_screen_request() else {
            panic!("expected a screen");
        };
        assert_eq!(local, expected);
    }

    #[test]
    fn test_session_rank_applies_after_reconnect() {
        let token = "browser-7d2e";
        let mut ranks = StaticRanks::default();
        ranks.set(webterm_types::session_guest_name(token), 50);
        let script = ScriptHandle::default();
        let factory_script = script.clone();
        let options = CoordinatorOptions {
            poll_interval: Duration::from_secs(3600),
            ..CoordinatorOptions::default()
        };
        let coordinator = SessionCoordinator::new(options, ranks, move || FakeTerminal {
            script: factory_script.clone(),
            running: false,
        });

        let (holder, _rx_holder) = subscribe(&coordinator);
        coordinator.dispatch(holder, Request::Chat { text: "/ask".into() });

        let (first, _rx_first) = subscribe(&coordinator);
        coordinator.dispatch(first, Request::Hello { session: Some(token.into()) });
        coordinator.disconnect(first);

        let (second, _rx_second) = subscribe(&coordinator);
        coordinator.dispatch(second, Request::Hello { session: Some(token.into()) });
        assert_eq!(
            coordinator.dispatch(second, Request::Chat { text: "/grab".into() }),
            Response::Ok
        );
        assert_eq!(coordinator.arbiter(), Some(second));
    }
}
