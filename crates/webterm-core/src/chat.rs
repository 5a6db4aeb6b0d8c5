//! Chat, presence announcements, and the slash commands that move arbitration
//! between clients.

use crate::rank::RankLookup;
use crate::subscriber::Subscribers;
use crate::WebtermError;
use std::collections::HashMap;
use tracing::{debug, info};
use webterm_types::{session_guest_name, ClientId, Response};

/// Rank needed to become arbiter when nobody is.
pub const ASK_RANK: i64 = 0;
/// Rank needed to take control from someone else.
pub const GRAB_RANK: i64 = 25;
/// Rank needed to release someone else's control.
pub const FREE_RANK: i64 = 25;

/// Text shown to a client when it says hello.
#[derive(Debug, Clone, Default)]
pub struct Greeting {
    /// The command line the shared terminal runs.
    pub command: String,
    /// Message of the day, one entry per line.
    pub motd: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Help,
    List,
    Rank,
    Ask,
    Grab,
    Take,
    Drop,
    Free,
    Arbiter,
}

impl Command {
    const ALL: [Command; 9] = [
        Command::Help,
        Command::List,
        Command::Rank,
        Command::Ask,
        Command::Grab,
        Command::Take,
        Command::Drop,
        Command::Free,
        Command::Arbiter,
    ];

    fn name(self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::List => "list",
            Command::Rank => "rank",
            Command::Ask => "ask",
            Command::Grab => "grab",
            Command::Take => "take",
            Command::Drop => "drop",
            Command::Free => "free",
            Command::Arbiter => "arbiter",
        }
    }

    fn usage(self) -> &'static [&'static str] {
        match self {
            Command::Help => &["/help [command]", "Show help for a command, or list all commands."],
            Command::List => &["/list", "List all commands."],
            Command::Rank => &["/rank [name]", "Show your rank, or the rank of someone else."],
            Command::Ask => &["/ask", "Become arbiter if nobody currently is."],
            Command::Grab => &[
                "/grab",
                "Take control of the terminal unless the current arbiter outranks you.",
            ],
            Command::Take => &["/take", "Grab control if someone has it, otherwise ask for it."],
            Command::Drop => &["/drop", "Give up control of the terminal."],
            Command::Free => &[
                "/free",
                "Release whoever holds control unless they outrank you.",
            ],
            Command::Arbiter => &["/arbiter", "Show who currently controls the terminal."],
        }
    }

    fn parse(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// The shared state chat and arbitration act on. Borrowed from the
/// coordinator while its lock is held.
pub struct Room<'a> {
    pub subscribers: &'a mut Subscribers,
    pub arbiter: &'a mut Option<ClientId>,
    /// Names taken from a session token at hello. Everyone else is shown
    /// under their per-connection guest name.
    pub names: &'a mut HashMap<ClientId, String>,
    pub ranks: &'a dyn RankLookup,
    pub greeting: &'a Greeting,
}

impl Room<'_> {
    pub fn name_of(&self, client: ClientId) -> String {
        self.names
            .get(&client)
            .cloned()
            .unwrap_or_else(|| client.guest_name())
    }

    fn rank_of(&self, client: ClientId) -> i64 {
        self.ranks.rank(&self.name_of(client))
    }

    fn announce(&mut self, text: String) {
        info!(target: "webterm::chat", "{}", text);
        self.subscribers.broadcast(&Response::status(text));
    }

    /// Hand the keyboard to `new`, announcing the transition and telling every
    /// subscriber where control now sits relative to itself. A transition to
    /// the current owner does nothing. Returns whether anything changed.
    pub fn change_owner(&mut self, new: Option<ClientId>) -> bool {
        let old = *self.arbiter;
        if old == new {
            return false;
        }
        *self.arbiter = new;

        let text = match (old, new) {
            (None, Some(new)) => format!("{} is now arbiter.", self.name_of(new)),
            (Some(old), Some(new)) => format!(
                "Arbiter changed from {} to {}.",
                self.name_of(old),
                self.name_of(new)
            ),
            (Some(old), None) => format!("{} is no longer arbiter.", self.name_of(old)),
            (None, None) => return false,
        };
        self.announce(text);
        self.subscribers
            .broadcast_with(|viewer| Response::owner_for(new, viewer));
        true
    }

    /// Greet a client that just said hello and tell everyone it arrived.
    /// A session token, when given, fixes the client's name from now on.
    pub fn hello(&mut self, client: ClientId, session: Option<&str>) -> Response {
        if let Some(session) = session {
            self.names.insert(client, session_guest_name(session));
        }
        let name = self.name_of(client);
        let mut lines = vec![
            "Welcome to webterm.".to_string(),
            format!("This terminal is running: {}", self.greeting.command),
            format!("You are {}.", name),
            "Type /help for a list of commands.".to_string(),
        ];
        lines.extend(self.greeting.motd.iter().cloned());
        for line in lines {
            self.subscribers.send_to(client, Response::status(line));
        }
        self.announce(format!("{} has joined.", name));
        Response::Hello
    }

    /// Drop a client from the room. Returns `false` if it was not present.
    pub fn depart(&mut self, client: ClientId) -> bool {
        let was_arbiter = *self.arbiter == Some(client);
        if !self.subscribers.remove(client) && !was_arbiter {
            return false;
        }
        self.announce(format!("{} has left.", self.name_of(client)));
        if was_arbiter {
            self.change_owner(None);
        }
        self.names.remove(&client);
        true
    }

    pub fn leave(&mut self, client: ClientId) -> Response {
        self.depart(client);
        Response::Ok
    }

    /// Handle a chat line: a slash command, or a message for everyone.
    pub fn chat(&mut self, client: ClientId, text: &str) -> Response {
        let text = text.trim();
        if text.is_empty() {
            return Response::Ok;
        }
        if let Some(command) = text.strip_prefix('/') {
            return self.command(client, command);
        }

        let sender = self.name_of(client);
        debug!(target: "webterm::chat", "<{}> {}", sender, text);
        self.subscribers.broadcast(&Response::Chat {
            sender,
            text: text.to_string(),
        });
        Response::Ok
    }

    fn command(&mut self, client: ClientId, line: &str) -> Response {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Response::error("No command given. Type /help for a list of commands.");
        };
        let args: Vec<&str> = words.collect();
        let Some(command) = Command::parse(name) else {
            return Response::error(format!("No command {} exists.", name));
        };
        debug!(target: "webterm::chat", "{} runs /{} {:?}", self.name_of(client), command.name(), args);

        match command {
            Command::Help => self.help(client, args.first().copied()),
            Command::List => Response::status(command_list()),
            Command::Rank => {
                let name = args
                    .first()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| self.name_of(client));
                Response::status(format!("{} has rank {}.", name, self.ranks.rank(&name)))
            }
            Command::Ask => self.ask(client),
            Command::Grab => self.grab(client),
            Command::Take => {
                if self.arbiter.is_some() {
                    self.grab(client)
                } else {
                    self.ask(client)
                }
            }
            Command::Drop => {
                if *self.arbiter != Some(client) {
                    return Response::error(WebtermError::NotArbiter.to_string());
                }
                self.announce(format!("{} has dropped control.", self.name_of(client)));
                self.change_owner(None);
                Response::Ok
            }
            Command::Free => self.free(client),
            Command::Arbiter => match *self.arbiter {
                Some(arbiter) => {
                    Response::status(format!("{} is currently arbiter.", self.name_of(arbiter)))
                }
                None => Response::status("Nobody is currently arbiter."),
            },
        }
    }

    fn help(&mut self, client: ClientId, topic: Option<&str>) -> Response {
        let topic = topic.map(|t| t.trim_start_matches('/'));
        let lines: Vec<String> = match topic {
            Some(topic) => match Command::parse(topic) {
                Some(command) => command.usage().iter().map(|s| s.to_string()).collect(),
                None => return Response::error(format!("No command {} exists.", topic)),
            },
            None => vec![
                command_list(),
                "Type /help <command> for details.".to_string(),
            ],
        };
        for line in lines {
            self.subscribers.send_to(client, Response::status(line));
        }
        Response::Ok
    }

    fn require_rank(&self, client: ClientId, needed: i64, action: &str) -> Option<Response> {
        let rank = self.rank_of(client);
        (rank < needed).then(|| {
            Response::error(format!(
                "You must have at least rank {} to {}. Your current rank is {}.",
                needed, action, rank
            ))
        })
    }

    fn ask(&mut self, client: ClientId) -> Response {
        if let Some(denied) = self.require_rank(client, ASK_RANK, "ask for control") {
            return denied;
        }
        match *self.arbiter {
            None => {
                self.announce(format!("{} has requested control.", self.name_of(client)));
                self.change_owner(Some(client));
                Response::Ok
            }
            Some(arbiter) if arbiter == client => Response::error("You are already arbiter."),
            Some(arbiter) => Response::error(format!(
                "{} is already arbiter. Use /grab to take control.",
                self.name_of(arbiter)
            )),
        }
    }

    fn grab(&mut self, client: ClientId) -> Response {
        if let Some(denied) = self.require_rank(client, GRAB_RANK, "grab control") {
            return denied;
        }
        if let Some(arbiter) = *self.arbiter {
            if arbiter == client {
                return Response::error("You are already arbiter.");
            }
            if self.rank_of(arbiter) > self.rank_of(client) {
                return Response::error(format!("{} outranks you.", self.name_of(arbiter)));
            }
        }
        self.announce(format!("{} has grabbed control.", self.name_of(client)));
        self.change_owner(Some(client));
        Response::Ok
    }

    fn free(&mut self, client: ClientId) -> Response {
        if let Some(denied) = self.require_rank(client, FREE_RANK, "free control") {
            return denied;
        }
        let Some(arbiter) = *self.arbiter else {
            return Response::error("Nobody is currently arbiter.");
        };
        if arbiter != client && self.rank_of(arbiter) > self.rank_of(client) {
            return Response::error(format!("{} outranks you.", self.name_of(arbiter)));
        }
        self.announce(format!("{} has freed the console.", self.name_of(client)));
        self.change_owner(None);
        Response::Ok
    }
}

fn command_list() -> String {
    let names: Vec<String> = Command::ALL.iter().map(|c| format!("/{}", c.name())).collect();
    format!("Commands: {}", names.join(" "))
}
