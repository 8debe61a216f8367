//! Observable session state.

use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

use common::models::{ConnectionProfile, ContainerRef, DatabaseRef};

use crate::query_session::FetchState;

/// The seven user commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    SaveConnection,
    DeleteConnection,
    Connect,
    SelectDatabase,
    SelectContainer,
    Execute,
    CancelExecution,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::SaveConnection,
        Command::DeleteConnection,
        Command::Connect,
        Command::SelectDatabase,
        Command::SelectContainer,
        Command::Execute,
        Command::CancelExecution,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::SaveConnection => "saveConnection",
            Command::DeleteConnection => "deleteConnection",
            Command::Connect => "connect",
            Command::SelectDatabase => "selectDatabase",
            Command::SelectContainer => "selectContainer",
            Command::Execute => "execute",
            Command::CancelExecution => "cancelExecution",
        }
    }
}

/// Enablement of one command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandState {
    /// Precondition holds and the command is not already running.
    pub enabled: bool,
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandBoard {
    pub save_connection: CommandState,
    pub delete_connection: CommandState,
    pub connect: CommandState,
    pub select_database: CommandState,
    pub select_container: CommandState,
    pub execute: CommandState,
    pub cancel_execution: CommandState,
}

impl CommandBoard {
    pub fn get(&self, command: Command) -> CommandState {
        match command {
            Command::SaveConnection => self.save_connection,
            Command::DeleteConnection => self.delete_connection,
            Command::Connect => self.connect,
            Command::SelectDatabase => self.select_database,
            Command::SelectContainer => self.select_container,
            Command::Execute => self.execute,
            Command::CancelExecution => self.cancel_execution,
        }
    }

    fn get_mut(&mut self, command: Command) -> &mut CommandState {
        match command {
            Command::SaveConnection => &mut self.save_connection,
            Command::DeleteConnection => &mut self.delete_connection,
            Command::Connect => &mut self.connect,
            Command::SelectDatabase => &mut self.select_database,
            Command::SelectContainer => &mut self.select_container,
            Command::Execute => &mut self.execute,
            Command::CancelExecution => &mut self.cancel_execution,
        }
    }
}

/// Immutable view of the session, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Connection string input as typed.
    pub connection_string: String,
    /// Saved connection strings, in store order.
    pub connection_strings: Vec<String>,
    pub query: String,
    /// Page size input as typed; unparsable text means the default.
    pub limit: String,

    pub databases: Vec<DatabaseRef>,
    pub containers: Vec<ContainerRef>,
    pub database: Option<String>,
    pub container: Option<String>,
    pub has_databases: bool,
    pub has_containers: bool,
    pub is_container_selected: bool,

    pub output_log: String,
    pub status_output: String,
    pub fetch_state: FetchState,

    pub commands: CommandBoard,
    /// Incremented on every published change.
    pub revision: u64,
}

impl SessionSnapshot {
    pub fn is_enabled(&self, command: Command) -> bool {
        self.commands.get(command).enabled
    }

    pub(crate) fn set_running(&mut self, command: Command, running: bool) {
        self.commands.get_mut(command).running = running;
        self.recompute();
    }

    /// Re-derives flags and command enablement from the rest of the state.
    pub(crate) fn recompute(&mut self) {
        self.has_databases = !self.databases.is_empty();
        self.has_containers = !self.containers.is_empty();
        self.is_container_selected = self.container.is_some();

        let input = self.connection_string.as_str();
        let saved = !input.is_empty()
            && self
                .connection_strings
                .iter()
                .any(|s| s == ConnectionProfile::normalize(input));

        let preconditions = [
            (
                Command::SaveConnection,
                !input.is_empty() && ConnectionProfile::is_valid(input) && !saved,
            ),
            (Command::DeleteConnection, saved),
            (Command::Connect, !input.is_empty()),
            (Command::SelectDatabase, self.has_databases),
            (Command::SelectContainer, self.has_containers),
            (Command::Execute, self.is_container_selected),
            (Command::CancelExecution, self.is_container_selected),
        ];
        for (command, precondition) in preconditions {
            let state = self.commands.get_mut(command);
            state.enabled = precondition && !state.running;
        }
    }

    /// Forgets everything derived from the previous connection.
    pub(crate) fn reset_downstream(&mut self) {
        self.databases.clear();
        self.containers.clear();
        self.database = None;
        self.container = None;
        self.output_log.clear();
        self.status_output.clear();
        self.fetch_state = FetchState::Idle;
    }
}

/// Execute status line.
pub(crate) fn status_line(elapsed: Duration, request_charge: f64, loaded: usize) -> String {
    format!(
        "Execution time: {}. Request Charge: {request_charge} RU/s. Loaded: {loaded} documents",
        format_elapsed(elapsed)
    )
}

/// `[d:]h:mm:ss[.fffffff]`, fraction in 100ns ticks with trailing zeros dropped.
pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (days, hours) = (secs / 86_400, secs / 3_600 % 24);
    let (minutes, seconds) = (secs / 60 % 60, secs % 60);

    let mut out = if days > 0 {
        format!("{days}:{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours}:{minutes:02}:{seconds:02}")
    };
    let ticks = elapsed.subsec_nanos() / 100;
    if ticks > 0 {
        let fraction = format!("{ticks:07}");
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }
    out
}
