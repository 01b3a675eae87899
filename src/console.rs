//! Operator console: line parsing and preset server commands.
//!
//! Lines typed into `warden run` are forwarded to the server verbatim unless
//! they start with `:`, in which case they are warden actions such as
//! `:restart` or `:backup`.

use std::fmt;
use std::str::FromStr;

/// Canned server commands for routine administration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuickCommand {
    WeatherClear,
    WeatherRain,
    Day,
    Night,
    /// Remove dropped items.
    ClearItems,
    /// Remove every entity except players, items and armor stands.
    ClearHostiles,
    SaveAll,
    Reload,
    List,
    Tps,
}

impl QuickCommand {
    pub const ALL: [Self; 10] = [
        Self::WeatherClear,
        Self::WeatherRain,
        Self::Day,
        Self::Night,
        Self::ClearItems,
        Self::ClearHostiles,
        Self::SaveAll,
        Self::Reload,
        Self::List,
        Self::Tps,
    ];

    /// Name used on the console, e.g. `:quick weather-clear`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::WeatherClear => "weather-clear",
            Self::WeatherRain => "weather-rain",
            Self::Day => "day",
            Self::Night => "night",
            Self::ClearItems => "clear-items",
            Self::ClearHostiles => "clear-hostiles",
            Self::SaveAll => "save-all",
            Self::Reload => "reload",
            Self::List => "list",
            Self::Tps => "tps",
        }
    }

    /// Text written to the server console.
    pub const fn command(self) -> &'static str {
        match self {
            Self::WeatherClear => "weather clear",
            Self::WeatherRain => "weather rain",
            Self::Day => "time set day",
            Self::Night => "time set night",
            Self::ClearItems => "kill @e[type=item]",
            Self::ClearHostiles => "kill @e[type=!player,type=!item,type=!armor_stand]",
            Self::SaveAll => "save-all",
            Self::Reload => "reload",
            Self::List => "list",
            Self::Tps => "tps",
        }
    }
}

impl fmt::Display for QuickCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QuickCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|q| q.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|q| q.name()).collect();
                format!("unknown quick command '{s}' (available: {})", names.join(", "))
            })
    }
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleAction {
    /// Forward the text to the server.
    Command(String),
    Start,
    Stop,
    Restart,
    Status,
    /// Show the last `n` console lines.
    Log(usize),
    Players,
    Backup,
    Backups,
    Restore(String),
    Prune { keep: usize, confirmed: bool },
    Quick(QuickCommand),
    Help,
    Quit,
}

/// Default number of lines shown by `:log`.
const DEFAULT_LOG_LINES: usize = 20;

/// Parses one console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleAction>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(action) = line.trim_start().strip_prefix(':') else {
        return Ok(Some(ConsoleAction::Command(line.to_string())));
    };

    let mut words = action.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let rest: Vec<&str> = words.collect();

    let parsed = match (verb.as_str(), rest.as_slice()) {
        ("start", []) => ConsoleAction::Start,
        ("stop", []) => ConsoleAction::Stop,
        ("restart", []) => ConsoleAction::Restart,
        ("status", []) => ConsoleAction::Status,
        ("log", []) => ConsoleAction::Log(DEFAULT_LOG_LINES),
        ("log", [n]) => ConsoleAction::Log(parse_count(n)?),
        ("players", []) => ConsoleAction::Players,
        ("backup", []) => ConsoleAction::Backup,
        ("backups", []) => ConsoleAction::Backups,
        ("restore", [name]) => ConsoleAction::Restore((*name).to_string()),
        ("prune", [n]) => ConsoleAction::Prune {
            keep: parse_count(n)?,
            confirmed: false,
        },
        ("prune", [n, "--yes"]) => ConsoleAction::Prune {
            keep: parse_count(n)?,
            confirmed: true,
        },
        ("quick", [name]) => ConsoleAction::Quick(name.parse()?),
        ("help" | "h" | "?", []) => ConsoleAction::Help,
        ("quit" | "q" | "exit", []) => ConsoleAction::Quit,
        _ => return Err(format!("unrecognised action ':{action}' (try :help)")),
    };
    Ok(Some(parsed))
}

fn parse_count(s: &str) -> Result<usize, String> {
    s.parse().map_err(|_| format!("expected a number, got '{s}'"))
}

/// Help text for the console.
pub const HELP: &str = "\
Lines are sent to the server as commands. Warden actions:
  :start | :stop | :restart     lifecycle
  :status                       state, pid, uptime, CPU and memory
  :log [n]                      last n console lines (default 20)
  :players                      ask the server who is online
  :backup | :backups            create a backup, list backups
  :restore <name>               restore a backup (stops and restarts)
  :prune <n> [--yes]            keep only the newest n backups
  :quick <name>                 preset command (see :quick help)
  :quit                         stop the server and exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines_are_commands() {
        assert_eq!(
            parse_line("say hello\n").unwrap(),
            Some(ConsoleAction::Command("say hello".to_string()))
        );
        assert_eq!(parse_line("   \n").unwrap(), None);
    }

    #[test]
    fn test_actions() {
        assert_eq!(parse_line(":restart").unwrap(), Some(ConsoleAction::Restart));
        assert_eq!(parse_line(":log").unwrap(), Some(ConsoleAction::Log(20)));
        assert_eq!(parse_line(":log 5").unwrap(), Some(ConsoleAction::Log(5)));
        assert_eq!(
            parse_line(":restore world_backup_20250101_120000.zip").unwrap(),
            Some(ConsoleAction::Restore(
                "world_backup_20250101_120000.zip".to_string()
            ))
        );
        assert_eq!(
            parse_line(":prune 3 --yes").unwrap(),
            Some(ConsoleAction::Prune {
                keep: 3,
                confirmed: true
            })
        );
        assert_eq!(parse_line(":Q").unwrap(), Some(ConsoleAction::Quit));
    }

    #[test]
    fn test_bad_actions() {
        assert!(parse_line(":log many").is_err());
        assert!(parse_line(":restore").is_err());
        assert!(parse_line(":frobnicate").is_err());
        assert!(parse_line(":quick fireworks").is_err());
    }

    #[test]
    fn test_quick_commands() {
        assert_eq!(
            parse_line(":quick night").unwrap(),
            Some(ConsoleAction::Quick(QuickCommand::Night))
        );
        assert_eq!(QuickCommand::Night.command(), "time set night");
        for quick in QuickCommand::ALL {
            assert_eq!(quick.name().parse::<QuickCommand>().unwrap(), quick);
            assert!(!quick.command().contains('\n'));
        }
    }
}
