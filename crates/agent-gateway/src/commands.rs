//! Parser for the gateway's `/`-prefixed command grammar (§4.10).

/// A recognised gateway command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Cancel(Option<String>),
    AgentList,
    AgentNew { name: String, prompt: Option<String> },
    AgentSwitch(String),
    AgentCurrent,
    Quit,
}

/// A parsed line of input: either a command or a prompt bound for the
/// current agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Prompt(String),
}

/// Parse one line of raw input. Lines not starting with `/` are plain
/// prompts. Malformed commands return a human-readable usage error rather
/// than silently falling through to prompt submission.
pub fn parse(line: &str) -> Result<Input, String> {
    let trimmed = line.trim();

    let Some(rest) = trimmed.strip_prefix('/') else {
        return Ok(Input::Prompt(trimmed.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let head = parts.next().unwrap_or("");

    match head {
        "help" => Ok(Input::Command(Command::Help)),
        "status" => Ok(Input::Command(Command::Status)),
        "quit" => Ok(Input::Command(Command::Quit)),
        "cancel" => Ok(Input::Command(Command::Cancel(parts.next().map(str::to_string)))),
        "agent" => parse_agent(parts),
        other => Err(format!("unknown command '/{other}', try /help")),
    }
}

fn parse_agent<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Input, String> {
    match parts.next() {
        Some("list") => Ok(Input::Command(Command::AgentList)),
        Some("current") => Ok(Input::Command(Command::AgentCurrent)),
        Some("switch") => {
            let name = parts.next().ok_or("usage: /agent switch <name>")?;
            Ok(Input::Command(Command::AgentSwitch(name.to_string())))
        }
        Some("new") => {
            let name = parts.next().ok_or("usage: /agent new <name> [prompt]")?;
            let rest: Vec<&str> = parts.collect();
            let prompt = (!rest.is_empty()).then(|| rest.join(" "));
            Ok(Input::Command(Command::AgentNew { name: name.to_string(), prompt }))
        }
        Some(other) => Err(format!("unknown '/agent {other}', try /help")),
        None => Err("usage: /agent list|new <name> [prompt]|switch <name>|current".to_string()),
    }
}

pub const HELP_TEXT: &str = "\
Commands:
  /help                         show this message
  /status                       list every agent and its busy/idle state
  /cancel [agent]               cancel the named agent's in-flight request (current agent if omitted)
  /agent list                   list every agent
  /agent new <name> [prompt]    create a new agent, optionally submitting an initial prompt
  /agent switch <name>          make <name> the current agent
  /agent current                print the current agent's name
  /quit                         shut down the gateway
Any other line is submitted as a prompt to the current agent.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_parses_as_a_prompt() {
        assert_eq!(parse("hello there").unwrap(), Input::Prompt("hello there".to_string()));
    }

    #[test]
    fn cancel_without_a_name_targets_the_current_agent() {
        assert_eq!(parse("/cancel").unwrap(), Input::Command(Command::Cancel(None)));
    }

    #[test]
    fn cancel_with_a_name_targets_that_agent() {
        assert_eq!(
            parse("/cancel alice").unwrap(),
            Input::Command(Command::Cancel(Some("alice".to_string())))
        );
    }

    #[test]
    fn agent_new_captures_a_multi_word_prompt() {
        let parsed = parse("/agent new bob summarise this document please").unwrap();
        assert_eq!(
            parsed,
            Input::Command(Command::AgentNew {
                name: "bob".to_string(),
                prompt: Some("summarise this document please".to_string()),
            })
        );
    }

    #[test]
    fn agent_new_without_a_prompt_is_allowed() {
        let parsed = parse("/agent new bob").unwrap();
        assert_eq!(
            parsed,
            Input::Command(Command::AgentNew { name: "bob".to_string(), prompt: None })
        );
    }

    #[test]
    fn agent_switch_without_a_name_is_an_error() {
        assert!(parse("/agent switch").is_err());
    }

    #[test]
    fn unknown_command_is_an_error_not_a_prompt() {
        assert!(parse("/frobnicate").is_err());
    }
}
