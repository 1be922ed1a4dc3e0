//! Prompt assembly
//!
//! Renders ledger history into the three-part prompt shape the raw
//! completion endpoint expects: persona text, transcript lines, and an
//! assistant prefix priming the model to answer as the agent.

use std::collections::HashSet;

use parley_core::TurnMessage;

/// A rendered three-part prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub transcript: String,
    pub assistant_prefix: String,
}

impl Prompt {
    /// Flatten into the single string sent in raw completion mode
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.system.is_empty() {
            out.push_str(&self.system);
            out.push_str("\n\n");
        }
        out.push_str(&self.transcript);
        out.push_str(&self.assistant_prefix);
        out
    }
}

/// Builds prompts for a named agent persona
pub struct PromptBuilder {
    agent_name: String,
    persona: String,
}

impl PromptBuilder {
    pub fn new(agent_name: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            persona: persona.into(),
        }
    }

    /// One `Name: text` line per turn, oldest first. Corrected text wins
    /// over the raw transcript when present. The current listeners are
    /// named in the system text so the model knows who is in the channel.
    pub fn build(&self, history: &[TurnMessage], listeners: &HashSet<String>) -> Prompt {
        let mut system = self.persona.clone();
        if !listeners.is_empty() {
            let mut names: Vec<&str> = listeners.iter().map(String::as_str).collect();
            names.sort_unstable();
            if !system.is_empty() {
                system.push(' ');
            }
            system.push_str(&format!(
                "There are {} people in the voice channel: {}.",
                names.len(),
                names.join(", ")
            ));
        }

        let mut transcript = String::new();
        for message in history {
            let text = message.corrected_text.as_deref().unwrap_or(&message.text);
            transcript.push_str(&message.speaker_name);
            transcript.push_str(": ");
            transcript.push_str(text);
            transcript.push('\n');
        }
        Prompt {
            system,
            transcript,
            assistant_prefix: format!("{}:", self.agent_name),
        }
    }

    /// Token cost of everything except the transcript, by the length/4
    /// heuristic. Subtracted from the context window to size the history
    /// budget.
    pub fn overhead_tokens(&self) -> u32 {
        ((self.persona.len() + self.agent_name.len() + 4) / 4) as u32
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn msg(name: &str, text: &str) -> TurnMessage {
        TurnMessage::new(1, name, HashSet::new(), HashSet::new()).with_text(text)
    }

    #[test]
    fn test_prompt_shape() {
        let builder = PromptBuilder::new("Parley", "You are Parley, a voice assistant.");
        let history = vec![msg("alice", "hello"), msg("bob", "hi there")];
        let prompt = builder.build(&history, &HashSet::new());

        assert_eq!(prompt.transcript, "alice: hello\nbob: hi there\n");
        assert_eq!(prompt.assistant_prefix, "Parley:");
        assert!(prompt
            .render()
            .starts_with("You are Parley, a voice assistant.\n\n"));
        assert!(prompt.render().ends_with("Parley:"));
    }

    #[test]
    fn test_listeners_named_in_system_text() {
        let builder = PromptBuilder::new("Parley", "You are Parley.");
        let listeners: HashSet<String> = ["bob".to_string(), "alice".to_string()].into();
        let prompt = builder.build(&[], &listeners);
        assert_eq!(
            prompt.system,
            "You are Parley. There are 2 people in the voice channel: alice, bob."
        );
    }

    #[test]
    fn test_corrected_text_preferred() {
        let mut message = msg("alice", "whats the wether");
        message.corrected_text = Some("what's the weather".into());
        let prompt = PromptBuilder::new("Parley", "").build(&[message], &HashSet::new());
        assert_eq!(prompt.transcript, "alice: what's the weather\n");
    }

    #[test]
    fn test_empty_persona_omitted() {
        let prompt = PromptBuilder::new("Parley", "").build(&[], &HashSet::new());
        assert_eq!(prompt.render(), "Parley:");
    }
}
