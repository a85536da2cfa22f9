//! Agent base instructions, overridable per story.

use storyloom_protocol::StorySettings;

/// The prose-writing agent driven by the generation pipeline.
pub const WRITER_AGENT: &str = "writer";
/// The background analysis agent.
pub const LIBRARIAN_AGENT: &str = "librarian";

const WRITER_INSTRUCTIONS: &str = "You are the writing engine of a long-form fiction \
workspace. Continue the story using the provided characters, guidelines, knowledge, and \
recent prose. Stay consistent with established facts and voice. Use the available tools \
to look up or record story material when it helps. Return prose only, with no commentary \
about your process.";

const LIBRARIAN_INSTRUCTIONS: &str = "You are the story librarian. Read the recent prose \
and the existing knowledge base, then report: a concise summary of what happened, \
directions worth exploring next, knowledge entries worth recording, and annotations on \
specific passages. Be specific and cite passage names where possible.";

/// Base instructions for `agent`, honoring the story's override map.
pub fn instructions_for(agent: &str, settings: &StorySettings) -> String {
    if let Some(custom) = settings.agent_prompt_overrides.get(agent) {
        return custom.clone();
    }
    match agent {
        WRITER_AGENT => WRITER_INSTRUCTIONS.to_string(),
        LIBRARIAN_AGENT => LIBRARIAN_INSTRUCTIONS.to_string(),
        other => format!("You are the {other} agent of a long-form fiction workspace."),
    }
}
