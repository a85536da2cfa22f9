//! Phase 2: turn a [`ContextState`] into the ordered message list.
//!
//! The block order is fixed; the output is deterministic given the state
//! and options. Under `contextOrderMode = advanced` the story's
//! `fragment_order` reorders fragments inside the user section, unmentioned
//! fragments keeping their default position.

use storyloom_protocol::{ContextOrderMode, Fragment, PromptBlock, ToolSpec};

use super::instructions::{WRITER_AGENT, instructions_for};
use super::ContextState;

/// Options for one assembly.
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Plugin-contributed tools advertised in the `## Available Tools`
    /// block. Built-in fragment tools are not listed; the model sees those
    /// through the tool schema channel alone.
    pub extra_tools: Vec<ToolSpec>,
}

pub fn assemble_messages(state: &ContextState, options: &AssembleOptions) -> Vec<PromptBlock> {
    let settings = &state.story.settings;
    let mut blocks = Vec::new();

    let mut instructions = instructions_for(WRITER_AGENT, settings);
    instructions.push_str(&format!("\n\nOutput format: {}.", settings.output_format));
    blocks.push(PromptBlock::system(instructions, "instructions"));

    if !state.system_fragments.is_empty() {
        let rendered = state
            .system_fragments
            .iter()
            .map(render_fragment)
            .collect::<Vec<_>>()
            .join("\n\n");
        blocks.push(PromptBlock::system(rendered, "system-fragments"));
    }

    if !state.story.summary.trim().is_empty() {
        blocks.push(PromptBlock::user(
            format!("## Story Summary\n{}", state.story.summary),
            "summary",
        ));
    }

    let ordered = |fragments: &[Fragment]| -> Vec<Fragment> {
        match settings.context_order_mode {
            ContextOrderMode::Default => fragments.to_vec(),
            ContextOrderMode::Advanced => apply_fragment_order(fragments, &settings.fragment_order),
        }
    };

    push_type_block(&mut blocks, "Characters", "characters", &ordered(&state.characters));
    push_type_block(&mut blocks, "Guidelines", "guidelines", &ordered(&state.guidelines));
    push_type_block(&mut blocks, "Knowledge", "knowledge", &ordered(&state.knowledge));

    let prose = ordered(&state.prose);
    if !prose.is_empty() {
        let heading = if state.summarized {
            "## Recent Passages"
        } else {
            "## Story So Far"
        };
        let body = prose
            .iter()
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        blocks.push(PromptBlock::user(format!("{heading}\n{body}"), "prose"));
    }

    if !options.extra_tools.is_empty() {
        let mut listing = String::from("## Available Tools");
        for tool in &options.extra_tools {
            listing.push_str(&format!("\n- {}: {}", tool.name, tool.description));
        }
        blocks.push(PromptBlock::user(listing, "tools"));
    }

    blocks.push(PromptBlock::user(state.input.clone(), "input"));
    blocks
}

fn render_fragment(fragment: &Fragment) -> String {
    format!("## {}\n{}", fragment.name, fragment.content)
}

fn push_type_block(blocks: &mut Vec<PromptBlock>, title: &str, tag: &str, fragments: &[Fragment]) {
    if fragments.is_empty() {
        return;
    }
    let body = fragments
        .iter()
        .map(render_fragment)
        .collect::<Vec<_>>()
        .join("\n\n");
    blocks.push(PromptBlock::user(format!("# {title}\n\n{body}"), tag));
}

/// Stable reorder: ids named in `order` come first (in that order), the
/// rest keep their default relative order.
fn apply_fragment_order(fragments: &[Fragment], order: &[String]) -> Vec<Fragment> {
    let mut named: Vec<Fragment> = Vec::new();
    for id in order {
        if let Some(fragment) = fragments.iter().find(|f| f.id == *id) {
            named.push(fragment.clone());
        }
    }
    for fragment in fragments {
        if !order.contains(&fragment.id) {
            named.push(fragment.clone());
        }
    }
    named
}
