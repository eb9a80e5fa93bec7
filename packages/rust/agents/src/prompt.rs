//! System prompts and request prompts for the three roles.

use std::fmt::Write as _;

use longform_core::EventConfig;
use longform_shared::{DocumentPlan, DocumentSection, ResearchDepth, SectionContent};

pub const PLANNER_SYSTEM: &str = "\
You are an expert content strategist planning a long-form article.
Research the subject with the tools available to you before planning. Store
useful findings in the knowledge base when that tool is available so the
writers can reuse them.
Produce a plan whose sections can be researched and written independently.
Every section needs a clear title, a description telling the writer what to
cover, concrete key points and a word count. Section word counts should add
up to the requested target.
Answer with a single JSON object matching the requested schema and nothing
else.";

pub const WRITER_SYSTEM: &str = "\
You are a skilled writer producing one section of a long-form article.
Research your section with the tools available to you: search the knowledge
base first, then the web when you need more. Write engaging, accurate,
well-structured Markdown. Do not repeat the section title as a heading and do
not write an introduction or conclusion for the whole article.
Cite the sources you relied on.
Answer with a single JSON object: {\"content\": <markdown>, \"sources\":
[{\"title\": <title>, \"url\": <url>}]}.";

pub const EDITOR_SYSTEM: &str = "\
You are a meticulous editor finalizing a long-form article assembled from
sections written by different writers.
Keep every fact and all research from the sections. Smooth transitions,
remove repetition, make tone and style consistent, and strengthen the
introduction and conclusion. Start the article with a `# ` title line.
Answer with a single JSON object: {\"title\": <title>, \"summary\": <one
paragraph>, \"content\": <full markdown article>, \"sources\": [{\"title\":
<title>, \"url\": <url>}]}.";

fn depth_guidance(depth: ResearchDepth) -> &'static str {
    match depth {
        ResearchDepth::Basic => "Keep research light: a couple of searches are enough.",
        ResearchDepth::Deep => "Research thoroughly: search several angles and read the best pages.",
        ResearchDepth::DeepWeb => {
            "Research exhaustively: search widely, read many pages and cross-check facts."
        }
        ResearchDepth::Academic => {
            "Prefer academic and primary sources: papers, standards and official documentation."
        }
    }
}

fn fenced_block(out: &mut String, heading: &str, body: &str, note: &str) {
    let _ = write!(out, "**{heading}:**\n```\n{body}\n```\n\n{note}\n\n");
}

pub fn planning_prompt(subject: &str, config: &EventConfig) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "Create a comprehensive, research-informed document plan for an article on the following subject:\n\n\
         **Subject:** {subject}\n\n\
         **Requirements:**\n\
         - Target word count: {} words\n\
         - Create a well-structured, engaging article plan\n\
         - Design sections that can be researched and written independently\n\
         - Include specific guidance for writers\n\n\
         **Research:** {}\n\n",
        config.target_word_count,
        depth_guidance(config.research_depth),
    );
    if let Some(style) = &config.style_guidelines {
        fenced_block(
            &mut out,
            "Style Guidelines",
            style,
            "Plan sections that let writers follow these guidelines.",
        );
    }
    if let Some(context) = &config.additional_context {
        fenced_block(
            &mut out,
            "Additional Context",
            context,
            "Take this context into account when choosing sections.",
        );
    }
    out.push_str(
        "Start by researching the topic, then provide your final document plan in the specified JSON format.",
    );
    out
}

pub fn section_prompt(section: &DocumentSection, plan: &DocumentPlan, config: &EventConfig) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "Write a section for an article about: {}\n\n\
         **Article Title:** {}\n\n\
         **Section Assignment:**\n\
         - **Title:** {}\n\
         - **Description:** {}\n\
         - **Target Word Count:** {} words\n",
        config.subject, plan.title, section.title, section.description, section.word_count,
    );
    if !section.key_points.is_empty() {
        out.push_str("- **Key Points to Cover:**\n");
        for point in &section.key_points {
            let _ = writeln!(out, "  - {point}");
        }
    }

    out.push_str("\n**Other sections (written by others, do not cover them):**\n");
    for other in plan.sections.iter().filter(|s| s.id != section.id) {
        let _ = writeln!(out, "- {}", other.title);
    }

    let _ = write!(
        out,
        "\n**Instructions:**\n\
         1. {}\n\
         2. Cover every key point in engaging, well-structured content\n\
         3. Cite your sources\n\
         4. Aim for the target word count\n\n",
        depth_guidance(config.research_depth),
    );
    if let Some(style) = &config.style_guidelines {
        fenced_block(
            &mut out,
            "Style Guidelines",
            style,
            "Follow these style preferences throughout the section.",
        );
    }
    if let Some(context) = &config.additional_context {
        fenced_block(
            &mut out,
            "Additional Context",
            context,
            "Incorporate relevant information from this context.",
        );
    }
    out.push_str("Start by researching the topic, then provide your final section content.");
    out
}

pub fn editing_prompt(plan: &DocumentPlan, sections: &[SectionContent], config: &EventConfig) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "Please edit and finalize the following article:\n\n\
         **Article Subject:** {}\n\
         **Planned Title:** {}\n\n",
        config.subject, plan.title,
    );
    if let Some(summary) = &plan.summary {
        let _ = write!(out, "**Original Plan Summary:**\n{summary}\n\n");
    }

    out.push_str("**Section Content to Edit:**\n\n");
    for (i, section) in sections.iter().enumerate() {
        let _ = write!(out, "### Section {}: {}\n\n{}\n\n", i + 1, section.title, section.content);
        if !section.sources.is_empty() {
            out.push_str("**Section Sources:**\n");
            for source in &section.sources {
                let _ = writeln!(out, "- [{}]({})", source.title, source.url);
            }
            out.push('\n');
        }
    }

    if let Some(style) = &config.style_guidelines {
        fenced_block(
            &mut out,
            "Style Guidelines",
            style,
            "The final article must follow these guidelines.",
        );
    }

    out.push_str(
        "**Editing Instructions:**\n\
         1. Review the entire article for consistency and flow\n\
         2. Create smooth transitions between sections\n\
         3. Enhance the introduction and conclusion\n\
         4. Ensure consistent tone and style throughout\n\
         5. Consolidate all sources\n\
         6. Maintain all factual content and research\n\n\
         Please provide the complete, edited article in the specified JSON format.",
    );
    out
}

#[cfg(test)]
mod tests {
    use longform_shared::RoleKind;

    use super::*;

    fn plan() -> DocumentPlan {
        DocumentPlan {
            title: "Async Rust".into(),
            sections: vec![
                DocumentSection {
                    id: "intro".into(),
                    title: "Intro".into(),
                    key_points: vec!["why async".into()],
                    word_count: 200,
                    ..Default::default()
                },
                DocumentSection {
                    id: "runtimes".into(),
                    title: "Runtimes".into(),
                    word_count: 400,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn planning_prompt_carries_options() {
        let mut config = EventConfig::new("async rust", RoleKind::Planner);
        config.target_word_count = 2000;
        config.style_guidelines = Some("No jargon.".into());
        let prompt = planning_prompt("async rust", &config);
        assert!(prompt.contains("**Subject:** async rust"));
        assert!(prompt.contains("2000 words"));
        assert!(prompt.contains("No jargon."));
        assert!(!prompt.contains("Additional Context"));
    }

    #[test]
    fn section_prompt_lists_other_sections() {
        let plan = plan();
        let config = EventConfig::new("async rust", RoleKind::Writer);
        let prompt = section_prompt(&plan.sections[0], &plan, &config);
        assert!(prompt.contains("- **Title:** Intro"));
        assert!(prompt.contains("  - why async"));
        assert!(prompt.contains("- Runtimes"));
        assert!(!prompt.contains("- Intro\n"));
    }
}
