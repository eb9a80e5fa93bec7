//! Tools the role agents call during generation: web search and scraping,
//! knowledge base access and read-only workspace files.

pub mod fs;
pub mod knowledge;
mod net;
pub mod scrape;
pub mod search;

use std::path::Path;
use std::sync::Arc;

use longform_knowledge::KnowledgeBase;
use longform_shared::{AppConfig, Result, ToolSet};

pub use fs::{ReadDirTool, ReadFileTool, Workspace, directory_tree};
pub use knowledge::{AddToKnowledgeBaseTool, SearchKnowledgeBaseTool, format_search_results};
pub use net::{Refusal, http_client, refusal};
pub use scrape::ScrapeWebpageTool;
pub use search::{SearchResult, WebSearchTool};

/// `web_search` and `scrape_webpage`, sharing one HTTP client.
pub fn research_tools(config: &AppConfig) -> Result<ToolSet> {
    let client = http_client()?;
    Ok(ToolSet::new()
        .with(WebSearchTool::new(
            client.clone(),
            config.research.search_results,
        )?)
        .with(ScrapeWebpageTool::new(
            client,
            config.research.scrape_max_chars,
        )))
}

/// `add_to_knowledge_base` and `search_knowledge_base` over `kb`.
pub fn knowledge_tools(kb: Arc<KnowledgeBase>) -> ToolSet {
    ToolSet::new()
        .with(AddToKnowledgeBaseTool::new(Arc::clone(&kb)))
        .with(SearchKnowledgeBaseTool::new(kb))
}

/// `readdir` and `readfile` rooted at `root`.
pub fn workspace_tools(root: &Path) -> ToolSet {
    let workspace = Workspace::new(root);
    ToolSet::new()
        .with(ReadDirTool::new(workspace.clone()))
        .with(ReadFileTool::new(workspace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_tool_names() {
        let tools = research_tools(&AppConfig::default()).expect("tools");
        assert_eq!(tools.names(), ["web_search", "scrape_webpage"]);
    }

    #[test]
    fn workspace_tool_names() {
        let tools = workspace_tools(Path::new("."));
        assert_eq!(tools.names(), ["readdir", "readfile"]);
    }
}
