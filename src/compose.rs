//! Response composer: turns per-section user notes into a cited
//! "Facilities, Equipment, and Other Resources" draft.
//!
//! For each non-empty section the composer retrieves supporting chunks,
//! runs a restricted web search, fills [`PROMPT_TEMPLATE`] and asks the
//! language model for a polished section. Composition is request-scoped:
//! nothing is remembered between calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use facilities_core::retrieve::Retriever;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::llm::{ChatCompletionsClient, LanguageModel};
use crate::sqlite_index::SqliteIndex;
use crate::web_search::{TavilySearch, WebSearch};

/// Sections of a facilities statement, in output order.
pub const SECTION_LABELS: [&str; 7] = [
    "1. Project Title",
    "2. Research Space and Facilities",
    "3. Core Instrumentation",
    "4. Computing and Data Resources",
    "5a. Internal Facilities (NYU)",
    "5b. External Facilities (Other Institutions)",
    "6. Special Infrastructure",
];

const RETRIEVAL_K: usize = 5;

pub const PROMPT_TEMPLATE: &str = r#"You are an expert NSF grant writer specializing in the 'Facilities, Equipment, and Other Resources' section of academic proposals.

Your job is to expand and professionally refine the user's section draft using:
1. User Input (this forms the base and must be preserved).
2. PDF Research Chunks from relevant proposals or facility descriptions.
3. Trusted Web Snippets from approved institutional sites.

---

### FEW-SHOT GUIDANCE

**Example 1**
> *User:* "Our Robotics Lab has 10 industrial arms and a motion capture system."
> *Draft:* "The Robotics Lab features 10 industrial-grade robotic manipulators and an advanced OptiTrack motion capture system for multi-agent interaction studies (Source: Proposal_2311.pdf)."

**Example 2**
> *User:* "We use NYU's HPC system with 1000 GPUs."
> *Draft:* "High-performance computing is supported by NYU's HPC cluster with 1,024 NVIDIA A100 GPUs (Web Source: https://nsf.gov/...)."

---

### SECTION: {section}

**User Input:**
"""
{user_input}
"""

**PDF Research Chunks:**
"""
{retrieved_chunks}
"""

**Web Snippets**
"""
{web_snippets}
"""

---

### INSTRUCTIONS
- Start with the User Input, retain all core ideas.
- Expand with factual, cited data from PDF Chunks or Web Snippets.
- Cite PDFs using: (Source: filename.pdf)
- Cite web sources exactly as provided, including the full URL with https://.
- Never invent or assume data not present in input or sources.
- If no relevant info is found, return only the user's input, improved stylistically.

Write a polished section suitable for direct inclusion in an NSF grant.
"#;

/// Fill [`PROMPT_TEMPLATE`] in a single pass, so braces inside the inserted
/// values are never treated as placeholders.
pub fn render_prompt(section: &str, user_input: &str, retrieved_chunks: &str, web_snippets: &str) -> String {
    let values = [
        ("{section}", section),
        ("{user_input}", user_input),
        ("{retrieved_chunks}", retrieved_chunks),
        ("{web_snippets}", web_snippets),
    ];
    let mut out = String::with_capacity(
        PROMPT_TEMPLATE.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>(),
    );
    let mut rest = PROMPT_TEMPLATE;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Drafted sections (in [`SECTION_LABELS`] order) and the sources the
/// model actually cited.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedDraft {
    pub sections: Vec<(String, String)>,
    pub sources_used: Vec<String>,
}

impl ComposedDraft {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section(&self, label: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, t)| t.as_str())
    }
}

/// Sources whose citation marker appears in `reply`, first-seen order,
/// without duplicates.
pub fn cited_sources(reply: &str, chunk_sources: &[String], web_urls: &[String]) -> Vec<String> {
    let pdf = chunk_sources
        .iter()
        .filter(|s| reply.contains(&format!("(Source: {})", s)));
    let web = web_urls
        .iter()
        .filter(|u| reply.contains(&format!("(Web Source: {})", u)));
    let mut out: Vec<String> = Vec::new();
    for s in pdf.chain(web) {
        if !out.contains(s) {
            out.push(s.clone());
        }
    }
    out
}

/// Join drafted sections as `## {label}` blocks.
pub fn build_full_draft(draft: &ComposedDraft) -> String {
    draft
        .sections
        .iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(label, text)| format!("## {}\n\n{}", label, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct Composer<'a> {
    retriever: Retriever<'a>,
    web: &'a dyn WebSearch,
    llm: &'a dyn LanguageModel,
}

impl<'a> Composer<'a> {
    pub fn new(retriever: Retriever<'a>, web: &'a dyn WebSearch, llm: &'a dyn LanguageModel) -> Self {
        Self { retriever, web, llm }
    }

    /// Draft every non-empty section. Keys of `inputs` not in
    /// [`SECTION_LABELS`] are ignored; all-empty input makes no calls.
    pub async fn compose(&self, inputs: &HashMap<String, String>) -> Result<ComposedDraft> {
        let mut draft = ComposedDraft::default();

        for label in SECTION_LABELS {
            let user_text = inputs.get(label).map(|t| t.trim()).unwrap_or_default();
            if user_text.is_empty() {
                continue;
            }

            let query = format!("{}: {}", label, user_text);
            let retrieved = self
                .retriever
                .retrieve(&query, RETRIEVAL_K, None)
                .await
                .with_context(|| format!("retrieval failed for section '{}'", label))?;
            let chunk_block = retrieved
                .chunks
                .iter()
                .map(|c| format!("{}\n(Source: {})", c.chunk.text, c.chunk.source_file))
                .collect::<Vec<_>>()
                .join("\n\n");

            let web = self.web.search(&query).await;

            let prompt = render_prompt(label, user_text, &chunk_block, &web.snippets);
            let reply = self
                .llm
                .complete(&prompt)
                .await
                .with_context(|| format!("language model failed for section '{}'", label))?;
            let reply = reply.trim().to_string();

            for source in cited_sources(&reply, &retrieved.sources(), &web.urls) {
                if !draft.sources_used.contains(&source) {
                    draft.sources_used.push(source);
                }
            }
            tracing::info!(section = label, chunks = retrieved.len(), web_hits = web.urls.len(), "section drafted");
            draft.sections.push((label.to_string(), reply));
        }

        Ok(draft)
    }
}

/// Read section inputs from a TOML table keyed by section label.
pub fn load_sections(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sections file: {}", path.display()))?;
    let inputs: HashMap<String, String> =
        toml::from_str(&content).with_context(|| "Failed to parse sections file")?;
    for key in inputs.keys() {
        if !SECTION_LABELS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "unknown section label; ignoring");
        }
    }
    Ok(inputs)
}

/// `fdraft draft`: compose a full draft and write it to `out` or stdout.
pub async fn run_draft(config: &Config, input: &Path, out: Option<PathBuf>) -> Result<()> {
    let inputs = load_sections(input)?;

    let index = SqliteIndex::open(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let retriever = Retriever::new(&index, embedder.as_ref())
        .with_overfetch_factor(config.retrieval.overfetch_factor);
    let web = TavilySearch::new(&config.web_search);
    let llm = ChatCompletionsClient::new(&config.llm)?;

    let draft = Composer::new(retriever, &web, &llm).compose(&inputs).await?;
    if draft.is_empty() {
        println!("no section input provided; nothing drafted");
        return Ok(());
    }

    let text = build_full_draft(&draft);
    match out {
        Some(path) => {
            std::fs::write(&path, &text)
                .with_context(|| format!("Failed to write draft: {}", path.display()))?;
            println!("draft written: {}", path.display());
            println!("  sections: {}", draft.sections.len());
        }
        None => println!("{}", text),
    }
    if !draft.sources_used.is_empty() {
        println!();
        println!("sources used:");
        for s in &draft.sources_used {
            println!("  {}", s);
        }
    }

    index.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use facilities_core::embedding::Embedder;
    use facilities_core::error::ProviderError;
    use facilities_core::models::Chunk;
    use facilities_core::store::memory::InMemoryIndex;
    use facilities_core::store::VectorIndex;
    use std::sync::Mutex;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct FakeWeb;

    #[async_trait]
    impl WebSearch for FakeWeb {
        async fn search(&self, _query: &str) -> crate::web_search::WebSearchResult {
            crate::web_search::WebSearchResult {
                snippets: "GPU cluster\n(Web Source: https://nyu.edu/hpc)".into(),
                urls: vec!["https://nyu.edu/hpc".into(), "https://nsf.gov/unused".into()],
            }
        }
    }

    /// Echoes a reply citing the first chunk source and the HPC page.
    struct FakeLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for FakeLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  Drafted (Source: hpc.pdf) and (Web Source: https://nyu.edu/hpc).  ".into())
        }
    }

    async fn index() -> InMemoryIndex {
        let index = InMemoryIndex::new();
        index
            .add(&[Chunk {
                text: "The HPC center hosts 1,024 GPUs.".into(),
                source_file: "hpc.pdf".into(),
                source_path: "NSF/hpc.pdf".into(),
                page_or_offset: 0,
                category_tag: "NSF".into(),
                embedding: vec![1.0, 0.0],
            }])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn all_empty_sections_make_no_calls() {
        let index = index().await;
        let llm = FakeLlm { prompts: Mutex::new(vec![]) };
        let composer = Composer::new(Retriever::new(&index, &ConstEmbedder), &FakeWeb, &llm);
        let mut inputs = HashMap::new();
        inputs.insert(SECTION_LABELS[1].to_string(), "   ".to_string());

        let draft = composer.compose(&inputs).await.unwrap();
        assert!(draft.is_empty());
        assert!(draft.sources_used.is_empty());
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drafts_only_filled_sections_with_citations() {
        let index = index().await;
        let llm = FakeLlm { prompts: Mutex::new(vec![]) };
        let composer = Composer::new(Retriever::new(&index, &ConstEmbedder), &FakeWeb, &llm);
        let mut inputs = HashMap::new();
        inputs.insert(SECTION_LABELS[3].to_string(), "We use the HPC cluster.".to_string());
        inputs.insert(SECTION_LABELS[1].to_string(), "Wet lab.".to_string());

        let draft = composer.compose(&inputs).await.unwrap();
        let labels: Vec<&str> = draft.sections.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec![SECTION_LABELS[1], SECTION_LABELS[3]]);
        assert_eq!(
            draft.section(SECTION_LABELS[3]),
            Some("Drafted (Source: hpc.pdf) and (Web Source: https://nyu.edu/hpc).")
        );
        assert_eq!(draft.sources_used, vec!["hpc.pdf", "https://nyu.edu/hpc"]);

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[1].contains("### SECTION: 4. Computing and Data Resources"));
        assert!(prompts[1].contains("The HPC center hosts 1,024 GPUs.\n(Source: hpc.pdf)"));
        assert!(prompts[1].contains("(Web Source: https://nyu.edu/hpc)"));
    }

    #[test]
    fn placeholders_inside_values_stay_literal() {
        let prompt = render_prompt(
            "3. Core Instrumentation",
            "Literal {web_snippets} and {section} in notes",
            "chunk mentioning {user_input}",
            "WEB",
        );
        assert!(prompt.contains("Literal {web_snippets} and {section} in notes"));
        assert!(prompt.contains("chunk mentioning {user_input}"));
        assert!(prompt.contains("### SECTION: 3. Core Instrumentation"));
        assert_eq!(prompt.matches("WEB").count(), 1);
        assert_eq!(prompt.matches("{section}").count(), 1);
        assert!(!prompt.contains("{retrieved_chunks}"));
    }

    #[test]
    fn cited_sources_dedups_and_filters() {
        let reply = "A (Source: a.pdf). B (Source: a.pdf). C (Web Source: https://nsf.gov/x)";
        let chunk_sources = vec!["a.pdf".to_string(), "a.pdf".to_string(), "b.pdf".to_string()];
        let urls = vec!["https://nsf.gov/x".to_string(), "https://nsf.gov/y".to_string()];
        assert_eq!(cited_sources(reply, &chunk_sources, &urls), vec!["a.pdf", "https://nsf.gov/x"]);
    }

    #[test]
    fn full_draft_uses_headings_and_skips_blank() {
        let draft = ComposedDraft {
            sections: vec![
                ("1. Project Title".into(), "Title".into()),
                ("3. Core Instrumentation".into(), "  ".into()),
                ("6. Special Infrastructure".into(), "Vault".into()),
            ],
            sources_used: vec![],
        };
        assert_eq!(
            build_full_draft(&draft),
            "## 1. Project Title\n\nTitle\n\n## 6. Special Infrastructure\n\nVault"
        );
    }

    #[test]
    fn sections_file_parses_quoted_labels() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("sections.toml");
        std::fs::write(&path, "\"1. Project Title\" = \"Quantum sensing\"\n").unwrap();
        let inputs = load_sections(&path).unwrap();
        assert_eq!(inputs.get("1. Project Title").map(String::as_str), Some("Quantum sensing"));
    }
}
