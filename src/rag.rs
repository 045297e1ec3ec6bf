use crate::chunking::Chunker;
use crate::database::{IndexSpec, IndexWriter, Metric, RetrievedChunk, VectorIndex};
use crate::document::DocumentLoader;
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::groq::Generator;
use crate::prompt::PromptAssembler;
use crate::timing::{timed, timed_sync};
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;

/// Number of chunks retrieved per question
pub const DEFAULT_TOP_K: usize = 3;
/// Longest accepted question, in characters
pub const MAX_QUESTION_CHARS: usize = 1000;

pub const EMPTY_QUESTION_REPLY: &str = "Please enter a valid question.";
pub const TOO_LONG_REPLY: &str = "Please keep your question under 1000 characters.";
pub const NO_ANSWER_REPLY: &str = "I'm sorry, I couldn't generate a response.";
pub const FAILURE_REPLY: &str =
    "I'm sorry, I encountered an error processing your request. Please try again.";

/// First `max` characters of `text`, for log lines
fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn check_embedder(embedder: &dyn Embedder, spec: &IndexSpec) -> Result<()> {
    if embedder.dimension() != spec.dimension {
        return Err(RagError::Config(format!(
            "embedding model produces {}-dimensional vectors but index {} expects {}",
            embedder.dimension(),
            spec.name,
            spec.dimension
        )));
    }
    Ok(())
}

/// Similarity search over the configured index
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    index_name: String,
    metric: Metric,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, spec: &IndexSpec) -> Self {
        Retriever {
            embedder,
            index,
            index_name: spec.name.clone(),
            metric: spec.metric,
        }
    }

    /// Top `k` chunks for `query`, best first. An index holding fewer than
    /// `k` entries yields what it has.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let vector = self.embedder.embed(query).await?;
        let mut hits = self.index.search(&self.index_name, &vector, k).await?;
        self.metric.sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

/// Question answering over the index: validate, retrieve, assemble, generate
pub struct QueryPipeline {
    retriever: Retriever,
    assembler: PromptAssembler,
    generator: Arc<dyn Generator>,
    top_k: usize,
}

impl QueryPipeline {
    /// Startup step. Checks that the embedder and the remote index agree with
    /// `spec` before any request is served.
    pub async fn connect(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
        spec: &IndexSpec,
    ) -> Result<Self> {
        check_embedder(embedder.as_ref(), spec)?;

        let existing = index.describe(&spec.name).await?.ok_or_else(|| {
            RagError::Config(format!(
                "index {} does not exist; run the ingest command first",
                spec.name
            ))
        })?;
        spec.check_compatible(&existing)?;
        info!(
            "Connected to index {} ({} dimensions, {})",
            spec.name, spec.dimension, spec.metric
        );

        Ok(QueryPipeline {
            retriever: Retriever::new(embedder, index, spec),
            assembler: PromptAssembler,
            generator,
            top_k: DEFAULT_TOP_K,
        })
    }

    /// Answer a user question. Never fails: invalid input gets guidance text
    /// and downstream errors get an apology.
    pub async fn answer(&self, question: &str) -> String {
        let question = question.trim();

        if question.is_empty() {
            warn!("Empty message received from user");
            return EMPTY_QUESTION_REPLY.to_string();
        }

        let length = question.chars().count();
        if length > MAX_QUESTION_CHARS {
            warn!(
                "Message too long ({} characters): {}...",
                length,
                preview(question, 50)
            );
            return TOO_LONG_REPLY.to_string();
        }

        info!("Processing user query: {}...", preview(question, 100));

        match self.generate_answer(question).await {
            Ok(answer) if answer.trim().is_empty() => NO_ANSWER_REPLY.to_string(),
            Ok(answer) => {
                info!("Generated response length: {} characters", answer.chars().count());
                info!("Response preview: {}...", preview(&answer, 100));
                answer
            }
            Err(e) => {
                error!("Error processing chat request: {}", e);
                FAILURE_REPLY.to_string()
            }
        }
    }

    async fn generate_answer(&self, question: &str) -> Result<String> {
        let context = self.retriever.retrieve(question, self.top_k).await?;
        info!("Retrieved {} context documents for response", context.len());

        let prompt = self.assembler.assemble(&context, question);
        self.generator.generate(&prompt).await
    }
}

/// Outcome of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub indexed: usize,
}

/// Loads a folder, chunks and embeds it, and writes it to the index
pub struct Ingestor {
    loader: DocumentLoader,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    writer: IndexWriter,
}

impl Ingestor {
    pub fn new(
        loader: DocumentLoader,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        writer: IndexWriter,
    ) -> Self {
        Ingestor {
            loader,
            chunker,
            embedder,
            writer,
        }
    }

    pub async fn run(&self, data_dir: &Path) -> Result<IngestReport> {
        let spec = self.writer.spec();
        check_embedder(self.embedder.as_ref(), spec)?;

        timed("ensure_index", self.writer.ensure_index()).await?;

        let documents = timed_sync("load_documents", || self.loader.load(data_dir))?;
        let chunks = timed_sync("split_documents", || self.chunker.split_documents(&documents))?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = timed("embed_chunks", self.embedder.embed_batch(&texts)).await?;

        info!("Creating vector store with {} document chunks...", chunks.len());
        let chunk_count = chunks.len();
        let indexed = timed("upsert_chunks", self.writer.upsert(chunks, vectors)).await?;
        info!("Indexed {} document chunks in {}", indexed, spec.name);

        Ok(IngestReport {
            documents: documents.len(),
            chunks: chunk_count,
            indexed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::MemoryIndex;
    use crate::database::IndexEntry;
    use crate::embeddings::Embedding;
    use crate::prompt::Prompt;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Deterministic 4-d embedding keyed on a few medical words
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn dimension(&self) -> usize {
            4
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            let text = text.to_lowercase();
            let values = ["fever", "diabetes", "asthma", "acne"]
                .iter()
                .map(|w| if text.contains(w) { 1.0 } else { 0.01 })
                .collect();
            Embedding::with_dimension(values, 4)
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
    }

    #[derive(Default)]
    struct RecordingGenerator {
        calls: AtomicUsize,
        prompts: Mutex<Vec<Prompt>>,
        fail: bool,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, prompt: &Prompt) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.clone());
            if self.fail {
                return Err(RagError::Generation("connection reset".to_string()));
            }
            Ok("Fever is a raised body temperature.".to_string())
        }
    }

    fn spec() -> IndexSpec {
        IndexSpec {
            name: "medical-bot".to_string(),
            dimension: 4,
            metric: Metric::Cosine,
        }
    }

    fn entry(text: &str) -> IndexEntry {
        IndexEntry {
            vector: Embedding {
                values: vec![0.0; 4],
            },
            chunk: crate::chunking::Chunk {
                text: text.to_string(),
                source: "Data/book.pdf".into(),
                page: 0,
                chunk_index: 0,
                start: 0,
            },
        }
    }

    async fn seeded_index(texts: &[&str]) -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::with_index(spec()));
        for text in texts {
            let mut e = entry(text);
            e.vector = KeywordEmbedder.embed(text).await.unwrap();
            index.entries.lock().unwrap().push(e);
        }
        index
    }

    async fn pipeline(
        index: Arc<MemoryIndex>,
        generator: Arc<RecordingGenerator>,
    ) -> QueryPipeline {
        QueryPipeline::connect(Arc::new(KeywordEmbedder), index, generator, &spec())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_answer_calls_each_stage_once() {
        let index = seeded_index(&[
            "Fever is a temporary rise in temperature.",
            "Diabetes affects blood sugar.",
            "Asthma narrows the airways.",
            "Acne affects the skin.",
        ])
        .await;
        let generator = Arc::new(RecordingGenerator::default());
        let pipeline = pipeline(index.clone(), generator.clone()).await;

        let answer = pipeline.answer("  What causes a fever?  ").await;

        assert_eq!(answer, "Fever is a raised body temperature.");
        assert_eq!(*index.search_calls.lock().unwrap(), 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts[0].question, "What causes a fever?");
        assert!(prompts[0].system.starts_with("You are an assistant"));
        assert!(prompts[0]
            .system
            .contains("Fever is a temporary rise in temperature."));
    }

    #[tokio::test]
    async fn test_retrieve_returns_top_k_by_score() {
        let index = seeded_index(&[
            "Diabetes affects blood sugar.",
            "Fever is a temporary rise in temperature.",
            "Asthma narrows the airways.",
            "Acne affects the skin.",
        ])
        .await;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder), index, &spec());

        let hits = retriever.retrieve("fever", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].text, "Fever is a temporary rise in temperature.");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_retrieve_euclidean_returns_closest_first() {
        let spec = IndexSpec {
            metric: Metric::Euclidean,
            ..spec()
        };
        let index = Arc::new(MemoryIndex::with_index(spec.clone()));
        for text in ["Acne affects the skin.", "Fever is a temporary rise in temperature."] {
            let mut e = entry(text);
            e.vector = KeywordEmbedder.embed(text).await.unwrap();
            index.entries.lock().unwrap().push(e);
        }
        let retriever = Retriever::new(Arc::new(KeywordEmbedder), index, &spec);

        let hits = retriever.retrieve("fever", 2).await.unwrap();
        assert_eq!(hits[0].text, "Fever is a temporary rise in temperature.");
        assert!(hits[0].score < hits[1].score);
    }

    #[tokio::test]
    async fn test_empty_question_makes_no_calls() {
        let index = seeded_index(&[]).await;
        let generator = Arc::new(RecordingGenerator::default());
        let pipeline = pipeline(index.clone(), generator.clone()).await;

        assert_eq!(pipeline.answer("").await, EMPTY_QUESTION_REPLY);
        assert_eq!(pipeline.answer(" \n\t ").await, EMPTY_QUESTION_REPLY);
        assert_eq!(*index.search_calls.lock().unwrap(), 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_long_question_makes_no_calls() {
        let index = seeded_index(&[]).await;
        let generator = Arc::new(RecordingGenerator::default());
        let pipeline = pipeline(index.clone(), generator.clone()).await;

        assert_eq!(pipeline.answer(&"a".repeat(1001)).await, TOO_LONG_REPLY);
        assert_eq!(*index.search_calls.lock().unwrap(), 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

        let answer = pipeline.answer(&"a".repeat(1000)).await;
        assert_ne!(answer, TOO_LONG_REPLY);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_index_still_answers() {
        let index = seeded_index(&[]).await;
        let generator = Arc::new(RecordingGenerator::default());
        let pipeline = pipeline(index, generator.clone()).await;

        let answer = pipeline.answer("What is gout?").await;
        assert!(!answer.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generator_failure_becomes_apology() {
        let index = seeded_index(&["Fever is a temporary rise in temperature."]).await;
        let generator = Arc::new(RecordingGenerator {
            fail: true,
            ..Default::default()
        });
        let pipeline = pipeline(index, generator).await;

        assert_eq!(pipeline.answer("What is fever?").await, FAILURE_REPLY);
    }

    #[tokio::test]
    async fn test_retrieval_failure_becomes_apology() {
        let index = Arc::new(MemoryIndex {
            fail_search: true,
            ..MemoryIndex::with_index(spec())
        });
        let generator = Arc::new(RecordingGenerator::default());
        let pipeline = pipeline(index, generator.clone()).await;

        assert_eq!(pipeline.answer("What is fever?").await, FAILURE_REPLY);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_checks_dimension_and_index() {
        let generator = Arc::new(RecordingGenerator::default());

        let wrong = IndexSpec {
            dimension: 384,
            ..spec()
        };
        let result = QueryPipeline::connect(
            Arc::new(KeywordEmbedder),
            Arc::new(MemoryIndex::with_index(wrong.clone())),
            generator.clone(),
            &wrong,
        )
        .await;
        assert!(matches!(result, Err(RagError::Config(_))));

        let result = QueryPipeline::connect(
            Arc::new(KeywordEmbedder),
            Arc::new(MemoryIndex::default()),
            generator,
            &spec(),
        )
        .await;
        assert!(matches!(result, Err(RagError::Config(_))));
    }

    #[tokio::test]
    async fn test_ingest_folder_into_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("fever.txt"),
            "Fever is a temporary rise in temperature. ".repeat(30),
        )
        .unwrap();
        fs::write(dir.path().join("acne.txt"), "Acne affects the skin.").unwrap();

        let index = Arc::new(MemoryIndex::default());
        let ingestor = Ingestor::new(
            DocumentLoader::new(),
            Chunker::default(),
            Arc::new(KeywordEmbedder),
            IndexWriter::new(index.clone(), spec()),
        );

        let report = ingestor.run(dir.path()).await.unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks, report.indexed);
        assert!(report.chunks >= 4);
        assert_eq!(index.specs.lock().unwrap().len(), 1);
        assert_eq!(index.entries.lock().unwrap().len(), report.indexed);

        // a second run reuses the index
        ingestor.run(dir.path()).await.unwrap();
        assert_eq!(index.specs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_empty_folder_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = Ingestor::new(
            DocumentLoader::new(),
            Chunker::default(),
            Arc::new(KeywordEmbedder),
            IndexWriter::new(Arc::new(MemoryIndex::default()), spec()),
        );

        let err = ingestor.run(dir.path()).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }
}
