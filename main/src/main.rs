use std::sync::Arc;

use cache::{Cache, ExactCache};
use common::storage::db::SurrealDbClient;
use common::storage::document_store::DocumentStore;
use common::utils::config::get_config;
use common::utils::embedding::{Embedder, HashedEmbedder, OpenAiEmbedder};
use common::utils::logging::init_tracing;
use conversation::Conversation;
use generator::{Generator, OpenAiLlmClient};
use pipeline::Pipeline;
use retrieval_pipeline::{ReRanker, RerankTuning, Retriever};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

const EMBEDDING_DIMENSIONS: u32 = 1536;
const RERANKER_POOL_SIZE: usize = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = get_config()?;

    let db = SurrealDbClient::new(&config.chroma_path, "clinical", "clinical").await?;

    let openai_client = async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    );

    let embedder: Arc<dyn Embedder> = if config.openai_api_key.is_empty() {
        warn!("no OPENAI_API_KEY configured; falling back to a hashed, non-semantic embedder");
        Arc::new(HashedEmbedder::new(EMBEDDING_DIMENSIONS as usize))
    } else {
        Arc::new(OpenAiEmbedder::new(
            openai_client.clone(),
            &config.embedding_model,
            EMBEDDING_DIMENSIONS,
        ))
    };

    let store = Arc::new(
        DocumentStore::new(
            db.clone(),
            embedder.clone(),
            &config.collection_name_s,
            &config.collection_name_u,
        )
        .await?,
    );
    let cache: Arc<dyn Cache> =
        Arc::new(ExactCache::with_default_ttl(db.clone(), config.exact_cache_ttl_seconds));

    let llm = Arc::new(OpenAiLlmClient::new(openai_client, &config.llm_model));
    let generator = Arc::new(Generator::new(llm));

    let retriever = Arc::new(Retriever::new(store, generator.clone()));

    let cache_dir = std::env::temp_dir().join("clinical-reranker-cache");
    let reranker_pool = retrieval_pipeline::RerankerPool::new(RERANKER_POOL_SIZE, cache_dir)?;
    let tuning = RerankTuning {
        cross_query_threshold: config.cross_query_rerank_threshold,
    };
    let reranker = Arc::new(ReRanker::new(reranker_pool, tuning));

    let pipeline = Pipeline::new(generator, cache, retriever, reranker, &config.llm_model);

    info!("clinical deprescribing assistant ready; type a message and press enter (Ctrl-D to quit)");
    run_repl(&pipeline).await
}

async fn run_repl(pipeline: &Pipeline) -> Result<(), Box<dyn std::error::Error>> {
    let mut conversation = Conversation::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = stdin.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match pipeline.handle_turn(&line, &mut conversation).await {
            Ok(reply) => {
                stdout.write_all(reply.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Err(err) => {
                warn!(error = %err, "turn failed");
                stdout.write_all(b"Sorry, something went wrong on my end.\n").await?;
                stdout.flush().await?;
            }
        }
    }

    Ok(())
}
