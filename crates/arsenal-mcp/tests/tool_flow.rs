use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arsenal_backend::MemoryBackend;
use arsenal_embed::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};
use arsenal_mcp::protocol::JsonRpcRequest;
use arsenal_mcp::{McpServer, ToolContext, ToolRegistry};
use arsenal_rerank::{RerankItem, RerankProvider, RerankRequest, RerankResponse};
use async_trait::async_trait;
use serde_json::{Value, json};

const ARSENAL: &str = "arsenal_vendas";
const LEADS: &str = "leads";

/// Returns the same vector for every input and counts calls.
struct FixedEmbedder {
    vector: Vec<f32>,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    fn new(vector: Vec<f32>) -> Arc<Self> {
        Arc::new(Self {
            vector,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, arsenal_embed::ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingResponse {
            provider: "fixed".to_string(),
            model: "fixed".to_string(),
            vectors: request.inputs.iter().map(|_| self.vector.clone()).collect(),
        })
    }
}

struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    fn name(&self) -> &'static str {
        "down"
    }

    async fn embed(
        &self,
        _request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, arsenal_embed::ProviderError> {
        Err(arsenal_embed::ProviderError::Api {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

/// Scores later candidates higher, so a rerank visibly reverses the order.
struct ReversingReranker {
    seen_documents: AtomicUsize,
}

#[async_trait]
impl RerankProvider for ReversingReranker {
    fn name(&self) -> &'static str {
        "reversing"
    }

    async fn rerank(
        &self,
        request: RerankRequest,
    ) -> Result<RerankResponse, arsenal_rerank::ProviderError> {
        self.seen_documents
            .store(request.documents.len(), Ordering::SeqCst);
        Ok(RerankResponse {
            provider: "reversing".to_string(),
            model: "reversing".to_string(),
            items: (0..request.documents.len())
                .map(|index| RerankItem {
                    index,
                    score: index as f32,
                })
                .collect(),
        })
    }
}

fn seeded_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.create_table(LEADS);
    backend.seed(
        ARSENAL,
        [
            json!({
                "id": 1,
                "nome_arquivo": "depoimento_tenis.mp4",
                "link_publico": "https://cdn.example/1.mp4",
                "categoria": "depoimento",
                "modelo_associado": "Runner X",
                "conteudo": "Cliente conta como o tênis ajudou na maratona",
                "emocao_predominante": "confiança",
                "melhor_momento_uso": "objeção de preço",
                "embedding": [1.0, 0.0, 0.0]
            }),
            json!({
                "id": 2,
                "nome_arquivo": "catalogo_sandalias.pdf",
                "link_publico": "https://cdn.example/2.pdf",
                "categoria": "catalogo",
                "modelo_associado": "Praia",
                "conteudo": "Linha de sandálias de verão",
                "embedding": [0.0, 1.0, 0.0]
            }),
            json!({
                "id": 3,
                "nome_arquivo": "foto_tenis_detalhe.jpg",
                "link_publico": "https://cdn.example/3.jpg",
                "categoria": "foto",
                "modelo_associado": "Runner X",
                "conteudo": "Detalhe do solado do tênis",
                "embedding": [0.9, 0.1, 0.0]
            }),
        ],
    );
    backend.register_vector_procedure("match_arsenal", ARSENAL, "embedding");
    backend
}

fn server_with(ctx: ToolContext) -> McpServer {
    McpServer::new(ctx, ToolRegistry::new(true), Duration::from_secs(60))
}

async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> Value {
    let req = JsonRpcRequest::new(
        1,
        "tools/call",
        json!({"name": name, "arguments": arguments}),
    );
    let response = server.handle_request(req).await.expect("tool response");
    assert!(response.error.is_none(), "tool calls never fail at the protocol level");
    response.result.expect("tool result")
}

fn text_of(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap_or_default()
}

fn is_error(result: &Value) -> bool {
    result["isError"].as_bool().unwrap_or(false)
}

#[tokio::test]
async fn unknown_tool_is_a_tool_error() {
    let server = server_with(ToolContext::new(seeded_backend()));
    let result = call_tool(&server, "apagar_tudo", json!({})).await;
    assert!(is_error(&result));
    assert_eq!(text_of(&result), "tool not found: apagar_tudo");
    assert_eq!(result["structuredContent"]["error"]["kind"], "ToolNotFound");
}

#[tokio::test]
async fn missing_lead_is_a_negative_result() {
    let server = server_with(ToolContext::new(seeded_backend()));
    let result = call_tool(&server, "buscar_lead", json!({"telefone": "5511000000000"})).await;
    assert!(!is_error(&result));
    assert_eq!(
        result["structuredContent"],
        json!({"found": false, "lead": null})
    );
    let text: Value = serde_json::from_str(text_of(&result)).expect("json text");
    assert_eq!(text, json!({"found": false, "lead": null}));
}

#[tokio::test]
async fn buscar_lead_without_phone_is_invalid() {
    let server = server_with(ToolContext::new(seeded_backend()));
    let result = call_tool(&server, "buscar_lead", json!({})).await;
    assert!(is_error(&result));
    assert_eq!(result["structuredContent"]["error"]["kind"], "InvalidArgument");
}

#[tokio::test]
async fn lead_upserts_merge_on_phone() {
    let backend = seeded_backend();
    let server = server_with(ToolContext::new(backend.clone()));

    let saved = call_tool(
        &server,
        "salvar_lead",
        json!({"telefone": "5511999990000", "nome": "Ana", "interesse": "tênis", "stage": "novo"}),
    )
    .await;
    assert!(!is_error(&saved));

    let updated = call_tool(
        &server,
        "atualizar_lead",
        json!({
            "telefone": "5511999990000",
            "funnel_stage": "negociacao",
            "perfil_completo_ia": {"tamanho": 40}
        }),
    )
    .await;
    assert!(!is_error(&updated));

    let rows = backend.rows(LEADS);
    assert_eq!(rows.len(), 1);
    let lead = &rows[0];
    assert_eq!(lead["nome"], "Ana");
    assert_eq!(lead["interesse"], "tênis");
    assert_eq!(lead["funnel_stage"], "negociacao");
    assert_eq!(lead["perfil_completo_ia"], json!({"tamanho": 40}));
    assert!(lead["ultima_interacao"].as_str().is_some_and(|ts| ts.ends_with('Z')));

    let found = call_tool(&server, "buscar_lead", json!({"telefone": 5511999990000_u64})).await;
    assert_eq!(found["structuredContent"]["found"], true);
    assert_eq!(found["structuredContent"]["lead"]["nome"], "Ana");
}

#[tokio::test]
async fn empty_query_is_rejected_before_any_upstream_call() {
    let embedder = FixedEmbedder::new(vec![1.0, 0.0, 0.0]);
    let ctx = ToolContext::new(seeded_backend()).with_embedder(embedder.clone());
    let server = server_with(ctx);

    for args in [json!({"query": ""}), json!({"busca": "   "}), json!({})] {
        let result = call_tool(&server, "buscar_arsenal", args).await;
        assert!(is_error(&result));
        assert_eq!(result["structuredContent"]["error"]["kind"], "InvalidArgument");
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_matches_return_the_no_results_payload() {
    let embedder = FixedEmbedder::new(vec![0.0, 0.0, 1.0]);
    let ctx = ToolContext::new(seeded_backend()).with_embedder(embedder);
    let server = server_with(ctx);

    let result = call_tool(&server, "buscar_arsenal", json!({"query": "guarda-chuva"})).await;
    assert!(!is_error(&result));
    assert_eq!(
        text_of(&result),
        "Nenhum item encontrado no arsenal para: \"guarda-chuva\""
    );
    assert_eq!(result["structuredContent"]["items"], json!([]));
}

#[tokio::test]
async fn vector_search_ranks_by_similarity() {
    let embedder = FixedEmbedder::new(vec![1.0, 0.0, 0.0]);
    let ctx = ToolContext::new(seeded_backend()).with_embedder(embedder.clone());
    let server = server_with(ctx);

    let result = call_tool(&server, "buscar_arsenal", json!({"busca": "tênis", "limit": 5})).await;
    assert!(!is_error(&result));
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    let structured = &result["structuredContent"];
    assert_eq!(structured["mode"], "vector");
    let ids = structured["items"]
        .as_array()
        .expect("items")
        .iter()
        .map(|item| item["id"].clone())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![json!(1), json!(3)]);
    assert!(structured["items"][0].get("embedding").is_none());

    let text = text_of(&result);
    assert!(text.contains("[1] depoimento_tenis.mp4\nLink: https://cdn.example/1.mp4"));
    assert!(text.contains("Categoria: depoimento | Modelo: Runner X"));
    assert!(text.contains("[2] foto_tenis_detalhe.jpg"));
}

#[tokio::test]
async fn rerank_reorders_overfetched_candidates() {
    let embedder = FixedEmbedder::new(vec![1.0, 0.0, 0.0]);
    let reranker = Arc::new(ReversingReranker {
        seen_documents: AtomicUsize::new(0),
    });
    let mut ctx = ToolContext::new(seeded_backend())
        .with_embedder(embedder)
        .with_reranker(reranker.clone());
    ctx.search.match_threshold = 0.0;
    let server = server_with(ctx);

    let result = call_tool(&server, "buscar_arsenal", json!({"query": "tênis", "limit": 1})).await;
    assert!(!is_error(&result));
    // limit 1 with the default over-fetch factor reaches every seeded row
    assert_eq!(reranker.seen_documents.load(Ordering::SeqCst), 3);

    let items = result["structuredContent"]["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], 2);
    assert_eq!(result["structuredContent"]["mode"], "vector+rerank");
}

#[tokio::test]
async fn category_filter_applies_to_vector_results() {
    let embedder = FixedEmbedder::new(vec![1.0, 0.0, 0.0]);
    let ctx = ToolContext::new(seeded_backend()).with_embedder(embedder);
    let server = server_with(ctx);

    let result = call_tool(
        &server,
        "buscar_arsenal",
        json!({"query": "tênis", "category": "foto"}),
    )
    .await;
    let items = result["structuredContent"]["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], 3);
}

#[tokio::test]
async fn keyword_match_is_used_without_an_embedder() {
    let server = server_with(ToolContext::new(seeded_backend()));
    let result = call_tool(&server, "buscar_arsenal", json!({"query": "SANDÁLIAS"})).await;
    assert!(!is_error(&result));
    assert_eq!(result["structuredContent"]["mode"], "keyword");
    let items = result["structuredContent"]["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["nome_arquivo"], "catalogo_sandalias.pdf");
}

#[tokio::test]
async fn failing_embedder_is_upstream_unavailable() {
    let ctx = ToolContext::new(seeded_backend()).with_embedder(Arc::new(DownEmbedder));
    let server = server_with(ctx);
    let result = call_tool(&server, "buscar_arsenal", json!({"query": "tênis"})).await;
    assert!(is_error(&result));
    assert_eq!(
        result["structuredContent"]["error"]["kind"],
        "UpstreamUnavailable"
    );
    assert!(text_of(&result).contains("503"));
}

#[tokio::test]
async fn ler_tabela_returns_the_single_row_as_the_only_block() {
    let backend = seeded_backend();
    backend.seed(LEADS, [json!({"telefone": "5511", "nome": "Ana"})]);
    let server = server_with(ToolContext::new(backend));

    let result = call_tool(&server, "ler_tabela", json!({"tabela": "leads", "limite": 1})).await;
    assert!(!is_error(&result));
    let content = result["content"].as_array().expect("content");
    assert_eq!(content.len(), 1);
    let row: Value = serde_json::from_str(text_of(&result)).expect("row json");
    assert_eq!(row, json!({"telefone": "5511", "nome": "Ana"}));
}

#[tokio::test]
async fn ler_tabela_projects_columns_and_clamps_limit() {
    let server = server_with(ToolContext::new(seeded_backend()));
    let result = call_tool(
        &server,
        "ler_tabela",
        json!({"tabela": ARSENAL, "colunas": ["id", "categoria"], "limite": "0"}),
    )
    .await;
    let rows = result["structuredContent"]["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], json!({"id": 1, "categoria": "depoimento"}));
}

#[tokio::test]
async fn modificar_dados_runs_insert_update_delete() {
    let backend = seeded_backend();
    backend.create_table("produtos");
    let server = server_with(ToolContext::new(backend.clone()));

    let inserted = call_tool(
        &server,
        "modificar_dados",
        json!({"acao": "insert", "tabela": "produtos", "dados": {"nome": "Runner X", "preco": 399}}),
    )
    .await;
    assert!(!is_error(&inserted));
    let id = inserted["structuredContent"]["rows"][0]["id"].clone();
    assert!(!id.is_null());

    let missing_target = call_tool(
        &server,
        "modificar_dados",
        json!({"acao": "update", "tabela": "produtos", "dados": {"preco": 349}}),
    )
    .await;
    assert!(is_error(&missing_target));
    assert!(text_of(&missing_target).contains("id_alvo"));

    let updated = call_tool(
        &server,
        "modificar_dados",
        json!({"acao": "update", "tabela": "produtos", "dados": {"preco": 349}, "id_alvo": id}),
    )
    .await;
    assert_eq!(updated["structuredContent"]["count"], 1);
    assert_eq!(backend.rows("produtos")[0]["preco"], 349);

    let deleted = call_tool(
        &server,
        "modificar_dados",
        json!({"acao": "delete", "tabela": "produtos", "id_alvo": id.to_string()}),
    )
    .await;
    assert_eq!(deleted["structuredContent"]["count"], 1);
    assert!(backend.rows("produtos").is_empty());

    let bad_action = call_tool(
        &server,
        "modificar_dados",
        json!({"acao": "truncate", "tabela": "produtos"}),
    )
    .await;
    assert_eq!(bad_action["structuredContent"]["error"]["kind"], "InvalidArgument");
}

#[tokio::test]
async fn table_access_is_configurable() {
    let mut ctx = ToolContext::new(seeded_backend());
    ctx.access.allowlist = Some([LEADS.to_string()].into_iter().collect());
    ctx.access.allow_writes = false;
    let server = server_with(ctx);

    let denied = call_tool(&server, "ler_tabela", json!({"tabela": ARSENAL})).await;
    assert!(is_error(&denied));
    assert_eq!(denied["structuredContent"]["error"]["kind"], "InvalidArgument");

    let write = call_tool(
        &server,
        "modificar_dados",
        json!({"acao": "insert", "tabela": LEADS, "dados": {"telefone": "1"}}),
    )
    .await;
    assert!(is_error(&write));

    let listed = call_tool(&server, "listar_tabelas", json!({})).await;
    assert_eq!(listed["structuredContent"]["tables"], json!([LEADS]));
}

#[tokio::test]
async fn listar_tabelas_is_unrestricted_by_default() {
    let server = server_with(ToolContext::new(seeded_backend()));
    let listed = call_tool(&server, "listar_tabelas", Value::Null).await;
    assert_eq!(listed["structuredContent"]["tables"], json!([ARSENAL, LEADS]));
}

#[tokio::test]
async fn download_links_expire_in_an_hour() {
    let backend = seeded_backend();
    backend.put_object("videos", "depoimentos/maria.mp4");
    let server = server_with(ToolContext::new(backend));

    let result = call_tool(
        &server,
        "gerar_link_download",
        json!({"bucket": "videos", "caminho": "/depoimentos/maria.mp4"}),
    )
    .await;
    assert!(!is_error(&result));
    assert_eq!(result["structuredContent"]["expires_in"], 3600);
    let url = text_of(&result);
    assert!(url.contains("/storage/v1/object/sign/videos/depoimentos/maria.mp4"));
    assert!(url.contains("expires_in=3600"));

    let missing = call_tool(
        &server,
        "gerar_link_download",
        json!({"bucket": "videos", "caminho": "nada.mp4"}),
    )
    .await;
    assert_eq!(
        missing["structuredContent"]["error"]["kind"],
        "UpstreamUnavailable"
    );
}

#[tokio::test]
async fn reindex_backfills_missing_embeddings() {
    let backend = seeded_backend();
    backend.seed(
        ARSENAL,
        [
            json!({"id": 10, "nome_arquivo": "novo.mp4", "conteudo": "Lançamento", "embedding": null}),
            json!({"id": 11, "embedding": null}),
        ],
    );
    let embedder = FixedEmbedder::new(vec![0.0, 0.0, 1.0]);
    let ctx = ToolContext::new(backend.clone()).with_embedder(embedder);
    let server = server_with(ctx);

    let result = call_tool(&server, "reindexar_arsenal", json!({})).await;
    assert!(!is_error(&result));
    assert_eq!(
        result["structuredContent"],
        json!({"scanned": 2, "updated": 1, "failed": 1})
    );
    let row = backend
        .rows(ARSENAL)
        .into_iter()
        .find(|r| r["id"] == 10)
        .expect("row 10");
    assert_eq!(row["embedding"], json!([0.0, 0.0, 1.0]));
}

#[tokio::test]
async fn protocol_methods_and_notifications() {
    let server = server_with(ToolContext::new(seeded_backend()));

    let notification = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: None,
        method: "notifications/initialized".to_string(),
        params: Value::Null,
    };
    assert!(server.handle_request(notification).await.is_none());

    let null_id = server
        .handle_request(JsonRpcRequest::new(Value::Null, "ping", json!({})))
        .await
        .expect("null id still gets a reply");
    assert_eq!(null_id.id, Value::Null);
    assert_eq!(null_id.result, Some(json!({})));

    let init = server
        .handle_request(JsonRpcRequest::new(
            1,
            "initialize",
            json!({"protocolVersion": "2025-03-26"}),
        ))
        .await
        .and_then(|r| r.result)
        .expect("initialize");
    assert_eq!(init["protocolVersion"], "2025-03-26");
    assert_eq!(init["serverInfo"]["name"], "arsenal-bridge");

    let listed = server
        .handle_request(JsonRpcRequest::new(2, "tools/list", json!({})))
        .await
        .and_then(|r| r.result)
        .expect("tools/list");
    let names = listed["tools"]
        .as_array()
        .expect("tools")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect::<Vec<_>>();
    assert_eq!(names.first(), Some(&"buscar_arsenal"));
    assert_eq!(names.last(), Some(&"reindexar_arsenal"));

    let unknown = server
        .handle_request(JsonRpcRequest::new(3, "resources/list", json!({})))
        .await
        .expect("response");
    assert_eq!(unknown.error.map(|e| e.code), Some(-32601));

    let bad_params = server
        .handle_request(JsonRpcRequest::new(4, "tools/call", json!({"arguments": {}})))
        .await
        .expect("response");
    assert_eq!(bad_params.error.map(|e| e.code), Some(-32602));

    let wrong_version = server
        .handle_request(JsonRpcRequest {
            jsonrpc: "1.0".to_string(),
            id: Some(json!(5)),
            method: "ping".to_string(),
            params: Value::Null,
        })
        .await
        .expect("response");
    assert_eq!(wrong_version.error.map(|e| e.code), Some(-32600));
}
