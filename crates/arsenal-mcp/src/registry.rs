use serde_json::{Value, json};

use crate::error::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    BuscarArsenal,
    BuscarLead,
    AtualizarLead,
    SalvarLead,
    LerTabela,
    ModificarDados,
    GerarLinkDownload,
    ListarTabelas,
    ReindexarArsenal,
}

const CORE_TOOLS: [ToolKind; 8] = [
    ToolKind::BuscarArsenal,
    ToolKind::BuscarLead,
    ToolKind::AtualizarLead,
    ToolKind::SalvarLead,
    ToolKind::LerTabela,
    ToolKind::ModificarDados,
    ToolKind::GerarLinkDownload,
    ToolKind::ListarTabelas,
];

impl ToolKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::BuscarArsenal => "buscar_arsenal",
            Self::BuscarLead => "buscar_lead",
            Self::AtualizarLead => "atualizar_lead",
            Self::SalvarLead => "salvar_lead",
            Self::LerTabela => "ler_tabela",
            Self::ModificarDados => "modificar_dados",
            Self::GerarLinkDownload => "gerar_link_download",
            Self::ListarTabelas => "listar_tabelas",
            Self::ReindexarArsenal => "reindexar_arsenal",
        }
    }

    const fn description(self) -> &'static str {
        match self {
            Self::BuscarArsenal => {
                "Busca semântica no arsenal de vendas (vídeos, imagens, depoimentos). Use 'query' ou 'busca' com o que o cliente precisa ver."
            }
            Self::BuscarLead => "Busca um lead pelo telefone.",
            Self::AtualizarLead => {
                "Atualiza o estágio do funil e o perfil de um lead, criando-o se não existir."
            }
            Self::SalvarLead => "Salva ou atualiza nome, interesse e estágio de um lead pelo telefone.",
            Self::LerTabela => "Lê linhas de uma tabela do banco.",
            Self::ModificarDados => "Insere, atualiza ou remove linhas de uma tabela do banco.",
            Self::GerarLinkDownload => {
                "Gera um link de download temporário (1 hora) para um arquivo do storage."
            }
            Self::ListarTabelas => "Lista as tabelas disponíveis no banco.",
            Self::ReindexarArsenal => {
                "Gera embeddings para itens do arsenal que ainda não têm vetor."
            }
        }
    }

    fn input_schema(self) -> Value {
        match self {
            Self::BuscarArsenal => json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Texto da busca"},
                    "busca": {"type": "string", "description": "Alias de query"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 50, "default": 5},
                    "category": {"type": "string", "description": "Filtra pela categoria"}
                }
            }),
            Self::BuscarLead => json!({
                "type": "object",
                "required": ["telefone"],
                "properties": {
                    "telefone": {"type": "string"}
                }
            }),
            Self::AtualizarLead => json!({
                "type": "object",
                "required": ["telefone"],
                "properties": {
                    "telefone": {"type": "string"},
                    "funnel_stage": {"type": "string"},
                    "perfil_completo_ia": {"type": "object"}
                }
            }),
            Self::SalvarLead => json!({
                "type": "object",
                "required": ["telefone"],
                "properties": {
                    "telefone": {"type": "string"},
                    "nome": {"type": "string"},
                    "interesse": {"type": "string"},
                    "stage": {"type": "string"}
                }
            }),
            Self::LerTabela => json!({
                "type": "object",
                "required": ["tabela"],
                "properties": {
                    "tabela": {"type": "string"},
                    "colunas": {"type": "string", "description": "Lista separada por vírgula, padrão *"},
                    "limite": {"type": "integer", "minimum": 1, "maximum": 1000, "default": 10}
                }
            }),
            Self::ModificarDados => json!({
                "type": "object",
                "required": ["acao", "tabela"],
                "properties": {
                    "acao": {"type": "string", "enum": ["insert", "update", "delete"]},
                    "tabela": {"type": "string"},
                    "dados": {"type": "object"},
                    "id_alvo": {"type": ["string", "integer"]}
                }
            }),
            Self::GerarLinkDownload => json!({
                "type": "object",
                "required": ["bucket", "caminho"],
                "properties": {
                    "bucket": {"type": "string"},
                    "caminho": {"type": "string"}
                }
            }),
            Self::ListarTabelas => json!({
                "type": "object",
                "properties": {}
            }),
            Self::ReindexarArsenal => json!({
                "type": "object",
                "properties": {
                    "limite": {"type": "integer", "minimum": 1, "maximum": 200, "default": 20}
                }
            }),
        }
    }
}

/// The set of tools this bridge answers for, in listing order.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolKind>,
}

impl ToolRegistry {
    pub fn new(maintenance_tools: bool) -> Self {
        let mut tools = CORE_TOOLS.to_vec();
        if maintenance_tools {
            tools.push(ToolKind::ReindexarArsenal);
        }
        Self { tools }
    }

    pub fn resolve(&self, name: &str) -> Result<ToolKind, ToolError> {
        self.tools
            .iter()
            .copied()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|kind| kind.name()).collect()
    }

    /// `tools/list` result.
    pub fn list(&self) -> Value {
        let tools = self
            .tools
            .iter()
            .map(|kind| {
                json!({
                    "name": kind.name(),
                    "description": kind.description(),
                    "inputSchema": kind.input_schema(),
                })
            })
            .collect::<Vec<_>>();
        json!({ "tools": tools })
    }
}
