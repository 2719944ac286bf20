//! Configuração do b1pilot carregada a partir de `b1pilot.toml`.
//!
//! A struct [`PilotConfig`] agrupa todos os parâmetros configuráveis em seções.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `B1PILOT_BASE_DIR` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Nome padrão do arquivo de configuração.
pub const DEFAULT_CONFIG_FILE: &str = "b1pilot.toml";

/// Configuração de nível superior carregada de `b1pilot.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub checkpoint: CheckpointConfig,
    pub machine: MachineConfig,
    pub automation: AutomationConfig,
    pub upload: UploadConfig,
}

/// Diretórios da fila de trabalho e filtros de admissão.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Diretório base; os subdiretórios abaixo são relativos a ele.
    pub base_dir: PathBuf,
    pub pending: String,
    pub processing: String,
    pub completed: String,
    pub error: String,
    pub screenshots: String,
    pub archive: String,
    /// Extensões aceitas (sem o ponto).
    pub extensions: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("data"),
            pending: "pending".to_string(),
            processing: "processing".to_string(),
            completed: "completed".to_string(),
            error: "error".to_string(),
            screenshots: "screenshots".to_string(),
            archive: "archive".to_string(),
            extensions: vec!["json".to_string()],
        }
    }
}

/// Limite de retentativas por estado.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Máximo de retentativas antes de marcar o item como falho.
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Parâmetros das estratégias de recuperação e do circuit breaker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Falhas consecutivas por tipo de erro até abrir o circuito.
    pub circuit_threshold: u32,
    /// Espera base (ms) multiplicada por `retry_count + 1` em falhas de template.
    pub template_backoff_ms: u64,
    /// Espera (ms) antes de tentar reativar a janela outra vez.
    pub window_retry_wait_ms: u64,
    /// Espera base (ms) multiplicada por `retry_count + 1` após ESC na navegação.
    pub navigation_backoff_ms: u64,
    /// Tempo fixo (ms) após limpar um campo de entrada.
    pub data_settle_ms: u64,
    /// Base (ms) do backoff exponencial de timeout.
    pub timeout_base_ms: u64,
    /// Teto (ms) do backoff exponencial de timeout.
    pub timeout_ceiling_ms: u64,
    /// Latência máxima (ms) aceitável de captura na validação de timeout.
    pub latency_threshold_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            circuit_threshold: 5,
            template_backoff_ms: 1000,
            window_retry_wait_ms: 2000,
            navigation_backoff_ms: 1500,
            data_settle_ms: 500,
            timeout_base_ms: 2000,
            timeout_ceiling_ms: 30000,
            latency_threshold_ms: 2000,
        }
    }
}

/// Armazenamento de checkpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Subdiretório (relativo ao diretório base) dos arquivos de checkpoint.
    pub dir: String,
    /// Idade máxima (s) de um checkpoint retomável.
    pub expiry_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: "checkpoints".to_string(),
            expiry_secs: 3600,
        }
    }
}

/// Limites da máquina de estados.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Máximo de iterações executar/disparar por item.
    pub max_iterations: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self { max_iterations: 100 }
    }
}

/// Parâmetros de interação com a tela do ERP.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Confiança mínima para aceitar um match de template.
    pub confidence: f32,
    /// Tempo máximo (ms) esperando um template aparecer.
    pub template_timeout_ms: u64,
    /// Tempo máximo (ms) esperando a aplicação abrir.
    pub startup_timeout_ms: u64,
    /// Intervalo (ms) entre tentativas de localizar um template.
    pub poll_interval_ms: u64,
    /// Pausa (ms) após cada digitação para a UI assentar.
    pub settle_ms: u64,
    /// Título da janela da área de trabalho remota.
    pub remote_desktop_title: String,
    /// Teclas do atalho que abre o formulário de pedido de venda.
    pub form_hotkey: Vec<String>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            confidence: 0.8,
            template_timeout_ms: 10000,
            startup_timeout_ms: 30000,
            poll_interval_ms: 500,
            settle_ms: 300,
            remote_desktop_title: "Remote Desktop Connection".to_string(),
            form_hotkey: vec!["alt".to_string(), "m".to_string()],
        }
    }
}

impl AutomationConfig {
    pub fn template_timeout(&self) -> Duration {
        Duration::from_millis(self.template_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Envio do screenshot de comprovação.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub enabled: bool,
    /// Destino usado pelo uploader local (cópia para diretório).
    pub target_dir: Option<PathBuf>,
}

impl PilotConfig {
    /// Carrega a configuração do caminho fornecido, ou de `b1pilot.toml`
    /// no diretório atual. Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para o diretório base.
        if let Ok(dir) = std::env::var("B1PILOT_BASE_DIR")
            && !dir.is_empty()
        {
            config.queue.base_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Interpreta e valida o conteúdo TOML.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: PilotConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        use crate::error::RpaError;

        if !(0.0..=1.0).contains(&self.automation.confidence) {
            return Err(RpaError::Config(format!(
                "automation.confidence must be within 0.0..=1.0, got {}",
                self.automation.confidence
            )));
        }
        if self.recovery.circuit_threshold == 0 {
            return Err(RpaError::Config(
                "recovery.circuit_threshold must be at least 1".to_string(),
            ));
        }
        if self.machine.max_iterations == 0 {
            return Err(RpaError::Config(
                "machine.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.queue.extensions.is_empty() {
            return Err(RpaError::Config(
                "queue.extensions must list at least one extension".to_string(),
            ));
        }
        Ok(())
    }

    /// Diretório base da fila.
    pub fn base_dir(&self) -> &Path {
        &self.queue.base_dir
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.queue.base_dir.join(&self.checkpoint.dir)
    }

    pub fn checkpoint_expiry(&self) -> Duration {
        Duration::from_secs(self.checkpoint.expiry_secs)
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.queue.base_dir.join(&self.queue.screenshots)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.queue.base_dir.join(&self.queue.archive)
    }
}
