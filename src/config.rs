//! Configuração do jobwatch carregada a partir de `jobwatch.toml`.
//!
//! A struct [`ClientConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `JOBWATCH_SERVER_URL` tem precedência sobre o arquivo.
//! [`WaitOptions`] são as opções efetivas de uma chamada a `wait_for_status`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::reconnect::RetryPolicy;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "jobwatch.toml";

/// Variável de ambiente que sobrescreve `server_url`.
pub const SERVER_URL_ENV: &str = "JOBWATCH_SERVER_URL";

/// Configuração de nível superior carregada de `jobwatch.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// URL base do serviço de jobs.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Prazo absoluto de cada espera, em milissegundos.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Máximo de reconexões do canal push antes de cair para polling.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Atraso entre reconexões do canal push, em milissegundos.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Usa apenas polling, sem nunca abrir o canal push.
    #[serde(default)]
    pub use_polling: bool,

    /// Intervalo inicial do polling, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Teto do intervalo de polling, em milissegundos.
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Timeout de cada requisição HTTP avulsa, em milissegundos.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

// Valor padrão para a URL do servidor.
fn default_server_url() -> String {
    "http://localhost:3000".to_string()
}

// Valor padrão para o prazo: 30000ms.
fn default_timeout_ms() -> u64 {
    30_000
}

// Valor padrão para retentativas máximas: 3.
fn default_max_retries() -> u32 {
    3
}

// Valor padrão para o atraso de reconexão: 1000ms.
fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_interval_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            use_polling: false,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Carrega a configuração de `jobwatch.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(url) = std::env::var(SERVER_URL_ENV)
            && !url.is_empty()
        {
            config.server_url = url;
        }

        Ok(config)
    }

    /// Lê um arquivo de configuração explícito.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<ClientConfig>(&contents)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Opções de espera derivadas desta configuração.
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            use_polling: self.use_polling,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_interval: Duration::from_millis(self.max_poll_interval_ms),
        }
    }
}

/// Opções efetivas de uma espera; podem ser sobrescritas por chamada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOptions {
    /// Prazo absoluto da espera inteira, compartilhado entre push e polling.
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Pula o canal push.
    pub use_polling: bool,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        ClientConfig::default().wait_options()
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_polling(mut self, use_polling: bool) -> Self {
        self.use_polling = use_polling;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        }
    }
}
