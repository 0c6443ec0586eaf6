//! Interface de linha de comando do jobwatch baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (create, status, wait,
//! run, demo) e flags globais que sobrescrevem `jobwatch.toml`.

use clap::{Parser, Subcommand};

use crate::config::ClientConfig;

/// jobwatch: acompanha jobs de tradução de vídeo até o status final.
#[derive(Debug, Parser)]
#[command(name = "jobwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// URL base do serviço de jobs.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Prazo de espera em milissegundos.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Número máximo de reconexões do canal push.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Usa apenas polling, sem canal push.
    #[arg(long, global = true, default_value_t = false)]
    pub polling: bool,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cria um job e imprime seu identificador.
    Create,

    /// Mostra o status atual de um job.
    Status {
        /// Identificador do job.
        job_id: String,
    },

    /// Espera um job chegar a um status final.
    Wait {
        /// Identificador do job.
        job_id: String,
    },

    /// Cria um job e espera pelo status final.
    Run,

    /// Executa os cenários de demonstração contra o backend em memória.
    Demo,
}

impl Cli {
    /// Aplica as flags globais sobre a configuração carregada.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if self.polling {
            config.use_polling = true;
        }
    }
}
