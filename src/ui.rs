//! Saída de terminal do jobwatch: spinner de espera e resultado colorido.
//!
//! Usa `indicatif` para o spinner enquanto um job é acompanhado e `console`
//! para estilizar o resultado final.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::StatusError;
use crate::resolver::Resolution;
use crate::status::{JobId, Status};

/// Indicador visual de progresso para a espera de um job no terminal.
pub struct WaitProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl WaitProgress {
    /// Inicia o spinner para o job.
    pub fn start(job_id: &JobId) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("waiting for job {job_id}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e exibe o resultado.
    ///
    /// `completed` em verde, `error` (status do job, não falha do cliente) em
    /// amarelo, falhas do cliente em vermelho.
    pub fn finish(&self, outcome: &Result<Resolution, StatusError>) {
        self.pb.finish_and_clear();
        match outcome {
            Ok(resolution) => {
                let (mark, style) = match resolution.status {
                    Status::Completed => ("✓", &self.green),
                    _ => ("!", &self.yellow),
                };
                println!(
                    "  {} Job {} finished with status {} via {:?} in {}ms",
                    style.apply_to(mark),
                    resolution.job_id,
                    style.apply_to(resolution.status),
                    resolution.path,
                    resolution.elapsed_ms
                );
            }
            Err(err) => {
                println!("  {} {err}", self.red.apply_to("✗"));
            }
        }
    }

    /// Imprime o registro de resolução em JSON.
    pub fn print_resolution(&self, resolution: &Resolution) {
        println!();
        println!("{}", self.green.apply_to("─── Resolution ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(resolution).unwrap_or_default()
        );
    }
}
