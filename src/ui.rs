//! Interface de terminal do b1pilot: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente
//! uma passada pela fila de pedidos no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::checkpoint::CheckpointStore;
use crate::state_machine::{State, StateContext, epoch_seconds};
use crate::workflow::{ItemOutcome, ItemReport, QueueDirs, RunSummary};

/// Indicador visual de progresso para o processamento da fila.
///
/// Exibe um spinner com o pedido e o estado atuais e uma linha colorida
/// por pedido: sucesso (verde), falha (vermelho), rejeição e retentativa
/// (amarelo).
pub struct RunProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner e retorna a instância de progresso.
    ///
    /// O spinner desenha em stdout; os logs do `tracing` ficam em stderr.
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(label.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Callback de entrada em estado: atualiza o spinner e anuncia
    /// retentativas.
    pub fn state_hook(&self) -> impl Fn(State, &StateContext) + Send + 'static {
        let pb = self.pb.clone();
        let yellow = self.yellow.clone();
        move |state, ctx| {
            if state == State::Retrying {
                pb.println(format!(
                    "  {} Retry {}/{} em {}: {}",
                    yellow.apply_to("↻"),
                    ctx.retry_count,
                    ctx.max_retries,
                    ctx.file_name(),
                    ctx.error_message.as_deref().unwrap_or("-"),
                ));
            }
            pb.set_message(format!("{}: {state}", ctx.file_name()));
        }
    }

    /// Callback por pedido: imprime o resultado acima do spinner.
    pub fn item_hook(&self) -> impl Fn(&ItemReport) + Send + 'static {
        let pb = self.pb.clone();
        let (green, red, yellow) = (self.green.clone(), self.red.clone(), self.yellow.clone());
        move |report| {
            let detail = report.error.as_deref().unwrap_or("");
            let line = match report.outcome {
                ItemOutcome::Succeeded => format!("  {} {}", green.apply_to("✓"), report.item),
                ItemOutcome::Failed => {
                    format!("  {} {}: {detail}", red.apply_to("✗"), report.item)
                }
                ItemOutcome::Rejected => {
                    format!("  {} {} rejeitado: {detail}", yellow.apply_to("!"), report.item)
                }
            };
            pb.println(line);
        }
    }

    /// Finaliza o spinner e exibe o placar da passada.
    pub fn complete(&self, summary: &RunSummary) {
        self.pb.finish_and_clear();
        let style = if summary.has_failures() {
            &self.red
        } else {
            &self.green
        };
        println!(
            "  {} {} processados, {} concluídos, {} com erro, {} rejeitados{}",
            style.apply_to("■"),
            summary.items.len(),
            summary.succeeded,
            summary.failed,
            summary.rejected,
            if summary.cancelled { " (interrompido)" } else { "" },
        );
    }

    /// Imprime o resumo da execução formatado em JSON.
    pub fn print_summary(&self, summary: &RunSummary) {
        let style = if summary.failed > 0 || summary.cancelled {
            &self.yellow
        } else {
            &self.green
        };
        println!();
        println!("{}", style.apply_to("─── Run Summary ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
    }
}

/// Quantidade de arquivos em cada diretório da fila.
pub fn print_queue(dirs: &QueueDirs) {
    let count = |dir: &std::path::Path| {
        std::fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0)
    };
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("Fila"));
    for (name, dir) in [
        ("pending", &dirs.pending),
        ("processing", &dirs.processing),
        ("completed", &dirs.completed),
        ("error", &dirs.error),
    ] {
        println!("  {name:<11} {:>4}  {}", count(dir), dir.display());
    }
}

/// Lista os checkpoints com idade e estado.
pub fn print_checkpoints(store: &CheckpointStore) -> crate::error::Result<()> {
    let now = epoch_seconds();
    let checkpoints = store.list()?;
    let bold = Style::new().bold();
    let dim = Style::new().dim();
    println!(
        "{} ({})",
        bold.apply_to("Checkpoints"),
        store.dir().display()
    );
    if checkpoints.is_empty() {
        println!("  {}", dim.apply_to("nenhum"));
    }
    for cp in checkpoints {
        let age = cp.age_at(now).as_secs();
        let marker = if store.is_expired(&cp, now) {
            Style::new().yellow().apply_to("expirado")
        } else if cp.current_state.is_terminal() {
            Style::new().red().apply_to("final")
        } else {
            Style::new().green().apply_to("retomável")
        };
        println!(
            "  {:<28} {:<26} retries={} idade={}s {}",
            cp.current_file, cp.current_state, cp.retry_count, age, marker
        );
        if let Some(message) = &cp.error_message {
            println!("    {}", dim.apply_to(message));
        }
    }
    Ok(())
}
