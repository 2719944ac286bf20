//! Interface de linha de comando do b1pilot baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status,
//! checkpoints, demo) e flags globais (--config, --max-retries, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// b1pilot: Lançamento automático de pedidos de venda no SAP Business One.
#[derive(Debug, Parser)]
#[command(name = "b1pilot", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `b1pilot.toml`).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de retentativas por estado.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Falha injetada no desktop simulado: o template não é encontrado nas
/// próximas `times` buscas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFault {
    pub template: String,
    pub times: u32,
}

/// Interpreta `template=n`.
fn parse_fault(raw: &str) -> Result<TemplateFault, String> {
    let (template, times) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <template>=<n>, got '{raw}'"))?;
    let template = template.trim();
    if template.is_empty() {
        return Err("template name must not be empty".to_string());
    }
    let times = times
        .trim()
        .parse()
        .map_err(|_| format!("'{times}' is not a number of lookups"))?;
    Ok(TemplateFault {
        template: template.to_string(),
        times,
    })
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Processa uma vez todos os pedidos pendentes da fila.
    Run {
        /// Usa o desktop simulado em vez de uma tela real.
        #[arg(long, default_value_t = false)]
        simulate: bool,

        /// Injeta falhas de template no desktop simulado (`template=n`).
        #[arg(long = "fail", value_parser = parse_fault, requires = "simulate")]
        faults: Vec<TemplateFault>,
    },

    /// Mostra a fila, os checkpoints e a configuração efetiva.
    Status,

    /// Lista ou remove checkpoints.
    Checkpoints {
        /// Remove todos os checkpoints.
        #[arg(long, default_value_t = false, conflicts_with = "expired")]
        clear: bool,

        /// Remove apenas os checkpoints expirados.
        #[arg(long, default_value_t = false)]
        expired: bool,
    },

    /// Executa a demonstração embutida com uma fila temporária.
    Demo,
}
