//! CLI command definitions using clap.
//!
//! - serve: HTTP server streaming runs over SSE
//! - run: grow a document in the terminal
//! - docs: list, show or delete stored documents

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use selfloom::loom::GenerationParams;

/// selfloom - grow text by generating, grading and appending continuations
#[derive(Parser, Debug)]
#[command(name = "selfloom")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind the server to
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Use the scripted offline model instead of OpenRouter
        #[arg(long)]
        mock: bool,
    },

    /// Run the loop in the terminal
    Run(RunArgs),

    /// Stored documents
    Docs {
        #[command(subcommand)]
        command: DocsCommands,
    },
}

/// Options for `run`. Unset values come from the config.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Seed text
    #[arg(short, long)]
    pub seed: Option<String>,

    /// Continue a stored document instead of seeding
    #[arg(short, long)]
    pub document: Option<String>,

    /// Candidates per iteration
    #[arg(short = 'n', long)]
    pub candidates: Option<usize>,

    /// Token cap per candidate
    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub min_p: Option<f32>,

    /// Generation model
    #[arg(long)]
    pub base_model: Option<String>,

    /// Grading model
    #[arg(long)]
    pub grader_model: Option<String>,

    /// Stop after this many iterations
    #[arg(short, long)]
    pub iterations: Option<u32>,

    /// Use the scripted offline model instead of OpenRouter
    #[arg(long)]
    pub mock: bool,
}

impl RunArgs {
    /// Overlay the flags on `params`
    pub fn apply(&self, mut params: GenerationParams) -> GenerationParams {
        if let Some(candidates) = self.candidates {
            params.candidate_count = candidates;
        }
        if let Some(max_tokens) = self.max_tokens {
            params.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            params.temperature = temperature;
        }
        if let Some(min_p) = self.min_p {
            params.min_p = min_p;
        }
        if let Some(model) = &self.base_model {
            params.generation_model = model.clone();
        }
        if let Some(model) = &self.grader_model {
            params.grading_model = model.clone();
        }
        if self.iterations.is_some() {
            params.max_iterations = self.iterations;
        }
        params
    }
}

/// Document subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum DocsCommands {
    /// List documents, newest first
    List,

    /// Print a document
    Show {
        /// Document name
        name: String,
    },

    /// Delete a document
    Delete {
        /// Document name
        name: String,
    },
}
