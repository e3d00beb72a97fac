use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cloak", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML config (falls back to `CLOAK_CONFIG`, then `config/default.toml`)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild the index if the tree's revision changed
    Index {
        /// Source tree to index
        #[arg(default_value = ".")]
        tree: PathBuf,

        /// Keep running and re-index on changes
        #[arg(long)]
        watch: bool,
    },

    /// Hybrid semantic + BM25 search over the current index
    Search {
        query: String,

        /// Number of results (defaults to the preset)
        #[arg(long)]
        top_k: Option<usize>,

        /// Lexical weight in [0, 1]
        #[arg(long)]
        alpha: Option<f32>,

        /// Print results as JSON
        #[arg(long, conflicts_with = "context")]
        json: bool,

        /// Print results as a `<code_context>` block
        #[arg(long)]
        context: bool,
    },

    /// Show stored and current revisions and the snapshot state
    Status {
        #[arg(default_value = ".")]
        tree: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_search_flags() {
        let cli = Cli::try_parse_from([
            "cloak", "--config", "c.toml", "search", "parse config", "--top-k", "7", "--alpha",
            "0.2", "--json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        let Commands::Search {
            query,
            top_k,
            alpha,
            json,
            context,
        } = cli.command
        else {
            panic!("expected search");
        };
        assert_eq!(query, "parse config");
        assert_eq!(top_k, Some(7));
        assert!(alpha.is_some_and(|a| (a - 0.2).abs() < f32::EPSILON));
        assert!(json);
        assert!(!context);
    }

    #[test]
    fn index_defaults_to_current_dir() {
        let cli = Cli::try_parse_from(["cloak", "index"]).unwrap();
        let Commands::Index { tree, watch } = cli.command else {
            panic!("expected index");
        };
        assert_eq!(tree, PathBuf::from("."));
        assert!(!watch);
    }

    #[test]
    fn json_and_context_conflict() {
        assert!(Cli::try_parse_from(["cloak", "search", "q", "--json", "--context"]).is_err());
    }
}
