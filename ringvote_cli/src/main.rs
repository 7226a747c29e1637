use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, info};
use ringvote_sdk::client::{ChainRpc, JsonRpcClient};
use ringvote_sdk::codec::{self, KeyArrays};
use ringvote_sdk::config::{ElectionRef, ProtocolConfig, ProtocolVariant};
use ringvote_sdk::crypto::{RingCrypto, RsaRingCrypto};
use ringvote_sdk::keyfile::{parse_public_key, parse_public_keys};
use ringvote_sdk::progress::ProgressReporter;
use ringvote_sdk::submission::load_election;
use ringvote_sdk::tally::{collect_ballots, tally, TallyContext};
use ringvote_sdk::types::OutPoint;
use ringvote_sdk::BatchPlan;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ringvote")]
#[command(about = "ringvote - inspect ring-signature elections on CKB", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Protocol config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// CKB node RPC URL, overrides the config file
    #[arg(long, global = true)]
    rpc_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the candidate list stored in a cell
    Candidates {
        /// Cell out point (0xHASH:INDEX)
        cell: OutPoint,
    },

    /// Show the published key source of an election
    Keys {
        /// Election reference file handed out by the administrator
        election: PathBuf,
    },

    /// Find a public key inside a published election
    Locate {
        /// Election reference file
        election: PathBuf,

        /// File holding the voter's public key as one JWK line
        #[arg(short, long)]
        key: PathBuf,

        /// Full key file, required for merkle-root elections
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Compute the merkle root of a key file
    MerkleRoot {
        /// Key file, one JWK per line
        keys: PathBuf,

        /// Keys per batch (defaults to the configured batch size)
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Count the ballots cast in an election
    Tally {
        /// Election reference file
        election: PathBuf,

        /// Transactions fetched per indexer page
        #[arg(short, long, default_value_t = 100)]
        page_limit: u32,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct TallyReport {
    candidates: Vec<CandidateCount>,
    accepted: usize,
    duplicates: Vec<String>,
    rejected: Vec<RejectedBallot>,
}

#[derive(Serialize)]
struct CandidateCount {
    id: String,
    description: String,
    votes: usize,
}

#[derive(Serialize)]
struct RejectedBallot {
    tx_hash: String,
    reason: String,
}

fn load_config(cli: &Cli) -> Result<ProtocolConfig> {
    let mut config = match &cli.config {
        Some(path) => ProtocolConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ProtocolConfig::default().with_env_overrides(),
    };
    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    let validation = config.validate();
    validation.log_summary();
    if !validation.is_valid() {
        bail!("invalid configuration: {}", validation.errors.join("; "));
    }
    Ok(config)
}

fn read_election(path: &Path) -> Result<ElectionRef> {
    ElectionRef::from_file(path)
        .with_context(|| format!("failed to read election reference {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn variant_name(variant: ProtocolVariant) -> &'static str {
    match variant {
        ProtocolVariant::IndexCell => "index cell",
        ProtocolVariant::MerkleRoot => "merkle root",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!("Using RPC endpoint {}", config.rpc_url);
    let rpc = JsonRpcClient::new(config.rpc_url.clone());

    match cli.command {
        Commands::Candidates { cell } => {
            println!("{}", "Fetching candidate list...".cyan());
            let tx = rpc
                .get_transaction(&cell.tx_hash)
                .await
                .context("failed to fetch candidate transaction")?
                .with_context(|| format!("transaction {} not found", cell.tx_hash))?;
            let candidates = codec::decode_candidate_list(tx.output_data(cell.index)?)
                .context("cell does not hold a candidate list")?;

            println!("\n{}", "Candidates".cyan().bold());
            println!("{}", "═".repeat(50).cyan());
            for candidate in &candidates {
                println!(
                    "{}  {}",
                    hex::encode(candidate.id).bright_black(),
                    candidate.description.bright_white()
                );
            }
            println!("{}", format!("{} candidates", candidates.len()).green());
        }

        Commands::Keys { election } => {
            let election = read_election(&election)?;
            let cell = election.key_source_cell;
            let tx = rpc
                .get_transaction(&cell.tx_hash)
                .await
                .context("failed to fetch key source transaction")?
                .with_context(|| format!("transaction {} not found", cell.tx_hash))?;
            let data = tx.output_data(cell.index)?;

            println!("\n{}", "Key Source".cyan().bold());
            println!("{}", "═".repeat(50).cyan());
            println!("{}: {}", "Variant".bright_white(), variant_name(election.variant));
            println!("{}: {}", "Cell".bright_white(), cell.to_string().yellow());
            println!("{}: {}", "Batch Size".bright_white(), election.batch_size);

            match election.variant {
                ProtocolVariant::IndexCell => {
                    let entries = codec::decode_pubkey_index(data)?;
                    println!("{}: {}", "Batches".bright_white(), entries.len());
                    println!("{}", "─".repeat(50).bright_black());
                    for (i, entry) in entries.iter().enumerate() {
                        println!("{:>4}  {}", i, entry.out_point().to_string().green());
                    }
                }
                ProtocolVariant::MerkleRoot => {
                    let record = codec::decode_merkle_root(data)?;
                    println!("{}: {}", "Root".bright_white(), hex::encode(record.root).green());
                    println!("{}: {}", "Keys".bright_white(), record.leaf_count);
                    println!("{}: {}", "Batches".bright_white(), record.batch_count);
                    let plan = BatchPlan::new(record.leaf_count as usize, election.batch_size)?;
                    if plan.batch_count() != record.batch_count as usize {
                        println!(
                            "{}",
                            format!(
                                "Batch size {} does not reproduce {} batches",
                                election.batch_size, record.batch_count
                            )
                            .yellow()
                        );
                    }
                }
            }
        }

        Commands::Locate {
            election,
            key,
            key_file,
        } => {
            let election = read_election(&election)?;
            let voter_key = parse_public_key(read_text(&key)?.trim())
                .with_context(|| format!("failed to parse public key {}", key.display()))?;
            let key_file = match key_file {
                Some(path) => Some(
                    parse_public_keys(&read_text(&path)?)
                        .with_context(|| format!("failed to parse key file {}", path.display()))?,
                ),
                None => None,
            };

            println!("{}", "Loading election...".cyan());
            let loaded = load_election(
                &rpc,
                Arc::new(RsaRingCrypto),
                &election,
                key_file,
                config.fetch_concurrency,
                &ProgressReporter::disabled(),
            )
            .await
            .context("failed to load election")?;

            match loaded.locate(&voter_key) {
                Ok(location) => {
                    println!("\n{}", "Key found".green().bold());
                    println!("{}: {}", "Batch".bright_white(), location.batch_index);
                    println!("{}: {}", "Offset".bright_white(), location.offset);
                    let ring = loaded.batch(location.batch_index).map_or(0, |b| b.len());
                    println!("{}: {} keys", "Ring".bright_white(), ring);
                }
                Err(e) => {
                    println!("{}", format!("{}", e).red());
                    println!(
                        "{}",
                        format!("Searched {} published keys", loaded.key_count()).bright_black()
                    );
                }
            }
        }

        Commands::MerkleRoot { keys, batch_size } => {
            let batch_size = batch_size.unwrap_or(config.batch_size);
            let parsed = parse_public_keys(&read_text(&keys)?)
                .with_context(|| format!("failed to parse key file {}", keys.display()))?;
            let plan = BatchPlan::new(parsed.len(), batch_size)?;
            let arrays = KeyArrays::from_keys(&parsed)?;

            let root = tokio::task::spawn_blocking(move || {
                RsaRingCrypto.create_merkle_root(&arrays, batch_size)
            })
            .await
            .context("merkle root task panicked")??;

            println!("\n{}", "Merkle Root".cyan().bold());
            println!("{}", "═".repeat(50).cyan());
            println!("{}: {}", "Root".bright_white(), hex::encode(root).green());
            println!("{}: {}", "Keys".bright_white(), plan.key_count());
            println!("{}: {}", "Batches".bright_white(), plan.batch_count());
            println!("{}: {}", "Batch Size".bright_white(), batch_size);
        }

        Commands::Tally {
            election,
            page_limit,
            json,
        } => {
            let election = read_election(&election)?;
            println!("{}", "Loading election...".cyan());
            let context = TallyContext::load(&rpc, &election)
                .await
                .context("failed to load election")?;

            let type_script = config.verifier.type_script(election.variant);
            println!("{}", "Collecting ballots...".cyan());
            let ballots = collect_ballots(&rpc, &type_script, page_limit)
                .await
                .context("failed to collect ballots")?;
            let result = tally(&context, &ballots);
            debug!("{} ballots scanned, {} accepted", ballots.len(), result.accepted);

            if json {
                let report = TallyReport {
                    candidates: result
                        .counts
                        .iter()
                        .map(|(c, votes)| CandidateCount {
                            id: hex::encode(c.id),
                            description: c.description.clone(),
                            votes: *votes,
                        })
                        .collect(),
                    accepted: result.accepted,
                    duplicates: result.duplicates.iter().map(|h| h.to_string()).collect(),
                    rejected: result
                        .rejected
                        .iter()
                        .map(|(h, reason)| RejectedBallot {
                            tx_hash: h.to_string(),
                            reason: reason.clone(),
                        })
                        .collect(),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("\n{}", "Results".cyan().bold());
            println!("{}", "═".repeat(50).cyan());
            for (candidate, votes) in &result.counts {
                println!(
                    "{:<40} {}",
                    candidate.description.bright_white(),
                    votes.to_string().green().bold()
                );
            }
            println!("{}", "─".repeat(50).bright_black());
            println!("{}: {}", "Accepted".bright_white(), result.accepted);
            if !result.duplicates.is_empty() {
                println!(
                    "{}",
                    format!("Ignored {} repeated key images", result.duplicates.len()).yellow()
                );
            }
            for (hash, reason) in &result.rejected {
                println!("{}", format!("Rejected {}: {}", hash, reason).red());
            }
            println!(
                "{}",
                format!("{} ballot transactions scanned", ballots.len()).bright_black()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_locate() {
        let cli = Cli::try_parse_from([
            "ringvote",
            "locate",
            "election.json",
            "--key",
            "me.jwk",
            "--rpc-url",
            "http://node:8114",
        ])
        .unwrap();
        assert_eq!(cli.rpc_url.as_deref(), Some("http://node:8114"));
        assert!(matches!(cli.command, Commands::Locate { key_file: None, .. }));
    }

    #[test]
    fn test_parse_candidates_outpoint() {
        let hash = format!("0x{}", "ab".repeat(32));
        let cli = Cli::try_parse_from(["ringvote", "candidates", &format!("{}:2", hash)]).unwrap();
        match cli.command {
            Commands::Candidates { cell } => assert_eq!(cell.index, 2),
            _ => panic!("wrong subcommand"),
        }
        assert!(Cli::try_parse_from(["ringvote", "candidates", "nope"]).is_err());
    }
}
