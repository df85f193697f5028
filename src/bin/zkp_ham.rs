//! zkp-ham: enrollment and interactive authentication sessions
//!
//! One subcommand per protocol role:
//!   seed       manage the encrypted client seed
//!   enroll     derive σ, build G, publish graph + manifest
//!   prove      run the prover over a shared mailbox
//!   verify     run the verifier (optionally as a serve loop)
//!   attack     drill the verifier with forged sessions
//!   graph-dot  export an enrolled graph as Graphviz DOT
//!
//! Exit codes: 0 success/accepted, 1 verification rejected, 2 I/O or
//! protocol failure, 3 bad configuration.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use hamzkp::attack::{drill_deadlines, Attacker, ForgeMode};
use hamzkp::enroll;
use hamzkp::graph::BitMatrix;
use hamzkp::perm::Permutation;
use hamzkp::protocol::{OsChallenges, Prover, SessionConfig, Verifier};
use hamzkp::seed::{ScryptParams, SecretSeed, SeedStore};
use hamzkp::transport::{MailboxTransport, TransportError};

const EXIT_OK: i32 = 0;
const EXIT_REJECTED: i32 = 1;
const EXIT_PROTOCOL: i32 = 2;
const EXIT_CONFIG: i32 = 3;

/// Marker for failures that should exit with the bad-configuration code.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ConfigError(String);

#[derive(Debug, Parser)]
#[command(name = "zkp-ham")]
#[command(about = "Hamiltonian-cycle zero-knowledge authentication")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the encrypted client seed
    Seed {
        #[command(subcommand)]
        command: SeedCommands,
    },
    /// Produce enrollment artifacts (graph file + manifest)
    Enroll(EnrollArgs),
    /// Prove knowledge of the planted cycle over a mailbox session
    Prove(ProveArgs),
    /// Verify sessions against an enrollment
    Verify(VerifyArgs),
    /// Drill the verifier with forged sessions (expects rejections)
    Attack(AttackArgs),
    /// Export an enrolled graph as Graphviz DOT
    GraphDot(GraphDotArgs),
}

#[derive(Debug, Args)]
struct SeedBase {
    /// Base path of the seed artifacts (no suffix)
    #[arg(long, env = "ZKP_HAM_SEED", default_value_os_t = default_seed_base())]
    seed: PathBuf,
}

#[derive(Debug, Subcommand)]
enum SeedCommands {
    /// Generate a fresh seed and stage it at <base>.raw
    Gen {
        #[command(flatten)]
        base: SeedBase,
    },
    /// Seal the staged (or a fresh) seed under a passphrase
    Encrypt {
        #[command(flatten)]
        base: SeedBase,
        /// scrypt work factor, log2(N)
        #[arg(long, default_value_t = 17)]
        scrypt_log_n: u8,
    },
    /// Decrypt and print the seed (hex)
    Decrypt {
        #[command(flatten)]
        base: SeedBase,
    },
    /// Derive the permutation and print its head
    Derive {
        #[command(flatten)]
        base: SeedBase,
        /// Permutation length
        #[arg(long, default_value_t = 1000)]
        n: usize,
        /// Path to the public seed (hex text)
        #[arg(long, default_value = "seed_pub.txt")]
        seed_pub: PathBuf,
    },
}

#[derive(Debug, Args)]
struct EnrollArgs {
    #[command(flatten)]
    base: SeedBase,
    /// Path to the public seed; generated there when absent
    #[arg(long, default_value = "seed_pub.txt")]
    seed_pub: PathBuf,
    /// Number of vertices
    #[arg(long, default_value_t = 1024)]
    n: usize,
    /// Target average degree
    #[arg(long, default_value_t = 4.0)]
    davg: f64,
    /// Graph file output path
    #[arg(long, default_value = "graph_adjmatrix.bin")]
    out_graph: PathBuf,
    /// Manifest output path
    #[arg(long, default_value = "enroll_manifest.json")]
    out_manifest: PathBuf,
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Number of rounds T
    #[arg(long, default_value_t = 256)]
    rounds: u32,
    /// Mailbox directory shared with the peer
    #[arg(long, env = "ZKP_HAM_MAILBOX", default_value = ".zkp-ham-mailbox")]
    mailbox: PathBuf,
}

#[derive(Debug, Args)]
struct ProveArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[command(flatten)]
    base: SeedBase,
    /// Path to the public seed (hex text)
    #[arg(long, default_value = "seed_pub.txt")]
    seed_pub: PathBuf,
    /// Enrolled graph file
    #[arg(long, default_value = "graph_adjmatrix.bin")]
    graph: PathBuf,
    /// Session identifier; random when omitted
    #[arg(long)]
    session_id: Option<String>,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Enrollment manifest
    #[arg(long, default_value = "enroll_manifest.json")]
    manifest: PathBuf,
    /// Enrolled graph file; when given, b=0 openings must match it
    #[arg(long)]
    graph: Option<PathBuf>,
    /// Demand full-length Hamiltonian cycles on b=1
    #[arg(long)]
    strict_cycle: bool,
    /// Keep accepting sessions instead of exiting after one
    #[arg(long)]
    serve: bool,
}

#[derive(Debug, Args)]
struct AttackArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Enrollment manifest (commitments to replay)
    #[arg(long, default_value = "enroll_manifest.json")]
    manifest: PathBuf,
    /// Enrolled graph file, for row material
    #[arg(long)]
    graph: Option<PathBuf>,
    /// Forgery strategy
    #[arg(long, default_value = "random")]
    mode: ForgeMode,
    /// Number of forged sessions
    #[arg(long, default_value_t = 20)]
    trials: usize,
}

#[derive(Debug, Args)]
struct GraphDotArgs {
    /// Enrolled graph file
    #[arg(long, default_value = "graph_adjmatrix.bin")]
    graph: PathBuf,
    /// Restrict to the induced subgraph on the first K vertices
    #[arg(long)]
    limit: Option<usize>,
    /// Output path; stdout when omitted
    #[arg(long)]
    out: Option<PathBuf>,
}

fn default_seed_base() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".zkp-ham")
        .join("seed")
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                EXIT_CONFIG
            } else {
                EXIT_PROTOCOL
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Seed { command } => run_seed(command),
        Commands::Enroll(args) => run_enroll(args),
        Commands::Prove(args) => run_prove(args),
        Commands::Verify(args) => run_verify(args),
        Commands::Attack(args) => run_attack(args),
        Commands::GraphDot(args) => run_graph_dot(args),
    }
}

/// Read the passphrase from `ZKP_HAM_PASSPHRASE` or prompt without echo.
fn passphrase(prompt: &str) -> anyhow::Result<String> {
    if let Ok(pw) = std::env::var("ZKP_HAM_PASSPHRASE") {
        return Ok(pw);
    }
    rpassword::prompt_password(prompt).context("reading passphrase")
}

fn decrypt_seed(store: &SeedStore) -> anyhow::Result<SecretSeed> {
    let pw = passphrase("Passphrase to decrypt seed: ")?;
    store
        .decrypt(&pw)
        .context("decrypting client seed")
}

// ----------------------------------------------------------------------------
// seed
// ----------------------------------------------------------------------------

fn run_seed(command: SeedCommands) -> anyhow::Result<i32> {
    match command {
        SeedCommands::Gen { base } => {
            let store = SeedStore::new(&base.seed);
            let seed = SecretSeed::generate();
            store.write_raw(&seed)?;
            println!("Seed (hex): {}", hex::encode(seed.as_bytes()));
            println!(
                "Wrote raw seed to {}; run `zkp-ham seed encrypt` to seal it.",
                store.raw_path().display()
            );
            Ok(EXIT_OK)
        }
        SeedCommands::Encrypt { base, scrypt_log_n } => {
            if !(10..=24).contains(&scrypt_log_n) {
                return Err(ConfigError(format!(
                    "scrypt log_n {scrypt_log_n} outside the accepted 10..=24 envelope"
                ))
                .into());
            }
            let store = SeedStore::new(&base.seed)
                .with_params(ScryptParams { log_n: scrypt_log_n, r: 8, p: 1 });
            let seed = match store.read_raw()? {
                Some(staged) => staged,
                None => SecretSeed::generate(),
            };
            let pw = passphrase("Passphrase to encrypt seed: ")?;
            let confirm = passphrase("Repeat passphrase: ")?;
            if pw != confirm {
                return Err(ConfigError("passphrases do not match".into()).into());
            }
            store.encrypt(&seed, &pw)?;
            store.shred_raw()?;
            println!("Encrypted seed written to {}", store.enc_path().display());
            Ok(EXIT_OK)
        }
        SeedCommands::Decrypt { base } => {
            let store = SeedStore::new(&base.seed);
            let seed = decrypt_seed(&store)?;
            println!("Decrypted seed (hex): {}", hex::encode(seed.as_bytes()));
            Ok(EXIT_OK)
        }
        SeedCommands::Derive { base, n, seed_pub } => {
            let store = SeedStore::new(&base.seed);
            let seed = decrypt_seed(&store)?;
            let pub_bytes = enroll::read_seed_pub(&seed_pub)
                .map_err(|e| ConfigError(e.to_string()))?;
            let sigma = Permutation::derive(n, seed.as_bytes(), &pub_bytes)
                .map_err(|e| ConfigError(e.to_string()))?;
            let head: Vec<u32> = sigma.as_slice().iter().take(20).copied().collect();
            println!("Derived permutation (first {} indices): {head:?}", head.len());
            Ok(EXIT_OK)
        }
    }
}

// ----------------------------------------------------------------------------
// enroll
// ----------------------------------------------------------------------------

fn run_enroll(args: EnrollArgs) -> anyhow::Result<i32> {
    let store = SeedStore::new(&args.base.seed);
    let seed_client = decrypt_seed(&store)?;
    let seed_pub = enroll::ensure_seed_pub(&args.seed_pub)?;
    let manifest = enroll::enroll(
        &seed_client,
        &seed_pub,
        args.n,
        args.davg,
        &args.out_graph,
        &args.out_manifest,
    )?;
    println!(
        "Enrolled n={} (commitments: {}) -> {}, {}",
        manifest.n,
        manifest.commit_count,
        args.out_graph.display(),
        args.out_manifest.display()
    );
    Ok(EXIT_OK)
}

// ----------------------------------------------------------------------------
// prove / verify
// ----------------------------------------------------------------------------

fn run_prove(args: ProveArgs) -> anyhow::Result<i32> {
    let store = SeedStore::new(&args.base.seed);
    let seed_client = decrypt_seed(&store)?;
    let seed_pub = enroll::read_seed_pub(&args.seed_pub)
        .map_err(|e| ConfigError(e.to_string()))?;
    let graph = BitMatrix::load(&args.graph)
        .with_context(|| format!("loading graph {}", args.graph.display()))?;
    let sigma = Permutation::derive(graph.n(), seed_client.as_bytes(), &seed_pub)
        .map_err(|e| ConfigError(e.to_string()))?;

    let config = SessionConfig { rounds: args.session.rounds, ..SessionConfig::default() };
    let prover = Prover::new(&graph, &sigma, config)?;
    let mut transport = MailboxTransport::open(&args.session.mailbox)?;

    let session_id = args.session_id.unwrap_or_else(random_session_id);
    let result = prover.run(&session_id, &mut transport)?;
    println!(
        "Session {}: {} ({})",
        result.session,
        if result.ok { "ACCEPTED" } else { "REJECTED" },
        result.msg
    );
    Ok(if result.ok { EXIT_OK } else { EXIT_REJECTED })
}

fn run_verify(args: VerifyArgs) -> anyhow::Result<i32> {
    let manifest = enroll::load_manifest(&args.manifest)
        .with_context(|| format!("loading manifest {}", args.manifest.display()))?;
    let graph = match &args.graph {
        Some(path) => Some(
            BitMatrix::load(path).with_context(|| format!("loading graph {}", path.display()))?,
        ),
        None => None,
    };
    if let Some(g) = &graph {
        if g.n() != manifest.n {
            return Err(ConfigError(format!(
                "graph has {} vertices, manifest says {}",
                g.n(),
                manifest.n
            ))
            .into());
        }
    }

    let mut config = SessionConfig { rounds: args.session.rounds, ..SessionConfig::default() };
    config.require_full_cycle |= args.strict_cycle;
    let verifier = match &graph {
        Some(g) => Verifier::with_graph(g, config),
        None => Verifier::new(manifest.n, config),
    };

    let mut transport = MailboxTransport::open(&args.session.mailbox)?;
    transport.clear()?;
    let mut challenges = OsChallenges;

    loop {
        match verifier.run(&mut transport, &mut challenges) {
            Ok(result) => {
                println!(
                    "Session {}: {} ({})",
                    result.session,
                    if result.ok { "ACCEPTED" } else { "REJECTED" },
                    result.msg
                );
                if !args.serve {
                    return Ok(if result.ok { EXIT_OK } else { EXIT_REJECTED });
                }
            }
            Err(hamzkp::protocol::VerifierError::Transport(TransportError::Timeout {
                ..
            })) if args.serve => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn random_session_id() -> String {
    use rand::RngCore;
    let mut tag = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut tag);
    format!("session-{}", hex::encode(tag))
}

// ----------------------------------------------------------------------------
// attack
// ----------------------------------------------------------------------------

fn run_attack(args: AttackArgs) -> anyhow::Result<i32> {
    let manifest = enroll::load_manifest(&args.manifest)
        .with_context(|| format!("loading manifest {}", args.manifest.display()))?;
    let graph = match &args.graph {
        Some(path) => Some(
            BitMatrix::load(path).with_context(|| format!("loading graph {}", path.display()))?,
        ),
        None => None,
    };

    let attacker = Attacker::new(manifest.commits_all.clone(), graph.as_ref(), args.mode)
        .with_deadlines(drill_deadlines());
    let mut transport = MailboxTransport::open(&args.session.mailbox)?;
    let stats = attacker.run_batch(args.trials, &mut transport)?;

    println!(
        "Attack summary: {} trials, {} rejected, {} accepted, {} without verdict",
        stats.trials, stats.rejected, stats.accepted, stats.no_result
    );
    Ok(if stats.accepted == 0 { EXIT_OK } else { EXIT_REJECTED })
}

// ----------------------------------------------------------------------------
// graph-dot
// ----------------------------------------------------------------------------

fn run_graph_dot(args: GraphDotArgs) -> anyhow::Result<i32> {
    let graph = BitMatrix::load(&args.graph)
        .with_context(|| format!("loading graph {}", args.graph.display()))?;
    let mut dot = graph.to_dot(args.limit);
    if let Some(limit) = args.limit {
        dot.insert_str(
            0,
            &format!("// induced subgraph on the first {limit} of {} vertices\n", graph.n()),
        );
    }
    match args.out {
        Some(path) => {
            std::fs::write(&path, dot)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{dot}"),
    }
    Ok(EXIT_OK)
}
