//! End-to-end sessions: enrollment artifacts, honest proofs over both
//! transports, exhaustive challenge schedules, and forged-session rejection.

use std::time::Duration;

use sha2::{Digest, Sha256};

use hamzkp::attack::{Attacker, ForgeMode};
use hamzkp::commit::commit_rows;
use hamzkp::enroll;
use hamzkp::graph::{build_graph, BitMatrix};
use hamzkp::kdf;
use hamzkp::perm::Permutation;
use hamzkp::protocol::{
    Deadlines, OsChallenges, Prover, ScriptedChallenges, SessionConfig, Verifier,
};
use hamzkp::seed::{ScryptParams, SecretSeed, SeedStore};
use hamzkp::transport::{pair, MailboxTransport};

fn seed(label: &str) -> [u8; 32] {
    Sha256::digest(label.as_bytes()).into()
}

fn fast_config(rounds: u32) -> SessionConfig {
    SessionConfig {
        rounds,
        deadlines: Deadlines {
            commits: Duration::from_secs(10),
            challenge: Duration::from_secs(10),
            open: Duration::from_secs(10),
            result: Duration::from_secs(10),
        },
        require_full_cycle: false,
    }
}

// Tiny deterministic instance: everything derived from (n=8, "c", "p", 3.0)
// must rebuild identically, cycle planted, first commitment stable.
#[test]
fn tiny_instance_is_fully_deterministic() {
    let n = 8;
    let sigma = Permutation::derive(n, &seed("c"), &seed("p")).unwrap();
    let graph = build_graph(n, &seed("p"), &sigma, 3.0).unwrap();

    for (u, v) in sigma.cycle_edges() {
        assert!(graph.get(u as usize, v as usize), "cycle edge ({u}, {v}) missing");
    }

    let (commits_a, nonces_a) = commit_rows(&graph, &seed("s"), kdf::CTX_ROW_COMMIT);
    // Full independent rebuild, starting again from the seeds.
    let sigma_b = Permutation::derive(n, &seed("c"), &seed("p")).unwrap();
    let graph_b = build_graph(n, &seed("p"), &sigma_b, 3.0).unwrap();
    let (commits_b, nonces_b) = commit_rows(&graph_b, &seed("s"), kdf::CTX_ROW_COMMIT);

    assert_eq!(sigma, sigma_b);
    assert_eq!(graph, graph_b);
    assert_eq!(hex::encode(commits_a[0]), hex::encode(commits_b[0]));
    assert_eq!(nonces_a.get(0), nonces_b.get(0));
}

// Every one of the 16 possible challenge vectors for T=4 must accept an
// honest prover.
#[test]
fn honest_prover_accepts_all_challenge_vectors() {
    let sigma = Permutation::derive(8, &seed("c"), &seed("p")).unwrap();
    let graph = build_graph(8, &seed("p"), &sigma, 3.0).unwrap();
    let config = fast_config(4);

    for mask in 0u32..16 {
        let bits: Vec<u8> = (0..4).map(|i| ((mask >> i) & 1) as u8).collect();
        let (mut pt, mut vt) = pair();
        let result = std::thread::scope(|s| {
            let (gr, sr, cfg) = (&graph, &sigma, config.clone());
            s.spawn(move || {
                Prover::new(gr, sr, cfg)
                    .unwrap()
                    .run("exhaustive", &mut pt)
                    .unwrap()
            });
            let verifier = Verifier::with_graph(&graph, config.clone());
            let mut ch = ScriptedChallenges::new(bits.clone());
            verifier.run(&mut vt, &mut ch).unwrap()
        });
        assert!(result.ok, "challenge vector {bits:?} rejected: {}", result.msg);
    }
}

#[test]
fn honest_session_over_the_file_mailbox() {
    let dir = tempfile::tempdir().unwrap();
    let sigma = Permutation::derive(12, &seed("c"), &seed("p")).unwrap();
    let graph = build_graph(12, &seed("p"), &sigma, 4.0).unwrap();
    let config = fast_config(6);

    let result = std::thread::scope(|s| {
        let (gr, sr, cfg, mailbox) = (&graph, &sigma, config.clone(), dir.path());
        s.spawn(move || {
            let mut transport = MailboxTransport::open(mailbox).unwrap();
            Prover::new(gr, sr, cfg)
                .unwrap()
                .run("mailbox-session", &mut transport)
                .unwrap()
        });
        let mut transport = MailboxTransport::open(dir.path()).unwrap();
        let verifier = Verifier::with_graph(&graph, config.clone());
        verifier.run(&mut transport, &mut OsChallenges).unwrap()
    });
    assert!(result.ok, "{}", result.msg);

    // Every slot was consumed; nothing session-shaped is left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "stale mailbox slots: {leftovers:?}");
}

// The whole enrollment-to-session pipeline, artifacts on disk: seal a seed,
// enroll, then prove with material re-derived purely from the artifacts.
#[test]
fn full_flow_from_sealed_seed_to_accepted_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = SeedStore::new(dir.path().join("seed"))
        .with_params(ScryptParams { log_n: 12, r: 8, p: 1 });
    store.encrypt(&SecretSeed::from_bytes(seed("client")), "correct horse").unwrap();

    let seed_pub_path = dir.path().join("seed_pub.txt");
    let graph_path = dir.path().join("graph_adjmatrix.bin");
    let manifest_path = dir.path().join("enroll_manifest.json");

    let seed_client = store.decrypt("correct horse").unwrap();
    let seed_pub = enroll::ensure_seed_pub(&seed_pub_path).unwrap();
    enroll::enroll(&seed_client, &seed_pub, 16, 4.0, &graph_path, &manifest_path).unwrap();

    // Prover side: re-derive everything from disk artifacts.
    let manifest = enroll::load_manifest(&manifest_path).unwrap();
    let graph = BitMatrix::load(&graph_path).unwrap();
    assert_eq!(graph.n(), manifest.n);
    let seed_pub_again = enroll::read_seed_pub(&seed_pub_path).unwrap();
    let sigma =
        Permutation::derive(graph.n(), store.decrypt("correct horse").unwrap().as_bytes(), &seed_pub_again)
            .unwrap();

    let config = fast_config(8);
    let (mut pt, mut vt) = pair();
    let result = std::thread::scope(|s| {
        let (gr, sr, cfg) = (&graph, &sigma, config.clone());
        s.spawn(move || {
            Prover::new(gr, sr, cfg).unwrap().run("full-flow", &mut pt).unwrap()
        });
        let verifier = Verifier::with_graph(&graph, config.clone());
        verifier.run(&mut vt, &mut OsChallenges).unwrap()
    });
    assert!(result.ok, "{}", result.msg);
}

// A prover holding only public material (manifest commitments, graph file)
// never survives: every forged session is rejected on its first round.
#[test]
fn forged_sessions_are_rejected_over_the_mailbox() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = dir.path().join("mailbox");
    let graph_path = dir.path().join("graph_adjmatrix.bin");
    let manifest_path = dir.path().join("enroll_manifest.json");

    let seed_client = SecretSeed::from_bytes(seed("client"));
    let manifest =
        enroll::enroll(&seed_client, &seed("p"), 12, 4.0, &graph_path, &manifest_path).unwrap();
    let graph = BitMatrix::load(&graph_path).unwrap();

    const TRIALS: usize = 4;
    let config = fast_config(4);

    let stats = std::thread::scope(|s| {
        let (gr, cfg, mb) = (&graph, config.clone(), mailbox.clone());
        s.spawn(move || {
            let mut transport = MailboxTransport::open(mb).unwrap();
            let verifier = Verifier::with_graph(gr, cfg);
            for _ in 0..TRIALS {
                let result = verifier.run(&mut transport, &mut OsChallenges).unwrap();
                assert!(!result.ok, "forged session accepted: {}", result.msg);
            }
        });
        let mut transport = MailboxTransport::open(&mailbox).unwrap();
        let attacker = Attacker::new(manifest.commits_all.clone(), Some(&graph), ForgeMode::Random)
            .with_deadlines(fast_config(4).deadlines);
        attacker.run_batch(TRIALS, &mut transport).unwrap()
    });

    assert_eq!(stats.trials, TRIALS);
    assert_eq!(stats.accepted, 0);
    assert_eq!(stats.rejected, TRIALS);
    assert_eq!(stats.no_result, 0);
}
