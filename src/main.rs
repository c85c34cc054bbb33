//! Duel Arena Server
//!
//! `serve` runs the WebSocket server. `demo` plays a scripted match through
//! a predicting client over a simulated laggy link, then replays the server
//! inputs to check determinism.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duel_arena::{
    AuthoritativeLoop, ClientPredictor, FighterId, FighterState, InputCommand, PredictionConfig,
    ReconcileOutcome, Simulation, FIXED_STEP_MS, TICK_RATE, VERSION,
    network::{GameServer, ServerConfig},
};

const USAGE: &str = "usage: duel-arena-server [serve|demo] [--latency-ms N] [--ticks N]";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Serve,
    Demo,
}

#[derive(Debug, Clone, PartialEq)]
struct Args {
    command: Command,
    latency_ms: f64,
    ticks: u64,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Self {
            command: Command::Serve,
            latency_ms: 100.0,
            ticks: 1200,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "serve" => parsed.command = Command::Serve,
                "demo" => parsed.command = Command::Demo,
                "--latency-ms" => {
                    let value = args.next().context("--latency-ms needs a value")?;
                    parsed.latency_ms = value
                        .parse()
                        .with_context(|| format!("invalid --latency-ms {value:?}"))?;
                    if !parsed.latency_ms.is_finite() || parsed.latency_ms < 0.0 {
                        bail!("--latency-ms must be a non-negative number");
                    }
                }
                "--ticks" => {
                    let value = args.next().context("--ticks needs a value")?;
                    parsed.ticks = value
                        .parse()
                        .with_context(|| format!("invalid --ticks {value:?}"))?;
                }
                other => bail!("unknown argument {other:?}\n{USAGE}"),
            }
        }

        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    info!("Duel Arena Server v{}", VERSION);
    info!("Tick Rate: {} Hz ({:.3} ms step)", TICK_RATE, FIXED_STEP_MS);

    match args.command {
        Command::Serve => serve().await,
        Command::Demo => demo(args.latency_ms, args.ticks),
    }
}

async fn serve() -> Result<()> {
    let config = ServerConfig::from_env().context("reading server config")?;
    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}

// =============================================================================
// DEMO
// =============================================================================

/// Scripted input for one fighter lane.
fn scripted_input(t: u64, lane: u64) -> InputCommand {
    let phase = (t + lane * 90) % 240;
    let mut input = InputCommand::idle();

    match phase {
        0..=79 => input.move_right = true,
        120..=199 => input.move_left = true,
        _ => {}
    }
    input.jump = phase % 60 == 10;
    input.jump_held = phase % 60 >= 10 && phase % 60 < 25;
    input.light_attack = phase % 50 == 30;
    input.heavy_attack = phase == 215;
    input.heavy_attack_held = (215..230).contains(&phase);
    input.dodge = phase == 100;
    input
}

/// A delayed delivery.
struct InFlight<T> {
    arrives_at: u64,
    payload: T,
}

fn demo(latency_ms: f64, ticks: u64) -> Result<()> {
    info!("=== Starting Demo Match ===");
    info!("One-way latency: {} ms, ticks: {}", latency_ms, ticks);

    let sim = Simulation::default();
    let local = FighterId(0);
    let remote = FighterId(1);

    let mut server = AuthoritativeLoop::new(sim.clone());
    server.add_fighter(local, 0);
    server.add_fighter(remote, 1);

    let initial = server.fighter(local).context("local fighter missing")?.state;
    let mut client = ClientPredictor::new(sim.clone(), initial, PredictionConfig::default());

    let delay_ticks = (latency_ms / FIXED_STEP_MS).round() as u64;
    let mut uplink: VecDeque<InFlight<InputCommand>> = VecDeque::new();
    let mut downlink: VecDeque<InFlight<(u64, FighterState)>> = VecDeque::new();

    // Commands in the order the server queued them, per frame
    let mut recorded: Vec<Vec<(FighterId, InputCommand)>> = Vec::new();
    let mut outcomes = [0u64; 4];

    for t in 0..ticks {
        let mut queued = Vec::new();

        // Client side: predict now, deliver later
        let cmd = client.predict(scripted_input(t, 0));
        uplink.push_back(InFlight { arrives_at: t + delay_ticks, payload: cmd });

        // Remote player sits on the server
        let remote_cmd = scripted_input(t, 1).with_sequence(t + 1);
        server.enqueue(remote, remote_cmd);
        queued.push((remote, remote_cmd));

        while uplink.front().is_some_and(|f| f.arrives_at <= t) {
            if let Some(f) = uplink.pop_front() {
                server.enqueue(local, f.payload);
                queued.push((local, f.payload));
            }
        }

        let result = server.fixed_update();
        recorded.push(queued);

        for hit in &result.hits {
            info!(
                "Frame {}: {} hit {} for {:.1}%",
                result.frame, hit.attacker, hit.victim, hit.damage
            );
        }
        for ko in &result.kos {
            info!("Frame {}: {} KO'd, {} lives left", result.frame, ko.fighter, ko.lives_remaining);
        }

        // Server side: ack the local fighter after the return trip
        if let Some(f) = server.fighter(local) {
            if let Some(seq) = f.last_processed_sequence {
                downlink.push_back(InFlight { arrives_at: t + delay_ticks, payload: (seq, f.state) });
            }
        }

        while downlink.front().is_some_and(|f| f.arrives_at <= t) {
            if let Some(f) = downlink.pop_front() {
                let (seq, state) = f.payload;
                let slot = match client.reconcile(seq, &state) {
                    ReconcileOutcome::Stale => 0,
                    ReconcileOutcome::Confirmed => 1,
                    ReconcileOutcome::Corrected { .. } => 2,
                    ReconcileOutcome::HardSnap => 3,
                };
                outcomes[slot] += 1;
            }
        }

        if t % (TICK_RATE as u64 * 5) == 0 {
            info!(
                "Frame {}: predicted x={:.2}, buffered={}, corrections={}",
                result.frame,
                client.state().position.x,
                client.sequencer().len(),
                client.metrics().corrections,
            );
        }

        if let Some(winner) = result.winner {
            info!("Match decided at frame {}: {} wins", result.frame, winner);
            break;
        }
    }

    // Results
    info!("=== Prediction Results ===");
    let m = client.metrics();
    info!(
        "Predictions: {}, reconciled: {}, confirmed: {}, corrected: {}, hard snaps: {}, stale: {}",
        m.predictions, m.reconciliations, outcomes[1], outcomes[2], outcomes[3], outcomes[0]
    );
    info!(
        "Replayed ticks: {}, correction rate: {:.1}%",
        m.replayed_ticks,
        m.correction_rate() * 100.0
    );

    let hash = server.state_hash();
    info!("Final State Hash: {}", hex::encode(hash));

    // Verify determinism by replaying the recorded queue
    info!("=== Verifying Determinism ===");
    let mut replay = AuthoritativeLoop::new(sim);
    replay.add_fighter(local, 0);
    replay.add_fighter(remote, 1);
    for frame in &recorded {
        for (id, cmd) in frame {
            replay.enqueue(*id, *cmd);
        }
        replay.fixed_update();
    }

    let replay_hash = replay.state_hash();
    info!("Replay State Hash: {}", hex::encode(replay_hash));

    if hash == replay_hash {
        info!("DETERMINISM VERIFIED: Hashes match!");
        Ok(())
    } else {
        warn!("DETERMINISM FAILURE: Hashes differ!");
        bail!("replay diverged from the live run")
    }
}
